//! Login, signup, logout and token refresh commands

use colored::Colorize;
use dialoguer::{Input, Password, theme::ColorfulTheme};

use crate::cli::CommandContext;
use crate::cli::args::GlobalOptions;
use crate::error::Result;
use crate::session::{SessionState, SignupRequest};

/// Run the login command, prompting for anything not given on the command line
pub async fn login(opts: &GlobalOptions, email: Option<String>, password: Option<String>) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let theme = ColorfulTheme::default();

    let email = match email {
        Some(email) => email,
        None => Input::with_theme(&theme).with_prompt("Email").interact_text()?,
    };
    let password = match password {
        Some(password) => password,
        None => Password::with_theme(&theme).with_prompt("Password").interact()?,
    };

    println!("{}", "Signing in...".cyan());
    let state = ctx.session.login(&email, &password).await?;
    print_signed_in(&state);
    Ok(())
}

/// Run the signup command
pub async fn signup(
    opts: &GlobalOptions,
    name: Option<String>,
    email: Option<String>,
    organization: Option<String>,
) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    let theme = ColorfulTheme::default();

    let name = match name {
        Some(name) => name,
        None => Input::with_theme(&theme).with_prompt("Name").interact_text()?,
    };
    let email = match email {
        Some(email) => email,
        None => Input::with_theme(&theme).with_prompt("Email").interact_text()?,
    };
    let password = Password::with_theme(&theme)
        .with_prompt("Password (at least 8 characters)")
        .with_confirmation("Confirm password", "Passwords do not match")
        .interact()?;

    println!("{}", "Creating account...".cyan());
    let state = ctx
        .session
        .signup(SignupRequest {
            name,
            email,
            password,
            organization_name: organization,
        })
        .await?;
    print_signed_in(&state);
    Ok(())
}

/// Run the logout command
pub async fn logout(opts: &GlobalOptions) -> Result<()> {
    let ctx = CommandContext::new(opts)?;

    if ctx.session.state().token.is_none() {
        println!("{} Not signed in", "○".dimmed());
        return Ok(());
    }

    ctx.session.logout().await;
    println!("{} Signed out", "✓".green());
    Ok(())
}

/// Run the refresh command
pub async fn refresh(opts: &GlobalOptions) -> Result<()> {
    let ctx = CommandContext::new(opts)?;
    ctx.require_session().await?;

    ctx.session.refresh_token().await?;
    match ctx.session.token_expiry() {
        Some(expiry) => println!(
            "{} Token refreshed (expires {})",
            "✓".green(),
            expiry.format("%Y-%m-%d %H:%M UTC")
        ),
        None => println!("{} Token refreshed", "✓".green()),
    }
    Ok(())
}

fn print_signed_in(state: &SessionState) {
    if let Some(user) = &state.user {
        println!(
            "{} Signed in as {} ({})",
            "✓".green(),
            user.name.bold(),
            user.email
        );
    }
    if let Some(org) = &state.organization {
        println!("  Organization: {}", org.name.bold());
    }
}
