//! Status command implementation

use colored::Colorize;

use crate::cli::CommandContext;
use crate::cli::args::GlobalOptions;
use crate::error::Result;

/// Display configuration and session status.
///
/// Works offline unless `verify` is set.
pub async fn run(opts: &GlobalOptions, verify: bool) -> Result<()> {
    println!("{}\n", "scanlink Status".bold());

    let ctx = CommandContext::new(opts)?;

    let config_note = if ctx.config_path.exists() {
        ""
    } else {
        " (not found, using defaults)"
    };
    println!(
        "Config file: {}{}",
        ctx.config_path.display().to_string().cyan(),
        config_note.dimmed()
    );
    println!("API: {}", ctx.config.api_url.cyan());
    println!("Session file: {}", ctx.session_path.display().to_string().cyan());
    println!();

    if verify && ctx.session.state().token.is_some() {
        println!("{}", "Verifying session...".cyan());
        if !ctx.session.restore().await? {
            println!("{} Stored session was rejected and has been cleared", "✗".red());
            println!("  → Run 'scanlink login' to sign in");
            return Ok(());
        }
    }

    let state = ctx.session.state();
    if state.token.is_none() {
        println!("{} Not signed in", "✗".red());
        println!("  → Run 'scanlink login' to sign in");
        return Ok(());
    }

    match &state.user {
        Some(user) => println!("{} Signed in as {} ({})", "✓".green(), user.name.bold(), user.email),
        None => println!("{} Token stored", "✓".green()),
    }
    if let Some(org) = &state.organization {
        println!("{} Organization: {}", "✓".green(), org.name);
    }
    if !state.is_authenticated {
        println!("{} Session not verified (use --verify)", "○".dimmed());
    }

    if let Some(expires) = ctx.session.token_expiry() {
        let remaining = expires.signed_duration_since(chrono::Utc::now());
        if remaining.num_seconds() <= 0 {
            println!("{} Token expired (run 'scanlink refresh' or 'scanlink login')", "⚠".yellow());
        } else {
            println!(
                "{} Token valid (expires in {}h {}m)",
                "✓".green(),
                remaining.num_hours(),
                remaining.num_minutes() % 60
            );
        }
    }

    Ok(())
}
