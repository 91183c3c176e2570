//! scanlink CLI - resilient client for the security scanning platform

use clap::Parser;
use log::LevelFilter;

use scanlink::Result;
use scanlink::cli::{self, Cli, Commands, GlobalOptions};
use scanlink::config::Config;

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let opts = GlobalOptions::from_cli(&cli);
    init_logging(&opts);

    match cli.command {
        Commands::Login { email, password } => cli::auth::login(&opts, email, password).await,
        Commands::Signup {
            name,
            email,
            organization,
        } => cli::auth::signup(&opts, name, email, organization).await,
        Commands::Logout => cli::auth::logout(&opts).await,
        Commands::Status { verify } => cli::status::run(&opts, verify).await,
        Commands::Refresh => cli::auth::refresh(&opts).await,
        Commands::Get { path, ttl_ms } => cli::get::run(&opts, &path, ttl_ms).await,
        Commands::Watch { max_attempts, scan } => cli::watch::run(&opts, max_attempts, scan).await,
        Commands::Version => {
            println!("scanlink version {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}

/// Debug level when `--debug` or the config asks for it, warnings otherwise.
/// `RUST_LOG` still takes precedence.
fn init_logging(opts: &GlobalOptions) {
    let debug = opts.debug
        || Config::load_at(opts.config_ref())
            .map(|config| config.debug)
            .unwrap_or(false);
    let level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };

    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .format_timestamp(None)
        .init();
}
