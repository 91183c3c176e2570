//! CLI command definitions and handlers

use clap::{Parser, Subcommand};

pub mod args;
pub mod auth;
pub mod context;
pub mod get;
pub mod status;
pub mod watch;

pub use args::GlobalOptions;
pub use context::CommandContext;

/// scanlink - resilient client for the security scanning platform
#[derive(Parser, Debug)]
#[command(name = "scanlink")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Commands,

    /// Override config file location
    #[arg(long, global = true, env = "SCANLINK_CONFIG", hide_env = true)]
    pub config: Option<String>,

    /// Override the API base URL
    #[arg(long, global = true)]
    pub api_url: Option<String>,

    /// Enable debug logging
    #[arg(long, global = true, env = "SCANLINK_DEBUG", hide_env = true)]
    pub debug: bool,

    /// Bypass the response cache
    #[arg(long, global = true, env = "SCANLINK_NO_CACHE", hide_env = true)]
    pub no_cache: bool,
}

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sign in with email and password
    Login {
        /// Account email (prompted when omitted)
        #[arg(long)]
        email: Option<String>,

        /// Account password (prompted when omitted)
        #[arg(long, env = "SCANLINK_PASSWORD", hide_env = true, hide = true)]
        password: Option<String>,
    },

    /// Create an account and sign in
    Signup {
        /// Display name
        #[arg(long)]
        name: Option<String>,

        /// Account email
        #[arg(long)]
        email: Option<String>,

        /// Organization to create
        #[arg(long)]
        organization: Option<String>,
    },

    /// Sign out and clear the stored session
    Logout,

    /// Show configuration and session status
    Status {
        /// Check the stored token against the API
        #[arg(long)]
        verify: bool,
    },

    /// Exchange the session token for a fresh one
    Refresh,

    /// Fetch an API path and print the JSON response
    Get {
        /// Path relative to the API base URL (e.g. /projects)
        path: String,

        /// Cache lifetime for this response in milliseconds
        #[arg(long)]
        ttl_ms: Option<u64>,
    },

    /// Stream live scan events
    Watch {
        /// Reconnect attempts before giving up
        #[arg(long)]
        max_attempts: Option<u32>,

        /// Only show events for this scan
        #[arg(long)]
        scan: Option<String>,
    },

    /// Display version information
    Version,
}
