//! Command execution context
//!
//! Builds the configuration, persisted session store, HTTP client and
//! session manager every command shares.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cli::args::GlobalOptions;
use crate::client::HttpClient;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::session::{FileStore, KeyValueStore, SessionManager, SessionState};

const SESSION_FILE: &str = "session.yaml";

/// Context for command execution.
pub struct CommandContext {
    /// Loaded configuration with CLI overrides applied
    pub config: Config,
    /// Where the configuration was loaded from (may not exist)
    pub config_path: PathBuf,
    /// Where the session is persisted
    pub session_path: PathBuf,
    pub http: Arc<HttpClient>,
    pub session: SessionManager,
}

impl CommandContext {
    /// Create a context without touching the network.
    ///
    /// # Errors
    /// Returns error if the config file is unreadable or an override is invalid.
    pub fn new(opts: &GlobalOptions) -> Result<Self> {
        let mut config = Config::load_at(opts.config_ref())?;
        if let Some(url) = &opts.api_url {
            config.api_url = url.clone();
            config.validate()?;
        }
        if opts.debug {
            config.debug = true;
        }

        let config_path = Config::resolve_path(opts.config_ref())?;
        let session_path = session_path_for(&config_path);
        let store: Arc<dyn KeyValueStore> = Arc::new(FileStore::new(&session_path));

        let mut http = HttpClient::from_config(&config, Arc::clone(&store))?;
        if opts.no_cache {
            http = http.without_cache();
        }
        let http = Arc::new(http);
        let session = SessionManager::new(Arc::clone(&http), store);

        Ok(Self {
            config,
            config_path,
            session_path,
            http,
            session,
        })
    }

    /// Verify the stored session, failing when there is none or it was rejected
    pub async fn require_session(&self) -> Result<SessionState> {
        if !self.session.restore().await? {
            return Err(Error::Authentication(
                "Not signed in. Run 'scanlink login' first.".to_string(),
            ));
        }
        Ok(self.session.state())
    }
}

/// The session file lives next to the config file
fn session_path_for(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(dir) => dir.join(SESSION_FILE),
        None => PathBuf::from(SESSION_FILE),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_session_path_next_to_config() {
        assert_eq!(
            session_path_for(Path::new("/home/ada/.scanlink/config.yaml")),
            PathBuf::from("/home/ada/.scanlink/session.yaml")
        );
        assert_eq!(session_path_for(Path::new("config.yaml")), PathBuf::from("session.yaml"));
    }

    #[tokio::test]
    async fn test_context_applies_overrides() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config.yaml");
        let opts = GlobalOptions {
            config: Some(config_path.to_string_lossy().to_string()),
            api_url: Some("https://scan.example.com/api".to_string()),
            debug: true,
            no_cache: true,
        };

        let ctx = CommandContext::new(&opts).unwrap();
        assert_eq!(ctx.config.api_url, "https://scan.example.com/api");
        assert!(ctx.config.debug);
        assert_eq!(ctx.session_path, dir.path().join("session.yaml"));
        assert!(!ctx.session.is_authenticated());
    }

    #[tokio::test]
    async fn test_invalid_api_url_override_rejected() {
        let dir = TempDir::new().unwrap();
        let opts = GlobalOptions {
            config: Some(dir.path().join("config.yaml").to_string_lossy().to_string()),
            api_url: Some("ftp://nope".to_string()),
            ..GlobalOptions::default()
        };

        assert!(matches!(CommandContext::new(&opts), Err(Error::Config(_))));
    }

    #[tokio::test]
    async fn test_require_session_without_token() {
        let dir = TempDir::new().unwrap();
        let opts = GlobalOptions {
            config: Some(dir.path().join("config.yaml").to_string_lossy().to_string()),
            ..GlobalOptions::default()
        };

        let ctx = CommandContext::new(&opts).unwrap();
        assert!(matches!(ctx.require_session().await, Err(Error::Authentication(_))));
    }
}
