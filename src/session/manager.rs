//! Session lifecycle: login, signup, verification, refresh and logout
//!
//! State lives in a `watch` channel so callers can observe transitions.
//! Every commit happens synchronously under the control lock, after checking
//! that the operation has not been superseded:
//!
//! - each `verify()` registers a [`CancellationToken`] the moment it is
//!   called; login, signup, logout and refresh cancel it before committing
//! - the epoch counter bumps on every identity change, so a refresh that
//!   started before a login or logout discards its result

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use base64::Engine as _;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::models::{
    AuthResponse, LoginRequest, MeResponse, Organization, RefreshResponse, SessionState,
    SignupRequest, User,
};
use super::store::{
    AUTH_TOKEN_KEY, CURRENT_ORGANIZATION_KEY, CURRENT_USER_KEY, KeyValueStore, SESSION_KEYS,
};
use crate::client::{HttpClient, RequestConfig};
use crate::error::{ApiError, Error, Result};

const MIN_PASSWORD_LEN: usize = 8;

#[derive(Default)]
struct Control {
    verify: Option<CancellationToken>,
    epoch: u64,
}

impl Control {
    fn cancel_verify(&mut self) {
        if let Some(token) = self.verify.take() {
            token.cancel();
        }
    }

    /// Invalidate every operation that started against the current identity
    fn supersede(&mut self) {
        self.cancel_verify();
        self.epoch += 1;
    }
}

struct Inner {
    http: Arc<HttpClient>,
    store: Arc<dyn KeyValueStore>,
    state: watch::Sender<SessionState>,
    control: Mutex<Control>,
}

impl Inner {
    fn control(&self) -> MutexGuard<'_, Control> {
        self.control.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn current_token(&self) -> Option<String> {
        self.state.borrow().token.clone()
    }

    fn persist(&self, state: &SessionState) -> Result<()> {
        let (Some(token), Some(user)) = (&state.token, &state.user) else {
            return Ok(());
        };
        self.store.set_many(&[
            (AUTH_TOKEN_KEY, token.clone()),
            (CURRENT_USER_KEY, serde_json::to_string(user)?),
            (
                CURRENT_ORGANIZATION_KEY,
                serde_json::to_string(&state.organization)?,
            ),
        ])
    }

    /// Invalidate in-flight work and cached responses that belong to the
    /// outgoing identity. Caller holds the control lock.
    fn change_identity(&self, control: &mut Control) {
        control.supersede();
        let dropped = self.http.clear_cache();
        if dropped > 0 {
            debug!("Dropped {} cached responses on session change", dropped);
        }
    }

    /// Clear memory and storage. Caller holds the control lock.
    fn clear(&self, control: &mut Control) -> Option<String> {
        self.change_identity(control);
        if let Err(e) = self.store.remove_many(&SESSION_KEYS) {
            warn!("Could not clear stored session: {}", e);
        }
        self.state.send_replace(SessionState::default()).token
    }

    /// 401 hook: only the session whose token was rejected is logged out
    fn force_logout(&self, rejected: &str) {
        let mut control = self.control();
        if self.current_token().as_deref() != Some(rejected) {
            debug!("Ignoring 401 for a token that is no longer current");
            return;
        }
        warn!("Session token rejected by the server, signing out");
        self.clear(&mut control);
    }
}

/// Owns the authentication state and its persisted mirror.
///
/// Cheap to clone; clones share the same session.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Load any persisted session and hook into the client's 401 handling.
    ///
    /// A persisted token leaves the session loading until [`restore`](Self::restore)
    /// or [`verify`](Self::verify) confirms it.
    pub fn new(http: Arc<HttpClient>, store: Arc<dyn KeyValueStore>) -> Self {
        let initial = read_persisted(store.as_ref());
        let (state, _) = watch::channel(initial);

        let inner = Arc::new(Inner {
            http,
            store,
            state,
            control: Mutex::new(Control::default()),
        });

        let weak: Weak<Inner> = Arc::downgrade(&inner);
        inner.http.set_unauthorized_handler(Arc::new(move |rejected: &str| {
            if let Some(inner) = weak.upgrade() {
                inner.force_logout(rejected);
            }
        }));

        Self { inner }
    }

    /// Snapshot of the current state
    pub fn state(&self) -> SessionState {
        self.inner.state.borrow().clone()
    }

    /// Receiver that observes every state change
    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    pub fn is_authenticated(&self) -> bool {
        self.inner.state.borrow().is_authenticated
    }

    pub fn http(&self) -> &Arc<HttpClient> {
        &self.inner.http
    }

    /// Verify the persisted token, if there is one
    pub async fn restore(&self) -> Result<bool> {
        let has_token = self.inner.current_token().is_some();
        if !has_token {
            return Ok(false);
        }
        self.verify().await
    }

    /// Check the current token against `GET /auth/me`.
    ///
    /// Registration happens when this is called, not when the future is
    /// first polled, so a login issued right after still supersedes it.
    /// Resolves to whether the session is now authenticated by this
    /// verification; a superseded verification resolves to `false` and
    /// changes nothing.
    pub fn verify(&self) -> impl Future<Output = Result<bool>> + Send + 'static {
        let inner = Arc::clone(&self.inner);
        let cancel = CancellationToken::new();

        let token = {
            let mut control = inner.control();
            control.cancel_verify();
            control.verify = Some(cancel.clone());
            let token = inner.current_token();
            if token.is_some() {
                inner.state.send_modify(|s| s.is_loading = true);
            }
            token
        };

        async move {
            let Some(token) = token else {
                return Ok(false);
            };

            let config = RequestConfig::get().bearer(&token).cacheable(false);
            let result = inner.http.request::<MeResponse>("/auth/me", config).await;

            let mut control = inner.control();
            if cancel.is_cancelled() {
                debug!("Session verification superseded, discarding result");
                return Ok(false);
            }
            control.verify = None;

            match result {
                Ok(me) => {
                    let state = SessionState::authenticated(token, me.user, me.organization);
                    if let Err(e) = inner.persist(&state) {
                        warn!("Could not persist session: {}", e);
                    }
                    inner.state.send_replace(state);
                    Ok(true)
                }
                Err(e) => {
                    debug!("Session verification failed: {}", e);
                    inner.clear(&mut control);
                    Ok(false)
                }
            }
        }
    }

    /// Sign in with email and password
    pub async fn login(&self, email: &str, password: &str) -> Result<SessionState> {
        let email = email.trim();
        if email.is_empty() || password.is_empty() {
            return Err(Error::Validation(
                "Email and password are required".to_string(),
            ));
        }

        self.begin_authentication();
        let config = RequestConfig::post()
            .json(&LoginRequest { email, password })?
            .anonymous();
        let result = self.inner.http.request::<AuthResponse>("/auth/login", config).await;
        self.finish_authentication(result)
    }

    /// Create an account and sign in
    pub async fn signup(&self, request: SignupRequest) -> Result<SessionState> {
        validate_signup(&request)?;

        self.begin_authentication();
        let config = RequestConfig::post().json(&request)?.anonymous();
        let result = self.inner.http.request::<AuthResponse>("/auth/signup", config).await;
        self.finish_authentication(result)
    }

    /// Sign out locally, then tell the server (best effort)
    pub async fn logout(&self) {
        let token = {
            let mut control = self.inner.control();
            self.inner.clear(&mut control)
        };

        let Some(token) = token else {
            return;
        };
        let config = RequestConfig::post().bearer(&token).max_retries(0);
        if let Err(e) = self.inner.http.request::<Value>("/auth/logout", config).await {
            warn!("Server-side logout failed: {}", e);
        }
    }

    /// Exchange the current token for a fresh one.
    ///
    /// Only the token changes. A failure signs the session out, unless the
    /// session changed while the refresh was outstanding.
    pub async fn refresh_token(&self) -> Result<String> {
        let (token, epoch) = {
            let control = self.inner.control();
            (self.inner.current_token(), control.epoch)
        };
        let token = token.ok_or_else(|| Error::Authentication("Not signed in".to_string()))?;

        let config = RequestConfig::post().bearer(&token).cacheable(false);
        let result = self
            .inner
            .http
            .request::<RefreshResponse>("/auth/refresh", config)
            .await;

        let mut control = self.inner.control();
        let current = control.epoch == epoch;
        match result {
            Ok(refreshed) if current => {
                self.inner
                    .store
                    .set_many(&[(AUTH_TOKEN_KEY, refreshed.token.clone())])?;
                control.supersede();
                self.inner
                    .state
                    .send_modify(|s| s.token = Some(refreshed.token.clone()));
                Ok(refreshed.token)
            }
            Ok(_) => Err(Error::Authentication(
                "Session changed while refreshing the token".to_string(),
            )),
            Err(e) => {
                if current {
                    warn!("Token refresh failed, signing out: {}", e);
                    self.inner.clear(&mut control);
                }
                Err(e)
            }
        }
    }

    /// Expiry of the current token, read from its JWT `exp` claim
    pub fn token_expiry(&self) -> Option<DateTime<Utc>> {
        self.inner.current_token().as_deref().and_then(jwt_expiry)
    }

    fn begin_authentication(&self) {
        let mut control = self.inner.control();
        control.cancel_verify();
        self.inner.state.send_modify(|s| s.is_loading = true);
    }

    fn finish_authentication(&self, result: Result<AuthResponse>) -> Result<SessionState> {
        let mut control = self.inner.control();
        let auth = match result {
            Ok(auth) => auth,
            Err(e) => {
                self.inner.state.send_modify(|s| s.is_loading = false);
                return Err(authentication_error(e));
            }
        };

        let state = SessionState::authenticated(auth.token, auth.user, auth.organization);
        if let Err(e) = self.inner.persist(&state) {
            self.inner.state.send_modify(|s| s.is_loading = false);
            return Err(e);
        }
        self.inner.change_identity(&mut control);
        self.inner.state.send_replace(state.clone());
        Ok(state)
    }
}

fn read_persisted(store: &dyn KeyValueStore) -> SessionState {
    let read = |key: &str| match store.get(key) {
        Ok(value) => value,
        Err(e) => {
            warn!("Could not read stored session: {}", e);
            None
        }
    };

    let Some(token) = read(AUTH_TOKEN_KEY) else {
        return SessionState::default();
    };
    let user = read(CURRENT_USER_KEY).and_then(|raw| {
        serde_json::from_str::<User>(&raw)
            .map_err(|e| warn!("Ignoring unreadable stored user: {}", e))
            .ok()
    });
    let organization = read(CURRENT_ORGANIZATION_KEY).and_then(|raw| {
        serde_json::from_str::<Option<Organization>>(&raw)
            .map_err(|e| warn!("Ignoring unreadable stored organization: {}", e))
            .ok()
            .flatten()
    });

    SessionState {
        token: Some(token),
        user,
        organization,
        is_authenticated: false,
        is_loading: true,
    }
}

fn validate_signup(request: &SignupRequest) -> Result<()> {
    if request.name.trim().is_empty() {
        return Err(Error::Validation("Name is required".to_string()));
    }
    if !request.email.contains('@') {
        return Err(Error::Validation("A valid email is required".to_string()));
    }
    if request.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(Error::Validation(format!(
            "Password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    Ok(())
}

/// Rejected credentials carry the server's message
fn authentication_error(err: Error) -> Error {
    match err {
        Error::Api(ApiError::Status { status, message }) if status == 401 || status == 403 => {
            Error::Authentication(message)
        }
        other => other,
    }
}

/// Decode the `exp` claim of a JWT without verifying it
pub fn jwt_expiry(token: &str) -> Option<DateTime<Utc>> {
    #[derive(Deserialize)]
    struct Claims {
        exp: Option<i64>,
    }

    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    let claims: Claims = serde_json::from_slice(&bytes).ok()?;
    DateTime::from_timestamp(claims.exp?, 0)
}
