//! Resilient JSON API client
//!
//! Every request flows through the same pipeline:
//!
//! 1. Cacheable GETs are answered from [`CacheStore`] while fresh.
//! 2. Identical concurrent requests are coalesced by [`InFlightRegistry`]
//!    into one operation whose outcome every caller shares.
//! 3. The operation runs on its own task under a [`RetryExecutor`]
//!    (per-attempt timeout, exponential backoff, no retry on 4xx).
//! 4. Successful cacheable GETs populate the cache before the in-flight
//!    entry is released.

use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::{debug, warn};
use reqwest::Method;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::task::JoinHandle;

use super::in_flight::InFlightRegistry;
use super::retry::RetryExecutor;
use super::transport::{ReqwestTransport, Transport, TransportRequest};
use crate::cache::{CacheStats, CacheStore, cache_key};
use crate::config::Config;
use crate::error::{ApiError, Error, Result};
use crate::session::store::{AUTH_TOKEN_KEY, KeyValueStore};

/// Invoked with the rejected bearer token when an authenticated request
/// comes back 401
pub type UnauthorizedHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Per-call request options.
///
/// Unset options fall back to the client defaults from [`Config`].
#[derive(Debug, Clone, Default)]
pub struct RequestConfig {
    pub method: Method,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    pub timeout: Option<Duration>,
    pub max_retries: Option<u32>,
    pub retry_base_delay: Option<Duration>,
    /// Defaults to true for GET; ignored for every other method
    pub cacheable: Option<bool>,
    pub cache_ttl: Option<Duration>,
    /// Skip bearer token injection
    pub anonymous: bool,
}

impl RequestConfig {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    pub fn get() -> Self {
        Self::new(Method::GET)
    }

    pub fn post() -> Self {
        Self::new(Method::POST)
    }

    pub fn put() -> Self {
        Self::new(Method::PUT)
    }

    pub fn patch() -> Self {
        Self::new(Method::PATCH)
    }

    pub fn delete() -> Self {
        Self::new(Method::DELETE)
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Send an explicit bearer token instead of the stored one
    pub fn bearer(self, token: &str) -> Self {
        self.header(AUTHORIZATION.as_str(), format!("Bearer {}", token))
    }

    pub fn body(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Serialize `body` as the JSON payload
    pub fn json<B: Serialize + ?Sized>(self, body: &B) -> Result<Self> {
        Ok(self.body(serde_json::to_value(body)?))
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = Some(delay);
        self
    }

    pub fn cacheable(mut self, cacheable: bool) -> Self {
        self.cacheable = Some(cacheable);
        self
    }

    pub fn cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = Some(ttl);
        self
    }

    pub fn anonymous(mut self) -> Self {
        self.anonymous = true;
        self
    }

    /// Only GET responses are ever read from or written to the cache
    pub fn is_cacheable(&self) -> bool {
        self.method == Method::GET && self.cacheable.unwrap_or(true)
    }
}

/// Client-wide defaults applied to every request
#[derive(Debug, Clone, Copy)]
struct Defaults {
    timeout: Duration,
    max_retries: u32,
    retry_base_delay: Duration,
    cache_ttl: Duration,
}

/// JSON API client with caching, request coalescing and retries
pub struct HttpClient {
    base_url: String,
    defaults: Defaults,
    cache_enabled: bool,
    transport: Arc<dyn Transport>,
    cache: Arc<CacheStore<Value>>,
    in_flight: Arc<InFlightRegistry<std::result::Result<Value, ApiError>>>,
    store: Arc<dyn KeyValueStore>,
    unauthorized: Arc<Mutex<Option<UnauthorizedHandler>>>,
}

impl HttpClient {
    /// Create a client over an arbitrary transport
    pub fn new(config: &Config, transport: Arc<dyn Transport>, store: Arc<dyn KeyValueStore>) -> Self {
        Self {
            base_url: config.api_url.trim_end_matches('/').to_string(),
            defaults: Defaults {
                timeout: config.timeout(),
                max_retries: config.max_retries,
                retry_base_delay: config.retry_base_delay(),
                cache_ttl: config.cache_ttl(),
            },
            cache_enabled: true,
            transport,
            cache: Arc::new(CacheStore::new()),
            in_flight: Arc::new(InFlightRegistry::new()),
            store,
            unauthorized: Arc::new(Mutex::new(None)),
        }
    }

    /// Create a client backed by reqwest
    pub fn from_config(config: &Config, store: Arc<dyn KeyValueStore>) -> Result<Self> {
        let transport = ReqwestTransport::new()?;
        Ok(Self::new(config, Arc::new(transport), store))
    }

    /// Disable the response cache (for `--no-cache`)
    pub fn without_cache(mut self) -> Self {
        self.cache_enabled = false;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Register the handler for 401 responses to authenticated requests
    pub fn set_unauthorized_handler(&self, handler: UnauthorizedHandler) {
        *self
            .unauthorized
            .lock()
            .unwrap_or_else(|e| e.into_inner()) = Some(handler);
    }

    /// Start the periodic sweep of expired cache entries
    pub fn start_cache_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        self.cache.spawn_sweeper(interval)
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(path, RequestConfig::get()).await
    }

    /// GET with per-call options; the method in `config` is ignored
    pub async fn get_with<T: DeserializeOwned>(&self, path: &str, config: RequestConfig) -> Result<T> {
        let config = RequestConfig {
            method: Method::GET,
            ..config
        };
        self.request(path, config).await
    }

    pub async fn post<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(path, RequestConfig::post().json(body)?).await
    }

    pub async fn put<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(path, RequestConfig::put().json(body)?).await
    }

    pub async fn patch<T, B>(&self, path: &str, body: &B) -> Result<T>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        self.request(path, RequestConfig::patch().json(body)?).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        self.request(path, RequestConfig::delete()).await
    }

    /// Perform a request and decode the JSON response into `T`
    pub async fn request<T: DeserializeOwned>(&self, path: &str, config: RequestConfig) -> Result<T> {
        let value = self.request_value(path, config).await?;
        serde_json::from_value(value).map_err(|e| {
            ApiError::InvalidResponse(format!("Failed to parse response: {}", e)).into()
        })
    }

    /// Perform a request and return the raw JSON response
    pub async fn request_value(&self, path: &str, config: RequestConfig) -> Result<Value> {
        let url = self.url_for(path);
        let key = cache_key(&config.method, &url, config.body.as_ref());
        let cacheable = self.cache_enabled && config.is_cacheable();

        if cacheable && let Some(hit) = self.cache.get(&key) {
            debug!("Cache hit: {}", key);
            return Ok(hit);
        }

        let request = TransportRequest {
            method: config.method.clone(),
            url,
            headers: self.build_headers(&config)?,
            body: config.body.clone(),
        };
        // Requests sent with different credentials never share an outcome
        let flight_key = match request.headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
            Some(authorization) => format!("{}\n{}", key, authorization),
            None => key.clone(),
        };
        let executor = RetryExecutor::new(
            config.timeout.unwrap_or(self.defaults.timeout),
            config.max_retries.unwrap_or(self.defaults.max_retries),
            config.retry_base_delay.unwrap_or(self.defaults.retry_base_delay),
        );
        let ttl = config.cache_ttl.unwrap_or(self.defaults.cache_ttl);

        let transport = Arc::clone(&self.transport);
        let cache = Arc::clone(&self.cache);
        let unauthorized = Arc::clone(&self.unauthorized);
        let generation = cache.generation();

        let joined = self.in_flight.join_or_start(&flight_key, move || async move {
            let result = {
                let transport = &transport;
                let request = &request;
                executor.run(move |_| transport.send(request)).await
            };

            match &result {
                Ok(value) if cacheable => {
                    if !cache.set_in_generation(generation, key, value.clone(), ttl) {
                        debug!("Cache cleared while request was in flight, not storing");
                    }
                }
                Err(err) if err.is_unauthorized() => {
                    if let Some(token) = request.bearer_token() {
                        notify_unauthorized(&unauthorized, token);
                    }
                }
                _ => {}
            }
            result
        });

        if joined.started {
            debug!("{} {}", config.method, path);
            // Drive the operation to completion even if every caller goes away
            tokio::spawn(joined.operation.clone());
        } else {
            debug!("Joining in-flight request: {} {}", config.method, path);
        }

        Ok(joined.operation.await?)
    }

    /// Drop the cached GET response for `path`
    pub fn invalidate(&self, path: &str) -> bool {
        let key = cache_key(&Method::GET, &self.url_for(path), None);
        self.cache.invalidate(&key)
    }

    /// Drop every cached GET response under `path` (e.g. `/projects`)
    pub fn invalidate_prefix(&self, path: &str) -> usize {
        let prefix = format!("{}:{}", Method::GET, self.url_for(path));
        self.cache.invalidate_prefix(&prefix)
    }

    pub fn clear_cache(&self) -> usize {
        self.cache.clear()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Number of operations currently in flight
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    fn url_for(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        if path.starts_with('/') {
            format!("{}{}", self.base_url, path)
        } else {
            format!("{}/{}", self.base_url, path)
        }
    }

    fn build_headers(&self, config: &RequestConfig) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

        for (name, value) in &config.headers {
            let name = HeaderName::from_str(name)
                .map_err(|e| Error::Validation(format!("Invalid header name {}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| Error::Validation(format!("Invalid value for header {}: {}", name, e)))?;
            headers.insert(name, value);
        }

        if !config.anonymous && !headers.contains_key(AUTHORIZATION) {
            match self.store.get(AUTH_TOKEN_KEY) {
                Ok(Some(token)) => {
                    let value = HeaderValue::from_str(&format!("Bearer {}", token))
                        .map_err(|_| Error::Validation("Stored token is not a valid header value".to_string()))?;
                    headers.insert(AUTHORIZATION, value);
                }
                Ok(None) => {}
                Err(e) => warn!("Could not read stored token: {}", e),
            }
        }

        Ok(headers)
    }
}

fn notify_unauthorized(handler: &Mutex<Option<UnauthorizedHandler>>, token: &str) {
    // Clone out so the handler runs without the lock held
    let handler = handler.lock().unwrap_or_else(|e| e.into_inner()).clone();
    if let Some(handler) = handler {
        handler(token);
    }
}
