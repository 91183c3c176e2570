//! Cache key generation for requests

use reqwest::Method;
use serde_json::Value;

/// Build the deterministic key identifying a request for caching and
/// in-flight coalescing: `METHOD:url:serialized-body`.
///
/// Object fields serialize in sorted order, so two bodies with the same
/// content produce the same key regardless of how they were built.
pub fn cache_key(method: &Method, url: &str, body: Option<&Value>) -> String {
    let body = body.map(Value::to_string).unwrap_or_default();
    format!("{}:{}:{}", method.as_str(), url, body)
}
