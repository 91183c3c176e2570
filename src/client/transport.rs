//! Transport seam between the request pipeline and the network
//!
//! `HttpClient` hands each attempt to a [`Transport`]; the production
//! implementation is backed by reqwest, tests substitute a scripted mock.

use async_trait::async_trait;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use serde_json::Value;

use crate::error::ApiError;

/// A fully resolved request: absolute URL, final headers, JSON body.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Value>,
}

impl TransportRequest {
    /// Bearer token carried in the Authorization header, if any
    pub fn bearer_token(&self) -> Option<&str> {
        self.headers
            .get(reqwest::header::AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
    }
}

/// Performs a single HTTP attempt.
///
/// Implementations return the decoded JSON body for 2xx responses and an
/// [`ApiError`] otherwise. Timeouts and retries are the caller's concern.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &TransportRequest) -> Result<Value, ApiError>;
}

/// reqwest-backed transport
pub struct ReqwestTransport {
    http: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .user_agent(concat!("scanlink/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| ApiError::Network(e.to_string()))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &TransportRequest) -> Result<Value, ApiError> {
        let mut builder = self
            .http
            .request(request.method.clone(), &request.url)
            .headers(request.headers.clone());
        if let Some(ref body) = request.body {
            builder = builder.json(body);
        }

        let response = builder.send().await.map_err(ApiError::from)?;
        let status = response.status();
        let bytes = response.bytes().await.map_err(ApiError::from)?;

        if status.is_success() {
            if bytes.iter().all(u8::is_ascii_whitespace) {
                return Ok(Value::Null);
            }
            return serde_json::from_slice(&bytes).map_err(|e| {
                ApiError::InvalidResponse(format!("Failed to parse response: {}", e))
            });
        }

        let body = String::from_utf8_lossy(&bytes);
        Err(ApiError::Status {
            status: status.as_u16(),
            message: error_message(status, &body),
        })
    }
}

/// Extract a human-readable message from an error response body.
///
/// Prefers the `message`, `error` or `detail` field of a JSON body, then the
/// raw body text, then the status reason phrase.
pub fn error_message(status: StatusCode, body: &str) -> String {
    let from_json = serde_json::from_str::<Value>(body).ok().and_then(|v| {
        ["message", "error", "detail"]
            .iter()
            .find_map(|field| v.get(field).and_then(Value::as_str).map(str::to_string))
    });
    if let Some(message) = from_json {
        return message;
    }

    let trimmed = body.trim();
    if !trimmed.is_empty() && !trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    status
        .canonical_reason()
        .unwrap_or("Request failed")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::{AUTHORIZATION, HeaderValue};
    use serde_json::json;

    #[test]
    fn test_error_message_json_fields() {
        assert_eq!(
            error_message(StatusCode::UNAUTHORIZED, r#"{"message":"Invalid credentials"}"#),
            "Invalid credentials"
        );
        assert_eq!(
            error_message(StatusCode::BAD_REQUEST, r#"{"error":"Email already registered"}"#),
            "Email already registered"
        );
        assert_eq!(
            error_message(StatusCode::UNPROCESSABLE_ENTITY, r#"{"detail":"bad plan"}"#),
            "bad plan"
        );
    }

    #[test]
    fn test_error_message_plain_text() {
        assert_eq!(
            error_message(StatusCode::BAD_GATEWAY, "upstream unavailable\n"),
            "upstream unavailable"
        );
    }

    #[test]
    fn test_error_message_falls_back_to_reason() {
        assert_eq!(error_message(StatusCode::NOT_FOUND, ""), "Not Found");
        assert_eq!(
            error_message(StatusCode::INTERNAL_SERVER_ERROR, r#"{"code":17}"#),
            "Internal Server Error"
        );
    }

    #[test]
    fn test_bearer_token() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer abc.def"));
        let request = TransportRequest {
            method: Method::GET,
            url: "http://x/api/projects".to_string(),
            headers,
            body: None,
        };
        assert_eq!(request.bearer_token(), Some("abc.def"));
    }

    #[tokio::test]
    #[cfg_attr(not(feature = "http-tests"), ignore)]
    async fn test_reqwest_transport_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/api/scans")
            .match_header("authorization", "Bearer t0k")
            .match_body(mockito::Matcher::Json(json!({"projectId": "p1"})))
            .with_status(201)
            .with_header("content-type", "application/json")
            .with_body(r#"{"id":"scan-1"}"#)
            .create_async()
            .await;

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer t0k"));
        let request = TransportRequest {
            method: Method::POST,
            url: format!("{}/api/scans", server.url()),
            headers,
            body: Some(json!({"projectId": "p1"})),
        };

        let transport = ReqwestTransport::new().unwrap();
        let value = transport.send(&request).await.unwrap();
        assert_eq!(value, json!({"id": "scan-1"}));
        mock.assert_async().await;
    }

    #[tokio::test]
    #[cfg_attr(not(feature = "http-tests"), ignore)]
    async fn test_reqwest_transport_status_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("GET", "/api/projects/missing")
            .with_status(404)
            .with_body(r#"{"message":"Project not found"}"#)
            .create_async()
            .await;

        let request = TransportRequest {
            method: Method::GET,
            url: format!("{}/api/projects/missing", server.url()),
            headers: HeaderMap::new(),
            body: None,
        };

        let err = ReqwestTransport::new()
            .unwrap()
            .send(&request)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ApiError::Status {
                status: 404,
                message: "Project not found".to_string()
            }
        );
    }

    #[tokio::test]
    #[cfg_attr(not(feature = "http-tests"), ignore)]
    async fn test_reqwest_transport_empty_and_invalid_bodies() {
        let mut server = mockito::Server::new_async().await;
        let _empty = server
            .mock("DELETE", "/api/projects/1")
            .with_status(204)
            .create_async()
            .await;
        let _garbage = server
            .mock("GET", "/api/projects")
            .with_status(200)
            .with_body("<html>")
            .create_async()
            .await;

        let transport = ReqwestTransport::new().unwrap();
        let delete = TransportRequest {
            method: Method::DELETE,
            url: format!("{}/api/projects/1", server.url()),
            headers: HeaderMap::new(),
            body: None,
        };
        assert_eq!(transport.send(&delete).await.unwrap(), Value::Null);

        let get = TransportRequest {
            method: Method::GET,
            url: format!("{}/api/projects", server.url()),
            headers: HeaderMap::new(),
            body: None,
        };
        assert!(matches!(
            transport.send(&get).await,
            Err(ApiError::InvalidResponse(_))
        ));
    }

    #[tokio::test]
    async fn test_reqwest_transport_connection_refused() {
        let request = TransportRequest {
            method: Method::GET,
            url: "http://127.0.0.1:9/api/projects".to_string(),
            headers: HeaderMap::new(),
            body: None,
        };
        let err = ReqwestTransport::new()
            .unwrap()
            .send(&request)
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Network(_)));
    }
}
