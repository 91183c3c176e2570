//! Resilient HTTP client for the scan API

pub mod http;
pub mod in_flight;
#[cfg(test)]
pub mod mock;
pub mod retry;
pub mod transport;

pub use http::{HttpClient, RequestConfig, UnauthorizedHandler};
pub use in_flight::{InFlightRegistry, Joined, PendingOperation};
pub use retry::{RetryExecutor, backoff_delay};
pub use transport::{ReqwestTransport, Transport, TransportRequest};
