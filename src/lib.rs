//! scanlink: resilient API, live-event and session client for the scan
//! platform.
//!
//! - [`client::HttpClient`]: cached, coalesced, retried JSON requests
//! - [`socket::SocketReconnector`]: live scan events with capped backoff
//! - [`session::SessionManager`]: race-safe login, verification and logout

pub mod cache;
pub mod cli;
pub mod client;
pub mod config;
pub mod error;
pub mod session;
pub mod socket;

pub use error::{ApiError, Error, Result};
