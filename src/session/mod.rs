//! Authentication session management

pub mod manager;
pub mod models;
pub mod store;

pub use manager::{SessionManager, jwt_expiry};
pub use models::{Organization, SessionState, SignupRequest, User};
pub use store::{FileStore, KeyValueStore, MemoryStore};
