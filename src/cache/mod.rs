//! Response cache for cacheable GET requests
//!
//! Entries live in memory with a per-entry TTL; a background sweep bounds
//! memory by evicting entries that expired without being read again.

pub mod key;
pub mod store;

// Re-export main types
pub use key::cache_key;
pub use store::{CacheEntry, CacheStats, CacheStore};
