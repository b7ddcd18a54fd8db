//! # campus-cache
//!
//! Per-site cache of remote web service responses.
//!
//! Entries live in the `wscache` table of each site database and are keyed
//! by a hash of the call (method plus normalized parameters). Each entry
//! also carries an optional cache key used for bulk invalidation and an
//! optional component tag.
//!
//! Expiration is decided lazily at read time, which yields a three-way
//! [`CacheLookup`]. A [`ReadingStrategy`](campus_types::ReadingStrategy)
//! then decides how that lookup combines with a network fetch.

pub mod key;
pub mod policy;
pub mod store;
pub mod strategy;

pub use key::{build_cache_key, cache_id};
pub use policy::CachePolicy;
pub use store::{CacheEntry, CacheLookup, WriteOptions};
pub use strategy::{resolve, CacheFallback, Resolved, Source};

use campus_db::DbError;

/// Cache error types.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Cache-only read of an entry that was never stored.
    #[error("no cached response available")]
    NotCached,

    #[error("cache storage error: {0}")]
    Db(#[from] DbError),

    #[error("cache serialization error: {0}")]
    Serialization(String),
}

impl From<rusqlite::Error> for CacheError {
    fn from(err: rusqlite::Error) -> Self {
        CacheError::Db(DbError::from(err))
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        CacheError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, CacheError>;
