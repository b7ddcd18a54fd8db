//! # campus-sync
//!
//! Coordination for background synchronization jobs.
//!
//! - [`SyncCoordinator`]: advisory per-entity blocks so two jobs do not
//!   sync the same record at once.
//! - [`records`]: the per-site `sync` table recording when each entity was
//!   last synchronized and which warnings the last run produced.

pub mod blocks;
pub mod records;

pub use blocks::{SyncCoordinator, DEFAULT_OPERATION};
pub use records::SyncRecord;
