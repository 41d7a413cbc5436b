//! upwatch-state: embedded state store for upwatch.
//!
//! Backed by [redb](https://docs.rs/redb), holds the monitored targets with
//! their last confirmed online flag, the append-only transition history, and
//! the settings the monitor reads each cycle.
//!
//! # Architecture
//!
//! All records are JSON-serialized into redb's `&[u8]` value columns.
//! History keys are `{target_id}:{at:020}:{seq:04}` so a prefix scan yields
//! a target's transitions in chronological order.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks. It holds redb's file lock while
//! alive; long-running processes use [`StoreFile`] to hold it per unit of
//! work only.

pub mod error;
pub mod file;
pub mod store;
pub mod tables;
pub mod types;
pub mod uptime;

pub use error::{StateError, StateResult};
pub use file::{StoreFile, DEFAULT_LOCK_WAIT};
pub use store::StateStore;
pub use types::*;
pub use uptime::{BucketStatus, UptimeBucket, UptimeSpan, UptimeSummary};
