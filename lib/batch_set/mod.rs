//! Durable claim-lease state for batched dump work.
//!
//! Why the backing file is both the lock and the database:
//! - Workers share nothing but a filesystem, so the batch file itself is the
//!   only mutual-exclusion point available.
//! - Every mutation goes through one transaction function (`ops`), so the
//!   lock/read/backup/mutate/rewrite protocol has exactly one implementation
//!   to get right and test.
//!
//! Why liveness lives elsewhere:
//! - Heartbeat ticks would otherwise serialize all workers against each other
//!   purely for pings; see `crate::heartbeat` for the side-channel markers.

mod ops;
mod store;
mod types;

pub use ops::BatchSet;
pub use types::{BatchEntry, BatchSetError, BatchStatus, LockPolicy, Owner};
