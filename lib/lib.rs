//! Range partitioning and claim-lease coordination for very large,
//! long-running export runs.
//!
//! The crate splits an ordered identifier space into work ranges sized for
//! roughly equal wall-clock time (`range_planner`), coalesces them into
//! claimable batches (`grouper`), and persists them as a lock-protected state
//! machine that independent worker processes, on any host sharing the
//! filesystem, claim, complete, fail, and recycle exactly once at a time
//! (`batch_set`). Liveness of in-flight claims is signalled through
//! side-channel marker files (`heartbeat`) so an external monitor can recycle
//! work whose owner died without a terminal transition.
//!
//! Mutual exclusion is advisory and filesystem-scoped: adequate for a small
//! fleet of trusted cooperating workers, not a consensus protocol.

pub mod batch_set;
pub mod grouper;
pub mod heartbeat;
pub mod range;
pub mod range_planner;

pub use batch_set::{BatchEntry, BatchSet, BatchSetError, BatchStatus, LockPolicy, Owner};
pub use grouper::group_ranges;
pub use heartbeat::{list_markers, sweep_stale, HeartbeatMarker};
pub use range::Range;
pub use range_planner::{
    CostOracle, DensityMarker, DensityTable, EstimatorConfig, PartitionPlanner, PlanError,
    PlannerConfig, RangeEstimator, StoreQueries,
};
