//! Sizing and partitioning of the identifier domain into work ranges.
//!
//! Everything here runs before any batch is persisted: the planner walks the
//! domain with a proportional-correction search (`estimator`), measuring
//! candidate ranges through a cost oracle that keeps every query against the
//! backing store bounded (`oracle`), or cutting directly from a cached
//! density table when one is available (`density`).

mod density;
mod estimator;
mod oracle;
mod planner;
#[cfg(test)]
mod test_support;

use thiserror::Error;

pub use density::{DensityMarker, DensityTable};
pub use estimator::{EstimatorConfig, RangeEstimator};
pub use oracle::{CostOracle, StoreQueries};
pub use planner::{PartitionPlanner, PlannerConfig};

/// Error type for range planning and cost measurement.
#[derive(Debug, Error)]
pub enum PlanError {
    #[error("store query failed: {0}")]
    Query(String),
    #[error("invalid planning input: {0}")]
    InvalidInput(String),
    #[error("density table is unusable: {0}")]
    BadDensityTable(String),
    #[error("density table i/o failed: {0}")]
    Io(#[from] std::io::Error),
}
