//! Synthetic backing store for planner tests.

use std::cell::Cell;

use super::oracle::StoreQueries;
use super::PlanError;

/// In-memory store with a known per-identifier unit count, so tests can use
/// a perfect (or deliberately skewed) oracle and count how many queries the
/// planning layer issues.
pub(crate) struct FixtureStore {
    /// `units_per_id[i]` is the sub-unit count of identifier `i + 1`.
    units_per_id: Vec<u64>,
    bytes_per_unit: u64,
    /// Multiplier applied to estimates, to simulate optimistic or
    /// conservative cardinality estimates. 1.0 means a perfect estimator.
    estimate_factor: f64,
    queries: Cell<u64>,
}

impl FixtureStore {
    pub(crate) fn uniform(domain_end: i64, units_per_id: u64, bytes_per_unit: u64) -> Self {
        Self::from_units(vec![units_per_id; domain_end as usize], bytes_per_unit)
    }

    pub(crate) fn from_units(units_per_id: Vec<u64>, bytes_per_unit: u64) -> Self {
        Self {
            units_per_id,
            bytes_per_unit,
            estimate_factor: 1.0,
            queries: Cell::new(0),
        }
    }

    pub(crate) fn with_estimate_factor(mut self, factor: f64) -> Self {
        self.estimate_factor = factor;
        self
    }

    pub(crate) fn query_count(&self) -> u64 {
        self.queries.get()
    }

    fn sum_units(&self, start: i64, end: i64) -> Result<u64, PlanError> {
        if start < 1 || end > self.units_per_id.len() as i64 || start > end {
            return Err(PlanError::Query(format!(
                "fixture query out of bounds: [{start}, {end}]"
            )));
        }
        Ok(self.units_per_id[(start - 1) as usize..end as usize]
            .iter()
            .sum())
    }
}

impl StoreQueries for FixtureStore {
    fn count_exact(&self, start: i64, end: i64) -> Result<u64, PlanError> {
        self.queries.set(self.queries.get() + 1);
        self.sum_units(start, end)
    }

    fn count_estimate(&self, start: i64, end: i64) -> Result<u64, PlanError> {
        self.queries.set(self.queries.get() + 1);
        let exact = self.sum_units(start, end)?;
        Ok((exact as f64 * self.estimate_factor) as u64)
    }

    fn bytes_exact(&self, start: i64, end: i64) -> Result<u64, PlanError> {
        self.queries.set(self.queries.get() + 1);
        Ok(self.sum_units(start, end)? * self.bytes_per_unit)
    }
}
