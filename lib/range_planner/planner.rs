use log::debug;

use super::density::DensityTable;
use super::estimator::{EstimatorConfig, RangeEstimator};
use super::oracle::{CostOracle, StoreQueries};
use super::PlanError;
use crate::range::Range;

/// Tuning for domain partitioning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PlannerConfig {
    pub estimator: EstimatorConfig,
    /// Upper bound on the output bytes any single range should produce.
    pub byte_ceiling: Option<u64>,
    /// Minimum sub-units per range when cutting from a density table;
    /// guards against generating many tiny ranges from noise in the table.
    pub min_units_per_cut: u64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            estimator: EstimatorConfig::default(),
            byte_ceiling: None,
            min_units_per_cut: 100,
        }
    }
}

impl PlannerConfig {
    pub fn with_byte_ceiling(mut self, ceiling: u64) -> Self {
        self.byte_ceiling = Some(ceiling);
        self
    }
}

/// Produces an ordered, gap-free, non-overlapping partition of the domain.
pub struct PartitionPlanner<'a, Q> {
    oracle: &'a CostOracle<Q>,
    domain_start: i64,
    domain_end: i64,
    total_units: u64,
    config: PlannerConfig,
}

impl<'a, Q: StoreQueries> PartitionPlanner<'a, Q> {
    /// `domain_end` and `total_units` are the caller's (cheap) measurements
    /// of the full domain, typically the maximum identifier and the maximum
    /// sub-unit identifier of the store.
    pub fn new(oracle: &'a CostOracle<Q>, domain_end: i64, total_units: u64) -> Self {
        Self::with_config(oracle, domain_end, total_units, PlannerConfig::default())
    }

    pub fn with_config(
        oracle: &'a CostOracle<Q>,
        domain_end: i64,
        total_units: u64,
        config: PlannerConfig,
    ) -> Self {
        Self {
            oracle,
            domain_start: 1,
            domain_end,
            total_units,
            config,
        }
    }

    /// Partitions the whole domain into exactly `jobs` ranges expected to
    /// take roughly equal wall-clock time.
    ///
    /// The first `jobs - 1` boundaries are searched; the final range takes
    /// the remainder of the domain unconditionally so estimation error does
    /// not compound at the tail.
    pub fn plan_for_job_count(&self, jobs: u32) -> Result<Vec<Range>, PlanError> {
        if jobs == 0 {
            return Err(PlanError::InvalidInput("jobs must be > 0".to_string()));
        }
        let domain_width = self.domain_end - self.domain_start + 1;
        if i64::from(jobs) > domain_width {
            return Err(PlanError::InvalidInput(format!(
                "cannot split {domain_width} identifiers into {jobs} jobs"
            )));
        }

        let target = (self.total_units / u64::from(jobs)).max(1);
        self.walk_domain(self.domain_start, self.domain_end, jobs, target)
    }

    /// Partitions `[start, end]` (defaulting to the whole domain) into ranges
    /// holding about `target_units` sub-units each.
    ///
    /// When a density table is supplied and covers the requested sub-domain
    /// with enough recorded units to matter, ranges are cut directly from it
    /// with no oracle traffic; otherwise the oracle-driven search walks the
    /// sub-domain.
    pub fn plan_for_unit_target(
        &self,
        target_units: u64,
        start: Option<i64>,
        end: Option<i64>,
        density: Option<&DensityTable>,
    ) -> Result<Vec<Range>, PlanError> {
        if target_units == 0 {
            return Err(PlanError::InvalidInput(
                "target_units must be > 0".to_string(),
            ));
        }
        let start = start.unwrap_or(self.domain_start);
        let end = end.unwrap_or(self.domain_end);
        if start < self.domain_start || end > self.domain_end || start > end {
            return Err(PlanError::InvalidInput(format!(
                "requested sub-domain [{start}, {end}] is not within [{}, {}]",
                self.domain_start, self.domain_end
            )));
        }

        if let Some(table) = density {
            if table.covers(start, end)
                && table.units_between(start, end) >= self.config.min_units_per_cut
            {
                let ranges = table.cut_ranges(
                    start,
                    end,
                    target_units,
                    self.config.byte_ceiling,
                    self.config.min_units_per_cut,
                );
                debug!(
                    "cut {} ranges for [{start}, {end}] from the density table",
                    ranges.len()
                );
                return Ok(ranges);
            }
        }

        let units_in_domain = if start == self.domain_start && end == self.domain_end {
            self.total_units
        } else {
            self.oracle.count(start, end)?
        };
        let width = (end - start + 1) as u64;
        let jobs = (units_in_domain / target_units + 1).min(width);
        // width >= 1, so jobs fits easily; the cast cannot truncate in
        // practice but is clamped anyway.
        let jobs = u32::try_from(jobs).unwrap_or(u32::MAX);

        self.walk_domain(start, end, jobs, target_units)
    }

    /// Walks `[start, end]`, searching one boundary per job and assigning the
    /// remainder to the last range.
    fn walk_domain(
        &self,
        start: i64,
        end: i64,
        jobs: u32,
        target_units: u64,
    ) -> Result<Vec<Range>, PlanError> {
        let estimator = RangeEstimator::new(self.oracle, end, self.config.estimator);
        let mut ranges = Vec::with_capacity(jobs as usize);
        let mut cursor = start;
        let mut prev_guess = start - 1;

        for job in 1..=jobs {
            if job == jobs {
                ranges.push(Range::new(cursor, end));
                break;
            }

            let jobs_left = i64::from(jobs - job + 1);
            let interval = (end - cursor) / jobs_left + 1;
            let initial_guess = cursor + interval;
            let searched = estimator.estimate_end(
                cursor,
                target_units,
                self.config.byte_ceiling,
                initial_guess,
                prev_guess,
            )?;

            // Every remaining job keeps at least one identifier, so the plan
            // always comes out to exactly `jobs` ranges.
            let max_end = end - i64::from(jobs - job);
            let range_end = searched.clamp(cursor, max_end);
            ranges.push(Range::new(cursor, range_end));
            prev_guess = range_end;
            cursor = range_end + 1;
        }

        Ok(ranges)
    }
}
