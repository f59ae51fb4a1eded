use log::{debug, info};

use super::oracle::{CostOracle, StoreQueries};
use super::PlanError;

/// Tuning for the end-boundary search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorConfig {
    /// The search stops once the measured unit count is within this margin
    /// of the target.
    pub count_margin: u64,
    /// Byte-ceiling refinement never shrinks a range below this many
    /// identifiers.
    pub byte_floor_units: i64,
    /// After shrinking under the byte ceiling, grow back only when the
    /// measurement landed more than this fraction under it. Tunable; the
    /// historical value has no documented rationale.
    pub grow_back_slack: f64,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            count_margin: 100,
            byte_floor_units: 16,
            grow_back_slack: 0.10,
        }
    }
}

/// Searches for the largest end boundary such that `[start, end]` holds
/// about a target number of sub-units without exceeding a byte ceiling.
///
/// This is a proportional-correction search, not a strict bisection: each
/// iteration moves the candidate toward the target by half the distance the
/// previous move covered, in whichever direction the last measurement
/// indicates. Floor and stall terminations are valid, if suboptimal,
/// results: a single identifier can legitimately hold far more units than
/// the target, and the search must terminate rather than loop.
pub struct RangeEstimator<'a, Q> {
    oracle: &'a CostOracle<Q>,
    domain_end: i64,
    config: EstimatorConfig,
}

impl<'a, Q: StoreQueries> RangeEstimator<'a, Q> {
    pub fn new(oracle: &'a CostOracle<Q>, domain_end: i64, config: EstimatorConfig) -> Self {
        Self {
            oracle,
            domain_end,
            config,
        }
    }

    /// Finds an end boundary for a range starting at `start`.
    ///
    /// `initial_guess` should come from a cheap linear estimate (remaining
    /// domain over remaining jobs); `prev_guess` is the end of the previous
    /// range (or `start - 1` at the beginning of a walk) and seeds the
    /// correction step size.
    pub fn estimate_end(
        &self,
        start: i64,
        target_units: u64,
        byte_ceiling: Option<u64>,
        initial_guess: i64,
        prev_guess: i64,
    ) -> Result<i64, PlanError> {
        if start < 1 || start > self.domain_end {
            return Err(PlanError::InvalidInput(format!(
                "range start ({start}) must be in [1, {}]",
                self.domain_end
            )));
        }
        if target_units == 0 {
            return Err(PlanError::InvalidInput(
                "target_units must be > 0".to_string(),
            ));
        }

        let mut guess = initial_guess.clamp(start, self.domain_end);
        let mut prev = prev_guess;

        loop {
            let measured = self.oracle.count(start, guess)?;
            debug!(
                "range search: [{start}, {guess}] holds {measured} units (target {target_units})"
            );

            if measured.abs_diff(target_units) <= self.config.count_margin {
                break;
            }
            if (guess - prev).abs() <= 2 {
                // Stalled at a resolution finer than is worth pursuing; the
                // guess is good enough.
                info!(
                    "range search stalled at [{start}, {guess}] with {measured} units \
                     (target {target_units}); keeping it"
                );
                break;
            }

            let correction = ((guess - prev).abs() / 2).max(1);
            prev = guess;
            guess = if measured > target_units {
                // Never shrink below a single identifier, even when that one
                // identifier alone exceeds the target.
                (guess - correction).max(start)
            } else {
                (guess + correction).min(self.domain_end)
            };
        }

        match byte_ceiling {
            Some(ceiling) => self.shrink_to_byte_ceiling(start, guess, ceiling),
            None => Ok(guess),
        }
    }

    /// Pulls the end boundary down until `[start, end]` fits under the byte
    /// ceiling, then reclaims slack if the shrink overshot.
    fn shrink_to_byte_ceiling(
        &self,
        start: i64,
        end: i64,
        ceiling: u64,
    ) -> Result<i64, PlanError> {
        let original = end;
        let mut end = end;
        let mut measured = self.oracle.bytes(start, end)?;
        if measured <= ceiling {
            return Ok(end);
        }

        let floor_width = self.config.byte_floor_units.max(1);
        while measured > ceiling && end - start + 1 > floor_width {
            let halved = (end - start + 1) / 2;
            end = start + halved.max(floor_width) - 1;
            measured = self.oracle.bytes(start, end)?;
        }

        if measured > ceiling {
            info!(
                "[{start}, {end}] still holds {measured} bytes (ceiling {ceiling}) at the \
                 minimum range width; keeping it"
            );
            return Ok(end);
        }

        // The byte estimate was conservative and we halved too far; grow
        // back toward the original boundary while staying under the ceiling
        // so ranges do not end up needlessly small.
        let comfortably_under = (ceiling as f64 * (1.0 - self.config.grow_back_slack)) as u64;
        if measured < comfortably_under {
            let mut step = (original - end) / 2;
            while step > 0 {
                let candidate = end + step;
                if self.oracle.bytes(start, candidate)? <= ceiling {
                    end = candidate;
                }
                step /= 2;
            }
        }

        Ok(end)
    }
}
