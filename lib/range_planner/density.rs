use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use super::PlanError;
use crate::range::Range;

/// One row of a pre-computed density table: the bytes and sub-units
/// accumulated between the previous marker's boundary (exclusive) and this
/// one (inclusive).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DensityMarker {
    pub boundary: i64,
    pub bytes: u64,
    pub units: u64,
}

/// Cached density measurements over the identifier domain.
///
/// A dump run that already walked the domain once can persist this table and
/// let later runs cut ranges straight from it instead of re-querying the
/// store. Markers are strictly ascending in `boundary`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DensityTable {
    markers: Vec<DensityMarker>,
}

impl DensityTable {
    pub fn new(markers: Vec<DensityMarker>) -> Result<Self, PlanError> {
        if markers.is_empty() {
            return Err(PlanError::BadDensityTable("no markers".to_string()));
        }
        if markers[0].boundary < 1 {
            return Err(PlanError::BadDensityTable(format!(
                "boundary {} is not a valid identifier",
                markers[0].boundary
            )));
        }
        for pair in markers.windows(2) {
            if pair[1].boundary <= pair[0].boundary {
                return Err(PlanError::BadDensityTable(format!(
                    "boundaries must be strictly ascending, got {} then {}",
                    pair[0].boundary, pair[1].boundary
                )));
            }
        }
        Ok(Self { markers })
    }

    /// Reads a table previously written with [`DensityTable::save`].
    pub fn load(path: &Path) -> Result<Self, PlanError> {
        let raw = fs::read_to_string(path)?;
        let markers: Vec<DensityMarker> = serde_json::from_str(&raw)
            .map_err(|err| PlanError::BadDensityTable(format!("failed to parse: {err}")))?;
        Self::new(markers)
    }

    pub fn save(&self, path: &Path) -> Result<(), PlanError> {
        let raw = serde_json::to_string(&self.markers)
            .map_err(|err| PlanError::BadDensityTable(format!("failed to serialize: {err}")))?;
        fs::write(path, raw)?;
        Ok(())
    }

    /// Whether the table has markers spanning the whole of `[start, end]`.
    pub fn covers(&self, start: i64, end: i64) -> bool {
        match (self.markers.first(), self.markers.last()) {
            (Some(first), Some(last)) => first.boundary <= start && last.boundary >= end,
            _ => false,
        }
    }

    /// Sub-units the table records strictly after `start` up to and
    /// including `end`.
    pub fn units_between(&self, start: i64, end: i64) -> u64 {
        self.markers
            .iter()
            .filter(|m| m.boundary > start && m.boundary <= end)
            .map(|m| m.units)
            .sum()
    }

    /// Cuts `[start, end]` into ranges holding about `target_units` each
    /// (closing early when a byte ceiling would be crossed), using only the
    /// recorded markers. Each cut carries at least `min_units` recorded
    /// sub-units so noise in the table cannot shatter the plan into tiny
    /// ranges; whatever accumulation remains at the end becomes the final
    /// range.
    pub fn cut_ranges(
        &self,
        start: i64,
        end: i64,
        target_units: u64,
        byte_ceiling: Option<u64>,
        min_units: u64,
    ) -> Vec<Range> {
        let mut ranges = Vec::new();
        let mut range_start = start;
        let mut units = 0u64;
        let mut bytes = 0u64;

        for marker in &self.markers {
            if marker.boundary <= start {
                continue;
            }
            if marker.boundary > end {
                break;
            }
            units += marker.units;
            bytes += marker.bytes;

            let over_bytes = byte_ceiling.is_some_and(|ceiling| bytes > ceiling);
            if (units >= target_units || over_bytes) && units >= min_units {
                let cut_end = marker.boundary.min(end);
                ranges.push(Range::new(range_start, cut_end));
                range_start = cut_end + 1;
                units = 0;
                bytes = 0;
            }
        }

        if range_start <= end {
            ranges.push(Range::new(range_start, end));
        }
        ranges
    }
}
