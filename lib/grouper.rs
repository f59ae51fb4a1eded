//! Coalesces fine-grained ranges into coarser claimable batches.
//!
//! The natural partition granularity coming out of the planner (or out of
//! cached per-file sub-division) can be much finer than the number of batches
//! workers should claim at once. Grouping merges maximal runs of consecutive
//! ranges and then splits each run so no batch spans more than a bounded
//! number of original units.

use crate::range::Range;

/// Groups sorted, non-overlapping `units` into batches of at most
/// `max_group_size` original units each.
///
/// Consecutive units (each starting exactly one identifier after the previous
/// one ends) are merged into a single covering range; a gap in the input
/// always starts a new group. Input order is preserved in the output.
pub fn group_ranges(units: &[Range], max_group_size: usize) -> Vec<Range> {
    let max_group_size = max_group_size.max(1);
    let mut groups = Vec::new();
    for sequence in consecutive_sequences(units) {
        for chunk in sequence.chunks(max_group_size) {
            groups.push(Range::new(chunk[0].start, chunk[chunk.len() - 1].end));
        }
    }
    groups
}

/// Splits the input into the largest possible sublists consisting only of
/// consecutive ranges.
fn consecutive_sequences(units: &[Range]) -> Vec<Vec<Range>> {
    let mut sequences: Vec<Vec<Range>> = Vec::new();
    let mut building: Vec<Range> = Vec::new();
    for unit in units {
        match building.last() {
            Some(prev) if !prev.is_followed_by(unit) => {
                sequences.push(std::mem::take(&mut building));
                building.push(*unit);
            }
            _ => building.push(*unit),
        }
    }
    if !building.is_empty() {
        sequences.push(building);
    }
    sequences
}

#[cfg(test)]
mod tests {
    use super::group_ranges;
    use crate::range::Range;

    fn ranges(pairs: &[(i64, i64)]) -> Vec<Range> {
        pairs.iter().map(|&(s, e)| Range::new(s, e)).collect()
    }

    #[test]
    fn consecutive_units_merge_up_to_group_size() {
        let units = ranges(&[(1, 100), (101, 200), (201, 300), (301, 400), (401, 500)]);
        let groups = group_ranges(&units, 2);
        assert_eq!(groups, ranges(&[(1, 200), (201, 400), (401, 500)]));
    }

    #[test]
    fn gap_starts_a_new_group() {
        let units = ranges(&[(1, 100), (101, 200), (301, 400), (401, 500)]);
        let groups = group_ranges(&units, 3);
        assert_eq!(groups, ranges(&[(1, 200), (301, 500)]));
    }

    #[test]
    fn group_never_spans_more_than_max_units_and_covers_input_exactly() {
        let units: Vec<Range> = (0..17)
            .map(|i| Range::new(i * 10 + 1, (i + 1) * 10))
            .collect();
        let groups = group_ranges(&units, 4);

        for group in &groups {
            let spanned = units
                .iter()
                .filter(|unit| unit.start >= group.start && unit.end <= group.end)
                .count();
            assert!(spanned <= 4, "group {group} spans {spanned} units");
        }

        // Re-concatenating the groups reproduces the original coverage.
        let mut covered: Vec<(i64, i64)> = groups.iter().map(|g| (g.start, g.end)).collect();
        covered.sort_unstable();
        let mut cursor = 1;
        for (start, end) in covered {
            assert_eq!(start, cursor);
            cursor = end + 1;
        }
        assert_eq!(cursor, 171);
    }

    #[test]
    fn single_unit_and_empty_inputs_are_handled() {
        assert_eq!(group_ranges(&[], 5), Vec::new());
        let one = ranges(&[(7, 9)]);
        assert_eq!(group_ranges(&one, 5), one);
    }
}
