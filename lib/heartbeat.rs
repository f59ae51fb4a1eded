//! Side-channel liveness markers for claimed batches.
//!
//! A worker that claims a batch creates an empty marker file and touches it
//! at a bounded interval while the work runs; the marker's modification time
//! is the only liveness signal. Keeping this outside the locked batch file
//! means heartbeat ticks never contend with claim traffic. Markers are owned
//! by one worker at a time by convention, not by locking; correctness only
//! needs the mtime to be a reasonably accurate liveness signal.

use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use log::info;

use crate::batch_set::{BatchSet, BatchSetError};
use crate::range::Range;

const MARKER_PREFIX: &str = "job-";
const MARKER_SUFFIX: &str = "-running.txt";

/// Marker filename for one (job, range) pair.
pub fn marker_filename(job: &str, range: Range) -> String {
    format!(
        "{MARKER_PREFIX}{job}-batch-{}-{}{MARKER_SUFFIX}",
        range.start, range.end
    )
}

/// Good-enough check that a filename is one of our marker files.
pub fn is_marker_file(name: &str) -> bool {
    name.starts_with(MARKER_PREFIX) && name.ends_with(MARKER_SUFFIX)
}

/// Extracts the job name and range from a marker filename.
///
/// Job names may themselves contain dashes, so the range is parsed from the
/// right-hand end.
pub fn parse_marker_filename(name: &str) -> Option<(String, Range)> {
    let rest = name
        .strip_prefix(MARKER_PREFIX)?
        .strip_suffix(MARKER_SUFFIX)?;
    let mut fields = rest.rsplitn(3, '-');
    let end: i64 = fields.next()?.parse().ok()?;
    let start: i64 = fields.next()?.parse().ok()?;
    let job = fields.next()?.strip_suffix("-batch")?;
    if job.is_empty() {
        return None;
    }
    Some((job.to_string(), Range::new(start, end)))
}

/// The empty file a worker keeps fresh while holding one claimed range.
#[derive(Debug, Clone)]
pub struct HeartbeatMarker {
    path: PathBuf,
}

impl HeartbeatMarker {
    pub fn new(dir: &Path, job: &str, range: Range) -> Self {
        Self {
            path: dir.join(marker_filename(job, range)),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Creates the marker; called right after a successful claim.
    pub fn create(&self) -> io::Result<()> {
        OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        Ok(())
    }

    /// Refreshes the marker's modification time so monitors know the batch is
    /// still being worked.
    pub fn touch(&self) -> io::Result<()> {
        let file = OpenOptions::new().append(true).open(&self.path)?;
        file.set_modified(SystemTime::now())
    }

    /// Removes the marker on a terminal transition. A marker that is already
    /// gone is not an error.
    pub fn remove(&self) -> io::Result<()> {
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Time since the marker was last touched.
    pub fn age(&self) -> io::Result<Duration> {
        let modified = fs::metadata(&self.path)?.modified()?;
        Ok(SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default())
    }

    pub fn is_stale(&self, threshold: Duration) -> io::Result<bool> {
        Ok(self.age()? > threshold)
    }
}

/// Lists the markers present for `job`, with the age of each.
pub fn list_markers(dir: &Path, job: &str) -> io::Result<Vec<(Range, Duration)>> {
    let mut markers = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if !is_marker_file(name) {
            continue;
        }
        let Some((marker_job, range)) = parse_marker_filename(name) else {
            continue;
        };
        if marker_job != job {
            continue;
        }
        let modified = entry.metadata()?.modified()?;
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default();
        markers.push((range, age));
    }
    markers.sort_unstable_by_key(|(range, _)| *range);
    Ok(markers)
}

/// Recycles batches whose worker has stopped heartbeating.
///
/// For every marker of `job` older than `staleness`, the batch is aborted
/// (returning it to the claimable pool without waiting on the dead worker)
/// and the marker is deleted. Returns the recycled ranges.
pub fn sweep_stale(
    dir: &Path,
    job: &str,
    set: &BatchSet,
    staleness: Duration,
) -> Result<Vec<Range>, BatchSetError> {
    let mut recycled = Vec::new();
    for (range, age) in list_markers(dir, job)? {
        if age <= staleness {
            continue;
        }
        info!(
            "heartbeat for job {job} batch {range} is stale ({age:?}); recycling"
        );
        set.abort(range)?;
        HeartbeatMarker::new(dir, job, range).remove()?;
        recycled.push(range);
    }
    Ok(recycled)
}
