use std::path::PathBuf;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;

use crate::range::Range;

/// Error type for batch-set state operations.
#[derive(Debug, Error)]
pub enum BatchSetError {
    #[error("failed to lock {path} after {attempts} attempts")]
    LockTimeout { path: PathBuf, attempts: u32 },
    #[error("batch state in {path} is unusable and backup recovery failed: {detail}")]
    CorruptState { path: PathBuf, detail: String },
    #[error("range {0} is not present in the batch set")]
    UnknownRange(Range),
    #[error("invalid ranges: {0}")]
    InvalidRanges(String),
    #[error("batch set i/o failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Durable lifecycle states for one claimable batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchStatus {
    Unclaimed,
    Claimed,
    Aborted,
    Failed,
    Done,
}

impl BatchStatus {
    pub(crate) fn as_file_str(self) -> &'static str {
        match self {
            BatchStatus::Unclaimed => "unclaimed",
            BatchStatus::Claimed => "claimed",
            BatchStatus::Aborted => "aborted",
            BatchStatus::Failed => "failed",
            BatchStatus::Done => "done",
        }
    }

    /// Unknown status strings are rejected rather than coerced; a file
    /// carrying one is treated as unusable by the recovery path.
    pub(crate) fn from_file_str(value: &str) -> Result<Self, String> {
        match value {
            "unclaimed" => Ok(BatchStatus::Unclaimed),
            "claimed" => Ok(BatchStatus::Claimed),
            "aborted" => Ok(BatchStatus::Aborted),
            "failed" => Ok(BatchStatus::Failed),
            "done" => Ok(BatchStatus::Done),
            other => Err(format!("invalid batch status value: {other}")),
        }
    }
}

/// Identity of the worker process holding a claim.
///
/// Both fields are set while a batch is `claimed` and empty otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Owner {
    pub host: Option<String>,
    pub pid: Option<u32>,
}

impl Owner {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Stamps the current process as owner.
    pub fn current() -> Self {
        Self {
            host: Some(local_hostname()),
            pid: Some(std::process::id()),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.host.is_none() && self.pid.is_none()
    }
}

/// One claimable unit: a range plus its status and ownership metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    pub range: Range,
    pub status: BatchStatus,
    pub owner: Owner,
    /// Timestamp of the first successful claim ever (`YYYYMMDDHHMMSS`, UTC).
    /// Survives fail/retry cycles so operators can see how long a unit has
    /// been struggling.
    pub first_claimed: Option<String>,
    /// Set only on the transition into `done`, cleared on every other one.
    pub completed_time: Option<String>,
    /// Times this entry has been claimed. Reset to 0 only by `unclaim`.
    pub runs: u32,
}

impl BatchEntry {
    pub(crate) fn unclaimed(range: Range) -> Self {
        Self {
            range,
            status: BatchStatus::Unclaimed,
            owner: Owner::empty(),
            first_claimed: None,
            completed_time: None,
            runs: 0,
        }
    }
}

/// Retry behavior for acquiring the exclusive lock on a batch-set file.
///
/// The delay doubles after each failed attempt, with a random jitter added so
/// workers that collided once do not collide again in lockstep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockPolicy {
    /// Total lock attempts before giving up with `LockTimeout`.
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_jitter: Duration,
}

impl Default for LockPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(5),
            max_jitter: Duration::from_secs(7),
        }
    }
}

/// Current UTC time in the `YYYYMMDDHHMMSS` format the batch file carries.
pub(crate) fn utc_timestamp() -> String {
    Utc::now().format("%Y%m%d%H%M%S").to_string()
}

fn local_hostname() -> String {
    nix::unistd::gethostname()
        .ok()
        .and_then(|name| name.into_string().ok())
        .filter(|name| !name.is_empty())
        .unwrap_or_else(|| "unknown".to_string())
}

#[cfg(test)]
mod tests {
    use super::{utc_timestamp, BatchStatus, Owner};

    #[test]
    fn status_round_trips_through_file_strings() {
        for status in [
            BatchStatus::Unclaimed,
            BatchStatus::Claimed,
            BatchStatus::Aborted,
            BatchStatus::Failed,
            BatchStatus::Done,
        ] {
            let parsed = BatchStatus::from_file_str(status.as_file_str())
                .expect("known status string should parse");
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn unknown_status_strings_are_rejected() {
        let err = BatchStatus::from_file_str("running").expect_err("unknown status must fail");
        assert!(err.contains("running"));
    }

    #[test]
    fn current_owner_carries_host_and_pid() {
        let owner = Owner::current();
        assert!(!owner.is_empty());
        assert_eq!(owner.pid, Some(std::process::id()));
        assert!(owner.host.is_some());
    }

    #[test]
    fn timestamp_has_compact_utc_shape() {
        let stamp = utc_timestamp();
        assert_eq!(stamp.len(), 14);
        assert!(stamp.chars().all(|c| c.is_ascii_digit()));
    }
}
