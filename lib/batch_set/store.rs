use std::fs::{self, File};
use std::io;
use std::path::Path;
use std::thread;
use std::time::Duration;

use log::warn;
use nix::errno::Errno;
use nix::fcntl::{Flock, FlockArg};
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::types::{BatchEntry, BatchSetError, BatchStatus, LockPolicy, Owner};
use crate::range::Range;

pub(crate) const BACKUP_SUFFIX: &str = ".bak";

/// On-disk document shape.
///
/// All integers are carried as strings except the owner pid; field order here
/// is the serialization order and must stay stable because external tooling
/// reads these files.
#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct BatchesDocument {
    pub batches: Vec<BatchEnvelope>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct BatchEnvelope {
    pub batch: BatchRecord,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct BatchRecord {
    pub status: String,
    pub owner: OwnerRecord,
    pub first_claimed: Option<String>,
    pub completed_time: Option<String>,
    pub runs: String,
    pub range: RangeRecord,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct OwnerRecord {
    pub host: Option<String>,
    pub pid: Option<u32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct RangeRecord {
    pub start: String,
    pub end: String,
}

fn map_record(record: BatchRecord) -> Result<BatchEntry, String> {
    let status = BatchStatus::from_file_str(&record.status)?;
    let start = record
        .range
        .start
        .parse::<i64>()
        .map_err(|_| format!("invalid range start: {}", record.range.start))?;
    let end = record
        .range
        .end
        .parse::<i64>()
        .map_err(|_| format!("invalid range end: {}", record.range.end))?;
    let runs = record
        .runs
        .parse::<u32>()
        .map_err(|_| format!("invalid runs count: {}", record.runs))?;

    Ok(BatchEntry {
        range: Range::new(start, end),
        status,
        owner: Owner {
            host: record.owner.host,
            pid: record.owner.pid,
        },
        first_claimed: record.first_claimed,
        completed_time: record.completed_time,
        runs,
    })
}

fn record_from_entry(entry: &BatchEntry) -> BatchRecord {
    BatchRecord {
        status: entry.status.as_file_str().to_string(),
        owner: OwnerRecord {
            host: entry.owner.host.clone(),
            pid: entry.owner.pid,
        },
        first_claimed: entry.first_claimed.clone(),
        completed_time: entry.completed_time.clone(),
        runs: entry.runs.to_string(),
        range: RangeRecord {
            start: entry.range.start.to_string(),
            end: entry.range.end.to_string(),
        },
    }
}

pub(crate) fn decode_document(raw: &str) -> Result<Vec<BatchEntry>, String> {
    if raw.trim().is_empty() {
        return Err("document is empty".to_string());
    }
    let document: BatchesDocument =
        serde_json::from_str(raw).map_err(|err| format!("document failed to parse: {err}"))?;
    document
        .batches
        .into_iter()
        .map(|envelope| map_record(envelope.batch))
        .collect()
}

pub(crate) fn encode_document(entries: &[BatchEntry]) -> Result<String, BatchSetError> {
    let document = BatchesDocument {
        batches: entries
            .iter()
            .map(|entry| BatchEnvelope {
                batch: record_from_entry(entry),
            })
            .collect(),
    };
    serde_json::to_string(&document)
        .map_err(|err| BatchSetError::Io(io::Error::new(io::ErrorKind::InvalidData, err)))
}

/// Decodes the primary document, falling back to the shadow backup when the
/// primary is unusable (truncated by a crash mid-write, or carrying values the
/// closed status enumeration rejects).
pub(crate) fn recover_entries(
    raw: &str,
    path: &Path,
    backup_path: &Path,
) -> Result<Vec<BatchEntry>, BatchSetError> {
    let primary_failure = match decode_document(raw) {
        Ok(entries) => return Ok(entries),
        Err(detail) => detail,
    };

    warn!(
        "batch file {} is unusable ({primary_failure}); recovering from backup",
        path.display()
    );

    let backup_raw = fs::read_to_string(backup_path).map_err(|err| BatchSetError::CorruptState {
        path: path.to_path_buf(),
        detail: format!("{primary_failure}; backup unreadable: {err}"),
    })?;

    decode_document(&backup_raw).map_err(|backup_failure| BatchSetError::CorruptState {
        path: path.to_path_buf(),
        detail: format!("primary: {primary_failure}; backup: {backup_failure}"),
    })
}

/// Writes the pre-mutation snapshot to the backup path.
///
/// This runs before any mutation is applied, so the backup is always exactly
/// one generation behind the primary and always a complete document.
pub(crate) fn write_backup(backup_path: &Path, contents: &str) -> Result<(), BatchSetError> {
    fs::write(backup_path, contents)?;
    Ok(())
}

/// Acquires an OS-level exclusive advisory lock on `file`, retrying with
/// exponential backoff plus random jitter up to the policy's attempt ceiling.
///
/// The lock is released when the returned guard is dropped.
pub(crate) fn lock_exclusive(
    path: &Path,
    file: File,
    policy: &LockPolicy,
) -> Result<Flock<File>, BatchSetError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut delay = policy.base_delay;
    let mut candidate = file;

    for attempt in 1..=max_attempts {
        match Flock::lock(candidate, FlockArg::LockExclusiveNonblock) {
            Ok(guard) => return Ok(guard),
            Err((returned, errno)) if errno == Errno::EWOULDBLOCK => {
                if attempt == max_attempts {
                    break;
                }
                candidate = returned;
                thread::sleep(delay + lock_jitter(policy.max_jitter));
                delay *= 2;
            }
            Err((_, errno)) => {
                return Err(BatchSetError::Io(io::Error::from_raw_os_error(errno as i32)));
            }
        }
    }

    Err(BatchSetError::LockTimeout {
        path: path.to_path_buf(),
        attempts: max_attempts,
    })
}

fn lock_jitter(max_jitter: Duration) -> Duration {
    let ceiling = max_jitter.as_millis() as u64;
    if ceiling == 0 {
        return Duration::ZERO;
    }
    Duration::from_millis(rand::thread_rng().gen_range(0..=ceiling))
}
