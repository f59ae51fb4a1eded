use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, info};

use super::store;
use super::types::{utc_timestamp, BatchEntry, BatchSetError, BatchStatus, LockPolicy, Owner};
use crate::range::Range;

/// The five legal state transitions, each with its eligibility guard and the
/// field updates it applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Transition {
    Claim,
    Unclaim,
    Abort,
    Fail,
    Done,
}

impl Transition {
    /// Statuses an entry must currently hold for this transition to apply.
    /// `None` means the transition is unconditional.
    fn eligible_from(self) -> Option<&'static [BatchStatus]> {
        match self {
            Transition::Claim => Some(&[BatchStatus::Unclaimed, BatchStatus::Aborted]),
            Transition::Unclaim | Transition::Fail | Transition::Done => {
                Some(&[BatchStatus::Claimed])
            }
            // Abort is called by a monitor that has already decided the
            // previous owner is dead; it never checks the current status.
            Transition::Abort => None,
        }
    }

    fn apply(self, entry: &mut BatchEntry) {
        match self {
            Transition::Claim => {
                entry.status = BatchStatus::Claimed;
                entry.owner = Owner::current();
                if entry.first_claimed.is_none() {
                    entry.first_claimed = Some(utc_timestamp());
                }
                entry.completed_time = None;
                entry.runs += 1;
            }
            Transition::Unclaim => {
                // Deliberate re-queue: full reset, including the run counter.
                entry.status = BatchStatus::Unclaimed;
                entry.owner = Owner::empty();
                entry.first_claimed = None;
                entry.completed_time = None;
                entry.runs = 0;
            }
            Transition::Abort => {
                // Crash recycling: owner and runs stay behind so operators
                // can see who last held the batch.
                entry.status = BatchStatus::Aborted;
                entry.completed_time = None;
            }
            Transition::Fail => {
                entry.status = BatchStatus::Failed;
                entry.completed_time = None;
            }
            Transition::Done => {
                entry.status = BatchStatus::Done;
                entry.completed_time = Some(utc_timestamp());
            }
        }
    }

    fn name(self) -> &'static str {
        match self {
            Transition::Claim => "claim",
            Transition::Unclaim => "unclaim",
            Transition::Abort => "abort",
            Transition::Fail => "fail",
            Transition::Done => "done",
        }
    }
}

/// The persisted collection of claimable batches for one (entity, job) pair.
///
/// The backing file doubles as the mutual-exclusion point: every mutation
/// locks it exclusively, snapshots the pre-mutation contents to the shadow
/// backup, applies exactly one entry update, and rewrites the whole document
/// in place. Readers that find a truncated or otherwise unusable primary
/// recover from the backup transparently.
#[derive(Debug, Clone)]
pub struct BatchSet {
    path: PathBuf,
    backup_path: PathBuf,
    lock_policy: LockPolicy,
}

impl BatchSet {
    /// Batch state for `job` lives at `dir/batches-{job}.json`.
    pub fn new(dir: &Path, job: &str) -> Self {
        let path = dir.join(format!("batches-{job}.json"));
        let mut backup = path.clone().into_os_string();
        backup.push(store::BACKUP_SUFFIX);
        let backup_path = PathBuf::from(backup);
        Self {
            path,
            backup_path,
            lock_policy: LockPolicy::default(),
        }
    }

    pub fn with_lock_policy(mut self, policy: LockPolicy) -> Self {
        self.lock_policy = policy;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn backup_path(&self) -> &Path {
        &self.backup_path
    }

    /// Creates the batch file with every range `unclaimed`.
    ///
    /// Ranges are deduplicated and sorted by start; malformed or overlapping
    /// input is a caller error. The shadow backup is written immediately so
    /// the very first mutation already has a valid fallback even if creation
    /// itself is interrupted.
    pub fn create(&self, ranges: &[Range]) -> Result<(), BatchSetError> {
        let mut ranges = ranges.to_vec();
        ranges.sort_unstable();
        ranges.dedup();

        let malformed: Vec<String> = ranges
            .iter()
            .filter(|r| !r.is_well_formed())
            .map(|r| r.to_string())
            .collect();
        if !malformed.is_empty() {
            return Err(BatchSetError::InvalidRanges(format!(
                "malformed ranges: {}",
                malformed.join(", ")
            )));
        }
        for pair in ranges.windows(2) {
            if pair[0].overlaps(&pair[1]) {
                return Err(BatchSetError::InvalidRanges(format!(
                    "overlapping ranges: {} and {}",
                    pair[0], pair[1]
                )));
            }
        }

        let entries: Vec<BatchEntry> = ranges.into_iter().map(BatchEntry::unclaimed).collect();
        let contents = store::encode_document(&entries)?;

        store::write_backup(&self.backup_path, &contents)?;
        std::fs::write(&self.path, &contents)?;
        info!(
            "created batch file {} with {} unclaimed batches",
            self.path.display(),
            entries.len()
        );
        Ok(())
    }

    /// Claims `range`, or the first unclaimed/aborted entry in file order when
    /// no range is given.
    ///
    /// Returns `Ok(None)` when the requested entry exists but is not eligible
    /// (a concurrent worker got there first; try something else), or when no
    /// entry is eligible at all (the normal "no more work" signal for a
    /// polling worker loop). A range that is absent from the set entirely is
    /// a caller error and raises `UnknownRange`.
    pub fn claim(&self, range: Option<Range>) -> Result<Option<Range>, BatchSetError> {
        self.update(range, Transition::Claim)
    }

    /// Returns a claimed batch to the pool with a full audit reset.
    pub fn unclaim(&self, range: Range) -> Result<Option<Range>, BatchSetError> {
        self.update(Some(range), Transition::Unclaim)
    }

    /// Recycles a batch whose owner is presumed dead; applies regardless of
    /// the entry's current status.
    pub fn abort(&self, range: Range) -> Result<Option<Range>, BatchSetError> {
        self.update(Some(range), Transition::Abort)
    }

    /// Marks a claimed batch as failed.
    pub fn fail(&self, range: Range) -> Result<Option<Range>, BatchSetError> {
        self.update(Some(range), Transition::Fail)
    }

    /// Marks a claimed batch as done, stamping its completion time.
    pub fn done(&self, range: Range) -> Result<Option<Range>, BatchSetError> {
        self.update(Some(range), Transition::Done)
    }

    /// Number of `unclaimed` entries; 0 when the batch file does not exist.
    ///
    /// Read-only scheduling hint, taken without the lock.
    pub fn count_unclaimed(&self) -> Result<usize, BatchSetError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        let entries = store::recover_entries(&raw, &self.path, &self.backup_path)?;
        Ok(entries
            .iter()
            .filter(|e| e.status == BatchStatus::Unclaimed)
            .count())
    }

    /// Read-only snapshot of every entry, in file order.
    pub fn entries(&self) -> Result<Vec<BatchEntry>, BatchSetError> {
        let raw = std::fs::read_to_string(&self.path)?;
        store::recover_entries(&raw, &self.path, &self.backup_path)
    }

    /// The single locked read-modify-write transaction every mutation goes
    /// through.
    ///
    /// Protocol, all inside one exclusively locked critical section:
    /// 1. Lock the primary file (bounded backoff; `LockTimeout` past the
    ///    ceiling).
    /// 2. Read and parse; fall back to the shadow backup if the primary is
    ///    unusable.
    /// 3. Write the pre-mutation contents to the backup path.
    /// 4. Locate the target entry, check the transition guard, apply updates.
    /// 5. Serialize the whole collection and rewrite the primary in place.
    /// 6. Release the lock by dropping the handle.
    fn update(
        &self,
        range: Option<Range>,
        transition: Transition,
    ) -> Result<Option<Range>, BatchSetError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.path)?;
        let mut locked = store::lock_exclusive(&self.path, file, &self.lock_policy)?;

        let mut raw = String::new();
        locked.read_to_string(&mut raw)?;
        let mut entries = store::recover_entries(&raw, &self.path, &self.backup_path)?;

        let pre_mutation = store::encode_document(&entries)?;
        store::write_backup(&self.backup_path, &pre_mutation)?;

        let index = match range {
            Some(wanted) => Some(
                entries
                    .iter()
                    .position(|entry| entry.range == wanted)
                    .ok_or(BatchSetError::UnknownRange(wanted))?,
            ),
            None => {
                let eligible = transition
                    .eligible_from()
                    .unwrap_or(&[BatchStatus::Unclaimed]);
                entries
                    .iter()
                    .position(|entry| eligible.contains(&entry.status))
            }
        };
        let Some(index) = index else {
            debug!(
                "no eligible batch for {} in {}",
                transition.name(),
                self.path.display()
            );
            return Ok(None);
        };

        let entry = &mut entries[index];
        if let Some(eligible) = transition.eligible_from() {
            if !eligible.contains(&entry.status) {
                debug!(
                    "batch {} not eligible for {} (currently {})",
                    entry.range,
                    transition.name(),
                    entry.status.as_file_str()
                );
                return Ok(None);
            }
        }

        transition.apply(entry);
        let updated = entry.range;
        debug!(
            "batch {} -> {} in {}",
            updated,
            entry.status.as_file_str(),
            self.path.display()
        );

        let serialized = store::encode_document(&entries)?;
        locked.seek(SeekFrom::Start(0))?;
        locked.write_all(serialized.as_bytes())?;
        locked.set_len(serialized.len() as u64)?;

        Ok(Some(updated))
    }
}
