//! End-to-end lifecycle: plan ranges over a synthetic domain, group them into
//! claimable batches, run competing workers over the batch file, lose one
//! worker mid-flight, and recycle its claim through heartbeat staleness.

use std::time::{Duration, SystemTime};

use dump_batcher::{
    group_ranges, heartbeat, BatchSet, BatchStatus, CostOracle, HeartbeatMarker, LockPolicy,
    PartitionPlanner, PlanError, Range, StoreQueries,
};

const JOB: &str = "meta-history";

/// Synthetic store: identifier `i` carries `(i % 7) + 1` sub-units, so the
/// domain is mildly non-uniform the way real histories are.
struct SyntheticStore;

impl SyntheticStore {
    fn units_at(id: i64) -> u64 {
        (id % 7 + 1) as u64
    }
}

impl StoreQueries for SyntheticStore {
    fn count_exact(&self, start: i64, end: i64) -> Result<u64, PlanError> {
        Ok((start..=end).map(Self::units_at).sum())
    }

    fn count_estimate(&self, start: i64, end: i64) -> Result<u64, PlanError> {
        self.count_exact(start, end)
    }

    fn bytes_exact(&self, start: i64, end: i64) -> Result<u64, PlanError> {
        Ok(self.count_exact(start, end)? * 256)
    }
}

fn fast_lock_policy() -> LockPolicy {
    LockPolicy {
        max_attempts: 50,
        base_delay: Duration::from_millis(1),
        max_jitter: Duration::from_millis(2),
    }
}

fn backdate_marker(marker: &HeartbeatMarker, by: Duration) {
    let file = std::fs::OpenOptions::new()
        .append(true)
        .open(marker.path())
        .expect("failed to open marker for backdating");
    file.set_modified(SystemTime::now() - by)
        .expect("failed to backdate marker");
}

#[test]
fn planned_batches_survive_worker_loss_and_complete_exactly_once() {
    let _ = env_logger::builder().is_test(true).try_init();

    let dir = tempfile::tempdir().expect("failed to create temp dir");
    let store = SyntheticStore;
    let domain_end = 5_000;
    let total_units = store
        .count_exact(1, domain_end)
        .expect("fixture count failed");

    // Plan fine-grained ranges, then group them into coarser batches the way
    // a dump run hands work to its fleet.
    let oracle = CostOracle::new(&store);
    let planner = PartitionPlanner::new(&oracle, domain_end, total_units);
    let fine = planner
        .plan_for_job_count(16)
        .expect("planning should succeed");
    assert_eq!(fine.len(), 16);

    let batches = group_ranges(&fine, 4);
    assert!(!batches.is_empty() && batches.len() < fine.len());

    // The grouped plan still covers the whole domain with no gaps.
    let mut cursor = 1;
    for batch in &batches {
        assert_eq!(batch.start, cursor);
        cursor = batch.end + 1;
    }
    assert_eq!(cursor, domain_end + 1);

    let set = BatchSet::new(dir.path(), JOB).with_lock_policy(fast_lock_policy());
    set.create(&batches).expect("failed to create batch file");
    assert_eq!(
        set.count_unclaimed().expect("count failed"),
        batches.len()
    );

    // A worker claims a batch and then dies without a terminal transition;
    // only its stale heartbeat tells the monitor.
    let abandoned = set
        .claim(None)
        .expect("claim failed")
        .expect("a batch should be claimable");
    let abandoned_marker = HeartbeatMarker::new(dir.path(), JOB, abandoned);
    abandoned_marker
        .create()
        .expect("failed to create heartbeat");
    backdate_marker(&abandoned_marker, Duration::from_secs(3_600));

    // Healthy workers drain the rest of the pool concurrently.
    let mut handles = Vec::new();
    for _ in 0..3 {
        let worker_set = set.clone();
        let worker_dir = dir.path().to_path_buf();
        handles.push(std::thread::spawn(move || {
            let mut finished = Vec::new();
            while let Ok(Some(range)) = worker_set.claim(None) {
                let marker = HeartbeatMarker::new(&worker_dir, JOB, range);
                marker.create().expect("failed to create heartbeat");
                marker.touch().expect("failed to touch heartbeat");
                worker_set
                    .done(range)
                    .expect("done failed")
                    .expect("done must apply to our own claim");
                marker.remove().expect("failed to remove heartbeat");
                finished.push(range);
            }
            finished
        }));
    }
    let mut finished: Vec<Range> = handles
        .into_iter()
        .flat_map(|h| h.join().expect("worker thread panicked"))
        .collect();
    assert_eq!(finished.len(), batches.len() - 1);

    // The monitor notices the stale heartbeat and recycles the batch.
    let recycled = heartbeat::sweep_stale(dir.path(), JOB, &set, Duration::from_secs(600))
        .expect("sweep failed");
    assert_eq!(recycled, vec![abandoned]);
    assert!(!abandoned_marker.path().exists());

    let entry = set
        .entries()
        .expect("read failed")
        .into_iter()
        .find(|e| e.range == abandoned)
        .expect("abandoned batch must still exist");
    assert_eq!(entry.status, BatchStatus::Aborted);
    assert_eq!(entry.runs, 1, "the dead worker's attempt stays audited");

    // A surviving worker picks the recycled batch up and completes the run.
    let retried = set
        .claim(None)
        .expect("claim failed")
        .expect("the recycled batch must be claimable");
    assert_eq!(retried, abandoned);
    set.done(retried)
        .expect("done failed")
        .expect("done must apply");
    finished.push(retried);

    let entries = set.entries().expect("read failed");
    assert!(entries.iter().all(|e| e.status == BatchStatus::Done));
    let retried_entry = entries
        .iter()
        .find(|e| e.range == abandoned)
        .expect("entry must exist");
    assert_eq!(retried_entry.runs, 2);
    assert_eq!(set.count_unclaimed().expect("count failed"), 0);

    finished.sort_unstable();
    assert_eq!(finished, batches, "every batch completed exactly once");

    // No heartbeat markers survive a clean finish.
    assert!(heartbeat::list_markers(dir.path(), JOB)
        .expect("listing failed")
        .is_empty());
}
