//! Scan orchestrator: periodically pulls due targets, fans probes out under
//! a bounded concurrency limit, feeds results into the reconciliation engine
//! and writes per-target outcomes back.
//!
//! Every target runs in its own task so a fault in one probe can never take
//! down the batch or the process.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sea_orm::{DatabaseConnection, DbErr};
use tokio::sync::Semaphore;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::enums::ScanOutcome;
use crate::db::models::{CertificateObservation, SOURCE_TYPE_CLOUD};
use crate::db::services::ingest_service::{self, IngestError};
use crate::db::services::target_service::{self, DueTarget};
use crate::scanner::{NetworkScanner, ScanError};

/// Time allowed for the compensating FAILED write after a task fault.
const RECOVERY_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Persistence seam of the orchestrator: due-target fetch, outcome writes
/// and result ingestion. Kept as a trait so scan cycles can run against
/// in-memory fakes in tests.
#[async_trait]
pub trait ScanStore: Send + Sync {
    async fn due_targets(&self) -> Result<Vec<DueTarget>, DbErr>;
    async fn record_outcome(
        &self,
        target_id: Uuid,
        outcome: ScanOutcome,
        error_text: Option<String>,
    ) -> Result<(), DbErr>;
    async fn ingest(
        &self,
        user_id: Uuid,
        observations: Vec<CertificateObservation>,
    ) -> Result<(), IngestError>;
}

pub struct DbScanStore {
    db: DatabaseConnection,
}

impl DbScanStore {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl ScanStore for DbScanStore {
    async fn due_targets(&self) -> Result<Vec<DueTarget>, DbErr> {
        target_service::get_due_targets(&self.db).await
    }

    async fn record_outcome(
        &self,
        target_id: Uuid,
        outcome: ScanOutcome,
        error_text: Option<String>,
    ) -> Result<(), DbErr> {
        target_service::record_outcome(&self.db, target_id, outcome, error_text.as_deref()).await
    }

    async fn ingest(
        &self,
        user_id: Uuid,
        observations: Vec<CertificateObservation>,
    ) -> Result<(), IngestError> {
        ingest_service::ingest_scan_results(&self.db, user_id, &observations).await
    }
}

/// Launches the background scan loop. The first cycle runs immediately;
/// afterwards cycles start on the fixed interval, with no catch-up for slow
/// cycles.
pub fn spawn(
    store: Arc<dyn ScanStore>,
    scanner: Arc<dyn NetworkScanner>,
    interval: Duration,
    scan_timeout: Duration,
    concurrency: usize,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        info!(
            interval_secs = interval.as_secs(),
            concurrency, "Agentless scanner started"
        );
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            // The first tick completes immediately.
            ticker.tick().await;
            run_scan_cycle(&store, &scanner, concurrency, scan_timeout).await;
        }
    })
}

/// One full cycle: fetch due targets, dispatch them all under the semaphore,
/// wait for every unit to finish before returning.
pub async fn run_scan_cycle(
    store: &Arc<dyn ScanStore>,
    scanner: &Arc<dyn NetworkScanner>,
    concurrency: usize,
    scan_timeout: Duration,
) {
    let targets = match store.due_targets().await {
        Ok(targets) => targets,
        Err(e) => {
            warn!(error = %e, "Failed to fetch due targets");
            return;
        }
    };

    if targets.is_empty() {
        return;
    }

    info!(count = targets.len(), "Scanning due targets");

    let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
    let mut handles = Vec::with_capacity(targets.len());

    for target in targets {
        // Block dispatch until a slot frees; the permit rides inside the
        // task and is released when the task finishes.
        let Ok(permit) = semaphore.clone().acquire_owned().await else {
            break;
        };
        let store = Arc::clone(store);
        let scanner = Arc::clone(scanner);
        let task_target = target.clone();
        let handle = tokio::spawn(async move {
            let _permit = permit;
            process_target(store.as_ref(), scanner.as_ref(), &task_target, scan_timeout).await;
        });
        handles.push((target, handle));
    }

    for (target, handle) in handles {
        if let Err(join_err) = handle.await {
            if !join_err.is_panic() {
                continue;
            }
            let fault = panic_message(join_err.into_panic());
            error!(target = %target.target_url, fault = %fault, "Scan task panicked");
            recover_faulted_target(store, target, fault).await;
        }
    }

    info!("Scan batch complete");
}

/// Second recovery boundary: mark the faulted target FAILED from a fresh
/// task under its own timeout. If even this write fails, faults or times
/// out, it is logged and the cycle moves on.
async fn recover_faulted_target(store: &Arc<dyn ScanStore>, target: DueTarget, fault: String) {
    let store = Arc::clone(store);
    let target_id = target.id;
    let write = tokio::spawn(async move {
        tokio::time::timeout(
            RECOVERY_WRITE_TIMEOUT,
            store.record_outcome(
                target_id,
                ScanOutcome::Failed,
                Some(format!("internal scanner fault: {fault}")),
            ),
        )
        .await
    })
    .await;

    match write {
        Ok(Ok(Ok(()))) => {}
        Ok(Ok(Err(e))) => {
            warn!(target = %target.target_url, error = %e, "Failed to mark target FAILED after fault")
        }
        Ok(Err(_elapsed)) => {
            warn!(target = %target.target_url, "Timed out marking target FAILED after fault")
        }
        Err(join_err) => {
            warn!(target = %target.target_url, error = %join_err, "Recovery write task itself failed")
        }
    }
}

/// One target's unit of work: probe, ingest, record. Scan success and
/// persistence success are tracked independently: a failed ingest keeps the
/// SUCCESS outcome because the network observation itself was valid.
async fn process_target(
    store: &dyn ScanStore,
    scanner: &dyn NetworkScanner,
    target: &DueTarget,
    scan_timeout: Duration,
) {
    let scan_result = match tokio::time::timeout(scan_timeout, scanner.scan(&target.target_url)).await
    {
        Ok(result) => result,
        Err(_) => Err(ScanError::Dial(format!(
            "scan of {} timed out",
            target.target_url
        ))),
    };

    let (outcome, error_text) = match scan_result {
        Ok(mut observations) => {
            // The probe already tags its output, but the orchestrator owns
            // the invariant.
            for obs in &mut observations {
                obs.source_type = SOURCE_TYPE_CLOUD.to_string();
            }
            if let Err(e) = store.ingest(target.user_id, observations).await {
                warn!(target = %target.target_url, error = %e, "Scanned target but ingest failed");
            }
            (ScanOutcome::Success, None)
        }
        Err(e) => {
            warn!(target = %target.target_url, error = %e, "Scan failed");
            (ScanOutcome::Failed, Some(e.to_string()))
        }
    };

    if let Err(e) = store.record_outcome(target.id, outcome, error_text).await {
        warn!(target = %target.target_url, error = %e, "Failed to record scan outcome");
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use std::time::Instant;

    struct MockScanner {
        /// (start, end) per scan call.
        spans: Mutex<Vec<(Instant, Instant)>>,
        delay: Duration,
        panic_on: Option<String>,
    }

    impl MockScanner {
        fn new(delay: Duration) -> Self {
            Self {
                spans: Mutex::new(Vec::new()),
                delay,
                panic_on: None,
            }
        }

        fn panicking_on(target: &str) -> Self {
            Self {
                spans: Mutex::new(Vec::new()),
                delay: Duration::from_millis(5),
                panic_on: Some(target.to_string()),
            }
        }
    }

    #[async_trait]
    impl NetworkScanner for MockScanner {
        async fn scan(&self, target: &str) -> Result<Vec<CertificateObservation>, ScanError> {
            let start = Instant::now();
            tokio::time::sleep(self.delay).await;
            if self.panic_on.as_deref() == Some(target) {
                panic!("simulated probe fault");
            }
            self.spans.lock().unwrap().push((start, Instant::now()));
            Ok(Vec::new())
        }
    }

    struct MockStore {
        targets: Vec<DueTarget>,
        outcomes: Mutex<Vec<(Uuid, ScanOutcome, Option<String>)>>,
        fail_ingest: bool,
    }

    impl MockStore {
        fn new(targets: Vec<DueTarget>) -> Self {
            Self {
                targets,
                outcomes: Mutex::new(Vec::new()),
                fail_ingest: false,
            }
        }
    }

    #[async_trait]
    impl ScanStore for MockStore {
        async fn due_targets(&self) -> Result<Vec<DueTarget>, DbErr> {
            Ok(self.targets.clone())
        }

        async fn record_outcome(
            &self,
            target_id: Uuid,
            outcome: ScanOutcome,
            error_text: Option<String>,
        ) -> Result<(), DbErr> {
            self.outcomes
                .lock()
                .unwrap()
                .push((target_id, outcome, error_text));
            Ok(())
        }

        async fn ingest(
            &self,
            _user_id: Uuid,
            _observations: Vec<CertificateObservation>,
        ) -> Result<(), IngestError> {
            if self.fail_ingest {
                Err(IngestError::Database(DbErr::Custom(
                    "ingest unavailable".to_string(),
                )))
            } else {
                Ok(())
            }
        }
    }

    fn make_targets(urls: &[&str]) -> Vec<DueTarget> {
        urls.iter()
            .map(|url| DueTarget {
                id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                target_url: url.to_string(),
                frequency_hours: 12,
            })
            .collect()
    }

    #[tokio::test]
    async fn concurrency_limit_one_serializes_targets() {
        let targets = make_targets(&["a:443", "b:443", "c:443"]);
        let store: Arc<dyn ScanStore> = Arc::new(MockStore::new(targets));
        let scanner = Arc::new(MockScanner::new(Duration::from_millis(30)));
        let scanner_dyn: Arc<dyn NetworkScanner> = scanner.clone();

        run_scan_cycle(&store, &scanner_dyn, 1, Duration::from_secs(1)).await;

        let mut spans = scanner.spans.lock().unwrap().clone();
        assert_eq!(spans.len(), 3);
        spans.sort_by_key(|(start, _)| *start);
        for window in spans.windows(2) {
            let (_, prev_end) = window[0];
            let (next_start, _) = window[1];
            assert!(
                next_start >= prev_end,
                "scans overlapped under concurrency limit 1"
            );
        }
    }

    #[tokio::test]
    async fn panicking_target_is_isolated_and_marked_failed() {
        let targets = make_targets(&["a:443", "boom:443", "c:443"]);
        let ids: Vec<Uuid> = targets.iter().map(|t| t.id).collect();
        let mock = Arc::new(MockStore::new(targets));
        let store: Arc<dyn ScanStore> = mock.clone();
        let scanner: Arc<dyn NetworkScanner> = Arc::new(MockScanner::panicking_on("boom:443"));

        run_scan_cycle(&store, &scanner, 1, Duration::from_secs(1)).await;

        let outcomes = mock.outcomes.lock().unwrap().clone();
        assert_eq!(outcomes.len(), 3, "every target must end with an outcome");

        let faulted = outcomes.iter().find(|(id, _, _)| *id == ids[1]).unwrap();
        assert_eq!(faulted.1, ScanOutcome::Failed);
        assert!(
            faulted.2.as_deref().unwrap().contains("simulated probe fault"),
            "fault text should carry the panic message"
        );

        for id in [ids[0], ids[2]] {
            let ok = outcomes.iter().find(|(oid, _, _)| *oid == id).unwrap();
            assert_eq!(ok.1, ScanOutcome::Success);
        }
    }

    #[tokio::test]
    async fn ingest_failure_keeps_scan_outcome_success() {
        let targets = make_targets(&["a:443"]);
        let id = targets[0].id;
        let mut inner = MockStore::new(targets);
        inner.fail_ingest = true;
        let mock = Arc::new(inner);
        let store: Arc<dyn ScanStore> = mock.clone();
        let scanner: Arc<dyn NetworkScanner> =
            Arc::new(MockScanner::new(Duration::from_millis(5)));

        run_scan_cycle(&store, &scanner, 2, Duration::from_secs(1)).await;

        let outcomes = mock.outcomes.lock().unwrap().clone();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0], (id, ScanOutcome::Success, None));
    }

    #[tokio::test]
    async fn slow_probe_times_out_and_fails_target() {
        let targets = make_targets(&["slow:443"]);
        let id = targets[0].id;
        let mock = Arc::new(MockStore::new(targets));
        let store: Arc<dyn ScanStore> = mock.clone();
        let scanner: Arc<dyn NetworkScanner> =
            Arc::new(MockScanner::new(Duration::from_millis(200)));

        run_scan_cycle(&store, &scanner, 1, Duration::from_millis(20)).await;

        let outcomes = mock.outcomes.lock().unwrap().clone();
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].0, id);
        assert_eq!(outcomes[0].1, ScanOutcome::Failed);
        assert!(outcomes[0].2.as_deref().unwrap().contains("timed out"));
    }
}
