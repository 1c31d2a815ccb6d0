//! Incremental harvest loop: pending batches → unseen keys → concurrent
//! fetches → per-record appends → batch retirement, until no batch is left.
use std::collections::BTreeSet;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::{FetchError, HarvestError, Result};
use crate::harvest::fetcher::ProfileLookup;
use crate::harvest::queue::{BatchHandle, BatchQueue};
use crate::harvest::store::RecordStore;

/// Counters for one `HarvestLoop::run`.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct HarvestSummary {
    pub generations: u64,
    pub batches_retired: u64,
    pub keys_offered: u64,
    pub keys_already_known: u64,
    pub records_appended: u64,
    pub non_success: u64,
    pub transport_failures: u64,
}

impl HarvestSummary {
    fn record_outcome(&mut self, outcome: &KeyOutcome) {
        match outcome {
            KeyOutcome::Appended => self.records_appended += 1,
            KeyOutcome::Skipped(FetchError::NonSuccess(_)) => self.non_success += 1,
            KeyOutcome::Skipped(FetchError::Transport(_)) => self.transport_failures += 1,
        }
    }
}

#[derive(Debug)]
enum KeyOutcome {
    Appended,
    Skipped(FetchError),
}

#[derive(Debug)]
enum LoopState {
    CheckingPending,
    Draining {
        batches: Vec<BatchHandle>,
        unseen: BTreeSet<String>,
    },
    Idle,
}

pub struct HarvestLoop<L> {
    queue: BatchQueue,
    store: Arc<RecordStore>,
    lookup: Arc<L>,
    max_in_flight: usize,
}

impl<L: ProfileLookup> HarvestLoop<L> {
    pub fn new(queue: BatchQueue, store: Arc<RecordStore>, lookup: Arc<L>) -> Self {
        Self {
            queue,
            store,
            lookup,
            max_in_flight: 0,
        }
    }

    /// Cap concurrently running fetch tasks; 0 leaves every task of a
    /// generation free to run at once.
    pub fn with_max_in_flight(mut self, max_in_flight: usize) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    /// Drive the loop until no pending batch remains.
    ///
    /// Per-key fetch failures are logged and counted. Store, queue and task
    /// failures end the run; batches of the failed generation stay pending.
    pub async fn run(&self) -> Result<HarvestSummary> {
        let mut summary = HarvestSummary::default();
        let mut state = LoopState::CheckingPending;

        loop {
            state = match state {
                LoopState::CheckingPending => self.check_pending(&mut summary).await?,
                LoopState::Draining { batches, unseen } => {
                    summary.generations += 1;
                    self.drain(unseen, &mut summary).await?;
                    for batch in &batches {
                        self.queue.retire(batch).await?;
                        summary.batches_retired += 1;
                    }
                    info!(
                        generation = summary.generations,
                        retired = batches.len(),
                        appended = summary.records_appended,
                        "generation complete"
                    );
                    LoopState::CheckingPending
                }
                LoopState::Idle => break,
            };
        }

        info!(?summary, "harvest idle; no pending batches");
        Ok(summary)
    }

    async fn check_pending(&self, summary: &mut HarvestSummary) -> Result<LoopState> {
        let batches = self.queue.list_pending_batches().await?;
        if batches.is_empty() {
            return Ok(LoopState::Idle);
        }

        let mut candidates = BTreeSet::new();
        for batch in &batches {
            let keys = self.queue.read_keys(batch).await?;
            debug!(batch = %batch.name, keys = keys.len(), "read batch");
            candidates.extend(keys);
        }

        let known = self.store.load_keys().await?;
        let offered = candidates.len() as u64;
        let unseen: BTreeSet<String> = candidates
            .into_iter()
            .filter(|k| !known.contains(k))
            .collect();

        summary.keys_offered += offered;
        summary.keys_already_known += offered - unseen.len() as u64;
        info!(
            batches = batches.len(),
            offered,
            unseen = unseen.len(),
            "starting generation"
        );
        Ok(LoopState::Draining { batches, unseen })
    }

    /// One task per key; returns only after every task has finished.
    async fn drain(&self, unseen: BTreeSet<String>, summary: &mut HarvestSummary) -> Result<()> {
        let total = unseen.len();
        let permits = (self.max_in_flight > 0).then(|| Arc::new(Semaphore::new(self.max_in_flight)));
        let mut tasks = JoinSet::new();

        for key in unseen {
            let lookup = self.lookup.clone();
            let store = self.store.clone();
            let permits = permits.clone();
            tasks.spawn(async move {
                let _permit = match permits {
                    Some(sem) => Some(
                        sem.acquire_owned()
                            .await
                            .map_err(|e| HarvestError::TaskFailed(e.to_string()))?,
                    ),
                    None => None,
                };
                harvest_key(lookup.as_ref(), &store, key).await
            });
        }

        let mut done = 0usize;
        while let Some(joined) = tasks.join_next().await {
            let outcome = match joined {
                Ok(Ok(outcome)) => outcome,
                Ok(Err(err)) => {
                    error!(%err, "fatal error during generation; aborting remaining fetches");
                    tasks.abort_all();
                    return Err(err);
                }
                Err(join_err) => {
                    tasks.abort_all();
                    return Err(HarvestError::TaskFailed(join_err.to_string()));
                }
            };
            summary.record_outcome(&outcome);
            done += 1;
            if done % 25 == 0 || done == total {
                info!(done, total, appended = summary.records_appended, "generation progress");
            }
        }
        Ok(())
    }
}

async fn harvest_key<L: ProfileLookup + ?Sized>(
    lookup: &L,
    store: &RecordStore,
    key: String,
) -> Result<KeyOutcome> {
    match lookup.fetch(&key).await {
        Ok(mut record) => {
            // Dedup is keyed on what the batch asked for, not on how the
            // remote spells it back.
            if record.username != key {
                debug!(%key, returned = %record.username, "storing under requested key");
                record.username = key.clone();
            }
            store.append(&record).await?;
            debug!(%key, "saved profile");
            Ok(KeyOutcome::Appended)
        }
        Err(err) => {
            warn!(%key, %err, "skipping key");
            Ok(KeyOutcome::Skipped(err))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::normalization::profile::ProfileRecord;
    use reqwest::StatusCode;
    use std::collections::HashMap;
    use std::path::Path;
    use std::sync::Mutex;

    /// Canned lookup: known keys succeed with fixed counts, others 404.
    #[derive(Default)]
    struct MockLookup {
        profiles: HashMap<String, (u64, u64, u64)>,
        transport_fail: Vec<String>,
        calls: Mutex<Vec<String>>,
    }

    impl MockLookup {
        fn with(mut self, key: &str, counts: (u64, u64, u64)) -> Self {
            self.profiles.insert(key.to_string(), counts);
            self
        }

        fn calls(&self) -> Vec<String> {
            let mut calls = self.calls.lock().unwrap().clone();
            calls.sort();
            calls
        }
    }

    #[async_trait::async_trait]
    impl ProfileLookup for MockLookup {
        async fn fetch(&self, key: &str) -> std::result::Result<ProfileRecord, FetchError> {
            self.calls.lock().unwrap().push(key.to_string());
            tokio::task::yield_now().await;
            if self.transport_fail.iter().any(|k| k == key) {
                return Err(FetchError::Transport("connection reset".into()));
            }
            match self.profiles.get(key) {
                Some(&(followers, following, media_count)) => Ok(ProfileRecord {
                    username: key.to_string(),
                    followers,
                    following,
                    media_count,
                    ..ProfileRecord::default()
                }),
                None => Err(FetchError::NonSuccess(StatusCode::NOT_FOUND)),
            }
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        root: std::path::PathBuf,
    }

    impl Fixture {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let root = dir.path().to_path_buf();
            std::fs::create_dir_all(root.join("pending")).unwrap();
            Self { _dir: dir, root }
        }

        fn batch(&self, name: &str, keys: &[&str]) {
            let mut body = String::from("account\n");
            for k in keys {
                body.push_str(k);
                body.push('\n');
            }
            std::fs::write(self.root.join("pending").join(name), body).unwrap();
        }

        fn queue(&self) -> BatchQueue {
            BatchQueue::new(QueueConfig {
                pending_dir: self.root.join("pending"),
                processed_dir: self.root.join("processed"),
                key_column: "account".into(),
            })
        }

        fn results(&self) -> std::path::PathBuf {
            self.root.join("results.csv")
        }

        fn harvest(&self, lookup: Arc<MockLookup>) -> HarvestLoop<MockLookup> {
            HarvestLoop::new(
                self.queue(),
                Arc::new(RecordStore::new(self.results())),
                lookup,
            )
        }

        fn processed(&self, name: &str) -> bool {
            self.root.join("processed").join(name).exists()
        }
    }

    async fn rows(path: &Path) -> Vec<ProfileRecord> {
        RecordStore::new(path).load_rows().await.unwrap()
    }

    #[tokio::test]
    async fn success_and_404_in_one_generation() {
        let fx = Fixture::new();
        fx.batch("batch1.csv", &["alice", "bob"]);
        let lookup = Arc::new(MockLookup::default().with("alice", (10, 5, 3)));

        let summary = fx.harvest(lookup.clone()).run().await.unwrap();

        let rows = rows(&fx.results()).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].username, "alice");
        assert_eq!(
            (rows[0].followers, rows[0].following, rows[0].media_count),
            (10, 5, 3)
        );
        assert!(fx.processed("batch1.csv"));
        assert!(fx.queue().list_pending_batches().await.unwrap().is_empty());
        assert_eq!(summary.generations, 1);
        assert_eq!(summary.records_appended, 1);
        assert_eq!(summary.non_success, 1);
        assert_eq!(lookup.calls(), vec!["alice", "bob"]);
    }

    #[tokio::test]
    async fn rerun_over_same_batches_adds_no_duplicates() {
        let fx = Fixture::new();
        let lookup = Arc::new(
            MockLookup::default()
                .with("alice", (1, 1, 1))
                .with("carol", (2, 2, 2)),
        );

        fx.batch("b.csv", &["alice", "carol", "bob"]);
        fx.harvest(lookup.clone()).run().await.unwrap();
        let first = rows(&fx.results()).await;

        // Same batch resubmitted: only the previously failed key is refetched.
        fx.batch("b2.csv", &["alice", "carol", "bob"]);
        let summary = fx.harvest(lookup.clone()).run().await.unwrap();
        let second = rows(&fx.results()).await;

        assert_eq!(first, second);
        assert_eq!(summary.keys_already_known, 2);
        let calls = lookup.calls();
        assert_eq!(calls.iter().filter(|k| *k == "alice").count(), 1);
        assert_eq!(calls.iter().filter(|k| *k == "bob").count(), 2);
    }

    #[tokio::test]
    async fn known_keys_are_never_refetched() {
        let fx = Fixture::new();
        let store = RecordStore::new(fx.results());
        store
            .append(&ProfileRecord {
                username: "alice".into(),
                ..ProfileRecord::default()
            })
            .await
            .unwrap();
        fx.batch("b.csv", &["alice", "dave"]);
        let lookup = Arc::new(MockLookup::default().with("dave", (4, 4, 4)));

        fx.harvest(lookup.clone()).run().await.unwrap();

        assert_eq!(lookup.calls(), vec!["dave"]);
        assert_eq!(rows(&fx.results()).await.len(), 2);
    }

    #[tokio::test]
    async fn all_pending_batches_merge_into_one_generation() {
        let fx = Fixture::new();
        fx.batch("a.csv", &["alice", "bob"]);
        fx.batch("b.csv", &["bob", "carol"]);
        let lookup = Arc::new(
            MockLookup::default()
                .with("alice", (1, 0, 0))
                .with("bob", (2, 0, 0))
                .with("carol", (3, 0, 0)),
        );

        let summary = fx
            .harvest(lookup.clone())
            .with_max_in_flight(2)
            .run()
            .await
            .unwrap();

        assert_eq!(summary.generations, 1);
        assert_eq!(summary.batches_retired, 2);
        assert_eq!(lookup.calls(), vec!["alice", "bob", "carol"]);
        assert!(fx.processed("a.csv") && fx.processed("b.csv"));
    }

    #[tokio::test]
    async fn transport_failures_do_not_block_retirement() {
        let fx = Fixture::new();
        fx.batch("b.csv", &["alice", "flaky"]);
        let lookup = Arc::new(MockLookup {
            transport_fail: vec!["flaky".into()],
            ..MockLookup::default().with("alice", (1, 1, 1))
        });

        let summary = fx.harvest(lookup).run().await.unwrap();

        assert_eq!(summary.transport_failures, 1);
        assert_eq!(summary.records_appended, 1);
        assert!(fx.processed("b.csv"));
    }

    /// Answers every key with the remote's lowercased spelling.
    struct LowercasingLookup;

    #[async_trait::async_trait]
    impl ProfileLookup for LowercasingLookup {
        async fn fetch(&self, key: &str) -> std::result::Result<ProfileRecord, FetchError> {
            Ok(ProfileRecord {
                username: key.to_lowercase(),
                followers: 7,
                ..ProfileRecord::default()
            })
        }
    }

    #[tokio::test]
    async fn records_are_keyed_by_the_requested_key() {
        let fx = Fixture::new();
        let lookup = Arc::new(LowercasingLookup);
        let harvest = || {
            HarvestLoop::new(
                fx.queue(),
                Arc::new(RecordStore::new(fx.results())),
                lookup.clone(),
            )
        };

        fx.batch("first.csv", &["Alice"]);
        harvest().run().await.unwrap();
        fx.batch("second.csv", &["Alice"]);
        let summary = harvest().run().await.unwrap();

        let rows = rows(&fx.results()).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].username, "Alice");
        assert_eq!(rows[0].followers, 7);
        assert_eq!(summary.keys_already_known, 1);
        assert_eq!(summary.records_appended, 0);
    }

    #[tokio::test]
    async fn empty_pending_dir_is_immediately_idle() {
        let fx = Fixture::new();
        let lookup = Arc::new(MockLookup::default());
        let summary = fx.harvest(lookup.clone()).run().await.unwrap();
        assert_eq!(summary, HarvestSummary::default());
        assert!(lookup.calls().is_empty());
        assert!(!fx.results().exists());
    }

    #[tokio::test]
    async fn store_failure_halts_without_retiring() {
        let fx = Fixture::new();
        fx.batch("b.csv", &["alice"]);
        let lookup = Arc::new(MockLookup::default().with("alice", (1, 1, 1)));

        // Parent directory does not exist, so every append fails.
        let store = Arc::new(RecordStore::new(fx.root.join("missing/dir/results.csv")));
        let err = HarvestLoop::new(fx.queue(), store, lookup)
            .run()
            .await
            .unwrap_err();

        assert!(matches!(err, HarvestError::StoreWrite { .. }));
        assert!(!fx.processed("b.csv"));
        assert_eq!(fx.queue().list_pending_batches().await.unwrap().len(), 1);
    }
}
