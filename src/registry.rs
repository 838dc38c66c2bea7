//! Target registry.
//!
//! The [`Registry`] owns every target together with its worker and history.
//! All operations run under one exclusive lock that is held only for the
//! map and counter work; no network I/O happens while it is held, so a hung
//! fetch never blocks registry callers.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::Mutex;

use crate::executor::FetchExecutor;
use crate::history::{FetchRecord, HistoryLog, Retention};
use crate::target::{Target, TargetSpec, TargetSummary, ValidationError};
use crate::worker::{Worker, WorkerHandle, WorkerState};

/// Default timeout for graceful shutdown (5 seconds).
pub const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// Errors returned by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// The candidate target failed field validation.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// No target is registered under this id.
    #[error("target with id {0} does not exist")]
    NotFound(u64),

    /// Workers did not stop within the shutdown timeout.
    #[error("timed out after {0:?} waiting for workers to stop")]
    ShutdownTimeout(Duration),
}

/// One registered target and the worker polling it.
struct Entry {
    id: u64,
    url: String,
    interval: u32,
    history: HistoryLog,
    worker: WorkerHandle,
}

impl Entry {
    fn snapshot(&self) -> Target {
        Target {
            id: self.id,
            url: self.url.clone(),
            interval: self.interval,
            history: self.history.snapshot(),
        }
    }

    fn summary(&self) -> TargetSummary {
        TargetSummary {
            id: self.id,
            url: self.url.clone(),
            interval: self.interval,
        }
    }
}

struct Targets {
    entries: BTreeMap<u64, Entry>,
    next_id: u64,
}

/// Concurrent store of targets.
///
/// Cheap to clone; clones share the same targets.
#[derive(Clone)]
pub struct Registry {
    targets: Arc<Mutex<Targets>>,
    executor: Arc<dyn FetchExecutor>,
    retention: Retention,
}

impl Registry {
    /// Create an empty registry whose workers fetch through `executor`.
    pub fn new(executor: Arc<dyn FetchExecutor>) -> Self {
        Self {
            targets: Arc::new(Mutex::new(Targets {
                entries: BTreeMap::new(),
                next_id: 1,
            })),
            executor,
            retention: Retention::default(),
        }
    }

    /// Set the retention policy applied to newly created histories.
    pub fn with_retention(mut self, retention: Retention) -> Self {
        self.retention = retention;
        self
    }

    /// Register a new target and start polling it.
    ///
    /// Any id in `spec` is ignored; the assigned id is returned.
    ///
    /// # Errors
    /// Returns `RegistryError::Validation` if `spec` has invalid fields.
    pub async fn register(&self, spec: TargetSpec) -> Result<u64, RegistryError> {
        spec.validate()?;

        let mut targets = self.targets.lock().await;
        let id = targets.next_id;
        targets.next_id += 1;

        let entry = self.start(id, spec, HistoryLog::new(self.retention));
        tracing::info!(target_id = id, url = %entry.url, interval = entry.interval, "Target registered");
        targets.entries.insert(id, entry);

        Ok(id)
    }

    /// All targets ordered by id, without their histories.
    pub async fn list(&self) -> Vec<TargetSummary> {
        let targets = self.targets.lock().await;
        targets.entries.values().map(Entry::summary).collect()
    }

    /// The target stored under `id`, without its history.
    ///
    /// Use [`Registry::history`] for the fetch records.
    pub async fn get(&self, id: u64) -> Result<TargetSummary, RegistryError> {
        let targets = self.targets.lock().await;
        targets
            .entries
            .get(&id)
            .map(Entry::summary)
            .ok_or(RegistryError::NotFound(id))
    }

    /// Copy of the fetch history of the target stored under `id`.
    pub async fn history(&self, id: u64) -> Result<Vec<FetchRecord>, RegistryError> {
        let targets = self.targets.lock().await;
        targets
            .entries
            .get(&id)
            .map(|entry| entry.history.snapshot())
            .ok_or(RegistryError::NotFound(id))
    }

    /// Replace the target stored under `id`, keeping its history.
    ///
    /// The old worker is cancelled before the replacement starts. A fetch it
    /// still has in flight completes into the old history, which is no
    /// longer reachable.
    ///
    /// # Errors
    /// Returns `RegistryError::Validation` for invalid fields (including a
    /// zero id) and `RegistryError::NotFound` for an unknown id.
    pub async fn update(&self, id: u64, spec: TargetSpec) -> Result<u64, RegistryError> {
        spec.validate_for_update(id)?;

        let mut targets = self.targets.lock().await;
        let Some(entry) = targets.entries.get_mut(&id) else {
            return Err(RegistryError::NotFound(id));
        };

        entry.worker.cancel();
        let history = entry.history.fork();
        *entry = self.start(id, spec, history);

        tracing::info!(target_id = id, url = %entry.url, interval = entry.interval, "Target updated");
        Ok(id)
    }

    /// Remove the target stored under `id` and stop its worker.
    ///
    /// Returns the removed target with its full history.
    pub async fn remove(&self, id: u64) -> Result<Target, RegistryError> {
        let mut targets = self.targets.lock().await;
        let entry = targets
            .entries
            .remove(&id)
            .ok_or(RegistryError::NotFound(id))?;

        entry.worker.cancel();
        tracing::info!(target_id = id, "Target removed");
        Ok(entry.snapshot())
    }

    /// Lifecycle state of the worker polling `id`.
    pub async fn worker_state(&self, id: u64) -> Result<WorkerState, RegistryError> {
        let targets = self.targets.lock().await;
        targets
            .entries
            .get(&id)
            .map(|entry| entry.worker.state())
            .ok_or(RegistryError::NotFound(id))
    }

    /// Number of registered targets.
    pub async fn len(&self) -> usize {
        self.targets.lock().await.entries.len()
    }

    /// Whether no targets are registered.
    pub async fn is_empty(&self) -> bool {
        self.targets.lock().await.entries.is_empty()
    }

    /// Remove every target and wait for their workers to stop, with the
    /// default timeout.
    pub async fn shutdown(&self) -> Result<(), RegistryError> {
        self.shutdown_with_timeout(DEFAULT_SHUTDOWN_TIMEOUT).await
    }

    /// Remove every target and wait up to `timeout` for their workers to stop.
    ///
    /// The id counter is not reset.
    pub async fn shutdown_with_timeout(&self, timeout: Duration) -> Result<(), RegistryError> {
        let entries = {
            let mut targets = self.targets.lock().await;
            std::mem::take(&mut targets.entries)
        };
        let count = entries.len();

        for entry in entries.values() {
            entry.worker.cancel();
        }

        let all_stopped = async {
            for entry in entries.values() {
                entry.worker.stopped().await;
            }
        };

        match tokio::time::timeout(timeout, all_stopped).await {
            Ok(()) => {
                tracing::info!(worker_count = count, "Registry shutdown complete");
                Ok(())
            }
            Err(_) => {
                let lagging: Vec<u64> = entries
                    .values()
                    .filter(|entry| entry.worker.state() != WorkerState::Stopped)
                    .map(|entry| entry.worker.target_id())
                    .collect();
                tracing::warn!(worker_count = count, ?lagging, "Registry shutdown timed out");
                Err(RegistryError::ShutdownTimeout(timeout))
            }
        }
    }

    // --- Private helpers ---

    fn start(&self, id: u64, spec: TargetSpec, history: HistoryLog) -> Entry {
        let worker = Worker::new(
            id,
            spec.url.clone(),
            Duration::from_secs(u64::from(spec.interval)),
            Arc::clone(&self.executor),
            history.clone(),
        )
        .spawn();

        Entry {
            id,
            url: spec.url,
            interval: spec.interval,
            history,
            worker,
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field(
                "target_count",
                &self.targets.try_lock().map(|t| t.entries.len()).unwrap_or(0),
            )
            .field("retention", &self.retention)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::FetchError;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers instantly with the URL echoed back and counts calls.
    #[derive(Default)]
    struct EchoExecutor {
        calls: AtomicUsize,
    }

    #[async_trait::async_trait]
    impl FetchExecutor for EchoExecutor {
        async fn fetch(&self, url: &str) -> Result<String, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(url.to_string())
        }
    }

    /// Never completes a fetch.
    struct HungExecutor;

    #[async_trait::async_trait]
    impl FetchExecutor for HungExecutor {
        async fn fetch(&self, _url: &str) -> Result<String, FetchError> {
            std::future::pending().await
        }
    }

    fn registry() -> (Registry, Arc<EchoExecutor>) {
        let executor = Arc::new(EchoExecutor::default());
        (Registry::new(executor.clone()), executor)
    }

    #[tokio::test(start_paused = true)]
    async fn test_ids_start_at_one_and_increase() {
        let (registry, _) = registry();

        for expected in 1..=3 {
            let id = registry
                .register(TargetSpec::new("http://example.test", 5).with_id(42))
                .await
                .unwrap();
            assert_eq!(id, expected);
        }

        registry.remove(3).await.unwrap();
        let id = registry
            .register(TargetSpec::new("http://example.test", 5))
            .await
            .unwrap();
        assert_eq!(id, 4);
    }

    #[tokio::test]
    async fn test_concurrent_register_assigns_unique_ids() {
        let (registry, _) = registry();

        let tasks: Vec<_> = (0..50)
            .map(|i| {
                let registry = registry.clone();
                tokio::spawn(async move {
                    registry
                        .register(TargetSpec::new(format!("http://t{i}.test"), 60))
                        .await
                        .unwrap()
                })
            })
            .collect();

        let mut ids = HashSet::new();
        for task in tasks {
            assert!(ids.insert(task.await.unwrap()));
        }

        assert_eq!(ids, (1..=50).collect::<HashSet<u64>>());
        assert_eq!(registry.len().await, 50);

        registry.shutdown().await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_register_rejects_invalid_spec() {
        let (registry, executor) = registry();

        let err = registry.register(TargetSpec::new("", 0)).await.unwrap_err();
        match err {
            RegistryError::Validation(e) => {
                assert!(e.has_field("url"));
                assert!(e.has_field("interval"));
            }
            other => panic!("expected validation error, got {other:?}"),
        }

        assert!(registry.is_empty().await);
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(executor.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_sorted_by_id() {
        let (registry, _) = registry();
        for i in 0..5 {
            registry
                .register(TargetSpec::new(format!("http://t{i}.test"), 10))
                .await
                .unwrap();
        }
        registry.remove(2).await.unwrap();
        registry.remove(4).await.unwrap();
        registry.register(TargetSpec::new("http://late.test", 10)).await.unwrap();

        let ids: Vec<u64> = registry.list().await.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 3, 5, 6]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_get_and_not_found() {
        let (registry, _) = registry();
        let id = registry
            .register(TargetSpec::new("http://example.test", 7))
            .await
            .unwrap();

        let target = registry.get(id).await.unwrap();
        assert_eq!(target.url, "http://example.test");
        assert_eq!(target.interval, 7);

        assert!(matches!(
            registry.get(99).await,
            Err(RegistryError::NotFound(99))
        ));
        assert!(matches!(
            registry.history(99).await,
            Err(RegistryError::NotFound(99))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_history_follows_schedule() {
        let (registry, _) = registry();
        let id = registry
            .register(TargetSpec::new("http://example.test", 5))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(12)).await;

        let history = registry.history(id).await.unwrap();
        assert_eq!(history.len(), 3);
        assert!(history.iter().all(|r| r.response() == Some("http://example.test")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_preserves_history() {
        let (registry, executor) = registry();
        let id = registry
            .register(TargetSpec::new("http://old.test", 3600))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(1)).await;
        let before = registry.history(id).await.unwrap();
        assert_eq!(before.len(), 1);

        let updated = registry
            .update(id, TargetSpec::new("http://new.test", 7200))
            .await
            .unwrap();
        assert_eq!(updated, id);

        let target = registry.get(id).await.unwrap();
        assert_eq!(target.url, "http://new.test");
        assert_eq!(target.interval, 7200);
        assert_eq!(registry.history(id).await.unwrap()[..before.len()], before[..]);

        // The replacement worker fetches immediately, from the new URL.
        tokio::time::sleep(Duration::from_secs(1)).await;
        let after = registry.history(id).await.unwrap();
        assert_eq!(after.len(), 2);
        assert_eq!(after[0], before[0]);
        assert_eq!(after[1].response(), Some("http://new.test"));
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_replaces_worker() {
        let (registry, executor) = registry();
        let id = registry
            .register(TargetSpec::new("http://example.test", 1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(500)).await;

        registry
            .update(id, TargetSpec::new("http://example.test", 100))
            .await
            .unwrap();
        assert_ne!(registry.worker_state(id).await.unwrap(), WorkerState::Stopped);

        // Only the new worker's 100s cadence remains: the immediate fetch and nothing else.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(executor.calls.load(Ordering::SeqCst), 2);
        assert_eq!(registry.worker_state(id).await.unwrap(), WorkerState::Running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_unknown_id_leaves_state_unchanged() {
        let (registry, _) = registry();
        registry
            .register(TargetSpec::new("http://example.test", 5))
            .await
            .unwrap();
        let before: Vec<_> = registry.list().await.iter().map(|t| (t.id, t.url.clone())).collect();

        let err = registry
            .update(7, TargetSpec::new("http://other.test", 5))
            .await
            .unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(7)));

        let after: Vec<_> = registry.list().await.iter().map(|t| (t.id, t.url.clone())).collect();
        assert_eq!(before, after);
    }

    #[tokio::test(start_paused = true)]
    async fn test_update_validation_reports_all_fields() {
        let (registry, _) = registry();
        let err = registry
            .update(0, TargetSpec::new("", 0))
            .await
            .unwrap_err();

        let RegistryError::Validation(e) = err else {
            panic!("expected validation error");
        };
        assert!(e.has_field("id"));
        assert!(e.has_field("url"));
        assert!(e.has_field("interval"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_stops_worker_and_returns_history() {
        let (registry, executor) = registry();
        let first = registry
            .register(TargetSpec::new("http://one.test", 2))
            .await
            .unwrap();
        let second = registry
            .register(TargetSpec::new("http://two.test", 2))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_secs(3)).await;
        let removed = registry.remove(first).await.unwrap();
        assert_eq!(removed.id, first);
        assert_eq!(removed.history.len(), 2);

        assert!(matches!(
            registry.get(first).await,
            Err(RegistryError::NotFound(_))
        ));
        assert_eq!(registry.get(second).await.unwrap().url, "http://two.test");

        // 4 calls so far (2 per target); afterwards only the second target ticks.
        tokio::time::sleep(Duration::from_secs(4)).await;
        assert_eq!(executor.calls.load(Ordering::SeqCst), 6);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_unknown_id() {
        let (registry, _) = registry();
        registry
            .register(TargetSpec::new("http://example.test", 5))
            .await
            .unwrap();

        assert!(matches!(
            registry.remove(2).await,
            Err(RegistryError::NotFound(2))
        ));
        assert_eq!(registry.len().await, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retention_applies_to_targets() {
        let executor = Arc::new(EchoExecutor::default());
        let registry = Registry::new(executor).with_retention(Retention::MaxRecords(2));
        let id = registry
            .register(TargetSpec::new("http://example.test", 1))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(4500)).await;
        assert_eq!(registry.history(id).await.unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_mutations_keep_map_consistent() {
        let (registry, _) = registry();
        for i in 0..10 {
            registry
                .register(TargetSpec::new(format!("http://t{i}.test"), 5))
                .await
                .unwrap();
        }

        let mut tasks = Vec::new();
        for id in 1..=10u64 {
            let registry = registry.clone();
            tasks.push(tokio::spawn(async move {
                if id % 2 == 0 {
                    registry.remove(id).await.map(|_| ())
                } else {
                    registry
                        .update(id, TargetSpec::new(format!("http://u{id}.test"), 9))
                        .await
                        .map(|_| ())
                }
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        let targets = registry.list().await;
        let ids: Vec<u64> = targets.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 3, 5, 7, 9]);
        assert!(targets.iter().all(|t| t.interval == 9 && t.url == format!("http://u{}.test", t.id)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_hung_fetches_never_block_operations_on_one_id() {
        let registry = Registry::new(Arc::new(HungExecutor));
        let id = registry
            .register(TargetSpec::new("http://hung.test", 1))
            .await
            .unwrap();

        let contended = async {
            let tasks: Vec<_> = (0..200u32)
                .map(|i| {
                    let registry = registry.clone();
                    tokio::spawn(async move {
                        match i % 3 {
                            0 => {
                                let url = format!("http://hung{i}.test");
                                registry
                                    .update(id, TargetSpec::new(url, 1 + i % 5))
                                    .await
                                    .unwrap();
                            }
                            1 => {
                                let target = registry.get(id).await.unwrap();
                                assert_eq!(target.id, id);
                                assert!(target.url.starts_with("http://hung"));
                            }
                            _ => assert_eq!(registry.list().await.len(), 1),
                        }
                    })
                })
                .collect();
            for task in tasks {
                task.await.unwrap();
            }

            let removed = registry.remove(id).await.unwrap();
            assert!(removed.history.is_empty());
        };

        tokio::time::timeout(Duration::from_secs(5), contended)
            .await
            .expect("registry operations blocked behind hung fetches");
        assert!(registry.is_empty().await);
        assert!(matches!(
            registry.update(id, TargetSpec::new("http://late.test", 1)).await,
            Err(RegistryError::NotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_list_and_get_carry_no_history() {
        let (registry, _) = registry();
        let id = registry
            .register(TargetSpec::new("http://example.test", 1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(3500)).await;
        assert_eq!(registry.history(id).await.unwrap().len(), 4);

        let expected = TargetSummary {
            id,
            url: "http://example.test".to_string(),
            interval: 1,
        };
        assert_eq!(registry.get(id).await.unwrap(), expected);
        assert_eq!(registry.list().await, vec![expected]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_stops_all_workers() {
        let (registry, executor) = registry();
        for i in 0..3 {
            registry
                .register(TargetSpec::new(format!("http://t{i}.test"), 1))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(100)).await;

        registry.shutdown().await.unwrap();
        assert!(registry.is_empty().await);

        let calls = executor.calls.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(executor.calls.load(Ordering::SeqCst), calls);
    }
}
