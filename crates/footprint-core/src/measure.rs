//! Measurement orchestration
//!
//! Drives one measurement pass over the registered resources. Every resource
//! is measured in isolation: an error, panic or timeout in one of them is
//! recorded in the report and never reaches its siblings, unless the caller
//! asked for fail-fast behaviour.
//!
//! The registry sits behind a read/write lock. A pass holds the read side for
//! its whole duration, so registration waits until running passes finish while
//! concurrent passes proceed together.

use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::registry::{ResourceEntry, ResourceRegistry};
use crate::report::{AggregateMeasurementError, Failure, MeasurementReport, MeasurementResult};
use crate::resource::{BackupResource, MeasureContext, MeasurementError, ResourceKey};

/// Which registered resources a pass measures
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Selection {
    /// Every registered resource
    #[default]
    All,
    /// Only the listed keys
    Only(BTreeSet<ResourceKey>),
}

impl Selection {
    /// Select only the given keys
    pub fn only<I, S>(keys: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let keys = keys
            .into_iter()
            .map(|k| ResourceKey::parse(k.as_ref()))
            .collect::<Result<BTreeSet<_>>>()?;
        Ok(Self::Only(keys))
    }

    /// Whether a key is selected
    pub fn includes(&self, key: &ResourceKey) -> bool {
        match self {
            Self::All => true,
            Self::Only(keys) => keys.contains(key),
        }
    }
}

/// How selected resources are scheduled
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExecutionMode {
    /// All selected resources run concurrently
    #[default]
    Parallel,
    /// One resource at a time, in registration order
    Sequential,
}

/// Options for a measurement pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MeasureOptions {
    /// Resources to measure
    pub include: Selection,

    /// Bound on each resource's measure call
    pub per_resource_timeout: Option<Duration>,

    /// Record failures and keep going, or abort at the first one
    pub continue_on_error: bool,

    /// Scheduling of the selected resources
    pub mode: ExecutionMode,
}

impl Default for MeasureOptions {
    fn default() -> Self {
        Self {
            include: Selection::All,
            per_resource_timeout: None,
            continue_on_error: true,
            mode: ExecutionMode::Parallel,
        }
    }
}

impl MeasureOptions {
    /// Restrict the pass to a selection
    pub fn with_include(mut self, include: Selection) -> Self {
        self.include = include;
        self
    }

    /// Bound each resource's measurement
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.per_resource_timeout = Some(timeout);
        self
    }

    /// Abort the pass at the first failure
    pub fn fail_fast(mut self) -> Self {
        self.continue_on_error = false;
        self
    }

    /// Set the execution mode
    pub fn with_mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Owns the registry and runs measurement passes over it
#[derive(Clone, Default)]
pub struct MeasurementService {
    registry: Arc<RwLock<ResourceRegistry>>,
}

impl MeasurementService {
    /// Create a service owning the given registry
    pub fn new(registry: ResourceRegistry) -> Self {
        Self {
            registry: Arc::new(RwLock::new(registry)),
        }
    }

    /// Shared handle to the registry
    pub fn registry(&self) -> Arc<RwLock<ResourceRegistry>> {
        Arc::clone(&self.registry)
    }

    /// Register a resource. Waits for running passes to finish.
    pub async fn register<R>(&self, resource: R) -> Result<()>
    where
        R: BackupResource + 'static,
    {
        self.registry.write().await.register(resource)
    }

    /// Register a shared resource handle. Waits for running passes to finish.
    pub async fn register_shared(&self, resource: Arc<dyn BackupResource>) -> Result<()> {
        self.registry.write().await.register_shared(resource)
    }

    /// Unregister a resource. Returns whether it was present.
    pub async fn unregister(&self, key: &str) -> bool {
        self.registry.write().await.unregister(key).is_some()
    }

    /// Registered keys in registration order
    pub async fn keys(&self) -> Vec<ResourceKey> {
        self.registry.read().await.keys()
    }

    /// Run one measurement pass.
    ///
    /// Selecting a key that is not registered fails with `NotFound` before
    /// anything is measured. With `continue_on_error` unset, the first failure
    /// ends the pass with `Error::Aborted` carrying the results gathered so far.
    pub async fn measure_all(
        &self,
        ctx: &MeasureContext,
        options: &MeasureOptions,
    ) -> Result<MeasurementReport> {
        let started_at = Utc::now();
        let start = Instant::now();

        // Held until the report is built so the registry cannot change mid-pass
        let registry = self.registry.read().await;

        if let Selection::Only(keys) = &options.include {
            if let Some(missing) = keys.iter().find(|k| !registry.contains(k.as_str())) {
                return Err(Error::not_found(missing.as_str()));
            }
        }

        let mut selected = Vec::new();
        let mut excluded = BTreeSet::new();
        for entry in registry.entries() {
            if options.include.includes(entry.key()) {
                selected.push(entry.clone());
            } else {
                excluded.insert(entry.key().clone());
            }
        }

        info!(
            "Measuring {} resources ({} excluded, {:?})",
            selected.len(),
            excluded.len(),
            options.mode
        );

        let ctx = Arc::new(ctx.clone());
        let pass = match options.mode {
            ExecutionMode::Sequential => measure_sequential(&selected, ctx, options).await,
            ExecutionMode::Parallel => measure_parallel(&selected, ctx, options).await,
        };

        let PassReport { report, aborted_by } =
            pass.into_report(excluded, started_at, start.elapsed());
        drop(registry);

        match aborted_by {
            Some((failed_key, failure)) => {
                warn!("Measurement pass aborted by {}", failed_key);
                Err(AggregateMeasurementError {
                    failed_key,
                    failure,
                    partial: report,
                }
                .into())
            }
            None => {
                info!(
                    "Measured {} bytes across {} resources ({} failed)",
                    report.total_bytes,
                    report.results.len(),
                    report.failed_keys.len()
                );
                Ok(report)
            }
        }
    }
}

/// Results of a pass, tagged with their registration index
struct PassResults {
    results: Vec<(usize, MeasurementResult)>,
    aborted_by: Option<(ResourceKey, Failure)>,
}

impl PassResults {
    fn new(capacity: usize) -> Self {
        Self {
            results: Vec::with_capacity(capacity),
            aborted_by: None,
        }
    }

    /// Record a result. Returns true when it should abort the pass.
    fn record(
        &mut self,
        index: usize,
        result: MeasurementResult,
        options: &MeasureOptions,
    ) -> bool {
        let aborts = self.aborted_by.is_none() && !options.continue_on_error;
        let aborts = match (aborts, result.failure()) {
            (true, Some(failure)) => {
                self.aborted_by = Some((result.key.clone(), failure.clone()));
                true
            }
            _ => false,
        };
        self.results.push((index, result));
        aborts
    }

    fn into_report(
        self,
        excluded: BTreeSet<ResourceKey>,
        started_at: chrono::DateTime<Utc>,
        duration: Duration,
    ) -> PassReport {
        let mut results = self.results;
        results.sort_by_key(|(index, _)| *index);
        let results = results.into_iter().map(|(_, result)| result).collect();

        PassReport {
            report: MeasurementReport::from_results(results, excluded, started_at, duration),
            aborted_by: self.aborted_by,
        }
    }
}

struct PassReport {
    report: MeasurementReport,
    aborted_by: Option<(ResourceKey, Failure)>,
}

async fn measure_sequential(
    selected: &[ResourceEntry],
    ctx: Arc<MeasureContext>,
    options: &MeasureOptions,
) -> PassResults {
    let mut pass = PassResults::new(selected.len());

    for (index, entry) in selected.iter().enumerate() {
        let result = run_measurement(
            Arc::clone(entry.resource()),
            entry.key().clone(),
            Arc::clone(&ctx),
            options.per_resource_timeout,
        )
        .await;

        if pass.record(index, result, options) {
            break;
        }
    }

    pass
}

async fn measure_parallel(
    selected: &[ResourceEntry],
    ctx: Arc<MeasureContext>,
    options: &MeasureOptions,
) -> PassResults {
    let mut pass = PassResults::new(selected.len());
    let mut tasks = JoinSet::new();
    let mut pending = HashMap::with_capacity(selected.len());

    for (index, entry) in selected.iter().enumerate() {
        let resource = Arc::clone(entry.resource());
        let key = entry.key().clone();
        let ctx = Arc::clone(&ctx);
        let timeout = options.per_resource_timeout;
        let handle = tasks.spawn(run_measurement(resource, key, ctx, timeout));
        pending.insert(handle.id(), (index, entry));
    }

    while let Some(joined) = tasks.join_next_with_id().await {
        let (id, result) = match joined {
            Ok((id, result)) => (id, Ok(result)),
            Err(err) => (err.id(), Err(err)),
        };
        let Some((index, entry)) = pending.remove(&id) else {
            continue;
        };

        let result = result.unwrap_or_else(|err| {
            let error = if err.is_cancelled() {
                MeasurementError::Cancelled
            } else {
                MeasurementError::Panicked(panic_message(err.into_panic().as_ref()))
            };
            debug!("Resource {} did not finish: {}", entry.key(), error);
            MeasurementResult::failed(entry.key().clone(), &error)
                .with_encryption(encryption_flag(entry.resource().as_ref()).unwrap_or(false))
        });

        if pass.record(index, result, options) {
            tasks.abort_all();
        }
    }

    pass
}

/// Measure one resource, converting errors, panics and timeouts into a result
async fn run_measurement(
    resource: Arc<dyn BackupResource>,
    key: ResourceKey,
    ctx: Arc<MeasureContext>,
    timeout: Option<Duration>,
) -> MeasurementResult {
    let start = Instant::now();

    let (requires_encryption, measured) = match encryption_flag(resource.as_ref()) {
        Ok(flag) => (flag, measure_guarded(resource.as_ref(), &ctx, timeout).await),
        Err(err) => (false, Err(err)),
    };

    let result = match measured {
        Ok(bytes) => {
            debug!("Resource {} measured {} bytes", key, bytes);
            MeasurementResult::measured(key, bytes)
        }
        Err(err) => {
            warn!("Resource {} failed to measure: {}", key, err);
            MeasurementResult::failed(key, &err)
        }
    };

    result
        .with_encryption(requires_encryption)
        .with_elapsed(start.elapsed())
}

fn encryption_flag(
    resource: &dyn BackupResource,
) -> std::result::Result<bool, MeasurementError> {
    panic::catch_unwind(AssertUnwindSafe(|| resource.requires_encryption()))
        .map_err(|payload| MeasurementError::Panicked(panic_message(payload.as_ref())))
}

// Calling `measure` happens inside the guarded future, so a panic raised
// before the returned future is first polled is caught too.
async fn measure_guarded(
    resource: &dyn BackupResource,
    ctx: &MeasureContext,
    timeout: Option<Duration>,
) -> std::result::Result<u64, MeasurementError> {
    let guarded = AssertUnwindSafe(async { resource.measure(ctx).await }).catch_unwind();
    let caught = match timeout {
        Some(limit) => tokio::time::timeout(limit, guarded)
            .await
            .unwrap_or_else(|_| Ok(Err(MeasurementError::Timeout(limit)))),
        None => guarded.await,
    };

    caught.unwrap_or_else(|payload| {
        Err(MeasurementError::Panicked(panic_message(payload.as_ref())))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::FailureKind;
    use async_trait::async_trait;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::atomic::{AtomicBool, Ordering};

    enum Behaviour {
        Bytes(u64),
        Fail,
        Panic,
        Sleep(Duration, u64),
    }

    struct Fake {
        key: &'static str,
        behaviour: Behaviour,
        finished: Arc<AtomicBool>,
    }

    fn fake(key: &'static str, behaviour: Behaviour) -> Fake {
        Fake {
            key,
            behaviour,
            finished: Arc::new(AtomicBool::new(false)),
        }
    }

    #[async_trait]
    impl BackupResource for Fake {
        fn key(&self) -> &str {
            self.key
        }

        async fn measure(
            &self,
            _ctx: &MeasureContext,
        ) -> std::result::Result<u64, MeasurementError> {
            let outcome = match self.behaviour {
                Behaviour::Bytes(bytes) => Ok(bytes),
                Behaviour::Fail => Err(MeasurementError::failed("disk unreadable")),
                Behaviour::Panic => panic!("resource exploded"),
                Behaviour::Sleep(duration, bytes) => {
                    tokio::time::sleep(duration).await;
                    Ok(bytes)
                }
            };
            self.finished.store(true, Ordering::SeqCst);
            outcome
        }
    }

    /// Panics while building its future, before anything is polled
    struct EagerPanic;

    impl BackupResource for EagerPanic {
        fn key(&self) -> &str {
            "eager"
        }

        fn measure<'life0, 'life1, 'async_trait>(
            &'life0 self,
            _ctx: &'life1 MeasureContext,
        ) -> Pin<
            Box<
                dyn Future<Output = std::result::Result<u64, MeasurementError>>
                    + Send
                    + 'async_trait,
            >,
        >
        where
            'life0: 'async_trait,
            'life1: 'async_trait,
        {
            panic!("panicked before polling")
        }
    }

    struct FlagPanic;

    #[async_trait]
    impl BackupResource for FlagPanic {
        fn key(&self) -> &str {
            "flag"
        }

        fn requires_encryption(&self) -> bool {
            panic!("flag lookup exploded")
        }

        async fn measure(
            &self,
            _ctx: &MeasureContext,
        ) -> std::result::Result<u64, MeasurementError> {
            Ok(5)
        }
    }

    fn ctx() -> MeasureContext {
        MeasureContext::new("/profile")
    }

    async fn service(resources: Vec<Fake>) -> MeasurementService {
        let service = MeasurementService::default();
        for resource in resources {
            service.register(resource).await.unwrap();
        }
        service
    }

    #[tokio::test]
    async fn test_measure_all_default_options() {
        let service = service(vec![
            fake("fake1", Behaviour::Bytes(10_000)),
            fake("fake2", Behaviour::Bytes(20_000)),
            fake("fake3", Behaviour::Bytes(30_000)),
        ])
        .await;

        let report = service
            .measure_all(&ctx(), &MeasureOptions::default())
            .await
            .unwrap();

        assert_eq!(report.total_bytes, 60_000);
        assert!(report.failed_keys.is_empty());
        let keys: Vec<&str> = report.results.iter().map(|r| r.key.as_str()).collect();
        assert_eq!(keys, vec!["fake1", "fake2", "fake3"]);
    }

    #[tokio::test]
    async fn test_failure_is_recorded_not_thrown() {
        let service = service(vec![
            fake("fake1", Behaviour::Bytes(10)),
            fake("fake2", Behaviour::Fail),
            fake("fake3", Behaviour::Bytes(30)),
        ])
        .await;

        for mode in [ExecutionMode::Parallel, ExecutionMode::Sequential] {
            let options = MeasureOptions::default().with_mode(mode);
            let report = service.measure_all(&ctx(), &options).await.unwrap();

            assert_eq!(report.total_bytes, 40);
            assert_eq!(report.failed_keys.len(), 1);
            let failure = report.get("fake2").unwrap().failure().unwrap();
            assert_eq!(failure.kind, FailureKind::Error);
            assert!(failure.message.contains("disk unreadable"));
        }
    }

    #[tokio::test]
    async fn test_panic_is_isolated() {
        let service = service(vec![
            fake("fake1", Behaviour::Panic),
            fake("fake2", Behaviour::Bytes(20)),
        ])
        .await;

        let report = service
            .measure_all(&ctx(), &MeasureOptions::default())
            .await
            .unwrap();

        assert_eq!(report.total_bytes, 20);
        let failure = report.get("fake1").unwrap().failure().unwrap();
        assert_eq!(failure.kind, FailureKind::Panic);
        assert!(failure.message.contains("resource exploded"));
    }

    #[tokio::test]
    async fn test_panic_outside_async_body_is_isolated() {
        let service = service(vec![fake("good", Behaviour::Bytes(10))]).await;
        service.register(EagerPanic).await.unwrap();
        service.register(FlagPanic).await.unwrap();

        for mode in [ExecutionMode::Parallel, ExecutionMode::Sequential] {
            let options = MeasureOptions::default().with_mode(mode);
            let report = service.measure_all(&ctx(), &options).await.unwrap();

            assert_eq!(report.results.len(), 3);
            assert_eq!(report.total_bytes, 10);
            let failed: Vec<&str> = report.failed_keys.iter().map(|k| k.as_str()).collect();
            assert_eq!(failed, vec!["eager", "flag"]);

            let eager = report.get("eager").unwrap().failure().unwrap();
            assert_eq!(eager.kind, FailureKind::Panic);
            assert!(eager.message.contains("panicked before polling"));
            let flag = report.get("flag").unwrap();
            assert_eq!(flag.failure().unwrap().kind, FailureKind::Panic);
            assert!(!flag.requires_encryption);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_cancels_only_slow_resource() {
        let slow = fake("slow", Behaviour::Sleep(Duration::from_secs(10), 1));
        let slow_finished = Arc::clone(&slow.finished);
        let service = service(vec![
            slow,
            fake("quick", Behaviour::Sleep(Duration::from_millis(10), 5)),
        ])
        .await;

        let options = MeasureOptions::default().with_timeout(Duration::from_secs(1));
        let report = service.measure_all(&ctx(), &options).await.unwrap();

        assert_eq!(report.total_bytes, 5);
        assert_eq!(
            report.get("slow").unwrap().failure().unwrap().kind,
            FailureKind::Timeout
        );
        assert!(!slow_finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_parallel_mode_runs_concurrently() {
        let service = service(vec![
            fake("fake1", Behaviour::Sleep(Duration::from_secs(1), 1)),
            fake("fake2", Behaviour::Sleep(Duration::from_secs(1), 2)),
            fake("fake3", Behaviour::Sleep(Duration::from_secs(1), 3)),
        ])
        .await;

        let start = tokio::time::Instant::now();
        let report = service
            .measure_all(&ctx(), &MeasureOptions::default())
            .await
            .unwrap();

        assert_eq!(report.total_bytes, 6);
        assert!(start.elapsed() < Duration::from_secs(2));
    }

    #[tokio::test]
    async fn test_fail_fast_sequential_keeps_earlier_results() {
        let third = fake("fake3", Behaviour::Bytes(30));
        let third_finished = Arc::clone(&third.finished);
        let service = service(vec![
            fake("fake1", Behaviour::Bytes(10)),
            fake("fake2", Behaviour::Fail),
            third,
        ])
        .await;

        let options = MeasureOptions::default()
            .with_mode(ExecutionMode::Sequential)
            .fail_fast();
        let err = service.measure_all(&ctx(), &options).await.unwrap_err();

        let Error::Aborted(aggregate) = err else {
            panic!("expected aborted pass");
        };
        assert_eq!(aggregate.failed_key.as_str(), "fake2");
        assert_eq!(aggregate.partial.total_bytes, 10);
        assert!(aggregate.partial.get("fake1").unwrap().is_success());
        assert!(aggregate.partial.get("fake3").is_none());
        assert!(!third_finished.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_fail_fast_parallel_aborts_pending() {
        let slow = fake("slow", Behaviour::Sleep(Duration::from_secs(60), 1));
        let slow_finished = Arc::clone(&slow.finished);
        let service = service(vec![
            fake("fake1", Behaviour::Bytes(10)),
            fake("broken", Behaviour::Fail),
            slow,
        ])
        .await;

        let options = MeasureOptions::default().fail_fast();
        let err = service.measure_all(&ctx(), &options).await.unwrap_err();

        let partial = err.partial_report().unwrap();
        assert!(partial.failed_keys.iter().any(|k| k.as_str() == "broken"));
        let slow = partial.get("slow").unwrap().failure().unwrap();
        assert_eq!(slow.kind, FailureKind::Cancelled);
        assert!(!slow_finished.load(Ordering::SeqCst));
        match err {
            Error::Aborted(aggregate) => assert_eq!(aggregate.failed_key.as_str(), "broken"),
            other => panic!("expected aborted pass, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_include_restricts_pass() {
        let service = service(vec![
            fake("fake1", Behaviour::Bytes(10)),
            fake("fake2", Behaviour::Bytes(20)),
            fake("fake3", Behaviour::Bytes(30)),
        ])
        .await;

        let options =
            MeasureOptions::default().with_include(Selection::only(["fake1", "fake3"]).unwrap());
        let report = service.measure_all(&ctx(), &options).await.unwrap();

        assert_eq!(report.total_bytes, 40);
        assert_eq!(report.results.len(), 2);
        assert_eq!(
            report.excluded_keys.iter().map(|k| k.as_str()).collect::<Vec<_>>(),
            vec!["fake2"]
        );
    }

    #[tokio::test]
    async fn test_include_unknown_key_is_not_found() {
        let service = service(vec![fake("fake1", Behaviour::Bytes(10))]).await;

        let options =
            MeasureOptions::default().with_include(Selection::only(["missing"]).unwrap());
        let err = service.measure_all(&ctx(), &options).await.unwrap_err();

        assert!(matches!(err, Error::NotFound { ref key } if key == "missing"));
    }

    #[tokio::test]
    async fn test_empty_registry_yields_empty_report() {
        let service = MeasurementService::default();
        let report = service
            .measure_all(&ctx(), &MeasureOptions::default())
            .await
            .unwrap();

        assert_eq!(report.total_bytes, 0);
        assert!(report.results.is_empty());
        assert!(report.is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn test_registration_waits_for_running_pass() {
        let slow = fake("slow", Behaviour::Sleep(Duration::from_secs(5), 1));
        let slow_finished = Arc::clone(&slow.finished);
        let service = service(vec![slow]).await;

        let pass = {
            let service = service.clone();
            tokio::spawn(async move {
                service
                    .measure_all(&ctx(), &MeasureOptions::default())
                    .await
            })
        };

        tokio::time::sleep(Duration::from_millis(100)).await;
        service
            .register(fake("late", Behaviour::Bytes(1)))
            .await
            .unwrap();

        assert!(slow_finished.load(Ordering::SeqCst));
        let report = pass.await.unwrap().unwrap();
        assert!(report.get("late").is_none());
        assert_eq!(service.keys().await.len(), 2);
    }

    #[tokio::test]
    async fn test_unregister_then_measure() {
        let service = service(vec![
            fake("fake1", Behaviour::Bytes(10)),
            fake("fake2", Behaviour::Bytes(20)),
        ])
        .await;

        assert!(service.unregister("fake1").await);
        assert!(!service.unregister("fake1").await);

        let report = service
            .measure_all(&ctx(), &MeasureOptions::default())
            .await
            .unwrap();
        assert_eq!(report.total_bytes, 20);
    }
}
