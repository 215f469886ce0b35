//! The per service-type worker loop.
//!
//! One cycle walks every enabled instance sequentially. Per instance the
//! gates run strictly in order: connectivity, download queue size, hourly
//! budget, then candidate selection and search triggering per intent.
//! Between cycles the worker polls its [`CycleClock`](crate::storage::CycleClock)
//! on a short tick so a force-reset or shutdown is observed within one tick.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tokio_util::task::AbortOnDropHandle;

use super::error::WorkerError;
use super::retry::RetryPolicy;
use super::sampler::{CandidateSampler, DEFAULT_PAGE_SIZE};
use crate::adapter::{CandidateFilter, CatalogItem, ServiceAdapter};
use crate::config::{ConfigProvider, Instance, MarkPolicy, SearchOrder, ServiceConfig};
use crate::storage::{Intent, ServiceType, StorageHandles};

/// Delay before retrying after a cycle could not start (configuration
/// unreadable, service disabled, or no usable instance).
pub const CONFIG_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Pages the sequential strategy reads before giving up.
pub const SEQUENTIAL_MAX_PAGES: u32 = 10;

/// Candidates requested from the sampler per searched item, leaving room
/// for ledger hits.
const OVERSAMPLE_FACTOR: usize = 5;

const DEFAULT_TICK: Duration = Duration::from_secs(1);

/// What happened to one instance during a cycle.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum InstanceOutcome {
    /// Gates passed; counts of searches triggered per intent, and of
    /// searched items the ledger failed to record.
    Searched {
        missing: u32,
        upgrade: u32,
        ledger_failures: u32,
    },
    /// Connectivity check failed.
    Unreachable,
    /// Download queue at or above the configured limit.
    QueueFull { size: u64, limit: u64 },
    /// Hourly budget already spent.
    CapExceeded,
    /// Shutdown observed before the instance was processed.
    Cancelled,
    /// Processing aborted unexpectedly.
    Failed { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceReport {
    pub instance: String,
    pub outcome: InstanceOutcome,
}

/// Result of one cycle over all instances.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub instances: Vec<InstanceReport>,
}

impl CycleReport {
    /// Searches triggered across all instances and intents.
    pub fn searched(&self) -> u32 {
        self.instances
            .iter()
            .map(|r| match r.outcome {
                InstanceOutcome::Searched {
                    missing, upgrade, ..
                } => missing + upgrade,
                _ => 0,
            })
            .sum()
    }
}

struct HuntResult {
    searched: u32,
    ledger_failures: u32,
    cap_reached: bool,
}

/// Long-running worker for one service type.
#[derive(Clone)]
pub struct ServiceWorker {
    service_type: ServiceType,
    adapter: Arc<dyn ServiceAdapter>,
    storage: StorageHandles,
    config: Arc<dyn ConfigProvider>,
    cancel: CancellationToken,
    tick: Duration,
    page_size: u32,
}

impl std::fmt::Debug for ServiceWorker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceWorker")
            .field("service_type", &self.service_type)
            .field("tick", &self.tick)
            .field("page_size", &self.page_size)
            .finish_non_exhaustive()
    }
}

impl ServiceWorker {
    pub fn new(
        service_type: ServiceType,
        adapter: Arc<dyn ServiceAdapter>,
        storage: StorageHandles,
        config: Arc<dyn ConfigProvider>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            service_type,
            adapter,
            storage,
            config,
            cancel,
            tick: DEFAULT_TICK,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Set the sleep poll granularity.
    pub fn with_tick(mut self, tick: Duration) -> Self {
        self.tick = tick.max(Duration::from_millis(1));
        self
    }

    /// Set the catalog page size used for sampling and paging.
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn service_type(&self) -> ServiceType {
        self.service_type
    }

    /// Run cycles until cancelled.
    ///
    /// Returns `Err` only when the cycle clock cannot be written; the
    /// supervisor treats that as a crash.
    pub async fn run(self) -> Result<(), WorkerError> {
        let state = self.storage.clock.ensure(self.service_type).await?;
        tracing::info!(
            service = %self.service_type,
            next_run_at = %state.next_run_at,
            "Worker started"
        );

        while self.wait_until_due().await {
            self.cycle().await?;
        }

        tracing::info!(service = %self.service_type, "Worker stopped");
        Ok(())
    }

    /// Poll the clock until the next cycle is due. `false` on shutdown.
    async fn wait_until_due(&self) -> bool {
        loop {
            if self.cancel.is_cancelled() {
                return false;
            }

            match self.storage.clock.get(self.service_type).await {
                Ok(Some(state)) if state.is_due(Utc::now()) => return true,
                Ok(Some(_)) => {}
                Ok(None) => return true,
                Err(e) => {
                    tracing::warn!(service = %self.service_type, error = %e, "Cycle clock read failed");
                }
            }

            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = tokio::time::sleep(self.tick) => {}
            }
        }
    }

    /// Load configuration, run one cycle, schedule the next.
    async fn cycle(&self) -> Result<(), WorkerError> {
        let ty = self.service_type;

        let service = match self.config.load().await {
            Ok(config) => config.service(ty).cloned(),
            Err(e) => {
                tracing::warn!(service = %ty, error = %e, "Configuration load failed; cycle skipped");
                return self.postpone(CONFIG_RETRY_DELAY).await;
            }
        };
        let Some(service) = service.filter(|s| s.enabled) else {
            tracing::info!(service = %ty, "Service not configured or disabled; cycle skipped");
            return self.postpone(CONFIG_RETRY_DELAY).await;
        };

        self.storage.clock.start_cycle(ty).await?;
        let report = self.run_cycle(&service).await;

        let delay = if report.instances.is_empty() && !self.cancel.is_cancelled() {
            tracing::warn!(service = %ty, "No usable instance configured; cycle skipped");
            CONFIG_RETRY_DELAY
        } else {
            service.sleep
        };
        let next_run_at = after(Utc::now(), delay);
        self.storage.clock.end_cycle(ty, next_run_at).await?;

        tracing::info!(
            service = %ty,
            instances = report.instances.len(),
            searched = report.searched(),
            next_run_at = %next_run_at,
            "Cycle complete"
        );
        Ok(())
    }

    async fn postpone(&self, delay: Duration) -> Result<(), WorkerError> {
        self.storage
            .clock
            .end_cycle(self.service_type, after(Utc::now(), delay))
            .await?;
        Ok(())
    }

    /// Process every enabled instance once, sequentially.
    ///
    /// Each instance runs in its own task so a panic is contained to that
    /// instance. The task is aborted if this future is dropped.
    pub async fn run_cycle(&self, service: &ServiceConfig) -> CycleReport {
        let mut report = CycleReport::default();

        for instance in service.resolve_instances() {
            if self.cancel.is_cancelled() {
                tracing::info!(service = %self.service_type, "Shutdown observed; cycle cut short");
                report.instances.push(InstanceReport {
                    instance: instance.name,
                    outcome: InstanceOutcome::Cancelled,
                });
                break;
            }

            let worker = self.clone();
            let svc = service.clone();
            let target = instance.clone();
            let task = AbortOnDropHandle::new(tokio::spawn(async move {
                worker.process_instance(&target, &svc).await
            }));
            let outcome = task.await.unwrap_or_else(|e| {
                tracing::error!(
                    service = %self.service_type,
                    instance = %instance.name,
                    error = %e,
                    "Instance processing aborted"
                );
                InstanceOutcome::Failed {
                    error: e.to_string(),
                }
            });

            report.instances.push(InstanceReport {
                instance: instance.name,
                outcome,
            });
        }

        report
    }

    /// Run the gates and hunts for one instance.
    pub async fn process_instance(
        &self,
        instance: &Instance,
        service: &ServiceConfig,
    ) -> InstanceOutcome {
        let ty = self.service_type;
        let retry = RetryPolicy::new(service.retry_attempts, service.retry_delay);

        if let Err(e) = retry
            .run(&self.cancel, "check_connection", || {
                self.adapter.check_connection(instance)
            })
            .await
        {
            tracing::warn!(service = %ty, instance = %instance.name, error = %e, "Instance unreachable; skipping");
            return InstanceOutcome::Unreachable;
        }

        if let Some(limit) = service.queue_limit {
            match self.adapter.get_queue_size(instance).await {
                Ok(size) if size >= limit => {
                    tracing::info!(
                        service = %ty,
                        instance = %instance.name,
                        queue_size = size,
                        queue_limit = limit,
                        "Download queue full; skipping"
                    );
                    return InstanceOutcome::QueueFull { size, limit };
                }
                Ok(size) => {
                    tracing::debug!(service = %ty, instance = %instance.name, queue_size = size, "Queue gate passed");
                }
                Err(e) => {
                    tracing::warn!(
                        service = %ty,
                        instance = %instance.name,
                        error = %e,
                        "Queue size unknown; gate bypassed"
                    );
                }
            }
        }

        let cap = self.storage.limiter.status(ty, service.hourly_cap).await;
        if cap.exceeded {
            tracing::info!(
                service = %ty,
                instance = %instance.name,
                used = cap.used,
                limit = cap.limit,
                "Hourly cap reached; skipping"
            );
            return InstanceOutcome::CapExceeded;
        }

        let sampler = CandidateSampler::new(self.page_size, retry);
        let (mut missing, mut upgrade, mut ledger_failures) = (0, 0, 0);

        for intent in [Intent::Missing, Intent::Upgrade] {
            let volume = service.volume(intent);
            if volume == 0 || self.cancel.is_cancelled() {
                continue;
            }

            let candidates = self
                .select_candidates(&sampler, instance, service, intent, volume as usize)
                .await;
            if candidates.is_empty() {
                tracing::debug!(service = %ty, instance = %instance.name, intent = %intent, "No candidates");
                continue;
            }

            let result = self.hunt(instance, service, intent, candidates).await;
            match intent {
                Intent::Missing => missing = result.searched,
                Intent::Upgrade => upgrade = result.searched,
            }
            ledger_failures += result.ledger_failures;
            if result.cap_reached {
                break;
            }
        }

        InstanceOutcome::Searched {
            missing,
            upgrade,
            ledger_failures,
        }
    }

    /// Up to `volume` filter-passing candidates not yet in the ledger.
    async fn select_candidates(
        &self,
        sampler: &CandidateSampler,
        instance: &Instance,
        service: &ServiceConfig,
        intent: Intent,
        volume: usize,
    ) -> Vec<CatalogItem> {
        let filter = CandidateFilter {
            intent,
            monitored_only: service.monitored_only,
        };

        match service.search_order {
            SearchOrder::Random => {
                let want = volume
                    .saturating_mul(OVERSAMPLE_FACTOR)
                    .min(sampler.page_size() as usize);
                let sampled = sampler
                    .sample(self.adapter.as_ref(), instance, &filter, want, &self.cancel)
                    .await;

                let mut picked = Vec::with_capacity(volume);
                for item in sampled {
                    if picked.len() >= volume {
                        break;
                    }
                    if !self.is_processed(instance, &item).await {
                        picked.push(item);
                    }
                }
                picked
            }
            SearchOrder::Sequential => {
                let page_size = u64::from(sampler.page_size());
                let mut picked = Vec::with_capacity(volume);

                for page in 1..=SEQUENTIAL_MAX_PAGES {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    let Some(fetched) = sampler
                        .fetch_page(self.adapter.as_ref(), instance, page, &filter, &self.cancel)
                        .await
                    else {
                        break;
                    };

                    let fetched_len = fetched.records.len() as u64;
                    for item in fetched.records {
                        if picked.len() >= volume {
                            break;
                        }
                        if filter.accepts(&item) && !self.is_processed(instance, &item).await {
                            picked.push(item);
                        }
                    }

                    let exhausted =
                        fetched_len < page_size || u64::from(page) * page_size >= fetched.total_records;
                    if picked.len() >= volume || exhausted {
                        break;
                    }
                }
                picked
            }
        }
    }

    async fn is_processed(&self, instance: &Instance, item: &CatalogItem) -> bool {
        self.storage
            .ledger
            .is_processed(self.service_type, &instance.name, item.id)
            .await
    }

    /// Trigger searches for `candidates`, one command per item.
    ///
    /// The budget is checked before each trigger and charged only after the
    /// remote returned a command id.
    async fn hunt(
        &self,
        instance: &Instance,
        service: &ServiceConfig,
        intent: Intent,
        candidates: Vec<CatalogItem>,
    ) -> HuntResult {
        let ty = self.service_type;
        let mut searched = 0;
        let mut ledger_failures = 0;

        for item in candidates {
            if self.cancel.is_cancelled() {
                break;
            }
            if self.storage.limiter.is_exceeded(ty, service.hourly_cap).await {
                tracing::info!(service = %ty, instance = %instance.name, "Hourly cap reached mid-cycle");
                return HuntResult {
                    searched,
                    ledger_failures,
                    cap_reached: true,
                };
            }

            if service.mark_policy == MarkPolicy::BeforeTrigger
                && !self.mark(instance, item.id).await
            {
                ledger_failures += 1;
            }

            match self.adapter.trigger_search(instance, &[item.id]).await {
                Ok(Some(command_id)) => {
                    if service.mark_policy == MarkPolicy::AfterConfirm
                        && !self.mark(instance, item.id).await
                    {
                        ledger_failures += 1;
                    }
                    if let Err(e) = self.storage.limiter.increment(ty, 1).await {
                        tracing::warn!(service = %ty, error = %e, "Hourly cap increment failed");
                    }
                    if let Err(e) = self.storage.stats.record(ty, intent, 1).await {
                        tracing::warn!(service = %ty, error = %e, "Hunt statistics update failed");
                    }
                    searched += 1;

                    tracing::info!(
                        service = %ty,
                        instance = %instance.name,
                        intent = %intent,
                        item_id = item.id,
                        title = %item.title,
                        command_id,
                        "Search triggered"
                    );
                    self.await_command(instance, service, command_id).await;
                }
                Ok(None) => {
                    tracing::warn!(
                        service = %ty,
                        instance = %instance.name,
                        item_id = item.id,
                        "Search accepted without command id; not counted"
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        service = %ty,
                        instance = %instance.name,
                        item_id = item.id,
                        error = %e,
                        "Search trigger failed"
                    );
                }
            }
        }

        HuntResult {
            searched,
            ledger_failures,
            cap_reached: false,
        }
    }

    /// Record `item_id` in the ledger; `false` if the write failed.
    async fn mark(&self, instance: &Instance, item_id: i64) -> bool {
        let recorded = self
            .storage
            .ledger
            .add_processed(self.service_type, &instance.name, item_id)
            .await;
        if !recorded {
            tracing::warn!(
                service = %self.service_type,
                instance = %instance.name,
                item_id,
                "Item not recorded as processed; it may be searched again"
            );
        }
        recorded
    }

    /// Poll a command's status a bounded number of times.
    async fn await_command(&self, instance: &Instance, service: &ServiceConfig, command_id: i64) {
        for attempt in 1..=service.command_wait_attempts {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                _ = tokio::time::sleep(service.command_wait_delay) => {}
            }

            match self.adapter.get_command_status(instance, command_id).await {
                Ok(status) if status.is_terminal() => {
                    tracing::debug!(
                        service = %self.service_type,
                        instance = %instance.name,
                        command_id,
                        status = %status,
                        attempt,
                        "Command finished"
                    );
                    return;
                }
                Ok(status) => {
                    tracing::trace!(command_id, status = %status, attempt, "Command pending");
                }
                Err(e) => {
                    tracing::debug!(command_id, attempt, error = %e, "Command status poll failed");
                }
            }
        }

        if service.command_wait_attempts > 0 {
            tracing::debug!(
                service = %self.service_type,
                instance = %instance.name,
                command_id,
                "Command still pending after wait budget"
            );
        }
    }
}

/// `now + delay`, saturating at the maximum timestamp.
fn after(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|d| now.checked_add_signed(d))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::CommandStatus;
    use crate::config::{AppConfig, InstanceConfig, StaticConfigProvider};
    use crate::storage::StorageBuilder;
    use crate::worker::testing::{MockAdapter, items};
    use std::sync::atomic::Ordering;

    fn service(instances: &[&str]) -> ServiceConfig {
        ServiceConfig {
            instances: instances
                .iter()
                .map(|name| InstanceConfig {
                    name: name.to_string(),
                    url: format!("http://{name}.invalid"),
                    api_key: "key".to_string(),
                    timeout: None,
                    enabled: true,
                })
                .collect(),
            retry_attempts: 1,
            retry_delay: Duration::from_millis(1),
            hourly_cap: 100,
            missing_items: 2,
            ..Default::default()
        }
    }

    async fn worker(adapter: Arc<MockAdapter>, config: AppConfig) -> (ServiceWorker, StorageHandles) {
        let storage = StorageBuilder::new("sqlite::memory:").build().await.unwrap();
        let worker = ServiceWorker::new(
            adapter.service_type(),
            adapter,
            storage.clone(),
            Arc::new(StaticConfigProvider::new(config)),
            CancellationToken::new(),
        )
        .with_tick(Duration::from_millis(10))
        .with_page_size(10);
        (worker, storage)
    }

    #[tokio::test]
    async fn test_queue_gate_skips_instance() {
        let adapter = Arc::new(
            MockAdapter::new(ServiceType::Sonarr)
                .with_missing(items(1..=20))
                .with_queue_size(Some(7)),
        );
        let (worker, storage) = worker(adapter.clone(), AppConfig::default()).await;
        let mut svc = service(&["Default"]);
        svc.queue_limit = Some(5);

        let report = worker.run_cycle(&svc).await;

        assert_eq!(
            report.instances[0].outcome,
            InstanceOutcome::QueueFull { size: 7, limit: 5 }
        );
        assert!(adapter.triggered_ids().is_empty());
        assert_eq!(adapter.candidate_calls(), 0);
        assert!(storage.ledger.processed_counts().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_queue_size_error_bypasses_gate() {
        let adapter = Arc::new(
            MockAdapter::new(ServiceType::Sonarr)
                .with_missing(items(1..=3))
                .with_queue_size(None),
        );
        let (worker, _storage) = worker(adapter.clone(), AppConfig::default()).await;
        let mut svc = service(&["Default"]);
        svc.queue_limit = Some(5);

        let report = worker.run_cycle(&svc).await;
        assert_eq!(report.searched(), 2);
    }

    #[tokio::test]
    async fn test_unreachable_instance_skips_later_gates() {
        let adapter = Arc::new(MockAdapter::new(ServiceType::Radarr).unreachable());
        let (worker, _storage) = worker(adapter.clone(), AppConfig::default()).await;
        let mut svc = service(&["Default"]);
        svc.queue_limit = Some(5);

        let report = worker.run_cycle(&svc).await;
        assert_eq!(report.instances[0].outcome, InstanceOutcome::Unreachable);
        assert_eq!(adapter.queue_calls.load(Ordering::SeqCst), 0);
        assert_eq!(adapter.candidate_calls(), 0);
    }

    #[tokio::test]
    async fn test_cap_exceeded_skips_before_candidates() {
        let adapter = Arc::new(MockAdapter::new(ServiceType::Sonarr).with_missing(items(1..=5)));
        let (worker, storage) = worker(adapter.clone(), AppConfig::default()).await;
        storage.limiter.increment(ServiceType::Sonarr, 3).await.unwrap();
        let mut svc = service(&["Default"]);
        svc.hourly_cap = 3;

        let report = worker.run_cycle(&svc).await;
        assert_eq!(report.instances[0].outcome, InstanceOutcome::CapExceeded);
        assert_eq!(adapter.candidate_calls(), 0);
    }

    #[tokio::test]
    async fn test_searches_skip_processed_and_record_everything() {
        let adapter = Arc::new(MockAdapter::new(ServiceType::Sonarr).with_missing(items(1..=3)));
        let (worker, storage) = worker(adapter.clone(), AppConfig::default()).await;
        storage.ledger.add_processed(ServiceType::Sonarr, "Default", 2).await;

        let report = worker.run_cycle(&service(&["Default"])).await;

        assert_eq!(
            report.instances[0].outcome,
            InstanceOutcome::Searched {
                missing: 2,
                upgrade: 0,
                ledger_failures: 0,
            }
        );
        let mut triggered = adapter.triggered_ids();
        triggered.sort_unstable();
        assert_eq!(triggered, vec![1, 3]);
        for id in [1, 3] {
            assert!(storage.ledger.is_processed(ServiceType::Sonarr, "Default", id).await);
        }
        assert_eq!(storage.limiter.status(ServiceType::Sonarr, 100).await.used, 2);
        let stats = storage.stats.list().await.unwrap();
        assert_eq!(stats[0].hunted, 2);
        assert_eq!(stats[0].intent, Intent::Missing);
    }

    #[tokio::test]
    async fn test_instances_processed_in_order() {
        let adapter = Arc::new(MockAdapter::new(ServiceType::Lidarr).with_missing(items(1..=4)));
        let (worker, _storage) = worker(adapter.clone(), AppConfig::default()).await;
        let mut svc = service(&["first", "second"]);
        svc.missing_items = 1;

        let report = worker.run_cycle(&svc).await;
        let names: Vec<&str> = report.instances.iter().map(|r| r.instance.as_str()).collect();
        assert_eq!(names, vec!["first", "second"]);

        let triggers = adapter.triggers.lock().unwrap().clone();
        assert_eq!(triggers[0].0, "first");
        assert_eq!(triggers[1].0, "second");
    }

    #[tokio::test]
    async fn test_panicking_instance_is_contained() {
        let adapter = Arc::new(
            MockAdapter::new(ServiceType::Radarr)
                .with_missing(items(1..=4))
                .panicking_for("broken"),
        );
        let (worker, storage) = worker(adapter.clone(), AppConfig::default()).await;

        let report = worker.run_cycle(&service(&["broken", "healthy"])).await;

        assert_eq!(report.instances.len(), 2);
        assert!(matches!(
            report.instances[0].outcome,
            InstanceOutcome::Failed { .. }
        ));
        assert_eq!(
            report.instances[1].outcome,
            InstanceOutcome::Searched {
                missing: 2,
                upgrade: 0,
                ledger_failures: 0,
            }
        );
        let triggers = adapter.triggers.lock().unwrap().clone();
        assert!(triggers.iter().all(|(name, _)| name == "healthy"));
        let counts = storage.ledger.processed_counts().await.unwrap();
        assert_eq!(counts.len(), 1);
        assert_eq!(counts[0].instance_name, "healthy");
    }

    #[tokio::test]
    async fn test_cancelled_before_cycle_touches_nothing() {
        let adapter = Arc::new(MockAdapter::new(ServiceType::Sonarr).with_missing(items(1..=5)));
        let (worker, storage) = worker(adapter.clone(), AppConfig::default()).await;
        worker.cancel.cancel();

        let report = worker.run_cycle(&service(&["first", "second"])).await;

        assert_eq!(report.instances.len(), 1);
        assert_eq!(report.instances[0].instance, "first");
        assert_eq!(report.instances[0].outcome, InstanceOutcome::Cancelled);
        assert_eq!(adapter.connection_calls.load(Ordering::SeqCst), 0);
        assert!(adapter.triggered_ids().is_empty());
        assert!(storage.ledger.processed_counts().await.unwrap().is_empty());
        assert_eq!(storage.limiter.status(ServiceType::Sonarr, 100).await.used, 0);
    }

    #[tokio::test]
    async fn test_ledger_write_failures_reported() {
        let adapter = Arc::new(MockAdapter::new(ServiceType::Sonarr).with_missing(items(1..=2)));
        let (worker, storage) = worker(adapter.clone(), AppConfig::default()).await;
        storage.clone().shutdown().await;

        let report = worker.run_cycle(&service(&["Default"])).await;

        assert_eq!(
            report.instances[0].outcome,
            InstanceOutcome::Searched {
                missing: 2,
                upgrade: 0,
                ledger_failures: 2,
            }
        );
        assert_eq!(adapter.triggered_ids().len(), 2);
    }

    #[tokio::test]
    async fn test_dropped_cycle_aborts_instance_task() {
        let adapter = Arc::new(
            MockAdapter::new(ServiceType::Sonarr)
                .with_missing(items(1..=1))
                .with_status(CommandStatus::Queued),
        );
        let (worker, _storage) = worker(adapter.clone(), AppConfig::default()).await;
        let mut svc = service(&["Default"]);
        svc.command_wait_delay = Duration::from_millis(10);
        svc.command_wait_attempts = 1_000;

        let cut = tokio::time::timeout(Duration::from_millis(100), worker.run_cycle(&svc)).await;
        assert!(cut.is_err());

        tokio::time::sleep(Duration::from_millis(20)).await;
        let polls = adapter.status_calls.load(Ordering::SeqCst);
        assert!(polls > 0);
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(adapter.status_calls.load(Ordering::SeqCst), polls);
    }

    #[tokio::test]
    async fn test_missing_command_id_is_not_counted() {
        let adapter = Arc::new(
            MockAdapter::new(ServiceType::Sonarr)
                .with_missing(items(1..=1))
                .with_command_id(None),
        );
        let (worker, storage) = worker(adapter.clone(), AppConfig::default()).await;

        let report = worker.run_cycle(&service(&["Default"])).await;
        assert_eq!(report.searched(), 0);
        assert!(!storage.ledger.is_processed(ServiceType::Sonarr, "Default", 1).await);
        assert_eq!(storage.limiter.status(ServiceType::Sonarr, 100).await.used, 0);
    }

    #[tokio::test]
    async fn test_mark_policy_on_trigger_failure() {
        for (policy, expect_marked) in [
            (MarkPolicy::AfterConfirm, false),
            (MarkPolicy::BeforeTrigger, true),
        ] {
            let adapter = Arc::new(
                MockAdapter::new(ServiceType::Readarr)
                    .with_missing(items(9..=9))
                    .failing_trigger_for(vec![9]),
            );
            let (worker, storage) = worker(adapter.clone(), AppConfig::default()).await;
            let mut svc = service(&["Default"]);
            svc.mark_policy = policy;

            worker.run_cycle(&svc).await;
            assert_eq!(
                storage.ledger.is_processed(ServiceType::Readarr, "Default", 9).await,
                expect_marked,
                "{policy}"
            );
            assert_eq!(storage.limiter.status(ServiceType::Readarr, 100).await.used, 0);
        }
    }

    #[tokio::test]
    async fn test_cap_reached_mid_hunt_stops() {
        let adapter = Arc::new(
            MockAdapter::new(ServiceType::Sonarr)
                .with_missing(items(1..=5))
                .with_upgrade(items(10..=15)),
        );
        let (worker, _storage) = worker(adapter.clone(), AppConfig::default()).await;
        let mut svc = service(&["Default"]);
        svc.hourly_cap = 1;
        svc.missing_items = 3;
        svc.upgrade_items = 3;

        let report = worker.run_cycle(&svc).await;
        assert_eq!(report.searched(), 1);
        assert_eq!(adapter.triggered_ids().len(), 1);
    }

    #[tokio::test]
    async fn test_sequential_order_walks_pages() {
        let adapter = Arc::new(MockAdapter::new(ServiceType::Radarr).with_missing(items(1..=25)));
        let (worker, storage) = worker(adapter.clone(), AppConfig::default()).await;
        for id in 1..=12 {
            storage.ledger.add_processed(ServiceType::Radarr, "Default", id).await;
        }
        let mut svc = service(&["Default"]);
        svc.search_order = SearchOrder::Sequential;

        worker.run_cycle(&svc).await;
        assert_eq!(adapter.triggered_ids(), vec![13, 14]);
        let pages: Vec<u32> = adapter
            .candidate_requests
            .lock()
            .unwrap()
            .iter()
            .map(|(page, _)| *page)
            .collect();
        assert_eq!(pages, vec![1, 2]);
    }

    #[tokio::test]
    async fn test_command_status_polled_until_terminal() {
        let adapter = Arc::new(
            MockAdapter::new(ServiceType::Sonarr)
                .with_missing(items(1..=1))
                .with_status(CommandStatus::Completed),
        );
        let (worker, _storage) = worker(adapter.clone(), AppConfig::default()).await;
        let mut svc = service(&["Default"]);
        svc.command_wait_attempts = 5;
        svc.command_wait_delay = Duration::from_millis(1);

        worker.run_cycle(&svc).await;
        assert_eq!(adapter.status_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_run_loop_force_reset_and_shutdown() {
        let adapter = Arc::new(MockAdapter::new(ServiceType::Sonarr).with_missing(items(1..=50)));
        let mut config = AppConfig::default();
        let mut svc = service(&["Default"]);
        svc.missing_items = 1;
        svc.sleep = Duration::from_secs(3600);
        config.services.insert(ServiceType::Sonarr, svc);

        let (worker, storage) = worker(adapter.clone(), config).await;
        let cancel = worker.cancel.clone();
        let handle = tokio::spawn(worker.run());

        let wait_for = |n: usize| {
            let adapter = adapter.clone();
            async move {
                tokio::time::timeout(Duration::from_secs(5), async {
                    while adapter.triggered_ids().len() < n {
                        tokio::time::sleep(Duration::from_millis(5)).await;
                    }
                })
                .await
                .unwrap();
            }
        };

        wait_for(1).await;
        let state = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                let state = storage.clock.get(ServiceType::Sonarr).await.unwrap().unwrap();
                if !state.running && state.last_ended_at.is_some() {
                    return state;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(state.next_run_at > Utc::now() + chrono::Duration::minutes(59));

        storage.clock.force_reset(ServiceType::Sonarr).await.unwrap();
        wait_for(2).await;

        cancel.cancel();
        let result = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_unconfigured_service_postpones() {
        let adapter = Arc::new(MockAdapter::new(ServiceType::Lidarr));
        let (worker, storage) = worker(adapter.clone(), AppConfig::default()).await;
        storage.clock.ensure(ServiceType::Lidarr).await.unwrap();

        let before = Utc::now();
        worker.cycle().await.unwrap();

        let state = storage.clock.get(ServiceType::Lidarr).await.unwrap().unwrap();
        assert!(!state.running);
        assert!(state.next_run_at >= before + chrono::Duration::seconds(59));
        assert_eq!(adapter.connection_calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_after_saturates() {
        let now = Utc::now();
        assert_eq!(after(now, Duration::MAX), DateTime::<Utc>::MAX_UTC);
        assert_eq!(
            after(now, Duration::from_secs(60)),
            now + chrono::Duration::seconds(60)
        );
    }
}
