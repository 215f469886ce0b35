//! Worker supervision: one long-running task per enabled service type,
//! restarted after a delay whenever it exits while the process is still up.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::error::WorkerError;
use super::service_worker::ServiceWorker;
use crate::adapter::AdapterRegistry;
use crate::config::{ConfigProvider, SupervisorConfig};
use crate::storage::{ServiceType, StorageHandles};

/// Liveness snapshot of one supervised worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStatus {
    pub service_type: ServiceType,
    pub alive: bool,
    pub restarts: u32,
    pub started_at: DateTime<Utc>,
}

struct Slot {
    handle: Option<JoinHandle<Result<(), WorkerError>>>,
    restarts: u32,
    started_at: DateTime<Utc>,
}

impl Slot {
    fn is_alive(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }
}

struct Inner {
    registry: AdapterRegistry,
    storage: StorageHandles,
    config: Arc<dyn ConfigProvider>,
    settings: SupervisorConfig,
    cancel: CancellationToken,
    slots: Mutex<BTreeMap<ServiceType, Slot>>,
    monitor: Mutex<Option<JoinHandle<()>>>,
}

/// Starts, watches and restarts [`ServiceWorker`]s.
///
/// Cheap to clone; all clones share the same workers.
#[derive(Clone)]
pub struct WorkerSupervisor {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for WorkerSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerSupervisor")
            .field(
                "workers",
                &self.inner.slots.try_lock().map(|s| s.len()).unwrap_or(0),
            )
            .field("cancelled", &self.inner.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

impl WorkerSupervisor {
    pub fn new(
        registry: AdapterRegistry,
        storage: StorageHandles,
        config: Arc<dyn ConfigProvider>,
        settings: SupervisorConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                registry,
                storage,
                config,
                settings,
                cancel: CancellationToken::new(),
                slots: Mutex::new(BTreeMap::new()),
                monitor: Mutex::new(None),
            }),
        }
    }

    /// Token observed by every worker; cancelled by [`shutdown`](Self::shutdown).
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.cancel.clone()
    }

    /// Spawn a worker for each enabled service type and start monitoring.
    ///
    /// Service types without a registered adapter are skipped with a
    /// warning. Returns the service types that got a worker.
    pub async fn start(&self) -> Result<Vec<ServiceType>, WorkerError> {
        let config = self.inner.config.load().await?;
        let mut started = Vec::new();

        {
            let mut slots = self.inner.slots.lock().await;
            for service_type in config.enabled_services() {
                if slots.contains_key(&service_type) {
                    continue;
                }
                let Some(handle) = self.spawn_worker(service_type) else {
                    tracing::warn!(service = %service_type, "No adapter registered; worker not started");
                    continue;
                };
                slots.insert(
                    service_type,
                    Slot {
                        handle: Some(handle),
                        restarts: 0,
                        started_at: Utc::now(),
                    },
                );
                started.push(service_type);
            }
        }

        let mut monitor = self.inner.monitor.lock().await;
        if monitor.is_none() {
            let this = self.clone();
            *monitor = Some(tokio::spawn(async move { this.monitor().await }));
        }

        tracing::info!(
            workers = started.len(),
            check_interval = ?self.inner.settings.check_interval,
            "Worker supervisor started"
        );
        Ok(started)
    }

    fn spawn_worker(&self, service_type: ServiceType) -> Option<JoinHandle<Result<(), WorkerError>>> {
        let adapter = self.inner.registry.get(service_type)?;
        let worker = ServiceWorker::new(
            service_type,
            adapter,
            self.inner.storage.clone(),
            Arc::clone(&self.inner.config),
            self.inner.cancel.clone(),
        )
        .with_tick(self.inner.settings.tick);
        Some(tokio::spawn(worker.run()))
    }

    async fn monitor(self) {
        loop {
            tokio::select! {
                _ = self.inner.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.inner.settings.check_interval) => {}
            }
            self.check_workers().await;
        }
        tracing::debug!("Worker monitor stopped");
    }

    /// Restart every worker that has exited. Returns how many were restarted.
    ///
    /// Does nothing once shutdown has begun.
    pub async fn check_workers(&self) -> usize {
        if self.inner.cancel.is_cancelled() {
            return 0;
        }

        let mut dead = Vec::new();
        {
            let mut slots = self.inner.slots.lock().await;
            for (service_type, slot) in slots.iter_mut() {
                let Some(handle) = slot.handle.take_if(|h| h.is_finished()) else {
                    continue;
                };
                match handle.await {
                    Ok(Ok(())) => {
                        tracing::warn!(service = %service_type, "Worker exited unexpectedly")
                    }
                    Ok(Err(e)) => {
                        tracing::error!(service = %service_type, error = %e, "Worker failed")
                    }
                    Err(e) if e.is_panic() => {
                        tracing::error!(service = %service_type, "Worker panicked")
                    }
                    Err(e) => {
                        tracing::error!(service = %service_type, error = %e, "Worker task aborted")
                    }
                }
                dead.push(*service_type);
            }
        }

        if dead.is_empty() {
            return 0;
        }

        tokio::select! {
            _ = self.inner.cancel.cancelled() => return 0,
            _ = tokio::time::sleep(self.inner.settings.restart_delay) => {}
        }

        let mut slots = self.inner.slots.lock().await;
        let mut restarted = 0;
        for service_type in dead {
            let (Some(slot), Some(handle)) = (slots.get_mut(&service_type), self.spawn_worker(service_type))
            else {
                continue;
            };
            slot.handle = Some(handle);
            slot.restarts += 1;
            slot.started_at = Utc::now();
            restarted += 1;
            tracing::info!(service = %service_type, restarts = slot.restarts, "Worker restarted");
        }
        restarted
    }

    /// Liveness of every supervised worker, ordered by service type.
    pub async fn statuses(&self) -> Vec<WorkerStatus> {
        self.inner
            .slots
            .lock()
            .await
            .iter()
            .map(|(service_type, slot)| WorkerStatus {
                service_type: *service_type,
                alive: slot.is_alive(),
                restarts: slot.restarts,
                started_at: slot.started_at,
            })
            .collect()
    }

    /// Cancel all workers and wait up to `timeout` for them to finish.
    ///
    /// Workers still running at the deadline are aborted. Returns `true`
    /// when every worker stopped on its own.
    pub async fn shutdown(&self, timeout: Duration) -> bool {
        self.inner.cancel.cancel();

        if let Some(monitor) = self.inner.monitor.lock().await.take()
            && let Err(e) = monitor.await
        {
            tracing::warn!(error = %e, "Worker monitor ended abnormally");
        }

        let handles: Vec<_> = self
            .inner
            .slots
            .lock()
            .await
            .iter_mut()
            .filter_map(|(ty, slot)| slot.handle.take().map(|h| (*ty, h)))
            .collect();

        let deadline = tokio::time::Instant::now() + timeout;
        let mut clean = true;
        for (service_type, mut handle) in handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(Ok(()))) => {
                    tracing::debug!(service = %service_type, "Worker stopped");
                }
                Ok(Ok(Err(e))) => {
                    tracing::warn!(service = %service_type, error = %e, "Worker stopped with error");
                }
                Ok(Err(e)) => {
                    tracing::warn!(service = %service_type, error = %e, "Worker task failed");
                }
                Err(_) => {
                    tracing::warn!(service = %service_type, "Worker did not stop in time; aborting");
                    handle.abort();
                    clean = false;
                }
            }
        }

        if clean {
            tracing::info!("Worker supervisor shutdown complete");
        } else {
            tracing::warn!("Worker supervisor shutdown timed out");
        }
        clean
    }
}
