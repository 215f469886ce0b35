//! In-crate mock adapter with call recording.

use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use crate::adapter::{
    AdapterError, CandidateFilter, CatalogItem, CatalogPage, CommandStatus, ServiceAdapter,
};
use crate::config::Instance;
use crate::storage::{Intent, ServiceType};

pub(crate) struct MockAdapter {
    service_type: ServiceType,
    missing: Vec<CatalogItem>,
    upgrade: Vec<CatalogItem>,
    reachable: bool,
    queue_size: Option<u64>,
    command_id: Option<i64>,
    failing_trigger_ids: Vec<i64>,
    status: CommandStatus,
    candidate_failures: AtomicU32,
    failing_pages: bool,
    panicking_instance: Option<String>,
    pub connection_calls: AtomicUsize,
    pub queue_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub candidate_requests: Mutex<Vec<(u32, u32)>>,
    pub triggers: Mutex<Vec<(String, Vec<i64>)>>,
}

pub(crate) fn items(ids: impl IntoIterator<Item = i64>) -> Vec<CatalogItem> {
    ids.into_iter()
        .map(|id| CatalogItem {
            id,
            title: format!("item {id}"),
            monitored: true,
        })
        .collect()
}

impl MockAdapter {
    pub fn new(service_type: ServiceType) -> Self {
        Self {
            service_type,
            missing: Vec::new(),
            upgrade: Vec::new(),
            reachable: true,
            queue_size: Some(0),
            command_id: Some(1),
            failing_trigger_ids: Vec::new(),
            status: CommandStatus::Completed,
            candidate_failures: AtomicU32::new(0),
            failing_pages: false,
            panicking_instance: None,
            connection_calls: AtomicUsize::new(0),
            queue_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            candidate_requests: Mutex::new(Vec::new()),
            triggers: Mutex::new(Vec::new()),
        }
    }

    pub fn with_missing(mut self, catalog: Vec<CatalogItem>) -> Self {
        self.missing = catalog;
        self
    }

    pub fn with_upgrade(mut self, catalog: Vec<CatalogItem>) -> Self {
        self.upgrade = catalog;
        self
    }

    pub fn unreachable(mut self) -> Self {
        self.reachable = false;
        self
    }

    /// `None` makes the queue endpoint fail.
    pub fn with_queue_size(mut self, size: Option<u64>) -> Self {
        self.queue_size = size;
        self
    }

    pub fn with_command_id(mut self, id: Option<i64>) -> Self {
        self.command_id = id;
        self
    }

    pub fn failing_trigger_for(mut self, ids: Vec<i64>) -> Self {
        self.failing_trigger_ids = ids;
        self
    }

    pub fn with_status(mut self, status: CommandStatus) -> Self {
        self.status = status;
        self
    }

    /// Fail the next `n` catalog reads.
    pub fn failing_candidates(self, n: u32) -> Self {
        self.candidate_failures.store(n, Ordering::SeqCst);
        self
    }

    /// Fail every page read while single-record count reads succeed.
    pub fn failing_pages(mut self) -> Self {
        self.failing_pages = true;
        self
    }

    /// Panic on any call made for the named instance.
    pub fn panicking_for(mut self, name: &str) -> Self {
        self.panicking_instance = Some(name.to_string());
        self
    }

    fn check_panic(&self, instance: &Instance) {
        if self.panicking_instance.as_deref() == Some(instance.name.as_str()) {
            panic!("mock adapter panic for {}", instance.name);
        }
    }

    pub fn triggered_ids(&self) -> Vec<i64> {
        self.triggers
            .lock()
            .unwrap()
            .iter()
            .flat_map(|(_, ids)| ids.iter().copied())
            .collect()
    }

    pub fn candidate_calls(&self) -> usize {
        self.candidate_requests.lock().unwrap().len()
    }
}

#[async_trait::async_trait]
impl ServiceAdapter for MockAdapter {
    fn service_type(&self) -> ServiceType {
        self.service_type
    }

    async fn check_connection(&self, instance: &Instance) -> Result<(), AdapterError> {
        self.check_panic(instance);
        self.connection_calls.fetch_add(1, Ordering::SeqCst);
        if self.reachable {
            Ok(())
        } else {
            Err(AdapterError::Timeout)
        }
    }

    async fn get_queue_size(&self, instance: &Instance) -> Result<u64, AdapterError> {
        self.check_panic(instance);
        self.queue_calls.fetch_add(1, Ordering::SeqCst);
        self.queue_size
            .ok_or_else(|| AdapterError::Decode("queue unavailable".to_string()))
    }

    async fn get_candidates(
        &self,
        instance: &Instance,
        page: u32,
        page_size: u32,
        filter: &CandidateFilter,
    ) -> Result<CatalogPage, AdapterError> {
        self.check_panic(instance);
        self.candidate_requests
            .lock()
            .unwrap()
            .push((page, page_size));

        if (self.failing_pages && page_size > 1)
            || self
                .candidate_failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
        {
            return Err(AdapterError::Status {
                status: 503,
                endpoint: "wanted".to_string(),
            });
        }

        let catalog = match filter.intent {
            Intent::Missing => &self.missing,
            Intent::Upgrade => &self.upgrade,
        };
        let start = (page.saturating_sub(1) as usize) * page_size as usize;
        let records = catalog
            .iter()
            .skip(start)
            .take(page_size as usize)
            .cloned()
            .collect();

        Ok(CatalogPage {
            records,
            total_records: catalog.len() as u64,
        })
    }

    async fn trigger_search(
        &self,
        instance: &Instance,
        item_ids: &[i64],
    ) -> Result<Option<i64>, AdapterError> {
        self.check_panic(instance);
        if item_ids.iter().any(|id| self.failing_trigger_ids.contains(id)) {
            return Err(AdapterError::Status {
                status: 500,
                endpoint: "command".to_string(),
            });
        }
        self.triggers
            .lock()
            .unwrap()
            .push((instance.name.clone(), item_ids.to_vec()));
        Ok(self.command_id)
    }

    async fn get_command_status(
        &self,
        _instance: &Instance,
        _command_id: i64,
    ) -> Result<CommandStatus, AdapterError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.status)
    }
}

pub(crate) fn instance(name: &str) -> Instance {
    Instance {
        name: name.to_string(),
        base_url: url::Url::parse("http://mock.invalid").unwrap(),
        api_key: "key".to_string(),
        timeout: std::time::Duration::from_secs(1),
    }
}
