//! HTTP adapter for the *arr family of media-library managers.
//!
//! All four managers share one REST dialect and differ only in API
//! version, search command name and the JSON field carrying item ids.

use std::time::Duration;

use reqwest::{Client, Method, RequestBuilder};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tokio::time::timeout;

use super::traits::{
    AdapterError, CandidateFilter, CatalogItem, CatalogPage, CommandStatus, ServiceAdapter,
};
use crate::config::Instance;
use crate::storage::{Intent, ServiceType};

/// Header carrying the instance API key.
const API_KEY_HEADER: &str = "X-Api-Key";

/// Per service-type API dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArrFlavor {
    pub api_version: &'static str,
    pub search_command: &'static str,
    pub ids_field: &'static str,
}

impl ArrFlavor {
    pub fn for_service(service_type: ServiceType) -> Self {
        match service_type {
            ServiceType::Sonarr => Self {
                api_version: "v3",
                search_command: "EpisodeSearch",
                ids_field: "episodeIds",
            },
            ServiceType::Radarr => Self {
                api_version: "v3",
                search_command: "MoviesSearch",
                ids_field: "movieIds",
            },
            ServiceType::Lidarr => Self {
                api_version: "v1",
                search_command: "AlbumSearch",
                ids_field: "albumIds",
            },
            ServiceType::Readarr => Self {
                api_version: "v1",
                search_command: "BookSearch",
                ids_field: "bookIds",
            },
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PagedResponse {
    #[serde(default)]
    records: Vec<RecordDto>,
    #[serde(default)]
    total_records: u64,
}

#[derive(Debug, Deserialize)]
struct RecordDto {
    id: i64,
    #[serde(default)]
    title: Option<String>,
    #[serde(default = "default_monitored")]
    monitored: bool,
}

#[derive(Debug, Deserialize)]
struct CommandDto {
    #[serde(default)]
    id: Option<i64>,
    #[serde(default)]
    status: Option<String>,
}

fn default_monitored() -> bool {
    true
}

/// [`ServiceAdapter`] speaking the *arr REST API.
#[derive(Debug, Clone)]
pub struct ArrAdapter {
    service_type: ServiceType,
    flavor: ArrFlavor,
    client: Client,
}

impl ArrAdapter {
    /// Create an adapter sharing `client`'s connection pool.
    pub fn new(service_type: ServiceType, client: Client) -> Self {
        Self {
            service_type,
            flavor: ArrFlavor::for_service(service_type),
            client,
        }
    }

    pub fn flavor(&self) -> ArrFlavor {
        self.flavor
    }

    fn endpoint(&self, instance: &Instance, path: &str) -> String {
        format!(
            "{}/api/{}/{}",
            instance.base_url.as_str().trim_end_matches('/'),
            self.flavor.api_version,
            path
        )
    }

    fn request(&self, method: Method, instance: &Instance, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.endpoint(instance, path))
            .header(API_KEY_HEADER, &instance.api_key)
    }

    /// Send `request` and decode a JSON body, bounded by the instance timeout.
    async fn send_json<T: DeserializeOwned>(
        &self,
        instance: &Instance,
        path: &str,
        request: RequestBuilder,
    ) -> Result<T, AdapterError> {
        bounded(instance.timeout, async {
            let response = request.send().await?;
            let status = response.status();
            if !status.is_success() {
                return Err(AdapterError::Status {
                    status: status.as_u16(),
                    endpoint: path.to_string(),
                });
            }
            let body = response.bytes().await?;
            serde_json::from_slice(&body).map_err(|e| AdapterError::Decode(format!("{path}: {e}")))
        })
        .await
    }
}

async fn bounded<T>(
    limit: Duration,
    fut: impl Future<Output = Result<T, AdapterError>>,
) -> Result<T, AdapterError> {
    timeout(limit, fut).await.map_err(|_| AdapterError::Timeout)?
}

#[async_trait::async_trait]
impl ServiceAdapter for ArrAdapter {
    fn service_type(&self) -> ServiceType {
        self.service_type
    }

    async fn check_connection(&self, instance: &Instance) -> Result<(), AdapterError> {
        let path = "system/status";
        let request = self.request(Method::GET, instance, path);
        let _: serde_json::Value = self.send_json(instance, path, request).await?;
        Ok(())
    }

    async fn get_queue_size(&self, instance: &Instance) -> Result<u64, AdapterError> {
        let path = "queue";
        let request = self
            .request(Method::GET, instance, path)
            .query(&[("page", "1"), ("pageSize", "1")]);
        let page: PagedResponse = self.send_json(instance, path, request).await?;
        Ok(page.total_records)
    }

    async fn get_candidates(
        &self,
        instance: &Instance,
        page: u32,
        page_size: u32,
        filter: &CandidateFilter,
    ) -> Result<CatalogPage, AdapterError> {
        let path = match filter.intent {
            Intent::Missing => "wanted/missing",
            Intent::Upgrade => "wanted/cutoff",
        };
        let request = self.request(Method::GET, instance, path).query(&[
            ("page", page.to_string()),
            ("pageSize", page_size.to_string()),
            ("monitored", filter.monitored_only.to_string()),
        ]);
        let body: PagedResponse = self.send_json(instance, path, request).await?;

        Ok(CatalogPage {
            records: body
                .records
                .into_iter()
                .map(|r| CatalogItem {
                    id: r.id,
                    title: r.title.unwrap_or_default(),
                    monitored: r.monitored,
                })
                .collect(),
            total_records: body.total_records,
        })
    }

    async fn trigger_search(
        &self,
        instance: &Instance,
        item_ids: &[i64],
    ) -> Result<Option<i64>, AdapterError> {
        if item_ids.is_empty() {
            return Err(AdapterError::Config("no item ids to search".to_string()));
        }

        let path = "command";
        let mut payload = serde_json::Map::new();
        payload.insert("name".into(), self.flavor.search_command.into());
        payload.insert(self.flavor.ids_field.into(), item_ids.into());

        let request = self
            .request(Method::POST, instance, path)
            .json(&serde_json::Value::Object(payload));
        let command: CommandDto = self.send_json(instance, path, request).await?;

        tracing::debug!(
            service = %self.service_type,
            instance = %instance.name,
            items = item_ids.len(),
            command_id = ?command.id,
            "Search command submitted"
        );
        Ok(command.id)
    }

    async fn get_command_status(
        &self,
        instance: &Instance,
        command_id: i64,
    ) -> Result<CommandStatus, AdapterError> {
        let path = format!("command/{command_id}");
        let request = self.request(Method::GET, instance, &path);
        let command: CommandDto = self.send_json(instance, &path, request).await?;

        Ok(command
            .status
            .as_deref()
            .map(CommandStatus::from_remote)
            .unwrap_or(CommandStatus::Unknown))
    }
}
