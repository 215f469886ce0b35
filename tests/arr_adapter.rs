//! ArrAdapter tests against a stub *arr server.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use quarry::adapter::{AdapterError, ArrAdapter, CandidateFilter, CommandStatus, ServiceAdapter};
use quarry::config::{Instance, InstanceConfig, ServiceConfig, StaticConfigProvider};
use quarry::storage::{Intent, ServiceType, StorageBuilder};
use quarry::worker::{InstanceOutcome, ServiceWorker};
use quarry::AppConfig;
use serde_json::{Value, json};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

const API_KEY: &str = "secret";

// =============================================================================
// Stub Server
// =============================================================================

#[derive(Default)]
struct Stub {
    queue_size: u64,
    catalog: Vec<Value>,
    commands: Vec<Value>,
    candidate_queries: Vec<HashMap<String, String>>,
}

type Shared = Arc<Mutex<Stub>>;

fn authorized(headers: &HeaderMap) -> bool {
    headers.get("X-Api-Key").and_then(|v| v.to_str().ok()) == Some(API_KEY)
}

async fn status(headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    Json(json!({ "appName": "Sonarr", "version": "4.0.0" })).into_response()
}

async fn queue(State(stub): State<Shared>, headers: HeaderMap) -> Response {
    if !authorized(&headers) {
        return StatusCode::UNAUTHORIZED.into_response();
    }
    let total = stub.lock().unwrap().queue_size;
    Json(json!({ "page": 1, "pageSize": 1, "totalRecords": total, "records": [] })).into_response()
}

async fn missing(
    State(stub): State<Shared>,
    Query(params): Query<HashMap<String, String>>,
) -> Response {
    let mut stub = stub.lock().unwrap();
    let page: usize = params.get("page").and_then(|p| p.parse().ok()).unwrap_or(1);
    let size: usize = params.get("pageSize").and_then(|p| p.parse().ok()).unwrap_or(10);
    stub.candidate_queries.push(params);

    let records: Vec<Value> = stub
        .catalog
        .iter()
        .skip((page - 1) * size)
        .take(size)
        .cloned()
        .collect();
    Json(json!({
        "page": page,
        "pageSize": size,
        "totalRecords": stub.catalog.len(),
        "records": records,
    }))
    .into_response()
}

async fn command(State(stub): State<Shared>, Json(body): Json<Value>) -> Response {
    let mut stub = stub.lock().unwrap();
    stub.commands.push(body);
    let id = 100 + stub.commands.len() as i64;
    (StatusCode::CREATED, Json(json!({ "id": id, "status": "queued" }))).into_response()
}

async fn command_status(Path(id): Path<i64>) -> Json<Value> {
    Json(json!({ "id": id, "name": "EpisodeSearch", "status": "completed" }))
}

async fn start_stub(stub: Stub) -> (String, Shared) {
    let shared: Shared = Arc::new(Mutex::new(stub));
    let router = Router::new()
        .route("/api/v3/system/status", get(status))
        .route("/api/v3/queue", get(queue))
        .route("/api/v3/wanted/missing", get(missing))
        .route("/api/v3/command", post(command))
        .route("/api/v3/command/{id}", get(command_status))
        .with_state(shared.clone());

    let listener = TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind random port");
    let addr = listener.local_addr().expect("Failed to get local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });

    (format!("http://{}", addr), shared)
}

fn catalog(ids: impl IntoIterator<Item = i64>) -> Vec<Value> {
    ids.into_iter()
        .map(|id| json!({ "id": id, "title": format!("Episode {id}"), "monitored": true }))
        .collect()
}

fn instance(base_url: &str, api_key: &str) -> Instance {
    Instance {
        name: "Default".to_string(),
        base_url: base_url.parse().unwrap(),
        api_key: api_key.to_string(),
        timeout: Duration::from_secs(5),
    }
}

fn sonarr() -> ArrAdapter {
    ArrAdapter::new(ServiceType::Sonarr, reqwest::Client::new())
}

// =============================================================================
// Adapter Calls
// =============================================================================

#[tokio::test]
async fn test_connection_requires_api_key() {
    let (base, _stub) = start_stub(Stub::default()).await;
    let adapter = sonarr();

    adapter
        .check_connection(&instance(&base, API_KEY))
        .await
        .expect("authorized check should succeed");

    let err = adapter
        .check_connection(&instance(&base, "wrong"))
        .await
        .unwrap_err();
    assert!(
        matches!(err, AdapterError::Status { status: 401, .. }),
        "unexpected error: {err}"
    );
}

#[tokio::test]
async fn test_queue_size_reads_total_records() {
    let (base, _stub) = start_stub(Stub {
        queue_size: 7,
        ..Default::default()
    })
    .await;

    let size = sonarr()
        .get_queue_size(&instance(&base, API_KEY))
        .await
        .unwrap();
    assert_eq!(size, 7);
}

#[tokio::test]
async fn test_candidates_page_and_query() {
    let (base, stub) = start_stub(Stub {
        catalog: catalog(1..=5),
        ..Default::default()
    })
    .await;

    let filter = CandidateFilter {
        intent: Intent::Missing,
        monitored_only: true,
    };
    let page = sonarr()
        .get_candidates(&instance(&base, API_KEY), 2, 2, &filter)
        .await
        .unwrap();

    assert_eq!(page.total_records, 5);
    let ids: Vec<i64> = page.records.iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![3, 4]);
    assert_eq!(page.records[0].title, "Episode 3");

    let query = stub.lock().unwrap().candidate_queries[0].clone();
    assert_eq!(query.get("page").map(String::as_str), Some("2"));
    assert_eq!(query.get("pageSize").map(String::as_str), Some("2"));
    assert_eq!(query.get("monitored").map(String::as_str), Some("true"));
}

#[tokio::test]
async fn test_trigger_search_payload_and_status() {
    let (base, stub) = start_stub(Stub::default()).await;
    let adapter = sonarr();
    let target = instance(&base, API_KEY);

    let id = adapter.trigger_search(&target, &[5]).await.unwrap();
    assert_eq!(id, Some(101));

    let body = stub.lock().unwrap().commands[0].clone();
    assert_eq!(body, json!({ "name": "EpisodeSearch", "episodeIds": [5] }));

    let status = adapter.get_command_status(&target, 101).await.unwrap();
    assert_eq!(status, CommandStatus::Completed);
}

#[tokio::test]
async fn test_empty_id_list_rejected_locally() {
    let (base, stub) = start_stub(Stub::default()).await;
    assert!(
        sonarr()
            .trigger_search(&instance(&base, API_KEY), &[])
            .await
            .is_err()
    );
    assert!(stub.lock().unwrap().commands.is_empty());
}

// =============================================================================
// Worker Cycle Over HTTP
// =============================================================================

fn service(base: &str, queue_limit: Option<u64>) -> ServiceConfig {
    ServiceConfig {
        instances: vec![InstanceConfig {
            name: "Default".to_string(),
            url: base.to_string(),
            api_key: API_KEY.to_string(),
            timeout: None,
            enabled: true,
        }],
        missing_items: 2,
        queue_limit,
        retry_attempts: 1,
        ..Default::default()
    }
}

async fn worker(service_type: ServiceType) -> (ServiceWorker, quarry::StorageHandles) {
    let storage = StorageBuilder::new("sqlite::memory:").build().await.unwrap();
    let worker = ServiceWorker::new(
        service_type,
        Arc::new(ArrAdapter::new(service_type, reqwest::Client::new())),
        storage.clone(),
        Arc::new(StaticConfigProvider::new(AppConfig::default())),
        CancellationToken::new(),
    );
    (worker, storage)
}

#[tokio::test]
async fn test_cycle_respects_queue_limit() {
    let (base, stub) = start_stub(Stub {
        queue_size: 7,
        catalog: catalog(1..=20),
        ..Default::default()
    })
    .await;
    let (worker, storage) = worker(ServiceType::Sonarr).await;

    let report = worker.run_cycle(&service(&base, Some(5))).await;

    assert_eq!(
        report.instances[0].outcome,
        InstanceOutcome::QueueFull { size: 7, limit: 5 }
    );
    assert!(stub.lock().unwrap().commands.is_empty());
    assert!(storage.ledger.processed_counts().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_cycle_triggers_and_records() {
    let (base, stub) = start_stub(Stub {
        queue_size: 1,
        catalog: catalog(1..=3),
        ..Default::default()
    })
    .await;
    let (worker, storage) = worker(ServiceType::Sonarr).await;

    let report = worker.run_cycle(&service(&base, Some(5))).await;
    assert_eq!(report.searched(), 2);

    let commands = stub.lock().unwrap().commands.clone();
    assert_eq!(commands.len(), 2);
    for command in &commands {
        assert_eq!(command["name"], "EpisodeSearch");
        let id = command["episodeIds"][0].as_i64().unwrap();
        assert!(
            storage
                .ledger
                .is_processed(ServiceType::Sonarr, "Default", id)
                .await
        );
    }
    assert_eq!(storage.limiter.status(ServiceType::Sonarr, 20).await.used, 2);

    // Only the one remaining item is left for the next cycle.
    let report = worker.run_cycle(&service(&base, Some(5))).await;
    assert_eq!(report.searched(), 1);
}
