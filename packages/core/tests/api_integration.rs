//! End-to-end tests: real Railway and DigitalOcean clients against wiremock,
//! two monitoring cycles, then the status API via `tower::ServiceExt::oneshot`.
//!
//! One `MockServer` stands in for everything remote:
//! - Railway GraphQL at `POST /graphql`
//! - DigitalOcean at `/v2/droplets`
//! - the supervisor's `/health` (droplets report `127.0.0.1` and
//!   `SUPERVISOR_PORT` is the mock server's port)
//!
//! PostgreSQL is replaced by an in-test `ReplicationManager`.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;
use wiremock::{
    matchers::{body_string_contains, method, path},
    Mock, MockServer, ResponseTemplate,
};

use ops_controller::{
    api::{self, status::StatusApiState},
    config::{Config, OperationalLimits},
    controller::{OpsController, ReplicationManager},
    error::AppError,
    metrics::AppMetrics,
    postgres::ApplyOutcome,
    scheduler::{cycle_once, StatusFeed},
    services::railway::RailwayClient,
    supervisor::SupervisorManager,
    types::ReplicationStatus,
};

// ---- Helpers ----------------------------------------------------------------

const WORKER_TOKEN: &str = "tr_wgt_integrationToken0123456789";
const TAG: &str = "trigger-supervisor-proj-1-default";

struct ReadyDatabase;

#[async_trait]
impl ReplicationManager for ReadyDatabase {
    async fn replication_status(&self) -> Result<ReplicationStatus, AppError> {
        Ok(ReplicationStatus {
            wal_level: "logical".into(),
            replica_identity: "full".into(),
            publication_exists: true,
            issues: Vec::new(),
        })
    }

    async fn apply_replication(&self) -> Result<ApplyOutcome, AppError> {
        Ok(ApplyOutcome {
            restart_required: false,
        })
    }
}

fn graphql(data: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({ "data": data }))
}

async fn mount_railway(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("query GetProject"))
        .respond_with(graphql(json!({
            "project": { "services": { "edges": [
                { "node": { "id": "svc-web", "name": "trigger.dev" } },
                { "node": { "id": "svc-reg", "name": "registry" } },
                { "node": { "id": "svc-pg", "name": "Postgres" } }
            ] } }
        })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("query GetDeployment("))
        .respond_with(graphql(json!({
            "deployments": { "edges": [{ "node": { "id": "dep-1" } }] }
        })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("query GetDeploymentLogs"))
        .respond_with(graphql(json!({
            "deploymentLogs": [
                { "message": "Webapp starting", "timestamp": "t0", "severity": "info" },
                { "message": format!("Worker group token: {}", WORKER_TOKEN), "timestamp": "t1", "severity": "info" }
            ]
        })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("query GetVariables"))
        .and(body_string_contains("svc-web"))
        .respond_with(graphql(json!({
            "variables": {
                "MANAGED_WORKER_SECRET": "managed-secret-value",
                "API_ORIGIN": "https://trigger.example.com"
            }
        })))
        .mount(server)
        .await;

    Mock::given(method("POST"))
        .and(path("/graphql"))
        .and(body_string_contains("query GetVariables"))
        .and(body_string_contains("svc-reg"))
        .respond_with(graphql(json!({
            "variables": { "RAILWAY_PUBLIC_DOMAIN": "registry.example.com" }
        })))
        .mount(server)
        .await;
}

fn droplet() -> Value {
    json!({
        "id": 7,
        "name": "trigger-supervisor-default-1700000000",
        "status": "active",
        "tags": [TAG, "trigger-supervisor", "ops-controller-deployed"],
        "created_at": "2024-05-01T12:00:00Z",
        "networks": { "v4": [{ "ip_address": "127.0.0.1", "type": "public" }], "v6": [] },
        "region": { "slug": "nyc1", "name": "New York 1" },
        "size_slug": "s-2vcpu-2gb"
    })
}

async fn mount_digitalocean(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/v2/droplets"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "droplets": [droplet()] })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/droplets/7"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "droplet": droplet() })))
        .mount(server)
        .await;

    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_string("ok"))
        .mount(server)
        .await;
}

fn test_config(server: &MockServer, state_dir: &TempDir) -> Config {
    let vars: HashMap<&str, String> = [
        ("RAILWAY_API_URL", format!("{}/graphql", server.uri())),
        ("RAILWAY_API_TOKEN", "rw-token".to_string()),
        ("RAILWAY_PROJECT_ID", "proj-1".to_string()),
        ("DIGITALOCEAN_API_URL", server.uri()),
        ("DIGITALOCEAN_TOKEN", "do-token".to_string()),
        ("DATABASE_URL", "postgres://u:p@127.0.0.1:1/db".to_string()),
        ("SUPERVISOR_PORT", server.address().port().to_string()),
        (
            "STATE_FILE",
            state_dir.path().join("state.json").to_string_lossy().to_string(),
        ),
    ]
    .into_iter()
    .collect();

    let mut config = Config::from_lookup(|key| vars.get(key).cloned()).unwrap();
    config.limits = OperationalLimits::fast();
    config
}

/// Run `cycles` monitoring cycles against the mocks and return the router
/// serving their results.
///
/// The `MockServer` and `TempDir` are returned so they outlive the test body.
async fn build_test_app(cycles: usize) -> (Router, MockServer, TempDir) {
    let server = MockServer::start().await;
    mount_railway(&server).await;
    mount_digitalocean(&server).await;

    let state_dir = tempfile::tempdir().unwrap();
    let config = test_config(&server, &state_dir);

    let metrics = Arc::new(AppMetrics::new().unwrap());
    let mut controller = OpsController::new(
        config.clone(),
        Arc::new(RailwayClient::new(&config)),
        Arc::new(ReadyDatabase),
        Arc::new(SupervisorManager::new(&config).unwrap()),
    )
    .with_metrics(metrics.clone());

    let feed = StatusFeed::new(Some(metrics));
    for _ in 0..cycles {
        cycle_once(&mut controller, &feed).await.unwrap();
    }

    let app = api::create_router(StatusApiState {
        feed,
        monitoring: (&config).into(),
    });
    (app, server, state_dir)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let resp = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    (status, bytes.to_vec())
}

async fn get_json(app: Router, uri: &str) -> (StatusCode, Value) {
    let (status, bytes) = get(app, uri).await;
    (status, serde_json::from_slice(&bytes).unwrap())
}

// ---- GET /health ------------------------------------------------------------

#[tokio::test]
async fn health_returns_200_with_ok_body() {
    let (app, _server, _dir) = build_test_app(0).await;
    let (status, body) = get(app, "/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"ok");
}

// ---- GET /status ------------------------------------------------------------

#[tokio::test]
async fn status_reports_converged_deployment() {
    let (app, _server, _dir) = build_test_app(2).await;
    let (status, json) = get_json(app, "/status").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["deployment_state"]["config_extracted"], true);
    assert_eq!(json["deployment_state"]["postgres_configured"], true);
    assert_eq!(json["deployment_state"]["supervisor_deployed"], true);
    assert_eq!(json["consecutive_healthy_cycles"], 2);
    assert_eq!(json["disabled"], false);
    assert_eq!(json["monitoring"]["supervisor_tag"], TAG);
    assert!(json["last_saved"].is_string());
}

#[tokio::test]
async fn status_exposes_railway_config_masked() {
    let (app, _server, _dir) = build_test_app(1).await;
    let (_, json) = get_json(app, "/status").await;

    let config = &json["config"];
    assert_eq!(config["TRIGGER_WORKER_TOKEN"], "tr_wgt_integrationTo...");
    assert_eq!(config["TRIGGER_API_URL"], "https://trigger.example.com");
    assert_eq!(config["OTEL_EXPORTER_OTLP_ENDPOINT"], "https://trigger.example.com/otel");
    assert_eq!(config["DOCKER_REGISTRY_URL"], "registry.example.com");
    assert!(!json.to_string().contains(WORKER_TOKEN));
}

#[tokio::test]
async fn second_cycle_probes_supervisor_health() {
    let (app, _server, _dir) = build_test_app(2).await;
    let (_, json) = get_json(app, "/status").await;

    let recent = json["recent_cycles"].as_array().unwrap();
    assert_eq!(recent.len(), 2);
    assert!(recent[0]["supervisor_healthy"].is_null());
    assert_eq!(recent[1]["supervisor_healthy"], true);
    assert_eq!(json["latest_cycle"]["fully_healthy"], true);
}

// ---- GET /status/history ----------------------------------------------------

#[tokio::test]
async fn history_returns_requested_window() {
    let (app, _server, _dir) = build_test_app(3).await;
    let (status, json) = get_json(app, "/status/history?limit=2").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["count"], 2);
    assert_eq!(json["cycles"][0]["consecutive_healthy_cycles"], 2);
    assert_eq!(json["cycles"][1]["consecutive_healthy_cycles"], 3);
}

#[tokio::test]
async fn history_rejects_oversized_limit() {
    let (app, _server, _dir) = build_test_app(0).await;
    let (status, json) = get_json(app, "/status/history?limit=1000").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].is_string());
}

// ---- GET /metrics -----------------------------------------------------------

#[tokio::test]
async fn metrics_reflect_completed_cycles() {
    let (app, _server, _dir) = build_test_app(2).await;
    let (status, body) = get(app, "/metrics").await;
    let text = String::from_utf8(body).unwrap();

    assert_eq!(status, StatusCode::OK);
    assert!(text.contains("ops_controller_cycles_total 2"));
    assert!(text.contains("ops_controller_healthy_streak 2"));
    assert!(text.contains("ops_controller_supervisor_healthy 1"));
    assert!(text.contains("ops_controller_deployments_total 0"));
}

#[tokio::test]
async fn unknown_route_returns_404() {
    let (app, _server, _dir) = build_test_app(0).await;
    let (status, _) = get(app, "/droplets").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}
