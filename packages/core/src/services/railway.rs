//! Railway GraphQL client.
//!
//! Reads the values the supervisor needs out of the Railway project:
//! service variables from the webapp and registry, and the worker token the
//! webapp prints to its deployment logs on first boot. Also redeploys the
//! database service after a WAL level change.

use std::collections::HashMap;
use std::sync::OnceLock;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use regex::Regex;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tokio::time::{self, Instant};

use crate::cache::TtlCache;
use crate::config::{Config, OperationalLimits};
use crate::controller::PlatformApi;
use crate::error::AppError;
use crate::logging::mask;
use crate::types::SupervisorConfig;

/// How long the project's service list is reused between lookups.
const SERVICE_LIST_TTL: Duration = Duration::from_secs(60);

/// Names a PostgreSQL service commonly goes by in Railway templates.
const POSTGRES_FALLBACK_NAMES: &[&str] = &["Postgres", "postgres", "PostgreSQL", "Database", "DB"];

const WORKER_TOKEN_PREFIX: &str = "tr_wgt_";

const PROJECT_SERVICES_QUERY: &str = r#"query GetProject($projectId: String!) {
    project(id: $projectId) {
        services { edges { node { id name } } }
    }
}"#;

const LATEST_DEPLOYMENT_QUERY: &str = r#"query GetDeployment($environmentId: String!, $projectId: String!, $serviceId: String!) {
    deployments(
        input: { environmentId: $environmentId, projectId: $projectId, serviceId: $serviceId, status: { in: SUCCESS } }
        last: 1
    ) {
        edges { node { id } }
    }
}"#;

const VARIABLES_QUERY: &str = r#"query GetVariables($projectId: String!, $environmentId: String!, $serviceId: String!) {
    variables(projectId: $projectId, environmentId: $environmentId, serviceId: $serviceId)
}"#;

const DEPLOYMENT_LOGS_QUERY: &str = r#"query GetDeploymentLogs($deploymentId: String!, $limit: Int!, $filter: String) {
    deploymentLogs(deploymentId: $deploymentId, limit: $limit, filter: $filter) {
        message
        timestamp
        severity
    }
}"#;

const REDEPLOY_MUTATION: &str = r#"mutation RestartService($serviceId: String!, $environmentId: String!) {
    serviceInstanceRedeploy(serviceId: $serviceId, environmentId: $environmentId)
}"#;

fn worker_token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"tr_wgt_[a-zA-Z0-9]+").expect("worker token pattern is valid"))
}

/// Last worker token printed in `logs`, if any.
pub fn find_worker_token(logs: &str) -> Option<String> {
    worker_token_pattern()
        .find_iter(logs)
        .last()
        .map(|m| m.as_str().to_string())
}

/// A Railway service (id + display name).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RailwayService {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct GraphQlResponse<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Debug, Deserialize)]
struct GraphQlError {
    message: String,
}

#[derive(Debug, Deserialize)]
struct Connection<T> {
    edges: Vec<Edge<T>>,
}

#[derive(Debug, Deserialize)]
struct Edge<T> {
    node: T,
}

#[derive(Debug, Deserialize)]
struct ProjectData {
    project: ProjectServices,
}

#[derive(Debug, Deserialize)]
struct ProjectServices {
    services: Connection<RailwayService>,
}

#[derive(Debug, Deserialize)]
struct DeploymentsData {
    deployments: Connection<DeploymentNode>,
}

#[derive(Debug, Deserialize)]
struct DeploymentNode {
    id: String,
}

#[derive(Debug, Deserialize)]
struct VariablesData {
    #[serde(default)]
    variables: HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeploymentLogsData {
    #[serde(default)]
    deployment_logs: Vec<Option<LogLine>>,
}

#[derive(Debug, Deserialize)]
struct LogLine {
    #[serde(default)]
    message: String,
}

pub struct RailwayClient {
    api_url: String,
    token: String,
    http: Client,
    project_id: String,
    environment_id: String,
    db_service_name: String,
    webapp_service_name: String,
    registry_service_name: String,
    manual_worker_token: Option<String>,
    registry_url_override: Option<String>,
    registry_username: Option<String>,
    registry_password: Option<String>,
    limits: OperationalLimits,
    services: Mutex<TtlCache<Vec<RailwayService>>>,
}

impl RailwayClient {
    pub fn new(config: &Config) -> Self {
        Self {
            api_url: config.railway_api_url.clone(),
            token: config.railway_api_token.clone(),
            http: Client::new(),
            project_id: config.railway_project_id.clone(),
            environment_id: config.railway_environment_id.clone(),
            db_service_name: config.db_service_name.clone(),
            webapp_service_name: config.webapp_service_name.clone(),
            registry_service_name: config.registry_service_name.clone(),
            manual_worker_token: config.trigger_worker_token.clone(),
            registry_url_override: config.docker_registry_url.clone(),
            registry_username: config.docker_registry_username.clone(),
            registry_password: config.docker_registry_password.clone(),
            limits: config.limits.clone(),
            services: Mutex::new(TtlCache::new(SERVICE_LIST_TTL)),
        }
    }

    /// Execute a GraphQL request, retrying with a fixed delay.
    pub async fn graphql<T: DeserializeOwned>(&self, query: &str, variables: Value) -> Result<T, AppError> {
        let attempts = self.limits.graphql_attempts.max(1);
        let mut attempt = 1;

        loop {
            match self.graphql_once(query, &variables).await {
                Ok(data) => return Ok(data),
                Err(err) if attempt < attempts => {
                    tracing::warn!("Railway request failed (attempt {}/{}): {}", attempt, attempts, err);
                    time::sleep(self.retry_delay()).await;
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn retry_delay(&self) -> Duration {
        let base = self.limits.graphql_retry_delay;
        let jitter_ms = (base.as_millis() / 10) as u64;
        base + Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
    }

    async fn graphql_once<T: DeserializeOwned>(&self, query: &str, variables: &Value) -> Result<T, AppError> {
        let response = self
            .http
            .post(&self.api_url)
            .bearer_auth(&self.token)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AppError::Network(format!(
                "Railway returned HTTP {}",
                response.status()
            )));
        }

        let body = response.json::<GraphQlResponse<T>>().await?;

        if !body.errors.is_empty() {
            let messages: Vec<String> = body.errors.into_iter().map(|e| e.message).collect();
            return Err(AppError::GraphQl(messages.join("; ")));
        }

        body.data
            .ok_or_else(|| AppError::Parse("GraphQL response had no data".into()))
    }

    /// Every service in the project. Served from a short-lived cache.
    pub async fn list_services(&self) -> Result<Vec<RailwayService>, AppError> {
        if let Some(services) = self.services.lock().await.get() {
            return Ok(services);
        }

        let data: ProjectData = self
            .graphql(PROJECT_SERVICES_QUERY, json!({ "projectId": self.project_id }))
            .await?;
        let services: Vec<RailwayService> = data
            .project
            .services
            .edges
            .into_iter()
            .map(|edge| edge.node)
            .collect();

        self.services.lock().await.store(services.clone());
        Ok(services)
    }

    /// Service id for `name`, matched case-insensitively.
    pub async fn service_id(&self, name: &str) -> Result<Option<String>, AppError> {
        let services = self.list_services().await?;
        Ok(services
            .into_iter()
            .find(|service| service.name.eq_ignore_ascii_case(name))
            .map(|service| service.id))
    }

    /// Try the configured database name, then the usual Railway template
    /// names. Returns the name that matched.
    pub async fn find_postgres_service(&self) -> Result<Option<String>, AppError> {
        let mut candidates: Vec<&str> = vec![self.db_service_name.as_str()];
        for name in POSTGRES_FALLBACK_NAMES {
            if !candidates.contains(name) {
                candidates.push(name);
            }
        }

        tracing::info!("Searching for PostgreSQL service in: {:?}", candidates);

        for name in candidates {
            if let Some(id) = self.service_id(name).await? {
                tracing::info!("Found PostgreSQL service '{}' (ID: {})", name, id);
                return Ok(Some(name.to_string()));
            }
        }

        tracing::warn!("PostgreSQL service not found");
        self.log_available_services().await;
        Ok(None)
    }

    async fn log_available_services(&self) {
        match self.list_services().await {
            Ok(services) if services.is_empty() => tracing::warn!("No services found in project"),
            Ok(services) => {
                for service in services {
                    let short_id: String = service.id.chars().take(12).collect();
                    tracing::info!("Available service: {} (ID: {}...)", service.name, short_id);
                }
            }
            Err(err) => tracing::warn!("Could not list services: {}", err),
        }
    }

    /// Id of the most recent successful deployment of `service_name`.
    pub async fn latest_deployment_id(&self, service_name: &str) -> Result<Option<String>, AppError> {
        let Some(service_id) = self.service_id(service_name).await? else {
            return Ok(None);
        };

        let data: DeploymentsData = self
            .graphql(
                LATEST_DEPLOYMENT_QUERY,
                json!({
                    "environmentId": self.environment_id,
                    "projectId": self.project_id,
                    "serviceId": service_id,
                }),
            )
            .await?;

        let id = data.deployments.edges.into_iter().next().map(|edge| edge.node.id);
        if id.is_none() {
            tracing::warn!("No successful deployments found for {}", service_name);
        }
        Ok(id)
    }

    /// Environment variables of a service. Unknown services yield an empty map.
    pub async fn service_variables(&self, service_name: &str) -> Result<HashMap<String, String>, AppError> {
        let Some(service_id) = self.service_id(service_name).await? else {
            tracing::warn!("Service '{}' not found", service_name);
            return Ok(HashMap::new());
        };

        let data: VariablesData = self
            .graphql(
                VARIABLES_QUERY,
                json!({
                    "projectId": self.project_id,
                    "environmentId": self.environment_id,
                    "serviceId": service_id,
                }),
            )
            .await?;

        Ok(data.variables)
    }

    /// Log messages of the latest successful deployment, newline-joined.
    ///
    /// Failures degrade to an empty string: logs are a best-effort source.
    pub async fn deployment_logs(&self, service_name: &str, limit: u32, filter: Option<&str>) -> String {
        match self.try_deployment_logs(service_name, limit, filter).await {
            Ok(logs) => logs,
            Err(err) => {
                tracing::warn!("Failed to get logs for {}: {}", service_name, err);
                String::new()
            }
        }
    }

    async fn try_deployment_logs(
        &self,
        service_name: &str,
        limit: u32,
        filter: Option<&str>,
    ) -> Result<String, AppError> {
        let Some(deployment_id) = self.latest_deployment_id(service_name).await? else {
            return Ok(String::new());
        };

        let mut variables = json!({ "deploymentId": deployment_id, "limit": limit });
        if let Some(filter) = filter {
            variables["filter"] = Value::from(filter);
        }

        let data: DeploymentLogsData = self.graphql(DEPLOYMENT_LOGS_QUERY, variables).await?;
        let lines: Vec<String> = data
            .deployment_logs
            .into_iter()
            .flatten()
            .map(|line| line.message)
            .collect();

        Ok(lines.join("\n"))
    }

    /// Worker token, by priority: manual override, cached value, webapp logs.
    pub async fn extract_worker_token(&self, cached: Option<&str>) -> Option<String> {
        if let Some(token) = &self.manual_worker_token {
            tracing::info!("Using manually configured worker token: {}", mask(token));
            return Some(token.clone());
        }

        if let Some(token) = cached.filter(|t| !t.is_empty()) {
            tracing::info!("Using cached worker token: {}", mask(token));
            return Some(token.to_string());
        }

        tracing::info!("Extracting worker token from {} logs", self.webapp_service_name);
        let logs = self
            .deployment_logs(
                &self.webapp_service_name,
                self.limits.log_scan_lines,
                Some(WORKER_TOKEN_PREFIX),
            )
            .await;

        if logs.is_empty() {
            tracing::warn!("No webapp logs found (logs may have expired)");
            return None;
        }

        match find_worker_token(&logs) {
            Some(token) => {
                tracing::info!("Found worker token in logs: {}", mask(&token));
                Some(token)
            }
            None => {
                tracing::warn!(
                    "No worker token found in logs; set TRIGGER_WORKER_TOKEN manually if logs have expired"
                );
                None
            }
        }
    }

    async fn variables_or_empty(&self, service_name: &str) -> HashMap<String, String> {
        self.service_variables(service_name).await.unwrap_or_else(|err| {
            tracing::warn!("Failed to get variables for {}: {}", service_name, err);
            HashMap::new()
        })
    }

    /// Assemble the supervisor configuration from the Railway services.
    pub async fn get_configuration(&self, cached: &SupervisorConfig) -> Result<SupervisorConfig, AppError> {
        tracing::info!("Fetching configuration from Railway services");

        let mut config = SupervisorConfig {
            worker_token: self.extract_worker_token(cached.worker_token.as_deref()).await,
            registry_username: self.registry_username.clone(),
            registry_password: self.registry_password.clone(),
            ..Default::default()
        };

        let webapp = self.variables_or_empty(&self.webapp_service_name).await;
        if !webapp.is_empty() {
            config.managed_worker_secret =
                Some(webapp.get("MANAGED_WORKER_SECRET").cloned().unwrap_or_default());
            config.api_url = Some(webapp.get("API_ORIGIN").cloned().unwrap_or_default());
        }

        config.registry_url = match &self.registry_url_override {
            Some(url) => Some(url.clone()),
            None => {
                let registry = self.variables_or_empty(&self.registry_service_name).await;
                registry.get("RAILWAY_PUBLIC_DOMAIN").cloned()
            }
        };

        if let Some(api_url) = config.api_url.as_deref().filter(|url| !url.is_empty()) {
            config.otel_endpoint = Some(format!("{}/otel", api_url));
        }

        Ok(config)
    }

    /// Redeploy a service. Database-looking names that do not resolve are
    /// retried through [`RailwayClient::find_postgres_service`].
    pub async fn restart_service(&self, service_name: &str) -> Result<bool, AppError> {
        let mut name = service_name.to_string();
        let mut service_id = self.service_id(&name).await?;
        if service_id.is_none() {
            // The cached list may predate the service.
            self.services.lock().await.invalidate();
            service_id = self.service_id(&name).await?;
        }

        let looks_like_database = ["postgres", "postgresql", "database", "db"]
            .contains(&service_name.to_ascii_lowercase().as_str());

        if service_id.is_none() && looks_like_database {
            tracing::warn!(
                "Service '{}' not found, trying PostgreSQL service detection",
                service_name
            );
            if let Some(detected) = self.find_postgres_service().await? {
                service_id = self.service_id(&detected).await?;
                name = detected;
            }
        }

        let Some(service_id) = service_id else {
            tracing::warn!("Cannot restart - service '{}' not found", name);
            return Ok(false);
        };

        let _: Value = self
            .graphql(
                REDEPLOY_MUTATION,
                json!({ "serviceId": service_id, "environmentId": self.environment_id }),
            )
            .await?;

        tracing::info!("Restarted service: {}", name);
        Ok(true)
    }

    /// Poll recent logs until the service reports `ready` or `started`.
    pub async fn wait_for_service_ready(&self, service_name: &str, timeout: Duration) -> bool {
        tracing::info!("Waiting for {} to be ready", service_name);
        let deadline = Instant::now() + timeout;

        while Instant::now() < deadline {
            let logs = self.deployment_logs(service_name, 50, None).await.to_lowercase();
            if logs.contains("ready") || logs.contains("started") {
                tracing::info!("{} is ready", service_name);
                return true;
            }
            time::sleep(self.limits.service_ready_poll).await;
        }

        tracing::warn!("Timeout waiting for {}", service_name);
        false
    }
}

#[async_trait]
impl PlatformApi for RailwayClient {
    async fn fetch_configuration(&self, cached: &SupervisorConfig) -> Result<SupervisorConfig, AppError> {
        self.get_configuration(cached).await
    }

    async fn restart_service(&self, service_name: &str) -> Result<bool, AppError> {
        RailwayClient::restart_service(self, service_name).await
    }

    async fn wait_for_service_ready(&self, service_name: &str, timeout: Duration) -> bool {
        RailwayClient::wait_for_service_ready(self, service_name, timeout).await
    }
}
