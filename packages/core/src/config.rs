use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::AppError;

pub const DEFAULT_RAILWAY_API_URL: &str = "https://backboard.railway.app/graphql/v2";
pub const DEFAULT_DIGITALOCEAN_API_URL: &str = "https://api.digitalocean.com";
pub const SUPERVISOR_TAG_PREFIX: &str = "trigger-supervisor";
pub const DEFAULT_STATE_FILE: &str = "/tmp/ops-controller-state.json";

/// Runtime configuration, read from the environment (and `.env`).
#[derive(Debug, Clone)]
pub struct Config {
    // DigitalOcean
    pub digitalocean_token: String,
    pub digitalocean_api_url: String,
    pub supervisor_region: String,
    pub supervisor_size: String,
    pub supervisor_image: String,
    pub supervisor_port: u16,

    // Railway
    pub railway_api_token: String,
    pub railway_api_url: String,
    pub railway_project_id: String,
    pub railway_environment_id: String,
    pub db_service_name: String,
    pub webapp_service_name: String,
    pub registry_service_name: String,

    // PostgreSQL
    pub database_url: String,

    // Trigger.dev
    pub trigger_version: String,
    pub trigger_worker_token: Option<String>,
    pub docker_registry_url: Option<String>,
    pub docker_registry_username: Option<String>,
    pub docker_registry_password: Option<String>,

    // Monitoring
    pub is_active: bool,
    pub check_interval_minutes: u64,
    pub auto_disable: bool,
    pub healthy_cycles_before_disable: u32,
    pub state_file: PathBuf,
    pub status_port: Option<u16>,

    pub limits: OperationalLimits,
}

/// Fixed retry counts, timeouts and poll intervals.
///
/// Not read from the environment; tests shrink them to keep runs fast.
#[derive(Debug, Clone)]
pub struct OperationalLimits {
    pub graphql_attempts: u32,
    pub graphql_retry_delay: Duration,
    pub log_scan_lines: u32,
    pub droplet_wait_timeout: Duration,
    pub droplet_poll_interval: Duration,
    pub health_attempts: u32,
    pub health_retry_delay: Duration,
    pub health_request_timeout: Duration,
    pub restart_grace: Duration,
    pub service_ready_poll: Duration,
    pub idle_sleep: Duration,
}

impl Default for OperationalLimits {
    fn default() -> Self {
        Self {
            graphql_attempts: 3,
            graphql_retry_delay: Duration::from_secs(2),
            log_scan_lines: 1000,
            droplet_wait_timeout: Duration::from_secs(300),
            droplet_poll_interval: Duration::from_secs(10),
            health_attempts: 30,
            health_retry_delay: Duration::from_secs(10),
            health_request_timeout: Duration::from_secs(5),
            restart_grace: Duration::from_secs(30),
            service_ready_poll: Duration::from_secs(10),
            idle_sleep: Duration::from_secs(300),
        }
    }
}

impl OperationalLimits {
    /// Millisecond-scale limits for tests that drive the real retry loops.
    pub fn fast() -> Self {
        Self {
            graphql_attempts: 3,
            graphql_retry_delay: Duration::from_millis(5),
            log_scan_lines: 1000,
            droplet_wait_timeout: Duration::from_millis(500),
            droplet_poll_interval: Duration::from_millis(10),
            health_attempts: 3,
            health_retry_delay: Duration::from_millis(10),
            health_request_timeout: Duration::from_millis(500),
            restart_grace: Duration::from_millis(1),
            service_ready_poll: Duration::from_millis(10),
            idle_sleep: Duration::from_millis(10),
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    ///
    /// Missing required values are left empty here and reported by
    /// [`Config::validate`], so the monitoring loop can keep re-checking
    /// them every cycle.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());
        let optional = |key: &str| lookup(key).filter(|v| !v.is_empty());
        let flag = |key: &str, default: &str| get(key, default).eq_ignore_ascii_case("true");

        let check_interval_minutes = get("CHECK_INTERVAL", "1")
            .trim()
            .parse::<u64>()
            .map_err(|_| "CHECK_INTERVAL must be a valid number")?;

        let healthy_cycles_before_disable = get("HEALTHY_CYCLES_BEFORE_DISABLE", "3")
            .trim()
            .parse::<u32>()
            .map_err(|_| "HEALTHY_CYCLES_BEFORE_DISABLE must be a valid number")?;

        let supervisor_port = get("SUPERVISOR_PORT", "8020")
            .trim()
            .parse::<u16>()
            .map_err(|_| "SUPERVISOR_PORT must be a valid port")?;

        let status_port = match optional("STATUS_PORT") {
            Some(raw) => Some(
                raw.trim()
                    .parse::<u16>()
                    .map_err(|_| "STATUS_PORT must be a valid port")?,
            ),
            None => None,
        };

        Ok(Self {
            digitalocean_token: get("DIGITALOCEAN_TOKEN", ""),
            digitalocean_api_url: get("DIGITALOCEAN_API_URL", DEFAULT_DIGITALOCEAN_API_URL),
            supervisor_region: get("SUPERVISOR_REGION", "nyc1"),
            supervisor_size: get("SUPERVISOR_SIZE", "s-2vcpu-2gb"),
            supervisor_image: get("SUPERVISOR_IMAGE", "docker-20-04"),
            supervisor_port,
            railway_api_token: get("RAILWAY_API_TOKEN", ""),
            railway_api_url: get("RAILWAY_API_URL", DEFAULT_RAILWAY_API_URL),
            railway_project_id: get("RAILWAY_PROJECT_ID", ""),
            railway_environment_id: get("RAILWAY_ENVIRONMENT_ID", ""),
            db_service_name: get("DB_SERVICE_NAME", "Postgres"),
            webapp_service_name: get("WEBAPP_SERVICE_NAME", "trigger.dev"),
            registry_service_name: get("REGISTRY_SERVICE_NAME", "registry"),
            database_url: get("DATABASE_URL", ""),
            trigger_version: get("TRIGGER_VERSION", "v4.0.0"),
            trigger_worker_token: optional("TRIGGER_WORKER_TOKEN"),
            docker_registry_url: optional("DOCKER_REGISTRY_URL"),
            docker_registry_username: optional("DOCKER_REGISTRY_USERNAME"),
            docker_registry_password: optional("DOCKER_REGISTRY_PASSWORD"),
            is_active: flag("IS_ACTIVE", "true"),
            check_interval_minutes,
            auto_disable: flag("AUTO_DISABLE", "false"),
            healthy_cycles_before_disable,
            state_file: PathBuf::from(get("STATE_FILE", DEFAULT_STATE_FILE)),
            status_port,
            limits: OperationalLimits::default(),
        })
    }

    /// Check that every required variable is present and the check
    /// interval is within 1..=60 minutes.
    pub fn validate(&self) -> Result<(), AppError> {
        let required = [
            ("DIGITALOCEAN_TOKEN", &self.digitalocean_token),
            ("RAILWAY_API_TOKEN", &self.railway_api_token),
            ("RAILWAY_PROJECT_ID", &self.railway_project_id),
            ("DATABASE_URL", &self.database_url),
        ];

        let missing: Vec<&str> = required
            .iter()
            .filter(|(_, value)| value.is_empty())
            .map(|(name, _)| *name)
            .collect();

        if !missing.is_empty() {
            return Err(AppError::Config(format!(
                "Missing required environment variables: {}",
                missing.join(", ")
            )));
        }

        if !(1..=60).contains(&self.check_interval_minutes) {
            return Err(AppError::Config(format!(
                "CHECK_INTERVAL must be between 1 and 60 minutes, got {}",
                self.check_interval_minutes
            )));
        }

        Ok(())
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_minutes * 60)
    }

    fn environment_short_id(&self) -> &str {
        if self.railway_environment_id.is_empty() {
            return "default";
        }
        match self.railway_environment_id.char_indices().nth(8) {
            Some((idx, _)) => &self.railway_environment_id[..idx],
            None => &self.railway_environment_id,
        }
    }

    /// Tag that marks every droplet owned by this project/environment.
    pub fn supervisor_tag(&self) -> String {
        format!(
            "{}-{}-{}",
            SUPERVISOR_TAG_PREFIX,
            self.railway_project_id,
            self.environment_short_id()
        )
    }

    pub fn droplet_name(&self, unix_timestamp: i64) -> String {
        format!(
            "{}-{}-{}",
            SUPERVISOR_TAG_PREFIX,
            self.environment_short_id(),
            unix_timestamp
        )
    }
}
