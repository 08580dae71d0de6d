//! Ops controller: the orchestration of configuration extraction,
//! PostgreSQL replication setup and supervisor deployment.
//!
//! The controller talks to the outside world through three traits so the
//! orchestration can be exercised without Railway, DigitalOcean or a
//! database:
//! - [`PlatformApi`] (Railway)
//! - [`ReplicationManager`] (PostgreSQL)
//! - [`SupervisorHost`] (DigitalOcean droplet + `/health`)

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::{self, Instant};

use crate::config::Config;
use crate::error::AppError;
use crate::history::CycleReport;
use crate::metrics::AppMetrics;
use crate::postgres::ApplyOutcome;
use crate::state::ControllerState;
use crate::types::{DeploymentInfo, HealthProbe, ReplicationStatus, SupervisorConfig};

#[cfg(test)]
pub(crate) mod mock;

/// Source of supervisor configuration and service restarts.
#[async_trait]
pub trait PlatformApi: Send + Sync {
    async fn fetch_configuration(&self, cached: &SupervisorConfig) -> Result<SupervisorConfig, AppError>;

    /// Returns whether a restart was issued.
    async fn restart_service(&self, service_name: &str) -> Result<bool, AppError>;

    /// Returns whether the service reported ready before `timeout`.
    async fn wait_for_service_ready(&self, service_name: &str, timeout: Duration) -> bool;
}

/// Inspects and applies logical replication settings.
#[async_trait]
pub trait ReplicationManager: Send + Sync {
    async fn replication_status(&self) -> Result<ReplicationStatus, AppError>;
    async fn apply_replication(&self) -> Result<ApplyOutcome, AppError>;
}

/// Where the supervisor runs.
#[async_trait]
pub trait SupervisorHost: Send + Sync {
    async fn deployment_info(&self) -> Result<Option<DeploymentInfo>, AppError>;
    async fn deploy(&self, config: &SupervisorConfig) -> Result<bool, AppError>;
    async fn probe_health(&self, ip_address: &str) -> HealthProbe;
    /// Returns how many supervisor hosts were removed.
    async fn destroy(&self) -> Result<usize, AppError>;
}

/// Confirmation phrase required before destroying the supervisor.
pub const DESTROY_CONFIRMATION: &str = "DESTROY";

/// Snapshot printed by `status`.
#[derive(Debug, Clone)]
pub struct StatusReport {
    pub replication: Result<ReplicationStatus, String>,
    pub supervisor: Result<Option<DeploymentInfo>, String>,
}

/// How far a cycle got before the streak is evaluated.
enum Convergence {
    /// Configuration could not be extracted; nothing else was checked.
    Aborted,
    /// Checks ran. Carries the quick health probe result when one ran.
    Checked(Option<bool>),
}

pub struct OpsController {
    config: Config,
    platform: Arc<dyn PlatformApi>,
    replication: Arc<dyn ReplicationManager>,
    supervisor: Arc<dyn SupervisorHost>,
    metrics: Option<Arc<AppMetrics>>,
    state: ControllerState,
}

impl OpsController {
    pub fn new(
        config: Config,
        platform: Arc<dyn PlatformApi>,
        replication: Arc<dyn ReplicationManager>,
        supervisor: Arc<dyn SupervisorHost>,
    ) -> Self {
        Self {
            config,
            platform,
            replication,
            supervisor,
            metrics: None,
            state: ControllerState::default(),
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<AppMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn state(&self) -> &ControllerState {
        &self.state
    }

    pub fn set_state(&mut self, state: ControllerState) {
        self.state = state;
    }

    pub fn load_state(&mut self) {
        self.state = ControllerState::load(&self.config.state_file);
        if self.state.consecutive_healthy_cycles > 0 {
            tracing::info!(
                "Resuming with {} consecutive healthy cycles",
                self.state.consecutive_healthy_cycles
            );
        }
    }

    pub fn save_state(&mut self) {
        let path = self.config.state_file.clone();
        if let Err(err) = self.state.save(&path) {
            tracing::warn!("Failed to save state to {}: {}", path.display(), err);
        }
    }

    pub fn validate_environment(&self) -> bool {
        tracing::info!("Validating environment configuration");
        match self.config.validate() {
            Ok(()) => {
                tracing::info!("Environment validated successfully");
                true
            }
            Err(err) => {
                tracing::error!("Environment validation failed: {}", err);
                false
            }
        }
    }

    /// Pull configuration from Railway. Without a worker token nothing is
    /// cached and `None` is returned.
    pub async fn extract_configuration(&mut self) -> Option<SupervisorConfig> {
        tracing::info!("Extracting configuration from Railway");

        let config = match self.platform.fetch_configuration(&self.state.config_cache).await {
            Ok(config) => config,
            Err(err) => {
                tracing::error!("Failed to extract configuration: {}", err);
                return None;
            }
        };

        if config.worker_token.as_deref().map_or(true, str::is_empty) {
            tracing::warn!("Could not extract worker token");
            if self.config.trigger_worker_token.is_none() {
                tracing::warn!("Tip: set TRIGGER_WORKER_TOKEN manually if logs have expired");
            }
            return None;
        }

        let entries = config.masked();
        tracing::info!("Extracted {} configuration values", entries.len());
        for (key, value) in &entries {
            tracing::info!("    {}: {}", key, value);
        }

        self.state.config_cache = config.clone();
        self.state.deployment_state.config_extracted = true;
        Some(config)
    }

    /// Bring logical replication up, restarting the database through
    /// Railway when the WAL level changed.
    pub async fn configure_postgres(&mut self) -> bool {
        tracing::info!("Configuring PostgreSQL for logical replication");

        match self.replication.replication_status().await {
            Ok(status) if status.is_configured() => {
                tracing::info!("PostgreSQL already configured: {}", status.summary());
                self.state.deployment_state.postgres_configured = true;
                return true;
            }
            Ok(status) => tracing::info!("Current status: {}", status.summary()),
            Err(err) => {
                tracing::error!("Failed to configure PostgreSQL: {}", err);
                return false;
            }
        }

        let outcome = match self.replication.apply_replication().await {
            Ok(outcome) => outcome,
            Err(err) => {
                tracing::warn!("PostgreSQL configuration incomplete: {}", err);
                return false;
            }
        };

        if outcome.restart_required {
            self.restart_database().await;
        }

        match self.replication.replication_status().await {
            Ok(status) if status.is_configured() => {
                tracing::info!("PostgreSQL configured successfully");
                self.state.deployment_state.postgres_configured = true;
                true
            }
            Ok(status) => {
                tracing::warn!("Configuration incomplete: {}", status.summary());
                false
            }
            Err(err) => {
                tracing::warn!("Could not verify PostgreSQL configuration: {}", err);
                false
            }
        }
    }

    async fn restart_database(&self) {
        let service = &self.config.db_service_name;
        tracing::warn!("PostgreSQL restart required for WAL level change");

        match self.platform.restart_service(service).await {
            Ok(true) => {
                tracing::info!("PostgreSQL ({}) restarted", service);
                time::sleep(self.config.limits.restart_grace).await;
                self.platform
                    .wait_for_service_ready(service, self.config.limits.droplet_wait_timeout)
                    .await;
            }
            Ok(false) => tracing::warn!(
                "Could not restart PostgreSQL service '{}' automatically",
                service
            ),
            Err(err) => tracing::warn!("Failed to restart PostgreSQL service '{}': {}", service, err),
        }
    }

    pub async fn deploy_supervisor(&mut self) -> bool {
        tracing::info!("Deploying supervisor to DigitalOcean");

        if self.state.config_cache.is_empty() {
            tracing::error!("No configuration available for deployment");
            return false;
        }

        match self.supervisor.deployment_info().await {
            Ok(Some(info)) => {
                tracing::info!(
                    "Supervisor already deployed at {}",
                    info.ip_address.as_deref().unwrap_or("(no ip yet)")
                );
                self.state.deployment_state.supervisor_deployed = true;
                return true;
            }
            Ok(None) => {}
            Err(err) => {
                tracing::error!("Failed to deploy supervisor: {}", err);
                return false;
            }
        }

        if let Some(metrics) = &self.metrics {
            metrics.deployments_total.inc();
        }

        match self.supervisor.deploy(&self.state.config_cache).await {
            Ok(true) => {
                tracing::info!("Supervisor deployed successfully");
                self.state.deployment_state.supervisor_deployed = true;
                if let Ok(Some(info)) = self.supervisor.deployment_info().await {
                    tracing::info!(
                        "Deployment details: name={} ip={} health={}",
                        info.name,
                        info.ip_address.as_deref().unwrap_or("-"),
                        info.health_url.as_deref().unwrap_or("-")
                    );
                }
                true
            }
            Ok(false) => {
                tracing::error!("Supervisor deployment failed");
                false
            }
            Err(err) => {
                tracing::error!("Failed to deploy supervisor: {}", err);
                false
            }
        }
    }

    /// One-shot deployment: validate, extract, configure, deploy.
    pub async fn run_full_deployment(&mut self) -> bool {
        if !self.validate_environment() {
            return false;
        }

        if self.extract_configuration().await.is_none() {
            tracing::error!("Cannot proceed without configuration");
            return false;
        }

        if !self.configure_postgres().await {
            tracing::warn!("PostgreSQL configuration failed, but continuing");
        }

        if !self.deploy_supervisor().await {
            return false;
        }

        self.log_summary();
        true
    }

    fn log_summary(&self) {
        let mark = |done: bool| if done { "yes" } else { "no" };
        let deployment = &self.state.deployment_state;
        tracing::info!("Configuration extracted: {}", mark(deployment.config_extracted));
        tracing::info!("PostgreSQL configured: {}", mark(deployment.postgres_configured));
        tracing::info!("Supervisor deployed: {}", mark(deployment.supervisor_deployed));

        if deployment.all_done() {
            tracing::info!("Deployment completed successfully");
        } else {
            tracing::warn!("Deployment partially completed");
        }
    }

    pub async fn check_status(&self) -> StatusReport {
        tracing::info!("Checking PostgreSQL configuration");
        let replication = self
            .replication
            .replication_status()
            .await
            .map_err(|err| err.to_string());
        match &replication {
            Ok(status) if status.is_configured() => tracing::info!("PostgreSQL: {}", status.summary()),
            Ok(status) => tracing::warn!("PostgreSQL: {}", status.summary()),
            Err(err) => tracing::error!("Could not check PostgreSQL: {}", err),
        }

        tracing::info!("Checking supervisor deployment");
        let supervisor = self
            .supervisor
            .deployment_info()
            .await
            .map_err(|err| err.to_string());
        match &supervisor {
            Ok(Some(info)) => {
                tracing::info!(
                    "Supervisor deployed at {}",
                    info.ip_address.as_deref().unwrap_or("(no ip yet)")
                );
                tracing::info!("  Status: {}", info.status);
                tracing::info!("  Region: {}", info.region);
                tracing::info!("  Size: {}", info.size);
                tracing::info!("  Health: {}", info.health_url.as_deref().unwrap_or("-"));
            }
            Ok(None) => tracing::warn!("No supervisor deployment found"),
            Err(err) => tracing::error!("Could not check supervisor: {}", err),
        }

        StatusReport {
            replication,
            supervisor,
        }
    }

    /// Destroy the supervisor when `confirmation` is exactly
    /// [`DESTROY_CONFIRMATION`].
    pub async fn destroy(&mut self, confirmation: &str) -> bool {
        if confirmation != DESTROY_CONFIRMATION {
            tracing::info!("Destruction cancelled");
            return false;
        }

        tracing::warn!("Destroying supervisor deployment");
        match self.supervisor.destroy().await {
            Ok(count) => {
                tracing::info!("Supervisor destroyed ({} droplet(s))", count);
                self.state.deployment_state.supervisor_deployed = false;
                true
            }
            Err(err) => {
                tracing::error!("Failed to destroy supervisor: {}", err);
                false
            }
        }
    }

    /// One monitoring cycle: converge whatever is missing, re-check what
    /// was done before, and track consecutive healthy cycles.
    pub async fn run_cycle(&mut self) -> CycleReport {
        let started_at = Utc::now();
        let clock = Instant::now();
        if let Some(metrics) = &self.metrics {
            metrics.cycles_total.inc();
        }

        let (fully_healthy, supervisor_healthy) = match self.converge().await {
            Convergence::Aborted => (false, None),
            Convergence::Checked(supervisor_healthy) => {
                let fully_healthy = self.state.deployment_state.all_done();
                self.track_streak(fully_healthy);
                (fully_healthy, supervisor_healthy)
            }
        };

        tracing::info!("Monitoring cycle completed");

        let report = CycleReport {
            started_at,
            duration_ms: clock.elapsed().as_millis() as u64,
            config_extracted: self.state.deployment_state.config_extracted,
            postgres_configured: self.state.deployment_state.postgres_configured,
            supervisor_deployed: self.state.deployment_state.supervisor_deployed,
            supervisor_healthy,
            fully_healthy,
            consecutive_healthy_cycles: self.state.consecutive_healthy_cycles,
            auto_disabled: self.state.is_disabled,
        };
        if let Some(metrics) = &self.metrics {
            metrics.observe_cycle(&report);
        }
        report
    }

    fn track_streak(&mut self, fully_healthy: bool) {
        if !fully_healthy {
            self.state.consecutive_healthy_cycles = 0;
            return;
        }

        let threshold = self.config.healthy_cycles_before_disable;
        self.state.consecutive_healthy_cycles += 1;
        tracing::info!(
            "System fully healthy (cycle {}/{})",
            self.state.consecutive_healthy_cycles,
            threshold
        );

        if self.config.auto_disable && self.state.consecutive_healthy_cycles >= threshold {
            tracing::info!(
                "Auto-disabling monitoring after {} healthy cycles; set IS_ACTIVE=true and clear the state file to re-enable",
                self.state.consecutive_healthy_cycles
            );
            self.state.is_disabled = true;
        }
    }

    async fn converge(&mut self) -> Convergence {
        let deployment = self.state.deployment_state.clone();

        if (!deployment.config_extracted || self.state.config_cache.is_empty())
            && self.extract_configuration().await.is_none()
        {
            tracing::warn!("Could not extract configuration, will retry next cycle");
            return Convergence::Aborted;
        }

        if !deployment.postgres_configured {
            tracing::info!("PostgreSQL not configured, configuring now");
            if !self.configure_postgres().await {
                tracing::warn!("PostgreSQL configuration failed, will retry next cycle");
            }
        } else {
            match self.replication.replication_status().await {
                Ok(status) if status.is_configured() => {
                    tracing::info!("PostgreSQL replication: configured");
                }
                Ok(status) => {
                    tracing::warn!("PostgreSQL replication: {}", status.summary());
                    self.state.deployment_state.postgres_configured = false;
                }
                Err(err) => tracing::warn!("Could not check PostgreSQL status: {}", err),
            }
        }

        if !deployment.supervisor_deployed {
            tracing::info!("Supervisor not deployed, deploying now");
            if !self.deploy_supervisor().await {
                tracing::warn!("Supervisor deployment failed, will retry next cycle");
            }
            return Convergence::Checked(None);
        }

        let probe = match self.supervisor.deployment_info().await {
            Ok(Some(info)) => match info.ip_address.as_deref() {
                Some(ip) => {
                    let probe = self.supervisor.probe_health(ip).await;
                    match &probe {
                        HealthProbe::Healthy => tracing::info!(
                            "Supervisor health: healthy at {}",
                            info.health_url.as_deref().unwrap_or(ip)
                        ),
                        HealthProbe::Unhealthy(code) => {
                            tracing::warn!("Supervisor health: unhealthy (HTTP {})", code)
                        }
                        HealthProbe::Unreachable(err) => {
                            tracing::warn!("Supervisor health: unreachable ({})", err)
                        }
                    }
                    Some(probe.is_healthy())
                }
                None => {
                    tracing::warn!("Supervisor: no IP address");
                    None
                }
            },
            Ok(None) => {
                tracing::warn!("Supervisor: not deployed");
                self.state.deployment_state.supervisor_deployed = false;
                None
            }
            Err(err) => {
                tracing::warn!("Could not check supervisor status: {}", err);
                None
            }
        };
        Convergence::Checked(probe)
    }
}
