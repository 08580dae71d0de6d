//! Supervisor droplet lifecycle on DigitalOcean.
//!
//! Droplets are found by the per-project supervisor tag, so at most one
//! supervisor is created per Railway project/environment.

use async_trait::async_trait;
use chrono::Utc;
use reqwest::Client;
use tokio::time::{self, Instant};

use crate::config::{Config, OperationalLimits};
use crate::controller::SupervisorHost;
use crate::error::AppError;
use crate::services::digitalocean::{CreateDropletRequest, DigitalOceanClient, Droplet};
use crate::supervisor::cloud_init;
use crate::types::{DeploymentInfo, HealthProbe, SupervisorConfig};

pub struct SupervisorManager {
    client: DigitalOceanClient,
    http: Client,
    tag: String,
    config: Config,
    limits: OperationalLimits,
}

impl SupervisorManager {
    pub fn new(config: &Config) -> Result<Self, AppError> {
        let http = Client::builder()
            .timeout(config.limits.health_request_timeout)
            .build()?;

        Ok(Self {
            client: DigitalOceanClient::new(&config.digitalocean_api_url, &config.digitalocean_token),
            http,
            tag: config.supervisor_tag(),
            config: config.clone(),
            limits: config.limits.clone(),
        })
    }

    pub fn tag(&self) -> &str {
        &self.tag
    }

    pub fn health_url(&self, ip_address: &str) -> String {
        format!("http://{}:{}/health", ip_address, self.config.supervisor_port)
    }

    pub async fn existing_droplets(&self) -> Result<Vec<Droplet>, AppError> {
        self.client.list_droplets_by_tag(&self.tag).await
    }

    pub async fn is_deployed(&self) -> Result<bool, AppError> {
        let droplets = self.existing_droplets().await?;
        if droplets.is_empty() {
            return Ok(false);
        }

        tracing::info!("Found {} existing supervisor droplet(s)", droplets.len());
        for droplet in &droplets {
            tracing::info!(
                "  {} ({}) - status: {}",
                droplet.name,
                droplet.public_ipv4().unwrap_or("no ip"),
                droplet.status
            );
        }
        Ok(true)
    }

    /// Create the supervisor droplet. Returns `None` when one already exists.
    pub async fn create_droplet(&self, config: &SupervisorConfig) -> Result<Option<Droplet>, AppError> {
        tracing::info!("Creating DigitalOcean droplet for supervisor");

        if self.is_deployed().await? {
            tracing::info!("Supervisor already deployed, skipping creation");
            return Ok(None);
        }

        let request = CreateDropletRequest {
            name: self.config.droplet_name(Utc::now().timestamp()),
            region: self.config.supervisor_region.clone(),
            size: self.config.supervisor_size.clone(),
            image: self.config.supervisor_image.clone(),
            user_data: cloud_init::render(config, &self.config.trigger_version, self.config.supervisor_port)?,
            monitoring: true,
            tags: vec![
                self.tag.clone(),
                "trigger-supervisor".to_string(),
                "ops-controller-deployed".to_string(),
            ],
        };

        let droplet = self.client.create_droplet(&request).await?;
        tracing::info!("Droplet created: {} (ID: {})", droplet.name, droplet.id);
        Ok(Some(droplet))
    }

    /// Poll until the droplet is `active` with a public IP, or time out.
    pub async fn wait_for_droplet_ready(&self, droplet_id: u64) -> Option<Droplet> {
        tracing::info!("Waiting for droplet {} to be ready", droplet_id);
        let deadline = Instant::now() + self.limits.droplet_wait_timeout;

        while Instant::now() < deadline {
            match self.client.get_droplet(droplet_id).await {
                Ok(droplet) if droplet.status == "active" && droplet.public_ipv4().is_some() => {
                    tracing::info!(
                        "Droplet ready with IP: {}",
                        droplet.public_ipv4().unwrap_or_default()
                    );
                    return Some(droplet);
                }
                Ok(droplet) => tracing::info!(
                    "Status: {}, IP: {}",
                    droplet.status,
                    droplet.public_ipv4().unwrap_or("pending")
                ),
                Err(err) => tracing::warn!("Error checking droplet status: {}", err),
            }
            time::sleep(self.limits.droplet_poll_interval).await;
        }

        tracing::warn!("Timeout waiting for droplet {}", droplet_id);
        None
    }

    /// One GET against the supervisor's `/health` endpoint.
    pub async fn probe_health(&self, ip_address: &str) -> HealthProbe {
        match self.http.get(self.health_url(ip_address)).send().await {
            Ok(response) if response.status().as_u16() == 200 => HealthProbe::Healthy,
            Ok(response) => HealthProbe::Unhealthy(response.status().as_u16()),
            Err(err) => HealthProbe::Unreachable(err.to_string()),
        }
    }

    /// Probe `/health` until it answers 200 or the attempts run out.
    pub async fn test_supervisor_health(&self, ip_address: &str) -> bool {
        tracing::info!(
            "Testing supervisor health at {}:{}",
            ip_address,
            self.config.supervisor_port
        );
        let attempts = self.limits.health_attempts.max(1);

        for attempt in 1..=attempts {
            if self.probe_health(ip_address).await.is_healthy() {
                tracing::info!("Supervisor is healthy (attempt {})", attempt);
                return true;
            }
            tracing::info!("Attempt {}/{}: not ready yet", attempt, attempts);
            if attempt < attempts {
                time::sleep(self.limits.health_retry_delay).await;
            }
        }

        tracing::warn!("Supervisor health check failed");
        false
    }

    /// Ensure a healthy supervisor runs for this project.
    pub async fn deploy(&self, config: &SupervisorConfig) -> Result<bool, AppError> {
        tracing::info!("Deploying supervisor to DigitalOcean");

        let missing = config.missing_required();
        if !missing.is_empty() {
            tracing::error!("Missing required configuration: {}", missing.join(", "));
            return Ok(false);
        }

        if let Some(existing) = self.existing_droplets().await?.into_iter().next() {
            tracing::info!(
                "Using existing droplet: {} ({})",
                existing.name,
                existing.public_ipv4().unwrap_or("no ip")
            );

            let ip = match existing.public_ipv4() {
                Some(ip) => ip.to_string(),
                None => match self.wait_for_droplet_ready(existing.id).await {
                    Some(ready) => ready.public_ipv4().unwrap_or_default().to_string(),
                    None => return Ok(false),
                },
            };

            if self.test_supervisor_health(&ip).await {
                tracing::info!("Supervisor deployment verified");
                return Ok(true);
            }
            tracing::warn!("Existing supervisor not healthy, consider manual intervention");
            return Ok(false);
        }

        let Some(droplet) = self.create_droplet(config).await? else {
            return Ok(false);
        };

        let Some(ready) = self.wait_for_droplet_ready(droplet.id).await else {
            tracing::error!("Droplet creation failed or timed out");
            return Ok(false);
        };
        let ip = ready.public_ipv4().unwrap_or_default().to_string();

        if !self.test_supervisor_health(&ip).await {
            tracing::warn!(
                "Supervisor deployment completed but health check failed; check cloud-init logs: ssh root@{} 'tail -f /var/log/cloud-init-output.log'",
                ip
            );
            return Ok(false);
        }

        tracing::info!("Supervisor successfully deployed at {}", self.health_url(&ip));
        Ok(true)
    }

    /// Details of the first tagged droplet, refreshed from the API.
    pub async fn deployment_info(&self) -> Result<Option<DeploymentInfo>, AppError> {
        let Some(first) = self.existing_droplets().await?.into_iter().next() else {
            return Ok(None);
        };
        let droplet = self.client.get_droplet(first.id).await?;
        let ip_address = droplet.public_ipv4().map(str::to_string);

        Ok(Some(DeploymentInfo {
            health_url: ip_address.as_deref().map(|ip| self.health_url(ip)),
            region: droplet.region_slug().to_string(),
            size: droplet.size_slug.clone().unwrap_or_default(),
            name: droplet.name,
            id: droplet.id,
            ip_address,
            status: droplet.status,
            created_at: droplet.created_at,
        }))
    }

    /// Destroy every tagged droplet, stopping at the first failure.
    /// Returns how many droplets were destroyed.
    pub async fn destroy(&self) -> Result<usize, AppError> {
        let droplets = self.existing_droplets().await?;
        if droplets.is_empty() {
            tracing::info!("No supervisor droplets to destroy");
            return Ok(0);
        }

        for droplet in &droplets {
            tracing::warn!("Destroying droplet: {}", droplet.name);
            self.client.delete_droplet(droplet.id).await?;
            tracing::info!("Destroyed droplet: {}", droplet.name);
        }
        Ok(droplets.len())
    }
}

#[async_trait]
impl SupervisorHost for SupervisorManager {
    async fn deployment_info(&self) -> Result<Option<DeploymentInfo>, AppError> {
        SupervisorManager::deployment_info(self).await
    }

    async fn deploy(&self, config: &SupervisorConfig) -> Result<bool, AppError> {
        SupervisorManager::deploy(self, config).await
    }

    async fn probe_health(&self, ip_address: &str) -> HealthProbe {
        SupervisorManager::probe_health(self, ip_address).await
    }

    async fn destroy(&self) -> Result<usize, AppError> {
        SupervisorManager::destroy(self).await
    }
}
