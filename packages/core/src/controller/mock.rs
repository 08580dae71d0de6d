//! In-memory stand-ins for Railway, PostgreSQL and DigitalOcean.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use super::{PlatformApi, ReplicationManager, SupervisorHost};
use crate::error::AppError;
use crate::postgres::{replication_issues, ApplyOutcome};
use crate::types::{DeploymentInfo, HealthProbe, ReplicationStatus, SupervisorConfig};

pub fn healthy_status() -> ReplicationStatus {
    ReplicationStatus {
        wal_level: "logical".into(),
        replica_identity: "full".into(),
        publication_exists: true,
        issues: Vec::new(),
    }
}

fn broken_status() -> ReplicationStatus {
    ReplicationStatus {
        wal_level: "replica".into(),
        replica_identity: "default".into(),
        publication_exists: false,
        issues: replication_issues("replica", "default", false),
    }
}

pub struct MockPlatform {
    config: Mutex<SupervisorConfig>,
    cached_token: Mutex<Option<String>>,
    restarted: Mutex<Vec<String>>,
    awaited: Mutex<Vec<String>>,
    fetches: AtomicUsize,
}

impl MockPlatform {
    pub fn with_token(token: &str) -> Self {
        Self {
            config: Mutex::new(SupervisorConfig {
                worker_token: Some(token.to_string()),
                managed_worker_secret: Some("managed-secret".into()),
                api_url: Some("https://trigger.example.com".into()),
                ..Default::default()
            }),
            cached_token: Mutex::new(None),
            restarted: Mutex::new(Vec::new()),
            awaited: Mutex::new(Vec::new()),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn set_config(&self, config: SupervisorConfig) {
        *self.config.lock().unwrap() = config;
    }

    pub fn last_cached_token(&self) -> Option<String> {
        self.cached_token.lock().unwrap().clone()
    }

    pub fn restarted(&self) -> Vec<String> {
        self.restarted.lock().unwrap().clone()
    }

    pub fn awaited(&self) -> Vec<String> {
        self.awaited.lock().unwrap().clone()
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformApi for MockPlatform {
    async fn fetch_configuration(&self, cached: &SupervisorConfig) -> Result<SupervisorConfig, AppError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        *self.cached_token.lock().unwrap() = cached.worker_token.clone();
        Ok(self.config.lock().unwrap().clone())
    }

    async fn restart_service(&self, service_name: &str) -> Result<bool, AppError> {
        self.restarted.lock().unwrap().push(service_name.to_string());
        Ok(true)
    }

    async fn wait_for_service_ready(&self, service_name: &str, _timeout: Duration) -> bool {
        self.awaited.lock().unwrap().push(service_name.to_string());
        true
    }
}

/// Reports broken replication until `apply_replication` runs.
pub struct MockReplication {
    configured: AtomicBool,
    restart_on_apply: AtomicBool,
    apply_fails: AtomicBool,
    pub apply_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
}

impl MockReplication {
    pub fn configured() -> Self {
        Self {
            configured: AtomicBool::new(true),
            restart_on_apply: AtomicBool::new(false),
            apply_fails: AtomicBool::new(false),
            apply_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
        }
    }

    pub fn start_unconfigured(&self, restart_on_apply: bool) {
        self.configured.store(false, Ordering::SeqCst);
        self.restart_on_apply.store(restart_on_apply, Ordering::SeqCst);
    }

    pub fn fail_apply(&self) {
        self.apply_fails.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ReplicationManager for MockReplication {
    async fn replication_status(&self) -> Result<ReplicationStatus, AppError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        if self.configured.load(Ordering::SeqCst) {
            Ok(healthy_status())
        } else {
            Ok(broken_status())
        }
    }

    async fn apply_replication(&self) -> Result<ApplyOutcome, AppError> {
        self.apply_calls.fetch_add(1, Ordering::SeqCst);
        if self.apply_fails.load(Ordering::SeqCst) {
            return Err(AppError::Provision("permission denied to set wal_level".into()));
        }
        self.configured.store(true, Ordering::SeqCst);
        Ok(ApplyOutcome {
            restart_required: self.restart_on_apply.load(Ordering::SeqCst),
        })
    }
}

pub struct MockSupervisor {
    ip_address: String,
    present: AtomicBool,
    probe: Mutex<HealthProbe>,
    pub deploy_calls: AtomicUsize,
    pub destroy_calls: AtomicUsize,
    pub info_calls: AtomicUsize,
}

impl MockSupervisor {
    pub fn deployed(ip_address: &str) -> Self {
        Self {
            ip_address: ip_address.to_string(),
            present: AtomicBool::new(true),
            probe: Mutex::new(HealthProbe::Healthy),
            deploy_calls: AtomicUsize::new(0),
            destroy_calls: AtomicUsize::new(0),
            info_calls: AtomicUsize::new(0),
        }
    }

    pub fn remove(&self) {
        self.present.store(false, Ordering::SeqCst);
    }

    pub fn set_probe(&self, probe: HealthProbe) {
        *self.probe.lock().unwrap() = probe;
    }
}

#[async_trait]
impl SupervisorHost for MockSupervisor {
    async fn deployment_info(&self) -> Result<Option<DeploymentInfo>, AppError> {
        self.info_calls.fetch_add(1, Ordering::SeqCst);
        if !self.present.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(DeploymentInfo {
            name: "trigger-supervisor-default-1700000000".into(),
            id: 42,
            ip_address: Some(self.ip_address.clone()),
            status: "active".into(),
            region: "nyc1".into(),
            size: "s-2vcpu-2gb".into(),
            created_at: None,
            health_url: Some(format!("http://{}:8020/health", self.ip_address)),
        }))
    }

    async fn deploy(&self, _config: &SupervisorConfig) -> Result<bool, AppError> {
        self.deploy_calls.fetch_add(1, Ordering::SeqCst);
        self.present.store(true, Ordering::SeqCst);
        Ok(true)
    }

    async fn probe_health(&self, _ip_address: &str) -> HealthProbe {
        self.probe.lock().unwrap().clone()
    }

    async fn destroy(&self) -> Result<usize, AppError> {
        self.destroy_calls.fetch_add(1, Ordering::SeqCst);
        let removed = usize::from(self.present.swap(false, Ordering::SeqCst));
        Ok(removed)
    }
}
