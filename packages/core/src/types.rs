//! Shared data types passed between the Railway client, the supervisor
//! manager and the controller.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::logging::mask;

const SECRET_KEYS: [&str; 3] = [
    "TRIGGER_WORKER_TOKEN",
    "MANAGED_WORKER_SECRET",
    "DOCKER_REGISTRY_PASSWORD",
];

/// Values the supervisor droplet needs in its `.env`.
///
/// Serialised with the environment-variable names as keys so the persisted
/// state file reads like the `.env` it feeds.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisorConfig {
    #[serde(rename = "TRIGGER_WORKER_TOKEN", default, skip_serializing_if = "Option::is_none")]
    pub worker_token: Option<String>,
    #[serde(rename = "MANAGED_WORKER_SECRET", default, skip_serializing_if = "Option::is_none")]
    pub managed_worker_secret: Option<String>,
    #[serde(rename = "TRIGGER_API_URL", default, skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(rename = "DOCKER_REGISTRY_URL", default, skip_serializing_if = "Option::is_none")]
    pub registry_url: Option<String>,
    #[serde(rename = "DOCKER_REGISTRY_USERNAME", default, skip_serializing_if = "Option::is_none")]
    pub registry_username: Option<String>,
    #[serde(rename = "DOCKER_REGISTRY_PASSWORD", default, skip_serializing_if = "Option::is_none")]
    pub registry_password: Option<String>,
    #[serde(rename = "OTEL_EXPORTER_OTLP_ENDPOINT", default, skip_serializing_if = "Option::is_none")]
    pub otel_endpoint: Option<String>,
}

impl SupervisorConfig {
    pub fn is_empty(&self) -> bool {
        self.entries().is_empty()
    }

    /// Set values keyed by their environment-variable name.
    pub fn entries(&self) -> Vec<(&'static str, &str)> {
        [
            ("TRIGGER_WORKER_TOKEN", &self.worker_token),
            ("MANAGED_WORKER_SECRET", &self.managed_worker_secret),
            ("TRIGGER_API_URL", &self.api_url),
            ("DOCKER_REGISTRY_URL", &self.registry_url),
            ("DOCKER_REGISTRY_USERNAME", &self.registry_username),
            ("DOCKER_REGISTRY_PASSWORD", &self.registry_password),
            ("OTEL_EXPORTER_OTLP_ENDPOINT", &self.otel_endpoint),
        ]
        .into_iter()
        .filter_map(|(key, value)| value.as_deref().map(|v| (key, v)))
        .collect()
    }

    /// Keys the supervisor cannot start without, in reporting order.
    pub fn missing_required(&self) -> Vec<&'static str> {
        let required = [
            ("TRIGGER_WORKER_TOKEN", &self.worker_token),
            ("MANAGED_WORKER_SECRET", &self.managed_worker_secret),
            ("TRIGGER_API_URL", &self.api_url),
        ];
        required
            .into_iter()
            .filter(|(_, value)| value.as_deref().map_or(true, str::is_empty))
            .map(|(key, _)| key)
            .collect()
    }

    /// Every set value with secrets masked, safe for logs and the status API.
    pub fn masked(&self) -> BTreeMap<String, String> {
        self.entries()
            .into_iter()
            .map(|(key, value)| {
                let shown = if SECRET_KEYS.contains(&key) {
                    mask(value)
                } else {
                    value.to_string()
                };
                (key.to_string(), shown)
            })
            .collect()
    }
}

/// What is known about the deployed supervisor droplet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentInfo {
    pub name: String,
    pub id: u64,
    pub ip_address: Option<String>,
    pub status: String,
    pub region: String,
    pub size: String,
    pub created_at: Option<DateTime<Utc>>,
    pub health_url: Option<String>,
}

/// PostgreSQL logical replication readiness.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReplicationStatus {
    pub wal_level: String,
    pub replica_identity: String,
    pub publication_exists: bool,
    pub issues: Vec<String>,
}

impl ReplicationStatus {
    pub fn is_configured(&self) -> bool {
        self.issues.is_empty()
    }

    pub fn summary(&self) -> String {
        if self.issues.is_empty() {
            "Replication is fully configured".to_string()
        } else {
            self.issues.join("; ")
        }
    }
}

/// Outcome of a single supervisor `/health` probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthProbe {
    Healthy,
    Unhealthy(u16),
    Unreachable(String),
}

impl HealthProbe {
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthProbe::Healthy)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn full() -> SupervisorConfig {
        SupervisorConfig {
            worker_token: Some("tr_wgt_0123456789abcdefghij".into()),
            managed_worker_secret: Some("secret".into()),
            api_url: Some("https://trigger.example.com".into()),
            otel_endpoint: Some("https://trigger.example.com/otel".into()),
            ..Default::default()
        }
    }

    #[test]
    fn missing_required_reports_in_order() {
        let config = SupervisorConfig {
            managed_worker_secret: Some(String::new()),
            ..Default::default()
        };
        assert_eq!(
            config.missing_required(),
            vec!["TRIGGER_WORKER_TOKEN", "MANAGED_WORKER_SECRET", "TRIGGER_API_URL"]
        );
        assert!(full().missing_required().is_empty());
    }

    #[test]
    fn serialises_with_env_names_and_skips_unset() {
        let json = serde_json::to_value(full()).unwrap();
        assert_eq!(json["TRIGGER_API_URL"], "https://trigger.example.com");
        assert!(json.get("DOCKER_REGISTRY_URL").is_none());

        let back: SupervisorConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back, full());
    }

    #[test]
    fn masked_hides_long_secrets() {
        let masked = full().masked();
        assert_eq!(masked["TRIGGER_WORKER_TOKEN"], "tr_wgt_0123456789abc...");
        assert_eq!(masked["MANAGED_WORKER_SECRET"], "secret");
    }

    #[test]
    fn masked_leaves_long_urls_intact() {
        let config = SupervisorConfig {
            registry_password: Some("registry-password-0123456789".into()),
            ..full()
        };
        let masked = config.masked();
        assert_eq!(masked["TRIGGER_API_URL"], "https://trigger.example.com");
        assert_eq!(masked["OTEL_EXPORTER_OTLP_ENDPOINT"], "https://trigger.example.com/otel");
        assert_eq!(masked["DOCKER_REGISTRY_PASSWORD"], "registry-password-01...");
    }

    #[test]
    fn replication_summary_joins_issues() {
        let status = ReplicationStatus {
            wal_level: "replica".into(),
            replica_identity: "default".into(),
            publication_exists: true,
            issues: vec!["a".into(), "b".into()],
        };
        assert!(!status.is_configured());
        assert_eq!(status.summary(), "a; b");
    }
}
