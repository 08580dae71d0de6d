//! Persisted controller state.
//!
//! A small JSON file written after every monitoring cycle so a restarted
//! controller resumes with its cached configuration and healthy-cycle count.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::types::SupervisorConfig;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeploymentState {
    #[serde(default)]
    pub postgres_configured: bool,
    #[serde(default)]
    pub supervisor_deployed: bool,
    #[serde(default)]
    pub config_extracted: bool,
}

impl DeploymentState {
    pub fn all_done(&self) -> bool {
        self.config_extracted && self.postgres_configured && self.supervisor_deployed
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerState {
    #[serde(default)]
    pub deployment_state: DeploymentState,
    #[serde(default)]
    pub config_cache: SupervisorConfig,
    #[serde(default)]
    pub consecutive_healthy_cycles: u32,
    #[serde(default)]
    pub is_disabled: bool,
    /// Unix seconds of the last save.
    #[serde(default)]
    pub timestamp: i64,
}

impl ControllerState {
    /// Read state from `path`. A missing or unreadable file yields the
    /// default state.
    pub fn load(path: &Path) -> Self {
        match Self::try_load(path) {
            Ok(state) => {
                tracing::info!("State loaded from {}", path.display());
                state
            }
            Err(AppError::Io(err)) if err.kind() == std::io::ErrorKind::NotFound => Self::default(),
            Err(err) => {
                tracing::warn!("Ignoring unreadable state file {}: {}", path.display(), err);
                Self::default()
            }
        }
    }

    pub fn try_load(path: &Path) -> Result<Self, AppError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Stamp and write state to `path` as pretty JSON.
    pub fn save(&mut self, path: &Path) -> Result<(), AppError> {
        self.timestamp = chrono::Utc::now().timestamp();
        let body = serde_json::to_string_pretty(self)?;
        std::fs::write(path, body)?;
        tracing::debug!("State saved to {}", path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_gives_default_state() {
        let dir = tempdir().unwrap();
        let state = ControllerState::load(&dir.path().join("absent.json"));
        assert_eq!(state, ControllerState::default());
    }

    #[test]
    fn corrupt_file_gives_default_state() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert_eq!(ControllerState::load(&path), ControllerState::default());
    }

    #[test]
    fn save_then_load_preserves_progress() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");

        let mut state = ControllerState {
            deployment_state: DeploymentState {
                postgres_configured: true,
                supervisor_deployed: false,
                config_extracted: true,
            },
            config_cache: SupervisorConfig {
                worker_token: Some("tr_wgt_abc".into()),
                ..Default::default()
            },
            consecutive_healthy_cycles: 2,
            is_disabled: false,
            timestamp: 0,
        };
        state.save(&path).unwrap();
        assert!(state.timestamp > 0);

        let loaded = ControllerState::load(&path);
        assert_eq!(loaded, state);
    }

    #[test]
    fn partial_state_file_fills_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("state.json");
        std::fs::write(
            &path,
            r#"{ "deployment_state": { "config_extracted": true }, "config_cache": { "TRIGGER_WORKER_TOKEN": "tr_wgt_x" } }"#,
        )
        .unwrap();

        let state = ControllerState::load(&path);
        assert!(state.deployment_state.config_extracted);
        assert!(!state.deployment_state.postgres_configured);
        assert_eq!(state.config_cache.worker_token.as_deref(), Some("tr_wgt_x"));
        assert_eq!(state.consecutive_healthy_cycles, 0);
    }

    #[test]
    fn save_into_missing_directory_fails() {
        let dir = tempdir().unwrap();
        let mut state = ControllerState::default();
        assert!(state.save(&dir.path().join("nope/state.json")).is_err());
    }
}
