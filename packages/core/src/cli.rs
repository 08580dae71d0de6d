use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::Config;

/// Ops controller CLI arguments
#[derive(Debug, Parser)]
#[command(
    name = "ops-controller",
    version,
    about = "Keeps the Trigger.dev supervisor, Railway services and PostgreSQL replication converged"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Minutes between monitoring cycles (overrides CHECK_INTERVAL)
    #[arg(long, global = true)]
    pub check_interval: Option<u64>,

    /// Path of the persisted state file (overrides STATE_FILE)
    #[arg(long, global = true)]
    pub state_file: Option<PathBuf>,

    /// Serve the status API on this port (overrides STATUS_PORT)
    #[arg(long, global = true)]
    pub status_port: Option<u16>,
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Command {
    /// Run the continuous monitoring loop (default)
    Monitor,
    /// Run one full deployment and exit
    Deploy,
    /// Report PostgreSQL and supervisor status
    Status,
    /// Delete the supervisor droplet(s)
    Destroy {
        /// Skip the interactive confirmation
        #[arg(long)]
        yes: bool,
    },
    /// Check the logical replication settings
    VerifyPostgres,
}

impl Command {
    /// Inactive monitoring idles without validating or building clients.
    pub fn parks(&self, config: &Config) -> bool {
        *self == Command::Monitor && !config.is_active
    }
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Monitor)
    }

    /// Apply command-line overrides on top of the environment config.
    pub fn apply_overrides(&self, config: &mut Config) {
        if let Some(minutes) = self.check_interval {
            config.check_interval_minutes = minutes;
        }
        if let Some(path) = &self.state_file {
            config.state_file = path.clone();
        }
        if let Some(port) = self.status_port {
            config.status_port = Some(port);
        }
    }
}
