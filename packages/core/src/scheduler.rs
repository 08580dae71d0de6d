//! Monitoring loop.
//!
//! Each cycle validates the environment, runs one controller cycle, saves
//! the state file and publishes the outcome to the shared [`StatusFeed`]
//! read by the status API. Between cycles the loop sleeps for whatever is
//! left of the check interval.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::signal;
use tokio::sync::RwLock;
use tokio::time::{self, Instant};

use crate::controller::OpsController;
use crate::history::{CycleHistory, CycleReport};
use crate::metrics::AppMetrics;
use crate::state::ControllerState;

/// Wait after a cycle skipped on invalid configuration.
const VALIDATION_RETRY: Duration = Duration::from_secs(60);

/// Snapshots shared between the monitoring loop and the status API.
#[derive(Clone, Default)]
pub struct StatusFeed {
    pub state: Arc<RwLock<ControllerState>>,
    pub history: Arc<RwLock<CycleHistory>>,
    pub metrics: Option<Arc<AppMetrics>>,
}

impl StatusFeed {
    pub fn new(metrics: Option<Arc<AppMetrics>>) -> Self {
        Self {
            metrics,
            ..Default::default()
        }
    }

    pub async fn publish_state(&self, state: &ControllerState) {
        *self.state.write().await = state.clone();
    }

    pub async fn record(&self, state: &ControllerState, report: CycleReport) {
        self.publish_state(state).await;
        self.history.write().await.push(report);
    }
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", err);
        std::future::pending::<()>().await;
    }
}

/// Run the monitoring loop until `Ctrl+C` (SIGINT) is received.
pub async fn run_monitoring(controller: OpsController, feed: StatusFeed) {
    run_monitoring_until(controller, feed, shutdown_signal()).await;
}

/// Idle until `Ctrl+C` while `IS_ACTIVE=false`, without touching any
/// remote service.
pub async fn run_parked(idle: Duration) {
    park_until(idle, shutdown_signal()).await;
}

pub async fn park_until<F>(idle: Duration, shutdown: F)
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    loop {
        tracing::info!("Monitoring is inactive (IS_ACTIVE=false), sleeping");
        tokio::select! {
            _ = time::sleep(idle) => {}
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received. Stopping monitoring.");
                break;
            }
        }
    }
}

/// Run the monitoring loop until `shutdown` resolves. A cycle in progress
/// always finishes and saves before the loop checks for shutdown.
pub async fn run_monitoring_until<F>(mut controller: OpsController, feed: StatusFeed, shutdown: F)
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);

    let interval = controller.config().check_interval();
    let idle = controller.config().limits.idle_sleep;

    tracing::info!(
        "Ops controller starting (active: {}, interval: {} min, auto-disable: {})",
        controller.config().is_active,
        controller.config().check_interval_minutes,
        controller.config().auto_disable
    );

    if controller.config().is_active {
        controller.load_state();
    }
    feed.publish_state(controller.state()).await;

    loop {
        let pause = if !controller.config().is_active {
            tracing::info!("Monitoring is inactive (IS_ACTIVE=false), sleeping");
            idle
        } else if controller.state().is_disabled {
            tracing::info!("Monitoring auto-disabled after healthy cycles, sleeping");
            idle
        } else {
            let started = Instant::now();
            match cycle_once(&mut controller, &feed).await {
                Some(_) => remaining(interval, started.elapsed()),
                None => VALIDATION_RETRY,
            }
        };

        if pause > Duration::ZERO {
            tracing::debug!("Next check in {}s", pause.as_secs());
        }

        tokio::select! {
            _ = time::sleep(pause) => {}
            _ = &mut shutdown => {
                tracing::info!("Shutdown signal received. Stopping monitoring.");
                break;
            }
        }
    }

    controller.save_state();
    tracing::info!("Monitoring stopped cleanly");
}

/// Execute a single monitoring cycle. Extracted for testability.
///
/// Returns `None` when the environment failed validation and no cycle ran.
pub async fn cycle_once(controller: &mut OpsController, feed: &StatusFeed) -> Option<CycleReport> {
    tracing::info!("Starting monitoring cycle");

    if !controller.validate_environment() {
        tracing::error!("Environment validation failed, will retry next cycle");
        if let Some(metrics) = &feed.metrics {
            metrics.cycle_errors_total.inc();
        }
        return None;
    }

    let report = controller.run_cycle().await;
    controller.save_state();
    feed.record(controller.state(), report.clone()).await;
    Some(report)
}

/// Time left of `interval` after a cycle that took `elapsed`.
pub fn remaining(interval: Duration, elapsed: Duration) -> Duration {
    if elapsed > interval {
        tracing::warn!(
            "Monitoring cycle took {}s, longer than the {}s interval",
            elapsed.as_secs(),
            interval.as_secs()
        );
    }
    interval.saturating_sub(elapsed)
}
