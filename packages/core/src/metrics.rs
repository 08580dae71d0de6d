//! Prometheus metrics registry for the ops controller.
//!
//! [`AppMetrics`] owns all registered metrics and the [`Registry`] they
//! belong to. Construct it once at startup, wrap in `Arc`, and pass it to
//! the controller and the status API.
//!
//! Exposed at `GET /metrics` in Prometheus text exposition format
//! (`text/plain; version=0.0.4`) when the status API is enabled.

use prometheus::{Counter, Gauge, Histogram, HistogramOpts, Opts, Registry};

use crate::history::CycleReport;

pub struct AppMetrics {
    /// Monitoring cycles started.
    pub cycles_total: Counter,
    /// Cycles skipped because the environment failed validation.
    pub cycle_errors_total: Counter,
    /// Consecutive fully-healthy cycles.
    pub healthy_streak: Gauge,
    /// 1 when replication was configured at the end of the last cycle.
    pub replication_configured: Gauge,
    /// 1 when the supervisor was deployed at the end of the last cycle.
    pub supervisor_deployed: Gauge,
    /// 1 when the last `/health` probe of the supervisor answered 200.
    pub supervisor_healthy: Gauge,
    /// Supervisor deployment attempts.
    pub deployments_total: Counter,
    /// Wall-clock duration of monitoring cycles, in seconds.
    pub cycle_duration: Histogram,
    pub registry: Registry,
}

impl AppMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let cycles_total = Counter::with_opts(Opts::new(
            "ops_controller_cycles_total",
            "Monitoring cycles started",
        ))?;

        let cycle_errors_total = Counter::with_opts(Opts::new(
            "ops_controller_cycle_errors_total",
            "Monitoring cycles skipped on invalid configuration",
        ))?;

        let healthy_streak = Gauge::with_opts(Opts::new(
            "ops_controller_healthy_streak",
            "Consecutive fully healthy monitoring cycles",
        ))?;

        let replication_configured = Gauge::with_opts(Opts::new(
            "ops_controller_replication_configured",
            "PostgreSQL logical replication configured (1/0)",
        ))?;

        let supervisor_deployed = Gauge::with_opts(Opts::new(
            "ops_controller_supervisor_deployed",
            "Supervisor droplet deployed (1/0)",
        ))?;

        let supervisor_healthy = Gauge::with_opts(Opts::new(
            "ops_controller_supervisor_healthy",
            "Last supervisor health probe succeeded (1/0)",
        ))?;

        let deployments_total = Counter::with_opts(Opts::new(
            "ops_controller_deployments_total",
            "Supervisor deployment attempts",
        ))?;

        let cycle_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ops_controller_cycle_duration_seconds",
                "Monitoring cycle duration in seconds",
            )
            .buckets(vec![0.5, 1.0, 5.0, 15.0, 30.0, 60.0, 120.0, 300.0, 600.0]),
        )?;

        registry.register(Box::new(cycles_total.clone()))?;
        registry.register(Box::new(cycle_errors_total.clone()))?;
        registry.register(Box::new(healthy_streak.clone()))?;
        registry.register(Box::new(replication_configured.clone()))?;
        registry.register(Box::new(supervisor_deployed.clone()))?;
        registry.register(Box::new(supervisor_healthy.clone()))?;
        registry.register(Box::new(deployments_total.clone()))?;
        registry.register(Box::new(cycle_duration.clone()))?;

        Ok(Self {
            cycles_total,
            cycle_errors_total,
            healthy_streak,
            replication_configured,
            supervisor_deployed,
            supervisor_healthy,
            deployments_total,
            cycle_duration,
            registry,
        })
    }

    /// Fold a finished cycle into the gauges and histogram.
    pub fn observe_cycle(&self, report: &CycleReport) {
        let flag = |value: bool| if value { 1.0 } else { 0.0 };
        self.healthy_streak.set(report.consecutive_healthy_cycles as f64);
        self.replication_configured.set(flag(report.postgres_configured));
        self.supervisor_deployed.set(flag(report.supervisor_deployed));
        if let Some(healthy) = report.supervisor_healthy {
            self.supervisor_healthy.set(flag(healthy));
        }
        self.cycle_duration.observe(report.duration_ms as f64 / 1000.0);
    }

    /// Render all metrics as Prometheus text format (for the `/metrics` endpoint).
    pub fn render(&self) -> Result<String, prometheus::Error> {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buf = Vec::new();
        encoder.encode(&metric_families, &mut buf)?;
        Ok(String::from_utf8(buf).unwrap_or_default())
    }
}
