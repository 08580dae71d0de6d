//! In-memory monitoring cycle history.
//!
//! `CycleHistory` keeps a bounded window of [`CycleReport`] values for the
//! status API. When full, the oldest report is evicted before the new one
//! is inserted (ring-buffer semantics backed by `VecDeque`).
//!
//! Callers share it as `Arc<RwLock<CycleHistory>>` between the scheduler
//! task and the axum handlers.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Default number of cycle reports retained.
pub const DEFAULT_CAPACITY: usize = 100;

/// Outcome of one monitoring cycle.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleReport {
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub config_extracted: bool,
    pub postgres_configured: bool,
    pub supervisor_deployed: bool,
    /// Result of the quick `/health` probe; `None` when no probe ran.
    pub supervisor_healthy: Option<bool>,
    pub fully_healthy: bool,
    pub consecutive_healthy_cycles: u32,
    pub auto_disabled: bool,
}

#[derive(Debug)]
pub struct CycleHistory {
    reports: VecDeque<CycleReport>,
    capacity: usize,
}

impl CycleHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            reports: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append a report, evicting the oldest if the history is full.
    pub fn push(&mut self, report: CycleReport) {
        if self.capacity == 0 {
            return;
        }
        if self.reports.len() >= self.capacity {
            self.reports.pop_front();
        }
        self.reports.push_back(report);
    }

    /// The `n` most recent reports, oldest first.
    pub fn last_n(&self, n: usize) -> Vec<CycleReport> {
        let skip = self.reports.len().saturating_sub(n);
        self.reports.iter().skip(skip).cloned().collect()
    }

    pub fn latest(&self) -> Option<&CycleReport> {
        self.reports.back()
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }
}

impl Default for CycleHistory {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}
