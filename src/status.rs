//! Process-wide chart status snapshots.
//!
//! The status store is the only mutable state shared between reconcile
//! invocations. It is guarded by a read-write lock and not persisted;
//! callers needing durability must snapshot externally.

use std::collections::HashMap;
use std::sync::{LazyLock, RwLock};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::report::ReconcileReport;

/// Overall health of a chart after its last reconcile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChartHealth {
    /// No errors
    Healthy,
    /// Only recoverable errors
    Degraded,
    /// At least one non-recoverable error
    Failed,
}

impl std::fmt::Display for ChartHealth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Healthy => write!(f, "healthy"),
            Self::Degraded => write!(f, "degraded"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Operation counts of one reconcile run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionCounts {
    /// Resources created
    pub created: usize,
    /// Resources updated
    pub updated: usize,
    /// Resources deleted
    pub deleted: usize,
}

/// Status snapshot of one chart
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChartStatus {
    /// Chart name
    pub chart_name: String,
    /// When the chart was last reconciled
    pub last_reconciled: DateTime<Utc>,
    /// Operation counts of the last run
    pub counts: ActionCounts,
    /// Error messages of the last run
    pub errors: Vec<String>,
    /// Health classification
    pub status: ChartHealth,
}

impl ChartStatus {
    /// Derive a snapshot from a finished report
    pub fn from_report(report: &ReconcileReport) -> Self {
        let status = if report.has_fatal_errors() {
            ChartHealth::Failed
        } else if report.is_clean() {
            ChartHealth::Healthy
        } else {
            ChartHealth::Degraded
        };
        Self {
            chart_name: report.chart_name.clone(),
            last_reconciled: Utc::now(),
            counts: ActionCounts {
                created: report.created.len(),
                updated: report.updated.len(),
                deleted: report.deleted.len(),
            },
            errors: report.errors.iter().map(|e| e.message.clone()).collect(),
            status,
        }
    }
}

static GLOBAL: LazyLock<StatusStore> = LazyLock::new(StatusStore::default);

/// Read-write-locked map of chart statuses
#[derive(Debug, Default)]
pub struct StatusStore {
    inner: RwLock<HashMap<String, ChartStatus>>,
}

impl StatusStore {
    /// The process-wide store
    pub fn global() -> &'static Self {
        &GLOBAL
    }

    /// Record the status of a chart, replacing any previous snapshot
    pub fn record(&self, status: ChartStatus) {
        let mut inner = self.inner.write().expect("status store lock poisoned");
        inner.insert(status.chart_name.clone(), status);
    }

    /// Snapshot of one chart's status
    pub fn get(&self, chart_name: &str) -> Option<ChartStatus> {
        let inner = self.inner.read().expect("status store lock poisoned");
        inner.get(chart_name).cloned()
    }

    /// Snapshots of every chart, sorted by name
    pub fn all(&self) -> Vec<ChartStatus> {
        let inner = self.inner.read().expect("status store lock poisoned");
        let mut statuses: Vec<ChartStatus> = inner.values().cloned().collect();
        statuses.sort_by(|a, b| a.chart_name.cmp(&b.chart_name));
        statuses
    }
}
