//! Reconcile result shape returned to the CLI.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorCategory};
use crate::manifest::ResourceKind;

/// What was (or would be) done to a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Resource was created
    Create,
    /// Resource was replaced with a new revision
    Update,
    /// Resource was deleted
    Delete,
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Create => write!(f, "created"),
            Self::Update => write!(f, "updated"),
            Self::Delete => write!(f, "deleted"),
        }
    }
}

impl Action {
    /// Dry-run annotation for this action
    pub fn would(self) -> &'static str {
        match self {
            Self::Create => "would be created",
            Self::Update => "would be updated",
            Self::Delete => "would be deleted",
        }
    }
}

/// One executed (or planned) operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRecord {
    /// Resource kind
    pub kind: ResourceKind,
    /// Resource name
    pub name: String,
    /// The operation
    pub action: Action,
    /// Context such as update reasons or dry-run annotations
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Error text when the operation failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// How long the operation took
    pub duration: Duration,
    /// When the operation finished
    pub timestamp: DateTime<Utc>,
}

impl ActionRecord {
    /// Whether the operation succeeded
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

/// One reported error
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorEntry {
    /// Observable category
    #[serde(rename = "type")]
    pub category: ErrorCategory,
    /// `kind/name` of the resource involved, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    /// Human-readable message
    pub message: String,
    /// Underlying cause, when distinct from the message
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    /// Whether the operation was retried as transient
    pub recoverable: bool,
}

impl ErrorEntry {
    /// Build an entry from an error, optionally pinned to a resource
    pub fn from_error(err: &Error, resource: Option<String>) -> Self {
        let resource = resource.or_else(|| match err {
            Error::Validation { resource, .. } | Error::Comparison { resource, .. } => {
                Some(resource.clone())
            }
            Error::Duplicate { resource } => Some(resource.clone()),
            _ => None,
        });
        let cause = std::error::Error::source(err).map(ToString::to_string);
        Self {
            category: err.category(),
            resource,
            message: err.to_string(),
            cause,
            recoverable: err.is_recoverable(),
        }
    }
}

/// Result of one reconcile invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconcileReport {
    /// The chart that was reconciled
    pub chart_name: String,
    /// Wall-clock duration of the run
    pub duration: Duration,
    /// Whether this was a dry run
    pub dry_run: bool,
    /// Create operations, in execution order
    pub created: Vec<ActionRecord>,
    /// Update operations, in execution order
    pub updated: Vec<ActionRecord>,
    /// Delete operations, in execution order
    pub deleted: Vec<ActionRecord>,
    /// Errors collected along the way
    pub errors: Vec<ErrorEntry>,
}

impl ReconcileReport {
    /// A fresh report for a chart
    pub fn new(chart_name: impl Into<String>, dry_run: bool) -> Self {
        Self {
            chart_name: chart_name.into(),
            duration: Duration::ZERO,
            dry_run,
            created: Vec::new(),
            updated: Vec::new(),
            deleted: Vec::new(),
            errors: Vec::new(),
        }
    }

    /// Whether the run finished without any error
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }

    /// Whether any non-recoverable error was reported
    pub fn has_fatal_errors(&self) -> bool {
        self.errors.iter().any(|entry| !entry.recoverable)
    }

    /// Human-readable one-line summary
    pub fn summary(&self) -> String {
        let verb = if self.dry_run { "planned" } else { "applied" };
        format!(
            "{}: {verb} {} created, {} updated, {} deleted, {} error{} ({:.1}s)",
            self.chart_name,
            self.created.len(),
            self.updated.len(),
            self.deleted.len(),
            self.errors.len(),
            if self.errors.len() == 1 { "" } else { "s" },
            self.duration.as_secs_f64(),
        )
    }
}
