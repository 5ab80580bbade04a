//! # cutepod
//!
//! A local, ephemeral, Kubernetes-inspired orchestrator: declare a chart of
//! container-centric manifests and reconcile it against a local podman
//! engine.
//!
//! One reconcile invocation parses a set of heterogeneous manifests into a
//! typed, name-indexed registry, orders it topologically by dependency,
//! diffs the desired state against the chart-scoped live engine state, and
//! drives a bounded, ordered set of create/update/delete operations with
//! retry, ownership labels and orphan cleanup.
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use cutepod::engine::PodmanEngine;
//! use cutepod::reconcile::Reconciler;
//! use tokio_util::sync::CancellationToken;
//!
//! #[tokio::main]
//! async fn main() -> cutepod::Result<()> {
//!     let manifests = r"
//! apiVersion: cutepod/v1alpha1
//! kind: CuteContainer
//! metadata:
//!   name: web-server
//! spec:
//!   image: nginx:latest
//! ";
//!     let engine = PodmanEngine::connect().await?;
//!     let reconciler = Reconciler::new(Arc::new(engine));
//!     let report = reconciler
//!         .reconcile(manifests, "demo", false, CancellationToken::new())
//!         .await?;
//!     println!("{}", report.summary());
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - [`manifest`] - typed records, validation, multi-document parsing
//! - [`registry`] - name-indexed catalog with reference checking
//! - [`graph`] - dependency DAG, cycle detection, layered ordering
//! - [`diff`] - desired-versus-live partition per kind
//! - [`engine`] - abstract engine capability, podman transport, mock
//! - [`managers`] - per-kind drivers translating manifests to engine calls
//! - [`mount`] - volume path resolution, subPath safety, permissions
//! - [`reconcile`] - the orchestrating controller
//! - [`status`] - process-wide per-chart status snapshots

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]

pub mod chart;
pub mod cli;
pub mod diff;
pub mod engine;
pub mod error;
pub mod graph;
pub mod managers;
pub mod manifest;
pub mod mount;
pub mod reconcile;
pub mod registry;
pub mod report;
pub mod status;

pub use error::{Error, ErrorCategory, Result};
pub use manifest::{ChartMeta, Resource, ResourceKey, ResourceKind};
pub use reconcile::Reconciler;
pub use registry::Registry;
pub use report::ReconcileReport;

/// The version of this crate, stamped into the `cutepod.io/version` label
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default timeout for engine operations
pub const DEFAULT_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);
