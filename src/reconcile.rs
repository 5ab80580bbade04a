//! Reconciliation controller.
//!
//! One [`Reconciler::reconcile`] call is a one-shot run: parse and validate
//! the chart, order it, fetch chart-scoped live state, diff, and drive the
//! resulting operations layer by layer with bounded retries. Orphaned
//! engine objects are reclaimed at the end; a dry run stops after the diff.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::diff::{diff_kind, StateDiff};
use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::graph::DependencyGraph;
use crate::managers::{ManagerSet, OpContext, ResourceManager};
use crate::manifest::{parse_manifests, ChartMeta, Resource, ResourceKey, ResourceKind};
use crate::mount::{shared_volume_names, MountResolver};
use crate::registry::Registry;
use crate::report::{Action, ActionRecord, ErrorEntry, ReconcileReport};
use crate::status::{ChartStatus, StatusStore};

/// Maximum attempts for any retried operation
const MAX_ATTEMPTS: u32 = 3;

/// Backoff base while building the dependency graph
const GRAPH_BACKOFF: Duration = Duration::from_millis(100);

/// Backoff base while fetching live state
const LIVE_STATE_BACKOFF: Duration = Duration::from_millis(200);

/// Backoff base for execute-phase engine operations
const EXECUTE_BACKOFF: Duration = Duration::from_millis(500);

/// Deletion order across kinds for orphans (reverse creation affinity)
const ORPHAN_ORDER: [ResourceKind; 4] = [
    ResourceKind::Container,
    ResourceKind::Secret,
    ResourceKind::Volume,
    ResourceKind::Network,
];

/// Retry an operation with arithmetic backoff (`attempt · base`).
///
/// Only recoverable errors are retried; the cancellation token is honoured
/// before every attempt and during every backoff sleep.
pub(crate) async fn retry_with_backoff<T, F, Fut>(
    operation: &str,
    base: Duration,
    cancel: &CancellationToken,
    mut attempt_fn: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 1;
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match attempt_fn().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_recoverable() && attempt < MAX_ATTEMPTS => {
                let delay = base * attempt;
                debug!(
                    operation,
                    attempt, "retrying in {}ms after: {err}", delay.as_millis()
                );
                tokio::select! {
                    () = cancel.cancelled() => return Err(Error::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

/// Drives reconcile runs against one engine
pub struct Reconciler {
    engine: Arc<dyn Engine>,
    managers: ManagerSet,
    mounts: MountResolver,
}

impl Reconciler {
    /// Create a reconciler with the default managers and a scratch root
    /// under the system temp directory.
    pub fn new(engine: Arc<dyn Engine>) -> Self {
        Self {
            engine,
            managers: ManagerSet::defaults(),
            mounts: MountResolver::new(std::env::temp_dir().join("cutepod")),
        }
    }

    /// Override the volume path resolver
    #[must_use]
    pub fn with_mount_resolver(mut self, mounts: MountResolver) -> Self {
        self.mounts = mounts;
        self
    }

    /// Reconcile a chart buffer against the engine.
    ///
    /// Validation and dependency errors short-circuit with `Err`; engine
    /// and comparison errors are collected into the returned report.
    pub async fn reconcile(
        &self,
        manifests: &str,
        chart_name: &str,
        dry_run: bool,
        cancel: CancellationToken,
    ) -> Result<ReconcileReport> {
        let started = Instant::now();
        info!(chart = chart_name, dry_run, "starting reconcile");

        // Parse, validate, stamp labels, resolve references, order.
        let setup = self.prepare(manifests, chart_name, &cancel).await;
        let (chart, registry, graph) = match setup {
            Ok(prepared) => prepared,
            Err(err) => {
                record_failure(chart_name, &err, started);
                return Err(err);
            }
        };

        let shared_volumes = shared_volume_names(&registry);
        let ctx = OpContext {
            engine: self.engine.as_ref(),
            chart: &chart,
            registry: &registry,
            mounts: &self.mounts,
            shared_volumes: &shared_volumes,
            cancel: &cancel,
        };

        let mut report = ReconcileReport::new(chart_name, dry_run);

        // Chart-scoped live state, degrading per kind on persistent failure
        let live = self.fetch_live_state(&ctx, &mut report).await;

        // Diff desired against live per kind
        let state_diff = self.compute_diff(&registry, &live, &mut report);

        if dry_run {
            annotate_plan(&graph, &state_diff, &mut report);
            report.duration = started.elapsed();
            info!(chart = chart_name, "{}", report.summary());
            return Ok(report);
        }

        self.execute(&ctx, &graph, &state_diff, &live, &mut report)
            .await;

        report.duration = started.elapsed();
        StatusStore::global().record(ChartStatus::from_report(&report));
        info!(chart = chart_name, "{}", report.summary());
        Ok(report)
    }

    async fn prepare(
        &self,
        manifests: &str,
        chart_name: &str,
        cancel: &CancellationToken,
    ) -> Result<(ChartMeta, Registry, DependencyGraph)> {
        if chart_name.is_empty() {
            return Err(Error::validation("chart", "chart name must not be empty"));
        }
        let mut registry = parse_manifests(manifests)?;
        let chart = ChartMeta::new(chart_name, crate::VERSION);
        registry.apply_standard_labels(&chart);
        registry.validate_dependencies()?;

        let graph = retry_with_backoff("dependency graph", GRAPH_BACKOFF, cancel, || {
            let registry = &registry;
            async move { DependencyGraph::build(registry) }
        })
        .await?;
        debug!(
            resources = registry.len(),
            layers = graph.creation_layers().len(),
            "chart ordered"
        );
        Ok((chart, registry, graph))
    }

    async fn fetch_live_state(
        &self,
        ctx: &OpContext<'_>,
        report: &mut ReconcileReport,
    ) -> BTreeMap<ResourceKind, Vec<Resource>> {
        let mut live = BTreeMap::new();
        for manager in self.managers.iter() {
            let kind = manager.kind();
            let operation = format!("{kind} live state");
            let fetched = retry_with_backoff(&operation, LIVE_STATE_BACKOFF, ctx.cancel, || {
                manager.actual_from_engine(ctx)
            })
            .await;
            match fetched {
                Ok(resources) => {
                    debug!(%kind, count = resources.len(), "live state fetched");
                    live.insert(kind, resources);
                }
                Err(err) => {
                    // Degrade this kind to empty live state and keep going
                    warn!(%kind, "live state unavailable, assuming empty: {err}");
                    report.errors.push(ErrorEntry::from_error(&err, None));
                    live.insert(kind, Vec::new());
                }
            }
        }
        live
    }

    fn compute_diff(
        &self,
        registry: &Registry,
        live: &BTreeMap<ResourceKind, Vec<Resource>>,
        report: &mut ReconcileReport,
    ) -> StateDiff {
        let mut state_diff = StateDiff::default();
        for manager in self.managers.iter() {
            let kind = manager.kind();
            let desired = manager.desired_from_manifests(registry);
            let empty = Vec::new();
            let live_resources = live.get(&kind).unwrap_or(&empty);
            let (kind_diff, comparison_errors) =
                diff_kind(kind, &desired, live_resources, Some(manager));
            for err in comparison_errors {
                report.errors.push(ErrorEntry::from_error(&err, None));
            }
            state_diff.insert(kind, kind_diff);
        }
        state_diff
    }

    async fn execute(
        &self,
        ctx: &OpContext<'_>,
        graph: &DependencyGraph,
        state_diff: &StateDiff,
        live: &BTreeMap<ResourceKind, Vec<Resource>>,
        report: &mut ReconcileReport,
    ) {
        let layers = graph.creation_layers();

        let mut cancelled = false;

        // Creates, layer by layer: layer k completes before k+1 starts
        'creates: for layer in &layers {
            for key in layer {
                let Some(manager) = self.managers.get(key.kind) else {
                    continue;
                };
                if !state_diff.for_kind(key.kind).to_create.contains(&key.name) {
                    continue;
                }
                let Some(resource) = ctx.registry.get(key) else {
                    continue;
                };
                let (record, error) = self
                    .run_action(ctx, Action::Create, key, None, || {
                        manager.create(ctx, resource)
                    })
                    .await;
                cancelled = matches!(error, Some(Error::Cancelled));
                push_record(report, record, error);
                if cancelled {
                    break 'creates;
                }
            }
        }

        // Updates, in the same deterministic layer order
        if !cancelled {
            'updates: for layer in &layers {
                for key in layer {
                    let Some(manager) = self.managers.get(key.kind) else {
                        continue;
                    };
                    let kind_diff = state_diff.for_kind(key.kind);
                    let Some(entry) =
                        kind_diff.to_update.iter().find(|e| e.name == key.name)
                    else {
                        continue;
                    };
                    let Some(desired) = ctx.registry.get(key) else {
                        continue;
                    };
                    let Some(actual) = find_live(live, key) else {
                        continue;
                    };
                    let message = (!entry.reasons.is_empty())
                        .then(|| format!("changed: {}", entry.reasons.join(", ")));
                    let (record, error) = self
                        .run_action(ctx, Action::Update, key, message, || {
                            manager.update(ctx, desired, actual)
                        })
                        .await;
                    cancelled = matches!(error, Some(Error::Cancelled));
                    push_record(report, record, error);
                    if cancelled {
                        break 'updates;
                    }
                }
            }
        }

        // Orphan cleanup always runs last, in reverse dependency order.
        // Its failures are reported but never promote the chart to failed.
        if !cancelled {
            'orphans: for kind in ORPHAN_ORDER {
                let Some(manager) = self.managers.get(kind) else {
                    continue;
                };
                for name in &state_diff.for_kind(kind).to_delete {
                    let key = ResourceKey::new(kind, name.as_str());
                    let Some(orphan) = find_live(live, &key) else {
                        continue;
                    };
                    let (mut record, error) = self
                        .run_action(ctx, Action::Delete, &key, Some("orphan".to_string()), || {
                            manager.delete(ctx, orphan)
                        })
                        .await;
                    match error {
                        // The orphan vanished on its own; mission accomplished
                        Some(Error::NotFound { .. }) => {
                            record.error = None;
                            push_record(report, record, None);
                        }
                        Some(Error::Cancelled) => {
                            cancelled = true;
                            push_record(report, record, Some(Error::Cancelled));
                        }
                        Some(err) => {
                            let resource = format!("{}/{}", record.kind, record.name);
                            let mut entry = ErrorEntry::from_error(&err, Some(resource));
                            entry.recoverable = true;
                            report.errors.push(entry);
                            report.deleted.push(record);
                        }
                        None => push_record(report, record, None),
                    }
                    if cancelled {
                        break 'orphans;
                    }
                }
            }
        }
    }

    /// Run one operation with retries and produce its action record plus
    /// the typed error, when any, for classification.
    async fn run_action<F, Fut>(
        &self,
        ctx: &OpContext<'_>,
        action: Action,
        key: &ResourceKey,
        message: Option<String>,
        attempt_fn: F,
    ) -> (ActionRecord, Option<Error>)
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let operation = format!("{action:?} {key}").to_lowercase();
        let started = Instant::now();
        let outcome =
            retry_with_backoff(&operation, EXECUTE_BACKOFF, ctx.cancel, attempt_fn).await;

        let error = outcome.err();
        if let Some(err) = &error {
            warn!(resource = %key, "{action:?} failed: {err}");
        } else {
            debug!(resource = %key, "{action:?} succeeded");
        }
        let record = ActionRecord {
            kind: key.kind,
            name: key.name.clone(),
            action,
            message,
            error: error.as_ref().map(ToString::to_string),
            duration: started.elapsed(),
            timestamp: Utc::now(),
        };
        (record, error)
    }
}

fn find_live<'a>(
    live: &'a BTreeMap<ResourceKind, Vec<Resource>>,
    key: &ResourceKey,
) -> Option<&'a Resource> {
    live.get(&key.kind)?
        .iter()
        .find(|resource| resource.name() == key.name)
}

/// Fold an action record into the report, mirroring any failure as an
/// error entry
fn push_record(report: &mut ReconcileReport, record: ActionRecord, error: Option<Error>) {
    if let Some(err) = error {
        let resource = format!("{}/{}", record.kind, record.name);
        report
            .errors
            .push(ErrorEntry::from_error(&err, Some(resource)));
    }
    match record.action {
        Action::Create => report.created.push(record),
        Action::Update => report.updated.push(record),
        Action::Delete => report.deleted.push(record),
    }
}

/// Annotate the dry-run plan without touching the engine
fn annotate_plan(graph: &DependencyGraph, state_diff: &StateDiff, report: &mut ReconcileReport) {
    let now = Utc::now();
    let plan_record = |action: Action, key: &ResourceKey, message: String| ActionRecord {
        kind: key.kind,
        name: key.name.clone(),
        action,
        message: Some(message),
        error: None,
        duration: Duration::ZERO,
        timestamp: now,
    };

    for layer in graph.creation_layers() {
        for key in layer {
            let kind_diff = state_diff.for_kind(key.kind);
            if kind_diff.to_create.contains(&key.name) {
                report
                    .created
                    .push(plan_record(Action::Create, &key, Action::Create.would().to_string()));
            } else if let Some(entry) =
                kind_diff.to_update.iter().find(|e| e.name == key.name)
            {
                let mut message = Action::Update.would().to_string();
                if !entry.reasons.is_empty() {
                    message.push_str(&format!(" ({})", entry.reasons.join(", ")));
                }
                report.updated.push(plan_record(Action::Update, &key, message));
            }
        }
    }
    for kind in ORPHAN_ORDER {
        for name in &state_diff.for_kind(kind).to_delete {
            let key = ResourceKey::new(kind, name.as_str());
            report
                .deleted
                .push(plan_record(Action::Delete, &key, Action::Delete.would().to_string()));
        }
    }
}

/// Record a failed status for runs that short-circuit before executing
fn record_failure(chart_name: &str, err: &Error, started: Instant) {
    let mut report = ReconcileReport::new(chart_name, false);
    report.errors.push(ErrorEntry::from_error(err, None));
    report.duration = started.elapsed();
    StatusStore::global().record(ChartStatus::from_report(&report));
}
