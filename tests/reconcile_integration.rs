//! End-to-end reconcile scenarios against the mock engine.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use cutepod::engine::{ContainerConfig, Engine, ListFilters, MockEngine};
use cutepod::manifest::{LABEL_CHART, LABEL_MANAGED_BY, LABEL_VERSION};
use cutepod::mount::MountResolver;
use cutepod::reconcile::Reconciler;
use cutepod::status::{ChartHealth, StatusStore};

const WEB_CHART: &str = r"
apiVersion: cutepod/v1alpha1
kind: CuteNetwork
metadata:
  name: web-network
spec:
  driver: bridge
  subnet: 172.20.0.0/16
---
apiVersion: cutepod/v1alpha1
kind: CuteVolume
metadata:
  name: web-data
spec:
  type: emptyDir
  emptyDir: {}
---
apiVersion: cutepod/v1alpha1
kind: CuteContainer
metadata:
  name: web-server
spec:
  image: nginx:latest
  networks:
    - web-network
  volumes:
    - name: web-data
      mountPath: /usr/share/nginx/html
";

struct Harness {
    engine: Arc<MockEngine>,
    reconciler: Reconciler,
    _scratch: tempfile::TempDir,
}

fn harness() -> Harness {
    let engine = Arc::new(MockEngine::new());
    let scratch = tempfile::tempdir().expect("tempdir");
    let reconciler = Reconciler::new(engine.clone())
        .with_mount_resolver(MountResolver::new(scratch.path()));
    Harness {
        engine,
        reconciler,
        _scratch: scratch,
    }
}

async fn reconcile(
    harness: &Harness,
    manifests: &str,
    chart: &str,
) -> cutepod::ReconcileReport {
    harness
        .reconciler
        .reconcile(manifests, chart, false, CancellationToken::new())
        .await
        .expect("reconcile should not short-circuit")
}

#[tokio::test]
async fn s1_install_with_dependencies() {
    let harness = harness();
    let report = reconcile(&harness, WEB_CHART, "s1-chart").await;

    assert!(report.is_clean(), "unexpected errors: {:?}", report.errors);
    let created: Vec<&str> = report.created.iter().map(|r| r.name.as_str()).collect();
    // Dependencies first (lexicographic within the layer), container last
    assert_eq!(created, vec!["web-data", "web-network", "web-server"]);
    assert!(report.updated.is_empty());
    assert!(report.deleted.is_empty());

    let status = StatusStore::global().get("s1-chart").expect("status recorded");
    assert_eq!(status.status, ChartHealth::Healthy);
    assert_eq!(status.counts.created, 3);

    // The container really exists and runs on the engine
    let container = harness.engine.container("web-server").expect("created");
    assert!(container.state.is_running());
    assert_eq!(container.networks, vec!["web-network".to_string()]);
}

#[tokio::test]
async fn s2_unchanged_reconcile_is_idempotent() {
    let harness = harness();
    reconcile(&harness, WEB_CHART, "s2-chart").await;
    let second = reconcile(&harness, WEB_CHART, "s2-chart").await;

    assert!(second.is_clean(), "unexpected errors: {:?}", second.errors);
    assert!(second.created.is_empty(), "created: {:?}", second.created);
    assert!(second.updated.is_empty(), "updated: {:?}", second.updated);
    assert!(second.deleted.is_empty(), "deleted: {:?}", second.deleted);
    assert_eq!(
        StatusStore::global().get("s2-chart").unwrap().status,
        ChartHealth::Healthy
    );
}

#[tokio::test]
async fn s3_image_change_triggers_replace_update() {
    let harness = harness();
    reconcile(&harness, WEB_CHART, "s3-chart").await;

    let first_id = harness.engine.container("web-server").unwrap().id;
    let changed = WEB_CHART.replace("nginx:latest", "nginx:1.25");
    let report = reconcile(&harness, &changed, "s3-chart").await;

    assert!(report.is_clean(), "unexpected errors: {:?}", report.errors);
    assert!(report.created.is_empty());
    assert!(report.deleted.is_empty());
    assert_eq!(report.updated.len(), 1);
    assert_eq!(report.updated[0].name, "web-server");
    assert!(
        report.updated[0]
            .message
            .as_deref()
            .is_some_and(|m| m.contains("image")),
        "update reasons missing: {:?}",
        report.updated[0].message
    );

    // Replace semantics: a different engine object with the new image
    let replaced = harness.engine.container("web-server").unwrap();
    assert_ne!(replaced.id, first_id);
    assert_eq!(replaced.image, "nginx:1.25");
}

#[tokio::test]
async fn s4_orphan_cleanup_deletes_stale_container() {
    let harness = harness();

    // A previous revision of this chart created a container we no longer want
    let mut labels = cutepod::manifest::Labels::new();
    labels.insert(LABEL_CHART.to_string(), "s4-chart".to_string());
    labels.insert(LABEL_VERSION.to_string(), "0.0.1".to_string());
    labels.insert(LABEL_MANAGED_BY.to_string(), "cutepod-v1".to_string());
    harness
        .engine
        .create_container(&ContainerConfig {
            name: "old-web".to_string(),
            image: "nginx:1.19".to_string(),
            labels,
            ..ContainerConfig::default()
        })
        .await
        .unwrap();

    let report = reconcile(&harness, "", "s4-chart").await;

    assert!(report.created.is_empty());
    assert!(report.updated.is_empty());
    assert_eq!(report.deleted.len(), 1);
    assert_eq!(report.deleted[0].name, "old-web");
    assert!(harness.engine.container("old-web").is_none());

    let summary = report.summary();
    assert!(summary.contains("0 created"));
    assert!(summary.contains("0 updated"));
    assert!(summary.contains("1 deleted"));
}

#[tokio::test]
async fn s4_orphans_outside_the_chart_are_untouched() {
    let harness = harness();
    let mut labels = cutepod::manifest::Labels::new();
    labels.insert(LABEL_CHART.to_string(), "another-chart".to_string());
    harness
        .engine
        .create_container(&ContainerConfig {
            name: "foreign".to_string(),
            image: "nginx:latest".to_string(),
            labels,
            ..ContainerConfig::default()
        })
        .await
        .unwrap();

    let report = reconcile(&harness, "", "s4b-chart").await;
    assert!(report.deleted.is_empty());
    assert!(harness.engine.container("foreign").is_some());
}

#[tokio::test]
async fn s5_sub_path_traversal_rejected_before_engine_contact() {
    let harness = harness();
    let chart = r"
apiVersion: cutepod/v1alpha1
kind: CuteVolume
metadata:
  name: web-data
spec:
  type: emptyDir
  emptyDir: {}
---
apiVersion: cutepod/v1alpha1
kind: CuteContainer
metadata:
  name: web-server
spec:
  image: nginx:latest
  volumes:
    - name: web-data
      mountPath: /data
      subPath: ../../etc/passwd
";
    let err = harness
        .reconciler
        .reconcile(chart, "s5-chart", false, CancellationToken::new())
        .await
        .expect_err("traversal must fail validation");

    assert!(err.to_string().contains(".."), "message: {err}");
    // No engine calls at all: validation short-circuits
    assert_eq!(harness.engine.mutation_count(), 0);
    assert_eq!(harness.engine.call_count("container_list"), 0);
}

#[tokio::test]
async fn s6_mutual_pod_references_abort_without_mutations() {
    let harness = harness();
    let chart = r"
apiVersion: cutepod/v1alpha1
kind: CutePod
metadata:
  name: a
spec:
  containers: [b]
---
apiVersion: cutepod/v1alpha1
kind: CutePod
metadata:
  name: b
spec:
  containers: [a]
";
    let err = harness
        .reconciler
        .reconcile(chart, "s6-chart", false, CancellationToken::new())
        .await
        .expect_err("mutual pods must fail dependency validation");

    assert_eq!(
        err.category(),
        cutepod::ErrorCategory::Dependency,
        "got: {err}"
    );
    let message = err.to_string();
    assert!(message.contains("/a") || message.contains("/b"), "{message}");
    assert_eq!(harness.engine.mutation_count(), 0);
}

#[tokio::test]
async fn labels_propagate_to_every_engine_object() {
    let harness = harness();
    let chart = r"
apiVersion: cutepod/v1alpha1
kind: CuteNetwork
metadata:
  name: net
spec: {}
---
apiVersion: cutepod/v1alpha1
kind: CuteVolume
metadata:
  name: db-data
spec:
  type: volume
  volume: {}
---
apiVersion: cutepod/v1alpha1
kind: CuteSecret
metadata:
  name: api-key
spec:
  data:
    token: aHVudGVyMg==
---
apiVersion: cutepod/v1alpha1
kind: CuteContainer
metadata:
  name: app
spec:
  image: app:1
  networks: [net]
  volumes:
    - name: db-data
      mountPath: /var/lib/db
  secrets:
    - name: api-key
      asEnv: true
";
    let report = reconcile(&harness, chart, "labels-chart").await;
    assert!(report.is_clean(), "errors: {:?}", report.errors);

    let filters = ListFilters::chart("labels-chart");
    let containers = harness.engine.list_containers(&filters, true).await.unwrap();
    let networks = harness.engine.list_networks(&filters).await.unwrap();
    let volumes = harness.engine.list_volumes(&filters).await.unwrap();
    let secrets = harness.engine.list_secrets(&filters).await.unwrap();
    assert_eq!(
        (containers.len(), networks.len(), volumes.len(), secrets.len()),
        (1, 1, 1, 1)
    );

    for labels in [
        containers[0].labels.clone(),
        networks[0].labels.clone(),
        volumes[0].labels.clone(),
        secrets[0].labels.clone(),
    ] {
        assert_eq!(labels.get(LABEL_CHART).map(String::as_str), Some("labels-chart"));
        assert_eq!(
            labels.get(LABEL_MANAGED_BY).map(String::as_str),
            Some("cutepod-v1")
        );
        assert!(labels.contains_key(LABEL_VERSION));
    }
}

#[tokio::test]
async fn dry_run_plans_without_side_effects() {
    let harness = harness();
    let report = harness
        .reconciler
        .reconcile(WEB_CHART, "dry-chart", true, CancellationToken::new())
        .await
        .unwrap();

    assert!(report.dry_run);
    assert_eq!(report.created.len(), 3);
    assert!(report
        .created
        .iter()
        .all(|r| r.message.as_deref() == Some("would be created")));

    // No mutating engine call, no scratch directory
    assert_eq!(harness.engine.mutation_count(), 0);
    assert!(harness.engine.container("web-server").is_none());

    // The plan matches what a real run then performs
    let applied = reconcile(&harness, WEB_CHART, "dry-chart").await;
    let planned: Vec<&str> = report.created.iter().map(|r| r.name.as_str()).collect();
    let real: Vec<&str> = applied.created.iter().map(|r| r.name.as_str()).collect();
    assert_eq!(planned, real);
}

#[tokio::test]
async fn transient_engine_failures_are_retried() {
    let harness = harness();
    harness
        .engine
        .inject_failures("network_create", "socket hiccup", 2);

    let report = reconcile(&harness, WEB_CHART, "retry-chart").await;
    assert!(report.is_clean(), "errors: {:?}", report.errors);
    // Two injected failures plus the succeeding attempt
    assert_eq!(harness.engine.call_count("network_create"), 3);
}

#[tokio::test]
async fn persistent_live_state_failure_degrades_the_chart() {
    let harness = harness();
    harness
        .engine
        .inject_failures("secret_list", "socket down", 3);

    let report = reconcile(&harness, WEB_CHART, "degraded-live-chart").await;
    assert!(!report.is_clean());
    assert!(report.errors.iter().all(|e| e.recoverable));
    assert_eq!(
        StatusStore::global()
            .get("degraded-live-chart")
            .unwrap()
            .status,
        ChartHealth::Degraded
    );
    // The failure was contained to one kind; everything still created
    assert!(harness.engine.container("web-server").is_some());
}

#[tokio::test]
async fn secret_update_replaces_payload() {
    let harness = harness();
    let chart_v1 = r"
apiVersion: cutepod/v1alpha1
kind: CuteSecret
metadata:
  name: api-key
spec:
  data:
    token: aHVudGVyMg==
";
    reconcile(&harness, chart_v1, "secret-chart").await;

    let chart_v2 = r"
apiVersion: cutepod/v1alpha1
kind: CuteSecret
metadata:
  name: api-key
spec:
  data:
    token: aHVudGVyMg==
    endpoint: aHR0cHM6Ly9hcGk=
";
    let report = reconcile(&harness, chart_v2, "secret-chart").await;
    assert_eq!(report.updated.len(), 1);
    assert_eq!(harness.engine.call_count("secret_update"), 1);

    let secrets = harness
        .engine
        .list_secrets(&ListFilters::chart("secret-chart"))
        .await
        .unwrap();
    assert_eq!(secrets[0].keys.len(), 2);
}

#[tokio::test]
async fn shared_volume_reconciles_for_both_containers() {
    let harness = harness();
    let chart = r"
apiVersion: cutepod/v1alpha1
kind: CuteVolume
metadata:
  name: shared-logs
spec:
  type: emptyDir
  emptyDir: {}
---
apiVersion: cutepod/v1alpha1
kind: CuteContainer
metadata:
  name: app
spec:
  image: app:1
  volumes:
    - name: shared-logs
      mountPath: /logs
---
apiVersion: cutepod/v1alpha1
kind: CuteContainer
metadata:
  name: shipper
spec:
  image: shipper:1
  volumes:
    - name: shared-logs
      mountPath: /in
      readOnly: true
";
    let report = reconcile(&harness, chart, "shared-chart").await;
    assert!(report.is_clean(), "errors: {:?}", report.errors);

    let app = harness.engine.container("app").unwrap();
    let shipper = harness.engine.container("shipper").unwrap();
    // Both bind the same scratch directory; access modes differ
    assert_eq!(app.mounts[0].source, shipper.mounts[0].source);
    assert!(app.mounts[0].options.contains(&"rw".to_string()));
    assert!(shipper.mounts[0].options.contains(&"ro".to_string()));
}
