//! Property-based tests for ordering, diffing and subPath safety.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use proptest::prelude::*;

use cutepod::diff::diff_kind;
use cutepod::graph::DependencyGraph;
use cutepod::managers::{ManagerSet, ResourceManager};
use cutepod::manifest::{
    ContainerManifest, ContainerSpec, Labels, NetworkManifest, NetworkSpec, Resource,
    ResourceKind,
};
use cutepod::mount::{clean_path, validate_sub_path};
use cutepod::Registry;

// ============================================================================
// Strategies
// ============================================================================

/// Short resource-name-ish identifiers
fn name_strategy() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{0,8}"
}

/// Sets of unique names
fn name_set_strategy(max: usize) -> impl Strategy<Value = BTreeSet<String>> {
    prop::collection::btree_set(name_strategy(), 0..max)
}

/// SubPath candidates: mostly plausible segments, some hostile
fn sub_path_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-zA-Z0-9._-]{1,12}(/[a-zA-Z0-9._-]{1,12}){0,3}",
        Just("../../etc/passwd".to_string()),
        Just("a/../b".to_string()),
        Just("/absolute".to_string()),
        Just("a//b".to_string()),
        Just("..".to_string()),
        Just("trailing/".to_string()),
        "[ -~]{1,24}",
    ]
}

fn network(name: &str) -> Resource {
    Resource::Network(NetworkManifest {
        name: name.to_string(),
        labels: Labels::new(),
        spec: NetworkSpec::default(),
    })
}

fn network_with_driver(name: &str, driver: &str) -> Resource {
    Resource::Network(NetworkManifest {
        name: name.to_string(),
        labels: Labels::new(),
        spec: NetworkSpec {
            driver: driver.to_string(),
            ..NetworkSpec::default()
        },
    })
}

fn container(name: &str, networks: Vec<String>) -> Resource {
    Resource::Container(ContainerManifest {
        name: name.to_string(),
        labels: Labels::new(),
        spec: ContainerSpec {
            image: "img:1".to_string(),
            command: Vec::new(),
            args: Vec::new(),
            env: Vec::new(),
            working_dir: None,
            uid: None,
            gid: None,
            ports: Vec::new(),
            volumes: Vec::new(),
            networks,
            secrets: Vec::new(),
            security_context: None,
            restart_policy: None,
            health_check: None,
            pod: None,
        },
    })
}

proptest! {
    // P7: a subPath accepted by validation never resolves outside the base
    #[test]
    fn accepted_sub_paths_stay_inside_the_base(sub_path in sub_path_strategy()) {
        if validate_sub_path(&sub_path).is_ok() {
            let base = Path::new("/vol/base");
            let resolved = clean_path(&base.join(&sub_path));
            prop_assert!(
                resolved.starts_with(base),
                "'{sub_path}' resolved to {} outside {}",
                resolved.display(),
                base.display()
            );
        }
    }

    // Rejection is stable under lexical cleaning: a rejected subPath never
    // cleans to something that would have escaped silently
    #[test]
    fn traversal_components_always_rejected(
        prefix in "[a-z]{1,6}",
        suffix in "[a-z]{1,6}",
    ) {
        let hostile = format!("{prefix}/../../{suffix}");
        prop_assert!(validate_sub_path(&hostile).is_err());
    }

    // P6: the diff is a partition of desired ∪ live
    #[test]
    fn diff_partitions_names(
        desired_names in name_set_strategy(12),
        live_names in name_set_strategy(12),
        changed_names in name_set_strategy(12),
    ) {
        let desired: Vec<Resource> = desired_names
            .iter()
            .map(|name| {
                // Some overlapping networks get a different driver so the
                // update bucket is exercised too
                if changed_names.contains(name) {
                    network_with_driver(name, "macvlan")
                } else {
                    network(name)
                }
            })
            .collect();
        let live: Vec<Resource> = live_names.iter().map(|name| network(name)).collect();

        let managers = ManagerSet::defaults();
        let manager: &Arc<dyn ResourceManager> =
            managers.get(ResourceKind::Network).expect("network manager");
        let (diff, errors) = diff_kind(ResourceKind::Network, &desired, &live, Some(manager));
        prop_assert!(errors.is_empty());

        let create: BTreeSet<_> = diff.to_create.iter().cloned().collect();
        let update: BTreeSet<_> = diff.to_update.iter().map(|e| e.name.clone()).collect();
        let delete: BTreeSet<_> = diff.to_delete.iter().cloned().collect();
        let unchanged: BTreeSet<_> = diff.unchanged.iter().cloned().collect();

        // Disjointness
        prop_assert!(create.is_disjoint(&update));
        prop_assert!(create.is_disjoint(&delete));
        prop_assert!(create.is_disjoint(&unchanged));
        prop_assert!(update.is_disjoint(&delete));
        prop_assert!(update.is_disjoint(&unchanged));
        prop_assert!(delete.is_disjoint(&unchanged));

        // Coverage
        let mut all = BTreeSet::new();
        all.extend(desired_names.iter().cloned());
        all.extend(live_names.iter().cloned());
        let mut partitioned = BTreeSet::new();
        partitioned.extend(create.iter().cloned());
        partitioned.extend(update.iter().cloned());
        partitioned.extend(delete.iter().cloned());
        partitioned.extend(unchanged.iter().cloned());
        prop_assert_eq!(&all, &partitioned);

        // Boundary conditions
        prop_assert!(create.is_disjoint(&live_names));
        prop_assert!(delete.is_disjoint(&desired_names));
    }

    // P4 + P5: layers respect edges; deletion order is creation reversed
    #[test]
    fn layers_respect_dependency_edges(
        network_names in prop::collection::btree_set("[a-z]{1,6}", 1..6),
        container_names in prop::collection::btree_set("[a-z]{1,6}", 1..6),
        edge_seed in prop::collection::vec(0usize..64, 0..24),
    ) {
        let networks: Vec<String> = network_names.iter().map(|n| format!("net-{n}")).collect();
        let containers: Vec<String> =
            container_names.iter().map(|n| format!("app-{n}")).collect();

        let mut registry = Registry::new();
        for name in &networks {
            registry.insert(network(name)).expect("unique network");
        }
        let mut edges = Vec::new();
        for (i, name) in containers.iter().enumerate() {
            let mut attached = BTreeSet::new();
            for (j, seed) in edge_seed.iter().enumerate() {
                if (seed + i + j) % containers.len().max(1) == i % containers.len().max(1) {
                    attached.insert(networks[seed % networks.len()].clone());
                }
            }
            for net in &attached {
                edges.push((name.clone(), net.clone()));
            }
            registry
                .insert(container(name, attached.into_iter().collect()))
                .expect("unique container");
        }

        let graph = DependencyGraph::build(&registry).expect("acyclic by construction");
        let layers = graph.creation_layers();

        let layer_of = |kind: ResourceKind, name: &str| -> usize {
            layers
                .iter()
                .position(|layer| {
                    layer.iter().any(|key| key.kind == kind && key.name == name)
                })
                .expect("every resource is in some layer")
        };

        // Every resource appears exactly once
        let total: usize = layers.iter().map(Vec::len).sum();
        prop_assert_eq!(total, registry.len());

        // Dependencies always land in a strictly earlier layer
        for (container_name, network_name) in &edges {
            prop_assert!(
                layer_of(ResourceKind::Network, network_name)
                    < layer_of(ResourceKind::Container, container_name),
                "{network_name} must precede {container_name}"
            );
        }

        // Deletion order is exactly the creation order reversed
        let mut reversed = layers.clone();
        reversed.reverse();
        prop_assert_eq!(reversed, graph.deletion_layers());
    }

    // Builder-grade robustness: arbitrary strings never panic validation
    #[test]
    fn sub_path_validation_never_panics(input in ".{0,64}") {
        let _ = validate_sub_path(&input);
    }

    // clean_path is idempotent
    #[test]
    fn clean_path_is_idempotent(segments in prop::collection::vec("[a-z.]{1,5}|\\.\\.|\\.", 0..8)) {
        let mut path = PathBuf::from("/");
        for segment in &segments {
            path.push(segment);
        }
        let once = clean_path(&path);
        let twice = clean_path(&once);
        prop_assert_eq!(once, twice);
    }
}
