//! Name-indexed resource catalog.
//!
//! The registry owns every resource parsed from a chart; cross-references
//! stay name-based and are resolved by lookup, which keeps the object graph
//! acyclic in terms of ownership.

use std::collections::BTreeMap;

use crate::error::{Error, Result};
use crate::manifest::{Resource, ResourceKey, ResourceKind};

/// Catalog of the resources declared by one chart
#[derive(Debug, Clone, Default)]
pub struct Registry {
    resources: BTreeMap<ResourceKey, Resource>,
}

impl Registry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a resource, failing on a duplicate `(kind, name)` key
    pub fn insert(&mut self, resource: Resource) -> Result<()> {
        let key = resource.key();
        if self.resources.contains_key(&key) {
            return Err(Error::Duplicate {
                resource: key.to_string(),
            });
        }
        self.resources.insert(key, resource);
        Ok(())
    }

    /// Look up a resource by key
    pub fn get(&self, key: &ResourceKey) -> Option<&Resource> {
        self.resources.get(key)
    }

    /// All resources of one kind, in name order
    pub fn get_by_kind(&self, kind: ResourceKind) -> Vec<&Resource> {
        self.resources
            .values()
            .filter(|r| r.kind() == kind)
            .collect()
    }

    /// Iterate over every resource, in key order
    pub fn all(&self) -> impl Iterator<Item = &Resource> {
        self.resources.values()
    }

    /// Iterate over every key, in order
    pub fn keys(&self) -> impl Iterator<Item = &ResourceKey> {
        self.resources.keys()
    }

    /// Number of resources
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether the registry holds no resources
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Check that every declared dependency resolves within the registry
    pub fn validate_dependencies(&self) -> Result<()> {
        for resource in self.resources.values() {
            for dep in resource.dependencies() {
                if !self.resources.contains_key(&dep) {
                    return Err(Error::dependency(format!(
                        "{} depends on {dep}, which is not declared in the chart",
                        resource.key()
                    )));
                }
            }
        }
        Ok(())
    }

    /// Dependency edge list: `(dependent, dependency)` pairs
    pub fn dependency_edges(&self) -> Vec<(ResourceKey, ResourceKey)> {
        let mut edges = Vec::new();
        for resource in self.resources.values() {
            let from = resource.key();
            for dep in resource.dependencies() {
                edges.push((from.clone(), dep));
            }
        }
        edges
    }

    /// Stamp chart labels onto every resource (user labels win)
    pub fn apply_standard_labels(&mut self, chart: &crate::manifest::ChartMeta) {
        for resource in self.resources.values_mut() {
            resource.apply_standard_labels(chart);
        }
    }
}
