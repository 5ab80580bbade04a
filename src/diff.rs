//! Desired-versus-live state comparison.
//!
//! For each kind the comparator partitions resource names into create,
//! update, delete and unchanged sets. Equivalence is delegated to the
//! kind's manager; a comparison failure degrades that pair to unchanged
//! and is reported as a recoverable error.

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::warn;

use crate::error::Error;
use crate::managers::ResourceManager;
use crate::manifest::{Resource, ResourceKind};

/// One pending update with its field-level reasons
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateEntry {
    /// Resource name
    pub name: String,
    /// Fields that differ between desired and live state
    pub reasons: Vec<String>,
}

/// Per-kind diff partition
#[derive(Debug, Clone, Default)]
pub struct KindDiff {
    /// The kind this partition covers
    pub kind: Option<ResourceKind>,
    /// Names present in desired state only
    pub to_create: Vec<String>,
    /// Names present in both but not equivalent
    pub to_update: Vec<UpdateEntry>,
    /// Names present in live state only (orphans within this chart)
    pub to_delete: Vec<String>,
    /// Names present in both and equivalent
    pub unchanged: Vec<String>,
}

impl KindDiff {
    /// Whether nothing needs to change
    pub fn is_empty(&self) -> bool {
        self.to_create.is_empty() && self.to_update.is_empty() && self.to_delete.is_empty()
    }

    /// Whether an update is pending for `name`
    pub fn updates(&self, name: &str) -> bool {
        self.to_update.iter().any(|entry| entry.name == name)
    }
}

/// Combined diff across kinds
#[derive(Debug, Clone, Default)]
pub struct StateDiff {
    kinds: BTreeMap<ResourceKind, KindDiff>,
}

impl StateDiff {
    /// Merge one kind's partition in
    pub fn insert(&mut self, kind: ResourceKind, diff: KindDiff) {
        self.kinds.insert(kind, diff);
    }

    /// The partition for a kind, empty if the kind was not diffed
    pub fn for_kind(&self, kind: ResourceKind) -> KindDiff {
        self.kinds.get(&kind).cloned().unwrap_or_default()
    }

    /// Iterate over all per-kind partitions
    pub fn iter(&self) -> impl Iterator<Item = (&ResourceKind, &KindDiff)> {
        self.kinds.iter()
    }

    /// Whether no kind has pending work
    pub fn is_empty(&self) -> bool {
        self.kinds.values().all(KindDiff::is_empty)
    }

    /// Totals over all kinds: (create, update, delete, unchanged)
    pub fn totals(&self) -> (usize, usize, usize, usize) {
        self.kinds.values().fold((0, 0, 0, 0), |acc, diff| {
            (
                acc.0 + diff.to_create.len(),
                acc.1 + diff.to_update.len(),
                acc.2 + diff.to_delete.len(),
                acc.3 + diff.unchanged.len(),
            )
        })
    }
}

/// Compute the partition for one kind.
///
/// Returns the diff plus any comparison errors encountered; a failed
/// comparison counts its pair as unchanged.
pub fn diff_kind(
    kind: ResourceKind,
    desired: &[Resource],
    live: &[Resource],
    manager: Option<&Arc<dyn ResourceManager>>,
) -> (KindDiff, Vec<Error>) {
    let desired_by_name: BTreeMap<&str, &Resource> =
        desired.iter().map(|r| (r.name(), r)).collect();
    let live_by_name: BTreeMap<&str, &Resource> = live.iter().map(|r| (r.name(), r)).collect();

    let mut diff = KindDiff {
        kind: Some(kind),
        ..KindDiff::default()
    };
    let mut errors = Vec::new();

    for (name, desired_resource) in &desired_by_name {
        match live_by_name.get(name) {
            None => diff.to_create.push((*name).to_string()),
            Some(live_resource) => {
                let equivalent = match manager {
                    Some(manager) => manager.equivalent(desired_resource, live_resource),
                    // No manager registered: fall back to label equality
                    None => Ok(desired_resource.labels() == live_resource.labels()),
                };
                match equivalent {
                    Ok(true) => diff.unchanged.push((*name).to_string()),
                    Ok(false) => {
                        let reasons = manager
                            .map(|m| m.update_reasons(desired_resource, live_resource))
                            .unwrap_or_default();
                        diff.to_update.push(UpdateEntry {
                            name: (*name).to_string(),
                            reasons,
                        });
                    }
                    Err(err) => {
                        warn!(resource = %desired_resource.key(), "comparison failed, treating as unchanged: {err}");
                        diff.unchanged.push((*name).to_string());
                        errors.push(err);
                    }
                }
            }
        }
    }

    for name in live_by_name.keys() {
        if !desired_by_name.contains_key(name) {
            diff.to_delete.push((*name).to_string());
        }
    }

    (diff, errors)
}
