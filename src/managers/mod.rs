//! Per-kind resource drivers.
//!
//! A [`ResourceManager`] translates a declarative resource into engine
//! calls and back: it lists the chart's live objects, decides equivalence
//! between desired and live state, and performs create/update/delete.
//! Updates are replace operations (delete then create) because the engine
//! does not permit in-place change of the fields that can differ.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::engine::Engine;
use crate::error::Result;
use crate::manifest::{ChartMeta, Resource, ResourceKind};
use crate::mount::MountResolver;
use crate::registry::Registry;

pub mod container;
pub mod network;
pub mod secret;
pub mod volume;

pub use container::ContainerManager;
pub use network::NetworkManager;
pub use secret::SecretManager;
pub use volume::VolumeManager;

/// Everything a manager operation needs from the surrounding reconcile run
pub struct OpContext<'a> {
    /// The engine to drive
    pub engine: &'a dyn Engine,
    /// Chart identity for labels and scoping
    pub chart: &'a ChartMeta,
    /// The desired registry (labels already stamped)
    pub registry: &'a Registry,
    /// Volume path resolver
    pub mounts: &'a MountResolver,
    /// Names of volumes referenced by two or more containers
    pub shared_volumes: &'a BTreeSet<String>,
    /// Cancellation token of the reconcile run
    pub cancel: &'a CancellationToken,
}

/// Driver for one resource kind
#[async_trait]
pub trait ResourceManager: Send + Sync {
    /// The kind this manager drives
    fn kind(&self) -> ResourceKind;

    /// Desired resources of this kind from the registry
    fn desired_from_manifests(&self, registry: &Registry) -> Vec<Resource> {
        registry
            .get_by_kind(self.kind())
            .into_iter()
            .cloned()
            .collect()
    }

    /// Live resources of this kind, scoped to the chart's label
    async fn actual_from_engine(&self, ctx: &OpContext<'_>) -> Result<Vec<Resource>>;

    /// Create the resource on the engine
    async fn create(&self, ctx: &OpContext<'_>, resource: &Resource) -> Result<()>;

    /// Replace the live resource with the desired one.
    ///
    /// The old object is deleted first and not restored if the new create
    /// fails. An object that vanished since the diff is not an error.
    async fn update(
        &self,
        ctx: &OpContext<'_>,
        desired: &Resource,
        actual: &Resource,
    ) -> Result<()> {
        match self.delete(ctx, actual).await {
            Ok(()) | Err(crate::error::Error::NotFound { .. }) => {}
            Err(err) => return Err(err),
        }
        self.create(ctx, desired).await
    }

    /// Delete the resource from the engine
    async fn delete(&self, ctx: &OpContext<'_>, resource: &Resource) -> Result<()>;

    /// Whether desired and live state are equivalent
    fn equivalent(&self, desired: &Resource, actual: &Resource) -> Result<bool>;

    /// Field-level reasons why `desired` differs from `actual`
    fn update_reasons(&self, desired: &Resource, actual: &Resource) -> Vec<String>;
}

/// Kind-indexed operation table of managers
#[derive(Clone)]
pub struct ManagerSet {
    managers: Vec<Arc<dyn ResourceManager>>,
}

impl ManagerSet {
    /// The built-in managers for the engine-backed kinds.
    ///
    /// `Pod` has no manager: pods group containers for ordering and have no
    /// engine counterpart.
    pub fn defaults() -> Self {
        Self {
            managers: vec![
                Arc::new(NetworkManager) as Arc<dyn ResourceManager>,
                Arc::new(VolumeManager),
                Arc::new(SecretManager),
                Arc::new(ContainerManager),
            ],
        }
    }

    /// Look up the manager for a kind
    pub fn get(&self, kind: ResourceKind) -> Option<&Arc<dyn ResourceManager>> {
        self.managers.iter().find(|m| m.kind() == kind)
    }

    /// Iterate over all registered managers
    pub fn iter(&self) -> impl Iterator<Item = &Arc<dyn ResourceManager>> {
        self.managers.iter()
    }
}

/// Compare two label maps ignoring cutepod's internal echo labels
pub(crate) fn labels_equal(a: &crate::manifest::Labels, b: &crate::manifest::Labels) -> bool {
    let strip = |labels: &crate::manifest::Labels| -> crate::manifest::Labels {
        labels
            .iter()
            .filter(|(key, _)| !crate::engine::is_echo_label(key))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    };
    strip(a) == strip(b)
}
