//! Container engine capability.
//!
//! The reconciliation core talks to the engine through the [`Engine`] trait
//! only, so the engine can be the real podman transport ([`PodmanEngine`])
//! or an in-memory test double ([`MockEngine`]).
//!
//! Records in this module are engine-level: plain strings and maps the way
//! the engine reports them, with managers translating to and from the typed
//! manifest model.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::manifest::Labels;

pub mod cli;
pub mod mock;

pub use cli::PodmanEngine;
pub use mock::MockEngine;

/// Label selectors applied to engine `list` operations.
///
/// Selectors use the literal `key=value` form. An empty filter matches
/// everything; a non-empty filter matches objects whose labels contain at
/// least one of the selector pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListFilters {
    labels: Vec<(String, String)>,
}

impl ListFilters {
    /// An empty filter matching all objects
    pub fn new() -> Self {
        Self::default()
    }

    /// Filter scoping results to one chart's objects
    pub fn chart(chart: &str) -> Self {
        Self::new().label(crate::manifest::LABEL_CHART, chart)
    }

    /// Add a `key=value` selector
    #[must_use]
    pub fn label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.push((key.into(), value.into()));
        self
    }

    /// Whether a label set passes this filter
    pub fn matches(&self, labels: &Labels) -> bool {
        if self.labels.is_empty() {
            return true;
        }
        self.labels
            .iter()
            .any(|(key, value)| labels.get(key).is_some_and(|v| v == value))
    }

    /// The selectors in literal `key=value` form
    pub fn selectors(&self) -> impl Iterator<Item = String> + '_ {
        self.labels.iter().map(|(k, v)| format!("{k}={v}"))
    }

    /// Whether no selector is set
    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }
}

/// A host-to-container port binding
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortBinding {
    /// Port inside the container
    pub container_port: u16,
    /// Published host port, dynamic when absent
    pub host_port: Option<u16>,
    /// `tcp` or `udp`
    pub protocol: String,
}

/// Labels cutepod writes for its own round-tripping, excluded from
/// user-visible label comparisons
pub(crate) fn is_echo_label(key: &str) -> bool {
    matches!(
        key,
        "cutepod.io/mounts" | "cutepod.io/secrets" | "cutepod.io/secret-keys"
    )
}

/// A mount attached to a container.
///
/// `volume_name`, `sub_path` and `declared_options` echo the declarative
/// origin of the mount so that live state can be compared field-by-field
/// against manifests.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MountSpec {
    /// Host path, or engine volume name for named volumes
    pub source: String,
    /// Absolute mount point inside the container
    pub target: String,
    /// Mounted read-only
    pub read_only: bool,
    /// Ordered mount options (`bind`, `ro`, SELinux label, ...)
    pub options: Vec<String>,
    /// Source is an engine-native named volume
    pub named: bool,
    /// Name of the declaring volume resource, when known
    pub volume_name: Option<String>,
    /// Relative selector the mount was resolved through, when known
    pub sub_path: Option<String>,
    /// The manifest's mount options, when known
    pub declared_options: Option<crate::manifest::MountOptions>,
}

/// A secret made available to a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretAttachment {
    /// Engine secret name
    pub name: String,
    /// Expose keys as environment variables
    pub as_env: bool,
    /// Mount path inside the container, engine default when absent
    pub target: Option<String>,
}

/// Health check configuration passed to the engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthConfig {
    /// Probe command in engine `CMD` form
    pub test: Vec<String>,
    /// Seconds between probes
    pub interval_seconds: Option<u32>,
    /// Per-probe timeout in seconds
    pub timeout_seconds: Option<u32>,
    /// Failures before unhealthy
    pub retries: Option<u32>,
    /// Grace period after start
    pub start_period_seconds: Option<u32>,
}

/// Desired container passed to [`Engine::create_container`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Container name
    pub name: String,
    /// Image reference
    pub image: String,
    /// Entrypoint override
    pub command: Vec<String>,
    /// Arguments
    pub args: Vec<String>,
    /// Environment variables
    pub env: BTreeMap<String, String>,
    /// Working directory
    pub working_dir: Option<String>,
    /// `uid[:gid]` to run as
    pub user: Option<String>,
    /// Published ports
    pub ports: Vec<PortBinding>,
    /// Mounts
    pub mounts: Vec<MountSpec>,
    /// Networks to attach
    pub networks: Vec<String>,
    /// Secrets to attach
    pub secrets: Vec<SecretAttachment>,
    /// Run privileged
    pub privileged: bool,
    /// Capabilities to add
    pub cap_add: Vec<String>,
    /// Capabilities to drop
    pub cap_drop: Vec<String>,
    /// Engine restart policy value
    pub restart_policy: Option<String>,
    /// Health check
    pub health: Option<HealthConfig>,
    /// Labels
    pub labels: Labels,
}

/// Response from container creation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerCreateResponse {
    /// Engine-assigned container ID
    pub id: String,
    /// Engine warnings emitted during creation
    pub warnings: Vec<String>,
}

/// Runtime state of a container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContainerState {
    /// Created but never started
    Created,
    /// Running
    Running,
    /// Paused
    Paused,
    /// Exited with the given code
    Exited(i32),
    /// State the engine reported but we do not model
    Unknown,
}

impl ContainerState {
    /// Whether the container is running
    pub fn is_running(self) -> bool {
        matches!(self, Self::Running)
    }
}

/// A container as reported by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContainerRecord {
    /// Engine-assigned ID
    pub id: String,
    /// Container name
    pub name: String,
    /// Image reference
    pub image: String,
    /// Entrypoint override
    pub command: Vec<String>,
    /// Arguments
    pub args: Vec<String>,
    /// Environment variables
    pub env: BTreeMap<String, String>,
    /// Working directory
    pub working_dir: Option<String>,
    /// `uid[:gid]`
    pub user: Option<String>,
    /// Published ports
    pub ports: Vec<PortBinding>,
    /// Mounts
    pub mounts: Vec<MountSpec>,
    /// Attached networks
    pub networks: Vec<String>,
    /// Attached secrets
    pub secrets: Vec<SecretAttachment>,
    /// Engine restart policy value
    pub restart_policy: Option<String>,
    /// Labels
    pub labels: Labels,
    /// Runtime state
    pub state: ContainerState,
}

/// Desired network passed to [`Engine::create_network`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkConfig {
    /// Network name
    pub name: String,
    /// Driver
    pub driver: String,
    /// Subnet in CIDR notation
    pub subnet: Option<String>,
    /// Gateway address
    pub gateway: Option<String>,
    /// Driver options
    pub options: BTreeMap<String, String>,
    /// Labels
    pub labels: Labels,
}

/// A network as reported by the engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkRecord {
    /// Engine-assigned ID
    pub id: String,
    /// Network name
    pub name: String,
    /// Driver
    pub driver: String,
    /// Subnet in CIDR notation
    pub subnet: Option<String>,
    /// Gateway address
    pub gateway: Option<String>,
    /// Driver options
    pub options: BTreeMap<String, String>,
    /// Labels
    pub labels: Labels,
}

/// Desired volume passed to [`Engine::create_volume`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeConfig {
    /// Volume name
    pub name: String,
    /// Driver, engine default when absent
    pub driver: Option<String>,
    /// Driver options
    pub options: BTreeMap<String, String>,
    /// Labels
    pub labels: Labels,
}

/// A volume as reported by the engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VolumeRecord {
    /// Volume name (engine volumes are name-keyed)
    pub name: String,
    /// Driver
    pub driver: String,
    /// Host mountpoint
    pub mountpoint: Option<String>,
    /// Driver options
    pub options: BTreeMap<String, String>,
    /// Labels
    pub labels: Labels,
}

/// Desired secret passed to [`Engine::create_secret`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecretConfig {
    /// Secret name
    pub name: String,
    /// Secret type tag
    pub secret_type: String,
    /// Decoded payload per key
    pub data: BTreeMap<String, Vec<u8>>,
    /// Labels
    pub labels: Labels,
}

/// A secret as reported by the engine.
///
/// The engine never returns payloads on read; only the key set is visible.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecretRecord {
    /// Engine-assigned ID
    pub id: String,
    /// Secret name
    pub name: String,
    /// Secret type tag
    pub secret_type: String,
    /// Keys present in the payload
    pub keys: Vec<String>,
    /// Labels
    pub labels: Labels,
}

/// An image known to the engine
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRecord {
    /// Engine-assigned ID
    pub id: String,
    /// The reference the image was resolved from
    pub reference: String,
}

/// Abstract operations the reconciliation core needs from a container
/// engine.
///
/// Implementations must be safe to share across tasks.
#[async_trait]
pub trait Engine: Send + Sync {
    /// Verify the engine is reachable
    async fn ping(&self) -> Result<()>;

    /// Create a container from a config
    async fn create_container(&self, config: &ContainerConfig)
        -> Result<ContainerCreateResponse>;
    /// Start a created container
    async fn start_container(&self, name: &str) -> Result<()>;
    /// Stop a container, giving it `timeout` to exit gracefully
    async fn stop_container(&self, name: &str, timeout: Duration) -> Result<()>;
    /// Remove a container
    async fn remove_container(&self, name: &str, force: bool) -> Result<()>;
    /// List containers; only running ones unless `all`
    async fn list_containers(
        &self,
        filters: &ListFilters,
        all: bool,
    ) -> Result<Vec<ContainerRecord>>;
    /// Inspect one container
    async fn inspect_container(&self, name: &str) -> Result<ContainerRecord>;

    /// Pull an image from its registry
    async fn pull_image(&self, reference: &str) -> Result<ImageRecord>;
    /// Look up a local image
    async fn get_image(&self, reference: &str) -> Result<ImageRecord>;

    /// Create a network
    async fn create_network(&self, config: &NetworkConfig) -> Result<NetworkRecord>;
    /// Remove a network
    async fn remove_network(&self, name: &str) -> Result<()>;
    /// List networks
    async fn list_networks(&self, filters: &ListFilters) -> Result<Vec<NetworkRecord>>;
    /// Inspect one network
    async fn inspect_network(&self, name: &str) -> Result<NetworkRecord>;
    /// Attach a container to a network
    async fn connect_network(&self, network: &str, container: &str) -> Result<()>;
    /// Detach a container from a network
    async fn disconnect_network(&self, network: &str, container: &str) -> Result<()>;

    /// Create a volume
    async fn create_volume(&self, config: &VolumeConfig) -> Result<VolumeRecord>;
    /// Remove a volume
    async fn remove_volume(&self, name: &str) -> Result<()>;
    /// List volumes
    async fn list_volumes(&self, filters: &ListFilters) -> Result<Vec<VolumeRecord>>;
    /// Inspect one volume
    async fn inspect_volume(&self, name: &str) -> Result<VolumeRecord>;

    /// Create a secret
    async fn create_secret(&self, config: &SecretConfig) -> Result<SecretRecord>;
    /// Replace a secret's payload.
    ///
    /// Engines lack atomic payload replacement; implementations remove and
    /// re-create, so consumers must tolerate a brief absence.
    async fn update_secret(&self, config: &SecretConfig) -> Result<SecretRecord>;
    /// Remove a secret
    async fn remove_secret(&self, name: &str) -> Result<()>;
    /// List secrets (no payloads)
    async fn list_secrets(&self, filters: &ListFilters) -> Result<Vec<SecretRecord>>;
    /// Inspect one secret (no payload)
    async fn inspect_secret(&self, name: &str) -> Result<SecretRecord>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_filter_matches_all() {
        let filters = ListFilters::new();
        assert!(filters.matches(&Labels::new()));
        let labels: Labels = [("a".to_string(), "1".to_string())].into_iter().collect();
        assert!(filters.matches(&labels));
    }

    #[test]
    fn test_filter_matches_any_pair() {
        let filters = ListFilters::new()
            .label("cutepod.io/chart", "shop")
            .label("tier", "web");
        let chart_only: Labels = [("cutepod.io/chart".to_string(), "shop".to_string())]
            .into_iter()
            .collect();
        assert!(filters.matches(&chart_only));

        let wrong_value: Labels = [("cutepod.io/chart".to_string(), "blog".to_string())]
            .into_iter()
            .collect();
        assert!(!filters.matches(&wrong_value));
        assert!(!filters.matches(&Labels::new()));
    }

    #[test]
    fn test_selectors_literal_form() {
        let filters = ListFilters::chart("shop");
        let selectors: Vec<String> = filters.selectors().collect();
        assert_eq!(selectors, vec!["cutepod.io/chart=shop".to_string()]);
    }
}
