//! Typed manifest model.
//!
//! A chart is a set of YAML documents, each declaring one resource of a known
//! kind. This module provides the typed records for the five kinds, the
//! cross-reference primitives ([`ResourceKey`], [`Resource::dependencies`])
//! and per-kind validation producing locator-annotated errors.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

pub mod container;
pub mod network;
pub mod parser;
pub mod pod;
pub mod secret;
pub mod volume;

pub use container::{
    Capabilities, ContainerManifest, ContainerSpec, EnvVar, HealthCheck, HealthProbe,
    MountOptions, PortSpec, Protocol, RestartPolicy, SecretRef, SecurityContext, SeLinuxLabel,
    VolumeMount,
};
pub use network::{NetworkManifest, NetworkSpec};
pub use parser::parse_manifests;
pub use pod::{PodManifest, PodSpec};
pub use secret::{SecretManifest, SecretSpec};
pub use volume::{
    EmptyDirMedium, EmptyDirSpec, HostPathSpec, HostPathType, NamedVolumeSpec, Owner,
    SeLinuxLevel, SeLinuxOptions, VolumeManifest, VolumeSecurityContext, VolumeSpec, VolumeType,
};

/// Label key scoping engine objects to their chart
pub const LABEL_CHART: &str = "cutepod.io/chart";
/// Label key recording the chart version an object was reconciled from
pub const LABEL_VERSION: &str = "cutepod.io/version";
/// Label key identifying cutepod-managed objects
pub const LABEL_MANAGED_BY: &str = "cutepod.io/managed-by";
/// Value of the managed-by label
pub const MANAGED_BY: &str = "cutepod-v1";

/// Accepted manifest API versions
pub const API_VERSIONS: [&str; 2] = ["cutepod/v1alpha0", "cutepod/v1alpha1"];

/// String-keyed label map; ordered so serialized output is stable
pub type Labels = BTreeMap<String, String>;

/// The tag of a managed resource variant
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ResourceKind {
    /// A container workload
    Container,
    /// An engine network
    Network,
    /// A host-path, scratch, or engine-native volume
    Volume,
    /// An engine secret
    Secret,
    /// A grouping of containers, used for dependency ordering
    Pod,
}

impl ResourceKind {
    /// All kinds, in creation-affinity order
    pub const ALL: [ResourceKind; 5] = [
        ResourceKind::Network,
        ResourceKind::Volume,
        ResourceKind::Secret,
        ResourceKind::Container,
        ResourceKind::Pod,
    ];

    /// The manifest `kind:` spelling for this resource kind
    pub fn manifest_kind(self) -> &'static str {
        match self {
            Self::Container => "CuteContainer",
            Self::Network => "CuteNetwork",
            Self::Volume => "CuteVolume",
            Self::Secret => "CuteSecret",
            Self::Pod => "CutePod",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Container => write!(f, "Container"),
            Self::Network => write!(f, "Network"),
            Self::Volume => write!(f, "Volume"),
            Self::Secret => write!(f, "Secret"),
            Self::Pod => write!(f, "Pod"),
        }
    }
}

impl FromStr for ResourceKind {
    type Err = Error;

    /// Parse the manifest `kind:` spelling (`CuteContainer`, ...)
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "CuteContainer" => Ok(Self::Container),
            "CuteNetwork" => Ok(Self::Network),
            "CuteVolume" => Ok(Self::Volume),
            "CuteSecret" => Ok(Self::Secret),
            "CutePod" => Ok(Self::Pod),
            other => Err(Error::validation(
                "document",
                format!("unknown kind '{other}'"),
            )),
        }
    }
}

/// Unique `(kind, name)` key of a resource within a chart.
///
/// Ordering is by name first so that topological layers come out in
/// lexicographic name order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceKey {
    /// The resource kind
    pub kind: ResourceKind,
    /// The resource name
    pub name: String,
}

impl ResourceKey {
    /// Create a new key
    pub fn new(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }
}

impl PartialOrd for ResourceKey {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ResourceKey {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.name
            .cmp(&other.name)
            .then_with(|| self.kind.cmp(&other.kind))
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.name)
    }
}

/// Identity of the chart a reconcile run operates on
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartMeta {
    /// Chart name, scoping engine-side ownership
    pub name: String,
    /// Chart version recorded on every managed object
    pub version: String,
}

impl ChartMeta {
    /// Create chart metadata with an explicit version
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// The three standard labels stamped on every managed object
    pub fn standard_labels(&self) -> Labels {
        let mut labels = Labels::new();
        labels.insert(LABEL_CHART.to_string(), self.name.clone());
        labels.insert(LABEL_VERSION.to_string(), self.version.clone());
        labels.insert(LABEL_MANAGED_BY.to_string(), MANAGED_BY.to_string());
        labels
    }
}

/// A parsed, validated resource of any kind
#[derive(Debug, Clone, PartialEq)]
pub enum Resource {
    /// A container workload
    Container(ContainerManifest),
    /// An engine network
    Network(NetworkManifest),
    /// A volume declaration
    Volume(VolumeManifest),
    /// An engine secret
    Secret(SecretManifest),
    /// A container grouping
    Pod(PodManifest),
}

impl Resource {
    /// The kind tag of this resource
    pub fn kind(&self) -> ResourceKind {
        match self {
            Self::Container(_) => ResourceKind::Container,
            Self::Network(_) => ResourceKind::Network,
            Self::Volume(_) => ResourceKind::Volume,
            Self::Secret(_) => ResourceKind::Secret,
            Self::Pod(_) => ResourceKind::Pod,
        }
    }

    /// The resource name
    pub fn name(&self) -> &str {
        match self {
            Self::Container(m) => &m.name,
            Self::Network(m) => &m.name,
            Self::Volume(m) => &m.name,
            Self::Secret(m) => &m.name,
            Self::Pod(m) => &m.name,
        }
    }

    /// The `(kind, name)` key of this resource
    pub fn key(&self) -> ResourceKey {
        ResourceKey::new(self.kind(), self.name())
    }

    /// The labels declared on the manifest
    pub fn labels(&self) -> &Labels {
        match self {
            Self::Container(m) => &m.labels,
            Self::Network(m) => &m.labels,
            Self::Volume(m) => &m.labels,
            Self::Secret(m) => &m.labels,
            Self::Pod(m) => &m.labels,
        }
    }

    fn labels_mut(&mut self) -> &mut Labels {
        match self {
            Self::Container(m) => &mut m.labels,
            Self::Network(m) => &mut m.labels,
            Self::Volume(m) => &mut m.labels,
            Self::Secret(m) => &mut m.labels,
            Self::Pod(m) => &mut m.labels,
        }
    }

    /// Merge the chart's standard labels under the user's labels.
    ///
    /// User labels win on key conflicts.
    pub fn apply_standard_labels(&mut self, chart: &ChartMeta) {
        let user = std::mem::take(self.labels_mut());
        let mut merged = chart.standard_labels();
        merged.extend(user);
        *self.labels_mut() = merged;
    }

    /// Derived `(kind, name)` references this resource depends on
    pub fn dependencies(&self) -> Vec<ResourceKey> {
        match self {
            Self::Container(m) => m.dependencies(),
            Self::Pod(m) => m.dependencies(),
            // Networks, volumes and secrets are leaves
            Self::Network(_) | Self::Volume(_) | Self::Secret(_) => Vec::new(),
        }
    }

    /// Validate the manifest against its kind's invariants
    pub fn validate(&self) -> Result<()> {
        if self.name().is_empty() {
            return Err(Error::validation_at(
                format!("{}/?", self.kind()),
                "metadata.name",
                "name must not be empty",
            ));
        }
        match self {
            Self::Container(m) => m.validate(),
            Self::Network(m) => m.validate(),
            Self::Volume(m) => m.validate(),
            Self::Secret(m) => m.validate(),
            Self::Pod(m) => m.validate(),
        }
    }
}
