//! Volume manifest record.
//!
//! `CuteVolume` is a tagged variant: a bind-mounted host path, a per-chart
//! scratch directory (`emptyDir`), or an engine-native named volume. The
//! discriminator decides which sub-record must be present; the others must
//! be absent.

use std::collections::BTreeMap;
use std::path::Component;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::manifest::Labels;

/// A parsed `CuteVolume` document
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeManifest {
    /// Resource name
    pub name: String,
    /// User labels from `metadata.labels`
    pub labels: Labels,
    /// The declarative volume spec
    pub spec: VolumeSpec,
}

/// Discriminator of the volume variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VolumeType {
    /// Bind-mount a path from the host
    #[serde(rename = "hostPath")]
    HostPath,
    /// Per-chart scratch directory
    #[serde(rename = "emptyDir")]
    EmptyDir,
    /// Engine-native named volume
    #[serde(rename = "volume")]
    Named,
}

impl std::fmt::Display for VolumeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::HostPath => write!(f, "hostPath"),
            Self::EmptyDir => write!(f, "emptyDir"),
            Self::Named => write!(f, "volume"),
        }
    }
}

/// Expected type of a host path
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum HostPathType {
    /// Must be an existing directory
    Directory,
    /// Directory, created if missing
    DirectoryOrCreate,
    /// Must be an existing file
    File,
    /// File, created empty if missing
    FileOrCreate,
    /// Must be an existing unix socket
    Socket,
    /// Must be an existing character device
    CharDevice,
    /// Must be an existing block device
    BlockDevice,
}

/// `hostPath` sub-record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostPathSpec {
    /// Absolute, already-canonical host path
    pub path: String,
    /// Expected type of the path
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path_type: Option<HostPathType>,
}

/// Backing medium of an `emptyDir`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmptyDirMedium {
    /// Node-local disk (default)
    #[default]
    #[serde(rename = "")]
    Default,
    /// tmpfs
    Memory,
}

/// `emptyDir` sub-record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmptyDirSpec {
    /// Backing medium
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub medium: Option<EmptyDirMedium>,
    /// Size cap in resource-quantity grammar (e.g. `64Mi`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size_limit: Option<String>,
}

/// `volume` (engine-native) sub-record
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NamedVolumeSpec {
    /// Volume driver, engine default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub driver: Option<String>,
    /// Driver options
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

/// SELinux sharing level declared on the volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SeLinuxLevel {
    /// Content shared between containers (`z` relabel)
    Shared,
    /// Content private to one container (`Z` relabel)
    Private,
}

/// SELinux options of a volume security context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeLinuxOptions {
    /// Sharing level
    pub level: SeLinuxLevel,
}

/// Ownership to apply to materialised volume paths
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Owner {
    /// Owning container UID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<u32>,
    /// Owning container GID
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<u32>,
}

/// Volume-level security context
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSecurityContext {
    /// SELinux options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub se_linux_options: Option<SeLinuxOptions>,
    /// Ownership applied when the path is materialised
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<Owner>,
}

/// `spec` of a `CuteVolume`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeSpec {
    /// Variant discriminator
    #[serde(rename = "type")]
    pub volume_type: VolumeType,
    /// `hostPath` sub-record, present iff `type: hostPath`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_path: Option<HostPathSpec>,
    /// `emptyDir` sub-record, present iff `type: emptyDir`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub empty_dir: Option<EmptyDirSpec>,
    /// Named-volume sub-record, present iff `type: volume`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub volume: Option<NamedVolumeSpec>,
    /// Security context
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<VolumeSecurityContext>,
}

impl VolumeManifest {
    fn resource(&self) -> String {
        format!("Volume/{}", self.name)
    }

    /// Validate variant consistency and variant-specific invariants
    pub fn validate(&self) -> Result<()> {
        let spec = &self.spec;
        let present = |field: bool, name: &str, expected: VolumeType| -> Result<()> {
            if field != (spec.volume_type == expected) {
                let msg = if field {
                    format!("'{name}' must be absent when type is {}", spec.volume_type)
                } else {
                    format!("'{name}' is required when type is {}", spec.volume_type)
                };
                return Err(Error::validation_at(
                    self.resource(),
                    format!("spec.{name}"),
                    msg,
                ));
            }
            Ok(())
        };
        present(spec.host_path.is_some(), "hostPath", VolumeType::HostPath)?;
        present(spec.empty_dir.is_some(), "emptyDir", VolumeType::EmptyDir)?;
        present(spec.volume.is_some(), "volume", VolumeType::Named)?;

        if let Some(host_path) = &spec.host_path {
            validate_host_path(&host_path.path)
                .map_err(|msg| Error::validation_at(self.resource(), "spec.hostPath.path", msg))?;
        }

        if let Some(empty_dir) = &spec.empty_dir {
            if let Some(limit) = &empty_dir.size_limit {
                parse_quantity(limit).map_err(|msg| {
                    Error::validation_at(self.resource(), "spec.emptyDir.sizeLimit", msg)
                })?;
            }
        }

        Ok(())
    }
}

/// Check a declared host path: absolute, no `..`, already canonical.
pub(crate) fn validate_host_path(path: &str) -> std::result::Result<(), String> {
    if !path.starts_with('/') {
        return Err(format!("hostPath '{path}' must be absolute"));
    }
    let p = std::path::Path::new(path);
    if p.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(format!("hostPath '{path}' must not contain '..'"));
    }
    let cleaned = crate::mount::clean_path(p);
    if cleaned != p {
        return Err(format!(
            "hostPath '{path}' is not canonical (did you mean '{}'?)",
            cleaned.display()
        ));
    }
    Ok(())
}

/// Parse a resource quantity (`512`, `1.5Gi`, `100M`) to bytes.
pub fn parse_quantity(input: &str) -> std::result::Result<u64, String> {
    let input = input.trim();
    if input.is_empty() {
        return Err("quantity must not be empty".to_string());
    }
    let split = input
        .find(|c: char| !c.is_ascii_digit() && c != '.')
        .unwrap_or(input.len());
    let (number, suffix) = input.split_at(split);
    let value: f64 = number
        .parse()
        .map_err(|_| format!("invalid quantity '{input}'"))?;
    if value < 0.0 {
        return Err(format!("quantity '{input}' must not be negative"));
    }
    let multiplier: u64 = match suffix {
        "" => 1,
        "k" => 1_000,
        "M" => 1_000_000,
        "G" => 1_000_000_000,
        "T" => 1_000_000_000_000,
        "Ki" => 1 << 10,
        "Mi" => 1 << 20,
        "Gi" => 1 << 30,
        "Ti" => 1 << 40,
        other => return Err(format!("unknown quantity suffix '{other}'")),
    };
    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    let bytes = (value * multiplier as f64) as u64;
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host_path_volume(name: &str, path: &str) -> VolumeManifest {
        VolumeManifest {
            name: name.to_string(),
            labels: Labels::new(),
            spec: VolumeSpec {
                volume_type: VolumeType::HostPath,
                host_path: Some(HostPathSpec {
                    path: path.to_string(),
                    path_type: None,
                }),
                empty_dir: None,
                volume: None,
                security_context: None,
            },
        }
    }

    #[test]
    fn test_host_path_volume_valid() {
        assert!(host_path_volume("data", "/srv/data").validate().is_ok());
    }

    #[test]
    fn test_relative_host_path_rejected() {
        let err = host_path_volume("data", "srv/data").validate().unwrap_err();
        assert_eq!(err.locator(), Some("spec.hostPath.path"));
    }

    #[test]
    fn test_traversal_host_path_rejected() {
        let err = host_path_volume("data", "/srv/../etc")
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains(".."));
    }

    #[test]
    fn test_non_canonical_host_path_rejected() {
        let err = host_path_volume("data", "/srv//data/")
            .validate()
            .unwrap_err();
        assert!(err.to_string().contains("not canonical"));
    }

    #[test]
    fn test_variant_consistency() {
        let mut mf = host_path_volume("data", "/srv/data");
        mf.spec.empty_dir = Some(EmptyDirSpec::default());
        let err = mf.validate().unwrap_err();
        assert_eq!(err.locator(), Some("spec.emptyDir"));

        let missing = VolumeManifest {
            name: "scratch".to_string(),
            labels: Labels::new(),
            spec: VolumeSpec {
                volume_type: VolumeType::EmptyDir,
                host_path: None,
                empty_dir: None,
                volume: None,
                security_context: None,
            },
        };
        let err = missing.validate().unwrap_err();
        assert!(err.to_string().contains("required"));
    }

    #[test]
    fn test_quantity_grammar() {
        assert_eq!(parse_quantity("512").unwrap(), 512);
        assert_eq!(parse_quantity("1Ki").unwrap(), 1024);
        assert_eq!(parse_quantity("64Mi").unwrap(), 64 << 20);
        assert_eq!(parse_quantity("1.5Gi").unwrap(), 3 << 29);
        assert_eq!(parse_quantity("100M").unwrap(), 100_000_000);
        assert!(parse_quantity("").is_err());
        assert!(parse_quantity("12Qi").is_err());
        assert!(parse_quantity("abc").is_err());
    }

    #[test]
    fn test_size_limit_validated() {
        let mf = VolumeManifest {
            name: "scratch".to_string(),
            labels: Labels::new(),
            spec: VolumeSpec {
                volume_type: VolumeType::EmptyDir,
                host_path: None,
                empty_dir: Some(EmptyDirSpec {
                    medium: None,
                    size_limit: Some("64Zi".to_string()),
                }),
                volume: None,
                security_context: None,
            },
        };
        let err = mf.validate().unwrap_err();
        assert_eq!(err.locator(), Some("spec.emptyDir.sizeLimit"));
    }

    #[test]
    fn test_volume_type_spelling() {
        let spec: VolumeSpec = serde_yaml::from_str("type: emptyDir\nemptyDir: {}\n").unwrap();
        assert_eq!(spec.volume_type, VolumeType::EmptyDir);
        assert!(spec.empty_dir.is_some());
    }
}
