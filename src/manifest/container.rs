//! Container manifest record.
//!
//! `CuteContainer` declares a single container workload: image, process
//! arguments, environment, ports, volume mounts, networks, secret
//! attachments, security context, restart policy and health checking.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::manifest::{Labels, ResourceKey, ResourceKind};

/// A parsed `CuteContainer` document
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerManifest {
    /// Resource name (engine container name)
    pub name: String,
    /// User labels from `metadata.labels`
    pub labels: Labels,
    /// The declarative container spec
    pub spec: ContainerSpec,
}

/// `spec` of a `CuteContainer`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerSpec {
    /// Image reference to run
    pub image: String,
    /// Entrypoint override
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    /// Arguments passed to the entrypoint
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    /// Environment variables
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<EnvVar>,
    /// Working directory inside the container
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,
    /// UID to run as
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<u32>,
    /// GID to run as
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid: Option<u32>,
    /// Published ports
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub ports: Vec<PortSpec>,
    /// Volume mounts, referencing `CuteVolume` resources by name
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub volumes: Vec<VolumeMount>,
    /// Networks to attach, referencing `CuteNetwork` resources by name
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub networks: Vec<String>,
    /// Secret attachments, referencing `CuteSecret` resources by name
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secrets: Vec<SecretRef>,
    /// Privileges and capability adjustments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_context: Option<SecurityContext>,
    /// Engine restart policy (engine or Kubernetes spelling)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub restart_policy: Option<RestartPolicy>,
    /// Liveness probe
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub health_check: Option<HealthCheck>,
    /// Pod this container belongs to, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pod: Option<String>,
}

/// A single `name=value` environment entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvVar {
    /// Variable name
    pub name: String,
    /// Variable value
    pub value: String,
}

/// Layer-4 protocol of a published port
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Protocol {
    /// TCP (default)
    #[default]
    #[serde(rename = "TCP")]
    Tcp,
    /// UDP
    #[serde(rename = "UDP")]
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "tcp"),
            Self::Udp => write!(f, "udp"),
        }
    }
}

/// A container port, optionally published on the host
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PortSpec {
    /// Port inside the container (1..=65535)
    pub container_port: u16,
    /// Host port to publish on; dynamic when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port: Option<u16>,
    /// Protocol, TCP when absent
    #[serde(default)]
    pub protocol: Protocol,
}

/// SELinux relabel / propagation choice on a mount
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SeLinuxLabel {
    /// Shared relabel (`z`)
    #[serde(rename = "z")]
    SharedRelabel,
    /// Private relabel (`Z`)
    #[serde(rename = "Z")]
    PrivateRelabel,
    /// Shared propagation
    #[serde(rename = "shared")]
    Shared,
    /// Private propagation
    #[serde(rename = "private")]
    Private,
}

impl SeLinuxLabel {
    /// The literal mount option this label compiles to
    pub fn option_str(self) -> &'static str {
        match self {
            Self::SharedRelabel => "z",
            Self::PrivateRelabel => "Z",
            Self::Shared => "shared",
            Self::Private => "private",
        }
    }
}

/// Extra per-mount options influencing labelling and ownership mapping
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MountOptions {
    /// Explicit SELinux label, overriding volume and sharing defaults
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub se_linux_label: Option<SeLinuxLabel>,
    /// Container UID whose host mapping owns the mount source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid_mapping: Option<u32>,
    /// Container GID whose host mapping owns the mount source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gid_mapping: Option<u32>,
}

/// A mount of a `CuteVolume` into the container filesystem
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VolumeMount {
    /// Name of the referenced `CuteVolume`
    pub name: String,
    /// Absolute mount point inside the container (`containerPath` is a
    /// legacy alias)
    #[serde(alias = "containerPath")]
    pub mount_path: String,
    /// Relative selector into the volume
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_path: Option<String>,
    /// Mount read-only
    #[serde(default)]
    pub read_only: bool,
    /// Label and ownership-mapping options
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mount_options: Option<MountOptions>,
}

/// Linux capability adjustments
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Capabilities to add
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub add: Vec<String>,
    /// Capabilities to drop
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub drop: Vec<String>,
}

/// Privilege settings for the container
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityContext {
    /// Run the container privileged
    #[serde(default)]
    pub privileged: bool,
    /// Capability adjustments
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capabilities: Option<Capabilities>,
}

/// Restart policy, accepting both engine and Kubernetes spellings.
///
/// Equivalence between desired and live state compares the normalised
/// engine value, so `Always` and `always` are the same policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RestartPolicy {
    /// Never restart
    #[serde(rename = "no")]
    No,
    /// Restart on non-zero exit
    #[serde(rename = "on-failure")]
    OnFailure,
    /// Always restart
    #[serde(rename = "always")]
    Always,
    /// Restart unless explicitly stopped
    #[serde(rename = "unless-stopped")]
    UnlessStopped,
    /// Kubernetes spelling of `always`
    #[serde(rename = "Always")]
    KubeAlways,
    /// Kubernetes spelling of `on-failure`
    #[serde(rename = "OnFailure")]
    KubeOnFailure,
    /// Kubernetes spelling of `no`
    #[serde(rename = "Never")]
    KubeNever,
}

impl RestartPolicy {
    /// The engine spelling this policy normalises to
    pub fn engine_value(self) -> &'static str {
        match self {
            Self::No | Self::KubeNever => "no",
            Self::OnFailure | Self::KubeOnFailure => "on-failure",
            Self::Always | Self::KubeAlways => "always",
            Self::UnlessStopped => "unless-stopped",
        }
    }
}

/// The probe half of a health check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HealthProbe {
    /// Run a command inside the container
    Exec {
        /// Command and arguments to run
        command: Vec<String>,
    },
    /// Probe an HTTP endpoint served by the container
    #[serde(rename_all = "camelCase")]
    Http {
        /// Port to probe
        port: u16,
        /// Request path, `/` when absent
        #[serde(default = "default_http_path")]
        path: String,
        /// `http` or `https`, `http` when absent
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scheme: Option<String>,
    },
}

fn default_http_path() -> String {
    "/".to_string()
}

/// Container liveness check
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthCheck {
    /// The probe to run
    #[serde(flatten)]
    pub probe: HealthProbe,
    /// Seconds between probes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval_seconds: Option<u32>,
    /// Per-probe timeout in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_seconds: Option<u32>,
    /// Consecutive failures before the container is unhealthy
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    /// Grace period after start before probes count
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_period_seconds: Option<u32>,
}

impl ContainerManifest {
    fn resource(&self) -> String {
        format!("Container/{}", self.name)
    }

    /// Derived dependencies: networks, volumes, secrets, and the pod if any
    pub fn dependencies(&self) -> Vec<ResourceKey> {
        let mut deps = Vec::new();
        for network in &self.spec.networks {
            deps.push(ResourceKey::new(ResourceKind::Network, network.as_str()));
        }
        for mount in &self.spec.volumes {
            deps.push(ResourceKey::new(ResourceKind::Volume, mount.name.as_str()));
        }
        for secret in &self.spec.secrets {
            deps.push(ResourceKey::new(ResourceKind::Secret, secret.name.as_str()));
        }
        if let Some(pod) = &self.spec.pod {
            deps.push(ResourceKey::new(ResourceKind::Pod, pod.as_str()));
        }
        deps.sort();
        deps.dedup();
        deps
    }

    /// Validate the container spec
    pub fn validate(&self) -> Result<()> {
        if self.spec.image.is_empty() {
            return Err(Error::validation_at(
                self.resource(),
                "spec.image",
                "image must not be empty",
            ));
        }

        let mut env_names = BTreeSet::new();
        for (i, var) in self.spec.env.iter().enumerate() {
            if var.name.is_empty() {
                return Err(Error::validation_at(
                    self.resource(),
                    format!("spec.env[{i}].name"),
                    "environment variable name must not be empty",
                ));
            }
            if !env_names.insert(&var.name) {
                return Err(Error::validation_at(
                    self.resource(),
                    format!("spec.env[{i}].name"),
                    format!("duplicate environment variable '{}'", var.name),
                ));
            }
        }

        for (i, port) in self.spec.ports.iter().enumerate() {
            if port.container_port == 0 {
                return Err(Error::validation_at(
                    self.resource(),
                    format!("spec.ports[{i}].containerPort"),
                    "containerPort must be in 1..=65535",
                ));
            }
            if port.host_port == Some(0) {
                return Err(Error::validation_at(
                    self.resource(),
                    format!("spec.ports[{i}].hostPort"),
                    "hostPort must be in 1..=65535",
                ));
            }
        }

        let mut mount_paths = BTreeSet::new();
        for (i, mount) in self.spec.volumes.iter().enumerate() {
            if mount.name.is_empty() {
                return Err(Error::validation_at(
                    self.resource(),
                    format!("spec.volumes[{i}].name"),
                    "volume reference must not be empty",
                ));
            }
            if !mount.mount_path.starts_with('/') {
                return Err(Error::validation_at(
                    self.resource(),
                    format!("spec.volumes[{i}].mountPath"),
                    format!("mountPath '{}' must be absolute", mount.mount_path),
                ));
            }
            if !mount_paths.insert(&mount.mount_path) {
                return Err(Error::validation_at(
                    self.resource(),
                    format!("spec.volumes[{i}].mountPath"),
                    format!("duplicate mountPath '{}'", mount.mount_path),
                ));
            }
            if let Some(sub_path) = &mount.sub_path {
                crate::mount::validate_sub_path(sub_path).map_err(|err| {
                    Error::validation_at(
                        self.resource(),
                        format!("spec.volumes[{i}].subPath"),
                        err.to_string(),
                    )
                })?;
            }
        }

        for (i, secret) in self.spec.secrets.iter().enumerate() {
            if secret.name.is_empty() {
                return Err(Error::validation_at(
                    self.resource(),
                    format!("spec.secrets[{i}].name"),
                    "secret reference must not be empty",
                ));
            }
        }

        if let Some(HealthCheck {
            probe: HealthProbe::Exec { command },
            ..
        }) = &self.spec.health_check
        {
            if command.is_empty() {
                return Err(Error::validation_at(
                    self.resource(),
                    "spec.healthCheck.command",
                    "exec health check requires a command",
                ));
            }
        }

        Ok(())
    }
}

/// A secret attachment: env-var injection or a mounted file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretRef {
    /// Name of the referenced `CuteSecret`
    pub name: String,
    /// Expose the secret's keys as environment variables
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub as_env: Option<bool>,
    /// Mount the secret at this path instead
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal(name: &str, image: &str) -> ContainerManifest {
        ContainerManifest {
            name: name.to_string(),
            labels: Labels::new(),
            spec: ContainerSpec {
                image: image.to_string(),
                command: Vec::new(),
                args: Vec::new(),
                env: Vec::new(),
                working_dir: None,
                uid: None,
                gid: None,
                ports: Vec::new(),
                volumes: Vec::new(),
                networks: Vec::new(),
                secrets: Vec::new(),
                security_context: None,
                restart_policy: None,
                health_check: None,
                pod: None,
            },
        }
    }

    #[test]
    fn test_minimal_container_is_valid() {
        assert!(minimal("web", "nginx:latest").validate().is_ok());
    }

    #[test]
    fn test_empty_image_rejected() {
        let err = minimal("web", "").validate().unwrap_err();
        assert_eq!(err.locator(), Some("spec.image"));
    }

    #[test]
    fn test_duplicate_env_rejected() {
        let mut mf = minimal("web", "nginx:latest");
        mf.spec.env = vec![
            EnvVar {
                name: "PORT".to_string(),
                value: "80".to_string(),
            },
            EnvVar {
                name: "PORT".to_string(),
                value: "8080".to_string(),
            },
        ];
        let err = mf.validate().unwrap_err();
        assert!(err.to_string().contains("duplicate environment variable"));
    }

    #[test]
    fn test_relative_mount_path_rejected() {
        let mut mf = minimal("web", "nginx:latest");
        mf.spec.volumes = vec![VolumeMount {
            name: "data".to_string(),
            mount_path: "var/www".to_string(),
            sub_path: None,
            read_only: false,
            mount_options: None,
        }];
        let err = mf.validate().unwrap_err();
        assert_eq!(err.locator(), Some("spec.volumes[0].mountPath"));
    }

    #[test]
    fn test_sub_path_traversal_rejected() {
        let mut mf = minimal("web", "nginx:latest");
        mf.spec.volumes = vec![VolumeMount {
            name: "data".to_string(),
            mount_path: "/var/www".to_string(),
            sub_path: Some("../../etc/passwd".to_string()),
            read_only: false,
            mount_options: None,
        }];
        let err = mf.validate().unwrap_err();
        assert!(err.to_string().contains(".."));
        assert_eq!(err.locator(), Some("spec.volumes[0].subPath"));
    }

    #[test]
    fn test_dependencies_cover_references() {
        let mut mf = minimal("web", "nginx:latest");
        mf.spec.networks = vec!["web-network".to_string()];
        mf.spec.volumes = vec![VolumeMount {
            name: "web-data".to_string(),
            mount_path: "/data".to_string(),
            sub_path: None,
            read_only: false,
            mount_options: None,
        }];
        mf.spec.secrets = vec![SecretRef {
            name: "api-key".to_string(),
            as_env: Some(true),
            path: None,
        }];
        let deps = mf.dependencies();
        assert!(deps.contains(&ResourceKey::new(ResourceKind::Network, "web-network")));
        assert!(deps.contains(&ResourceKey::new(ResourceKind::Volume, "web-data")));
        assert!(deps.contains(&ResourceKey::new(ResourceKind::Secret, "api-key")));
        assert_eq!(deps.len(), 3);
    }

    #[test]
    fn test_restart_policy_normalisation() {
        assert_eq!(RestartPolicy::KubeAlways.engine_value(), "always");
        assert_eq!(RestartPolicy::KubeNever.engine_value(), "no");
        assert_eq!(RestartPolicy::KubeOnFailure.engine_value(), "on-failure");
        assert_eq!(RestartPolicy::UnlessStopped.engine_value(), "unless-stopped");
    }

    #[test]
    fn test_container_path_alias() {
        let yaml = r"
name: data
containerPath: /usr/share/nginx/html
";
        let mount: VolumeMount = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(mount.mount_path, "/usr/share/nginx/html");
    }

    #[test]
    fn test_health_check_tagged_decode() {
        let yaml = r"
type: http
port: 8080
intervalSeconds: 10
";
        let check: HealthCheck = serde_yaml::from_str(yaml).unwrap();
        match check.probe {
            HealthProbe::Http { port, ref path, .. } => {
                assert_eq!(port, 8080);
                assert_eq!(path, "/");
            }
            HealthProbe::Exec { .. } => panic!("wrong probe type"),
        }
        assert_eq!(check.interval_seconds, Some(10));
    }
}
