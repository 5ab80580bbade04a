//! Container resource driver.
//!
//! Compiles a `CuteContainer` manifest into an engine container config
//! (resolving volume mounts through the path subsystem), reconstructs
//! manifests from live engine records, and drives create/replace/delete.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::engine::{
    ContainerConfig, ContainerRecord, HealthConfig, MountSpec, PortBinding, SecretAttachment,
};
use crate::error::{Error, Result};
use crate::manifest::{
    ContainerManifest, ContainerSpec, EnvVar, HealthProbe, PortSpec, Protocol, Resource,
    ResourceKey, ResourceKind, SecretRef, VolumeMount,
};
use crate::mount::{self, ResolvedMount, UserNsMapping};

use super::{OpContext, ResourceManager};

/// Graceful stop window given to a container before removal
const STOP_TIMEOUT: Duration = Duration::from_secs(15);

/// Overall deadline for the stop-then-remove sequence
const DELETE_DEADLINE: Duration = Duration::from_secs(20);

/// Driver for `CuteContainer` resources
pub struct ContainerManager;

impl ContainerManager {
    /// Compile a manifest into the engine config, resolving and
    /// materialising volume mounts on the way.
    async fn compile(
        &self,
        ctx: &OpContext<'_>,
        manifest: &ContainerManifest,
    ) -> Result<ContainerConfig> {
        let spec = &manifest.spec;
        let selinux_enforcing = mount::selinux::is_enforcing();
        let rootless = mount::userns::is_rootless();

        let mut mounts = Vec::with_capacity(spec.volumes.len());
        for volume_mount in &spec.volumes {
            mounts.push(
                self.compile_mount(ctx, manifest, volume_mount, selinux_enforcing, rootless)
                    .await?,
            );
        }

        let env = spec
            .env
            .iter()
            .map(|var| (var.name.clone(), var.value.clone()))
            .collect();
        let user = match (spec.uid, spec.gid) {
            (Some(uid), Some(gid)) => Some(format!("{uid}:{gid}")),
            (Some(uid), None) => Some(uid.to_string()),
            (None, Some(gid)) => Some(format!("0:{gid}")),
            (None, None) => None,
        };
        let ports = spec
            .ports
            .iter()
            .map(|port| PortBinding {
                container_port: port.container_port,
                host_port: port.host_port,
                protocol: port.protocol.to_string(),
            })
            .collect();
        let secrets = spec
            .secrets
            .iter()
            .map(|secret| SecretAttachment {
                name: secret.name.clone(),
                as_env: secret.as_env.unwrap_or(false),
                target: secret.path.clone(),
            })
            .collect();
        let (privileged, cap_add, cap_drop) = match &spec.security_context {
            Some(security) => (
                security.privileged,
                security
                    .capabilities
                    .as_ref()
                    .map(|caps| caps.add.clone())
                    .unwrap_or_default(),
                security
                    .capabilities
                    .as_ref()
                    .map(|caps| caps.drop.clone())
                    .unwrap_or_default(),
            ),
            None => (false, Vec::new(), Vec::new()),
        };

        Ok(ContainerConfig {
            name: manifest.name.clone(),
            image: spec.image.clone(),
            command: spec.command.clone(),
            args: spec.args.clone(),
            env,
            working_dir: spec.working_dir.clone(),
            user,
            ports,
            mounts,
            networks: spec.networks.clone(),
            secrets,
            privileged,
            cap_add,
            cap_drop,
            restart_policy: spec.restart_policy.map(|p| p.engine_value().to_string()),
            health: spec.health_check.as_ref().map(health_config),
            labels: manifest.labels.clone(),
        })
    }

    async fn compile_mount(
        &self,
        ctx: &OpContext<'_>,
        manifest: &ContainerManifest,
        volume_mount: &VolumeMount,
        selinux_enforcing: bool,
        rootless: bool,
    ) -> Result<MountSpec> {
        let key = ResourceKey::new(ResourceKind::Volume, volume_mount.name.as_str());
        let Some(Resource::Volume(volume)) = ctx.registry.get(&key) else {
            return Err(Error::dependency(format!(
                "Container/{} mounts {key}, which is not declared in the chart",
                manifest.name
            )));
        };

        let shared = ctx.shared_volumes.contains(&volume.name);
        let extra = permission_options(volume_mount);
        let options = mount::compile_mount_options(
            volume,
            volume_mount,
            shared,
            selinux_enforcing,
            &extra,
        );

        let resolved = ctx.mounts.resolve(volume, volume_mount).await?;
        let (source, named) = match resolved {
            ResolvedMount::Named(name) => (name, true),
            ResolvedMount::Bind(info) => {
                if info.requires_creation || volume_owner(volume).is_some() {
                    let mapping = load_mapping(rootless, volume)?;
                    ctx.mounts
                        .ensure(&info, volume_owner(volume), mapping.as_ref())
                        .await?;
                }
                (info.source_path.display().to_string(), false)
            }
        };

        Ok(MountSpec {
            source,
            target: volume_mount.mount_path.clone(),
            read_only: volume_mount.read_only,
            options,
            named,
            volume_name: Some(volume_mount.name.clone()),
            sub_path: volume_mount.sub_path.clone(),
            declared_options: volume_mount.mount_options.clone(),
        })
    }
}

/// Options contributed by the permission subsystem for a mount
fn permission_options(volume_mount: &VolumeMount) -> Vec<String> {
    let Some(options) = &volume_mount.mount_options else {
        return Vec::new();
    };
    let mut extra = Vec::new();
    if let Some(uid) = options.uid_mapping {
        extra.push(format!("uid={uid}"));
    }
    if let Some(gid) = options.gid_mapping {
        extra.push(format!("gid={gid}"));
    }
    extra
}

fn volume_owner(volume: &crate::manifest::VolumeManifest) -> Option<&crate::manifest::Owner> {
    volume
        .spec
        .security_context
        .as_ref()
        .and_then(|ctx| ctx.owner.as_ref())
}

/// Load the user-namespace mapping when rootless ownership is requested
fn load_mapping(
    rootless: bool,
    volume: &crate::manifest::VolumeManifest,
) -> Result<Option<UserNsMapping>> {
    if rootless && volume_owner(volume).is_some() {
        Ok(Some(UserNsMapping::load()?))
    } else {
        Ok(None)
    }
}

fn health_config(check: &crate::manifest::HealthCheck) -> HealthConfig {
    let test = match &check.probe {
        HealthProbe::Exec { command } => {
            let mut test = vec!["CMD".to_string()];
            test.extend(command.iter().cloned());
            test
        }
        HealthProbe::Http { port, path, scheme } => {
            let scheme = scheme.as_deref().unwrap_or("http");
            vec![
                "CMD-SHELL".to_string(),
                format!("curl -fsS {scheme}://localhost:{port}{path} || exit 1"),
            ]
        }
    };
    HealthConfig {
        test,
        interval_seconds: check.interval_seconds,
        timeout_seconds: check.timeout_seconds,
        retries: check.retries,
        start_period_seconds: check.start_period_seconds,
    }
}

/// Reconstruct a manifest from a live engine record
fn manifest_from_record(record: &ContainerRecord) -> ContainerManifest {
    let env = record
        .env
        .iter()
        .map(|(name, value)| EnvVar {
            name: name.clone(),
            value: value.clone(),
        })
        .collect();
    let ports = record
        .ports
        .iter()
        .map(|port| PortSpec {
            container_port: port.container_port,
            host_port: port.host_port,
            protocol: if port.protocol.eq_ignore_ascii_case("udp") {
                Protocol::Udp
            } else {
                Protocol::Tcp
            },
        })
        .collect();
    let volumes = record
        .mounts
        .iter()
        .map(|mount| VolumeMount {
            name: mount
                .volume_name
                .clone()
                .unwrap_or_else(|| mount.source.clone()),
            mount_path: mount.target.clone(),
            sub_path: mount.sub_path.clone(),
            read_only: mount.read_only,
            mount_options: mount.declared_options.clone(),
        })
        .collect();
    let secrets = record
        .secrets
        .iter()
        .map(|secret| SecretRef {
            name: secret.name.clone(),
            as_env: Some(secret.as_env),
            path: secret.target.clone(),
        })
        .collect();

    let (uid, gid) = match record.user.as_deref() {
        Some(user) => {
            let (uid, gid) = user.split_once(':').unwrap_or((user, ""));
            (uid.parse().ok(), gid.parse().ok())
        }
        None => (None, None),
    };

    let restart_policy = match record.restart_policy.as_deref() {
        Some("on-failure") => Some(crate::manifest::RestartPolicy::OnFailure),
        Some("always") => Some(crate::manifest::RestartPolicy::Always),
        Some("unless-stopped") => Some(crate::manifest::RestartPolicy::UnlessStopped),
        // "no" and unknown engine values both normalise to the default
        _ => None,
    };

    ContainerManifest {
        name: record.name.clone(),
        labels: record.labels.clone(),
        spec: ContainerSpec {
            image: record.image.clone(),
            command: record.command.clone(),
            args: record.args.clone(),
            env,
            working_dir: record.working_dir.clone(),
            uid,
            gid,
            ports,
            volumes,
            networks: record.networks.clone(),
            secrets,
            security_context: None,
            restart_policy,
            health_check: None,
            pod: None,
        },
    }
}

/// Normalise a restart policy value for comparison
fn normalised_restart(policy: Option<&str>) -> &str {
    match policy {
        None | Some("" | "no") => "no",
        Some(other) => other,
    }
}

/// The comparable shape of a volume mount
fn mount_key(mount: &VolumeMount) -> (String, String, bool, Option<String>, String) {
    (
        mount.mount_path.clone(),
        mount.name.clone(),
        mount.read_only,
        mount.sub_path.clone(),
        mount
            .mount_options
            .as_ref()
            .map(|options| format!("{options:?}"))
            .unwrap_or_default(),
    )
}

fn spec_restart(spec: &ContainerSpec) -> Option<String> {
    spec.restart_policy.map(|p| p.engine_value().to_string())
}

/// Field-level differences between two container manifests
fn field_differences(desired: &ContainerSpec, actual: &ContainerSpec) -> Vec<String> {
    let mut reasons = Vec::new();
    if desired.image != actual.image {
        reasons.push("image".to_string());
    }
    if desired.command != actual.command {
        reasons.push("command".to_string());
    }
    if desired.args != actual.args {
        reasons.push("args".to_string());
    }
    if desired.working_dir != actual.working_dir {
        reasons.push("workingDir".to_string());
    }

    let env_set = |spec: &ContainerSpec| -> BTreeSet<(String, String)> {
        spec.env
            .iter()
            .map(|var| (var.name.clone(), var.value.clone()))
            .collect()
    };
    if env_set(desired) != env_set(actual) {
        reasons.push("env".to_string());
    }

    let port_set = |spec: &ContainerSpec| -> BTreeSet<(u16, Option<u16>, Protocol)> {
        spec.ports
            .iter()
            .map(|port| (port.container_port, port.host_port, port.protocol))
            .collect()
    };
    if port_set(desired) != port_set(actual) {
        reasons.push("ports".to_string());
    }

    let mount_set = |spec: &ContainerSpec| -> BTreeSet<_> {
        spec.volumes.iter().map(mount_key).collect()
    };
    if mount_set(desired) != mount_set(actual) {
        reasons.push("volumes".to_string());
    }

    let network_list = |spec: &ContainerSpec| -> Vec<String> {
        let mut networks = spec.networks.clone();
        networks.sort();
        networks
    };
    if network_list(desired) != network_list(actual) {
        reasons.push("networks".to_string());
    }

    let secret_set = |spec: &ContainerSpec| -> BTreeSet<(String, bool, Option<String>)> {
        spec.secrets
            .iter()
            .map(|secret| {
                (
                    secret.name.clone(),
                    secret.as_env.unwrap_or(false),
                    secret.path.clone(),
                )
            })
            .collect()
    };
    if secret_set(desired) != secret_set(actual) {
        reasons.push("secrets".to_string());
    }

    if normalised_restart(spec_restart(desired).as_deref())
        != normalised_restart(spec_restart(actual).as_deref())
    {
        reasons.push("restartPolicy".to_string());
    }

    reasons
}

#[async_trait]
impl ResourceManager for ContainerManager {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Container
    }

    async fn actual_from_engine(&self, ctx: &OpContext<'_>) -> Result<Vec<Resource>> {
        let filters = crate::engine::ListFilters::chart(&ctx.chart.name);
        let listed = ctx.engine.list_containers(&filters, true).await?;

        let mut resources = Vec::with_capacity(listed.len());
        for entry in listed {
            let record = ctx.engine.inspect_container(&entry.name).await?;
            resources.push(Resource::Container(manifest_from_record(&record)));
        }
        Ok(resources)
    }

    async fn create(&self, ctx: &OpContext<'_>, resource: &Resource) -> Result<()> {
        let Resource::Container(manifest) = resource else {
            return Err(Error::configuration("container manager got a non-container"));
        };
        let config = self.compile(ctx, manifest).await?;

        // Make sure the image is present before creating
        if ctx.engine.get_image(&config.image).await.is_err() {
            debug!(image = %config.image, "image not present locally, pulling");
            ctx.engine.pull_image(&config.image).await?;
        }

        if let Err(err) = ctx.engine.create_container(&config).await {
            if config.mounts.is_empty() {
                return Err(err);
            }
            // Attach a mount diagnosis when the create involved mounts
            let diagnosis = mount::diagnose(
                &err.to_string(),
                mount::selinux::is_enforcing(),
                mount::userns::is_rootless(),
            );
            return Err(Error::engine(
                "container create",
                format!("{err} ({diagnosis})"),
            ));
        }
        ctx.engine.start_container(&manifest.name).await
    }

    async fn delete(&self, ctx: &OpContext<'_>, resource: &Resource) -> Result<()> {
        let name = resource.name().to_string();
        let engine = ctx.engine;
        let sequence = async {
            if let Err(err) = engine.stop_container(&name, STOP_TIMEOUT).await {
                // Stop failures are tolerated; removal is forced below
                warn!(container = %name, "stop before removal failed: {err}");
            }
            engine.remove_container(&name, true).await
        };
        timeout(DELETE_DEADLINE, sequence)
            .await
            .map_err(|_| Error::timeout("container delete", DELETE_DEADLINE.as_secs()))?
    }

    fn equivalent(&self, desired: &Resource, actual: &Resource) -> Result<bool> {
        let (Resource::Container(desired), Resource::Container(actual)) = (desired, actual)
        else {
            return Err(Error::comparison(
                desired.key().to_string(),
                "mismatched kinds in container comparison",
            ));
        };
        Ok(field_differences(&desired.spec, &actual.spec).is_empty())
    }

    fn update_reasons(&self, desired: &Resource, actual: &Resource) -> Vec<String> {
        match (desired, actual) {
            (Resource::Container(desired), Resource::Container(actual)) => {
                field_differences(&desired.spec, &actual.spec)
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::Labels;

    fn manifest(image: &str) -> ContainerManifest {
        ContainerManifest {
            name: "web".to_string(),
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
    fn test_image_change_is_an_update_reason() {
        let desired = manifest("nginx:1.25");
        let actual = manifest("nginx:latest");
        let reasons = field_differences(&desired.spec, &actual.spec);
        assert_eq!(reasons, vec!["image".to_string()]);
    }

    #[test]
    fn test_env_compared_as_set() {
        let mut desired = manifest("nginx:latest");
        desired.spec.env = vec![
            EnvVar {
                name: "A".to_string(),
                value: "1".to_string(),
            },
            EnvVar {
                name: "B".to_string(),
                value: "2".to_string(),
            },
        ];
        let mut actual = manifest("nginx:latest");
        actual.spec.env = vec![
            EnvVar {
                name: "B".to_string(),
                value: "2".to_string(),
            },
            EnvVar {
                name: "A".to_string(),
                value: "1".to_string(),
            },
        ];
        assert!(field_differences(&desired.spec, &actual.spec).is_empty());
    }

    #[test]
    fn test_restart_policy_spelling_equivalence() {
        let mut desired = manifest("nginx:latest");
        desired.spec.restart_policy = Some(crate::manifest::RestartPolicy::KubeNever);
        let actual = manifest("nginx:latest");
        // "Never" normalises to "no", the engine default
        assert!(field_differences(&desired.spec, &actual.spec).is_empty());

        let mut desired = manifest("nginx:latest");
        desired.spec.restart_policy = Some(crate::manifest::RestartPolicy::Always);
        assert_eq!(
            field_differences(&desired.spec, &actual.spec),
            vec!["restartPolicy".to_string()]
        );
    }

    #[test]
    fn test_health_probe_translation() {
        let check = crate::manifest::HealthCheck {
            probe: HealthProbe::Http {
                port: 8080,
                path: "/healthz".to_string(),
                scheme: None,
            },
            interval_seconds: Some(10),
            timeout_seconds: None,
            retries: Some(3),
            start_period_seconds: None,
        };
        let config = health_config(&check);
        assert_eq!(config.test[0], "CMD-SHELL");
        assert!(config.test[1].contains("http://localhost:8080/healthz"));
        assert_eq!(config.retries, Some(3));
    }

    #[test]
    fn test_record_round_trip_preserves_compared_fields() {
        let record = ContainerRecord {
            id: "0".repeat(64),
            name: "web".to_string(),
            image: "nginx:latest".to_string(),
            command: vec!["nginx".to_string()],
            args: vec!["-g".to_string(), "daemon off;".to_string()],
            env: [("A".to_string(), "1".to_string())].into_iter().collect(),
            working_dir: Some("/srv".to_string()),
            user: Some("101:102".to_string()),
            ports: vec![PortBinding {
                container_port: 80,
                host_port: Some(8080),
                protocol: "tcp".to_string(),
            }],
            mounts: vec![MountSpec {
                source: "/tmp/x".to_string(),
                target: "/data".to_string(),
                read_only: true,
                options: vec!["bind".to_string(), "ro".to_string()],
                named: false,
                volume_name: Some("web-data".to_string()),
                sub_path: Some("html".to_string()),
                declared_options: None,
            }],
            networks: vec!["web-network".to_string()],
            secrets: Vec::new(),
            restart_policy: Some("always".to_string()),
            labels: Labels::new(),
            state: crate::engine::ContainerState::Running,
        };
        let manifest = manifest_from_record(&record);
        assert_eq!(manifest.spec.image, "nginx:latest");
        assert_eq!(manifest.spec.uid, Some(101));
        assert_eq!(manifest.spec.gid, Some(102));
        assert_eq!(manifest.spec.volumes[0].name, "web-data");
        assert_eq!(
            manifest.spec.volumes[0].sub_path.as_deref(),
            Some("html")
        );
        assert_eq!(manifest.spec.ports[0].host_port, Some(8080));
    }
}
