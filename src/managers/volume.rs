//! Volume resource driver.
//!
//! Only named volumes have an engine counterpart. `emptyDir` volumes
//! materialise as per-chart scratch directories and `hostPath` volumes as
//! their declared paths, so live state for those variants is observed on
//! the filesystem rather than through the engine.

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::engine::{ListFilters, VolumeConfig, VolumeRecord};
use crate::error::{Error, Result};
use crate::manifest::{
    EmptyDirSpec, HostPathType, NamedVolumeSpec, Resource, ResourceKind, VolumeManifest,
    VolumeMount, VolumeSpec, VolumeType,
};
use crate::mount::ResolvedMount;

use super::{OpContext, ResourceManager};

/// Driver for `CuteVolume` resources
pub struct VolumeManager;

fn config_from_manifest(manifest: &VolumeManifest) -> VolumeConfig {
    let named = manifest.spec.volume.clone().unwrap_or_default();
    VolumeConfig {
        name: manifest.name.clone(),
        driver: named.driver,
        options: named.options,
        labels: manifest.labels.clone(),
    }
}

fn manifest_from_record(record: &VolumeRecord) -> VolumeManifest {
    VolumeManifest {
        name: record.name.clone(),
        labels: record.labels.clone(),
        spec: VolumeSpec {
            volume_type: VolumeType::Named,
            host_path: None,
            empty_dir: None,
            volume: Some(NamedVolumeSpec {
                driver: Some(record.driver.clone()),
                options: record.options.clone(),
            }),
            security_context: None,
        },
    }
}

/// A synthetic mount used to resolve a volume's base path
fn base_mount(volume: &VolumeManifest) -> VolumeMount {
    VolumeMount {
        name: volume.name.clone(),
        mount_path: "/".to_string(),
        sub_path: None,
        read_only: false,
        mount_options: None,
    }
}

fn normalised_driver(driver: Option<&str>) -> &str {
    match driver {
        None | Some("") => "local",
        Some(other) => other,
    }
}

/// Field-level differences; only the active variant's fields count
fn field_differences(desired: &VolumeSpec, actual: &VolumeSpec) -> Vec<String> {
    let mut reasons = Vec::new();
    if desired.volume_type != actual.volume_type {
        reasons.push("type".to_string());
        return reasons;
    }
    match desired.volume_type {
        VolumeType::HostPath => {
            if desired.host_path != actual.host_path {
                reasons.push("hostPath".to_string());
            }
        }
        VolumeType::EmptyDir => {
            if desired.empty_dir != actual.empty_dir {
                reasons.push("emptyDir".to_string());
            }
        }
        VolumeType::Named => {
            let desired_named = desired.volume.clone().unwrap_or_default();
            let actual_named = actual.volume.clone().unwrap_or_default();
            if normalised_driver(desired_named.driver.as_deref())
                != normalised_driver(actual_named.driver.as_deref())
            {
                reasons.push("driver".to_string());
            }
            if desired_named.options != actual_named.options {
                reasons.push("options".to_string());
            }
        }
    }
    if desired.security_context != actual.security_context {
        reasons.push("securityContext".to_string());
    }
    reasons
}

#[async_trait]
impl ResourceManager for VolumeManager {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Volume
    }

    /// Live volumes: engine-native volumes carrying the chart label, plus
    /// materialised scratch directories, plus desired hostPath volumes
    /// whose path already exists.
    async fn actual_from_engine(&self, ctx: &OpContext<'_>) -> Result<Vec<Resource>> {
        let filters = ListFilters::chart(&ctx.chart.name);
        let mut resources: Vec<Resource> = ctx
            .engine
            .list_volumes(&filters)
            .await?
            .iter()
            .map(|record| Resource::Volume(manifest_from_record(record)))
            .collect();

        // Scratch directories observed on disk
        let scratch_root = ctx.mounts.scratch_root();
        let mut seen_dirs = Vec::new();
        match tokio::fs::read_dir(&scratch_root).await {
            Ok(mut entries) => {
                while let Some(entry) = entries.next_entry().await? {
                    if entry.file_type().await?.is_dir() {
                        if let Some(name) = entry.file_name().to_str() {
                            seen_dirs.push(name.to_string());
                        }
                    }
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        for name in seen_dirs {
            let manifest = match ctx
                .registry
                .get(&crate::manifest::ResourceKey::new(
                    ResourceKind::Volume,
                    &name,
                ))
            {
                // The directory realises this desired volume
                Some(Resource::Volume(desired))
                    if desired.spec.volume_type == VolumeType::EmptyDir =>
                {
                    desired.clone()
                }
                // Stale scratch directory from an earlier chart revision
                _ => VolumeManifest {
                    name: name.clone(),
                    labels: ctx.chart.standard_labels(),
                    spec: VolumeSpec {
                        volume_type: VolumeType::EmptyDir,
                        host_path: None,
                        empty_dir: Some(EmptyDirSpec::default()),
                        volume: None,
                        security_context: None,
                    },
                },
            };
            resources.push(Resource::Volume(manifest));
        }

        // Desired hostPath volumes count as live when their path exists
        for resource in ctx.registry.get_by_kind(ResourceKind::Volume) {
            let Resource::Volume(volume) = resource else {
                continue;
            };
            if volume.spec.volume_type != VolumeType::HostPath {
                continue;
            }
            if let Some(host_path) = &volume.spec.host_path {
                if tokio::fs::try_exists(&host_path.path).await? {
                    resources.push(Resource::Volume(volume.clone()));
                }
            }
        }

        Ok(resources)
    }

    async fn create(&self, ctx: &OpContext<'_>, resource: &Resource) -> Result<()> {
        let Resource::Volume(manifest) = resource else {
            return Err(Error::configuration("volume manager got a non-volume"));
        };
        match manifest.spec.volume_type {
            VolumeType::Named => {
                ctx.engine
                    .create_volume(&config_from_manifest(manifest))
                    .await?;
                Ok(())
            }
            VolumeType::EmptyDir | VolumeType::HostPath => {
                let resolved = ctx.mounts.resolve(manifest, &base_mount(manifest)).await?;
                let ResolvedMount::Bind(info) = resolved else {
                    return Err(Error::configuration(format!(
                        "volume {} resolved to a named mount",
                        manifest.name
                    )));
                };
                if info.requires_creation {
                    // Creation is gated on the declared path type for
                    // host paths; scratch directories always materialise
                    let creatable = manifest.spec.volume_type == VolumeType::EmptyDir
                        || matches!(
                            info.path_type,
                            None | Some(
                                HostPathType::DirectoryOrCreate | HostPathType::FileOrCreate
                            )
                        );
                    if !creatable {
                        return Err(Error::validation(
                            format!("Volume/{}", manifest.name),
                            format!(
                                "hostPath '{}' does not exist and its type forbids creation",
                                info.source_path.display()
                            ),
                        ));
                    }
                    let owner = manifest
                        .spec
                        .security_context
                        .as_ref()
                        .and_then(|sc| sc.owner.as_ref());
                    let mapping = if crate::mount::userns::is_rootless() && owner.is_some() {
                        Some(crate::mount::UserNsMapping::load()?)
                    } else {
                        None
                    };
                    ctx.mounts.ensure(&info, owner, mapping.as_ref()).await?;
                }
                debug!(volume = %manifest.name, path = %info.source_path.display(), "volume materialised");
                Ok(())
            }
        }
    }

    async fn delete(&self, ctx: &OpContext<'_>, resource: &Resource) -> Result<()> {
        let Resource::Volume(manifest) = resource else {
            return Err(Error::configuration("volume manager got a non-volume"));
        };
        match manifest.spec.volume_type {
            VolumeType::Named => ctx.engine.remove_volume(&manifest.name).await,
            VolumeType::EmptyDir => {
                let path = ctx.mounts.scratch_dir(&manifest.name);
                match tokio::fs::remove_dir_all(&path).await {
                    Ok(()) => Ok(()),
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                    Err(err) => Err(err.into()),
                }
            }
            VolumeType::HostPath => {
                // Host paths are user data; never reclaim them
                warn!(volume = %manifest.name, "skipping deletion of hostPath volume contents");
                Ok(())
            }
        }
    }

    fn equivalent(&self, desired: &Resource, actual: &Resource) -> Result<bool> {
        let (Resource::Volume(desired), Resource::Volume(actual)) = (desired, actual) else {
            return Err(Error::comparison(
                desired.key().to_string(),
                "mismatched kinds in volume comparison",
            ));
        };
        Ok(field_differences(&desired.spec, &actual.spec).is_empty())
    }

    fn update_reasons(&self, desired: &Resource, actual: &Resource) -> Vec<String> {
        match (desired, actual) {
            (Resource::Volume(desired), Resource::Volume(actual)) => {
                field_differences(&desired.spec, &actual.spec)
            }
            _ => Vec::new(),
        }
    }
}
