//! Volume path and permission subsystem.
//!
//! Resolves a `(volume, mount)` pair into a concrete host-side source with
//! subPath splicing, materialises missing paths, and computes the SELinux
//! label, ownership mapping and mount options a bind mount needs.

use std::collections::BTreeSet;
use std::path::{Component, Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::manifest::{
    HostPathType, Owner, VolumeManifest, VolumeMount, VolumeType,
};
use crate::registry::Registry;

pub mod diagnose;
pub mod options;
pub mod selinux;
pub mod userns;

pub use diagnose::{diagnose, MountDiagnosis, MountFailureKind};
pub use options::compile_mount_options;
pub use selinux::select_se_linux_label;
pub use userns::{IdRange, UserNsMapping};

/// Resolution result for a bind-style mount
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathInfo {
    /// Host path to bind into the container
    pub source_path: PathBuf,
    /// The source is (or will be) a regular file rather than a directory
    pub is_file: bool,
    /// The source does not exist yet and must be created
    pub requires_creation: bool,
    /// The declared host path type, if any
    pub path_type: Option<HostPathType>,
}

/// Where a volume mount resolves to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResolvedMount {
    /// Bind mount from a host path
    Bind(PathInfo),
    /// Engine-native named volume; no host path involved
    Named(String),
}

/// Resolver turning volume declarations into host paths
#[derive(Debug, Clone)]
pub struct MountResolver {
    temp_root: PathBuf,
    allowed_prefixes: Vec<PathBuf>,
}

impl MountResolver {
    /// Create a resolver materialising scratch volumes under `temp_root`
    pub fn new(temp_root: impl Into<PathBuf>) -> Self {
        Self {
            temp_root: temp_root.into(),
            allowed_prefixes: Vec::new(),
        }
    }

    /// Restrict hostPath volumes to the given prefixes.
    ///
    /// An empty list (the default) disables the allow-list.
    #[must_use]
    pub fn with_allowed_prefixes(mut self, prefixes: Vec<PathBuf>) -> Self {
        self.allowed_prefixes = prefixes;
        self
    }

    /// Root under which all `emptyDir` volumes materialise
    pub fn scratch_root(&self) -> PathBuf {
        self.temp_root.join("emptydir")
    }

    /// Scratch directory backing an `emptyDir` volume
    pub fn scratch_dir(&self, volume_name: &str) -> PathBuf {
        self.scratch_root().join(volume_name)
    }

    /// Resolve a `(volume, mount)` pair to its mount source.
    ///
    /// Validates the subPath, dispatches on the volume variant, splices the
    /// subPath under the base, and re-checks that the final path cannot
    /// escape the base prefix.
    pub async fn resolve(
        &self,
        volume: &VolumeManifest,
        mount: &VolumeMount,
    ) -> Result<ResolvedMount> {
        let resource = format!("Volume/{}", volume.name);
        let sub_path = mount.sub_path.as_deref().unwrap_or("");
        if !sub_path.is_empty() {
            validate_sub_path(sub_path)
                .map_err(|msg| Error::validation(resource.clone(), msg))?;
        }

        match volume.spec.volume_type {
            VolumeType::Named => Ok(ResolvedMount::Named(volume.name.clone())),
            VolumeType::EmptyDir => {
                let base = self.scratch_dir(&volume.name);
                let final_path = clean_path(&base.join(sub_path));
                if !final_path.starts_with(&base) {
                    return Err(Error::validation(
                        resource,
                        format!("subPath '{sub_path}' escapes the volume"),
                    ));
                }
                Ok(ResolvedMount::Bind(PathInfo {
                    source_path: final_path,
                    is_file: false,
                    requires_creation: true,
                    path_type: None,
                }))
            }
            VolumeType::HostPath => {
                let host_path = volume.spec.host_path.as_ref().ok_or_else(|| {
                    Error::configuration(format!("{resource} has no hostPath record"))
                })?;
                crate::manifest::volume::validate_host_path(&host_path.path)
                    .map_err(|msg| Error::validation(resource.clone(), msg))?;

                let base = PathBuf::from(&host_path.path);
                if !self.allowed_prefixes.is_empty()
                    && !self.allowed_prefixes.iter().any(|p| base.starts_with(p))
                {
                    return Err(Error::validation(
                        resource,
                        format!(
                            "hostPath '{}' is outside the allowed prefixes",
                            host_path.path
                        ),
                    ));
                }

                let final_path = clean_path(&base.join(sub_path));
                if !final_path.starts_with(&base) {
                    return Err(Error::validation(
                        resource,
                        format!("subPath '{sub_path}' escapes '{}'", host_path.path),
                    ));
                }

                self.host_path_info(&resource, host_path.path_type, sub_path, final_path)
                    .await
                    .map(ResolvedMount::Bind)
            }
        }
    }

    async fn host_path_info(
        &self,
        resource: &str,
        path_type: Option<HostPathType>,
        sub_path: &str,
        final_path: PathBuf,
    ) -> Result<PathInfo> {
        match tokio::fs::symlink_metadata(&final_path).await {
            Ok(metadata) => {
                let file_type = metadata.file_type();
                check_type_consistency(resource, path_type, &final_path, &file_type)?;
                Ok(PathInfo {
                    is_file: !file_type.is_dir(),
                    source_path: final_path,
                    requires_creation: false,
                    path_type,
                })
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                let is_file = match path_type {
                    Some(HostPathType::File | HostPathType::FileOrCreate) => true,
                    Some(HostPathType::Directory) => false,
                    Some(
                        HostPathType::Socket
                        | HostPathType::CharDevice
                        | HostPathType::BlockDevice,
                    ) => {
                        return Err(Error::validation(
                            resource.to_string(),
                            format!(
                                "hostPath '{}' does not exist and sockets and devices cannot be created",
                                final_path.display()
                            ),
                        ));
                    }
                    // DirectoryOrCreate and untyped paths infer from the
                    // subPath's last segment: an extension means a file
                    Some(HostPathType::DirectoryOrCreate) | None => sub_path
                        .rsplit('/')
                        .next()
                        .is_some_and(|segment| segment.contains('.')),
                };
                Ok(PathInfo {
                    source_path: final_path,
                    is_file,
                    requires_creation: true,
                    path_type,
                })
            }
            Err(err) => Err(err.into()),
        }
    }

    /// Materialise a resolved bind source.
    ///
    /// Directories are created with `0755`; files get their parent created
    /// and are touched empty. Ownership from the volume's security context
    /// is applied afterwards, translated through the user-namespace mapping
    /// in rootless mode, where a denied `chown` downgrades to a warning.
    pub async fn ensure(
        &self,
        info: &PathInfo,
        owner: Option<&Owner>,
        mapping: Option<&UserNsMapping>,
    ) -> Result<()> {
        if info.is_file {
            if let Some(parent) = info.source_path.parent() {
                mkdir_all(parent).await?;
            }
            match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&info.source_path)
                .await
            {
                Ok(_) => debug!(path = %info.source_path.display(), "created mount file"),
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {}
                Err(err) => return Err(err.into()),
            }
        } else {
            mkdir_all(&info.source_path).await?;
        }

        if let Some(owner) = owner {
            apply_ownership(&info.source_path, owner, mapping)?;
        }
        Ok(())
    }
}

/// `create_dir_all` with `0755` on the newly created leaf; pre-existing
/// directories keep their mode.
async fn mkdir_all(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    if tokio::fs::try_exists(path).await? {
        return Ok(());
    }
    tokio::fs::create_dir_all(path).await?;
    tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755)).await?;
    Ok(())
}

fn apply_ownership(
    path: &Path,
    owner: &Owner,
    mapping: Option<&UserNsMapping>,
) -> Result<()> {
    let uid = match (owner.user, mapping) {
        (Some(user), Some(mapping)) => Some(mapping.host_uid(user)?),
        (Some(user), None) => Some(user),
        (None, _) => None,
    };
    let gid = match (owner.group, mapping) {
        (Some(group), Some(mapping)) => Some(mapping.host_gid(group)?),
        (Some(group), None) => Some(group),
        (None, _) => None,
    };
    if uid.is_none() && gid.is_none() {
        return Ok(());
    }

    match std::os::unix::fs::chown(path, uid, gid) {
        Ok(()) => Ok(()),
        Err(err) if mapping.is_some() => {
            // Rootless chown onto a mapped ID is allowed to fail
            warn!(
                path = %path.display(),
                uid, gid, "ownership change failed in rootless mode: {err}"
            );
            Ok(())
        }
        Err(err) => Err(err.into()),
    }
}

fn check_type_consistency(
    resource: &str,
    path_type: Option<HostPathType>,
    path: &Path,
    file_type: &std::fs::FileType,
) -> Result<()> {
    use std::os::unix::fs::FileTypeExt;

    let conflict = match path_type {
        None => None,
        Some(HostPathType::Directory | HostPathType::DirectoryOrCreate) => {
            (!file_type.is_dir()).then_some("a directory")
        }
        Some(HostPathType::File | HostPathType::FileOrCreate) => {
            (!file_type.is_file()).then_some("a regular file")
        }
        Some(HostPathType::Socket) => (!file_type.is_socket()).then_some("a socket"),
        Some(HostPathType::CharDevice) => {
            (!file_type.is_char_device()).then_some("a character device")
        }
        Some(HostPathType::BlockDevice) => {
            (!file_type.is_block_device()).then_some("a block device")
        }
    };
    if let Some(expected) = conflict {
        return Err(Error::validation(
            resource.to_string(),
            format!(
                "hostPath '{}' exists but is not {expected} (declared {:?})",
                path.display(),
                path_type.map_or("untyped", |t| match t {
                    HostPathType::Directory => "Directory",
                    HostPathType::DirectoryOrCreate => "DirectoryOrCreate",
                    HostPathType::File => "File",
                    HostPathType::FileOrCreate => "FileOrCreate",
                    HostPathType::Socket => "Socket",
                    HostPathType::CharDevice => "CharDevice",
                    HostPathType::BlockDevice => "BlockDevice",
                })
            ),
        ));
    }
    Ok(())
}

/// Validate a subPath selector.
///
/// Empty is allowed at the call site; a non-empty subPath must be relative,
/// free of `..` traversal, `//`, empty components and control characters.
pub fn validate_sub_path(sub_path: &str) -> std::result::Result<(), String> {
    if sub_path.starts_with('/') {
        return Err(format!("subPath '{sub_path}' must be relative"));
    }
    if sub_path
        .chars()
        .any(|c| c.is_control())
    {
        return Err("subPath contains control characters".to_string());
    }
    for component in sub_path.split('/') {
        if component.is_empty() {
            return Err(format!(
                "subPath '{sub_path}' contains empty path components"
            ));
        }
        if component == ".." {
            return Err(format!("subPath '{sub_path}' must not contain '..'"));
        }
    }
    Ok(())
}

/// Lexically normalise a path: drop `.` components, collapse separators,
/// resolve `..` against preceding components where possible.
pub fn clean_path(path: &Path) -> PathBuf {
    let mut cleaned = PathBuf::new();
    for component in path.components() {
        match component {
            Component::Prefix(_) | Component::RootDir | Component::Normal(_) => {
                cleaned.push(component.as_os_str());
            }
            Component::CurDir => {}
            Component::ParentDir => {
                let popped = matches!(
                    cleaned.components().next_back(),
                    Some(Component::Normal(_))
                ) && cleaned.pop();
                if !popped && !matches!(cleaned.components().next_back(), Some(Component::RootDir))
                {
                    cleaned.push("..");
                }
            }
        }
    }
    if cleaned.as_os_str().is_empty() {
        PathBuf::from(".")
    } else {
        cleaned
    }
}

/// Names of volumes referenced by two or more containers.
///
/// Sharing is a property of the current chart, computed in one pass over
/// the registry's containers.
pub fn shared_volume_names(registry: &Registry) -> BTreeSet<String> {
    let mut counts: std::collections::BTreeMap<&str, usize> = std::collections::BTreeMap::new();
    for resource in registry.get_by_kind(crate::manifest::ResourceKind::Container) {
        if let crate::manifest::Resource::Container(container) = resource {
            let mut seen = BTreeSet::new();
            for mount in &container.spec.volumes {
                if seen.insert(mount.name.as_str()) {
                    *counts.entry(mount.name.as_str()).or_insert(0) += 1;
                }
            }
        }
    }
    counts
        .into_iter()
        .filter(|(_, count)| *count >= 2)
        .map(|(name, _)| name.to_string())
        .collect()
}
