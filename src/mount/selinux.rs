//! SELinux label selection for volume mounts.

use std::path::Path;

use crate::manifest::{SeLinuxLevel, VolumeManifest, VolumeMount};

/// Kernel switch reporting whether SELinux enforcement is active
pub const ENFORCE_PATH: &str = "/sys/fs/selinux/enforce";

/// Whether SELinux is detected enabled on this host
pub fn is_enforcing() -> bool {
    enforcing_at(Path::new(ENFORCE_PATH))
}

fn enforcing_at(path: &Path) -> bool {
    std::fs::read_to_string(path)
        .map(|content| content.trim() == "1")
        .unwrap_or(false)
}

/// Pick the SELinux mount label for a `(volume, mount)` pair.
///
/// Precedence: the mount's explicit label (used verbatim), then the
/// volume's declared sharing level, then a default derived from whether
/// the volume is referenced by more than one container.
///
/// The returned label only applies when SELinux is enforcing.
pub fn select_se_linux_label(
    mount: &VolumeMount,
    volume: &VolumeManifest,
    shared: bool,
) -> &'static str {
    if let Some(label) = mount
        .mount_options
        .as_ref()
        .and_then(|options| options.se_linux_label)
    {
        return label.option_str();
    }
    if let Some(level) = volume
        .spec
        .security_context
        .as_ref()
        .and_then(|ctx| ctx.se_linux_options.as_ref())
        .map(|options| options.level)
    {
        return match level {
            SeLinuxLevel::Shared => "z",
            SeLinuxLevel::Private => "Z",
        };
    }
    if shared {
        "z"
    } else {
        "Z"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::{
        EmptyDirSpec, Labels, MountOptions, SeLinuxLabel, SeLinuxOptions, VolumeSecurityContext,
        VolumeSpec, VolumeType,
    };

    fn volume(level: Option<SeLinuxLevel>) -> VolumeManifest {
        VolumeManifest {
            name: "data".to_string(),
            labels: Labels::new(),
            spec: VolumeSpec {
                volume_type: VolumeType::EmptyDir,
                host_path: None,
                empty_dir: Some(EmptyDirSpec::default()),
                volume: None,
                security_context: level.map(|level| VolumeSecurityContext {
                    se_linux_options: Some(SeLinuxOptions { level }),
                    owner: None,
                }),
            },
        }
    }

    fn mount(label: Option<SeLinuxLabel>) -> VolumeMount {
        VolumeMount {
            name: "data".to_string(),
            mount_path: "/data".to_string(),
            sub_path: None,
            read_only: false,
            mount_options: label.map(|label| MountOptions {
                se_linux_label: Some(label),
                uid_mapping: None,
                gid_mapping: None,
            }),
        }
    }

    #[test]
    fn test_explicit_label_wins_verbatim() {
        let volume = volume(Some(SeLinuxLevel::Shared));
        assert_eq!(
            select_se_linux_label(&mount(Some(SeLinuxLabel::Private)), &volume, true),
            "private"
        );
        assert_eq!(
            select_se_linux_label(&mount(Some(SeLinuxLabel::PrivateRelabel)), &volume, true),
            "Z"
        );
    }

    #[test]
    fn test_volume_level_maps_to_relabel() {
        assert_eq!(
            select_se_linux_label(&mount(None), &volume(Some(SeLinuxLevel::Shared)), false),
            "z"
        );
        assert_eq!(
            select_se_linux_label(&mount(None), &volume(Some(SeLinuxLevel::Private)), true),
            "Z"
        );
    }

    #[test]
    fn test_default_follows_sharing() {
        assert_eq!(select_se_linux_label(&mount(None), &volume(None), true), "z");
        assert_eq!(select_se_linux_label(&mount(None), &volume(None), false), "Z");
    }

    #[test]
    fn test_enforcing_detection() {
        let dir = tempfile::tempdir().unwrap();
        let enforce = dir.path().join("enforce");

        assert!(!enforcing_at(&enforce));
        std::fs::write(&enforce, "1\n").unwrap();
        assert!(enforcing_at(&enforce));
        std::fs::write(&enforce, "0\n").unwrap();
        assert!(!enforcing_at(&enforce));
    }
}
