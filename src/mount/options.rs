//! Mount option compilation.

use crate::manifest::{VolumeManifest, VolumeMount, VolumeType};

use super::selinux::select_se_linux_label;

/// Compile the ordered, deduplicated option list for one volume mount.
///
/// Order: the mount type keyword (`bind` for host-backed variants), the
/// access mode, the SELinux label when enforcement is active, then any
/// extra options from the permission subsystem that are not already
/// present.
pub fn compile_mount_options(
    volume: &VolumeManifest,
    mount: &VolumeMount,
    shared: bool,
    selinux_enforcing: bool,
    extra: &[String],
) -> Vec<String> {
    let mut options: Vec<String> = Vec::new();
    let mut push = |option: String| {
        if !options.contains(&option) {
            options.push(option);
        }
    };

    match volume.spec.volume_type {
        VolumeType::HostPath | VolumeType::EmptyDir => push("bind".to_string()),
        VolumeType::Named => {}
    }

    push(if mount.read_only { "ro" } else { "rw" }.to_string());

    if selinux_enforcing {
        push(select_se_linux_label(mount, volume, shared).to_string());
    }

    for option in extra {
        push(option.clone());
    }

    options
}
