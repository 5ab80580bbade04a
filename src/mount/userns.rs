//! User-namespace ID mapping for rootless mode.
//!
//! Rootless engines map container IDs into a sub-range allocated to the
//! invoking user in `/etc/subuid` and `/etc/subgid`. Ownership changes on
//! materialised volume paths must go through this mapping.

use crate::error::{Error, Result};

const SUBUID_PATH: &str = "/etc/subuid";
const SUBGID_PATH: &str = "/etc/subgid";

/// The process's effective UID
pub fn effective_uid() -> u32 {
    // SAFETY: geteuid has no failure modes and touches no memory
    unsafe { libc::geteuid() }
}

/// Whether the process runs rootless
pub fn is_rootless() -> bool {
    effective_uid() != 0
}

/// A contiguous sub-ID range allocated to a user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdRange {
    /// First host ID of the range
    pub start: u32,
    /// Number of IDs in the range
    pub size: u32,
}

/// Container-to-host ID translation for the current user.
///
/// The effective mapping size is the minimum of the UID and GID range
/// sizes; container IDs at or beyond it do not map.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UserNsMapping {
    uid: IdRange,
    gid: IdRange,
    size: u32,
}

impl UserNsMapping {
    /// Build a mapping from explicit ranges
    pub fn from_ranges(uid: IdRange, gid: IdRange) -> Self {
        Self {
            uid,
            gid,
            size: uid.size.min(gid.size),
        }
    }

    /// Load the mapping for the current user from the host's sub-ID files
    pub fn load() -> Result<Self> {
        let user = std::env::var("USER").ok();
        let uid = effective_uid();

        let subuid = std::fs::read_to_string(SUBUID_PATH)?;
        let uid_range = parse_sub_id_file(&subuid, user.as_deref(), uid).ok_or_else(|| {
            Error::configuration(format!("no subuid range allocated to uid {uid}"))
        })?;

        let subgid = std::fs::read_to_string(SUBGID_PATH)?;
        let gid_range = parse_sub_id_file(&subgid, user.as_deref(), uid).ok_or_else(|| {
            Error::configuration(format!("no subgid range allocated to uid {uid}"))
        })?;

        Ok(Self::from_ranges(uid_range, gid_range))
    }

    /// The effective mapping size
    pub fn size(&self) -> u32 {
        self.size
    }

    /// Translate a container UID to its host UID
    pub fn host_uid(&self, container_uid: u32) -> Result<u32> {
        if container_uid >= self.size {
            return Err(Error::configuration(format!(
                "container uid {container_uid} is outside the mapped range (size {})",
                self.size
            )));
        }
        Ok(self.uid.start + container_uid)
    }

    /// Translate a container GID to its host GID
    pub fn host_gid(&self, container_gid: u32) -> Result<u32> {
        if container_gid >= self.size {
            return Err(Error::configuration(format!(
                "container gid {container_gid} is outside the mapped range (size {})",
                self.size
            )));
        }
        Ok(self.gid.start + container_gid)
    }
}

/// Find the sub-ID range for a user in `name:start:size` file content.
///
/// Entries may be keyed by username or numeric UID.
fn parse_sub_id_file(content: &str, user: Option<&str>, uid: u32) -> Option<IdRange> {
    let uid_key = uid.to_string();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let mut fields = line.split(':');
        let (Some(key), Some(start), Some(size)) =
            (fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        if Some(key) != user && key != uid_key {
            continue;
        }
        let (Ok(start), Ok(size)) = (start.parse(), size.parse()) else {
            continue;
        };
        return Some(IdRange { start, size });
    }
    None
}
