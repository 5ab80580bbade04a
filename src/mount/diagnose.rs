//! Mount failure diagnostics.
//!
//! Classifies an engine mount error by message substring and attaches a
//! concrete fix suggestion for the operator.

use std::fmt;

/// Classified cause of a mount failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MountFailureKind {
    /// SELinux denied access to the source path
    SeLinuxDenied,
    /// Source ownership does not match the container user
    OwnershipMismatch,
    /// The rootless user-namespace mapping rejected the operation
    UserNsMappingFail,
    /// The path cannot be reached at all
    PathNotAccessible,
}

/// A classified failure with its fix suggestion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MountDiagnosis {
    /// What went wrong
    pub kind: MountFailureKind,
    /// How the operator can fix it
    pub suggestion: &'static str,
}

impl fmt::Display for MountDiagnosis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.kind {
            MountFailureKind::SeLinuxDenied => "SELinux denied",
            MountFailureKind::OwnershipMismatch => "ownership mismatch",
            MountFailureKind::UserNsMappingFail => "user namespace mapping failed",
            MountFailureKind::PathNotAccessible => "path not accessible",
        };
        write!(f, "{kind}: {}", self.suggestion)
    }
}

/// Classify a mount failure message.
pub fn diagnose(message: &str, selinux_enforcing: bool, rootless: bool) -> MountDiagnosis {
    let lower = message.to_lowercase();
    if selinux_enforcing && lower.contains("permission denied") {
        return MountDiagnosis {
            kind: MountFailureKind::SeLinuxDenied,
            suggestion: "add an SELinux label option (z or Z) to the volume mount, \
                         or set the volume's seLinuxOptions level",
        };
    }
    if lower.contains("operation not permitted") {
        return MountDiagnosis {
            kind: MountFailureKind::OwnershipMismatch,
            suggestion: "set the volume's securityContext.owner to the container's \
                         uid/gid so the source path is chowned before mounting",
        };
    }
    if rootless && lower.contains("user namespace") {
        return MountDiagnosis {
            kind: MountFailureKind::UserNsMappingFail,
            suggestion: "check the /etc/subuid and /etc/subgid ranges for the current \
                         user; the container uid/gid must fall inside the mapped range",
        };
    }
    MountDiagnosis {
        kind: MountFailureKind::PathNotAccessible,
        suggestion: "verify the host path exists and is readable by the engine",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_selinux_denied_requires_enforcement() {
        let diag = diagnose("permission denied", true, false);
        assert_eq!(diag.kind, MountFailureKind::SeLinuxDenied);

        let diag = diagnose("permission denied", false, false);
        assert_eq!(diag.kind, MountFailureKind::PathNotAccessible);
    }

    #[test]
    fn test_ownership_mismatch() {
        let diag = diagnose("chown: operation not permitted", false, false);
        assert_eq!(diag.kind, MountFailureKind::OwnershipMismatch);
    }

    #[test]
    fn test_userns_requires_rootless() {
        let diag = diagnose("cannot set up user namespace", false, true);
        assert_eq!(diag.kind, MountFailureKind::UserNsMappingFail);

        let diag = diagnose("cannot set up user namespace", false, false);
        assert_eq!(diag.kind, MountFailureKind::PathNotAccessible);
    }

    #[test]
    fn test_fallback() {
        let diag = diagnose("something odd", true, true);
        assert_eq!(diag.kind, MountFailureKind::PathNotAccessible);
        assert!(diag.to_string().contains("path not accessible"));
    }
}
