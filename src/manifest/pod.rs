//! Pod manifest record.
//!
//! A `CutePod` groups containers for dependency ordering. It has no engine
//! counterpart: containers are not co-scheduled into an engine pod.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::manifest::{Labels, ResourceKey, ResourceKind};

/// A parsed `CutePod` document
#[derive(Debug, Clone, PartialEq)]
pub struct PodManifest {
    /// Resource name
    pub name: String,
    /// User labels from `metadata.labels`
    pub labels: Labels,
    /// The declarative pod spec
    pub spec: PodSpec,
}

/// `spec` of a `CutePod`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PodSpec {
    /// Names of the grouped `CuteContainer` resources
    #[serde(default)]
    pub containers: Vec<String>,
}

impl PodManifest {
    /// Derived dependencies: the grouped containers
    pub fn dependencies(&self) -> Vec<ResourceKey> {
        let mut deps: Vec<ResourceKey> = self
            .spec
            .containers
            .iter()
            .map(|name| ResourceKey::new(ResourceKind::Container, name.as_str()))
            .collect();
        deps.sort();
        deps.dedup();
        deps
    }

    /// Validate container references
    pub fn validate(&self) -> Result<()> {
        for (i, container) in self.spec.containers.iter().enumerate() {
            if container.is_empty() {
                return Err(Error::validation_at(
                    format!("Pod/{}", self.name),
                    format!("spec.containers[{i}]"),
                    "container reference must not be empty",
                ));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependencies_are_containers() {
        let pod = PodManifest {
            name: "web".to_string(),
            labels: Labels::new(),
            spec: PodSpec {
                containers: vec!["api".to_string(), "worker".to_string(), "api".to_string()],
            },
        };
        let deps = pod.dependencies();
        assert_eq!(deps.len(), 2);
        assert!(deps.contains(&ResourceKey::new(ResourceKind::Container, "api")));
    }

    #[test]
    fn test_empty_container_ref_rejected() {
        let pod = PodManifest {
            name: "web".to_string(),
            labels: Labels::new(),
            spec: PodSpec {
                containers: vec![String::new()],
            },
        };
        assert!(pod.validate().is_err());
    }
}
