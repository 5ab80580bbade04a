//! Multi-document manifest decoding.
//!
//! A chart buffer may contain several `---`-separated YAML documents. Each
//! document is dispatched on its `kind` to the matching typed decoder,
//! validated, and inserted into the [`Registry`]. Decode failures carry a
//! locator pointing at the offending document and field.

use serde::Deserialize;
use serde_yaml::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::manifest::{
    ContainerManifest, ContainerSpec, Labels, NetworkManifest, NetworkSpec, PodManifest, PodSpec,
    Resource, ResourceKind, SecretManifest, SecretSpec, VolumeManifest, VolumeSpec, API_VERSIONS,
};
use crate::registry::Registry;

/// Common envelope of every manifest document
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Document {
    api_version: String,
    kind: String,
    metadata: Metadata,
    #[serde(default)]
    spec: Value,
}

#[derive(Debug, Deserialize)]
struct Metadata {
    name: String,
    #[serde(default)]
    labels: Labels,
}

/// Parse a chart buffer into a validated registry.
///
/// Splits on document boundaries, skips empty documents, and fails on the
/// first unknown kind, decode error, validation error or duplicate
/// `(kind, name)`.
pub fn parse_manifests(input: &str) -> Result<Registry> {
    let mut registry = Registry::new();

    for (index, deserializer) in serde_yaml::Deserializer::from_str(input).enumerate() {
        let value = Value::deserialize(deserializer).map_err(|err| {
            Error::validation_at(
                format!("document[{index}]"),
                format!("$[{index}]"),
                format!("not valid YAML: {err}"),
            )
        })?;
        if value.is_null() {
            // Blank document between separators
            continue;
        }

        let resource = decode_document(index, value)?;
        resource.validate()?;
        debug!(resource = %resource.key(), "parsed manifest document");
        registry.insert(resource)?;
    }

    Ok(registry)
}

fn decode_document(index: usize, value: Value) -> Result<Resource> {
    let locate = |field: &str| format!("$[{index}].{field}");

    // Peek at the kind before committing to a decoder
    let kind_str = value
        .get("kind")
        .and_then(Value::as_str)
        .ok_or_else(|| {
            Error::validation_at(
                format!("document[{index}]"),
                locate("kind"),
                "missing 'kind'",
            )
        })?
        .to_string();
    let kind: ResourceKind = kind_str.parse().map_err(|_| {
        Error::validation_at(
            format!("document[{index}]"),
            locate("kind"),
            format!("unknown kind '{kind_str}'"),
        )
    })?;

    let document: Document = serde_yaml::from_value(value).map_err(|err| {
        Error::validation_at(
            format!("document[{index}]"),
            format!("$[{index}]"),
            format!("malformed {kind_str} document: {err}"),
        )
    })?;

    if !API_VERSIONS.contains(&document.api_version.as_str()) {
        return Err(Error::validation_at(
            format!("{kind}/{}", document.metadata.name),
            locate("apiVersion"),
            format!(
                "unsupported apiVersion '{}' (expected one of {})",
                document.api_version,
                API_VERSIONS.join(", ")
            ),
        ));
    }

    let resource = format!("{kind}/{}", document.metadata.name);
    let spec_error = |err: serde_yaml::Error| {
        Error::validation_at(resource.clone(), locate("spec"), format!("invalid spec: {err}"))
    };

    let name = document.metadata.name;
    let labels = document.metadata.labels;
    Ok(match kind {
        ResourceKind::Container => {
            let spec: ContainerSpec =
                serde_yaml::from_value(document.spec).map_err(spec_error)?;
            Resource::Container(ContainerManifest { name, labels, spec })
        }
        ResourceKind::Network => {
            let spec: NetworkSpec = serde_yaml::from_value(document.spec).map_err(spec_error)?;
            Resource::Network(NetworkManifest { name, labels, spec })
        }
        ResourceKind::Volume => {
            let spec: VolumeSpec = serde_yaml::from_value(document.spec).map_err(spec_error)?;
            Resource::Volume(VolumeManifest { name, labels, spec })
        }
        ResourceKind::Secret => {
            let spec: SecretSpec = serde_yaml::from_value(document.spec).map_err(spec_error)?;
            Resource::Secret(SecretManifest { name, labels, spec })
        }
        ResourceKind::Pod => {
            let spec: PodSpec = serde_yaml::from_value(document.spec).map_err(spec_error)?;
            Resource::Pod(PodManifest { name, labels, spec })
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::manifest::ResourceKey;

    const CHART: &str = r"
apiVersion: cutepod/v1alpha1
kind: CuteNetwork
metadata:
  name: web-network
spec:
  driver: bridge
  subnet: 172.20.0.0/16
---
apiVersion: cutepod/v1alpha1
kind: CuteVolume
metadata:
  name: web-data
spec:
  type: emptyDir
  emptyDir: {}
---
apiVersion: cutepod/v1alpha1
kind: CuteContainer
metadata:
  name: web-server
spec:
  image: nginx:latest
  networks:
    - web-network
  volumes:
    - name: web-data
      mountPath: /usr/share/nginx/html
";

    #[test]
    fn test_parse_multi_document_chart() {
        let registry = parse_manifests(CHART).unwrap();
        assert_eq!(registry.len(), 3);
        assert!(registry
            .get(&ResourceKey::new(ResourceKind::Container, "web-server"))
            .is_some());
    }

    #[test]
    fn test_empty_documents_skipped() {
        let registry = parse_manifests("---\n---\n").unwrap();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_unknown_kind_is_fatal() {
        let input = "apiVersion: cutepod/v1alpha1\nkind: Deployment\nmetadata:\n  name: x\nspec: {}\n";
        let err = parse_manifests(input).unwrap_err();
        assert!(err.to_string().contains("unknown kind 'Deployment'"));
        assert!(err.locator().unwrap().contains("kind"));
    }

    #[test]
    fn test_unsupported_api_version() {
        let input = "apiVersion: cutepod/v2\nkind: CuteNetwork\nmetadata:\n  name: x\nspec: {}\n";
        let err = parse_manifests(input).unwrap_err();
        assert!(err.to_string().contains("unsupported apiVersion"));
    }

    #[test]
    fn test_duplicate_key_is_fatal() {
        let doc = "apiVersion: cutepod/v1alpha1\nkind: CuteNetwork\nmetadata:\n  name: web\nspec: {}\n";
        let input = format!("{doc}---\n{doc}");
        let err = parse_manifests(&input).unwrap_err();
        assert!(matches!(err, Error::Duplicate { .. }));
    }

    #[test]
    fn test_spec_decode_error_has_locator() {
        let input = "apiVersion: cutepod/v1alpha1\nkind: CuteContainer\nmetadata:\n  name: web\nspec:\n  image: [not, a, string]\n";
        let err = parse_manifests(input).unwrap_err();
        assert_eq!(err.locator(), Some("$[0].spec"));
    }

    #[test]
    fn test_validation_runs_during_parse() {
        let input = "apiVersion: cutepod/v1alpha1\nkind: CuteContainer\nmetadata:\n  name: web\nspec:\n  image: ''\n";
        let err = parse_manifests(input).unwrap_err();
        assert_eq!(err.locator(), Some("spec.image"));
    }
}
