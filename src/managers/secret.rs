//! Secret resource driver.
//!
//! Live secrets never expose payloads, so equivalence is judged by type,
//! key set and labels. Updates replace the secret; consumers must tolerate
//! the brief absence between removal and re-creation.

use std::collections::BTreeSet;

use async_trait::async_trait;
use tracing::debug;

use crate::engine::{ListFilters, SecretConfig, SecretRecord};
use crate::error::{Error, Result};
use crate::manifest::{Resource, ResourceKind, SecretManifest, SecretSpec};

use super::{labels_equal, OpContext, ResourceManager};

/// Driver for `CuteSecret` resources
pub struct SecretManager;

fn config_from_manifest(manifest: &SecretManifest) -> Result<SecretConfig> {
    Ok(SecretConfig {
        name: manifest.name.clone(),
        secret_type: manifest.spec.secret_type.clone(),
        data: manifest.decoded_data()?,
        labels: manifest.labels.clone(),
    })
}

fn manifest_from_record(record: &SecretRecord) -> SecretManifest {
    SecretManifest {
        name: record.name.clone(),
        labels: record.labels.clone(),
        spec: SecretSpec {
            secret_type: record.secret_type.clone(),
            // Values are unreadable; keys stand in with empty payloads
            data: record
                .keys
                .iter()
                .map(|key| (key.clone(), String::new()))
                .collect(),
        },
    }
}

fn field_differences(desired: &SecretManifest, actual: &SecretManifest) -> Vec<String> {
    let mut reasons = Vec::new();
    if desired.spec.secret_type != actual.spec.secret_type {
        reasons.push("type".to_string());
    }
    let key_set = |manifest: &SecretManifest| -> BTreeSet<String> {
        manifest.spec.data.keys().cloned().collect()
    };
    if key_set(desired) != key_set(actual) {
        reasons.push("keys".to_string());
    }
    if !labels_equal(&desired.labels, &actual.labels) {
        reasons.push("labels".to_string());
    }
    reasons
}

#[async_trait]
impl ResourceManager for SecretManager {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Secret
    }

    async fn actual_from_engine(&self, ctx: &OpContext<'_>) -> Result<Vec<Resource>> {
        let filters = ListFilters::chart(&ctx.chart.name);
        Ok(ctx
            .engine
            .list_secrets(&filters)
            .await?
            .iter()
            .map(|record| Resource::Secret(manifest_from_record(record)))
            .collect())
    }

    async fn create(&self, ctx: &OpContext<'_>, resource: &Resource) -> Result<()> {
        let Resource::Secret(manifest) = resource else {
            return Err(Error::configuration("secret manager got a non-secret"));
        };
        debug!(secret = %manifest.name, "creating secret");
        ctx.engine
            .create_secret(&config_from_manifest(manifest)?)
            .await?;
        Ok(())
    }

    /// Replace the payload through the engine's non-atomic update
    async fn update(
        &self,
        ctx: &OpContext<'_>,
        desired: &Resource,
        _actual: &Resource,
    ) -> Result<()> {
        let Resource::Secret(manifest) = desired else {
            return Err(Error::configuration("secret manager got a non-secret"));
        };
        ctx.engine
            .update_secret(&config_from_manifest(manifest)?)
            .await?;
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext<'_>, resource: &Resource) -> Result<()> {
        ctx.engine.remove_secret(resource.name()).await
    }

    fn equivalent(&self, desired: &Resource, actual: &Resource) -> Result<bool> {
        let (Resource::Secret(desired), Resource::Secret(actual)) = (desired, actual) else {
            return Err(Error::comparison(
                desired.key().to_string(),
                "mismatched kinds in secret comparison",
            ));
        };
        Ok(field_differences(desired, actual).is_empty())
    }

    fn update_reasons(&self, desired: &Resource, actual: &Resource) -> Vec<String> {
        match (desired, actual) {
            (Resource::Secret(desired), Resource::Secret(actual)) => {
                field_differences(desired, actual)
            }
            _ => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secret(keys: &[&str], labels: &[(&str, &str)]) -> SecretManifest {
        SecretManifest {
            name: "api-key".to_string(),
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            spec: SecretSpec {
                secret_type: "opaque".to_string(),
                data: keys
                    .iter()
                    .map(|key| (key.to_string(), "aHVudGVyMg==".to_string()))
                    .collect(),
            },
        }
    }

    #[test]
    fn test_values_never_compared() {
        let manager = SecretManager;
        let desired = Resource::Secret(secret(&["token"], &[]));
        // The live side always reads back empty values
        let mut live = secret(&["token"], &[]);
        live.spec.data.insert("token".to_string(), String::new());
        let actual = Resource::Secret(live);
        assert!(manager.equivalent(&desired, &actual).unwrap());
    }

    #[test]
    fn test_key_set_change_reported() {
        let manager = SecretManager;
        let desired = Resource::Secret(secret(&["token", "endpoint"], &[]));
        let actual = Resource::Secret(secret(&["token"], &[]));
        assert_eq!(
            manager.update_reasons(&desired, &actual),
            vec!["keys".to_string()]
        );
    }

    #[test]
    fn test_label_change_reported() {
        let manager = SecretManager;
        let desired = Resource::Secret(secret(&["token"], &[("tier", "web")]));
        let actual = Resource::Secret(secret(&["token"], &[]));
        assert_eq!(
            manager.update_reasons(&desired, &actual),
            vec!["labels".to_string()]
        );
    }
}
