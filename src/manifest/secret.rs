//! Secret manifest record.
//!
//! Secret values are declared base64-encoded. The engine hides payloads on
//! read, so live equality is judged by key set and labels only.

use std::collections::BTreeMap;

use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::manifest::Labels;

/// A parsed `CuteSecret` document
#[derive(Debug, Clone, PartialEq)]
pub struct SecretManifest {
    /// Resource name (engine secret name)
    pub name: String,
    /// User labels from `metadata.labels`
    pub labels: Labels,
    /// The declarative secret spec
    pub spec: SecretSpec,
}

/// `spec` of a `CuteSecret`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretSpec {
    /// Secret type tag
    #[serde(rename = "type", default = "default_type")]
    pub secret_type: String,
    /// Key to base64-encoded value
    #[serde(default)]
    pub data: BTreeMap<String, String>,
}

fn default_type() -> String {
    "opaque".to_string()
}

impl Default for SecretSpec {
    fn default() -> Self {
        Self {
            secret_type: default_type(),
            data: BTreeMap::new(),
        }
    }
}

impl SecretManifest {
    fn resource(&self) -> String {
        format!("Secret/{}", self.name)
    }

    /// Validate that data is non-empty and every value decodes as base64
    pub fn validate(&self) -> Result<()> {
        if self.spec.data.is_empty() {
            return Err(Error::validation_at(
                self.resource(),
                "spec.data",
                "data must not be empty",
            ));
        }
        for (key, value) in &self.spec.data {
            if key.is_empty() {
                return Err(Error::validation_at(
                    self.resource(),
                    "spec.data",
                    "data keys must not be empty",
                ));
            }
            base64::engine::general_purpose::STANDARD
                .decode(value)
                .map_err(|err| {
                    Error::validation_at(
                        self.resource(),
                        format!("spec.data.{key}"),
                        format!("value is not valid base64: {err}"),
                    )
                })?;
        }
        Ok(())
    }

    /// Decode the data map to raw bytes
    pub fn decoded_data(&self) -> Result<BTreeMap<String, Vec<u8>>> {
        let mut decoded = BTreeMap::new();
        for (key, value) in &self.spec.data {
            let bytes = base64::engine::general_purpose::STANDARD
                .decode(value)
                .map_err(|err| {
                    Error::validation_at(
                        self.resource(),
                        format!("spec.data.{key}"),
                        format!("value is not valid base64: {err}"),
                    )
                })?;
            decoded.insert(key.clone(), bytes);
        }
        Ok(decoded)
    }
}
