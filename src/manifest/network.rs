//! Network manifest record.

use std::collections::BTreeMap;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::manifest::Labels;

/// A parsed `CuteNetwork` document
#[derive(Debug, Clone, PartialEq)]
pub struct NetworkManifest {
    /// Resource name (engine network name)
    pub name: String,
    /// User labels from `metadata.labels`
    pub labels: Labels,
    /// The declarative network spec
    pub spec: NetworkSpec,
}

/// `spec` of a `CuteNetwork`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NetworkSpec {
    /// Network driver
    #[serde(default = "default_driver")]
    pub driver: String,
    /// Driver options
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
    /// IPv4 or IPv6 subnet in CIDR notation
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subnet: Option<String>,
    /// Gateway address within the subnet
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway: Option<String>,
}

fn default_driver() -> String {
    "bridge".to_string()
}

impl Default for NetworkSpec {
    fn default() -> Self {
        Self {
            driver: default_driver(),
            options: BTreeMap::new(),
            subnet: None,
            gateway: None,
        }
    }
}

impl NetworkManifest {
    fn resource(&self) -> String {
        format!("Network/{}", self.name)
    }

    /// Validate subnet and gateway grammar
    pub fn validate(&self) -> Result<()> {
        if self.spec.driver.is_empty() {
            return Err(Error::validation_at(
                self.resource(),
                "spec.driver",
                "driver must not be empty",
            ));
        }
        if let Some(subnet) = &self.spec.subnet {
            validate_cidr(subnet).map_err(|msg| {
                Error::validation_at(self.resource(), "spec.subnet", msg)
            })?;
        }
        if let Some(gateway) = &self.spec.gateway {
            gateway.parse::<IpAddr>().map_err(|_| {
                Error::validation_at(
                    self.resource(),
                    "spec.gateway",
                    format!("'{gateway}' is not a valid IP address"),
                )
            })?;
        }
        Ok(())
    }
}

fn validate_cidr(cidr: &str) -> std::result::Result<(), String> {
    let Some((addr, prefix)) = cidr.split_once('/') else {
        return Err(format!("'{cidr}' is not CIDR notation (addr/prefix)"));
    };
    let addr: IpAddr = addr
        .parse()
        .map_err(|_| format!("'{cidr}' has an invalid address part"))?;
    let prefix: u8 = prefix
        .parse()
        .map_err(|_| format!("'{cidr}' has an invalid prefix length"))?;
    let max = match addr {
        IpAddr::V4(_) => 32,
        IpAddr::V6(_) => 128,
    };
    if prefix > max {
        return Err(format!("'{cidr}' prefix length exceeds {max}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn network(subnet: Option<&str>, gateway: Option<&str>) -> NetworkManifest {
        NetworkManifest {
            name: "web-network".to_string(),
            labels: Labels::new(),
            spec: NetworkSpec {
                subnet: subnet.map(String::from),
                gateway: gateway.map(String::from),
                ..NetworkSpec::default()
            },
        }
    }

    #[test]
    fn test_default_driver_is_bridge() {
        let spec: NetworkSpec = serde_yaml::from_str("{}").unwrap();
        assert_eq!(spec.driver, "bridge");
    }

    #[test]
    fn test_valid_subnet_and_gateway() {
        assert!(network(Some("172.20.0.0/16"), Some("172.20.0.1"))
            .validate()
            .is_ok());
        assert!(network(Some("fd00::/64"), None).validate().is_ok());
    }

    #[test]
    fn test_invalid_cidr_rejected() {
        assert!(network(Some("172.20.0.0"), None).validate().is_err());
        assert!(network(Some("172.20.0.0/33"), None).validate().is_err());
        assert!(network(Some("not-an-ip/8"), None).validate().is_err());
    }

    #[test]
    fn test_invalid_gateway_rejected() {
        let err = network(None, Some("gateway")).validate().unwrap_err();
        assert_eq!(err.locator(), Some("spec.gateway"));
    }
}
