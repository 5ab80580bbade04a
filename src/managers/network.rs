//! Network resource driver.

use async_trait::async_trait;
use tracing::debug;

use crate::engine::{ListFilters, NetworkConfig, NetworkRecord};
use crate::error::{Error, Result};
use crate::manifest::{NetworkManifest, NetworkSpec, Resource, ResourceKind};

use super::{OpContext, ResourceManager};

/// Driver for `CuteNetwork` resources
pub struct NetworkManager;

fn config_from_manifest(manifest: &NetworkManifest) -> NetworkConfig {
    NetworkConfig {
        name: manifest.name.clone(),
        driver: manifest.spec.driver.clone(),
        subnet: manifest.spec.subnet.clone(),
        gateway: manifest.spec.gateway.clone(),
        options: manifest.spec.options.clone(),
        labels: manifest.labels.clone(),
    }
}

fn manifest_from_record(record: &NetworkRecord) -> NetworkManifest {
    NetworkManifest {
        name: record.name.clone(),
        labels: record.labels.clone(),
        spec: NetworkSpec {
            driver: record.driver.clone(),
            options: record.options.clone(),
            subnet: record.subnet.clone(),
            gateway: record.gateway.clone(),
        },
    }
}

/// Fields compared for network equivalence: driver, subnet, options
fn field_differences(desired: &NetworkSpec, actual: &NetworkSpec) -> Vec<String> {
    let mut reasons = Vec::new();
    if desired.driver != actual.driver {
        reasons.push("driver".to_string());
    }
    if desired.subnet != actual.subnet {
        reasons.push("subnet".to_string());
    }
    if desired.options != actual.options {
        reasons.push("options".to_string());
    }
    reasons
}

#[async_trait]
impl ResourceManager for NetworkManager {
    fn kind(&self) -> ResourceKind {
        ResourceKind::Network
    }

    async fn actual_from_engine(&self, ctx: &OpContext<'_>) -> Result<Vec<Resource>> {
        let filters = ListFilters::chart(&ctx.chart.name);
        let listed = ctx.engine.list_networks(&filters).await?;
        let mut resources = Vec::with_capacity(listed.len());
        for entry in listed {
            // The list form omits subnet details on some engines
            let record = ctx.engine.inspect_network(&entry.name).await?;
            resources.push(Resource::Network(manifest_from_record(&record)));
        }
        Ok(resources)
    }

    async fn create(&self, ctx: &OpContext<'_>, resource: &Resource) -> Result<()> {
        let Resource::Network(manifest) = resource else {
            return Err(Error::configuration("network manager got a non-network"));
        };
        debug!(network = %manifest.name, "creating network");
        ctx.engine
            .create_network(&config_from_manifest(manifest))
            .await?;
        Ok(())
    }

    async fn delete(&self, ctx: &OpContext<'_>, resource: &Resource) -> Result<()> {
        ctx.engine.remove_network(resource.name()).await
    }

    fn equivalent(&self, desired: &Resource, actual: &Resource) -> Result<bool> {
        let (Resource::Network(desired), Resource::Network(actual)) = (desired, actual) else {
            return Err(Error::comparison(
                desired.key().to_string(),
                "mismatched kinds in network comparison",
            ));
        };
        Ok(field_differences(&desired.spec, &actual.spec).is_empty())
    }

    fn update_reasons(&self, desired: &Resource, actual: &Resource) -> Vec<String> {
        match (desired, actual) {
            (Resource::Network(desired), Resource::Network(actual)) => {
                field_differences(&desired.spec, &actual.spec)
            }
            _ => Vec::new(),
        }
    }
}
