//! In-memory engine double.
//!
//! Implements the full [`Engine`] contract against a single shared state
//! map, plus the hooks tests need: deterministic ID generation,
//! per-operation failure injection, and per-operation call counting.

use std::collections::{BTreeMap, VecDeque};
use std::sync::RwLock;
use std::time::Duration;

use async_trait::async_trait;
use tracing::trace;

use crate::error::{Error, Result};

use super::{
    ContainerConfig, ContainerCreateResponse, ContainerRecord, ContainerState, Engine,
    ImageRecord, ListFilters, NetworkConfig, NetworkRecord, SecretConfig, SecretRecord,
    VolumeConfig, VolumeRecord,
};

#[derive(Debug, Default)]
struct MockState {
    containers: BTreeMap<String, ContainerRecord>,
    networks: BTreeMap<String, NetworkRecord>,
    volumes: BTreeMap<String, VolumeRecord>,
    secrets: BTreeMap<String, SecretRecord>,
    images: BTreeMap<String, ImageRecord>,
    next_id: u64,
    calls: BTreeMap<String, u64>,
    failures: BTreeMap<String, VecDeque<String>>,
}

impl MockState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }
}

/// Engine test double with deterministic state.
///
/// State lives behind one read-write lock; read-heavy list and inspect
/// operations take shared acquisition.
#[derive(Debug, Default)]
pub struct MockEngine {
    state: RwLock<MockState>,
}

impl MockEngine {
    /// Create an empty mock engine
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one transient failure for the named operation.
    ///
    /// The next call to that operation fails with an engine error carrying
    /// `message`; subsequent calls proceed normally.
    pub fn inject_failure(&self, operation: &str, message: &str) {
        self.inject_failures(operation, message, 1);
    }

    /// Queue `count` transient failures for the named operation
    pub fn inject_failures(&self, operation: &str, message: &str, count: usize) {
        let mut state = self.state.write().expect("mock state lock poisoned");
        let queue = state.failures.entry(operation.to_string()).or_default();
        for _ in 0..count {
            queue.push_back(message.to_string());
        }
    }

    /// How many times the named operation has been called
    pub fn call_count(&self, operation: &str) -> u64 {
        let state = self.state.read().expect("mock state lock poisoned");
        state.calls.get(operation).copied().unwrap_or(0)
    }

    /// Total calls across all mutating container/network/volume/secret
    /// operations; used to assert dry-run purity
    pub fn mutation_count(&self) -> u64 {
        let state = self.state.read().expect("mock state lock poisoned");
        state
            .calls
            .iter()
            .filter(|(op, _)| {
                op.ends_with("_create")
                    || op.ends_with("_update")
                    || op.ends_with("_remove")
                    || op.ends_with("_start")
                    || op.ends_with("_stop")
                    || op.ends_with("_connect")
                    || op.ends_with("_disconnect")
                    || op.ends_with("_pull")
            })
            .map(|(_, count)| count)
            .sum()
    }

    /// Snapshot of a container's record, if present
    pub fn container(&self, name: &str) -> Option<ContainerRecord> {
        let state = self.state.read().expect("mock state lock poisoned");
        state.containers.get(name).cloned()
    }

    /// Record a call and pop any injected failure for `operation`
    fn begin(&self, operation: &str) -> Result<()> {
        let mut state = self.state.write().expect("mock state lock poisoned");
        *state.calls.entry(operation.to_string()).or_insert(0) += 1;
        if let Some(queue) = state.failures.get_mut(operation) {
            if let Some(message) = queue.pop_front() {
                trace!(operation, "mock failure injected");
                return Err(Error::engine(operation, message));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl Engine for MockEngine {
    async fn ping(&self) -> Result<()> {
        self.begin("ping")
    }

    async fn create_container(
        &self,
        config: &ContainerConfig,
    ) -> Result<ContainerCreateResponse> {
        self.begin("container_create")?;
        let mut state = self.state.write().expect("mock state lock poisoned");
        if state.containers.contains_key(&config.name) {
            return Err(Error::already_exists("container", &config.name));
        }
        let id = format!("{:064x}", state.next_id());
        let record = ContainerRecord {
            id: id.clone(),
            name: config.name.clone(),
            image: config.image.clone(),
            command: config.command.clone(),
            args: config.args.clone(),
            env: config.env.clone(),
            working_dir: config.working_dir.clone(),
            user: config.user.clone(),
            ports: config.ports.clone(),
            mounts: config.mounts.clone(),
            networks: config.networks.clone(),
            secrets: config.secrets.clone(),
            restart_policy: config.restart_policy.clone(),
            labels: config.labels.clone(),
            state: ContainerState::Created,
        };
        state.containers.insert(config.name.clone(), record);
        Ok(ContainerCreateResponse {
            id,
            warnings: Vec::new(),
        })
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        self.begin("container_start")?;
        let mut state = self.state.write().expect("mock state lock poisoned");
        let record = state
            .containers
            .get_mut(name)
            .ok_or_else(|| Error::not_found("container", name))?;
        record.state = ContainerState::Running;
        Ok(())
    }

    async fn stop_container(&self, name: &str, _timeout: Duration) -> Result<()> {
        self.begin("container_stop")?;
        let mut state = self.state.write().expect("mock state lock poisoned");
        let record = state
            .containers
            .get_mut(name)
            .ok_or_else(|| Error::not_found("container", name))?;
        record.state = ContainerState::Exited(0);
        Ok(())
    }

    async fn remove_container(&self, name: &str, _force: bool) -> Result<()> {
        self.begin("container_remove")?;
        let mut state = self.state.write().expect("mock state lock poisoned");
        state
            .containers
            .remove(name)
            .ok_or_else(|| Error::not_found("container", name))?;
        Ok(())
    }

    async fn list_containers(
        &self,
        filters: &ListFilters,
        all: bool,
    ) -> Result<Vec<ContainerRecord>> {
        self.begin("container_list")?;
        let state = self.state.read().expect("mock state lock poisoned");
        Ok(state
            .containers
            .values()
            .filter(|record| all || record.state.is_running())
            .filter(|record| filters.matches(&record.labels))
            .cloned()
            .collect())
    }

    async fn inspect_container(&self, name: &str) -> Result<ContainerRecord> {
        self.begin("container_inspect")?;
        let state = self.state.read().expect("mock state lock poisoned");
        state
            .containers
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("container", name))
    }

    async fn pull_image(&self, reference: &str) -> Result<ImageRecord> {
        self.begin("image_pull")?;
        let mut state = self.state.write().expect("mock state lock poisoned");
        let id = format!("sha256:{:056x}", state.next_id());
        let record = ImageRecord {
            id,
            reference: reference.to_string(),
        };
        state
            .images
            .insert(reference.to_string(), record.clone());
        Ok(record)
    }

    async fn get_image(&self, reference: &str) -> Result<ImageRecord> {
        self.begin("image_get")?;
        let state = self.state.read().expect("mock state lock poisoned");
        state
            .images
            .get(reference)
            .cloned()
            .ok_or_else(|| Error::not_found("image", reference))
    }

    async fn create_network(&self, config: &NetworkConfig) -> Result<NetworkRecord> {
        self.begin("network_create")?;
        let mut state = self.state.write().expect("mock state lock poisoned");
        if state.networks.contains_key(&config.name) {
            return Err(Error::already_exists("network", &config.name));
        }
        let record = NetworkRecord {
            id: format!("{:016x}", state.next_id()),
            name: config.name.clone(),
            driver: config.driver.clone(),
            subnet: config.subnet.clone(),
            gateway: config.gateway.clone(),
            options: config.options.clone(),
            labels: config.labels.clone(),
        };
        state.networks.insert(config.name.clone(), record.clone());
        Ok(record)
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        self.begin("network_remove")?;
        let mut state = self.state.write().expect("mock state lock poisoned");
        state
            .networks
            .remove(name)
            .ok_or_else(|| Error::not_found("network", name))?;
        Ok(())
    }

    async fn list_networks(&self, filters: &ListFilters) -> Result<Vec<NetworkRecord>> {
        self.begin("network_list")?;
        let state = self.state.read().expect("mock state lock poisoned");
        Ok(state
            .networks
            .values()
            .filter(|record| filters.matches(&record.labels))
            .cloned()
            .collect())
    }

    async fn inspect_network(&self, name: &str) -> Result<NetworkRecord> {
        self.begin("network_inspect")?;
        let state = self.state.read().expect("mock state lock poisoned");
        state
            .networks
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("network", name))
    }

    async fn connect_network(&self, network: &str, container: &str) -> Result<()> {
        self.begin("network_connect")?;
        let mut state = self.state.write().expect("mock state lock poisoned");
        if !state.networks.contains_key(network) {
            return Err(Error::not_found("network", network));
        }
        let record = state
            .containers
            .get_mut(container)
            .ok_or_else(|| Error::not_found("container", container))?;
        if !record.networks.contains(&network.to_string()) {
            record.networks.push(network.to_string());
        }
        Ok(())
    }

    async fn disconnect_network(&self, network: &str, container: &str) -> Result<()> {
        self.begin("network_disconnect")?;
        let mut state = self.state.write().expect("mock state lock poisoned");
        let record = state
            .containers
            .get_mut(container)
            .ok_or_else(|| Error::not_found("container", container))?;
        let before = record.networks.len();
        record.networks.retain(|n| n != network);
        if record.networks.len() == before {
            return Err(Error::not_found("network", network));
        }
        Ok(())
    }

    async fn create_volume(&self, config: &VolumeConfig) -> Result<VolumeRecord> {
        self.begin("volume_create")?;
        let mut state = self.state.write().expect("mock state lock poisoned");
        if state.volumes.contains_key(&config.name) {
            return Err(Error::already_exists("volume", &config.name));
        }
        let record = VolumeRecord {
            name: config.name.clone(),
            driver: config
                .driver
                .clone()
                .unwrap_or_else(|| "local".to_string()),
            mountpoint: Some(format!("/var/lib/mock/volumes/{}/_data", config.name)),
            options: config.options.clone(),
            labels: config.labels.clone(),
        };
        state.volumes.insert(config.name.clone(), record.clone());
        Ok(record)
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        self.begin("volume_remove")?;
        let mut state = self.state.write().expect("mock state lock poisoned");
        state
            .volumes
            .remove(name)
            .ok_or_else(|| Error::not_found("volume", name))?;
        Ok(())
    }

    async fn list_volumes(&self, filters: &ListFilters) -> Result<Vec<VolumeRecord>> {
        self.begin("volume_list")?;
        let state = self.state.read().expect("mock state lock poisoned");
        Ok(state
            .volumes
            .values()
            .filter(|record| filters.matches(&record.labels))
            .cloned()
            .collect())
    }

    async fn inspect_volume(&self, name: &str) -> Result<VolumeRecord> {
        self.begin("volume_inspect")?;
        let state = self.state.read().expect("mock state lock poisoned");
        state
            .volumes
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("volume", name))
    }

    async fn create_secret(&self, config: &SecretConfig) -> Result<SecretRecord> {
        self.begin("secret_create")?;
        let mut state = self.state.write().expect("mock state lock poisoned");
        if state.secrets.contains_key(&config.name) {
            return Err(Error::already_exists("secret", &config.name));
        }
        let record = SecretRecord {
            id: format!("{:025x}", state.next_id()),
            name: config.name.clone(),
            secret_type: config.secret_type.clone(),
            keys: config.data.keys().cloned().collect(),
            labels: config.labels.clone(),
        };
        state.secrets.insert(config.name.clone(), record.clone());
        Ok(record)
    }

    async fn update_secret(&self, config: &SecretConfig) -> Result<SecretRecord> {
        self.begin("secret_update")?;
        let mut state = self.state.write().expect("mock state lock poisoned");
        // Remove-then-create, matching engines without atomic replacement
        state.secrets.remove(&config.name);
        let record = SecretRecord {
            id: format!("{:025x}", state.next_id()),
            name: config.name.clone(),
            secret_type: config.secret_type.clone(),
            keys: config.data.keys().cloned().collect(),
            labels: config.labels.clone(),
        };
        state.secrets.insert(config.name.clone(), record.clone());
        Ok(record)
    }

    async fn remove_secret(&self, name: &str) -> Result<()> {
        self.begin("secret_remove")?;
        let mut state = self.state.write().expect("mock state lock poisoned");
        state
            .secrets
            .remove(name)
            .ok_or_else(|| Error::not_found("secret", name))?;
        Ok(())
    }

    async fn list_secrets(&self, filters: &ListFilters) -> Result<Vec<SecretRecord>> {
        self.begin("secret_list")?;
        let state = self.state.read().expect("mock state lock poisoned");
        Ok(state
            .secrets
            .values()
            .filter(|record| filters.matches(&record.labels))
            .cloned()
            .collect())
    }

    async fn inspect_secret(&self, name: &str) -> Result<SecretRecord> {
        self.begin("secret_inspect")?;
        let state = self.state.read().expect("mock state lock poisoned");
        state
            .secrets
            .get(name)
            .cloned()
            .ok_or_else(|| Error::not_found("secret", name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn container_config(name: &str) -> ContainerConfig {
        ContainerConfig {
            name: name.to_string(),
            image: "nginx:latest".to_string(),
            ..ContainerConfig::default()
        }
    }

    #[tokio::test]
    async fn test_container_lifecycle() {
        let engine = MockEngine::new();
        let response = engine
            .create_container(&container_config("web"))
            .await
            .unwrap();
        assert_eq!(response.id.len(), 64);

        engine.start_container("web").await.unwrap();
        assert!(engine.container("web").unwrap().state.is_running());

        engine
            .stop_container("web", Duration::from_secs(15))
            .await
            .unwrap();
        assert_eq!(
            engine.container("web").unwrap().state,
            ContainerState::Exited(0)
        );

        engine.remove_container("web", false).await.unwrap();
        assert!(engine.container("web").is_none());
    }

    #[tokio::test]
    async fn test_deterministic_ids() {
        let first = MockEngine::new();
        let second = MockEngine::new();
        let a = first
            .create_container(&container_config("web"))
            .await
            .unwrap();
        let b = second
            .create_container(&container_config("web"))
            .await
            .unwrap();
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn test_duplicate_create_rejected() {
        let engine = MockEngine::new();
        engine
            .create_container(&container_config("web"))
            .await
            .unwrap();
        let err = engine
            .create_container(&container_config("web"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn test_list_all_vs_running() {
        let engine = MockEngine::new();
        engine
            .create_container(&container_config("created-only"))
            .await
            .unwrap();
        engine
            .create_container(&container_config("running"))
            .await
            .unwrap();
        engine.start_container("running").await.unwrap();

        let running = engine
            .list_containers(&ListFilters::new(), false)
            .await
            .unwrap();
        assert_eq!(running.len(), 1);
        assert_eq!(running[0].name, "running");

        let all = engine
            .list_containers(&ListFilters::new(), true)
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_failure_injection_and_call_counts() {
        let engine = MockEngine::new();
        engine.inject_failure("network_list", "socket hiccup");

        let err = engine.list_networks(&ListFilters::new()).await.unwrap_err();
        assert!(err.is_recoverable());

        // Second call proceeds
        assert!(engine.list_networks(&ListFilters::new()).await.is_ok());
        assert_eq!(engine.call_count("network_list"), 2);
    }

    #[tokio::test]
    async fn test_secret_read_hides_payload() {
        let engine = MockEngine::new();
        let config = SecretConfig {
            name: "api-key".to_string(),
            secret_type: "opaque".to_string(),
            data: [("token".to_string(), b"hunter2".to_vec())]
                .into_iter()
                .collect(),
            labels: crate::manifest::Labels::new(),
        };
        engine.create_secret(&config).await.unwrap();
        let record = engine.inspect_secret("api-key").await.unwrap();
        assert_eq!(record.keys, vec!["token".to_string()]);
    }

    #[tokio::test]
    async fn test_update_secret_replaces_id() {
        let engine = MockEngine::new();
        let config = SecretConfig {
            name: "api-key".to_string(),
            secret_type: "opaque".to_string(),
            data: [("token".to_string(), b"hunter2".to_vec())]
                .into_iter()
                .collect(),
            labels: crate::manifest::Labels::new(),
        };
        let created = engine.create_secret(&config).await.unwrap();
        let updated = engine.update_secret(&config).await.unwrap();
        assert_ne!(created.id, updated.id);
    }

    #[tokio::test]
    async fn test_network_connect_tracks_membership() {
        let engine = MockEngine::new();
        engine
            .create_network(&NetworkConfig {
                name: "web-network".to_string(),
                driver: "bridge".to_string(),
                ..NetworkConfig::default()
            })
            .await
            .unwrap();
        engine
            .create_container(&container_config("web"))
            .await
            .unwrap();

        engine.connect_network("web-network", "web").await.unwrap();
        assert!(engine
            .container("web")
            .unwrap()
            .networks
            .contains(&"web-network".to_string()));

        engine
            .disconnect_network("web-network", "web")
            .await
            .unwrap();
        assert!(engine.container("web").unwrap().networks.is_empty());
    }
}
