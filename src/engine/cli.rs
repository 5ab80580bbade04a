//! Podman-backed engine transport.
//!
//! Thin adapter driving the `podman` binary with `--format json` output.
//! The binary is located via PATH lookup; the connection URI comes from
//! `PODMAN_SOCK` (default `unix:/run/user/1000/podman/podman.sock`).
//!
//! Live records parsed from the CLI are best-effort: fields podman does not
//! echo (declarative mount origins, secret key sets) round-trip through
//! cutepod-owned labels written at create time.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use serde::Deserialize;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

use crate::error::{Error, Result};
use crate::manifest::Labels;

use super::{
    ContainerConfig, ContainerCreateResponse, ContainerRecord, ContainerState, Engine,
    ImageRecord, ListFilters, MountSpec, NetworkConfig, NetworkRecord, PortBinding,
    SecretConfig, SecretRecord, VolumeConfig, VolumeRecord,
};

/// Environment variable overriding the engine socket URI
pub const SOCKET_ENV: &str = "PODMAN_SOCK";

/// Default rootless podman socket URI
pub const DEFAULT_SOCKET: &str = "unix:/run/user/1000/podman/podman.sock";

/// Label carrying the declarative mount set of a container
const MOUNTS_LABEL: &str = "cutepod.io/mounts";

/// Label carrying the declarative secret attachments of a container
/// (inspect output does not echo them)
const SECRETS_LABEL: &str = "cutepod.io/secrets";

/// Label carrying the key set of a secret (payloads are never readable)
const SECRET_KEYS_LABEL: &str = "cutepod.io/secret-keys";

/// Result of one podman invocation
#[derive(Debug, Clone)]
struct CommandOutput {
    exit_code: i32,
    stdout: String,
    stderr: String,
    success: bool,
}

/// Engine implementation shelling out to the podman CLI
#[derive(Debug, Clone)]
pub struct PodmanEngine {
    podman_path: PathBuf,
    url: String,
    default_timeout: Duration,
}

impl PodmanEngine {
    /// Locate the podman binary, resolve the socket URI and probe the
    /// engine.
    pub async fn connect() -> Result<Self> {
        let podman_path = which::which("podman").map_err(|_| {
            Error::configuration("podman binary not found in PATH")
        })?;
        let url = std::env::var(SOCKET_ENV).unwrap_or_else(|_| DEFAULT_SOCKET.to_string());
        let engine = Self {
            podman_path,
            url,
            default_timeout: crate::DEFAULT_TIMEOUT,
        };
        engine.ping().await?;
        Ok(engine)
    }

    /// Create a handle without probing; used by unit tests
    #[cfg(test)]
    fn unprobed() -> Self {
        Self {
            podman_path: PathBuf::from("podman"),
            url: DEFAULT_SOCKET.to_string(),
            default_timeout: crate::DEFAULT_TIMEOUT,
        }
    }

    async fn run(&self, args: &[String]) -> Result<CommandOutput> {
        self.run_with(args, None, self.default_timeout).await
    }

    async fn run_with(
        &self,
        args: &[String],
        stdin_data: Option<Vec<u8>>,
        deadline: Duration,
    ) -> Result<CommandOutput> {
        let command_str = format!("podman {}", args.join(" "));
        debug!("executing: {}", command_str);

        let mut command = Command::new(&self.podman_path);
        command.arg("--url").arg(&self.url);
        command.args(args);
        command.stdin(if stdin_data.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        let mut child = command.spawn().map_err(|e| Error::Io {
            message: format!("failed to spawn '{command_str}'"),
            source: e,
        })?;

        if let Some(data) = stdin_data {
            if let Some(mut stdin) = child.stdin.take() {
                tokio::spawn(async move {
                    if let Err(e) = stdin.write_all(&data).await {
                        warn!("failed to write to podman stdin: {}", e);
                    }
                    if let Err(e) = stdin.shutdown().await {
                        warn!("failed to close podman stdin: {}", e);
                    }
                });
            }
        }

        let output = match timeout(deadline, child.wait_with_output()).await {
            Ok(result) => result.map_err(|e| Error::Io {
                message: format!("failed to wait for '{command_str}'"),
                source: e,
            })?,
            Err(_) => {
                return Err(Error::timeout(command_str, deadline.as_secs()));
            }
        };

        let exit_code = output.status.code().unwrap_or(-1);
        let result = CommandOutput {
            exit_code,
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            success: output.status.success(),
        };
        trace!("'{}' exited with {}", command_str, result.exit_code);
        Ok(result)
    }

    /// Run and map a non-zero exit to a classified engine error
    async fn invoke(&self, operation: &str, args: Vec<String>) -> Result<CommandOutput> {
        let output = self.run(&args).await?;
        if output.success {
            return Ok(output);
        }
        Err(classify_failure(operation, &output.stderr))
    }

    fn label_args(labels: &Labels) -> Vec<String> {
        labels
            .iter()
            .flat_map(|(k, v)| ["--label".to_string(), format!("{k}={v}")])
            .collect()
    }

    fn filter_args(filters: &ListFilters) -> Vec<String> {
        filters
            .selectors()
            .flat_map(|selector| ["--filter".to_string(), format!("label={selector}")])
            .collect()
    }
}

/// Classify a podman failure by its stderr text
fn classify_failure(operation: &str, stderr: &str) -> Error {
    let lower = stderr.to_lowercase();
    let name = operation.split_whitespace().last().unwrap_or(operation);
    if lower.contains("no such") || lower.contains("not found") || lower.contains("no secret") {
        let kind = operation.split_whitespace().next().unwrap_or("object");
        return Error::not_found(kind, name);
    }
    if lower.contains("already exists")
        || lower.contains("already in use")
        || lower.contains("name is in use")
    {
        let kind = operation.split_whitespace().next().unwrap_or("object");
        return Error::already_exists(kind, name);
    }
    Error::engine(operation, stderr.trim())
}

// Partial podman JSON shapes; only the fields we read.

#[derive(Debug, Deserialize)]
struct PsEntry {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Names", default)]
    names: Vec<String>,
    #[serde(rename = "Image", default)]
    image: String,
    #[serde(rename = "Labels", default)]
    labels: Option<Labels>,
    #[serde(rename = "State", default)]
    state: String,
}

#[derive(Debug, Deserialize)]
struct InspectEntry {
    #[serde(rename = "Id")]
    id: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Config")]
    config: InspectConfig,
    #[serde(rename = "HostConfig", default)]
    host_config: Option<InspectHostConfig>,
    #[serde(rename = "Mounts", default)]
    mounts: Vec<InspectMount>,
    #[serde(rename = "NetworkSettings", default)]
    network_settings: Option<InspectNetworkSettings>,
    #[serde(rename = "State", default)]
    state: Option<InspectState>,
}

#[derive(Debug, Deserialize)]
struct InspectConfig {
    #[serde(rename = "Image", default)]
    image: String,
    #[serde(rename = "Entrypoint", default)]
    entrypoint: Option<Vec<String>>,
    #[serde(rename = "Cmd", default)]
    cmd: Option<Vec<String>>,
    #[serde(rename = "Env", default)]
    env: Vec<String>,
    #[serde(rename = "WorkingDir", default)]
    working_dir: Option<String>,
    #[serde(rename = "User", default)]
    user: Option<String>,
    #[serde(rename = "Labels", default)]
    labels: Labels,
}

#[derive(Debug, Deserialize)]
struct InspectHostConfig {
    #[serde(rename = "RestartPolicy", default)]
    restart_policy: Option<InspectRestartPolicy>,
    #[serde(rename = "PortBindings", default)]
    port_bindings: BTreeMap<String, Option<Vec<InspectPortBinding>>>,
}

#[derive(Debug, Deserialize)]
struct InspectPortBinding {
    #[serde(rename = "HostPort", default)]
    host_port: String,
}

#[derive(Debug, Deserialize)]
struct InspectRestartPolicy {
    #[serde(rename = "Name", default)]
    name: String,
}

#[derive(Debug, Deserialize)]
struct InspectMount {
    #[serde(rename = "Type", default)]
    mount_type: String,
    #[serde(rename = "Name", default)]
    name: Option<String>,
    #[serde(rename = "Source", default)]
    source: String,
    #[serde(rename = "Destination", default)]
    destination: String,
    #[serde(rename = "RW", default)]
    rw: bool,
    #[serde(rename = "Options", default)]
    options: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct InspectNetworkSettings {
    #[serde(rename = "Networks", default)]
    networks: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct InspectState {
    #[serde(rename = "Status", default)]
    status: String,
    #[serde(rename = "ExitCode", default)]
    exit_code: i32,
}

#[derive(Debug, Deserialize)]
struct NetworkInspectEntry {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Id", default)]
    id: String,
    #[serde(rename = "Driver", default)]
    driver: String,
    #[serde(rename = "Subnets", default)]
    subnets: Vec<NetworkSubnet>,
    #[serde(rename = "Options", default)]
    options: BTreeMap<String, String>,
    #[serde(rename = "Labels", default)]
    labels: Labels,
}

#[derive(Debug, Deserialize)]
struct NetworkSubnet {
    #[serde(rename = "Subnet", default)]
    subnet: Option<String>,
    #[serde(rename = "Gateway", default)]
    gateway: Option<String>,
}

#[derive(Debug, Deserialize)]
struct VolumeEntry {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Driver", default)]
    driver: String,
    #[serde(rename = "Mountpoint", default)]
    mountpoint: Option<String>,
    #[serde(rename = "Options", default)]
    options: Option<BTreeMap<String, String>>,
    #[serde(rename = "Labels", default)]
    labels: Option<Labels>,
}

#[derive(Debug, Deserialize)]
struct SecretEntry {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Spec")]
    spec: SecretSpecEntry,
}

#[derive(Debug, Deserialize)]
struct SecretSpecEntry {
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Labels", default)]
    labels: Labels,
}

fn parse_state(status: &str, exit_code: i32) -> ContainerState {
    match status {
        "created" | "configured" | "initialized" => ContainerState::Created,
        "running" => ContainerState::Running,
        "paused" => ContainerState::Paused,
        "exited" | "stopped" => ContainerState::Exited(exit_code),
        _ => ContainerState::Unknown,
    }
}

fn record_from_inspect(entry: InspectEntry) -> ContainerRecord {
    let labels = entry.config.labels;
    // Prefer the declarative mount set stamped at create time
    let mounts: Vec<MountSpec> = labels
        .get(MOUNTS_LABEL)
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_else(|| {
            entry
                .mounts
                .into_iter()
                .map(|m| MountSpec {
                    named: m.mount_type == "volume",
                    volume_name: m.name,
                    source: m.source,
                    target: m.destination,
                    read_only: !m.rw,
                    options: m.options,
                    sub_path: None,
                    declared_options: None,
                })
                .collect()
        });
    let secrets = labels
        .get(SECRETS_LABEL)
        .and_then(|raw| serde_json::from_str(raw).ok())
        .unwrap_or_default();
    let env = entry
        .config
        .env
        .iter()
        .filter_map(|pair| pair.split_once('='))
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    let state = entry
        .state
        .map_or(ContainerState::Unknown, |s| parse_state(&s.status, s.exit_code));

    let (restart_policy, ports) = match entry.host_config {
        Some(host) => {
            let ports = host
                .port_bindings
                .iter()
                .filter_map(|(spec, bindings)| {
                    let (port, protocol) = spec.split_once('/')?;
                    let container_port: u16 = port.parse().ok()?;
                    let host_port = bindings
                        .as_ref()
                        .and_then(|b| b.first())
                        .and_then(|b| b.host_port.parse().ok());
                    Some(PortBinding {
                        container_port,
                        host_port,
                        protocol: protocol.to_string(),
                    })
                })
                .collect();
            (
                host.restart_policy.map(|p| p.name).filter(|n| !n.is_empty()),
                ports,
            )
        }
        None => (None, Vec::new()),
    };

    ContainerRecord {
        id: entry.id,
        name: entry.name.trim_start_matches('/').to_string(),
        image: entry.config.image,
        command: entry.config.entrypoint.unwrap_or_default(),
        args: entry.config.cmd.unwrap_or_default(),
        env,
        working_dir: entry.config.working_dir.filter(|d| !d.is_empty()),
        user: entry.config.user.filter(|u| !u.is_empty()),
        ports,
        mounts,
        networks: entry
            .network_settings
            .map(|n| n.networks.into_keys().collect())
            .unwrap_or_default(),
        secrets,
        restart_policy,
        labels,
        state,
    }
}

#[async_trait::async_trait]
impl Engine for PodmanEngine {
    async fn ping(&self) -> Result<()> {
        let output = self
            .run(&["version".to_string(), "--format".to_string(), "json".to_string()])
            .await?;
        if output.success {
            Ok(())
        } else {
            Err(Error::engine(
                "ping",
                format!("engine unreachable at {}: {}", self.url, output.stderr.trim()),
            ))
        }
    }

    async fn create_container(
        &self,
        config: &ContainerConfig,
    ) -> Result<ContainerCreateResponse> {
        let mut args = vec!["create".to_string(), "--name".to_string(), config.name.clone()];

        let mut labels = config.labels.clone();
        labels.insert(
            MOUNTS_LABEL.to_string(),
            serde_json::to_string(&config.mounts)?,
        );
        if !config.secrets.is_empty() {
            labels.insert(
                SECRETS_LABEL.to_string(),
                serde_json::to_string(&config.secrets)?,
            );
        }
        args.extend(Self::label_args(&labels));

        for (key, value) in &config.env {
            args.push("--env".to_string());
            args.push(format!("{key}={value}"));
        }
        if let Some(dir) = &config.working_dir {
            args.push("--workdir".to_string());
            args.push(dir.clone());
        }
        if let Some(user) = &config.user {
            args.push("--user".to_string());
            args.push(user.clone());
        }
        for port in &config.ports {
            args.push("--publish".to_string());
            let spec = match port.host_port {
                Some(host) => format!("{host}:{}", port.container_port),
                None => format!("{}", port.container_port),
            };
            args.push(format!("{spec}/{}", port.protocol));
        }
        for mount in &config.mounts {
            args.push("--volume".to_string());
            let mut spec = format!("{}:{}", mount.source, mount.target);
            if !mount.options.is_empty() {
                spec.push(':');
                spec.push_str(&mount.options.join(","));
            }
            args.push(spec);
        }
        if let Some(network) = config.networks.first() {
            args.push("--network".to_string());
            args.push(network.clone());
        }
        for secret in &config.secrets {
            args.push("--secret".to_string());
            let mut spec = secret.name.clone();
            if secret.as_env {
                spec.push_str(",type=env");
            } else if let Some(target) = &secret.target {
                spec.push_str(&format!(",type=mount,target={target}"));
            }
            args.push(spec);
        }
        if config.privileged {
            args.push("--privileged".to_string());
        }
        for cap in &config.cap_add {
            args.push("--cap-add".to_string());
            args.push(cap.clone());
        }
        for cap in &config.cap_drop {
            args.push("--cap-drop".to_string());
            args.push(cap.clone());
        }
        if let Some(policy) = &config.restart_policy {
            args.push("--restart".to_string());
            args.push(policy.clone());
        }
        if let Some(health) = &config.health {
            args.push("--health-cmd".to_string());
            args.push(health.test.join(" "));
            if let Some(interval) = health.interval_seconds {
                args.push("--health-interval".to_string());
                args.push(format!("{interval}s"));
            }
            if let Some(timeout_s) = health.timeout_seconds {
                args.push("--health-timeout".to_string());
                args.push(format!("{timeout_s}s"));
            }
            if let Some(retries) = health.retries {
                args.push("--health-retries".to_string());
                args.push(retries.to_string());
            }
            if let Some(start) = health.start_period_seconds {
                args.push("--health-start-period".to_string());
                args.push(format!("{start}s"));
            }
        }
        if !config.command.is_empty() {
            args.push("--entrypoint".to_string());
            args.push(serde_json::to_string(&config.command)?);
        }
        args.push(config.image.clone());
        args.extend(config.args.iter().cloned());

        let output = self.invoke(&format!("container create {}", config.name), args).await?;
        let id = output.stdout.trim().to_string();

        // Secondary networks attach after creation
        for network in config.networks.iter().skip(1) {
            self.connect_network(network, &config.name).await?;
        }

        Ok(ContainerCreateResponse {
            id,
            warnings: Vec::new(),
        })
    }

    async fn start_container(&self, name: &str) -> Result<()> {
        self.invoke(&format!("container start {name}"), vec!["start".to_string(), name.to_string()])
            .await?;
        Ok(())
    }

    async fn stop_container(&self, name: &str, stop_timeout: Duration) -> Result<()> {
        let args = vec![
            "stop".to_string(),
            "--time".to_string(),
            stop_timeout.as_secs().to_string(),
            name.to_string(),
        ];
        let output = self
            .run_with(&args, None, stop_timeout + Duration::from_secs(5))
            .await?;
        if output.success {
            Ok(())
        } else {
            Err(classify_failure(&format!("container stop {name}"), &output.stderr))
        }
    }

    async fn remove_container(&self, name: &str, force: bool) -> Result<()> {
        let mut args = vec!["rm".to_string()];
        if force {
            args.push("--force".to_string());
        }
        args.push(name.to_string());
        self.invoke(&format!("container rm {name}"), args).await?;
        Ok(())
    }

    async fn list_containers(
        &self,
        filters: &ListFilters,
        all: bool,
    ) -> Result<Vec<ContainerRecord>> {
        let mut args = vec!["ps".to_string()];
        if all {
            args.push("--all".to_string());
        }
        args.extend(Self::filter_args(filters));
        args.push("--format".to_string());
        args.push("json".to_string());

        let output = self.invoke("container list", args).await?;
        let entries: Vec<PsEntry> = serde_json::from_str(&output.stdout)?;
        Ok(entries
            .into_iter()
            .map(|entry| ContainerRecord {
                id: entry.id,
                name: entry.names.first().cloned().unwrap_or_default(),
                image: entry.image,
                command: Vec::new(),
                args: Vec::new(),
                env: BTreeMap::new(),
                working_dir: None,
                user: None,
                ports: Vec::new(),
                mounts: Vec::new(),
                networks: Vec::new(),
                secrets: Vec::new(),
                restart_policy: None,
                labels: entry.labels.unwrap_or_default(),
                state: parse_state(&entry.state, 0),
            })
            .collect())
    }

    async fn inspect_container(&self, name: &str) -> Result<ContainerRecord> {
        let args = vec![
            "inspect".to_string(),
            "--type".to_string(),
            "container".to_string(),
            "--format".to_string(),
            "json".to_string(),
            name.to_string(),
        ];
        let output = self.invoke(&format!("container inspect {name}"), args).await?;
        let mut entries: Vec<InspectEntry> = serde_json::from_str(&output.stdout)?;
        let entry = entries
            .pop()
            .ok_or_else(|| Error::not_found("container", name))?;
        Ok(record_from_inspect(entry))
    }

    async fn pull_image(&self, reference: &str) -> Result<ImageRecord> {
        let args = vec![
            "pull".to_string(),
            "--quiet".to_string(),
            reference.to_string(),
        ];
        // Pulls can legitimately take a while
        let output = self
            .run_with(&args, None, Duration::from_secs(600))
            .await?;
        if !output.success {
            return Err(classify_failure(&format!("image pull {reference}"), &output.stderr));
        }
        Ok(ImageRecord {
            id: output.stdout.trim().to_string(),
            reference: reference.to_string(),
        })
    }

    async fn get_image(&self, reference: &str) -> Result<ImageRecord> {
        let args = vec![
            "image".to_string(),
            "inspect".to_string(),
            "--format".to_string(),
            "{{.Id}}".to_string(),
            reference.to_string(),
        ];
        let output = self.invoke(&format!("image inspect {reference}"), args).await?;
        Ok(ImageRecord {
            id: output.stdout.trim().to_string(),
            reference: reference.to_string(),
        })
    }

    async fn create_network(&self, config: &NetworkConfig) -> Result<NetworkRecord> {
        let mut args = vec!["network".to_string(), "create".to_string()];
        args.push("--driver".to_string());
        args.push(config.driver.clone());
        if let Some(subnet) = &config.subnet {
            args.push("--subnet".to_string());
            args.push(subnet.clone());
        }
        if let Some(gateway) = &config.gateway {
            args.push("--gateway".to_string());
            args.push(gateway.clone());
        }
        for (key, value) in &config.options {
            args.push("--opt".to_string());
            args.push(format!("{key}={value}"));
        }
        args.extend(Self::label_args(&config.labels));
        args.push(config.name.clone());

        self.invoke(&format!("network create {}", config.name), args).await?;
        self.inspect_network(&config.name).await
    }

    async fn remove_network(&self, name: &str) -> Result<()> {
        self.invoke(
            &format!("network rm {name}"),
            vec!["network".to_string(), "rm".to_string(), name.to_string()],
        )
        .await?;
        Ok(())
    }

    async fn list_networks(&self, filters: &ListFilters) -> Result<Vec<NetworkRecord>> {
        let mut args = vec!["network".to_string(), "ls".to_string()];
        args.extend(Self::filter_args(filters));
        args.push("--format".to_string());
        args.push("json".to_string());

        let output = self.invoke("network list", args).await?;
        let entries: Vec<NetworkInspectEntry> = serde_json::from_str(&output.stdout)?;
        Ok(entries.into_iter().map(network_record).collect())
    }

    async fn inspect_network(&self, name: &str) -> Result<NetworkRecord> {
        let args = vec![
            "network".to_string(),
            "inspect".to_string(),
            "--format".to_string(),
            "json".to_string(),
            name.to_string(),
        ];
        let output = self.invoke(&format!("network inspect {name}"), args).await?;
        let mut entries: Vec<NetworkInspectEntry> = serde_json::from_str(&output.stdout)?;
        entries
            .pop()
            .map(network_record)
            .ok_or_else(|| Error::not_found("network", name))
    }

    async fn connect_network(&self, network: &str, container: &str) -> Result<()> {
        self.invoke(
            &format!("network connect {network}"),
            vec![
                "network".to_string(),
                "connect".to_string(),
                network.to_string(),
                container.to_string(),
            ],
        )
        .await?;
        Ok(())
    }

    async fn disconnect_network(&self, network: &str, container: &str) -> Result<()> {
        self.invoke(
            &format!("network disconnect {network}"),
            vec![
                "network".to_string(),
                "disconnect".to_string(),
                network.to_string(),
                container.to_string(),
            ],
        )
        .await?;
        Ok(())
    }

    async fn create_volume(&self, config: &VolumeConfig) -> Result<VolumeRecord> {
        let mut args = vec!["volume".to_string(), "create".to_string()];
        if let Some(driver) = &config.driver {
            args.push("--driver".to_string());
            args.push(driver.clone());
        }
        for (key, value) in &config.options {
            args.push("--opt".to_string());
            args.push(format!("{key}={value}"));
        }
        args.extend(Self::label_args(&config.labels));
        args.push(config.name.clone());

        self.invoke(&format!("volume create {}", config.name), args).await?;
        self.inspect_volume(&config.name).await
    }

    async fn remove_volume(&self, name: &str) -> Result<()> {
        self.invoke(
            &format!("volume rm {name}"),
            vec!["volume".to_string(), "rm".to_string(), name.to_string()],
        )
        .await?;
        Ok(())
    }

    async fn list_volumes(&self, filters: &ListFilters) -> Result<Vec<VolumeRecord>> {
        let mut args = vec!["volume".to_string(), "ls".to_string()];
        args.extend(Self::filter_args(filters));
        args.push("--format".to_string());
        args.push("json".to_string());

        let output = self.invoke("volume list", args).await?;
        let entries: Vec<VolumeEntry> = serde_json::from_str(&output.stdout)?;
        Ok(entries.into_iter().map(volume_record).collect())
    }

    async fn inspect_volume(&self, name: &str) -> Result<VolumeRecord> {
        let args = vec![
            "volume".to_string(),
            "inspect".to_string(),
            "--format".to_string(),
            "json".to_string(),
            name.to_string(),
        ];
        let output = self.invoke(&format!("volume inspect {name}"), args).await?;
        let mut entries: Vec<VolumeEntry> = serde_json::from_str(&output.stdout)?;
        entries
            .pop()
            .map(volume_record)
            .ok_or_else(|| Error::not_found("volume", name))
    }

    async fn create_secret(&self, config: &SecretConfig) -> Result<SecretRecord> {
        let mut args = vec!["secret".to_string(), "create".to_string()];
        let mut labels = config.labels.clone();
        let keys: Vec<String> = config.data.keys().cloned().collect();
        labels.insert(SECRET_KEYS_LABEL.to_string(), keys.join(","));
        args.extend(Self::label_args(&labels));
        args.push(config.name.clone());
        args.push("-".to_string());

        // Engine secrets hold one payload; the key map ships as JSON
        let payload: BTreeMap<&String, String> = config
            .data
            .iter()
            .map(|(k, v)| (k, base64_encode(v)))
            .collect();
        let stdin = serde_json::to_vec(&payload)?;

        let output = self
            .run_with(&args, Some(stdin), self.default_timeout)
            .await?;
        if !output.success {
            return Err(classify_failure(&format!("secret create {}", config.name), &output.stderr));
        }
        Ok(SecretRecord {
            id: output.stdout.trim().to_string(),
            name: config.name.clone(),
            secret_type: config.secret_type.clone(),
            keys,
            labels,
        })
    }

    async fn update_secret(&self, config: &SecretConfig) -> Result<SecretRecord> {
        // No atomic replacement; remove (tolerating absence) then re-create
        match self.remove_secret(&config.name).await {
            Ok(()) | Err(Error::NotFound { .. }) => {}
            Err(err) => return Err(err),
        }
        self.create_secret(config).await
    }

    async fn remove_secret(&self, name: &str) -> Result<()> {
        self.invoke(
            &format!("secret rm {name}"),
            vec!["secret".to_string(), "rm".to_string(), name.to_string()],
        )
        .await?;
        Ok(())
    }

    async fn list_secrets(&self, filters: &ListFilters) -> Result<Vec<SecretRecord>> {
        let mut args = vec!["secret".to_string(), "ls".to_string()];
        args.extend(Self::filter_args(filters));
        args.push("--format".to_string());
        args.push("json".to_string());

        let output = self.invoke("secret list", args).await?;
        let entries: Vec<SecretEntry> = serde_json::from_str(&output.stdout)?;
        Ok(entries.into_iter().map(secret_record).collect())
    }

    async fn inspect_secret(&self, name: &str) -> Result<SecretRecord> {
        let args = vec![
            "secret".to_string(),
            "inspect".to_string(),
            name.to_string(),
        ];
        let output = self.invoke(&format!("secret inspect {name}"), args).await?;
        let mut entries: Vec<SecretEntry> = serde_json::from_str(&output.stdout)?;
        entries
            .pop()
            .map(secret_record)
            .ok_or_else(|| Error::not_found("secret", name))
    }
}

fn base64_encode(data: &[u8]) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode(data)
}

fn network_record(entry: NetworkInspectEntry) -> NetworkRecord {
    let (subnet, gateway) = entry
        .subnets
        .first()
        .map(|s| (s.subnet.clone(), s.gateway.clone()))
        .unwrap_or((None, None));
    NetworkRecord {
        id: entry.id,
        name: entry.name,
        driver: entry.driver,
        subnet,
        gateway,
        options: entry.options,
        labels: entry.labels,
    }
}

fn volume_record(entry: VolumeEntry) -> VolumeRecord {
    VolumeRecord {
        name: entry.name,
        driver: entry.driver,
        mountpoint: entry.mountpoint,
        options: entry.options.unwrap_or_default(),
        labels: entry.labels.unwrap_or_default(),
    }
}

fn secret_record(entry: SecretEntry) -> SecretRecord {
    let keys = entry
        .spec
        .labels
        .get(SECRET_KEYS_LABEL)
        .map(|raw| raw.split(',').map(str::to_string).collect())
        .unwrap_or_default();
    SecretRecord {
        id: entry.id,
        name: entry.spec.name,
        secret_type: "opaque".to_string(),
        keys,
        labels: entry.spec.labels,
    }
}
