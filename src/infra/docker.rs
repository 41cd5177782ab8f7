//! 容器运行时
//!
//! `ContainerRuntime` 抽象出编排器需要的全部 docker 操作；
//! `DockerCli` 通过 docker 命令行实现。

use async_trait::async_trait;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use super::command::{CommandError, CommandRunner};

/// 运行时错误
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("{resource} is in use: {detail}")]
    InUse { resource: String, detail: String },

    #[error("unexpected docker output for {what}: {detail}")]
    Parse { what: String, detail: String },
}

/// 网络信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkInfo {
    pub name: String,
    pub labels: BTreeMap<String, String>,
    pub subnets: Vec<String>,
    /// 已连接的容器名
    pub containers: Vec<String>,
}

/// 容器信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerInfo {
    pub name: String,
    pub image: String,
    pub running: bool,
    /// docker 状态（running / exited / created ...）
    pub status: String,
    pub labels: BTreeMap<String, String>,
}

/// 容器内命令执行结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecOutcome {
    pub success: bool,
    pub detail: String,
}

/// 启动容器所需的全部参数（模板已展开）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerLaunch {
    pub name: String,
    pub image: String,
    pub network: String,
    /// 网络内的主机名
    pub alias: String,
    pub labels: BTreeMap<String, String>,
    pub env: BTreeMap<String, String>,
    /// (宿主机目录, 容器内路径)
    pub volumes: Vec<(PathBuf, String)>,
    pub ports: Vec<String>,
    pub command: Vec<String>,
}

impl ContainerLaunch {
    /// 启动参数的摘要，用于判断容器是否需要重建
    ///
    /// 不包含 labels（摘要本身会作为 label 写入）
    pub fn spec_hash(&self) -> String {
        let mut hasher = Sha256::new();
        let mut field = |name: &str, value: &str| {
            hasher.update(name.as_bytes());
            hasher.update([0u8]);
            hasher.update(value.as_bytes());
            hasher.update([0xffu8]);
        };
        field("image", &self.image);
        field("network", &self.network);
        field("alias", &self.alias);
        for (k, v) in &self.env {
            field("env", &format!("{}={}", k, v));
        }
        for (host, container) in &self.volumes {
            field("volume", &format!("{}:{}", host.display(), container));
        }
        for port in &self.ports {
            field("port", port);
        }
        for arg in &self.command {
            field("command", arg);
        }
        format!("{:x}", hasher.finalize())
    }

    /// `docker run` 参数
    pub fn run_args(&self) -> Vec<String> {
        let mut args: Vec<String> = vec![
            "run".into(),
            "-d".into(),
            "--name".into(),
            self.name.clone(),
            "--network".into(),
            self.network.clone(),
            "--network-alias".into(),
            self.alias.clone(),
            "--restart".into(),
            "unless-stopped".into(),
        ];
        for (k, v) in &self.labels {
            args.push("--label".into());
            args.push(format!("{}={}", k, v));
        }
        for (k, v) in &self.env {
            args.push("-e".into());
            args.push(format!("{}={}", k, v));
        }
        for (host, container) in &self.volumes {
            args.push("-v".into());
            args.push(format!("{}:{}", host.display(), container));
        }
        for port in &self.ports {
            args.push("-p".into());
            args.push(port.clone());
        }
        args.push(self.image.clone());
        args.extend(self.command.iter().cloned());
        args
    }
}

/// 容器运行时抽象
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    async fn inspect_network(&self, name: &str) -> Result<Option<NetworkInfo>, RuntimeError>;

    async fn create_network(
        &self,
        name: &str,
        subnet: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), RuntimeError>;

    /// 仍有容器连接时返回 `RuntimeError::InUse`
    async fn remove_network(&self, name: &str) -> Result<(), RuntimeError>;

    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerInfo>, RuntimeError>;

    async fn run_container(&self, launch: &ContainerLaunch) -> Result<(), RuntimeError>;

    async fn start_container(&self, name: &str) -> Result<(), RuntimeError>;

    async fn stop_container(&self, name: &str) -> Result<(), RuntimeError>;

    /// 强制删除（不存在时不报错）
    async fn remove_container(&self, name: &str) -> Result<(), RuntimeError>;

    async fn exec(&self, name: &str, command: &[String]) -> Result<ExecOutcome, RuntimeError>;
}

/// 基于 docker 命令行的运行时
#[derive(Clone, Debug)]
pub struct DockerCli {
    bin: String,
    timeout: Duration,
}

impl DockerCli {
    pub fn new(bin: impl Into<String>, timeout: Duration) -> Self {
        Self {
            bin: bin.into(),
            timeout,
        }
    }

    async fn checked(&self, args: Vec<String>) -> Result<String, RuntimeError> {
        Ok(CommandRunner::run_checked(&self.bin, &args, self.timeout).await?)
    }

    /// `inspect` 类命令：对象不存在时返回 None
    async fn inspect_json(&self, args: Vec<String>) -> Result<Option<String>, RuntimeError> {
        match CommandRunner::run_checked(&self.bin, &args, self.timeout).await {
            Ok(stdout) => Ok(Some(stdout)),
            Err(e) if is_not_found(e.stderr()) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn is_not_found(stderr: &str) -> bool {
    let lower = stderr.to_lowercase();
    lower.contains("no such") || lower.contains("not found")
}

fn strings(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawNetwork {
    name: String,
    #[serde(default)]
    labels: Option<HashMap<String, String>>,
    #[serde(rename = "IPAM", default)]
    ipam: Option<RawIpam>,
    #[serde(default)]
    containers: Option<HashMap<String, RawEndpoint>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawIpam {
    #[serde(default)]
    config: Option<Vec<RawIpamConfig>>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawIpamConfig {
    #[serde(default)]
    subnet: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawEndpoint {
    name: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawContainer {
    name: String,
    state: RawState,
    config: RawConfig,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawState {
    status: String,
    running: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct RawConfig {
    image: String,
    #[serde(default)]
    labels: Option<HashMap<String, String>>,
}

fn parse_network(json: &str) -> Result<NetworkInfo, RuntimeError> {
    let raw: RawNetwork = serde_json::from_str(json.trim()).map_err(|e| RuntimeError::Parse {
        what: "network inspect".to_string(),
        detail: e.to_string(),
    })?;

    let mut containers: Vec<String> = raw
        .containers
        .unwrap_or_default()
        .into_values()
        .map(|e| e.name)
        .collect();
    containers.sort();

    Ok(NetworkInfo {
        name: raw.name,
        labels: raw.labels.unwrap_or_default().into_iter().collect(),
        subnets: raw
            .ipam
            .and_then(|i| i.config)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|c| c.subnet)
            .collect(),
        containers,
    })
}

fn parse_container(json: &str) -> Result<ContainerInfo, RuntimeError> {
    let raw: RawContainer = serde_json::from_str(json.trim()).map_err(|e| RuntimeError::Parse {
        what: "container inspect".to_string(),
        detail: e.to_string(),
    })?;

    Ok(ContainerInfo {
        // docker 在名字前加 `/`
        name: raw.name.trim_start_matches('/').to_string(),
        image: raw.config.image,
        running: raw.state.running,
        status: raw.state.status,
        labels: raw.config.labels.unwrap_or_default().into_iter().collect(),
    })
}

#[async_trait]
impl ContainerRuntime for DockerCli {
    async fn inspect_network(&self, name: &str) -> Result<Option<NetworkInfo>, RuntimeError> {
        let json = self
            .inspect_json(strings(&["network", "inspect", name, "--format", "{{json .}}"]))
            .await?;
        json.map(|j| parse_network(&j)).transpose()
    }

    async fn create_network(
        &self,
        name: &str,
        subnet: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), RuntimeError> {
        let mut args = strings(&["network", "create", "--driver", "bridge", "--subnet", subnet]);
        for (k, v) in labels {
            args.push("--label".into());
            args.push(format!("{}={}", k, v));
        }
        args.push(name.to_string());
        self.checked(args).await.map(|_| ())
    }

    async fn remove_network(&self, name: &str) -> Result<(), RuntimeError> {
        match CommandRunner::run_checked(&self.bin, &strings(&["network", "rm", name]), self.timeout)
            .await
        {
            Ok(_) => Ok(()),
            Err(e) if e.stderr().contains("active endpoints") => Err(RuntimeError::InUse {
                resource: format!("network {}", name),
                detail: e.stderr().to_string(),
            }),
            Err(e) if is_not_found(e.stderr()) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerInfo>, RuntimeError> {
        let json = self
            .inspect_json(strings(&["container", "inspect", name, "--format", "{{json .}}"]))
            .await?;
        json.map(|j| parse_container(&j)).transpose()
    }

    async fn run_container(&self, launch: &ContainerLaunch) -> Result<(), RuntimeError> {
        self.checked(launch.run_args()).await.map(|_| ())
    }

    async fn start_container(&self, name: &str) -> Result<(), RuntimeError> {
        self.checked(strings(&["start", name])).await.map(|_| ())
    }

    async fn stop_container(&self, name: &str) -> Result<(), RuntimeError> {
        match self.checked(strings(&["stop", name])).await {
            Err(RuntimeError::Command(e)) if is_not_found(e.stderr()) => Ok(()),
            other => other.map(|_| ()),
        }
    }

    async fn remove_container(&self, name: &str) -> Result<(), RuntimeError> {
        match self.checked(strings(&["rm", "-f", name])).await {
            Err(RuntimeError::Command(e)) if is_not_found(e.stderr()) => Ok(()),
            other => other.map(|_| ()),
        }
    }

    async fn exec(&self, name: &str, command: &[String]) -> Result<ExecOutcome, RuntimeError> {
        let mut args = strings(&["exec", name]);
        args.extend(command.iter().cloned());
        let output = CommandRunner::run(&self.bin, &args, self.timeout).await?;
        let detail = if output.status.success() {
            String::new()
        } else {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            if stderr.is_empty() {
                format!("exit code {:?}", output.status.code())
            } else {
                stderr
            }
        };
        Ok(ExecOutcome {
            success: output.status.success(),
            detail,
        })
    }
}
