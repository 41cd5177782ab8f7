//! 环境变量配置加载
//!
//! 编排器自身的运行参数（不是被部署服务的 `.env`，后者见 `profile`）。

use std::env;
use std::path::PathBuf;
use std::time::Duration;
use tracing::warn;

/// 编排器配置
#[derive(Clone, Debug)]
pub struct OrchestratorConfig {
    /// 项目名（容器名前缀与标签值）
    pub project: String,
    /// 服务 `.env` 文件路径
    pub env_file: PathBuf,
    /// 持久化目录根
    pub data_root: PathBuf,
    /// 隔离网络配置
    pub network: NetworkConfig,
    /// 健康检查配置
    pub health: HealthConfig,
    /// 自定义拓扑文件（未设置时使用内置拓扑）
    pub topology_file: Option<PathBuf>,
    /// docker 可执行文件
    pub docker_bin: String,
}

/// 网络配置
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NetworkConfig {
    pub name: String,
    pub subnet: String,
}

/// 健康检查配置
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct HealthConfig {
    /// 单个服务最长等待时间
    pub timeout: Duration,
    /// 探测间隔
    pub poll_interval: Duration,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(constants::DEFAULT_HEALTH_TIMEOUT_SECS),
            poll_interval: Duration::from_secs(constants::DEFAULT_POLL_INTERVAL_SECS),
        }
    }
}

impl OrchestratorConfig {
    /// 从环境变量加载配置
    pub fn from_env() -> Self {
        let project = env::var("STACK_PROJECT")
            .ok()
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| constants::DEFAULT_PROJECT.to_string());

        let env_file = env::var("STACK_ENV_FILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(".env"));

        let data_root = env::var("STACK_DATA_ROOT")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("./data"));

        let network = NetworkConfig {
            name: env::var("STACK_NETWORK_NAME")
                .unwrap_or_else(|_| constants::DEFAULT_NETWORK_NAME.to_string()),
            subnet: env::var("STACK_NETWORK_SUBNET")
                .unwrap_or_else(|_| constants::DEFAULT_NETWORK_SUBNET.to_string()),
        };

        let health = HealthConfig {
            timeout: Duration::from_secs(parse_secs(
                "STACK_HEALTH_TIMEOUT_SECS",
                constants::DEFAULT_HEALTH_TIMEOUT_SECS,
            )),
            poll_interval: Duration::from_secs(parse_secs(
                "STACK_POLL_INTERVAL_SECS",
                constants::DEFAULT_POLL_INTERVAL_SECS,
            )),
        };

        let topology_file = env::var("STACK_TOPOLOGY_FILE")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from);

        let docker_bin = env::var("STACK_DOCKER_BIN").unwrap_or_else(|_| "docker".to_string());

        Self {
            project,
            env_file,
            data_root,
            network,
            health,
            topology_file,
            docker_bin,
        }
    }

    /// 服务对应的容器名
    pub fn container_name(&self, service: &str) -> String {
        format!("{}-{}", self.project, service)
    }
}

/// 解析秒数，非法值或 0 回退到默认值
fn parse_secs(key: &str, default: u64) -> u64 {
    match env::var(key) {
        Ok(v) => match v.trim().parse::<u64>() {
            Ok(secs) if secs > 0 => secs,
            _ => {
                warn!(key, value = %v, default, "Ignoring invalid duration");
                default
            }
        },
        Err(_) => default,
    }
}

/// 常量
pub mod constants {
    pub const DEFAULT_PROJECT: &str = "ai-stack";

    pub const DEFAULT_NETWORK_NAME: &str = "ai-stack-network";

    pub const DEFAULT_NETWORK_SUBNET: &str = "172.28.0.0/16";

    /// 健康检查超时（秒）
    pub const DEFAULT_HEALTH_TIMEOUT_SECS: u64 = 60;

    /// 探测间隔（秒）
    pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 2;

    /// 单次 HTTP 探测超时（秒）
    pub const PROBE_REQUEST_TIMEOUT_SECS: u64 = 5;

    /// docker 命令超时（秒），镜像拉取可能很慢
    pub const DOCKER_COMMAND_TIMEOUT_SECS: u64 = 600;

    /// 标签前缀
    pub const LABEL_MANAGED: &str = "io.stack-orchestrator.managed";
    pub const LABEL_PROJECT: &str = "io.stack-orchestrator.project";
    pub const LABEL_SPEC_HASH: &str = "io.stack-orchestrator.spec-hash";

    /// 版本号
    pub const VERSION: &str = env!("CARGO_PKG_VERSION");
}
