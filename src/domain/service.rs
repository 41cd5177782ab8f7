//! 服务描述相关领域模型

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// 可部署单元
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ServiceSpec {
    /// 服务名（同时作为网络别名）
    pub name: String,
    /// 镜像引用
    pub image: String,
    /// 依赖的服务
    #[serde(default)]
    pub depends_on: BTreeSet<String>,
    /// 就绪探针
    pub probe: ReadinessProbe,
    /// 必须由 `.env` 提供的变量
    #[serde(default)]
    pub required_env: BTreeSet<String>,
    /// 容器环境变量，值中可使用 `${KEY}` 引用 `.env`
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// 端口发布（`host:container`）
    #[serde(default)]
    pub ports: Vec<String>,
    /// 持久化目录
    #[serde(default)]
    pub volumes: Vec<PersistentVolume>,
    /// 覆盖镜像默认命令
    #[serde(default)]
    pub command: Vec<String>,
    /// 是否对宿主机暴露（用户入口）
    #[serde(default)]
    pub public: bool,
    /// 对外访问地址模板
    #[serde(default)]
    pub endpoint: Option<String>,
    /// 覆盖全局健康检查超时
    #[serde(default)]
    pub health_timeout_secs: Option<u64>,
    /// 覆盖全局探测间隔
    #[serde(default)]
    pub poll_interval_secs: Option<u64>,
}

impl ServiceSpec {
    pub fn new(name: &str, image: &str, probe: ReadinessProbe) -> Self {
        Self {
            name: name.to_string(),
            image: image.to_string(),
            depends_on: BTreeSet::new(),
            probe,
            required_env: BTreeSet::new(),
            environment: BTreeMap::new(),
            ports: Vec::new(),
            volumes: Vec::new(),
            command: Vec::new(),
            public: false,
            endpoint: None,
            health_timeout_secs: None,
            poll_interval_secs: None,
        }
    }

    pub fn depends_on(mut self, deps: &[&str]) -> Self {
        self.depends_on.extend(deps.iter().map(|d| d.to_string()));
        self
    }

    pub fn require(mut self, keys: &[&str]) -> Self {
        self.required_env.extend(keys.iter().map(|k| k.to_string()));
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.environment.insert(key.to_string(), value.to_string());
        self
    }

    pub fn port(mut self, mapping: &str) -> Self {
        self.ports.push(mapping.to_string());
        self
    }

    pub fn volume(mut self, name: &str, container_path: &str) -> Self {
        self.volumes.push(PersistentVolume {
            name: name.to_string(),
            container_path: container_path.to_string(),
        });
        self
    }

    pub fn public_at(mut self, endpoint: &str) -> Self {
        self.public = true;
        self.endpoint = Some(endpoint.to_string());
        self
    }

    /// 所有可能包含 `${KEY}` 的模板字符串
    pub fn templates(&self) -> impl Iterator<Item = &str> {
        self.environment
            .values()
            .chain(self.ports.iter())
            .chain(self.command.iter())
            .chain(self.endpoint.iter())
            .map(String::as_str)
            .chain(self.probe.templates())
    }
}

/// 就绪探针
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReadinessProbe {
    /// 宿主机发起 HTTP GET，2xx 视为就绪
    Http { url: String },
    /// 在容器内执行命令，退出码 0 视为就绪
    Exec { command: Vec<String> },
    /// 容器进程存活即视为就绪
    Running,
}

impl ReadinessProbe {
    pub fn exec(command: &[&str]) -> Self {
        ReadinessProbe::Exec {
            command: command.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn http(url: &str) -> Self {
        ReadinessProbe::Http {
            url: url.to_string(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ReadinessProbe::Http { .. } => "http",
            ReadinessProbe::Exec { .. } => "exec",
            ReadinessProbe::Running => "running",
        }
    }

    fn templates(&self) -> Box<dyn Iterator<Item = &str> + '_> {
        match self {
            ReadinessProbe::Http { url } => Box::new(std::iter::once(url.as_str())),
            ReadinessProbe::Exec { command } => Box::new(command.iter().map(String::as_str)),
            ReadinessProbe::Running => Box::new(std::iter::empty()),
        }
    }
}

/// 持久化目录，只属于一个服务
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct PersistentVolume {
    /// 目录名（数据根目录下），跨升级保持不变
    pub name: String,
    /// 容器内挂载点
    pub container_path: String,
}
