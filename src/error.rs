//! 统一错误处理
//!
//! 按层划分错误类型：配置错误、基础设施错误、依赖超时、部分失败。
//! `OrchestratorError::exit_code` 为脚本调用提供区分度明确的退出码。

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

use crate::infra::RuntimeError;

/// 退出码
pub mod exit_codes {
    pub const SUCCESS: i32 = 0;
    pub const RUNTIME: i32 = 1;
    pub const CONFIGURATION: i32 = 2;
    pub const INFRASTRUCTURE: i32 = 3;
    pub const DEPENDENCY_TIMEOUT: i32 = 4;
    pub const PARTIAL_FAILURE: i32 = 5;
    pub const CANCELLED: i32 = 130;
}

/// 缺失的必需变量（以及需要它的服务）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingKey {
    pub key: String,
    pub services: Vec<String>,
}

impl std::fmt::Display for MissingKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (required by {})", self.key, self.services.join(", "))
    }
}

/// 配置错误：修复配置后重试
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("environment file not found: {}", .0.display())]
    MissingConfigFile(PathBuf),

    #[error("failed to read {}: {source}", .path.display())]
    Unreadable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid line {line} in environment file: {content:?}")]
    InvalidLine { line: usize, content: String },

    #[error("required keys missing: {}", join_display(.0))]
    MissingRequiredKey(Vec<MissingKey>),

    #[error("placeholder values still set for: {} (pass --accept-placeholders to proceed anyway)", .0.join(", "))]
    PlaceholderValueDetected(Vec<String>),

    #[error("invalid topology: {0}")]
    Topology(String),

    #[error("service '{service}' depends on unknown service '{dependency}'")]
    UnknownDependency { service: String, dependency: String },

    #[error("dependency cycle detected: {}", .0.join(" -> "))]
    DependencyCycle(Vec<String>),

    #[error("reset deletes all persisted data; re-run with --confirm")]
    ResetNotConfirmed,
}

/// 基础设施错误：网络或存储准备失败，通常需要人工介入
#[derive(Debug, Error)]
pub enum InfraError {
    #[error("network '{network}' is still in use by {}; stop those containers first", .containers.join(", "))]
    NetworkConflict {
        network: String,
        containers: Vec<String>,
    },

    #[error("network '{network}' could not be provisioned: {reason}")]
    NetworkProvisioning { network: String, reason: String },

    #[error("failed to initialise HTTP probe client: {0}")]
    HttpClient(#[source] reqwest::Error),

    #[error("storage path {} is not writable: {reason}", .path.display())]
    StorageUnwritable { path: PathBuf, reason: String },
}

/// 单个服务的失败信息
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceFailure {
    pub service: String,
    pub reason: String,
}

impl std::fmt::Display for ServiceFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.service, self.reason)
    }
}

/// 编排器顶层错误
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("infrastructure error: {0}")]
    Infrastructure(#[from] InfraError),

    #[error("container runtime error: {0}")]
    Runtime(#[from] RuntimeError),

    #[error("'{service}' not started: dependency '{blocking}' not ready after {}s ({reason})", .waited.as_secs())]
    DependencyNotReady {
        service: String,
        blocking: String,
        waited: Duration,
        reason: String,
    },

    #[error("partial failure: {} failed, {} healthy", join_display(.failed), .healthy.len())]
    PartialFailure {
        failed: Vec<ServiceFailure>,
        healthy: Vec<String>,
    },

    #[error("deployment cancelled by operator; started containers left running")]
    Cancelled,
}

impl OrchestratorError {
    /// 对应的进程退出码
    pub fn exit_code(&self) -> i32 {
        match self {
            OrchestratorError::Configuration(_) => exit_codes::CONFIGURATION,
            OrchestratorError::Infrastructure(_) => exit_codes::INFRASTRUCTURE,
            OrchestratorError::Runtime(_) => exit_codes::RUNTIME,
            OrchestratorError::DependencyNotReady { .. } => exit_codes::DEPENDENCY_TIMEOUT,
            OrchestratorError::PartialFailure { .. } => exit_codes::PARTIAL_FAILURE,
            OrchestratorError::Cancelled => exit_codes::CANCELLED,
        }
    }

    /// 错误类别名称（日志与 JSON 输出使用）
    pub fn kind(&self) -> &'static str {
        match self {
            OrchestratorError::Configuration(_) => "configuration_error",
            OrchestratorError::Infrastructure(_) => "infrastructure_error",
            OrchestratorError::Runtime(_) => "runtime_error",
            OrchestratorError::DependencyNotReady { .. } => "dependency_not_ready",
            OrchestratorError::PartialFailure { .. } => "partial_failure",
            OrchestratorError::Cancelled => "cancelled",
        }
    }
}

fn join_display<T: std::fmt::Display>(items: &[T]) -> String {
    items
        .iter()
        .map(|i| i.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

/// 便捷类型别名
pub type Result<T, E = OrchestratorError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exit_codes_are_distinct() {
        let errors = [
            OrchestratorError::Configuration(ConfigError::ResetNotConfirmed),
            OrchestratorError::Infrastructure(InfraError::NetworkConflict {
                network: "net".to_string(),
                containers: vec!["a".to_string()],
            }),
            OrchestratorError::DependencyNotReady {
                service: "proxy".to_string(),
                blocking: "db".to_string(),
                waited: Duration::from_secs(60),
                reason: "timeout".to_string(),
            },
            OrchestratorError::PartialFailure {
                failed: vec![],
                healthy: vec![],
            },
            OrchestratorError::Cancelled,
        ];
        let mut codes: Vec<i32> = errors.iter().map(|e| e.exit_code()).collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), errors.len());
        assert!(!codes.contains(&exit_codes::SUCCESS));
    }

    #[test]
    fn test_missing_key_message_names_services() {
        let err = ConfigError::MissingRequiredKey(vec![MissingKey {
            key: "POSTGRES_PASSWORD".to_string(),
            services: vec!["postgres".to_string(), "litellm".to_string()],
        }]);
        let msg = err.to_string();
        assert!(msg.contains("POSTGRES_PASSWORD"));
        assert!(msg.contains("postgres, litellm"));
    }

    #[test]
    fn test_http_client_failure_is_infrastructure() {
        let source = reqwest::Client::builder()
            .build()
            .unwrap()
            .get("not a url")
            .build()
            .unwrap_err();
        let err = OrchestratorError::from(InfraError::HttpClient(source));
        assert_eq!(err.exit_code(), exit_codes::INFRASTRUCTURE);
        assert!(err.to_string().contains("HTTP probe client"));
    }

    #[test]
    fn test_dependency_not_ready_names_blocker() {
        let err = OrchestratorError::DependencyNotReady {
            service: "litellm".to_string(),
            blocking: "postgres".to_string(),
            waited: Duration::from_secs(60),
            reason: "probe timed out".to_string(),
        };
        assert!(err.to_string().contains("'postgres'"));
        assert_eq!(err.kind(), "dependency_not_ready");
    }
}
