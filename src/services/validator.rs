//! 配置校验
//!
//! 在任何容器启动之前确认 `.env` 满足拓扑中所有服务的要求。
//! 占位值默认是致命错误；操作员显式确认后降级为警告。

use std::path::Path;
use tracing::{info, warn};

use crate::config::profile::is_placeholder;
use crate::config::{EnvironmentProfile, Topology};
use crate::error::{ConfigError, MissingKey};

/// 操作员确认接受的占位值
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    pub key: String,
    pub services: Vec<String>,
}

impl std::fmt::Display for ValidationWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} still holds a placeholder value (used by {})",
            self.key,
            self.services.join(", ")
        )
    }
}

/// 校验结果
#[derive(Debug, Clone)]
pub struct ValidationReport {
    pub profile: EnvironmentProfile,
    pub warnings: Vec<ValidationWarning>,
}

/// 配置校验器
pub struct ConfigValidator<'a> {
    topology: &'a Topology,
    accept_placeholders: bool,
}

impl<'a> ConfigValidator<'a> {
    pub fn new(topology: &'a Topology) -> Self {
        Self {
            topology,
            accept_placeholders: false,
        }
    }

    /// 操作员显式确认：占位值只产生警告
    pub fn accept_placeholders(mut self, accept: bool) -> Self {
        self.accept_placeholders = accept;
        self
    }

    /// 加载并校验 `.env`
    pub async fn validate(&self, path: &Path) -> Result<ValidationReport, ConfigError> {
        let profile = EnvironmentProfile::load(path).await?.with_defaults();
        self.check(profile)
    }

    /// 校验已加载的配置
    pub fn check(&self, profile: EnvironmentProfile) -> Result<ValidationReport, ConfigError> {
        let requirements = self.topology.requirements();

        let missing: Vec<MissingKey> = requirements
            .iter()
            .filter(|(key, _)| !profile.contains(key))
            .map(|(key, services)| MissingKey {
                key: key.clone(),
                services: services.clone(),
            })
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::MissingRequiredKey(missing));
        }

        let placeholders: Vec<ValidationWarning> = requirements
            .iter()
            .filter(|(key, _)| profile.get(key).map(is_placeholder).unwrap_or(false))
            .map(|(key, services)| ValidationWarning {
                key: key.clone(),
                services: services.clone(),
            })
            .collect();

        if !placeholders.is_empty() {
            if !self.accept_placeholders {
                return Err(ConfigError::PlaceholderValueDetected(
                    placeholders.into_iter().map(|w| w.key).collect(),
                ));
            }
            for warning in &placeholders {
                warn!(
                    key = %warning.key,
                    services = ?warning.services,
                    "Proceeding with placeholder value (accepted by operator)"
                );
            }
        }

        info!(
            source = ?profile.source(),
            keys = profile.len(),
            required = requirements.len(),
            warnings = placeholders.len(),
            "Environment validated"
        );

        Ok(ValidationReport {
            profile,
            warnings: placeholders,
        })
    }
}
