//! 隔离网络准备
//!
//! 同名网络如果不是本编排器创建的（标签不符）或子网不符，先删除再重建，
//! 保证地址与标签一致。仍有容器连接时不重试，交给操作员处理。

use std::collections::BTreeMap;
use tracing::{info, warn};

use crate::config::env::constants::{LABEL_MANAGED, LABEL_PROJECT};
use crate::config::NetworkConfig;
use crate::error::{InfraError, OrchestratorError};
use crate::infra::{ContainerRuntime, NetworkInfo, RuntimeError};

/// 网络准备结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkAction {
    Created,
    Reused,
    Recreated { reason: String },
}

impl NetworkAction {
    pub fn describe(&self) -> String {
        match self {
            NetworkAction::Created => "created".to_string(),
            NetworkAction::Reused => "reused".to_string(),
            NetworkAction::Recreated { reason } => format!("recreated ({})", reason),
        }
    }
}

/// 网络管理
pub struct NetworkProvisioner<'a> {
    runtime: &'a dyn ContainerRuntime,
    config: &'a NetworkConfig,
    project: &'a str,
}

impl<'a> NetworkProvisioner<'a> {
    pub fn new(runtime: &'a dyn ContainerRuntime, config: &'a NetworkConfig, project: &'a str) -> Self {
        Self {
            runtime,
            config,
            project,
        }
    }

    /// 本编排器创建网络时使用的标签
    pub fn labels(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (LABEL_MANAGED.to_string(), "true".to_string()),
            (LABEL_PROJECT.to_string(), self.project.to_string()),
        ])
    }

    /// 现有网络与期望不符的原因
    fn mismatch(&self, info: &NetworkInfo) -> Option<String> {
        let expected = self.labels();
        for (key, value) in &expected {
            if info.labels.get(key) != Some(value) {
                return Some(format!("label {} mismatch", key));
            }
        }
        if !info.subnets.iter().any(|s| s == &self.config.subnet) {
            return Some(format!(
                "subnet {:?} != {}",
                info.subnets, self.config.subnet
            ));
        }
        None
    }

    /// 确保网络存在且属于本编排器
    pub async fn ensure(&self) -> Result<NetworkAction, OrchestratorError> {
        let name = &self.config.name;

        let action = match self.inspect().await? {
            None => NetworkAction::Created,
            Some(info) => match self.mismatch(&info) {
                None => {
                    info!(network = %name, "Network already provisioned");
                    return Ok(NetworkAction::Reused);
                }
                Some(reason) => {
                    warn!(network = %name, %reason, "Stale network, recreating");
                    self.remove(&info).await?;
                    NetworkAction::Recreated { reason }
                }
            },
        };

        self.runtime
            .create_network(name, &self.config.subnet, &self.labels())
            .await
            .map_err(|e| self.provisioning_error(e))?;
        info!(network = %name, subnet = %self.config.subnet, "Network created");
        Ok(action)
    }

    /// 删除网络（reset 使用），返回是否存在过
    pub async fn teardown(&self) -> Result<bool, OrchestratorError> {
        match self.inspect().await? {
            None => Ok(false),
            Some(info) => {
                self.remove(&info).await?;
                Ok(true)
            }
        }
    }

    /// 网络是否存在（只读）
    pub async fn exists(&self) -> Result<bool, OrchestratorError> {
        Ok(self.inspect().await?.is_some())
    }

    async fn inspect(&self) -> Result<Option<NetworkInfo>, OrchestratorError> {
        self.runtime
            .inspect_network(&self.config.name)
            .await
            .map_err(|e| self.provisioning_error(e))
    }

    fn provisioning_error(&self, e: RuntimeError) -> OrchestratorError {
        InfraError::NetworkProvisioning {
            network: self.config.name.clone(),
            reason: e.to_string(),
        }
        .into()
    }

    async fn remove(&self, info: &NetworkInfo) -> Result<(), OrchestratorError> {
        match self.runtime.remove_network(&info.name).await {
            Ok(()) => Ok(()),
            Err(RuntimeError::InUse { .. }) => Err(InfraError::NetworkConflict {
                network: info.name.clone(),
                containers: info.containers.clone(),
            }
            .into()),
            Err(e) => Err(self.provisioning_error(e)),
        }
    }
}
