//! 容器创建与更新
//!
//! 每个容器带有启动参数摘要标签；摘要不变时复用容器，变化时删除重建。

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::config::env::constants::{LABEL_MANAGED, LABEL_PROJECT, LABEL_SPEC_HASH};
use crate::config::{EnvironmentProfile, OrchestratorConfig};
use crate::domain::deploy::LaunchAction;
use crate::domain::service::ServiceSpec;
use crate::infra::{ContainerLaunch, ContainerRuntime, RuntimeError};

pub struct ContainerLauncher<'a> {
    runtime: &'a dyn ContainerRuntime,
    config: &'a OrchestratorConfig,
    data_root: PathBuf,
}

impl<'a> ContainerLauncher<'a> {
    pub fn new(runtime: &'a dyn ContainerRuntime, config: &'a OrchestratorConfig) -> Self {
        Self {
            runtime,
            config,
            data_root: absolute(&config.data_root),
        }
    }

    /// 展开模板，生成启动参数；缺失变量时返回变量名
    pub fn render(
        &self,
        spec: &ServiceSpec,
        profile: &EnvironmentProfile,
    ) -> Result<ContainerLaunch, String> {
        let env = spec
            .environment
            .iter()
            .map(|(k, v)| Ok((k.clone(), profile.expand(v)?)))
            .collect::<Result<BTreeMap<_, _>, String>>()?;
        let ports = spec
            .ports
            .iter()
            .map(|p| profile.expand(p))
            .collect::<Result<Vec<_>, _>>()?;
        let command = spec
            .command
            .iter()
            .map(|c| profile.expand(c))
            .collect::<Result<Vec<_>, _>>()?;
        let volumes = spec
            .volumes
            .iter()
            .map(|v| (self.data_root.join(&v.name), v.container_path.clone()))
            .collect();

        let mut launch = ContainerLaunch {
            name: self.config.container_name(&spec.name),
            image: spec.image.clone(),
            network: self.config.network.name.clone(),
            alias: spec.name.clone(),
            labels: BTreeMap::new(),
            env,
            volumes,
            ports,
            command,
        };
        let hash = launch.spec_hash();
        launch.labels = BTreeMap::from([
            (LABEL_MANAGED.to_string(), "true".to_string()),
            (LABEL_PROJECT.to_string(), self.config.project.clone()),
            (LABEL_SPEC_HASH.to_string(), hash),
        ]);
        Ok(launch)
    }

    /// 让容器与启动参数一致
    pub async fn reconcile(&self, launch: &ContainerLaunch) -> Result<LaunchAction, RuntimeError> {
        let desired = launch.labels.get(LABEL_SPEC_HASH);

        let action = match self.runtime.inspect_container(&launch.name).await? {
            None => {
                self.runtime.run_container(launch).await?;
                LaunchAction::Created
            }
            Some(existing) if existing.labels.get(LABEL_SPEC_HASH) == desired => {
                if existing.running {
                    LaunchAction::Unchanged
                } else {
                    self.runtime.start_container(&launch.name).await?;
                    LaunchAction::Started
                }
            }
            Some(_) => {
                self.runtime.remove_container(&launch.name).await?;
                self.runtime.run_container(launch).await?;
                LaunchAction::Recreated
            }
        };

        info!(container = %launch.name, action = action.as_str(), "Container reconciled");
        Ok(action)
    }
}

/// 绑定挂载需要绝对路径
fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::service::ReadinessProbe;
    use crate::infra::mock::MockRuntime;

    fn config(data_root: &Path) -> OrchestratorConfig {
        let mut config = OrchestratorConfig::from_env();
        config.project = "ai-stack".to_string();
        config.data_root = data_root.to_path_buf();
        config.network.name = "ai-stack-network".to_string();
        config
    }

    fn spec() -> ServiceSpec {
        ServiceSpec::new("web", "example/web:1", ReadinessProbe::Running)
            .env("PORT", "${WEB_PORT}")
            .port("${WEB_PORT}:80")
            .volume("web", "/data")
    }

    #[test]
    fn test_render_expands_templates() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let runtime = MockRuntime::new();
        let launcher = ContainerLauncher::new(&runtime, &config);

        let profile = EnvironmentProfile::from_pairs([("WEB_PORT", "8081")]);
        let launch = launcher.render(&spec(), &profile).unwrap();
        assert_eq!(launch.name, "ai-stack-web");
        assert_eq!(launch.alias, "web");
        assert_eq!(launch.env["PORT"], "8081");
        assert_eq!(launch.ports, vec!["8081:80"]);
        assert_eq!(launch.volumes[0].0, dir.path().join("web"));
        assert_eq!(launch.labels[LABEL_SPEC_HASH], launch.spec_hash());

        let err = launcher
            .render(&spec(), &EnvironmentProfile::default())
            .unwrap_err();
        assert_eq!(err, "WEB_PORT");
    }

    #[tokio::test]
    async fn test_reconcile_actions() {
        let dir = tempfile::tempdir().unwrap();
        let config = config(dir.path());
        let runtime = MockRuntime::new();
        let launcher = ContainerLauncher::new(&runtime, &config);
        let profile = EnvironmentProfile::from_pairs([("WEB_PORT", "8081")]);

        let launch = launcher.render(&spec(), &profile).unwrap();
        assert_eq!(launcher.reconcile(&launch).await.unwrap(), LaunchAction::Created);
        assert_eq!(launcher.reconcile(&launch).await.unwrap(), LaunchAction::Unchanged);

        runtime.kill("ai-stack-web");
        assert_eq!(launcher.reconcile(&launch).await.unwrap(), LaunchAction::Started);

        let changed = EnvironmentProfile::from_pairs([("WEB_PORT", "9090")]);
        let launch = launcher.render(&spec(), &changed).unwrap();
        assert_eq!(launcher.reconcile(&launch).await.unwrap(), LaunchAction::Recreated);

        assert_eq!(
            runtime.events(),
            vec![
                "run:ai-stack-web",
                "start:ai-stack-web",
                "rm:ai-stack-web",
                "run:ai-stack-web"
            ]
        );
    }
}
