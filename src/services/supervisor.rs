//! 部署编排
//!
//! 按顺序执行 配置校验 → 目录准备 → 网络准备 → 服务启动。
//! 同一波次（互不依赖）的服务并发启动并等待就绪，波次之间串行。
//! 任何致命错误都会中止本次部署，但不会回滚已经启动的容器。

use chrono::Utc;
use futures::future::join_all;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{EnvironmentProfile, OrchestratorConfig, Topology};
use crate::domain::deploy::{
    DeploymentReport, Endpoint, LaunchAction, ServiceHealth, ServiceStatus, ServiceStatusEntry,
    StatusReport,
};
use crate::domain::service::ServiceSpec;
use crate::error::{exit_codes, ConfigError, OrchestratorError};
use crate::infra::{ContainerRuntime, RuntimeError};
use crate::services::health::{render_probe, GateError, HealthGate, ProbeResult, ProbeRunner};
use crate::services::launcher::ContainerLauncher;
use crate::services::network::NetworkProvisioner;
use crate::services::storage::DirectoryProvisioner;
use crate::services::validator::ConfigValidator;
use crate::state::DeploymentState;

/// 部署选项
#[derive(Debug, Clone, Copy, Default)]
pub struct DeployOptions {
    /// 操作员确认接受占位值
    pub accept_placeholders: bool,
}

/// 一次部署的结果；失败时报告同样可用
#[derive(Debug)]
pub struct DeployRun {
    pub report: DeploymentReport,
    pub error: Option<OrchestratorError>,
}

impl DeployRun {
    pub fn exit_code(&self) -> i32 {
        self.error
            .as_ref()
            .map(OrchestratorError::exit_code)
            .unwrap_or(exit_codes::SUCCESS)
    }

    pub fn into_result(self) -> Result<DeploymentReport, OrchestratorError> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.report),
        }
    }
}

/// reset 的结果
#[derive(Debug, Default)]
pub struct ResetReport {
    pub removed_containers: Vec<String>,
    pub network_removed: bool,
    pub purged: Vec<PathBuf>,
}

/// 单个服务启动失败的原因
#[derive(Debug)]
enum StartError {
    /// 模板引用了不存在的变量
    Render(String),
    Launch(RuntimeError),
    NotReady { waited: Duration, reason: String },
    Cancelled,
}

impl StartError {
    fn describe(&self) -> String {
        match self {
            StartError::Render(key) => format!("{} is not set", key),
            StartError::Launch(e) => e.to_string(),
            StartError::NotReady { waited, reason } => {
                format!("not ready after {}s: {}", waited.as_secs(), reason)
            }
            StartError::Cancelled => "cancelled".to_string(),
        }
    }
}

struct ServiceRun {
    service: String,
    action: Option<LaunchAction>,
    result: Result<Duration, StartError>,
}

impl ServiceRun {
    fn failed(service: &str, action: Option<LaunchAction>, error: StartError) -> Self {
        Self {
            service: service.to_string(),
            action,
            result: Err(error),
        }
    }
}

/// 编排器
pub struct Supervisor {
    config: OrchestratorConfig,
    topology: Topology,
    runtime: Arc<dyn ContainerRuntime>,
    probes: ProbeRunner,
    cancel: CancellationToken,
}

impl Supervisor {
    pub fn new(
        config: OrchestratorConfig,
        topology: Topology,
        runtime: Arc<dyn ContainerRuntime>,
    ) -> Result<Self, OrchestratorError> {
        let probes = ProbeRunner::new(runtime.clone())?;
        Ok(Self {
            config,
            topology,
            runtime,
            probes,
            cancel: CancellationToken::new(),
        })
    }

    /// 取消令牌（接到 Ctrl-C 时触发）
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    fn network(&self) -> NetworkProvisioner<'_> {
        NetworkProvisioner::new(
            self.runtime.as_ref(),
            &self.config.network,
            &self.config.project,
        )
    }

    fn storage(&self) -> DirectoryProvisioner {
        DirectoryProvisioner::new(&self.config.data_root)
    }

    fn checkpoint(&self) -> Result<(), OrchestratorError> {
        if self.cancel.is_cancelled() {
            Err(OrchestratorError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// 创建或更新整套服务
    pub async fn deploy(&self, options: DeployOptions) -> DeployRun {
        let mut state = DeploymentState::new(self.topology.graph().order());
        info!(
            run_id = %state.run_id(),
            project = %self.config.project,
            services = self.topology.services().len(),
            "Deployment started"
        );

        let mut profile = None;
        let error = self
            .run_stages(&mut state, options, &mut profile)
            .await
            .err();
        if error.is_some() {
            state.skip_pending_stages();
        }

        let report = self.build_report(&state, profile.as_ref());
        match &error {
            None => info!(run_id = %report.run_id, "Deployment finished"),
            Some(OrchestratorError::Cancelled) => warn!(
                run_id = %report.run_id,
                "Deployment cancelled, started containers left running"
            ),
            Some(e) => error!(
                run_id = %report.run_id,
                kind = e.kind(),
                error = %e,
                "Deployment failed"
            ),
        }

        DeployRun { report, error }
    }

    async fn run_stages(
        &self,
        state: &mut DeploymentState,
        options: DeployOptions,
        profile_slot: &mut Option<EnvironmentProfile>,
    ) -> Result<(), OrchestratorError> {
        // 1. 配置
        state.begin_stage("config");
        let validation = ConfigValidator::new(&self.topology)
            .accept_placeholders(options.accept_placeholders)
            .validate(&self.config.env_file)
            .await;
        let validation = stage_result(state, "config", validation, |v| {
            format!("{} keys", v.profile.len())
        })?;
        if !validation.warnings.is_empty() {
            for warning in &validation.warnings {
                state.add_warning(warning.to_string());
            }
            state.warn_stage(
                "config",
                format!("{} placeholder value(s) accepted", validation.warnings.len()),
            );
        }
        let profile = profile_slot.insert(validation.profile);
        self.checkpoint()?;

        // 2. 持久化目录
        state.begin_stage("storage");
        let volumes = self.storage().ensure(&self.topology).await;
        stage_result(state, "storage", volumes, |v| {
            let created = v.iter().filter(|p| p.created).count();
            format!("{} volumes, {} created", v.len(), created)
        })?;
        self.checkpoint()?;

        // 3. 网络
        state.begin_stage("network");
        let action = self.network().ensure().await;
        stage_result(state, "network", action, |a| a.describe())?;
        self.checkpoint()?;

        // 4. 服务
        state.begin_stage("services");
        let result = self.start_services(state, profile).await;
        let healthy = state.healthy().len();
        stage_result(state, "services", result, |_| format!("{} healthy", healthy))
    }

    /// 按波次启动服务
    async fn start_services(
        &self,
        state: &mut DeploymentState,
        profile: &EnvironmentProfile,
    ) -> Result<(), OrchestratorError> {
        let launcher = ContainerLauncher::new(self.runtime.as_ref(), &self.config);
        let gate = HealthGate::new(self.config.health);
        let graph = self.topology.graph();

        for (index, wave) in graph.waves().iter().enumerate() {
            self.checkpoint()?;

            // 依赖全部就绪才允许启动
            let mut ready = Vec::new();
            for name in wave {
                let unready = graph
                    .dependencies(name)
                    .find(|dep| state.status(dep) != Some(&ServiceStatus::Healthy));
                match unready {
                    Some(dep) => state.mark_blocked(name, dep),
                    None => {
                        state.mark_starting(name);
                        ready.push(name);
                    }
                }
            }
            info!(wave = index + 1, services = ?ready, "Starting wave");

            let runs = join_all(
                ready
                    .iter()
                    .filter_map(|name| self.topology.get(name.as_str()))
                    .map(|spec| self.start_service(spec, profile, &launcher, &gate)),
            )
            .await;

            let mut fatal: Option<(String, StartError)> = None;
            let mut cancelled = false;
            for run in runs {
                if let Some(action) = run.action {
                    state.record_action(&run.service, action);
                }
                match run.result {
                    Ok(waited) => state.mark_healthy(&run.service, waited),
                    Err(StartError::Cancelled) => cancelled = true,
                    Err(e) => {
                        state.mark_failed(&run.service, e.describe());
                        let dependents = graph.transitive_dependents(&run.service);
                        for dependent in &dependents {
                            state.mark_blocked(dependent, &run.service);
                        }
                        if !dependents.is_empty() && fatal.is_none() {
                            fatal = Some((run.service, e));
                        }
                    }
                }
            }

            if cancelled {
                return Err(OrchestratorError::Cancelled);
            }
            if let Some((service, e)) = fatal {
                return Err(self.blocking_error(&service, e));
            }
        }

        let failed = state.failures();
        if !failed.is_empty() {
            return Err(OrchestratorError::PartialFailure {
                failed,
                healthy: state.healthy(),
            });
        }
        Ok(())
    }

    /// 启动单个服务并等待就绪；不修改部署状态
    async fn start_service(
        &self,
        spec: &ServiceSpec,
        profile: &EnvironmentProfile,
        launcher: &ContainerLauncher<'_>,
        gate: &HealthGate,
    ) -> ServiceRun {
        if self.cancel.is_cancelled() {
            return ServiceRun::failed(&spec.name, None, StartError::Cancelled);
        }

        let launch = match launcher.render(spec, profile) {
            Ok(launch) => launch,
            Err(key) => return ServiceRun::failed(&spec.name, None, StartError::Render(key)),
        };
        let probe = match render_probe(&spec.probe, profile) {
            Ok(probe) => probe,
            Err(key) => return ServiceRun::failed(&spec.name, None, StartError::Render(key)),
        };

        let action = match launcher.reconcile(&launch).await {
            Ok(action) => action,
            Err(e) => {
                error!(service = %spec.name, error = %e, "Failed to launch container");
                return ServiceRun::failed(&spec.name, None, StartError::Launch(e));
            }
        };

        let gate = gate.for_service(spec);
        info!(
            service = %spec.name,
            probe = probe.kind(),
            timeout_secs = gate.timeout().as_secs(),
            "Waiting for readiness"
        );

        let result = match gate
            .wait_ready(&self.probes, &launch.name, &probe, &self.cancel)
            .await
        {
            Ok(waited) => {
                info!(service = %spec.name, waited_ms = waited.as_millis() as u64, "Service healthy");
                Ok(waited)
            }
            Err(GateError::Cancelled) => Err(StartError::Cancelled),
            Err(GateError::Timeout {
                waited,
                attempts,
                last_error,
            }) => {
                warn!(
                    service = %spec.name,
                    attempts,
                    last_error = %last_error,
                    "Service not ready within timeout"
                );
                Err(StartError::NotReady {
                    waited,
                    reason: last_error,
                })
            }
        };

        ServiceRun {
            service: spec.name.clone(),
            action: Some(action),
            result,
        }
    }

    /// 有依赖方的服务失败时的错误
    fn blocking_error(&self, failed: &str, error: StartError) -> OrchestratorError {
        let dependents = self.topology.graph().transitive_dependents(failed);
        let service = self
            .topology
            .graph()
            .order()
            .iter()
            .find(|name| dependents.contains(*name))
            .cloned()
            .unwrap_or_default();

        match error {
            StartError::Launch(e) => OrchestratorError::Runtime(e),
            StartError::Cancelled => OrchestratorError::Cancelled,
            StartError::NotReady { waited, reason } => OrchestratorError::DependencyNotReady {
                service,
                blocking: failed.to_string(),
                waited,
                reason,
            },
            other @ StartError::Render(_) => OrchestratorError::DependencyNotReady {
                service,
                blocking: failed.to_string(),
                waited: Duration::ZERO,
                reason: other.describe(),
            },
        }
    }

    fn build_report(
        &self,
        state: &DeploymentState,
        profile: Option<&EnvironmentProfile>,
    ) -> DeploymentReport {
        let ordered = self.topology.ordered();
        let endpoints = match profile {
            Some(profile) => ordered
                .iter()
                .filter(|s| s.public && state.status(&s.name) == Some(&ServiceStatus::Healthy))
                .filter_map(|s| {
                    s.endpoint.as_ref().map(|template| Endpoint {
                        service: s.name.clone(),
                        url: profile
                            .expand(template)
                            .unwrap_or_else(|_| template.clone()),
                    })
                })
                .collect(),
            None => Vec::new(),
        };
        let internal = ordered
            .iter()
            .filter(|s| !s.public)
            .map(|s| s.name.clone())
            .collect();
        state.report(endpoints, internal, &self.config.network.name)
    }

    /// 各服务当前健康状况（只读）
    pub async fn status(&self) -> Result<StatusReport, OrchestratorError> {
        let profile = match EnvironmentProfile::load(&self.config.env_file).await {
            Ok(profile) => profile,
            Err(e) => {
                warn!(error = %e, "Environment file unavailable, probing with defaults");
                EnvironmentProfile::default()
            }
        }
        .with_defaults();

        let network_present = self.network().exists().await?;
        let gate = HealthGate::new(self.config.health);
        let services = join_all(
            self.topology
                .ordered()
                .into_iter()
                .map(|spec| self.classify(spec, &profile, gate.for_service(spec))),
        )
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;

        Ok(StatusReport {
            checked_at: Utc::now(),
            network: self.config.network.name.clone(),
            network_present,
            services,
        })
    }

    async fn classify(
        &self,
        spec: &ServiceSpec,
        profile: &EnvironmentProfile,
        gate: HealthGate,
    ) -> Result<ServiceStatusEntry, OrchestratorError> {
        let container = self.config.container_name(&spec.name);
        let health = match self.runtime.inspect_container(&container).await? {
            None => ServiceHealth::NotDeployed,
            Some(info) if !info.running => ServiceHealth::Stopped,
            Some(_) => match render_probe(&spec.probe, profile) {
                Err(key) => ServiceHealth::Unhealthy {
                    reason: format!("probe needs {} which is not set", key),
                },
                // 单次探测同样受健康超时约束
                Ok(probe) => match tokio::time::timeout(
                    gate.timeout(),
                    self.probes.probe(&container, &probe),
                )
                .await
                {
                    Ok(ProbeResult::Ready) => ServiceHealth::Healthy,
                    Ok(ProbeResult::NotReady(reason)) => ServiceHealth::Unhealthy { reason },
                    Err(_) => ServiceHealth::Unhealthy {
                        reason: format!(
                            "probe gave no answer within {}ms",
                            gate.timeout().as_millis()
                        ),
                    },
                },
            },
        };

        Ok(ServiceStatusEntry {
            service: spec.name.clone(),
            container,
            health,
        })
    }

    /// 停止所有容器（依赖方先停），不删除任何东西
    pub async fn destroy(&self) -> Result<Vec<String>, OrchestratorError> {
        let mut stopped = Vec::new();
        for service in self.topology.graph().teardown_order() {
            let container = self.config.container_name(&service);
            match self.runtime.inspect_container(&container).await? {
                Some(info) if info.running => {
                    self.runtime.stop_container(&container).await?;
                    info!(service = %service, container = %container, "Container stopped");
                    stopped.push(service);
                }
                Some(_) => debug!(service = %service, "Already stopped"),
                None => debug!(service = %service, "Not deployed"),
            }
        }
        Ok(stopped)
    }

    /// 删除容器、网络与全部持久化数据
    pub async fn reset(&self, confirm: bool) -> Result<ResetReport, OrchestratorError> {
        if !confirm {
            return Err(ConfigError::ResetNotConfirmed.into());
        }

        warn!(
            target: "stack_orchestrator::reset",
            project = %self.config.project,
            data_root = %self.config.data_root.display(),
            "Full reset: removing containers, network and persisted data"
        );

        let mut report = ResetReport::default();
        for service in self.topology.graph().teardown_order() {
            let container = self.config.container_name(&service);
            if let Some(info) = self.runtime.inspect_container(&container).await? {
                if info.running {
                    self.runtime.stop_container(&container).await?;
                }
                self.runtime.remove_container(&container).await?;
                warn!(
                    target: "stack_orchestrator::reset",
                    service = %service,
                    container = %container,
                    "Container removed"
                );
                report.removed_containers.push(service);
            }
        }

        report.network_removed = self.network().teardown().await?;
        if report.network_removed {
            warn!(
                target: "stack_orchestrator::reset",
                network = %self.config.network.name,
                "Network removed"
            );
        }

        report.purged = self.storage().purge(&self.topology).await?;
        warn!(
            target: "stack_orchestrator::reset",
            containers = report.removed_containers.len(),
            volumes = report.purged.len(),
            "Reset complete"
        );
        Ok(report)
    }
}

/// 记录阶段结果并转换错误
fn stage_result<T, E>(
    state: &mut DeploymentState,
    stage: &str,
    result: Result<T, E>,
    message: impl FnOnce(&T) -> String,
) -> Result<T, OrchestratorError>
where
    E: Into<OrchestratorError>,
{
    match result {
        Ok(value) => {
            state.finish_stage(stage, true, message(&value));
            Ok(value)
        }
        Err(e) => {
            let e = e.into();
            state.finish_stage(stage, false, e.to_string());
            Err(e)
        }
    }
}
