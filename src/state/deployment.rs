//! 部署状态
//!
//! 单次部署运行期间的服务状态与阶段记录。只由 `Supervisor` 持有和修改，
//! 运行结束后转成 `DeploymentReport` 并丢弃。

use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::domain::deploy::{
    DeployStage, DeploymentReport, Endpoint, LaunchAction, ServiceOutcome, ServiceStatus,
    StageStatus,
};
use crate::error::ServiceFailure;

/// 部署阶段（按执行顺序）
pub const STAGES: &[(&str, &str)] = &[
    ("config", "Config"),
    ("storage", "Storage"),
    ("network", "Network"),
    ("services", "Services"),
];

/// 单次部署的状态
#[derive(Debug)]
pub struct DeploymentState {
    run_id: String,
    started_at: DateTime<Utc>,
    stages: Vec<DeployStage>,
    /// 按启动顺序
    services: Vec<ServiceOutcome>,
    warnings: Vec<String>,
}

impl DeploymentState {
    pub fn new(order: &[String]) -> Self {
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            started_at: Utc::now(),
            stages: STAGES
                .iter()
                .map(|(name, display)| DeployStage::new(name, display))
                .collect(),
            services: order
                .iter()
                .map(|name| ServiceOutcome {
                    service: name.clone(),
                    status: ServiceStatus::Pending,
                    action: None,
                    ready_after_ms: None,
                })
                .collect(),
            warnings: Vec::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    fn stage_mut(&mut self, name: &str) -> Option<&mut DeployStage> {
        self.stages.iter_mut().find(|s| s.name == name)
    }

    pub fn begin_stage(&mut self, name: &str) {
        if let Some(stage) = self.stage_mut(name) {
            stage.start();
        }
    }

    pub fn finish_stage(&mut self, name: &str, success: bool, message: impl Into<String>) {
        if let Some(stage) = self.stage_mut(name) {
            stage.finish(success, Some(message.into()));
        }
    }

    pub fn warn_stage(&mut self, name: &str, message: impl Into<String>) {
        if let Some(stage) = self.stage_mut(name) {
            stage.warn(message.into());
        }
    }

    /// 中止后把未执行的阶段标记为跳过
    pub fn skip_pending_stages(&mut self) {
        for stage in &mut self.stages {
            if stage.status == StageStatus::Pending {
                stage.skip(Some("aborted".to_string()));
            }
        }
    }

    pub fn stage(&self, name: &str) -> Option<&DeployStage> {
        self.stages.iter().find(|s| s.name == name)
    }

    fn outcome_mut(&mut self, service: &str) -> Option<&mut ServiceOutcome> {
        self.services.iter_mut().find(|o| o.service == service)
    }

    /// 已到终态的服务不再变化
    fn open_outcome_mut(&mut self, service: &str) -> Option<&mut ServiceOutcome> {
        self.outcome_mut(service).filter(|o| !o.status.is_terminal())
    }

    pub fn status(&self, service: &str) -> Option<&ServiceStatus> {
        self.services
            .iter()
            .find(|o| o.service == service)
            .map(|o| &o.status)
    }

    pub fn mark_starting(&mut self, service: &str) {
        if let Some(outcome) = self.open_outcome_mut(service) {
            outcome.status = ServiceStatus::Starting;
        }
    }

    pub fn record_action(&mut self, service: &str, action: LaunchAction) {
        if let Some(outcome) = self.outcome_mut(service) {
            outcome.action = Some(action);
        }
    }

    pub fn mark_healthy(&mut self, service: &str, waited: Duration) {
        if let Some(outcome) = self.open_outcome_mut(service) {
            outcome.status = ServiceStatus::Healthy;
            outcome.ready_after_ms = Some(waited.as_millis() as u64);
        }
    }

    pub fn mark_failed(&mut self, service: &str, reason: impl Into<String>) {
        if let Some(outcome) = self.open_outcome_mut(service) {
            outcome.status = ServiceStatus::Failed {
                reason: reason.into(),
            };
        }
    }

    /// 仅对尚未启动的服务生效
    pub fn mark_blocked(&mut self, service: &str, by: &str) {
        if let Some(outcome) = self.outcome_mut(service) {
            if outcome.status == ServiceStatus::Pending {
                outcome.status = ServiceStatus::Blocked { by: by.to_string() };
            }
        }
    }

    pub fn healthy(&self) -> Vec<String> {
        self.services
            .iter()
            .filter(|o| o.status == ServiceStatus::Healthy)
            .map(|o| o.service.clone())
            .collect()
    }

    pub fn failures(&self) -> Vec<ServiceFailure> {
        self.services
            .iter()
            .filter_map(|o| match &o.status {
                ServiceStatus::Failed { reason } => Some(ServiceFailure {
                    service: o.service.clone(),
                    reason: reason.clone(),
                }),
                _ => None,
            })
            .collect()
    }

    pub fn add_warning(&mut self, warning: impl Into<String>) {
        self.warnings.push(warning.into());
    }

    /// 当前状态的快照
    pub fn report(
        &self,
        endpoints: Vec<Endpoint>,
        internal_services: Vec<String>,
        network: &str,
    ) -> DeploymentReport {
        DeploymentReport {
            run_id: self.run_id.clone(),
            started_at: self.started_at,
            finished_at: Utc::now(),
            stages: self.stages.clone(),
            services: self.services.clone(),
            endpoints,
            internal_services,
            network: network.to_string(),
            warnings: self.warnings.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> DeploymentState {
        DeploymentState::new(&["db".to_string(), "api".to_string(), "web".to_string()])
    }

    #[test]
    fn test_new_state_is_pending() {
        let state = state();
        assert_eq!(state.status("db"), Some(&ServiceStatus::Pending));
        assert!(state.status("unknown").is_none());
        assert!(uuid::Uuid::parse_str(state.run_id()).is_ok());
        assert_eq!(state.stage("network").unwrap().status, StageStatus::Pending);
    }

    #[test]
    fn test_transitions() {
        let mut state = state();
        state.mark_starting("db");
        state.record_action("db", LaunchAction::Created);
        state.mark_healthy("db", Duration::from_millis(1500));
        state.mark_starting("api");
        state.mark_failed("api", "probe timed out");
        state.mark_blocked("web", "api");
        // 已经有结果的服务不会被标记为 blocked
        state.mark_blocked("db", "api");

        assert_eq!(state.healthy(), vec!["db"]);
        assert_eq!(
            state.failures(),
            vec![ServiceFailure {
                service: "api".to_string(),
                reason: "probe timed out".to_string()
            }]
        );
        assert_eq!(
            state.status("web"),
            Some(&ServiceStatus::Blocked {
                by: "api".to_string()
            })
        );

        let report = state.report(vec![], vec!["db".to_string()], "net");
        assert_eq!(report.services[0].ready_after_ms, Some(1500));
        assert_eq!(report.services[0].action, Some(LaunchAction::Created));
    }

    #[test]
    fn test_terminal_status_is_final() {
        let mut state = state();
        state.mark_starting("db");
        state.mark_failed("db", "exited");
        state.mark_healthy("db", Duration::from_millis(10));
        state.mark_starting("db");
        assert_eq!(
            state.status("db"),
            Some(&ServiceStatus::Failed {
                reason: "exited".to_string()
            })
        );

        state.mark_blocked("api", "db");
        state.mark_starting("api");
        assert!(matches!(state.status("api"), Some(ServiceStatus::Blocked { .. })));
    }

    #[test]
    fn test_skip_pending_stages() {
        let mut state = state();
        state.begin_stage("config");
        state.finish_stage("config", false, "missing keys");
        state.skip_pending_stages();

        assert_eq!(state.stage("config").unwrap().status, StageStatus::Failed);
        assert_eq!(state.stage("services").unwrap().status, StageStatus::Skipped);
    }
}
