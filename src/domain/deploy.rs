//! 部署相关领域模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// 单次部署中服务的状态
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ServiceStatus {
    Pending,
    Starting,
    Healthy,
    Failed { reason: String },
    /// 依赖未就绪，未启动
    Blocked { by: String },
}

impl ServiceStatus {
    /// 转换为字符串
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceStatus::Pending => "pending",
            ServiceStatus::Starting => "starting",
            ServiceStatus::Healthy => "healthy",
            ServiceStatus::Failed { .. } => "failed",
            ServiceStatus::Blocked { .. } => "blocked",
        }
    }

    /// 是否为终态
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ServiceStatus::Healthy | ServiceStatus::Failed { .. } | ServiceStatus::Blocked { .. }
        )
    }
}

/// `status` 命令给出的健康分类
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "health", rename_all = "snake_case")]
pub enum ServiceHealth {
    Healthy,
    Unhealthy { reason: String },
    Stopped,
    NotDeployed,
}

impl ServiceHealth {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceHealth::Healthy => "healthy",
            ServiceHealth::Unhealthy { .. } => "unhealthy",
            ServiceHealth::Stopped => "stopped",
            ServiceHealth::NotDeployed => "not_deployed",
        }
    }
}

/// 容器协调动作
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LaunchAction {
    /// 新建
    Created,
    /// 配置变化，删除后重建
    Recreated,
    /// 配置未变，启动已停止的容器
    Started,
    /// 配置未变且正在运行
    Unchanged,
}

impl LaunchAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LaunchAction::Created => "created",
            LaunchAction::Recreated => "recreated",
            LaunchAction::Started => "started",
            LaunchAction::Unchanged => "unchanged",
        }
    }
}

/// 阶段状态
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Pending,
    Running,
    Success,
    /// 成功但带有操作员确认过的警告
    Warning,
    Failed,
    Skipped,
}

impl StageStatus {
    pub fn icon(&self) -> &'static str {
        match self {
            StageStatus::Success => "✓",
            StageStatus::Warning => "!",
            StageStatus::Failed => "✗",
            StageStatus::Skipped => "⊘",
            StageStatus::Running => "⟳",
            StageStatus::Pending => "○",
        }
    }
}

/// 部署阶段信息
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeployStage {
    /// 阶段标识 (e.g., "config", "storage", "network", "services")
    pub name: String,
    /// 显示名称
    pub display_name: String,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    /// 持续时间（毫秒）
    pub duration_ms: Option<i64>,
    pub status: StageStatus,
    /// 附加信息
    pub message: Option<String>,
}

impl DeployStage {
    /// 创建新的待执行阶段
    pub fn new(name: &str, display_name: &str) -> Self {
        Self {
            name: name.to_string(),
            display_name: display_name.to_string(),
            started_at: None,
            finished_at: None,
            duration_ms: None,
            status: StageStatus::Pending,
            message: None,
        }
    }

    /// 开始执行阶段
    pub fn start(&mut self) {
        self.started_at = Some(Utc::now());
        self.status = StageStatus::Running;
    }

    /// 完成阶段
    pub fn finish(&mut self, success: bool, message: Option<String>) {
        self.complete(
            if success {
                StageStatus::Success
            } else {
                StageStatus::Failed
            },
            message,
        );
    }

    /// 以警告结束（非致命）
    pub fn warn(&mut self, message: String) {
        self.complete(StageStatus::Warning, Some(message));
    }

    /// 跳过阶段
    pub fn skip(&mut self, reason: Option<String>) {
        self.status = StageStatus::Skipped;
        self.message = reason;
    }

    fn complete(&mut self, status: StageStatus, message: Option<String>) {
        let now = Utc::now();
        self.finished_at = Some(now);
        self.status = status;
        self.message = message;
        if let Some(started) = self.started_at {
            self.duration_ms = Some((now - started).num_milliseconds());
        }
    }

    /// 摘要行，如 `✓ Network (12ms) - created`
    pub fn summary_line(&self) -> String {
        let duration = self
            .duration_ms
            .map(|d| format!("{}ms", d))
            .unwrap_or_else(|| "-".to_string());
        match &self.message {
            Some(msg) => format!(
                "{} {} ({}) - {}",
                self.status.icon(),
                self.display_name,
                duration,
                msg
            ),
            None => format!("{} {} ({})", self.status.icon(), self.display_name, duration),
        }
    }
}

/// 单个服务的部署结果
#[derive(Clone, Debug, Serialize)]
pub struct ServiceOutcome {
    pub service: String,
    pub status: ServiceStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action: Option<LaunchAction>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ready_after_ms: Option<u64>,
}

/// 部署报告
#[derive(Clone, Debug, Serialize)]
pub struct DeploymentReport {
    pub run_id: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub stages: Vec<DeployStage>,
    pub services: Vec<ServiceOutcome>,
    /// 对外入口
    pub endpoints: Vec<Endpoint>,
    /// 仅在隔离网络内可达的服务
    pub internal_services: Vec<String>,
    pub network: String,
    /// 操作员确认过的警告
    pub warnings: Vec<String>,
}

impl DeploymentReport {
    /// 人类可读的报告
    pub fn render(&self) -> Vec<String> {
        let mut lines = vec!["=== Stage Summary ===".to_string()];
        lines.extend(self.stages.iter().map(DeployStage::summary_line));

        lines.push(String::new());
        lines.push("=== Services ===".to_string());
        for outcome in &self.services {
            let action = outcome.action.map(|a| a.as_str()).unwrap_or("-");
            let ready = outcome
                .ready_after_ms
                .map(|ms| format!(" ready in {}ms", ms))
                .unwrap_or_default();
            lines.push(format!(
                "{:<14} {:<9} {}{}",
                outcome.service,
                outcome.status.as_str(),
                action,
                ready
            ));
        }

        for warning in &self.warnings {
            lines.push(format!("warning: {}", warning));
        }

        lines.push(String::new());
        for endpoint in &self.endpoints {
            lines.push(format!("{} is available at {}", endpoint.service, endpoint.url));
        }
        if !self.internal_services.is_empty() {
            lines.push(format!(
                "Internal only (reachable inside network '{}' only): {}",
                self.network,
                self.internal_services.join(", ")
            ));
        }
        lines
    }
}

/// 对外访问地址
#[derive(Clone, Debug, Serialize, PartialEq, Eq)]
pub struct Endpoint {
    pub service: String,
    pub url: String,
}

/// `status` 中单个服务的条目
#[derive(Clone, Debug, Serialize)]
pub struct ServiceStatusEntry {
    pub service: String,
    pub container: String,
    #[serde(flatten)]
    pub health: ServiceHealth,
}

/// `status` 报告
#[derive(Clone, Debug, Serialize)]
pub struct StatusReport {
    pub checked_at: DateTime<Utc>,
    pub network: String,
    pub network_present: bool,
    pub services: Vec<ServiceStatusEntry>,
}

impl StatusReport {
    /// 全部服务健康
    pub fn all_healthy(&self) -> bool {
        self.services
            .iter()
            .all(|s| s.health == ServiceHealth::Healthy)
    }

    pub fn render(&self) -> Vec<String> {
        let mut lines = vec![format!(
            "network {}: {}",
            self.network,
            if self.network_present { "present" } else { "missing" }
        )];
        for entry in &self.services {
            let icon = match entry.health {
                ServiceHealth::Healthy => "✓",
                ServiceHealth::Unhealthy { .. } => "✗",
                ServiceHealth::Stopped => "⊘",
                ServiceHealth::NotDeployed => "○",
            };
            let detail = match &entry.health {
                ServiceHealth::Unhealthy { reason } => format!(" ({})", reason),
                _ => String::new(),
            };
            lines.push(format!(
                "{} {:<14} {}{}",
                icon,
                entry.service,
                entry.health.as_str(),
                detail
            ));
        }
        lines
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_status_is_terminal() {
        assert!(!ServiceStatus::Pending.is_terminal());
        assert!(!ServiceStatus::Starting.is_terminal());
        assert!(ServiceStatus::Healthy.is_terminal());
        assert!(ServiceStatus::Blocked {
            by: "db".to_string()
        }
        .is_terminal());
    }

    #[test]
    fn test_deploy_stage_lifecycle() {
        let mut stage = DeployStage::new("network", "Network");
        assert_eq!(stage.status, StageStatus::Pending);

        stage.start();
        assert_eq!(stage.status, StageStatus::Running);
        assert!(stage.started_at.is_some());

        stage.finish(true, Some("reused".to_string()));
        assert_eq!(stage.status, StageStatus::Success);
        assert!(stage.duration_ms.is_some());
        assert!(stage.summary_line().starts_with("✓ Network"));
        assert!(stage.summary_line().ends_with("reused"));
    }

    #[test]
    fn test_stage_warning_is_distinct() {
        let mut stage = DeployStage::new("config", "Config");
        stage.start();
        stage.warn("1 placeholder accepted".to_string());
        assert_eq!(stage.status, StageStatus::Warning);
        assert!(stage.summary_line().starts_with('!'));
    }

    #[test]
    fn test_status_entry_serializes_flat() {
        let entry = ServiceStatusEntry {
            service: "redis".to_string(),
            container: "ai-stack-redis".to_string(),
            health: ServiceHealth::Unhealthy {
                reason: "exit 1".to_string(),
            },
        };
        let json = serde_json::to_value(&entry).unwrap();
        assert_eq!(json["health"], "unhealthy");
        assert_eq!(json["reason"], "exit 1");
        assert_eq!(json["service"], "redis");
    }
}
