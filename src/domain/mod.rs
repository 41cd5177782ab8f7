//! 领域模型模块
//!
//! 纯数据结构，不依赖 tokio / docker

pub mod deploy;
pub mod service;

// Re-exports for convenience
pub use deploy::{
    DeployStage, DeploymentReport, Endpoint, LaunchAction, ServiceHealth, ServiceOutcome,
    ServiceStatus, ServiceStatusEntry, StageStatus, StatusReport,
};
pub use service::{PersistentVolume, ReadinessProbe, ServiceSpec};
