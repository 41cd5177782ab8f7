//! 配置模块
//!
//! 编排器参数、服务 `.env` 与服务拓扑

pub mod env;
pub mod profile;
pub mod topology;

pub use env::{HealthConfig, NetworkConfig, OrchestratorConfig};
pub use profile::EnvironmentProfile;
pub use topology::Topology;
