//! 服务层模块
//!
//! 包含核心业务逻辑：配置校验、资源准备、依赖图、就绪等待与编排

pub mod graph;
pub mod health;
pub mod launcher;
pub mod network;
pub mod storage;
pub mod supervisor;
pub mod validator;

pub use graph::ServiceGraph;
pub use health::{HealthGate, ProbeRunner};
pub use network::{NetworkAction, NetworkProvisioner};
pub use storage::DirectoryProvisioner;
pub use supervisor::{DeployOptions, DeployRun, ResetReport, Supervisor};
pub use validator::{ConfigValidator, ValidationReport, ValidationWarning};
