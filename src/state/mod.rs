//! 运行时状态模块
//!
//! 单次部署的状态记录

pub mod deployment;

pub use deployment::DeploymentState;
