//! Stack Orchestrator - 自托管 AI 服务栈编排器
//!
//! 按依赖顺序部署一组容器服务，逐个等待就绪，并保证重复执行的幂等性

pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod services;
pub mod state;

pub use error::{OrchestratorError, Result};
