//! 基础设施模块
//!
//! 封装外部依赖（docker 命令行、进程执行）

pub mod command;
pub mod docker;

#[cfg(test)]
pub mod mock;

pub use command::{CommandError, CommandRunner};
pub use docker::{
    ContainerInfo, ContainerLaunch, ContainerRuntime, DockerCli, ExecOutcome, NetworkInfo,
    RuntimeError,
};
