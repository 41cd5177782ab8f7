//! 命令执行器
//!
//! 提供统一的命令执行接口，支持：
//! - 超时控制
//! - stdout/stderr 分离
//! - 非零退出码转换为错误

use std::process::Output;
use std::time::Duration;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// 命令执行器
pub struct CommandRunner;

/// 命令执行错误
#[derive(Debug, Error)]
pub enum CommandError {
    /// 命令启动失败
    #[error("failed to spawn `{program}`: {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },
    /// 命令超时
    #[error("`{command}` timed out after {}s", .timeout.as_secs())]
    Timeout { command: String, timeout: Duration },
    /// 非零退出
    #[error("`{command}` exited with {code:?}: {stderr}")]
    Failed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

impl CommandError {
    /// 失败命令的 stderr（其它错误为空）
    pub fn stderr(&self) -> &str {
        match self {
            CommandError::Failed { stderr, .. } => stderr,
            _ => "",
        }
    }
}

impl CommandRunner {
    /// 执行命令并收集输出，不检查退出码
    ///
    /// 超时后子进程会被杀掉（`kill_on_drop`）
    pub async fn run(program: &str, args: &[String], timeout: Duration) -> Result<Output, CommandError> {
        debug!(program, args = ?args, "Running command");

        let child = Command::new(program)
            .args(args)
            .kill_on_drop(true)
            .output();

        tokio::select! {
            result = child => {
                result.map_err(|source| CommandError::SpawnFailed {
                    program: program.to_string(),
                    source,
                })
            }
            _ = tokio::time::sleep(timeout) => {
                Err(CommandError::Timeout {
                    command: display_command(program, args),
                    timeout,
                })
            }
        }
    }

    /// 执行命令，非零退出码视为错误，返回 stdout
    pub async fn run_checked(
        program: &str,
        args: &[String],
        timeout: Duration,
    ) -> Result<String, CommandError> {
        let output = Self::run(program, args, timeout).await?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).into_owned())
        } else {
            Err(CommandError::Failed {
                command: display_command(program, args),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

/// 用于日志与错误信息的命令行，隐去 `-e` 参数的值
fn display_command(program: &str, args: &[String]) -> String {
    let mut parts = vec![program.to_string()];
    let mut redact_next = false;
    for arg in args {
        if redact_next {
            let key = arg.split_once('=').map(|(k, _)| k).unwrap_or(arg);
            parts.push(format!("{}=***", key));
            redact_next = false;
            continue;
        }
        redact_next = arg == "-e";
        parts.push(arg.clone());
    }
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_run_checked_success() {
        let stdout = CommandRunner::run_checked("echo", &args(&["hello"]), Duration::from_secs(5))
            .await
            .unwrap();
        assert!(stdout.contains("hello"));
    }

    #[tokio::test]
    async fn test_run_not_found() {
        let result = CommandRunner::run(
            "nonexistent_command_12345",
            &[],
            Duration::from_secs(5),
        )
        .await;

        assert!(matches!(result, Err(CommandError::SpawnFailed { .. })));
    }

    #[tokio::test]
    async fn test_run_checked_failure_keeps_stderr() {
        let err = CommandRunner::run_checked(
            "sh",
            &args(&["-c", "echo boom >&2; exit 3"]),
            Duration::from_secs(5),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, CommandError::Failed { code: Some(3), .. }));
        assert_eq!(err.stderr(), "boom");
    }

    #[tokio::test]
    async fn test_run_timeout() {
        let err = CommandRunner::run("sleep", &args(&["5"]), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert!(matches!(err, CommandError::Timeout { .. }));
    }

    #[test]
    fn test_display_command_redacts_env_values() {
        let line = display_command(
            "docker",
            &args(&["run", "-e", "POSTGRES_PASSWORD=s3cret", "--name", "db"]),
        );
        assert_eq!(line, "docker run -e POSTGRES_PASSWORD=*** --name db");
    }
}
