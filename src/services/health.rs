//! 就绪探测
//!
//! `ProbeRunner` 执行单次探测；`HealthGate` 按固定间隔轮询，直到就绪、超时或被取消。
//! 取消只停止等待，不会停止已经启动的容器。

use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::env::constants::PROBE_REQUEST_TIMEOUT_SECS;
use crate::config::{EnvironmentProfile, HealthConfig};
use crate::domain::service::{ReadinessProbe, ServiceSpec};
use crate::error::InfraError;
use crate::infra::ContainerRuntime;

/// 单次探测结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeResult {
    Ready,
    NotReady(String),
}

/// 等待失败
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    Timeout {
        waited: Duration,
        attempts: u32,
        last_error: String,
    },
    Cancelled,
}

/// 探测执行器
#[derive(Clone)]
pub struct ProbeRunner {
    runtime: Arc<dyn ContainerRuntime>,
    http: Client,
}

impl ProbeRunner {
    pub fn new(runtime: Arc<dyn ContainerRuntime>) -> Result<Self, InfraError> {
        let http = Client::builder()
            .timeout(Duration::from_secs(PROBE_REQUEST_TIMEOUT_SECS))
            .build()
            .map_err(InfraError::HttpClient)?;
        Ok(Self { runtime, http })
    }

    /// 探测一次；`probe` 必须已经展开模板
    pub async fn probe(&self, container: &str, probe: &ReadinessProbe) -> ProbeResult {
        match probe {
            ReadinessProbe::Http { url } => match self.http.get(url).send().await {
                Ok(resp) if resp.status().is_success() => ProbeResult::Ready,
                Ok(resp) => ProbeResult::NotReady(format!("GET {} returned {}", url, resp.status())),
                Err(e) => ProbeResult::NotReady(format!("GET {} failed: {}", url, e)),
            },
            ReadinessProbe::Exec { command } => match self.runtime.exec(container, command).await {
                Ok(outcome) if outcome.success => ProbeResult::Ready,
                Ok(outcome) => ProbeResult::NotReady(outcome.detail),
                Err(e) => ProbeResult::NotReady(e.to_string()),
            },
            ReadinessProbe::Running => match self.runtime.inspect_container(container).await {
                Ok(Some(info)) if info.running => ProbeResult::Ready,
                Ok(Some(info)) => ProbeResult::NotReady(format!("container is {}", info.status)),
                Ok(None) => ProbeResult::NotReady("container does not exist".to_string()),
                Err(e) => ProbeResult::NotReady(e.to_string()),
            },
        }
    }
}

/// 展开探针中的 `${KEY}`
pub fn render_probe(
    probe: &ReadinessProbe,
    profile: &EnvironmentProfile,
) -> Result<ReadinessProbe, String> {
    Ok(match probe {
        ReadinessProbe::Http { url } => ReadinessProbe::Http {
            url: profile.expand(url)?,
        },
        ReadinessProbe::Exec { command } => ReadinessProbe::Exec {
            command: command
                .iter()
                .map(|arg| profile.expand(arg))
                .collect::<Result<_, _>>()?,
        },
        ReadinessProbe::Running => ReadinessProbe::Running,
    })
}

/// 就绪等待
#[derive(Debug, Clone, Copy)]
pub struct HealthGate {
    timeout: Duration,
    interval: Duration,
}

impl HealthGate {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            timeout: config.timeout,
            interval: config.poll_interval,
        }
    }

    /// 应用服务级覆盖
    pub fn for_service(&self, spec: &ServiceSpec) -> Self {
        Self {
            timeout: spec
                .health_timeout_secs
                .map(Duration::from_secs)
                .unwrap_or(self.timeout),
            interval: spec
                .poll_interval_secs
                .map(Duration::from_secs)
                .unwrap_or(self.interval),
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// 轮询直到就绪，返回等待时长
    pub async fn wait_ready(
        &self,
        probes: &ProbeRunner,
        container: &str,
        probe: &ReadinessProbe,
        cancel: &CancellationToken,
    ) -> Result<Duration, GateError> {
        let started = Instant::now();
        let mut attempts = 0u32;

        loop {
            attempts += 1;
            let budget = self
                .timeout
                .saturating_sub(started.elapsed())
                .max(self.interval);

            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(GateError::Cancelled),
                r = tokio::time::timeout(budget, probes.probe(container, probe)) => r,
            };

            let last_error = match result {
                Ok(ProbeResult::Ready) => {
                    debug!(container, attempts, "Probe succeeded");
                    return Ok(started.elapsed());
                }
                Ok(ProbeResult::NotReady(reason)) => reason,
                Err(_) => format!("probe did not answer within {}ms", budget.as_millis()),
            };

            let elapsed = started.elapsed();
            if elapsed >= self.timeout {
                return Err(GateError::Timeout {
                    waited: elapsed,
                    attempts,
                    last_error,
                });
            }
            debug!(container, attempts, %last_error, "Not ready yet");

            let wait = self.interval.min(self.timeout - elapsed);
            tokio::select! {
                _ = cancel.cancelled() => return Err(GateError::Cancelled),
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }
}
