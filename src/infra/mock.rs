//! 内存中的容器运行时，测试用

use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use super::command::CommandError;
use super::docker::{
    ContainerInfo, ContainerLaunch, ContainerRuntime, ExecOutcome, NetworkInfo, RuntimeError,
};

#[derive(Default)]
struct MockState {
    networks: BTreeMap<String, NetworkInfo>,
    containers: BTreeMap<String, (ContainerInfo, ContainerLaunch)>,
    events: Vec<String>,
    never_ready: HashSet<String>,
    ready_after: HashMap<String, usize>,
    exec_attempts: HashMap<String, usize>,
    hung_exec: HashSet<String>,
    network_create_error: Option<String>,
}

/// 可编排行为的假运行时
#[derive(Default)]
pub struct MockRuntime {
    state: Mutex<MockState>,
}

impl MockRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// 该容器的探针永远失败
    pub fn never_ready(&self, container: &str) {
        self.state.lock().unwrap().never_ready.insert(container.to_string());
    }

    /// 第 `attempts` 次探测才成功
    pub fn ready_after(&self, container: &str, attempts: usize) {
        self.state
            .lock()
            .unwrap()
            .ready_after
            .insert(container.to_string(), attempts);
    }

    /// 该容器里的 exec 永远不返回
    pub fn hang_exec(&self, container: &str) {
        self.state.lock().unwrap().hung_exec.insert(container.to_string());
    }

    /// `docker network create` 以该 stderr 失败
    pub fn fail_network_create(&self, stderr: &str) {
        self.state.lock().unwrap().network_create_error = Some(stderr.to_string());
    }

    /// 预置一个不属于编排器的网络
    pub fn add_network(&self, info: NetworkInfo) {
        self.state
            .lock()
            .unwrap()
            .networks
            .insert(info.name.clone(), info);
    }

    pub fn network(&self, name: &str) -> Option<NetworkInfo> {
        let state = self.state.lock().unwrap();
        state.networks.get(name).map(|n| with_attached(&state, n))
    }

    pub fn container(&self, name: &str) -> Option<ContainerInfo> {
        self.state
            .lock()
            .unwrap()
            .containers
            .get(name)
            .map(|(info, _)| info.clone())
    }

    pub fn container_names(&self) -> Vec<String> {
        self.state.lock().unwrap().containers.keys().cloned().collect()
    }

    /// 改变状态的操作记录，如 `run:ai-stack-postgres`
    pub fn events(&self) -> Vec<String> {
        self.state.lock().unwrap().events.clone()
    }

    pub fn clear_events(&self) {
        self.state.lock().unwrap().events.clear();
    }

    /// 模拟容器意外退出
    pub fn kill(&self, name: &str) {
        if let Some((info, _)) = self.state.lock().unwrap().containers.get_mut(name) {
            info.running = false;
            info.status = "exited".to_string();
        }
    }
}

/// 运行中的容器视为已连接到网络
fn with_attached(state: &MockState, network: &NetworkInfo) -> NetworkInfo {
    let mut info = network.clone();
    for (name, (container, launch)) in &state.containers {
        if container.running && launch.network == network.name && !info.containers.contains(name) {
            info.containers.push(name.clone());
        }
    }
    info.containers.sort();
    info
}

#[async_trait]
impl ContainerRuntime for MockRuntime {
    async fn inspect_network(&self, name: &str) -> Result<Option<NetworkInfo>, RuntimeError> {
        Ok(self.network(name))
    }

    async fn create_network(
        &self,
        name: &str,
        subnet: &str,
        labels: &BTreeMap<String, String>,
    ) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        if let Some(stderr) = &state.network_create_error {
            return Err(RuntimeError::Command(CommandError::Failed {
                command: format!("docker network create {}", name),
                code: Some(1),
                stderr: stderr.clone(),
            }));
        }
        state.networks.insert(
            name.to_string(),
            NetworkInfo {
                name: name.to_string(),
                labels: labels.clone(),
                subnets: vec![subnet.to_string()],
                containers: vec![],
            },
        );
        state.events.push(format!("network_create:{}", name));
        Ok(())
    }

    async fn remove_network(&self, name: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        if let Some(network) = state.networks.get(name) {
            let attached = with_attached(&state, network);
            if !attached.containers.is_empty() {
                return Err(RuntimeError::InUse {
                    resource: format!("network {}", name),
                    detail: format!("has active endpoints: {}", attached.containers.join(", ")),
                });
            }
        }
        state.networks.remove(name);
        state.events.push(format!("network_rm:{}", name));
        Ok(())
    }

    async fn inspect_container(&self, name: &str) -> Result<Option<ContainerInfo>, RuntimeError> {
        Ok(self.container(name))
    }

    async fn run_container(&self, launch: &ContainerLaunch) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        let info = ContainerInfo {
            name: launch.name.clone(),
            image: launch.image.clone(),
            running: true,
            status: "running".to_string(),
            labels: launch.labels.clone(),
        };
        state
            .containers
            .insert(launch.name.clone(), (info, launch.clone()));
        state.exec_attempts.remove(&launch.name);
        state.events.push(format!("run:{}", launch.name));
        Ok(())
    }

    async fn start_container(&self, name: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        if let Some((info, _)) = state.containers.get_mut(name) {
            info.running = true;
            info.status = "running".to_string();
        }
        state.events.push(format!("start:{}", name));
        Ok(())
    }

    async fn stop_container(&self, name: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        if let Some((info, _)) = state.containers.get_mut(name) {
            info.running = false;
            info.status = "exited".to_string();
        }
        state.events.push(format!("stop:{}", name));
        Ok(())
    }

    async fn remove_container(&self, name: &str) -> Result<(), RuntimeError> {
        let mut state = self.state.lock().unwrap();
        state.containers.remove(name);
        state.events.push(format!("rm:{}", name));
        Ok(())
    }

    async fn exec(&self, name: &str, _command: &[String]) -> Result<ExecOutcome, RuntimeError> {
        let hung = self.state.lock().unwrap().hung_exec.contains(name);
        if hung {
            std::future::pending::<()>().await;
        }
        let mut state = self.state.lock().unwrap();
        let running = state
            .containers
            .get(name)
            .map(|(info, _)| info.running)
            .unwrap_or(false);
        if !running {
            return Ok(ExecOutcome {
                success: false,
                detail: format!("container {} is not running", name),
            });
        }
        if state.never_ready.contains(name) {
            return Ok(ExecOutcome {
                success: false,
                detail: "connection refused".to_string(),
            });
        }
        let attempts = {
            let counter = state.exec_attempts.entry(name.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };
        let needed = state.ready_after.get(name).copied().unwrap_or(1);
        Ok(ExecOutcome {
            success: attempts >= needed,
            detail: if attempts >= needed {
                String::new()
            } else {
                "starting up".to_string()
            },
        })
    }
}
