//! 服务依赖图
//!
//! 按依赖关系分 “波次”：每一波的服务只依赖更早的波次，同一波次内互不依赖，
//! 可以并发启动。波次内按服务名排序，保证每次运行顺序一致。

use std::collections::{BTreeMap, BTreeSet};

use crate::domain::service::ServiceSpec;
use crate::error::ConfigError;

/// 服务依赖图（DAG）
#[derive(Clone, Debug)]
pub struct ServiceGraph {
    /// service -> 直接依赖
    deps: BTreeMap<String, BTreeSet<String>>,
    /// service -> 直接被依赖方
    dependents: BTreeMap<String, BTreeSet<String>>,
    waves: Vec<Vec<String>>,
    order: Vec<String>,
}

impl ServiceGraph {
    /// 构建依赖图，检查未知依赖与依赖环
    pub fn build(services: &[ServiceSpec]) -> Result<Self, ConfigError> {
        let mut deps: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        let mut dependents: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();

        for spec in services {
            deps.insert(spec.name.clone(), spec.depends_on.clone());
            dependents.entry(spec.name.clone()).or_default();
        }

        for spec in services {
            for dep in &spec.depends_on {
                if !deps.contains_key(dep) {
                    return Err(ConfigError::UnknownDependency {
                        service: spec.name.clone(),
                        dependency: dep.clone(),
                    });
                }
                dependents
                    .entry(dep.clone())
                    .or_default()
                    .insert(spec.name.clone());
            }
        }

        let waves = compute_waves(&deps)?;
        let order = waves.iter().flatten().cloned().collect();

        Ok(Self {
            deps,
            dependents,
            waves,
            order,
        })
    }

    /// 启动顺序
    pub fn order(&self) -> &[String] {
        &self.order
    }

    /// 启动波次
    pub fn waves(&self) -> &[Vec<String>] {
        &self.waves
    }

    /// 停止顺序（与启动相反）
    pub fn teardown_order(&self) -> Vec<String> {
        self.order.iter().rev().cloned().collect()
    }

    pub fn dependencies(&self, service: &str) -> impl Iterator<Item = &String> {
        self.deps.get(service).into_iter().flatten()
    }

    pub fn dependents(&self, service: &str) -> impl Iterator<Item = &String> {
        self.dependents.get(service).into_iter().flatten()
    }

    /// 所有直接或间接依赖 `service` 的服务
    pub fn transitive_dependents(&self, service: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut stack: Vec<&str> = vec![service];
        while let Some(current) = stack.pop() {
            for dependent in self.dependents(current) {
                if found.insert(dependent.clone()) {
                    stack.push(dependent);
                }
            }
        }
        found
    }
}

/// Kahn 算法，一次取出全部入度为 0 的节点作为一个波次
fn compute_waves(
    deps: &BTreeMap<String, BTreeSet<String>>,
) -> Result<Vec<Vec<String>>, ConfigError> {
    let mut remaining: BTreeMap<&str, BTreeSet<&str>> = deps
        .iter()
        .map(|(name, ds)| (name.as_str(), ds.iter().map(String::as_str).collect()))
        .collect();
    let mut waves = Vec::new();

    while !remaining.is_empty() {
        let wave: Vec<&str> = remaining
            .iter()
            .filter(|(_, ds)| ds.is_empty())
            .map(|(name, _)| *name)
            .collect();

        if wave.is_empty() {
            return Err(ConfigError::DependencyCycle(find_cycle(&remaining)));
        }

        for name in &wave {
            remaining.remove(name);
        }
        for ds in remaining.values_mut() {
            for name in &wave {
                ds.remove(name);
            }
        }

        waves.push(wave.into_iter().map(str::to_string).collect());
    }

    Ok(waves)
}

/// 在剩余节点中找出一条具体的环路，如 `a -> b -> a`
fn find_cycle(remaining: &BTreeMap<&str, BTreeSet<&str>>) -> Vec<String> {
    fn visit<'a>(
        node: &'a str,
        graph: &BTreeMap<&'a str, BTreeSet<&'a str>>,
        path: &mut Vec<&'a str>,
        done: &mut BTreeSet<&'a str>,
    ) -> Option<Vec<String>> {
        if let Some(pos) = path.iter().position(|n| *n == node) {
            let mut cycle: Vec<String> = path[pos..].iter().map(|s| s.to_string()).collect();
            cycle.push(node.to_string());
            return Some(cycle);
        }
        if done.contains(node) {
            return None;
        }
        path.push(node);
        for next in graph.get(node).into_iter().flatten() {
            if let Some(cycle) = visit(*next, graph, path, done) {
                return Some(cycle);
            }
        }
        path.pop();
        done.insert(node);
        None
    }

    let mut done = BTreeSet::new();
    for start in remaining.keys() {
        let mut path = Vec::new();
        if let Some(cycle) = visit(*start, remaining, &mut path, &mut done) {
            return cycle;
        }
    }
    remaining.keys().map(|s| s.to_string()).collect()
}
