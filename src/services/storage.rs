//! 持久化目录准备

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::config::Topology;
use crate::error::InfraError;

/// 已准备好的卷
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisionedVolume {
    pub service: String,
    pub name: String,
    pub path: PathBuf,
    /// 本次运行新建
    pub created: bool,
}

/// 持久化目录管理
pub struct DirectoryProvisioner {
    root: PathBuf,
}

impl DirectoryProvisioner {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// 卷在宿主机上的目录
    pub fn volume_path(&self, volume: &str) -> PathBuf {
        self.root.join(volume)
    }

    /// 确保所有卷目录存在，已有内容不做任何改动
    pub async fn ensure(&self, topology: &Topology) -> Result<Vec<ProvisionedVolume>, InfraError> {
        let mut provisioned = Vec::new();

        for spec in topology.ordered() {
            for volume in &spec.volumes {
                let path = self.volume_path(&volume.name);
                let created = ensure_dir(&path).await?;
                if created {
                    info!(service = %spec.name, path = %path.display(), "Created volume directory");
                } else {
                    debug!(service = %spec.name, path = %path.display(), "Volume directory exists");
                }
                provisioned.push(ProvisionedVolume {
                    service: spec.name.clone(),
                    name: volume.name.clone(),
                    path,
                    created,
                });
            }
        }

        Ok(provisioned)
    }

    /// 删除所有卷目录（仅用于 reset）
    pub async fn purge(&self, topology: &Topology) -> Result<Vec<PathBuf>, InfraError> {
        let mut removed = Vec::new();
        for spec in topology.services() {
            for volume in &spec.volumes {
                let path = self.volume_path(&volume.name);
                match tokio::fs::remove_dir_all(&path).await {
                    Ok(()) => {
                        warn!(
                            target: "stack_orchestrator::reset",
                            service = %spec.name,
                            path = %path.display(),
                            "Deleted persisted data"
                        );
                        removed.push(path);
                    }
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => {
                        return Err(InfraError::StorageUnwritable {
                            path,
                            reason: e.to_string(),
                        })
                    }
                }
            }
        }
        Ok(removed)
    }
}

/// 返回是否新建
async fn ensure_dir(path: &Path) -> Result<bool, InfraError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_dir() => return Ok(false),
        Ok(_) => {
            return Err(InfraError::StorageUnwritable {
                path: path.to_path_buf(),
                reason: "exists but is not a directory".to_string(),
            })
        }
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => {
            return Err(InfraError::StorageUnwritable {
                path: path.to_path_buf(),
                reason: e.to_string(),
            })
        }
    }

    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| InfraError::StorageUnwritable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::service::{ReadinessProbe, ServiceSpec};

    fn topology() -> Topology {
        Topology::new(vec![
            ServiceSpec::new("db", "img/db", ReadinessProbe::Running).volume("db", "/data"),
            ServiceSpec::new("web", "img/web", ReadinessProbe::Running)
                .depends_on(&["db"])
                .volume("web-uploads", "/uploads"),
            ServiceSpec::new("search", "img/search", ReadinessProbe::Running),
        ])
        .unwrap()
    }

    #[tokio::test]
    async fn test_ensure_is_idempotent_and_preserves_contents() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = DirectoryProvisioner::new(dir.path().join("nested/data"));
        let topology = topology();

        let first = provisioner.ensure(&topology).await.unwrap();
        assert_eq!(first.len(), 2);
        assert!(first.iter().all(|v| v.created));

        let marker = provisioner.volume_path("db").join("PG_VERSION");
        tokio::fs::write(&marker, "16").await.unwrap();

        let second = provisioner.ensure(&topology).await.unwrap();
        assert!(second.iter().all(|v| !v.created));
        assert_eq!(tokio::fs::read_to_string(&marker).await.unwrap(), "16");
    }

    #[tokio::test]
    async fn test_file_in_the_way_is_unwritable() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join("db"), "not a dir").await.unwrap();
        let provisioner = DirectoryProvisioner::new(dir.path());

        let err = provisioner.ensure(&topology()).await.unwrap_err();
        assert!(matches!(err, InfraError::StorageUnwritable { ref path, .. } if path.ends_with("db")));
    }

    #[tokio::test]
    async fn test_purge_removes_volumes_only() {
        let dir = tempfile::tempdir().unwrap();
        let provisioner = DirectoryProvisioner::new(dir.path());
        let topology = topology();
        provisioner.ensure(&topology).await.unwrap();
        tokio::fs::write(dir.path().join("keep.txt"), "x").await.unwrap();

        let removed = provisioner.purge(&topology).await.unwrap();
        assert_eq!(removed.len(), 2);
        assert!(!provisioner.volume_path("db").exists());
        assert!(dir.path().join("keep.txt").exists());

        // 再次清理不报错
        assert!(provisioner.purge(&topology).await.unwrap().is_empty());
    }
}
