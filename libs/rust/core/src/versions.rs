//! Active-version sources. Consulted on every resolve; nothing here is cached.

use anyhow::anyhow;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;

#[async_trait]
pub trait VersionSource: Send + Sync {
    /// `Ok(None)` when the domain has no active version.
    async fn active_version(&self, domain: &str) -> anyhow::Result<Option<String>>;
}

/// In-memory mapping, mutable at runtime.
#[derive(Debug, Default)]
pub struct StaticVersions {
    map: RwLock<HashMap<String, String>>,
}

impl StaticVersions {
    pub fn new<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self { map: RwLock::new(pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect()) }
    }

    pub fn set(&self, domain: impl Into<String>, version: impl Into<String>) {
        self.map.write().insert(domain.into(), version.into());
    }

    pub fn remove(&self, domain: &str) { self.map.write().remove(domain); }
}

#[async_trait]
impl VersionSource for StaticVersions {
    async fn active_version(&self, domain: &str) -> anyhow::Result<Option<String>> {
        Ok(self.map.read().get(domain).cloned())
    }
}

/// YAML file of `domain: version` pairs, re-read on every lookup so edits take
/// effect on the next request.
#[derive(Debug, Clone)]
pub struct FileVersions {
    path: PathBuf,
}

impl FileVersions {
    pub fn new(path: impl Into<PathBuf>) -> Self { Self { path: path.into() } }
}

#[async_trait]
impl VersionSource for FileVersions {
    async fn active_version(&self, domain: &str) -> anyhow::Result<Option<String>> {
        let text = tokio::fs::read_to_string(&self.path).await?;
        let map: HashMap<String, serde_yaml::Value> = serde_yaml::from_str(&text)?;
        match map.get(domain) {
            None | Some(serde_yaml::Value::Null) => Ok(None),
            Some(serde_yaml::Value::String(s)) => Ok(Some(s.clone())),
            Some(other) => Err(anyhow!(
                "active version for {domain} in {} must be a quoted string, got {other:?}",
                self.path.display()
            )),
        }
    }
}
