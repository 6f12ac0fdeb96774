//! Read-only access to serialized bundles keyed by (domain, version).
//!
//! Filesystem layout: `<root>/<domain>/<version>/bundle.json`, with an optional
//! `bundle.json.sha256` holding the expected hex digest of the document.

use async_trait::async_trait;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::io::ErrorKind as IoErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::bundle::BundleKey;
use crate::errors::StoreError;
use crate::resilience::{retry_async, RetryConfig};

pub const BUNDLE_FILE: &str = "bundle.json";
pub const DIGEST_FILE: &str = "bundle.json.sha256";

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Raw bytes of the bundle, or `StoreError::NotFound`.
    async fn fetch(&self, domain: &str, version: &str) -> Result<Vec<u8>, StoreError>;

    /// Domains with at least one stored version.
    async fn domains(&self) -> Result<Vec<String>, StoreError>;
}

/// Domain and version strings become path segments; anything that could escape
/// the store root is treated as absent.
pub fn is_safe_segment(s: &str) -> bool {
    !s.is_empty() && s != "." && s != ".." && s.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
}

fn not_found(domain: &str, version: &str) -> StoreError {
    StoreError::NotFound { domain: domain.to_string(), version: version.to_string() }
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}

#[derive(Debug, Clone)]
pub struct FsArtifactStore {
    root: PathBuf,
    retry: RetryConfig,
}

impl FsArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self { Self { root: root.into(), retry: RetryConfig::default() } }

    pub fn with_retry(mut self, retry: RetryConfig) -> Self { self.retry = retry; self }

    pub fn root(&self) -> &Path { &self.root }

    pub fn bundle_path(&self, domain: &str, version: &str) -> PathBuf { self.root.join(domain).join(version).join(BUNDLE_FILE) }

    async fn read_once(&self, domain: &str, version: &str) -> Result<Vec<u8>, StoreError> {
        let path = self.bundle_path(domain, version);
        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Err(not_found(domain, version)),
            Err(e) => return Err(StoreError::Unavailable(format!("{}: {e}", path.display()))),
        };
        let digest_path = path.with_file_name(DIGEST_FILE);
        match tokio::fs::read_to_string(&digest_path).await {
            Ok(text) => {
                let expected = text.split_whitespace().next().unwrap_or_default().to_ascii_lowercase();
                let actual = sha256_hex(&bytes);
                if expected != actual {
                    return Err(StoreError::Integrity { domain: domain.to_string(), version: version.to_string(), expected, actual });
                }
            }
            Err(e) if e.kind() == IoErrorKind::NotFound => debug!(%domain, %version, "no digest file, skipping integrity check"),
            Err(e) => return Err(StoreError::Unavailable(format!("{}: {e}", digest_path.display()))),
        }
        Ok(bytes)
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn fetch(&self, domain: &str, version: &str) -> Result<Vec<u8>, StoreError> {
        if !is_safe_segment(domain) || !is_safe_segment(version) {
            return Err(not_found(domain, version));
        }
        retry_async(&self.retry, StoreError::is_transient, |attempt| {
            if attempt > 0 { warn!(%domain, %version, attempt, "retrying artifact read"); }
            self.read_once(domain, version)
        }).await
    }

    async fn domains(&self) -> Result<Vec<String>, StoreError> {
        let mut out = BTreeSet::new();
        let mut dirs = match tokio::fs::read_dir(&self.root).await {
            Ok(d) => d,
            Err(e) if e.kind() == IoErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StoreError::Unavailable(e.to_string())),
        };
        while let Some(domain_dir) = dirs.next_entry().await.map_err(|e| StoreError::Unavailable(e.to_string()))? {
            let Some(domain) = domain_dir.file_name().to_str().map(str::to_string) else { continue };
            if !is_safe_segment(&domain) { continue; }
            let Ok(mut versions) = tokio::fs::read_dir(domain_dir.path()).await else { continue };
            while let Ok(Some(version_dir)) = versions.next_entry().await {
                if tokio::fs::try_exists(version_dir.path().join(BUNDLE_FILE)).await.unwrap_or(false) {
                    out.insert(domain.clone());
                    break;
                }
            }
        }
        Ok(out.into_iter().collect())
    }
}

/// In-process store for embedded bundles and tests.
#[derive(Debug, Default)]
pub struct MemoryArtifactStore {
    bundles: RwLock<HashMap<BundleKey, Vec<u8>>>,
}

impl MemoryArtifactStore {
    pub fn new() -> Self { Self::default() }

    pub fn put(&self, domain: &str, version: &str, bytes: impl Into<Vec<u8>>) {
        self.bundles.write().insert(BundleKey::new(domain, version), bytes.into());
    }

    pub fn remove(&self, domain: &str, version: &str) -> bool {
        self.bundles.write().remove(&BundleKey::new(domain, version)).is_some()
    }
}

#[async_trait]
impl ArtifactStore for MemoryArtifactStore {
    async fn fetch(&self, domain: &str, version: &str) -> Result<Vec<u8>, StoreError> {
        self.bundles.read().get(&BundleKey::new(domain, version)).cloned().ok_or_else(|| not_found(domain, version))
    }

    async fn domains(&self) -> Result<Vec<String>, StoreError> {
        let set: BTreeSet<String> = self.bundles.read().keys().map(|k| k.domain.clone()).collect();
        Ok(set.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_bundle(root: &Path, domain: &str, version: &str, body: &[u8]) -> PathBuf {
        let dir = root.join(domain).join(version);
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(BUNDLE_FILE);
        std::fs::write(&path, body).unwrap();
        path
    }

    #[tokio::test]
    async fn fs_store_reads_and_lists() {
        let tmp = tempfile::tempdir().unwrap();
        write_bundle(tmp.path(), "heart", "2.0.0", b"{}");
        write_bundle(tmp.path(), "diabetes", "1.0.0", b"{}");
        std::fs::create_dir_all(tmp.path().join("empty").join("0")).unwrap();
        let store = FsArtifactStore::new(tmp.path());
        assert_eq!(store.fetch("heart", "2.0.0").await.unwrap(), b"{}");
        assert_eq!(store.domains().await.unwrap(), vec!["diabetes".to_string(), "heart".to_string()]);
    }

    #[tokio::test]
    async fn fs_store_missing_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FsArtifactStore::new(tmp.path());
        assert!(matches!(store.fetch("x", "v1").await, Err(StoreError::NotFound { .. })));
        assert!(matches!(store.fetch("..", "v1").await, Err(StoreError::NotFound { .. })));
        assert!(matches!(store.fetch("heart", "../../etc").await, Err(StoreError::NotFound { .. })));
    }

    #[tokio::test]
    async fn fs_store_verifies_digest() {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_bundle(tmp.path(), "heart", "1", b"{\"a\":1}");
        let store = FsArtifactStore::new(tmp.path());

        std::fs::write(path.with_file_name(DIGEST_FILE), format!("{}  bundle.json\n", sha256_hex(b"{\"a\":1}"))).unwrap();
        assert!(store.fetch("heart", "1").await.is_ok());

        std::fs::write(path.with_file_name(DIGEST_FILE), sha256_hex(b"tampered")).unwrap();
        assert!(matches!(store.fetch("heart", "1").await, Err(StoreError::Integrity { .. })));
    }

    #[tokio::test]
    async fn memory_store_put_and_remove() {
        let store = MemoryArtifactStore::new();
        store.put("kidney", "3", b"x".to_vec());
        assert_eq!(store.fetch("kidney", "3").await.unwrap(), b"x");
        assert!(store.remove("kidney", "3"));
        assert!(matches!(store.fetch("kidney", "3").await, Err(StoreError::NotFound { .. })));
        assert!(store.domains().await.unwrap().is_empty());
    }
}
