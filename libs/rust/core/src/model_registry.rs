//! Model registry: versioned, lazily loaded, in-memory bundle cache.
//!
//! Entries move UNLOADED -> LOADING -> READY | FAILED. A FAILED entry is retried by
//! the next `get_bundle` call; READY entries stay until invalidated.
//!
//! Loads are single-flight per key: the first caller spawns the load task and
//! parks a shared future in the entry table, later callers for the same key
//! await that future. The table lock only guards map operations and is never held
//! across an await, so unrelated keys load independently.
//!
//! `get_bundle` spawns onto the ambient tokio runtime and must be called from
//! within one.

use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};
use tracing::{debug, info, instrument, warn};

use crate::artifact_store::ArtifactStore;
use crate::bundle::{ArtifactBundle, BundleKey};
use crate::errors::{RegistryError, StoreError};
use crate::metrics::{domain_attrs, REGISTRY_METRICS};
use crate::versions::VersionSource;

type LoadResult = Result<Arc<ArtifactBundle>, RegistryError>;
type LoadFuture = Shared<BoxFuture<'static, LoadResult>>;

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Upper bound on a single fetch from the artifact store.
    pub load_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self { Self { load_timeout: Duration::from_secs(10) } }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadState { Unloaded, Loading, Ready, Failed }

#[derive(Debug, Clone, Serialize)]
pub struct EntrySnapshot {
    pub domain: String,
    pub version: String,
    pub state: LoadState,
    /// Load time for READY entries, failure time for FAILED ones.
    pub since: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

enum Slot {
    Loading { attempt: u64, load: LoadFuture },
    Ready { bundle: Arc<ArtifactBundle>, loaded_at: DateTime<Utc> },
    Failed { error: RegistryError, failed_at: DateTime<Utc> },
}

impl Slot {
    fn state(&self) -> LoadState {
        match self {
            Slot::Loading { .. } => LoadState::Loading,
            Slot::Ready { .. } => LoadState::Ready,
            Slot::Failed { .. } => LoadState::Failed,
        }
    }
}

#[derive(Default)]
struct Table {
    slots: HashMap<BundleKey, Slot>,
    next_attempt: u64,
    closed: bool,
}

struct Inner {
    store: Arc<dyn ArtifactStore>,
    versions: Arc<dyn VersionSource>,
    config: RegistryConfig,
    table: Mutex<Table>,
}

fn load_failure(key: &BundleKey, reason: impl Into<String>) -> RegistryError {
    RegistryError::LoadFailure { domain: key.domain.clone(), version: key.version.clone(), reason: reason.into() }
}

impl Inner {
    async fn load(&self, key: &BundleKey) -> LoadResult {
        let fetched = tokio::time::timeout(self.config.load_timeout, self.store.fetch(&key.domain, &key.version)).await;
        let bytes = match fetched {
            Err(_) => return Err(load_failure(key, format!("artifact fetch timed out after {} ms", self.config.load_timeout.as_millis()))),
            Ok(Err(StoreError::NotFound { .. })) => {
                return Err(RegistryError::NotFound { domain: key.domain.clone(), version: key.version.clone() })
            }
            Ok(Err(e)) => return Err(load_failure(key, e.to_string())),
            Ok(Ok(bytes)) => bytes,
        };
        let bundle = ArtifactBundle::decode(&bytes).map_err(|e| load_failure(key, e.to_string()))?;
        if bundle.key() != *key {
            return Err(load_failure(key, format!("artifact declares {} but is stored under {key}", bundle.key())));
        }
        Ok(Arc::new(bundle))
    }

    /// Records the outcome of `attempt` unless the entry was invalidated or
    /// replaced by a newer attempt in the meantime.
    fn settle(&self, key: &BundleKey, attempt: u64, outcome: &LoadResult, elapsed: Duration) {
        let attrs = domain_attrs(&key.domain, &key.version);
        REGISTRY_METRICS.load_latency_ms.record(elapsed.as_secs_f64() * 1000.0, &attrs);
        let applied = {
            let mut table = self.table.lock();
            let current = matches!(table.slots.get(key), Some(Slot::Loading { attempt: a, .. }) if *a == attempt);
            if current {
                let slot = match outcome {
                    Ok(bundle) => Slot::Ready { bundle: Arc::clone(bundle), loaded_at: Utc::now() },
                    Err(error) => Slot::Failed { error: error.clone(), failed_at: Utc::now() },
                };
                table.slots.insert(key.clone(), slot);
            }
            current
        };
        match outcome {
            Ok(_) => info!(%key, attempt, elapsed_ms = elapsed.as_millis() as u64, "bundle loaded"),
            Err(error) => {
                REGISTRY_METRICS.load_failures_total.add(1, &attrs);
                warn!(%key, attempt, %error, "bundle load failed");
            }
        }
        if !applied { debug!(%key, attempt, "load outcome discarded, entry was invalidated"); }
    }
}

/// Explicit, injectable registry handle. Clones share the same entry table.
#[derive(Clone)]
pub struct ModelRegistry {
    inner: Arc<Inner>,
}

impl ModelRegistry {
    pub fn new(store: Arc<dyn ArtifactStore>, versions: Arc<dyn VersionSource>, config: RegistryConfig) -> Self {
        Self { inner: Arc::new(Inner { store, versions, config, table: Mutex::new(Table::default()) }) }
    }

    pub fn store(&self) -> &Arc<dyn ArtifactStore> { &self.inner.store }

    /// Active version for `domain`, read from the version source on every call.
    pub async fn resolve(&self, domain: &str) -> Result<String, RegistryError> {
        match self.inner.versions.active_version(domain).await {
            Ok(Some(version)) => Ok(version),
            Ok(None) => Err(RegistryError::NotFound { domain: domain.to_string(), version: "none".into() }),
            Err(e) => Err(RegistryError::VersionLookup { domain: domain.to_string(), reason: e.to_string() }),
        }
    }

    /// Bundle for the domain's current active version.
    pub async fn get_active(&self, domain: &str) -> Result<Arc<ArtifactBundle>, RegistryError> {
        let version = self.resolve(domain).await?;
        self.get_bundle(domain, &version).await
    }

    #[instrument(level = "debug", skip(self))]
    pub async fn get_bundle(&self, domain: &str, version: &str) -> Result<Arc<ArtifactBundle>, RegistryError> {
        let key = BundleKey::new(domain, version);
        let load = {
            let mut table = self.inner.table.lock();
            if table.closed { return Err(RegistryError::Closed); }
            match table.slots.get(&key) {
                Some(Slot::Ready { bundle, .. }) => {
                    REGISTRY_METRICS.cache_hits_total.add(1, &domain_attrs(domain, version));
                    return Ok(Arc::clone(bundle));
                }
                Some(Slot::Loading { load, .. }) => load.clone(),
                Some(Slot::Failed { .. }) | None => {
                    table.next_attempt += 1;
                    let attempt = table.next_attempt;
                    let load = self.spawn_load(key.clone(), attempt);
                    table.slots.insert(key, Slot::Loading { attempt, load: load.clone() });
                    load
                }
            }
        };
        load.await
    }

    fn spawn_load(&self, key: BundleKey, attempt: u64) -> LoadFuture {
        REGISTRY_METRICS.loads_total.add(1, &domain_attrs(&key.domain, &key.version));
        debug!(%key, attempt, "starting bundle load");
        let inner = Arc::clone(&self.inner);
        let task_key = key.clone();
        let handle = tokio::spawn(async move {
            let started = Instant::now();
            let outcome = inner.load(&task_key).await;
            inner.settle(&task_key, attempt, &outcome, started.elapsed());
            outcome
        });
        let weak: Weak<Inner> = Arc::downgrade(&self.inner);
        async move {
            match handle.await {
                Ok(outcome) => outcome,
                Err(join_err) => {
                    let error = load_failure(&key, format!("load task did not complete: {join_err}"));
                    if let Some(inner) = weak.upgrade() { inner.settle(&key, attempt, &Err(error.clone()), Duration::ZERO); }
                    Err(error)
                }
            }
        }
        .boxed()
        .shared()
    }

    /// Evicts the entry. Callers already holding the bundle keep a valid `Arc`; an
    /// in-flight load still answers its own waiters but is not cached.
    pub fn invalidate(&self, domain: &str, version: &str) -> bool {
        let removed = self.inner.table.lock().slots.remove(&BundleKey::new(domain, version)).is_some();
        if removed {
            REGISTRY_METRICS.invalidations_total.add(1, &domain_attrs(domain, version));
            info!(%domain, %version, "bundle invalidated");
        }
        removed
    }

    /// Evicts every entry.
    pub fn clear(&self) {
        let n = {
            let mut table = self.inner.table.lock();
            let n = table.slots.len();
            table.slots.clear();
            n
        };
        info!(evicted = n, "model cache cleared");
    }

    pub fn state(&self, domain: &str, version: &str) -> LoadState {
        self.inner.table.lock().slots.get(&BundleKey::new(domain, version)).map(Slot::state).unwrap_or(LoadState::Unloaded)
    }

    pub fn snapshot(&self) -> Vec<EntrySnapshot> {
        let table = self.inner.table.lock();
        let mut out: Vec<EntrySnapshot> = table
            .slots
            .iter()
            .map(|(key, slot)| {
                let (since, error) = match slot {
                    Slot::Loading { .. } => (None, None),
                    Slot::Ready { loaded_at, .. } => (Some(*loaded_at), None),
                    Slot::Failed { error, failed_at } => (Some(*failed_at), Some(error.to_string())),
                };
                EntrySnapshot { domain: key.domain.clone(), version: key.version.clone(), state: slot.state(), since, error }
            })
            .collect();
        out.sort_by(|a, b| (&a.domain, &a.version).cmp(&(&b.domain, &b.version)));
        out
    }

    /// Resolves and loads each domain concurrently. Failures are logged and
    /// returned; none of them is fatal.
    pub async fn preload(&self, domains: &[String]) -> Vec<(String, Result<BundleKey, RegistryError>)> {
        let loads = domains.iter().map(|domain| async move {
            let res = self.get_active(domain).await.map(|b| b.key());
            match &res {
                Ok(key) => info!(%key, "preloaded bundle"),
                Err(error) => warn!(%domain, %error, "preload failed"),
            }
            (domain.clone(), res)
        });
        join_all(loads).await
    }

    /// Tears the registry down: entries are dropped and later calls fail with
    /// `RegistryError::Closed`. Bundles already handed out stay valid.
    pub fn shutdown(&self) {
        let mut table = self.inner.table.lock();
        table.closed = true;
        table.slots.clear();
        info!("model registry shut down");
    }

    pub fn is_closed(&self) -> bool { self.inner.table.lock().closed }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::artifact_store::MemoryArtifactStore;
    use crate::versions::StaticVersions;
    use serde_json::json;

    fn doc(domain: &str, version: &str) -> Vec<u8> {
        json!({
            "domain": domain,
            "version": version,
            "features": [{"name": "a"}, {"name": "b"}],
            "model": {"kind": "logistic", "intercept": 0.0, "coefficients": [1.0, 1.0]}
        })
        .to_string()
        .into_bytes()
    }

    fn registry(store: Arc<MemoryArtifactStore>, versions: Arc<StaticVersions>) -> ModelRegistry {
        ModelRegistry::new(store, versions, RegistryConfig::default())
    }

    #[tokio::test]
    async fn loads_once_then_serves_from_cache() {
        let store = Arc::new(MemoryArtifactStore::new());
        store.put("heart", "1", doc("heart", "1"));
        let reg = registry(store.clone(), Arc::new(StaticVersions::new([("heart", "1")])));
        assert_eq!(reg.state("heart", "1"), LoadState::Unloaded);
        let first = reg.get_active("heart").await.unwrap();
        assert_eq!(reg.state("heart", "1"), LoadState::Ready);
        // Removing the artifact does not matter once READY.
        store.remove("heart", "1");
        let second = reg.get_bundle("heart", "1").await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
    }

    #[tokio::test]
    async fn unknown_domain_has_no_version() {
        let reg = registry(Arc::new(MemoryArtifactStore::new()), Arc::new(StaticVersions::default()));
        assert!(matches!(reg.get_active("liver").await, Err(RegistryError::NotFound { .. })));
    }

    #[tokio::test]
    async fn mismatched_key_is_load_failure() {
        let store = Arc::new(MemoryArtifactStore::new());
        store.put("heart", "2", doc("heart", "1"));
        let reg = registry(store, Arc::new(StaticVersions::default()));
        let err = reg.get_bundle("heart", "2").await.unwrap_err();
        assert!(matches!(err, RegistryError::LoadFailure { .. }));
        assert_eq!(reg.state("heart", "2"), LoadState::Failed);
        assert!(reg.snapshot()[0].error.is_some());
    }

    #[tokio::test]
    async fn invalidate_keeps_outstanding_handles_valid() {
        let store = Arc::new(MemoryArtifactStore::new());
        store.put("heart", "1", doc("heart", "1"));
        let reg = registry(store.clone(), Arc::new(StaticVersions::default()));
        let held = reg.get_bundle("heart", "1").await.unwrap();
        assert!(reg.invalidate("heart", "1"));
        assert!(!reg.invalidate("heart", "1"));
        assert_eq!(reg.state("heart", "1"), LoadState::Unloaded);
        assert_eq!(held.metadata().version, "1");
        let fresh = reg.get_bundle("heart", "1").await.unwrap();
        assert!(!Arc::ptr_eq(&held, &fresh));
    }

    #[tokio::test]
    async fn version_switch_is_seen_on_next_resolve() {
        let store = Arc::new(MemoryArtifactStore::new());
        store.put("heart", "1", doc("heart", "1"));
        store.put("heart", "2", doc("heart", "2"));
        let versions = Arc::new(StaticVersions::new([("heart", "1")]));
        let reg = registry(store, versions.clone());
        assert_eq!(reg.get_active("heart").await.unwrap().metadata().version, "1");
        versions.set("heart", "2");
        assert_eq!(reg.get_active("heart").await.unwrap().metadata().version, "2");
        assert_eq!(reg.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn shutdown_rejects_later_calls() {
        let store = Arc::new(MemoryArtifactStore::new());
        store.put("heart", "1", doc("heart", "1"));
        let reg = registry(store, Arc::new(StaticVersions::default()));
        let held = reg.get_bundle("heart", "1").await.unwrap();
        reg.shutdown();
        assert!(reg.is_closed());
        assert_eq!(reg.get_bundle("heart", "1").await.unwrap_err(), RegistryError::Closed);
        assert!(reg.snapshot().is_empty());
        assert_eq!(held.metadata().domain, "heart");
    }

    #[tokio::test]
    async fn preload_reports_each_domain() {
        let store = Arc::new(MemoryArtifactStore::new());
        store.put("heart", "1", doc("heart", "1"));
        let reg = registry(store, Arc::new(StaticVersions::new([("heart", "1"), ("kidney", "4")])));
        let out = reg.preload(&["heart".to_string(), "kidney".to_string()]).await;
        assert!(out[0].1.is_ok());
        assert!(matches!(out[1].1, Err(RegistryError::NotFound { .. })));
        assert_eq!(reg.state("heart", "1"), LoadState::Ready);
    }
}
