#![forbid(unsafe_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use keel_core::{Cluster, CreatorError, ManagedKind, NamedCreator, ObjectKey, ReadCache, Registry, ResourceStore, StoreError};
use keel_orchestrate::{CreatorSet, EngineConfig, Orchestrator, TemplateSource};
use keel_store::MemoryStore;

/// Memory store whose reads take a while and which records how many reads
/// overlap.
#[derive(Default)]
struct SlowStore {
    inner: MemoryStore,
    active: AtomicUsize,
    peak: AtomicUsize,
}

impl SlowStore {
    async fn slow<T>(&self, f: impl FnOnce() -> T) -> T {
        let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        let out = f();
        self.active.fetch_sub(1, Ordering::SeqCst);
        out
    }
}

#[async_trait]
impl<K: ManagedKind> ResourceStore<K> for SlowStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>, StoreError> {
        let fut = ResourceStore::<K>::get(&self.inner, key);
        let res = fut.await;
        self.slow(|| res).await
    }
    async fn create(&self, obj: &K) -> Result<K, StoreError> {
        self.inner.create(obj).await
    }
    async fn update(&self, obj: &K) -> Result<K, StoreError> {
        self.inner.update(obj).await
    }
}

#[async_trait]
impl<K: ManagedKind> ReadCache<K> for SlowStore {
    async fn cached(&self, key: &ObjectKey) -> Result<Option<K>, StoreError> {
        ResourceStore::<K>::get(self, key).await
    }
}

fn tenant(name: &str) -> Cluster {
    serde_json::from_value(serde_json::json!({ "metadata": { "name": name, "uid": format!("uid-{name}") } })).unwrap()
}

fn templates() -> Arc<dyn TemplateSource> {
    Arc::new(|_: &Cluster, _: &str| -> Result<CreatorSet, CreatorError> {
        Ok(CreatorSet {
            services: Registry::new().with(NamedCreator::new("a", Ok)).with(NamedCreator::new("b", Ok)),
            stateful_sets: Registry::new().with(NamedCreator::new("etcd", Ok)),
            ..Default::default()
        })
    })
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_tenant_passes_never_overlap() {
    let store = Arc::new(SlowStore::default());
    let orch = Orchestrator::new(Arc::clone(&store), Arc::clone(&store), templates(), EngineConfig::default());

    let t = tenant("abc");
    let passes = (0..4).map(|_| {
        let orch = orch.clone();
        let t = t.clone();
        tokio::spawn(async move { orch.run_pass(&t).await })
    });
    for res in futures::future::join_all(passes).await {
        res.unwrap().unwrap();
    }
    assert_eq!(store.peak.load(Ordering::SeqCst), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_tenants_run_concurrently() {
    let store = Arc::new(SlowStore::default());
    let orch = Orchestrator::new(Arc::clone(&store), Arc::clone(&store), templates(), EngineConfig::default());

    let passes = ["a", "b", "c"].map(|name| {
        let orch = orch.clone();
        let t = tenant(name);
        tokio::spawn(async move { orch.run_pass(&t).await })
    });
    for res in futures::future::join_all(passes).await {
        res.unwrap().unwrap();
    }
    assert!(store.peak.load(Ordering::SeqCst) >= 2);
}
