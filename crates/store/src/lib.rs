//! Keel store: snapshot read cache fed by watch deltas, and an in-memory resource store.

#![forbid(unsafe_code)]

use std::collections::VecDeque;
use std::sync::Arc;

use arc_swap::ArcSwap;
use async_trait::async_trait;
use keel_core::{Delta, DeltaKind, Kind, ManagedKind, ObjectKey, ReadCache, StoreError};
use metrics::counter;
use rustc_hash::FxHashMap;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

pub mod memory;

pub use memory::{CallCounts, MemoryStore, Recorded};

type Slot = (Kind, ObjectKey);

/// Coalescing queue keyed by (kind, key) with FIFO order and fixed capacity.
pub struct Coalescer {
    map: FxHashMap<Slot, Delta>,
    order: VecDeque<Slot>,
    cap: usize,
    dropped: u64,
}

impl Coalescer {
    pub fn with_capacity(cap: usize) -> Self {
        Self { map: FxHashMap::default(), order: VecDeque::new(), cap: cap.max(1), dropped: 0 }
    }

    pub fn len(&self) -> usize { self.map.len() }
    pub fn is_empty(&self) -> bool { self.map.is_empty() }
    pub fn dropped(&self) -> u64 { self.dropped }
    pub fn is_full(&self) -> bool { self.order.len() >= self.cap }

    /// Later deltas for the same object replace earlier ones in place. A
    /// relist supersedes every pending delta of its kind.
    pub fn push(&mut self, d: Delta) {
        if d.kind == DeltaKind::Restarted {
            let kind = d.resource;
            self.map.retain(|(k, _), _| *k != kind);
            self.order.retain(|(k, _)| *k != kind);
        }
        let slot = (d.resource, d.key.clone());
        if !self.map.contains_key(&slot) {
            if self.order.len() >= self.cap {
                if let Some(old) = self.order.pop_front() {
                    self.map.remove(&old);
                    self.dropped += 1;
                    counter!("keel_cache_dropped_total", 1u64);
                }
            }
            self.order.push_back(slot.clone());
        }
        self.map.insert(slot, d);
    }

    pub fn drain_ready(&mut self) -> Vec<Delta> {
        let mut out = Vec::with_capacity(self.order.len());
        while let Some(slot) = self.order.pop_front() {
            if let Some(d) = self.map.remove(&slot) {
                out.push(d);
            }
        }
        out
    }
}

/// Immutable view of every cached object.
#[derive(Debug, Default)]
pub struct CacheSnapshot {
    pub epoch: u64,
    pub objects: FxHashMap<Slot, serde_json::Value>,
}

impl CacheSnapshot {
    pub fn get(&self, kind: Kind, key: &ObjectKey) -> Option<&serde_json::Value> {
        self.objects.get(&(kind, key.clone()))
    }

    pub fn len(&self) -> usize { self.objects.len() }
    pub fn is_empty(&self) -> bool { self.objects.is_empty() }
}

/// Builds snapshots from delta batches.
#[derive(Default)]
pub struct CacheBuilder {
    epoch: u64,
    objects: FxHashMap<Slot, serde_json::Value>,
}

impl CacheBuilder {
    pub fn new() -> Self { Self::default() }

    pub fn apply(&mut self, batch: Vec<Delta>) {
        for d in batch {
            let slot = (d.resource, d.key);
            match d.kind {
                DeltaKind::Applied => {
                    self.objects.insert(slot, d.raw);
                }
                DeltaKind::Deleted => {
                    self.objects.remove(&slot);
                }
                DeltaKind::Restarted => {
                    let kind = slot.0;
                    self.objects.retain(|(k, _), _| *k != kind);
                    let serde_json::Value::Array(listed) = d.raw else { continue };
                    for raw in listed {
                        if let Some(key) = ObjectKey::from_raw(kind, &raw) {
                            self.objects.insert((kind, key), raw);
                        }
                    }
                }
            }
        }
        self.epoch = self.epoch.saturating_add(1);
    }

    pub fn freeze(&self) -> Arc<CacheSnapshot> {
        Arc::new(CacheSnapshot { epoch: self.epoch, objects: self.objects.clone() })
    }
}

/// Read cache over the latest snapshot. Cheap to clone.
#[derive(Clone)]
pub struct SnapshotCache {
    snap: Arc<ArcSwap<CacheSnapshot>>,
    epoch_rx: watch::Receiver<u64>,
}

impl SnapshotCache {
    pub fn current(&self) -> Arc<CacheSnapshot> { self.snap.load_full() }
    pub fn subscribe_epoch(&self) -> watch::Receiver<u64> { self.epoch_rx.clone() }

    /// Resolve once a snapshot at or past `epoch` is published. Returns
    /// false if the ingest loop stopped first.
    pub async fn wait_for_epoch(&self, epoch: u64) -> bool {
        let mut rx = self.epoch_rx.clone();
        loop {
            if *rx.borrow_and_update() >= epoch {
                return true;
            }
            if rx.changed().await.is_err() {
                return *rx.borrow() >= epoch;
            }
        }
    }
}

#[async_trait]
impl<K: ManagedKind> ReadCache<K> for SnapshotCache {
    async fn cached(&self, key: &ObjectKey) -> Result<Option<K>, StoreError> {
        let snap = self.snap.load();
        match snap.get(K::KIND, key) {
            Some(raw) => serde_json::from_value(raw.clone()).map(Some).map_err(|e| StoreError::Codec(e.to_string())),
            None => Ok(None),
        }
    }
}

/// Spawn an ingest loop consuming deltas and swapping snapshots. Returns a
/// sender for deltas and the cache readers use.
pub fn spawn_ingest(cap: usize) -> (mpsc::Sender<Delta>, SnapshotCache) {
    let (tx, mut rx) = mpsc::channel::<Delta>(cap.max(1));
    let snap = Arc::new(ArcSwap::from_pointee(CacheSnapshot::default()));
    let (epoch_tx, epoch_rx) = watch::channel(0u64);
    let snap_clone = Arc::clone(&snap);

    tokio::spawn(async move {
        let mut coalescer = Coalescer::with_capacity(cap);
        let mut builder = CacheBuilder::new();
        let mut ticker = tokio::time::interval(std::time::Duration::from_millis(8));
        let publish = |coalescer: &mut Coalescer, builder: &mut CacheBuilder| {
            let batch = coalescer.drain_ready();
            if !batch.is_empty() {
                builder.apply(batch);
                let next = builder.freeze();
                let epoch = next.epoch;
                snap_clone.store(next);
                let _ = epoch_tx.send(epoch);
            }
        };
        loop {
            tokio::select! {
                maybe = rx.recv() => {
                    match maybe {
                        Some(d) => {
                            if coalescer.is_full() {
                                publish(&mut coalescer, &mut builder);
                            }
                            coalescer.push(d);
                        }
                        None => {
                            debug!("delta channel closed; draining and exiting ingest loop");
                            publish(&mut coalescer, &mut builder);
                            break;
                        }
                    }
                }
                _ = ticker.tick() => publish(&mut coalescer, &mut builder),
            }
        }
        info!("cache ingest loop stopped");
    });

    (tx, SnapshotCache { snap, epoch_rx })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta(kind: DeltaKind, name: &str, v: i64) -> Delta {
        Delta {
            resource: Kind::ConfigMap,
            key: ObjectKey::namespaced("ns", name),
            kind,
            raw: serde_json::json!({ "metadata": { "name": name, "namespace": "ns" }, "data": { "v": v.to_string() } }),
        }
    }

    #[test]
    fn coalescer_keeps_latest_per_key_in_first_seen_order() {
        let mut c = Coalescer::with_capacity(8);
        c.push(delta(DeltaKind::Applied, "a", 1));
        c.push(delta(DeltaKind::Applied, "b", 1));
        c.push(delta(DeltaKind::Applied, "a", 2));
        assert_eq!(c.len(), 2);
        let out = c.drain_ready();
        assert_eq!(out[0].key.name, "a");
        assert_eq!(out[0].raw["data"]["v"], "2");
        assert_eq!(out[1].key.name, "b");
        assert!(c.is_empty());
    }

    #[test]
    fn coalescer_drops_oldest_when_full() {
        let mut c = Coalescer::with_capacity(2);
        c.push(delta(DeltaKind::Applied, "a", 1));
        c.push(delta(DeltaKind::Applied, "b", 1));
        c.push(delta(DeltaKind::Applied, "c", 1));
        assert_eq!(c.dropped(), 1);
        let names: Vec<_> = c.drain_ready().into_iter().map(|d| d.key.name).collect();
        assert_eq!(names, vec!["b", "c"]);
    }

    #[test]
    fn same_name_in_different_kinds_does_not_collide() {
        let mut b = CacheBuilder::new();
        let mut secret = delta(DeltaKind::Applied, "a", 1);
        secret.resource = Kind::Secret;
        b.apply(vec![delta(DeltaKind::Applied, "a", 1), secret]);
        assert_eq!(b.freeze().len(), 2);
    }

    #[test]
    fn relist_supersedes_pending_deltas_of_its_kind() {
        let mut c = Coalescer::with_capacity(8);
        let mut secret = delta(DeltaKind::Applied, "s", 1);
        secret.resource = Kind::Secret;
        c.push(delta(DeltaKind::Applied, "a", 1));
        c.push(secret);
        c.push(Delta::restarted(Kind::ConfigMap, vec![]));
        c.push(delta(DeltaKind::Applied, "b", 1));

        let out: Vec<_> = c.drain_ready().into_iter().map(|d| (d.resource, d.kind, d.key.name)).collect();
        assert_eq!(
            out,
            vec![
                (Kind::Secret, DeltaKind::Applied, "s".to_string()),
                (Kind::ConfigMap, DeltaKind::Restarted, String::new()),
                (Kind::ConfigMap, DeltaKind::Applied, "b".to_string()),
            ]
        );
    }
}
