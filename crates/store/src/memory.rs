//! In-memory resource store.
//!
//! Behaves like the API server for the parts the engine relies on: UID and
//! resourceVersion assignment, optimistic concurrency on update, status kept
//! on spec updates. Every call is counted and journaled so callers can assert
//! on exactly what a pass did.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use keel_core::{Kind, ManagedKind, ObjectKey, ReadCache, ResourceStore, StoreError, StoreOp};
use rustc_hash::FxHashMap;
use serde_json::Value as Json;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CallCounts {
    pub gets: usize,
    pub creates: usize,
    pub updates: usize,
}

impl CallCounts {
    pub fn mutations(&self) -> usize { self.creates + self.updates }
}

/// One store call, in the order it happened.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recorded {
    pub op: StoreOp,
    pub kind: Kind,
    pub key: ObjectKey,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<(Kind, ObjectKey), Json>,
    next_rv: u64,
    calls: FxHashMap<Kind, CallCounts>,
    journal: Vec<Recorded>,
    faults: FxHashMap<(Kind, StoreOp), VecDeque<StoreError>>,
}

#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Seed an object without counting it as a call. Returns the stored copy.
    pub fn insert<K: ManagedKind>(&self, obj: K) -> Result<K, StoreError> {
        let key = ObjectKey::of(&obj).ok_or_else(|| StoreError::Codec("object has no name".into()))?;
        let mut inner = self.lock();
        let mut raw = to_json(&obj)?;
        inner.next_rv += 1;
        stamp_server_fields(&mut raw, inner.next_rv, None);
        inner.objects.insert((K::KIND, key), raw.clone());
        from_json(raw)
    }

    /// Stored copy of an object, without counting a read.
    pub fn object<K: ManagedKind>(&self, key: &ObjectKey) -> Option<K> {
        let raw = self.lock().objects.get(&(K::KIND, key.clone())).cloned()?;
        from_json(raw).ok()
    }

    pub fn keys(&self, kind: Kind) -> Vec<ObjectKey> {
        self.lock().objects.keys().filter(|(k, _)| *k == kind).map(|(_, key)| key.clone()).collect()
    }

    /// Every stored object as raw JSON, ordered by kind then key.
    pub fn dump(&self) -> Vec<(Kind, ObjectKey, Json)> {
        self.lock().objects.iter().map(|((kind, key), v)| (*kind, key.clone(), v.clone())).collect()
    }

    pub fn len(&self) -> usize { self.lock().objects.len() }
    pub fn is_empty(&self) -> bool { self.lock().objects.is_empty() }

    pub fn calls(&self, kind: Kind) -> CallCounts {
        self.lock().calls.get(&kind).copied().unwrap_or_default()
    }

    pub fn total_mutations(&self) -> usize {
        self.lock().calls.values().map(CallCounts::mutations).sum()
    }

    pub fn journal(&self) -> Vec<Recorded> { self.lock().journal.clone() }

    /// Kinds in the order they were first touched.
    pub fn kinds_touched(&self) -> Vec<Kind> {
        let mut out: Vec<Kind> = Vec::new();
        for r in self.lock().journal.iter() {
            if !out.contains(&r.kind) {
                out.push(r.kind);
            }
        }
        out
    }

    /// Forget counters and journal; objects stay.
    pub fn reset_calls(&self) {
        let mut inner = self.lock();
        inner.calls.clear();
        inner.journal.clear();
    }

    /// Make the next `op` on `kind` fail with `err`. Queued faults fire in order.
    pub fn fail_next(&self, kind: Kind, op: StoreOp, err: StoreError) {
        self.lock().faults.entry((kind, op)).or_default().push_back(err);
    }

    /// Bump the stored resourceVersion behind the caller's back, as a
    /// concurrent writer would.
    pub fn touch(&self, kind: Kind, key: &ObjectKey) -> bool {
        let mut inner = self.lock();
        inner.next_rv += 1;
        let rv = inner.next_rv;
        match inner.objects.get_mut(&(kind, key.clone())) {
            Some(raw) => {
                raw["metadata"]["resourceVersion"] = Json::String(rv.to_string());
                true
            }
            None => false,
        }
    }

    fn begin(inner: &mut Inner, op: StoreOp, kind: Kind, key: &ObjectKey) -> Result<(), StoreError> {
        let counts = inner.calls.entry(kind).or_default();
        match op {
            StoreOp::Get => counts.gets += 1,
            StoreOp::Create => counts.creates += 1,
            StoreOp::Update => counts.updates += 1,
        }
        inner.journal.push(Recorded { op, kind, key: key.clone() });
        match inner.faults.get_mut(&(kind, op)).and_then(|q| q.pop_front()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn read<K: ManagedKind>(&self, key: &ObjectKey) -> Result<Option<K>, StoreError> {
        let mut inner = self.lock();
        Self::begin(&mut inner, StoreOp::Get, K::KIND, key)?;
        match inner.objects.get(&(K::KIND, key.clone())) {
            Some(raw) => from_json(raw.clone()).map(Some),
            None => Ok(None),
        }
    }
}

fn to_json<K: ManagedKind>(obj: &K) -> Result<Json, StoreError> {
    serde_json::to_value(obj).map_err(|e| StoreError::Codec(e.to_string()))
}

fn from_json<K: ManagedKind>(raw: Json) -> Result<K, StoreError> {
    serde_json::from_value(raw).map_err(|e| StoreError::Codec(e.to_string()))
}

fn stamp_server_fields(raw: &mut Json, rv: u64, uid: Option<Json>) {
    if !raw.get("metadata").map(Json::is_object).unwrap_or(false) {
        raw["metadata"] = Json::Object(serde_json::Map::new());
    }
    let meta = &mut raw["metadata"];
    meta["resourceVersion"] = Json::String(rv.to_string());
    let uid = uid
        .or_else(|| meta.get("uid").cloned())
        .unwrap_or_else(|| Json::String(Uuid::new_v4().to_string()));
    meta["uid"] = uid;
}

#[async_trait]
impl<K: ManagedKind> ResourceStore<K> for MemoryStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>, StoreError> {
        self.read(key)
    }

    async fn create(&self, obj: &K) -> Result<K, StoreError> {
        let key = ObjectKey::of(obj).ok_or_else(|| StoreError::Codec("object has no name".into()))?;
        let mut inner = self.lock();
        Self::begin(&mut inner, StoreOp::Create, K::KIND, &key)?;
        if inner.objects.contains_key(&(K::KIND, key.clone())) {
            return Err(StoreError::AlreadyExists);
        }
        let mut raw = to_json(obj)?;
        if let Some(meta) = raw.get_mut("metadata").and_then(Json::as_object_mut) {
            // Client-supplied values are ignored on create
            meta.remove("uid");
            meta.remove("resourceVersion");
        }
        inner.next_rv += 1;
        stamp_server_fields(&mut raw, inner.next_rv, None);
        inner.objects.insert((K::KIND, key), raw.clone());
        from_json(raw)
    }

    async fn update(&self, obj: &K) -> Result<K, StoreError> {
        let key = ObjectKey::of(obj).ok_or_else(|| StoreError::Codec("object has no name".into()))?;
        let mut inner = self.lock();
        Self::begin(&mut inner, StoreOp::Update, K::KIND, &key)?;
        let stored = inner.objects.get(&(K::KIND, key.clone())).cloned().ok_or(StoreError::NotFound)?;
        let stored_rv = stored["metadata"]["resourceVersion"].as_str().unwrap_or_default().to_string();
        if let Some(rv) = obj.meta().resource_version.as_deref() {
            if rv != stored_rv {
                return Err(StoreError::Conflict(format!(
                    "the object has been modified (resourceVersion {} != {})",
                    rv, stored_rv
                )));
            }
        }
        let mut raw = to_json(obj)?;
        // status belongs to the status subresource
        if let Some(map) = raw.as_object_mut() {
            match stored.get("status") {
                Some(status) => {
                    map.insert("status".into(), status.clone());
                }
                None => {
                    map.remove("status");
                }
            }
        }
        inner.next_rv += 1;
        stamp_server_fields(&mut raw, inner.next_rv, stored["metadata"].get("uid").cloned());
        inner.objects.insert((K::KIND, key), raw.clone());
        from_json(raw)
    }
}

#[async_trait]
impl<K: ManagedKind> ReadCache<K> for MemoryStore {
    async fn cached(&self, key: &ObjectKey) -> Result<Option<K>, StoreError> {
        self.read(key)
    }
}
