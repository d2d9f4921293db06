//! Keel reconcile: converge one registry of creators against a store.
//!
//! For every entry the stored object is read from the cache; absent objects
//! are created from the creator's output on the empty value, present ones are
//! updated only when the creator's output differs semantically. The first
//! error aborts the remaining entries. Writes already made are kept.

#![forbid(unsafe_code)]

use std::fmt;

use keel_core::{CreatorError, Error, ManagedKind, ObjectKey, ReadCache, Registry, ResourceStore, StoreOp};
use metrics::counter;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub mod diff;

pub use diff::{diff_summary, managed_view, strip_noisy, DiffSummary};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Outcome {
    Created,
    Updated,
    Unchanged,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Created => "created",
            Outcome::Updated => "updated",
            Outcome::Unchanged => "unchanged",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

/// What one reconcile call did, per object in registration order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReconcileReport {
    pub objects: Vec<(ObjectKey, Outcome)>,
}

impl ReconcileReport {
    pub fn created(&self) -> usize { self.count(Outcome::Created) }
    pub fn updated(&self) -> usize { self.count(Outcome::Updated) }
    pub fn unchanged(&self) -> usize { self.count(Outcome::Unchanged) }
    pub fn mutations(&self) -> usize { self.created() + self.updated() }

    fn count(&self, outcome: Outcome) -> usize {
        self.objects.iter().filter(|(_, o)| *o == outcome).count()
    }
}

/// Set name and namespace from the registry key. Cluster-scoped kinds get no namespace.
pub fn stamp_identity<K: ManagedKind>(obj: &mut K, key: &ObjectKey) {
    let meta = obj.meta_mut();
    meta.name = Some(key.name.clone());
    meta.namespace = key.namespace.clone();
}

/// Converge every entry of `registry` in `namespace` (ignored for
/// cluster-scoped kinds).
pub async fn reconcile<K, S, C>(
    registry: &Registry<K>,
    namespace: &str,
    store: &S,
    cache: &C,
) -> Result<ReconcileReport, Error>
where
    K: ManagedKind,
    S: ResourceStore<K> + ?Sized,
    C: ReadCache<K> + ?Sized,
{
    let mut report = ReconcileReport::default();
    for entry in registry {
        let key = ObjectKey::for_kind(K::KIND, namespace, entry.name());
        let outcome = reconcile_one(entry.name(), &key, |existing| entry.create(existing), store, cache).await?;
        counter!("keel_reconcile_objects_total", 1u64, "kind" => K::KIND.as_str(), "outcome" => outcome.as_str());
        report.objects.push((key, outcome));
    }
    Ok(report)
}

async fn reconcile_one<K, S, C, F>(name: &str, key: &ObjectKey, create: F, store: &S, cache: &C) -> Result<Outcome, Error>
where
    K: ManagedKind,
    S: ResourceStore<K> + ?Sized,
    C: ReadCache<K> + ?Sized,
    F: Fn(K) -> Result<K, CreatorError>,
{
    let kind = K::KIND;
    let existing = cache.cached(key).await.map_err(|e| Error::store(StoreOp::Get, kind, key.clone(), e))?;
    let creator_err = |source: CreatorError| Error::Creator { kind, key: key.clone(), source };

    let Some(current) = existing else {
        let mut desired = create(K::default()).map_err(creator_err)?;
        stamp_identity(&mut desired, key);
        store.create(&desired).await.map_err(|e| Error::store(StoreOp::Create, kind, key.clone(), e))?;
        info!(kind = %kind, object = name, namespace = ?key.namespace, "created");
        return Ok(Outcome::Created);
    };

    let mut desired = create(current.clone()).map_err(creator_err)?;
    stamp_identity(&mut desired, key);

    let codec = |e: serde_json::Error| Error::Codec { kind, key: key.clone(), message: e.to_string() };
    let before = managed_view(&current).map_err(codec)?;
    let after = managed_view(&desired).map_err(codec)?;
    if before == after {
        debug!(kind = %kind, object = name, "unchanged");
        return Ok(Outcome::Unchanged);
    }

    let summary = diff_summary(&after, &before);
    debug!(kind = %kind, object = name, adds = summary.adds, updates = summary.updates, removes = summary.removes, "updating");
    store.update(&desired).await.map_err(|e| Error::store(StoreOp::Update, kind, key.clone(), e))?;
    info!(kind = %kind, object = name, namespace = ?key.namespace, "updated");
    Ok(Outcome::Updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::api::core::v1::ConfigMap;
    use k8s_openapi::api::rbac::v1::ClusterRole;

    #[test]
    fn stamp_identity_follows_scope() {
        let mut cm = ConfigMap::default();
        stamp_identity(&mut cm, &ObjectKey::namespaced("ns", "a"));
        assert_eq!((cm.metadata.name.as_deref(), cm.metadata.namespace.as_deref()), (Some("a"), Some("ns")));

        let mut role = ClusterRole::default();
        role.metadata.namespace = Some("leftover".into());
        stamp_identity(&mut role, &ObjectKey::cluster("r"));
        assert_eq!(role.metadata.namespace, None);
    }

    #[test]
    fn report_counts() {
        let r = ReconcileReport {
            objects: vec![
                (ObjectKey::cluster("a"), Outcome::Created),
                (ObjectKey::cluster("b"), Outcome::Unchanged),
                (ObjectKey::cluster("c"), Outcome::Updated),
            ],
        };
        assert_eq!((r.created(), r.updated(), r.unchanged(), r.mutations()), (1, 1, 1, 2));
    }
}
