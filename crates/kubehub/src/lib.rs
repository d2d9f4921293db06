//! Keel kubehub: the engine's store capability on a live API server, and the
//! watchers that feed the snapshot read cache.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use async_trait::async_trait;
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::api::rbac::v1::ClusterRole;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use keel_core::{Delta, DeltaKind, ManagedKind, ObjectKey, ReadCache, ResourceStore, StoreError, VerticalPodAutoscaler};
use kube::api::{Api, PostParams};
use kube::runtime::watcher::{self, Event};
use kube::runtime::WatchStreamExt;
use kube::Client;
use metrics::counter;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Field manager recorded on every write.
pub const FIELD_MANAGER: &str = "keel";

/// A managed kind with a known API scope.
pub trait KubeKind: ManagedKind {
    /// Api handle addressing `key`.
    fn api(client: Client, key: &ObjectKey) -> Api<Self>;
}

macro_rules! namespaced {
    ($($ty:ty),+ $(,)?) => {$(
        impl KubeKind for $ty {
            fn api(client: Client, key: &ObjectKey) -> Api<Self> {
                match key.namespace.as_deref() {
                    Some(ns) => Api::namespaced(client, ns),
                    None => Api::default_namespaced(client),
                }
            }
        }
    )+};
}

macro_rules! cluster_scoped {
    ($($ty:ty),+ $(,)?) => {$(
        impl KubeKind for $ty {
            fn api(client: Client, _key: &ObjectKey) -> Api<Self> { Api::all(client) }
        }
    )+};
}

namespaced!(Service, Secret, ConfigMap, StatefulSet, Deployment, CronJob, PodDisruptionBudget, VerticalPodAutoscaler);
cluster_scoped!(Namespace, ClusterRole, CustomResourceDefinition);

/// Translate an API failure into the engine's store vocabulary.
pub fn store_error(e: kube::Error) -> StoreError {
    match e {
        kube::Error::Api(ae) if ae.code == 404 => StoreError::NotFound,
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => StoreError::AlreadyExists,
        kube::Error::Api(ae) if ae.code == 409 => StoreError::Conflict(ae.message),
        kube::Error::SerdeError(e) => StoreError::Codec(e.to_string()),
        other => StoreError::Unavailable(other.to_string()),
    }
}

/// Typed get/create/replace against the API server.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self { Self { client } }

    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await.context("building kube client")?;
        Ok(Self::new(client))
    }

    pub fn client(&self) -> &Client { &self.client }

    fn params() -> PostParams {
        PostParams { field_manager: Some(FIELD_MANAGER.into()), ..Default::default() }
    }
}

fn key_of<K: ManagedKind>(obj: &K) -> Result<ObjectKey, StoreError> {
    ObjectKey::of(obj).ok_or_else(|| StoreError::Codec("object has no metadata.name".into()))
}

#[async_trait]
impl<K: KubeKind> ResourceStore<K> for KubeStore {
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>, StoreError> {
        K::api(self.client.clone(), key).get_opt(&key.name).await.map_err(store_error)
    }

    async fn create(&self, obj: &K) -> Result<K, StoreError> {
        let key = key_of(obj)?;
        K::api(self.client.clone(), &key).create(&Self::params(), obj).await.map_err(store_error)
    }

    async fn update(&self, obj: &K) -> Result<K, StoreError> {
        let key = key_of(obj)?;
        K::api(self.client.clone(), &key).replace(&key.name, &Self::params(), obj).await.map_err(store_error)
    }
}

/// Uncached reads straight from the API server, for one-shot runs without watchers.
#[async_trait]
impl<K: KubeKind> ReadCache<K> for KubeStore {
    async fn cached(&self, key: &ObjectKey) -> Result<Option<K>, StoreError> {
        <Self as ResourceStore<K>>::get(self, key).await
    }
}

fn strip_managed_fields(v: &mut serde_json::Value) {
    if let Some(meta) = v.get_mut("metadata").and_then(|m| m.as_object_mut()) {
        meta.remove("managedFields");
    }
}

/// Cache delta for an observed object. `None` for unnamed objects.
pub fn delta_from<K: ManagedKind>(obj: &K, kind: DeltaKind) -> Result<Option<Delta>> {
    let Some(key) = ObjectKey::of(obj) else { return Ok(None) };
    let mut raw = serde_json::to_value(obj).with_context(|| format!("serializing {}", K::KIND))?;
    strip_managed_fields(&mut raw);
    Ok(Some(Delta { resource: K::KIND, key, kind, raw }))
}

/// Relist delta replacing every cached object of `K`.
pub fn relist_delta<K: ManagedKind>(list: &[K]) -> Delta {
    let objects = list
        .iter()
        .filter_map(|o| match delta_from(o, DeltaKind::Applied) {
            Ok(d) => d.map(|d| d.raw),
            Err(e) => {
                warn!(kind = %K::KIND, error = %e, "dropping unencodable object");
                None
            }
        })
        .collect();
    Delta::restarted(K::KIND, objects)
}

async fn forward<K: ManagedKind>(tx: &mpsc::Sender<Delta>, obj: &K, kind: DeltaKind) -> bool {
    match delta_from(obj, kind) {
        Ok(Some(d)) => tx.send(d).await.is_ok(),
        Ok(None) => true,
        Err(e) => {
            warn!(kind = %K::KIND, error = %e, "dropping unencodable object");
            true
        }
    }
}

/// List+watch every object of `K` across namespaces and forward deltas until
/// the receiving side closes.
pub async fn watch_kind<K: KubeKind>(client: Client, tx: mpsc::Sender<Delta>) {
    let api: Api<K> = Api::all(client);
    let stream = watcher::watcher(api, watcher::Config::default()).default_backoff();
    futures::pin_mut!(stream);
    info!(kind = %K::KIND, "watcher started");
    while let Some(ev) = stream.next().await {
        let open = match ev {
            Ok(Event::Applied(o)) => forward(&tx, &o, DeltaKind::Applied).await,
            Ok(Event::Deleted(o)) => forward(&tx, &o, DeltaKind::Deleted).await,
            Ok(Event::Restarted(list)) => {
                debug!(kind = %K::KIND, count = list.len(), "watch restart");
                tx.send(relist_delta(&list)).await.is_ok()
            }
            Err(e) => {
                counter!("keel_watch_errors_total", 1u64, "kind" => K::KIND.as_str());
                warn!(kind = %K::KIND, error = %e, "watch error");
                true
            }
        };
        if !open {
            debug!(kind = %K::KIND, "delta receiver closed");
            return;
        }
    }
    warn!(kind = %K::KIND, "watcher stream ended");
}

/// One watcher task per managed kind.
pub fn spawn_watchers(client: &Client, tx: &mpsc::Sender<Delta>) -> Vec<JoinHandle<()>> {
    vec![
        tokio::spawn(watch_kind::<Namespace>(client.clone(), tx.clone())),
        tokio::spawn(watch_kind::<Service>(client.clone(), tx.clone())),
        tokio::spawn(watch_kind::<Secret>(client.clone(), tx.clone())),
        tokio::spawn(watch_kind::<ConfigMap>(client.clone(), tx.clone())),
        tokio::spawn(watch_kind::<StatefulSet>(client.clone(), tx.clone())),
        tokio::spawn(watch_kind::<Deployment>(client.clone(), tx.clone())),
        tokio::spawn(watch_kind::<CronJob>(client.clone(), tx.clone())),
        tokio::spawn(watch_kind::<PodDisruptionBudget>(client.clone(), tx.clone())),
        tokio::spawn(watch_kind::<VerticalPodAutoscaler>(client.clone(), tx.clone())),
        tokio::spawn(watch_kind::<ClusterRole>(client.clone(), tx.clone())),
        tokio::spawn(watch_kind::<CustomResourceDefinition>(client.clone(), tx.clone())),
    ]
}
