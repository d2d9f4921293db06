//! Store capability consumed by the reconciler.
//!
//! The engine needs three writes-and-reads (`get`, `create`, `update`) on the
//! authoritative store plus a read cache with `get` semantics. Both are typed
//! per kind so the reconciler stays generic.

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::api::rbac::v1::ClusterRole;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;

use crate::{ManagedKind, ObjectKey, StoreError, VerticalPodAutoscaler};

#[async_trait]
pub trait ResourceStore<K: ManagedKind>: Send + Sync {
    /// `Ok(None)` when the object does not exist.
    async fn get(&self, key: &ObjectKey) -> Result<Option<K>, StoreError>;

    async fn create(&self, obj: &K) -> Result<K, StoreError>;

    /// Optimistic update: a stale resourceVersion yields [`StoreError::Conflict`].
    async fn update(&self, obj: &K) -> Result<K, StoreError>;
}

/// Read side used for the fetch step of a reconcile. May lag the store.
#[async_trait]
pub trait ReadCache<K: ManagedKind>: Send + Sync {
    async fn cached(&self, key: &ObjectKey) -> Result<Option<K>, StoreError>;
}

/// A store serving every kind the orchestrator touches.
pub trait ClusterStore:
    ResourceStore<Namespace>
    + ResourceStore<Service>
    + ResourceStore<Secret>
    + ResourceStore<ConfigMap>
    + ResourceStore<StatefulSet>
    + ResourceStore<Deployment>
    + ResourceStore<CronJob>
    + ResourceStore<PodDisruptionBudget>
    + ResourceStore<VerticalPodAutoscaler>
    + ResourceStore<ClusterRole>
    + ResourceStore<CustomResourceDefinition>
{
}

impl<T> ClusterStore for T where
    T: ResourceStore<Namespace>
        + ResourceStore<Service>
        + ResourceStore<Secret>
        + ResourceStore<ConfigMap>
        + ResourceStore<StatefulSet>
        + ResourceStore<Deployment>
        + ResourceStore<CronJob>
        + ResourceStore<PodDisruptionBudget>
        + ResourceStore<VerticalPodAutoscaler>
        + ResourceStore<ClusterRole>
        + ResourceStore<CustomResourceDefinition>
{
}

/// A read cache serving every kind the orchestrator touches.
pub trait ClusterCache:
    ReadCache<Namespace>
    + ReadCache<Service>
    + ReadCache<Secret>
    + ReadCache<ConfigMap>
    + ReadCache<StatefulSet>
    + ReadCache<Deployment>
    + ReadCache<CronJob>
    + ReadCache<PodDisruptionBudget>
    + ReadCache<VerticalPodAutoscaler>
    + ReadCache<ClusterRole>
    + ReadCache<CustomResourceDefinition>
{
}

impl<T> ClusterCache for T where
    T: ReadCache<Namespace>
        + ReadCache<Service>
        + ReadCache<Secret>
        + ReadCache<ConfigMap>
        + ReadCache<StatefulSet>
        + ReadCache<Deployment>
        + ReadCache<CronJob>
        + ReadCache<PodDisruptionBudget>
        + ReadCache<VerticalPodAutoscaler>
        + ReadCache<ClusterRole>
        + ReadCache<CustomResourceDefinition>
{
}
