//! Managed resource kinds and their comparison rules.

use std::fmt;

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::api::rbac::v1::ClusterRole;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use serde::{de::DeserializeOwned, Deserialize, Serialize};

use crate::vpa::VerticalPodAutoscaler;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Kind {
    Namespace,
    Service,
    Secret,
    ConfigMap,
    StatefulSet,
    Deployment,
    CronJob,
    PodDisruptionBudget,
    VerticalPodAutoscaler,
    ClusterRole,
    CustomResourceDefinition,
}

impl Kind {
    pub const ALL: [Kind; 11] = [
        Kind::Namespace,
        Kind::Service,
        Kind::Secret,
        Kind::ConfigMap,
        Kind::StatefulSet,
        Kind::Deployment,
        Kind::CronJob,
        Kind::PodDisruptionBudget,
        Kind::VerticalPodAutoscaler,
        Kind::ClusterRole,
        Kind::CustomResourceDefinition,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Kind::Namespace => "Namespace",
            Kind::Service => "Service",
            Kind::Secret => "Secret",
            Kind::ConfigMap => "ConfigMap",
            Kind::StatefulSet => "StatefulSet",
            Kind::Deployment => "Deployment",
            Kind::CronJob => "CronJob",
            Kind::PodDisruptionBudget => "PodDisruptionBudget",
            Kind::VerticalPodAutoscaler => "VerticalPodAutoscaler",
            Kind::ClusterRole => "ClusterRole",
            Kind::CustomResourceDefinition => "CustomResourceDefinition",
        }
    }

    pub fn namespaced(self) -> bool {
        !matches!(self, Kind::Namespace | Kind::ClusterRole | Kind::CustomResourceDefinition)
    }
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A typed object the engine can reconcile.
///
/// `Default` is the empty object handed to a creator when nothing is stored yet.
pub trait ManagedKind:
    kube::Resource<DynamicType = ()> + Clone + Default + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const KIND: Kind;

    /// JSON pointers populated by other actors (API server defaulting,
    /// allocators, rollout bookkeeping). They are left out when comparing
    /// stored and desired state. `status` and server metadata are always ignored.
    const UNMANAGED: &'static [&'static str] = &[];
}

macro_rules! managed_kind {
    ($ty:ty => $kind:expr) => {
        impl ManagedKind for $ty {
            const KIND: Kind = $kind;
        }
    };
    ($ty:ty => $kind:expr, [$($ptr:literal),+ $(,)?]) => {
        impl ManagedKind for $ty {
            const KIND: Kind = $kind;
            const UNMANAGED: &'static [&'static str] = &[$($ptr),+];
        }
    };
}

managed_kind!(Namespace => Kind::Namespace);
managed_kind!(Service => Kind::Service, ["/spec/clusterIP", "/spec/clusterIPs", "/spec/ipFamilies", "/spec/ipFamilyPolicy"]);
managed_kind!(Secret => Kind::Secret);
managed_kind!(ConfigMap => Kind::ConfigMap);
managed_kind!(StatefulSet => Kind::StatefulSet);
managed_kind!(Deployment => Kind::Deployment, ["/metadata/annotations/deployment.kubernetes.io~1revision"]);
managed_kind!(CronJob => Kind::CronJob);
managed_kind!(PodDisruptionBudget => Kind::PodDisruptionBudget);
managed_kind!(VerticalPodAutoscaler => Kind::VerticalPodAutoscaler);
managed_kind!(ClusterRole => Kind::ClusterRole);
managed_kind!(CustomResourceDefinition => Kind::CustomResourceDefinition, ["/spec/conversion"]);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scope_matches_store_api() {
        let cluster_scoped: Vec<_> = Kind::ALL.iter().filter(|k| !k.namespaced()).collect();
        assert_eq!(cluster_scoped, vec![&Kind::Namespace, &Kind::ClusterRole, &Kind::CustomResourceDefinition]);
    }

    #[test]
    fn typed_kinds_agree_with_api_kind_names() {
        use kube::Resource;
        assert_eq!(Service::kind(&()), Service::KIND.as_str());
        assert_eq!(PodDisruptionBudget::kind(&()), PodDisruptionBudget::KIND.as_str());
        assert_eq!(VerticalPodAutoscaler::kind(&()), VerticalPodAutoscaler::KIND.as_str());
        assert_eq!(CustomResourceDefinition::kind(&()), CustomResourceDefinition::KIND.as_str());
    }

    #[test]
    fn namespace_is_created_not_compared() {
        assert!(Namespace::UNMANAGED.is_empty());
        assert!(!Service::UNMANAGED.is_empty());
    }
}
