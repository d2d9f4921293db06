//! Per-kind creator registries handed to the orchestrator, and the policy
//! wrappers applied to them before a pass.

use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{ConfigMap, Secret, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::api::rbac::v1::ClusterRole;
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::CustomResourceDefinition;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use keel_core::{disable_autoscaling, owner_ref_wrapper, Cluster, CreatorError, ManagedKind, Registry, VerticalPodAutoscaler};

/// One registry per reconciled kind.
#[derive(Debug, Clone, Default)]
pub struct CreatorSet {
    pub services: Registry<Service>,
    pub secrets: Registry<Secret>,
    pub config_maps: Registry<ConfigMap>,
    pub stateful_sets: Registry<StatefulSet>,
    pub deployments: Registry<Deployment>,
    pub cron_jobs: Registry<CronJob>,
    pub pod_disruption_budgets: Registry<PodDisruptionBudget>,
    pub vertical_pod_autoscalers: Registry<VerticalPodAutoscaler>,
    pub cluster_roles: Registry<ClusterRole>,
    pub custom_resource_definitions: Registry<CustomResourceDefinition>,
}

/// Supplies the desired-state templates for a tenant.
pub trait TemplateSource: Send + Sync {
    /// Creators for `tenant`, whose children live in `namespace`. Creators
    /// capture their inputs here; they must not read anything at call time.
    fn creators(&self, tenant: &Cluster, namespace: &str) -> Result<CreatorSet, CreatorError>;
}

impl<F> TemplateSource for F
where
    F: Fn(&Cluster, &str) -> Result<CreatorSet, CreatorError> + Send + Sync,
{
    fn creators(&self, tenant: &Cluster, namespace: &str) -> Result<CreatorSet, CreatorError> {
        self(tenant, namespace)
    }
}

fn owned<K: ManagedKind>(reg: Registry<K>, owner: Option<&OwnerReference>) -> Registry<K> {
    match owner {
        Some(owner) => reg.wrap_all(owner_ref_wrapper(owner.clone())),
        None => reg,
    }
}

impl CreatorSet {
    /// Apply tenant policy to every registry: drop control-plane entries for
    /// externally managed control planes, force autoscalers off when
    /// autoscaling is disabled, and stamp `owner` as controller last.
    pub fn prepare(self, owner: Option<&OwnerReference>, external_control_plane: bool, autoscaling_enabled: bool) -> Self {
        let CreatorSet {
            mut services,
            mut secrets,
            mut config_maps,
            mut stateful_sets,
            mut deployments,
            mut cron_jobs,
            mut pod_disruption_budgets,
            mut vertical_pod_autoscalers,
            cluster_roles,
            custom_resource_definitions,
        } = self;

        if external_control_plane {
            services = services.without_control_plane();
            secrets = secrets.without_control_plane();
            config_maps = config_maps.without_control_plane();
            stateful_sets = stateful_sets.without_control_plane();
            deployments = deployments.without_control_plane();
            cron_jobs = cron_jobs.without_control_plane();
            pod_disruption_budgets = pod_disruption_budgets.without_control_plane();
            vertical_pod_autoscalers = vertical_pod_autoscalers.without_control_plane();
        }
        if !autoscaling_enabled {
            vertical_pod_autoscalers = vertical_pod_autoscalers.wrap_all(disable_autoscaling);
        }

        CreatorSet {
            services: owned(services, owner),
            secrets: owned(secrets, owner),
            config_maps: owned(config_maps, owner),
            stateful_sets: owned(stateful_sets, owner),
            deployments: owned(deployments, owner),
            cron_jobs: owned(cron_jobs, owner),
            pod_disruption_budgets: owned(pod_disruption_budgets, owner),
            vertical_pod_autoscalers: owned(vertical_pod_autoscalers, owner),
            cluster_roles: owned(cluster_roles, owner),
            custom_resource_definitions: owned(custom_resource_definitions, owner),
        }
    }

    pub fn len(&self) -> usize {
        self.services.len()
            + self.secrets.len()
            + self.config_maps.len()
            + self.stateful_sets.len()
            + self.deployments.len()
            + self.cron_jobs.len()
            + self.pod_disruption_budgets.len()
            + self.vertical_pod_autoscalers.len()
            + self.cluster_roles.len()
            + self.custom_resource_definitions.len()
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_core::{NamedCreator, UpdateMode, VerticalPodAutoscalerSpec};

    fn owner() -> OwnerReference {
        OwnerReference {
            api_version: "keel.dev/v1".into(),
            kind: "Cluster".into(),
            name: "abc".into(),
            uid: "u-1".into(),
            ..Default::default()
        }
    }

    fn set() -> CreatorSet {
        CreatorSet {
            deployments: Registry::new()
                .with(NamedCreator::new("apiserver", Ok).control_plane())
                .with(NamedCreator::new("openvpn-server", Ok)),
            vertical_pod_autoscalers: Registry::new().with(NamedCreator::new("openvpn-server", |mut v: VerticalPodAutoscaler| {
                v.spec = VerticalPodAutoscalerSpec::default();
                v.spec.update_policy = Some(keel_core::PodUpdatePolicy { update_mode: Some(UpdateMode::Auto), min_replicas: None });
                Ok(v)
            })),
            ..Default::default()
        }
    }

    #[test]
    fn external_control_plane_drops_tagged_entries() {
        let prepared = set().prepare(None, true, true);
        assert_eq!(prepared.deployments.names(), vec!["openvpn-server"]);
        assert_eq!(set().prepare(None, false, true).deployments.len(), 2);
    }

    #[test]
    fn autoscaling_disabled_forces_off_and_owner_is_stamped() {
        let owner = owner();
        let prepared = set().prepare(Some(&owner), false, false);
        let vpa = prepared.vertical_pod_autoscalers.get("openvpn-server").unwrap().create(Default::default()).unwrap();
        assert_eq!(vpa.update_mode(), Some(UpdateMode::Off));
        let refs = vpa.metadata.owner_references.unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].uid, "u-1");
    }

    #[test]
    fn autoscaling_enabled_keeps_mode() {
        let prepared = set().prepare(None, false, true);
        let vpa = prepared.vertical_pod_autoscalers.get("openvpn-server").unwrap().create(Default::default()).unwrap();
        assert_eq!(vpa.update_mode(), Some(UpdateMode::Auto));
        assert!(vpa.metadata.owner_references.is_none());
    }
}
