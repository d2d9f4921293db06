//! Disruption budgets and vertical autoscalers.

use std::sync::Arc;

use k8s_openapi::api::autoscaling::v1::CrossVersionObjectReference;
use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use keel_core::{NamedCreator, PodUpdatePolicy, Registry, UpdateMode, VerticalPodAutoscaler};

use crate::names::*;
use crate::{label, selector, TemplateData};

fn pdb(name: &'static str, min_available: IntOrString) -> NamedCreator<PodDisruptionBudget> {
    NamedCreator::new(name, move |mut pdb: PodDisruptionBudget| {
        label(&mut pdb.metadata, name);
        let spec = pdb.spec.get_or_insert_with(PodDisruptionBudgetSpec::default);
        spec.min_available = Some(min_available.clone());
        spec.max_unavailable = None;
        spec.selector = Some(selector(name));
        Ok(pdb)
    })
}

/// etcd keeps quorum; the hosted API server keeps one replica.
pub fn pod_disruption_budgets(data: &Arc<TemplateData>) -> Registry<PodDisruptionBudget> {
    let quorum = data.settings.etcd_replicas / 2 + 1;
    Registry::new()
        .with(pdb(ETCD, IntOrString::Int(quorum)))
        .with(pdb(APISERVER, IntOrString::Int(1)).control_plane())
}

fn vpa(name: &'static str, kind: &'static str) -> NamedCreator<VerticalPodAutoscaler> {
    NamedCreator::new(name, move |mut vpa: VerticalPodAutoscaler| {
        label(&mut vpa.metadata, name);
        vpa.spec.target_ref =
            Some(CrossVersionObjectReference { api_version: Some("apps/v1".into()), kind: kind.into(), name: name.into() });
        vpa.spec.update_policy.get_or_insert_with(PodUpdatePolicy::default).update_mode = Some(UpdateMode::Auto);
        Ok(vpa)
    })
}

pub fn vertical_pod_autoscalers(_data: &Arc<TemplateData>) -> Registry<VerticalPodAutoscaler> {
    Registry::new()
        .with(vpa(ETCD, "StatefulSet"))
        .with(vpa(APISERVER, "Deployment").control_plane())
        .with(vpa(CONTROLLER_MANAGER, "Deployment").control_plane())
        .with(vpa(SCHEDULER, "Deployment").control_plane())
        .with(vpa(MACHINE_CONTROLLER, "Deployment").control_plane())
        .with(vpa(OPENVPN_SERVER, "Deployment"))
        .with(vpa(DNS_RESOLVER, "Deployment"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TemplateSettings;
    use keel_core::Cluster;

    fn data(replicas: i32) -> Arc<TemplateData> {
        let tenant: Cluster = serde_json::from_value(serde_json::json!({ "metadata": { "name": "abc" } })).unwrap();
        let settings = TemplateSettings { etcd_replicas: replicas, ..Default::default() };
        Arc::new(TemplateData::new(&tenant, "cluster-abc", &settings))
    }

    #[test]
    fn etcd_budget_keeps_quorum() {
        for (replicas, quorum) in [(1, 1), (3, 2), (5, 3)] {
            let reg = pod_disruption_budgets(&data(replicas));
            let pdb = reg.get(ETCD).unwrap().create(PodDisruptionBudget::default()).unwrap();
            assert_eq!(pdb.spec.unwrap().min_available, Some(IntOrString::Int(quorum)), "replicas {replicas}");
        }
    }

    #[test]
    fn autoscalers_target_their_workload() {
        let reg = vertical_pod_autoscalers(&data(3));
        let etcd = reg.get(ETCD).unwrap().create(VerticalPodAutoscaler::default()).unwrap();
        let target = etcd.spec.target_ref.unwrap();
        assert_eq!((target.kind.as_str(), target.name.as_str()), ("StatefulSet", ETCD));
        let hosted = reg.clone().without_control_plane();
        assert_eq!(hosted.names(), vec![ETCD, OPENVPN_SERVER, DNS_RESOLVER]);

        let dns = reg.get(DNS_RESOLVER).unwrap().create(VerticalPodAutoscaler::default()).unwrap();
        assert_eq!(dns.update_mode(), Some(UpdateMode::Auto));
    }
}
