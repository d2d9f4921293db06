//! Keel templates: a sample desired-state set for a tenant control plane.
//!
//! Every creator captures an `Arc<TemplateData>` built once per pass and
//! reads nothing else. Workloads edit the fields they own on the stored
//! object and leave server-defaulted fields in place.

#![forbid(unsafe_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{Container, ContainerPort, PodSpec, PodTemplateSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{LabelSelector, ObjectMeta};
use keel_core::{Cluster, CreatorError};
use keel_orchestrate::{CreatorSet, TemplateSource};
use serde::{Deserialize, Serialize};

pub mod configmaps;
pub mod network;
pub mod policy;
pub mod secrets;
pub mod services;
pub mod usercluster;
pub mod workloads;

pub use network::Ipv4Net;

/// Object names shared between templates.
pub mod names {
    pub const APISERVER: &str = "apiserver";
    pub const APISERVER_EXTERNAL: &str = "apiserver-external";
    pub const CONTROLLER_MANAGER: &str = "controller-manager";
    pub const SCHEDULER: &str = "scheduler";
    pub const MACHINE_CONTROLLER: &str = "machine-controller";
    pub const ETCD: &str = "etcd";
    pub const ETCD_BACKUP: &str = "etcd-backup";
    pub const OPENVPN_SERVER: &str = "openvpn-server";
    pub const OPENVPN_CLIENT_CONFIGS: &str = "openvpn-client-configs";
    pub const DNS_RESOLVER: &str = "dns-resolver";
    pub const SERVICE_ACCOUNT_TOKEN: &str = "service-account-token";
    pub const ADMIN_KUBECONFIG: &str = "admin-kubeconfig";
    pub const METRICS_SERVER: &str = "system:metrics-server";
    pub const DNAT_CONTROLLER: &str = "system:kubelet-dnat-controller";
}

/// Installation-wide inputs, independent of the tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateSettings {
    /// Image registry prefix
    pub registry: String,
    /// Network the OpenVPN server routes to tenant nodes
    pub node_access_network: String,
    /// Domain under which tenant API servers are exposed
    pub external_domain: String,
    pub etcd_replicas: i32,
    pub default_version: String,
}

impl Default for TemplateSettings {
    fn default() -> Self {
        Self {
            registry: "registry.k8s.io".into(),
            node_access_network: "10.254.0.0/16".into(),
            external_domain: "keel.local".into(),
            etcd_replicas: 3,
            default_version: "1.29.4".into(),
        }
    }
}

/// Everything a creator may read.
#[derive(Debug, Clone)]
pub struct TemplateData {
    pub tenant: Cluster,
    pub namespace: String,
    pub settings: TemplateSettings,
}

impl TemplateData {
    pub fn new(tenant: &Cluster, namespace: &str, settings: &TemplateSettings) -> Self {
        Self { tenant: tenant.clone(), namespace: namespace.to_string(), settings: settings.clone() }
    }

    pub fn version(&self) -> &str {
        self.tenant.spec.version.as_deref().filter(|v| !v.is_empty()).unwrap_or(&self.settings.default_version)
    }

    pub fn dns_domain(&self) -> &str {
        self.tenant.spec.network.dns_domain.as_deref().filter(|d| !d.is_empty()).unwrap_or("cluster.local")
    }

    pub fn image(&self, name: &str, tag: &str) -> String {
        format!("{}/{}:{}", self.settings.registry, name, tag)
    }

    /// Externally reachable API server host for this tenant.
    pub fn external_host(&self) -> String {
        format!("{}.{}", self.tenant.name(), self.settings.external_domain)
    }

    /// In-namespace DNS name of a tenant service.
    pub fn service_host(&self, service: &str) -> String {
        format!("{}.{}.svc.cluster.local", service, self.namespace)
    }
}

/// The sample template set.
#[derive(Debug, Clone, Default)]
pub struct SampleTemplates {
    settings: TemplateSettings,
}

impl SampleTemplates {
    pub fn new(settings: TemplateSettings) -> Self { Self { settings } }
    pub fn settings(&self) -> &TemplateSettings { &self.settings }
}

impl TemplateSource for SampleTemplates {
    fn creators(&self, tenant: &Cluster, namespace: &str) -> Result<CreatorSet, CreatorError> {
        let data = Arc::new(TemplateData::new(tenant, namespace, &self.settings));
        Ok(CreatorSet {
            services: services::creators(&data),
            secrets: secrets::creators(&data),
            config_maps: configmaps::creators(&data),
            stateful_sets: workloads::stateful_sets(&data),
            deployments: workloads::deployments(&data),
            cron_jobs: workloads::cron_jobs(&data),
            pod_disruption_budgets: policy::pod_disruption_budgets(&data),
            vertical_pod_autoscalers: policy::vertical_pod_autoscalers(&data),
            cluster_roles: usercluster::cluster_roles(),
            custom_resource_definitions: usercluster::custom_resource_definitions(),
        })
    }
}

pub(crate) fn app_labels(app: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("app".to_string(), app.to_string()),
        ("app.kubernetes.io/managed-by".to_string(), "keel".to_string()),
    ])
}

/// Merge `app_labels(app)` into existing labels, keeping foreign ones.
pub(crate) fn label(meta: &mut ObjectMeta, app: &str) {
    meta.labels.get_or_insert_with(BTreeMap::new).extend(app_labels(app));
}

pub(crate) fn selector(app: &str) -> LabelSelector {
    LabelSelector { match_labels: Some(BTreeMap::from([("app".to_string(), app.to_string())])), ..Default::default() }
}

pub(crate) fn tcp_port(name: &str, port: i32) -> ContainerPort {
    ContainerPort { name: Some(name.into()), container_port: port, protocol: Some("TCP".into()), ..Default::default() }
}

/// Set the owned fields of `want` on the same-named container, or append it.
pub(crate) fn upsert_container(containers: &mut Vec<Container>, want: Container) {
    match containers.iter_mut().find(|c| c.name == want.name) {
        Some(c) => {
            c.image = want.image;
            c.command = want.command;
            c.args = want.args;
            c.ports = want.ports;
            c.env = want.env;
            c.volume_mounts = want.volume_mounts;
        }
        None => containers.push(want),
    }
}

/// Label a pod template and upsert its containers.
pub(crate) fn pod_template(template: &mut PodTemplateSpec, app: &str, containers: Vec<Container>) {
    label(template.metadata.get_or_insert_with(ObjectMeta::default), app);
    let spec = template.spec.get_or_insert_with(PodSpec::default);
    for c in containers {
        upsert_container(&mut spec.containers, c);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant() -> Cluster {
        serde_json::from_value(serde_json::json!({
            "metadata": { "name": "d3adb33f", "uid": "u-1" },
            "spec": { "version": "1.28.2", "network": { "pods": ["172.25.0.0/16"], "services": ["10.240.16.0/20"] } }
        }))
        .unwrap()
    }

    #[test]
    fn data_defaults() {
        let data = TemplateData::new(&tenant(), "cluster-d3adb33f", &TemplateSettings::default());
        assert_eq!(data.version(), "1.28.2");
        assert_eq!(data.dns_domain(), "cluster.local");
        assert_eq!(data.image("kube-apiserver", "v1.28.2"), "registry.k8s.io/kube-apiserver:v1.28.2");
        assert_eq!(data.external_host(), "d3adb33f.keel.local");
        assert_eq!(data.service_host("etcd"), "etcd.cluster-d3adb33f.svc.cluster.local");
    }

    #[test]
    fn upsert_keeps_defaulted_fields() {
        let mut containers = vec![Container {
            name: "apiserver".into(),
            image: Some("old".into()),
            termination_message_path: Some("/dev/termination-log".into()),
            ..Default::default()
        }];
        upsert_container(&mut containers, Container { name: "apiserver".into(), image: Some("new".into()), ..Default::default() });
        upsert_container(&mut containers, Container { name: "sidecar".into(), ..Default::default() });
        assert_eq!(containers.len(), 2);
        assert_eq!(containers[0].image.as_deref(), Some("new"));
        assert_eq!(containers[0].termination_message_path.as_deref(), Some("/dev/termination-log"));
    }

    #[test]
    fn every_kind_has_templates() {
        let set = SampleTemplates::default().creators(&tenant(), "cluster-d3adb33f").unwrap();
        assert!(!set.services.is_empty());
        assert!(!set.secrets.is_empty());
        assert!(!set.config_maps.is_empty());
        assert!(!set.stateful_sets.is_empty());
        assert!(!set.deployments.is_empty());
        assert!(!set.cron_jobs.is_empty());
        assert!(!set.pod_disruption_budgets.is_empty());
        assert!(!set.vertical_pod_autoscalers.is_empty());
        assert_eq!(set.cluster_roles.len(), 2);
        assert_eq!(set.custom_resource_definitions.len(), 4);
    }
}
