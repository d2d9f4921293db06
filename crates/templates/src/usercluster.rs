//! Cluster-scoped objects for the tenant's own API server: RBAC roles and
//! the machine API resource definitions.

use k8s_openapi::api::rbac::v1::{ClusterRole, PolicyRule};
use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceDefinition, CustomResourceDefinitionNames, CustomResourceDefinitionVersion,
    CustomResourceSubresourceStatus, CustomResourceSubresources, CustomResourceValidation, JSONSchemaProps,
};
use keel_core::{NamedCreator, Registry};

use crate::label;
use crate::names::*;

pub const MACHINE_GROUP: &str = "cluster.k8s.io";
pub const MACHINE_VERSION: &str = "v1alpha1";

fn rule(groups: &[&str], resources: &[&str], verbs: &[&str]) -> PolicyRule {
    let owned = |xs: &[&str]| xs.iter().map(|s| s.to_string()).collect::<Vec<_>>();
    PolicyRule {
        api_groups: Some(owned(groups)),
        resources: Some(owned(resources)),
        verbs: owned(verbs),
        ..Default::default()
    }
}

fn cluster_role(name: &'static str, rules: fn() -> Vec<PolicyRule>) -> NamedCreator<ClusterRole> {
    NamedCreator::new(name, move |mut role: ClusterRole| {
        label(&mut role.metadata, name);
        role.rules = Some(rules());
        Ok(role)
    })
}

pub fn cluster_roles() -> Registry<ClusterRole> {
    const READ: &[&str] = &["get", "list", "watch"];
    Registry::new()
        .with(cluster_role(METRICS_SERVER, || {
            vec![
                rule(&[""], &["pods", "nodes", "nodes/stats", "namespaces"], READ),
                rule(&["extensions"], &["deployments"], READ),
            ]
        }))
        .with(cluster_role(DNAT_CONTROLLER, || vec![rule(&[""], &["nodes"], &["list", "get", "watch"])]))
}

struct MachineKind {
    kind: &'static str,
    plural: &'static str,
    singular: &'static str,
    short: Option<&'static str>,
    status: bool,
}

static MACHINE_KINDS: [MachineKind; 4] = [
    MachineKind { kind: "Machine", plural: "machines", singular: "machine", short: Some("ma"), status: false },
    MachineKind { kind: "MachineSet", plural: "machinesets", singular: "machineset", short: Some("ms"), status: true },
    MachineKind {
        kind: "MachineDeployment",
        plural: "machinedeployments",
        singular: "machinedeployment",
        short: Some("md"),
        status: true,
    },
    MachineKind { kind: "Cluster", plural: "clusters", singular: "cluster", short: None, status: false },
];

fn crd(m: &'static MachineKind) -> NamedCreator<CustomResourceDefinition> {
    let name = format!("{}.{}", m.plural, MACHINE_GROUP);
    NamedCreator::new(name, move |mut crd: CustomResourceDefinition| {
        label(&mut crd.metadata, "machine-controller");
        let spec = &mut crd.spec;
        spec.group = MACHINE_GROUP.into();
        spec.scope = "Namespaced".into();
        spec.names = CustomResourceDefinitionNames {
            kind: m.kind.into(),
            list_kind: Some(format!("{}List", m.kind)),
            plural: m.plural.into(),
            singular: Some(m.singular.into()),
            short_names: m.short.map(|s| vec![s.to_string()]),
            ..Default::default()
        };
        spec.versions = vec![CustomResourceDefinitionVersion {
            name: MACHINE_VERSION.into(),
            served: true,
            storage: true,
            schema: Some(CustomResourceValidation {
                open_api_v3_schema: Some(JSONSchemaProps {
                    type_: Some("object".into()),
                    x_kubernetes_preserve_unknown_fields: Some(true),
                    ..Default::default()
                }),
            }),
            subresources: m.status.then(|| CustomResourceSubresources {
                status: Some(CustomResourceSubresourceStatus(serde_json::json!({}))),
                ..Default::default()
            }),
            ..Default::default()
        }];
        Ok(crd)
    })
}

pub fn custom_resource_definitions() -> Registry<CustomResourceDefinition> {
    MACHINE_KINDS.iter().fold(Registry::new(), |reg, m| reg.with(crd(m)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn roles_grant_read_only() {
        let reg = cluster_roles();
        assert_eq!(reg.names(), vec![METRICS_SERVER, DNAT_CONTROLLER]);
        let role = reg.get(METRICS_SERVER).unwrap().create(ClusterRole::default()).unwrap();
        let rules = role.rules.unwrap();
        assert!(rules.iter().all(|r| r.verbs.iter().all(|v| ["get", "list", "watch"].contains(&v.as_str()))));
        assert!(rules[0].resources.as_ref().unwrap().contains(&"nodes/stats".to_string()));
    }

    #[test]
    fn machine_definitions() {
        let reg = custom_resource_definitions();
        assert_eq!(
            reg.names(),
            vec![
                "machines.cluster.k8s.io",
                "machinesets.cluster.k8s.io",
                "machinedeployments.cluster.k8s.io",
                "clusters.cluster.k8s.io"
            ]
        );
        let ms = reg.get("machinesets.cluster.k8s.io").unwrap().create(CustomResourceDefinition::default()).unwrap();
        assert_eq!(ms.spec.names.short_names, Some(vec!["ms".to_string()]));
        assert!(ms.spec.versions[0].subresources.as_ref().unwrap().status.is_some());

        let cl = reg.get("clusters.cluster.k8s.io").unwrap().create(CustomResourceDefinition::default()).unwrap();
        assert_eq!(cl.spec.names.short_names, None);
        assert!(cl.spec.versions[0].subresources.is_none());
        assert_eq!(cl.spec.scope, "Namespaced");
    }

    #[test]
    fn recreating_keeps_server_conversion() {
        let reg = custom_resource_definitions();
        let creator = reg.get("machines.cluster.k8s.io").unwrap();
        let mut stored = creator.create(CustomResourceDefinition::default()).unwrap();
        stored.spec.conversion = Some(Default::default());
        let again = creator.create(stored.clone()).unwrap();
        assert_eq!(again, stored);
    }
}
