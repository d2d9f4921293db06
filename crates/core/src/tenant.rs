//! Tenant resource (`keel.dev/v1`, Kind=Cluster).
//!
//! The engine only reads it: namespace assignment, the infrastructure gate and
//! the owner reference stamped on every child all come from here.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use serde::{Deserialize, Serialize};

use crate::Error;

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct Cluster {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ClusterSpec,
    #[serde(default)]
    pub status: Option<ClusterStatus>,
}

custom_resource!(
    Cluster,
    group = "keel.dev",
    version = "v1",
    kind = "Cluster",
    plural = "clusters",
    scope = k8s_openapi::ClusterResourceScope
);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterSpec {
    /// Control plane runs elsewhere; control-plane services, secrets, config
    /// maps and workloads are not reconciled for this tenant.
    #[serde(default)]
    pub external_control_plane: bool,
    #[serde(default)]
    pub network: ClusterNetwork,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterNetwork {
    /// Pod CIDR blocks
    #[serde(default)]
    pub pods: Vec<String>,
    /// Service CIDR blocks
    #[serde(default)]
    pub services: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dns_domain: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace_name: Option<String>,
    #[serde(default)]
    pub health: ClusterHealth,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterHealth {
    #[serde(default)]
    pub cloud_provider_infrastructure: bool,
}

impl Cluster {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    /// `status.namespaceName`, falling back to `cluster-<name>`.
    pub fn namespace_name(&self) -> String {
        self.status
            .as_ref()
            .and_then(|s| s.namespace_name.clone())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("cluster-{}", self.name()))
    }

    pub fn infrastructure_ready(&self) -> bool {
        self.status.as_ref().map(|s| s.health.cloud_provider_infrastructure).unwrap_or(false)
    }

    pub fn external_control_plane(&self) -> bool {
        self.spec.external_control_plane
    }

    /// Key used to serialize passes: name plus UID, so a deleted and
    /// recreated tenant does not wait on its predecessor.
    pub fn identity(&self) -> String {
        match self.metadata.uid.as_deref() {
            Some(uid) => format!("{}/{}", self.name(), uid),
            None => self.name().to_string(),
        }
    }

    /// Controller reference pointing at this tenant.
    pub fn owner_ref(&self) -> Result<OwnerReference, Error> {
        let name = self.metadata.name.clone().filter(|n| !n.is_empty()).ok_or_else(|| Error::InvalidTenant {
            tenant: "<unnamed>".into(),
            message: "metadata.name is empty".into(),
        })?;
        let uid = self.metadata.uid.clone().filter(|u| !u.is_empty()).ok_or_else(|| Error::InvalidTenant {
            tenant: name.clone(),
            message: "metadata.uid is empty".into(),
        })?;
        Ok(OwnerReference {
            api_version: <Self as k8s_openapi::Resource>::API_VERSION.to_string(),
            kind: <Self as k8s_openapi::Resource>::KIND.to_string(),
            name,
            uid,
            controller: Some(true),
            block_owner_deletion: Some(true),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tenant(yaml: &str) -> Cluster {
        serde_json::from_value(serde_json::from_str::<serde_json::Value>(yaml).unwrap()).unwrap()
    }

    #[test]
    fn namespace_falls_back_to_name() {
        let c = tenant(r#"{"metadata":{"name":"abc","uid":"u-1"}}"#);
        assert_eq!(c.namespace_name(), "cluster-abc");
        assert!(!c.infrastructure_ready());

        let c = tenant(r#"{"metadata":{"name":"abc"},"status":{"namespaceName":"tenant-abc","health":{"cloudProviderInfrastructure":true}}}"#);
        assert_eq!(c.namespace_name(), "tenant-abc");
        assert!(c.infrastructure_ready());
    }

    #[test]
    fn owner_ref_requires_uid() {
        let c = tenant(r#"{"metadata":{"name":"abc"}}"#);
        assert!(matches!(c.owner_ref(), Err(Error::InvalidTenant { .. })));

        let c = tenant(r#"{"metadata":{"name":"abc","uid":"u-1"},"spec":{"externalControlPlane":true}}"#);
        let r = c.owner_ref().unwrap();
        assert_eq!((r.api_version.as_str(), r.kind.as_str(), r.uid.as_str()), ("keel.dev/v1", "Cluster", "u-1"));
        assert_eq!((r.controller, r.block_owner_deletion), (Some(true), Some(true)));
        assert!(c.external_control_plane());
        assert_eq!(c.identity(), "abc/u-1");
    }
}
