//! Secrets: generated material is created once and then kept.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Context;
use k8s_openapi::api::core::v1::Secret;
use k8s_openapi::ByteString;
use keel_core::{CreatorError, NamedCreator, Registry};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::names::*;
use crate::{label, TemplateData};

pub const TOKEN_KEY: &str = "token";
pub const KUBECONFIG_KEY: &str = "kubeconfig";

/// Minimal client kubeconfig.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Kubeconfig {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub clusters: Vec<Named<ClusterEntry>>,
    pub contexts: Vec<Named<ContextEntry>>,
    pub current_context: String,
    pub users: Vec<Named<UserEntry>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Named<T> {
    pub name: String,
    #[serde(flatten)]
    pub item: T,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterEntry {
    pub cluster: ClusterInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterInfo {
    pub server: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub context: ContextInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextInfo {
    pub cluster: String,
    pub user: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserEntry {
    pub user: UserInfo,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserInfo {
    pub token: String,
}

impl Kubeconfig {
    pub fn new(cluster_name: &str, server: &str, user: &str, token: &str) -> Self {
        Self {
            api_version: "v1".into(),
            kind: "Config".into(),
            clusters: vec![Named {
                name: cluster_name.into(),
                item: ClusterEntry { cluster: ClusterInfo { server: server.into() } },
            }],
            contexts: vec![Named {
                name: cluster_name.into(),
                item: ContextEntry { context: ContextInfo { cluster: cluster_name.into(), user: user.into() } },
            }],
            current_context: cluster_name.into(),
            users: vec![Named { name: user.into(), item: UserEntry { user: UserInfo { token: token.into() } } }],
        }
    }

    pub fn to_yaml(&self) -> Result<String, CreatorError> {
        Ok(serde_yaml::to_string(self).context("rendering kubeconfig")?)
    }
}

fn utf8_entry(secret: &Secret, key: &str) -> Option<String> {
    let raw = secret.data.as_ref()?.get(key)?;
    String::from_utf8(raw.0.clone()).ok().filter(|s| !s.is_empty())
}

/// Token secret. The generated value is only used when none is stored yet.
pub fn service_account_token(generated: String) -> NamedCreator<Secret> {
    NamedCreator::new(SERVICE_ACCOUNT_TOKEN, move |mut secret: Secret| {
        label(&mut secret.metadata, APISERVER);
        secret.type_ = Some("Opaque".into());
        let token = utf8_entry(&secret, TOKEN_KEY).unwrap_or_else(|| generated.clone());
        secret.data.get_or_insert_with(BTreeMap::new).insert(TOKEN_KEY.into(), ByteString(token.into_bytes()));
        Ok(secret)
    })
}

/// Admin kubeconfig for the tenant API server. Re-rendered every pass from
/// the stored token, so the payload only changes when the server address does.
pub fn admin_kubeconfig(data: Arc<TemplateData>, generated: String) -> NamedCreator<Secret> {
    NamedCreator::new(ADMIN_KUBECONFIG, move |mut secret: Secret| {
        label(&mut secret.metadata, APISERVER);
        secret.type_ = Some("Opaque".into());
        let token = utf8_entry(&secret, TOKEN_KEY).unwrap_or_else(|| generated.clone());
        let server = format!("https://{}:443", data.external_host());
        let yaml = Kubeconfig::new(data.tenant.name(), &server, "admin", &token).to_yaml()?;
        let entries = secret.data.get_or_insert_with(BTreeMap::new);
        entries.insert(TOKEN_KEY.into(), ByteString(token.into_bytes()));
        entries.insert(KUBECONFIG_KEY.into(), ByteString(yaml.into_bytes()));
        Ok(secret)
    })
}

pub fn creators(data: &Arc<TemplateData>) -> Registry<Secret> {
    Registry::new()
        .with(service_account_token(Uuid::new_v4().simple().to_string()).control_plane())
        .with(admin_kubeconfig(Arc::clone(data), Uuid::new_v4().simple().to_string()).control_plane())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TemplateSettings;
    use keel_core::Cluster;

    fn data() -> Arc<TemplateData> {
        let tenant: Cluster = serde_json::from_value(serde_json::json!({ "metadata": { "name": "d3adb33f" } })).unwrap();
        Arc::new(TemplateData::new(&tenant, "cluster-d3adb33f", &TemplateSettings::default()))
    }

    #[test]
    fn kubeconfig_yaml_shape() {
        let yaml = Kubeconfig::new("d3adb33f", "https://d3adb33f.keel.local:443", "admin", "t0k3n").to_yaml().unwrap();
        let v: serde_yaml::Value = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(v["apiVersion"], "v1");
        assert_eq!(v["current-context"], "d3adb33f");
        assert_eq!(v["clusters"][0]["name"], "d3adb33f");
        assert_eq!(v["clusters"][0]["cluster"]["server"], "https://d3adb33f.keel.local:443");
        assert_eq!(v["users"][0]["user"]["token"], "t0k3n");
    }

    #[test]
    fn regeneration_is_byte_stable() {
        let first = admin_kubeconfig(data(), "gen-1".into()).create(Secret::default()).unwrap();
        // A later pass builds a new creator with a fresh candidate token
        let second = admin_kubeconfig(data(), "gen-2".into()).create(first.clone()).unwrap();
        assert_eq!(first.data, second.data);
        assert_eq!(utf8_entry(&second, TOKEN_KEY).as_deref(), Some("gen-1"));
    }

    #[test]
    fn token_is_kept_once_generated() {
        let first = service_account_token("aaa".into()).create(Secret::default()).unwrap();
        let second = service_account_token("bbb".into()).create(first.clone()).unwrap();
        assert_eq!(second.data.unwrap()[TOKEN_KEY].0, b"aaa".to_vec());
    }
}
