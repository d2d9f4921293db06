//! Config maps.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::ConfigMap;
use keel_core::{CreatorError, NamedCreator, Registry};

use crate::names::*;
use crate::network::{first_block, Ipv4Net};
use crate::{label, TemplateData};

pub const OPENVPN_CLIENT_KEY: &str = "user-cluster-client";
pub const COREFILE_KEY: &str = "Corefile";

/// Routes the OpenVPN server pushes for the tenant's client: pod network,
/// service network, node access network. Newline terminated.
pub fn openvpn_iroutes(data: &TemplateData) -> Result<String, CreatorError> {
    let net = &data.tenant.spec.network;
    let pods = first_block("spec.network.pods", &net.pods)?;
    let services = first_block("spec.network.services", &net.services)?;
    let node_access: Ipv4Net = data.settings.node_access_network.parse().map_err(|e: String| {
        CreatorError::invalid("nodeAccessNetwork", format!("failed to parse node access network: {}", e))
    })?;
    let mut lines: Vec<String> = [pods, services, node_access].iter().map(Ipv4Net::iroute).collect();
    lines.push(String::new());
    Ok(lines.join("\n"))
}

pub fn corefile(data: &TemplateData) -> String {
    format!(
        "{domain} {{\n    forward . /etc/resolv.conf\n    errors\n}}\n. {{\n    forward . /etc/resolv.conf\n    errors\n    cache 30\n}}\n",
        domain = data.dns_domain()
    )
}

fn set_entry(cm: &mut ConfigMap, key: &str, value: String) {
    cm.data.get_or_insert_with(BTreeMap::new).insert(key.to_string(), value);
}

pub fn creators(data: &Arc<TemplateData>) -> Registry<ConfigMap> {
    let vpn = Arc::clone(data);
    let dns = Arc::clone(data);
    Registry::new()
        .with(
            NamedCreator::new(OPENVPN_CLIENT_CONFIGS, move |mut cm: ConfigMap| {
                label(&mut cm.metadata, OPENVPN_SERVER);
                set_entry(&mut cm, OPENVPN_CLIENT_KEY, openvpn_iroutes(&vpn)?);
                Ok(cm)
            })
            .control_plane(),
        )
        .with(NamedCreator::new(DNS_RESOLVER, move |mut cm: ConfigMap| {
            label(&mut cm.metadata, DNS_RESOLVER);
            set_entry(&mut cm, COREFILE_KEY, corefile(&dns));
            Ok(cm)
        }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TemplateSettings;
    use keel_core::Cluster;

    fn data(pods: &[&str], services: &[&str]) -> TemplateData {
        let tenant: Cluster = serde_json::from_value(serde_json::json!({
            "metadata": { "name": "abc" },
            "spec": { "network": { "pods": pods, "services": services } }
        }))
        .unwrap();
        TemplateData::new(&tenant, "cluster-abc", &TemplateSettings::default())
    }

    #[test]
    fn iroutes_cover_all_three_networks() {
        let got = openvpn_iroutes(&data(&["172.25.0.0/16"], &["10.10.10.0/24"])).unwrap();
        assert_eq!(
            got,
            "iroute 172.25.0.0 255.255.0.0\niroute 10.10.10.0 255.255.255.0\niroute 10.254.0.0 255.255.0.0\n"
        );
    }

    #[test]
    fn missing_or_bad_blocks_fail_the_creator() {
        let err = openvpn_iroutes(&data(&[], &["10.10.10.0/24"])).unwrap_err();
        assert!(matches!(err, CreatorError::Invalid { ref field, .. } if field == "spec.network.pods"));
        let err = openvpn_iroutes(&data(&["172.25.0.0/16"], &["ten/24"])).unwrap_err();
        assert!(matches!(err, CreatorError::Invalid { ref field, .. } if field == "spec.network.services"));

        let reg = creators(&Arc::new(data(&[], &[])));
        assert!(reg.get(OPENVPN_CLIENT_CONFIGS).unwrap().create(ConfigMap::default()).is_err());
        assert!(reg.get(DNS_RESOLVER).unwrap().create(ConfigMap::default()).is_ok());
    }
}
