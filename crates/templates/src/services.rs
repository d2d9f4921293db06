//! Services in the tenant namespace.

use std::collections::BTreeMap;
use std::sync::Arc;

use k8s_openapi::api::core::v1::{Service, ServicePort, ServiceSpec};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use keel_core::{NamedCreator, Registry};

use crate::names::*;
use crate::{label, TemplateData};

struct Port {
    name: &'static str,
    port: i32,
    target: i32,
}

fn service(name: &'static str, app: &'static str, ports: Vec<Port>, headless: bool) -> NamedCreator<Service> {
    NamedCreator::new(name, move |mut svc: Service| {
        label(&mut svc.metadata, app);
        let spec = svc.spec.get_or_insert_with(ServiceSpec::default);
        spec.type_ = Some("ClusterIP".into());
        spec.selector = Some(BTreeMap::from([("app".to_string(), app.to_string())]));
        spec.ports = Some(
            ports
                .iter()
                .map(|p| ServicePort {
                    name: Some(p.name.into()),
                    port: p.port,
                    target_port: Some(IntOrString::Int(p.target)),
                    protocol: Some("TCP".into()),
                    ..Default::default()
                })
                .collect(),
        );
        if headless {
            spec.cluster_ip = Some("None".into());
            spec.publish_not_ready_addresses = Some(true);
        }
        Ok(svc)
    })
}

pub fn creators(_data: &Arc<TemplateData>) -> Registry<Service> {
    Registry::new()
        .with(service(APISERVER_EXTERNAL, APISERVER, vec![Port { name: "secure", port: 443, target: 6443 }], false).control_plane())
        .with(
            service(
                ETCD,
                ETCD,
                vec![Port { name: "client", port: 2379, target: 2379 }, Port { name: "peer", port: 2380, target: 2380 }],
                true,
            )
            .control_plane(),
        )
        .with(service(OPENVPN_SERVER, OPENVPN_SERVER, vec![Port { name: "secure", port: 1194, target: 1194 }], false))
        .with(service(DNS_RESOLVER, DNS_RESOLVER, vec![Port { name: "dns", port: 53, target: 53 }], false))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TemplateSettings;
    use keel_core::Cluster;

    #[test]
    fn etcd_is_headless_and_keeps_server_fields() {
        let data = Arc::new(TemplateData::new(&Cluster::default(), "ns", &TemplateSettings::default()));
        let reg = creators(&data);
        let mut stored = Service::default();
        stored.spec = Some(ServiceSpec { session_affinity: Some("None".into()), ..Default::default() });
        let svc = reg.get(ETCD).unwrap().create(stored).unwrap();
        let spec = svc.spec.unwrap();
        assert_eq!(spec.cluster_ip.as_deref(), Some("None"));
        assert_eq!(spec.session_affinity.as_deref(), Some("None"));
        assert_eq!(spec.ports.unwrap().len(), 2);
        assert_eq!(reg.names(), vec![APISERVER_EXTERNAL, ETCD, OPENVPN_SERVER, DNS_RESOLVER]);
    }
}
