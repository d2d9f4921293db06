//! Stateful sets, deployments and cron jobs.

use std::sync::Arc;

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec, StatefulSet, StatefulSetSpec};
use k8s_openapi::api::batch::v1::{CronJob, CronJobSpec, JobSpec};
use k8s_openapi::api::core::v1::{Container, EnvVar, EnvVarSource, ObjectFieldSelector, PodSpec};
use keel_core::{NamedCreator, Registry};

use crate::names::*;
use crate::{label, pod_template, selector, tcp_port, TemplateData};

fn container(name: &str, image: String, args: Vec<String>) -> Container {
    Container { name: name.into(), image: Some(image), args: Some(args), ..Default::default() }
}

fn etcd_container(data: &TemplateData) -> Container {
    let peers: Vec<String> = (0..data.settings.etcd_replicas)
        .map(|i| format!("etcd-{i}=http://etcd-{i}.{}:2380", data.service_host(ETCD)))
        .collect();
    let mut c = container(
        ETCD,
        data.image("etcd", "3.5.12-0"),
        vec![
            "--data-dir=/var/run/etcd/pod_$(POD_NAME)/".into(),
            "--name=$(POD_NAME)".into(),
            "--listen-client-urls=http://0.0.0.0:2379".into(),
            "--listen-peer-urls=http://0.0.0.0:2380".into(),
            format!("--advertise-client-urls=http://$(POD_NAME).{}:2379", data.service_host(ETCD)),
            format!("--initial-cluster={}", peers.join(",")),
            format!("--initial-cluster-token={}", data.tenant.name()),
            "--initial-cluster-state=new".into(),
        ],
    );
    c.ports = Some(vec![tcp_port("client", 2379), tcp_port("peer", 2380)]);
    c.env = Some(vec![EnvVar {
        name: "POD_NAME".into(),
        value_from: Some(EnvVarSource {
            field_ref: Some(ObjectFieldSelector {
                api_version: Some("v1".into()),
                field_path: "metadata.name".into(),
            }),
            ..Default::default()
        }),
        ..Default::default()
    }]);
    c
}

pub fn stateful_sets(data: &Arc<TemplateData>) -> Registry<StatefulSet> {
    let data = Arc::clone(data);
    Registry::new().with(NamedCreator::new(ETCD, move |mut sts: StatefulSet| {
        label(&mut sts.metadata, ETCD);
        let spec = sts.spec.get_or_insert_with(StatefulSetSpec::default);
        spec.replicas = Some(data.settings.etcd_replicas);
        spec.service_name = ETCD.into();
        spec.pod_management_policy = Some("Parallel".into());
        spec.selector = selector(ETCD);
        pod_template(&mut spec.template, ETCD, vec![etcd_container(&data)]);
        Ok(sts)
    }))
}

fn deployment<F>(name: &'static str, replicas: i32, data: &Arc<TemplateData>, make: F) -> NamedCreator<Deployment>
where
    F: Fn(&TemplateData) -> Container + Send + Sync + 'static,
{
    let data = Arc::clone(data);
    NamedCreator::new(name, move |mut d: Deployment| {
        label(&mut d.metadata, name);
        let spec = d.spec.get_or_insert_with(DeploymentSpec::default);
        spec.replicas = Some(replicas);
        spec.selector = selector(name);
        pod_template(&mut spec.template, name, vec![make(&data)]);
        Ok(d)
    })
}

fn apiserver(data: &TemplateData) -> Container {
    let net = &data.tenant.spec.network;
    let mut c = container(
        APISERVER,
        data.image("kube-apiserver", &format!("v{}", data.version())),
        vec![
            format!("--etcd-servers=http://{}:2379", data.service_host(ETCD)),
            format!("--service-cluster-ip-range={}", net.services.join(",")),
            "--secure-port=6443".into(),
            format!("--external-hostname={}", data.external_host()),
            "--authorization-mode=Node,RBAC".into(),
        ],
    );
    c.command = Some(vec!["/usr/local/bin/kube-apiserver".into()]);
    c.ports = Some(vec![tcp_port("secure", 6443)]);
    c
}

fn controller_manager(data: &TemplateData) -> Container {
    let net = &data.tenant.spec.network;
    let mut c = container(
        CONTROLLER_MANAGER,
        data.image("kube-controller-manager", &format!("v{}", data.version())),
        vec![
            "--kubeconfig=/etc/kubernetes/kubeconfig/kubeconfig".into(),
            format!("--cluster-cidr={}", net.pods.join(",")),
            format!("--cluster-name={}", data.tenant.name()),
            "--leader-elect=false".into(),
        ],
    );
    c.command = Some(vec!["/usr/local/bin/kube-controller-manager".into()]);
    c
}

fn scheduler(data: &TemplateData) -> Container {
    let mut c = container(
        SCHEDULER,
        data.image("kube-scheduler", &format!("v{}", data.version())),
        vec!["--kubeconfig=/etc/kubernetes/kubeconfig/kubeconfig".into(), "--leader-elect=false".into()],
    );
    c.command = Some(vec!["/usr/local/bin/kube-scheduler".into()]);
    c
}

fn machine_controller(data: &TemplateData) -> Container {
    container(
        MACHINE_CONTROLLER,
        data.image("kubermatic/machine-controller", "v1.58.0"),
        vec![
            "-kubeconfig=/etc/kubernetes/kubeconfig/kubeconfig".into(),
            format!("-cluster-dns={}", data.service_host(DNS_RESOLVER)),
            "-worker-count=10".into(),
        ],
    )
}

fn openvpn_server(data: &TemplateData) -> Container {
    let mut c = container(
        OPENVPN_SERVER,
        data.image("kubermatic/openvpn", "v2.5.2-r0"),
        vec![
            "--proto".into(),
            "tcp".into(),
            "--dev".into(),
            "tun".into(),
            "--client-config-dir".into(),
            "/etc/openvpn/clients".into(),
            "--server".into(),
            "10.20.0.0".into(),
            "255.255.255.0".into(),
        ],
    );
    c.ports = Some(vec![tcp_port("secure", 1194)]);
    c
}

fn dns_resolver(data: &TemplateData) -> Container {
    let mut c = container(DNS_RESOLVER, data.image("coredns/coredns", "1.11.1"), vec!["-conf".into(), "/etc/coredns/Corefile".into()]);
    c.ports = Some(vec![tcp_port("dns", 53)]);
    c
}

pub fn deployments(data: &Arc<TemplateData>) -> Registry<Deployment> {
    Registry::new()
        .with(deployment(APISERVER, 2, data, apiserver).control_plane())
        .with(deployment(CONTROLLER_MANAGER, 1, data, controller_manager).control_plane())
        .with(deployment(SCHEDULER, 1, data, scheduler).control_plane())
        .with(deployment(MACHINE_CONTROLLER, 1, data, machine_controller).control_plane())
        .with(deployment(OPENVPN_SERVER, 1, data, openvpn_server))
        .with(deployment(DNS_RESOLVER, 2, data, dns_resolver))
}

pub fn cron_jobs(data: &Arc<TemplateData>) -> Registry<CronJob> {
    let data = Arc::clone(data);
    Registry::new().with(NamedCreator::new(ETCD_BACKUP, move |mut job: CronJob| {
        label(&mut job.metadata, ETCD);
        let spec = job.spec.get_or_insert_with(CronJobSpec::default);
        spec.schedule = "@every 20m".into();
        spec.concurrency_policy = Some("Forbid".into());
        spec.successful_jobs_history_limit = Some(0);
        spec.failed_jobs_history_limit = Some(1);
        let template = spec.job_template.spec.get_or_insert_with(JobSpec::default);
        pod_template(
            &mut template.template,
            ETCD_BACKUP,
            vec![container(
                "backup-creator",
                data.image("etcd", "3.5.12-0"),
                vec![format!(
                    "etcdctl --endpoints http://{}:2379 snapshot save /backup/snapshot.db",
                    data.service_host(ETCD)
                )],
            )],
        );
        template.template.spec.get_or_insert_with(PodSpec::default).restart_policy = Some("OnFailure".into());
        Ok(job)
    }))
}
