//! One reconcile pass for one tenant.

use std::sync::Arc;
use std::time::{Duration, Instant};

use k8s_openapi::api::core::v1::Namespace;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use keel_core::{set_controller_ref, Cluster, ClusterCache, ClusterStore, Error, Kind, ObjectKey, ResourceStore, StoreError, StoreOp};
use keel_reconcile::{reconcile, ReconcileReport};
use metrics::{counter, histogram};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::creators::{CreatorSet, TemplateSource};
use crate::plan::{Gate, Group, SeedPlan, StagePlan, Step};
use crate::single_flight::SingleFlight;

/// What a pass did before it converged or was deferred.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PassReport {
    pub namespace_created: bool,
    pub groups: Vec<(Group, ReconcileReport)>,
}

impl PassReport {
    pub fn group(&self, group: Group) -> Option<&ReconcileReport> {
        self.groups.iter().find(|(g, _)| *g == group).map(|(_, r)| r)
    }

    pub fn mutations(&self) -> usize {
        self.groups.iter().map(|(_, r)| r.mutations()).sum::<usize>() + usize::from(self.namespace_created)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum PassOutcome {
    /// Every step ran.
    Converged(PassReport),
    /// A gate was closed; later steps were not touched. Not an error.
    Deferred { gate: Gate, retry_after: Duration, report: PassReport },
}

impl PassOutcome {
    pub fn report(&self) -> &PassReport {
        match self {
            PassOutcome::Converged(r) | PassOutcome::Deferred { report: r, .. } => r,
        }
    }

    pub fn is_converged(&self) -> bool { matches!(self, PassOutcome::Converged(_)) }

    pub fn as_str(&self) -> &'static str {
        match self {
            PassOutcome::Converged(_) => "converged",
            PassOutcome::Deferred { .. } => "deferred",
        }
    }
}

pub struct Orchestrator<S, C> {
    store: Arc<S>,
    cache: Arc<C>,
    templates: Arc<dyn TemplateSource>,
    plan: Arc<dyn StagePlan>,
    config: EngineConfig,
    flights: SingleFlight,
}

impl<S, C> Clone for Orchestrator<S, C> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            cache: Arc::clone(&self.cache),
            templates: Arc::clone(&self.templates),
            plan: Arc::clone(&self.plan),
            config: self.config.clone(),
            flights: self.flights.clone(),
        }
    }
}

impl<S: ClusterStore, C: ClusterCache> Orchestrator<S, C> {
    /// Orchestrator running the seed plan.
    pub fn new(store: Arc<S>, cache: Arc<C>, templates: Arc<dyn TemplateSource>, config: EngineConfig) -> Self {
        Self { store, cache, templates, plan: Arc::new(SeedPlan), config, flights: SingleFlight::new() }
    }

    pub fn with_plan(mut self, plan: Arc<dyn StagePlan>) -> Self {
        self.plan = plan;
        self
    }

    pub fn config(&self) -> &EngineConfig { &self.config }
    pub fn plan(&self) -> &dyn StagePlan { self.plan.as_ref() }

    /// Run one pass for `tenant`. Waits while another pass for the same
    /// tenant identity is in flight.
    pub async fn run_pass(&self, tenant: &Cluster) -> Result<PassOutcome, Error> {
        let _flight = self.flights.acquire(&tenant.identity()).await;
        let t0 = Instant::now();
        let res = self.pass(tenant).await;
        histogram!("keel_pass_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
        let outcome = match &res {
            Ok(o) => o.as_str(),
            Err(_) => "failed",
        };
        counter!("keel_pass_total", 1u64, "outcome" => outcome);
        match &res {
            Ok(PassOutcome::Converged(r)) => {
                info!(tenant = %tenant.name(), plan = self.plan.name(), mutations = r.mutations(), "pass converged")
            }
            Ok(PassOutcome::Deferred { gate, retry_after, .. }) => {
                debug!(tenant = %tenant.name(), gate = %gate, retry_ms = retry_after.as_millis() as u64, "pass deferred")
            }
            Err(e) => warn!(tenant = %tenant.name(), error = %e, "pass failed"),
        }
        res
    }

    async fn pass(&self, tenant: &Cluster) -> Result<PassOutcome, Error> {
        if tenant.name().is_empty() {
            return Err(Error::InvalidTenant { tenant: "<unnamed>".into(), message: "metadata.name is empty".into() });
        }
        let namespace = tenant.namespace_name();
        let owner = if self.plan.stamps_owner() { Some(tenant.owner_ref()?) } else { None };
        let creators = self
            .templates
            .creators(tenant, &namespace)
            .map_err(|source| Error::Templates { tenant: tenant.name().to_string(), source })?
            .prepare(owner.as_ref(), tenant.external_control_plane(), self.config.autoscaling_enabled);

        let mut report = PassReport::default();
        for step in self.plan.steps(tenant) {
            match step {
                Step::EnsureNamespace => {
                    report.namespace_created |= self.ensure_namespace(&namespace, owner.as_ref()).await?;
                }
                Step::Gate(gate) => {
                    if !gate.is_open(tenant) {
                        return Ok(PassOutcome::Deferred { gate, retry_after: self.config.gate_retry, report });
                    }
                }
                Step::Reconcile(group) => {
                    let r = self.reconcile_group(group, &creators, &namespace).await?;
                    report.groups.push((group, r));
                }
            }
        }
        Ok(PassOutcome::Converged(report))
    }

    async fn reconcile_group(&self, group: Group, set: &CreatorSet, namespace: &str) -> Result<ReconcileReport, Error> {
        let store = self.store.as_ref();
        let cache = self.cache.as_ref();
        match group {
            Group::Services => reconcile(&set.services, namespace, store, cache).await,
            Group::Secrets => reconcile(&set.secrets, namespace, store, cache).await,
            Group::ConfigMaps => reconcile(&set.config_maps, namespace, store, cache).await,
            Group::StatefulSets => reconcile(&set.stateful_sets, namespace, store, cache).await,
            Group::Deployments => reconcile(&set.deployments, namespace, store, cache).await,
            Group::CronJobs => reconcile(&set.cron_jobs, namespace, store, cache).await,
            Group::PodDisruptionBudgets => reconcile(&set.pod_disruption_budgets, namespace, store, cache).await,
            Group::VerticalPodAutoscalers => reconcile(&set.vertical_pod_autoscalers, namespace, store, cache).await,
            Group::ClusterRoles => reconcile(&set.cluster_roles, namespace, store, cache).await,
            Group::CustomResourceDefinitions => {
                reconcile(&set.custom_resource_definitions, namespace, store, cache).await
            }
        }
    }

    /// Get-or-create the tenant namespace. Returns true when it was created.
    async fn ensure_namespace(&self, name: &str, owner: Option<&OwnerReference>) -> Result<bool, Error> {
        let key = ObjectKey::cluster(name);
        let store = self.store.as_ref();
        let existing = <S as ResourceStore<Namespace>>::get(store, &key)
            .await
            .map_err(|e| Error::store(StoreOp::Get, Kind::Namespace, key.clone(), e))?;
        if existing.is_some() {
            return Ok(false);
        }

        let mut ns = Namespace { metadata: ObjectMeta { name: Some(name.to_string()), ..Default::default() }, ..Default::default() };
        if let Some(owner) = owner {
            set_controller_ref(&mut ns.metadata, owner);
        }
        match <S as ResourceStore<Namespace>>::create(store, &ns).await {
            Ok(_) => {
                info!(namespace = %name, "namespace created");
                Ok(true)
            }
            // Lost a race with another writer; the namespace is there
            Err(StoreError::AlreadyExists) => Ok(false),
            Err(e) => Err(Error::store(StoreOp::Create, Kind::Namespace, key, e)),
        }
    }
}
