//! Stage plans: the ordered steps of one pass.
//!
//! Ordering is a fixed total order per plan. A dependency-graph scheduler can
//! replace a plan without touching the reconciler or the creators.

use std::fmt;

use keel_core::{Cluster, Kind};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;

/// A registry reconciled as one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Group {
    Services,
    Secrets,
    ConfigMaps,
    StatefulSets,
    Deployments,
    CronJobs,
    PodDisruptionBudgets,
    VerticalPodAutoscalers,
    ClusterRoles,
    CustomResourceDefinitions,
}

impl Group {
    pub fn kind(self) -> Kind {
        match self {
            Group::Services => Kind::Service,
            Group::Secrets => Kind::Secret,
            Group::ConfigMaps => Kind::ConfigMap,
            Group::StatefulSets => Kind::StatefulSet,
            Group::Deployments => Kind::Deployment,
            Group::CronJobs => Kind::CronJob,
            Group::PodDisruptionBudgets => Kind::PodDisruptionBudget,
            Group::VerticalPodAutoscalers => Kind::VerticalPodAutoscaler,
            Group::ClusterRoles => Kind::ClusterRole,
            Group::CustomResourceDefinitions => Kind::CustomResourceDefinition,
        }
    }
}

/// Readiness precondition evaluated against the tenant snapshot of the pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Gate {
    InfrastructureReady,
}

impl Gate {
    pub fn is_open(self, tenant: &Cluster) -> bool {
        match self {
            Gate::InfrastructureReady => tenant.infrastructure_ready(),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Gate::InfrastructureReady => "infrastructure-ready",
        }
    }
}

impl fmt::Display for Gate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Step {
    EnsureNamespace,
    Reconcile(Group),
    Gate(Gate),
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Step::EnsureNamespace => f.write_str("ensure Namespace"),
            Step::Reconcile(g) => write!(f, "reconcile {}", g.kind()),
            Step::Gate(g) => write!(f, "gate {}", g),
        }
    }
}

pub type Steps = SmallVec<[Step; 12]>;

pub trait StagePlan: Send + Sync {
    fn name(&self) -> &'static str;

    /// Steps for one pass over `tenant`, in execution order.
    fn steps(&self, tenant: &Cluster) -> Steps;

    /// Whether children get the tenant's controller reference.
    fn stamps_owner(&self) -> bool { true }
}

/// Control plane of a tenant, hosted in the seed store.
#[derive(Debug, Clone, Copy, Default)]
pub struct SeedPlan;

impl StagePlan for SeedPlan {
    fn name(&self) -> &'static str { "seed" }

    fn steps(&self, tenant: &Cluster) -> Steps {
        let hosted = !tenant.external_control_plane();
        let mut steps = Steps::new();
        steps.push(Step::EnsureNamespace);
        if hosted {
            steps.push(Step::Reconcile(Group::Services));
            steps.push(Step::Reconcile(Group::Secrets));
        }
        steps.push(Step::Reconcile(Group::StatefulSets));
        steps.push(Step::Gate(Gate::InfrastructureReady));
        if hosted {
            steps.push(Step::Reconcile(Group::ConfigMaps));
        }
        steps.extend([
            Step::Reconcile(Group::Deployments),
            Step::Reconcile(Group::CronJobs),
            Step::Reconcile(Group::PodDisruptionBudgets),
            Step::Reconcile(Group::VerticalPodAutoscalers),
        ]);
        steps
    }
}

/// Cluster-scoped objects inside the tenant's own store. The tenant object
/// does not live there, so no owner reference is stamped.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserClusterPlan;

impl StagePlan for UserClusterPlan {
    fn name(&self) -> &'static str { "user-cluster" }

    fn steps(&self, _tenant: &Cluster) -> Steps {
        let mut steps = Steps::new();
        steps.push(Step::Reconcile(Group::CustomResourceDefinitions));
        steps.push(Step::Reconcile(Group::ClusterRoles));
        steps
    }

    fn stamps_owner(&self) -> bool { false }
}
