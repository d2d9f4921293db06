//! `keelctl run`: a kube-runtime controller driving one pass per tenant event.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use k8s_openapi::api::apps::v1::{Deployment, StatefulSet};
use k8s_openapi::api::batch::v1::CronJob;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Secret, Service};
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use keel_core::{Cluster, Error};
use keel_kubehub::{spawn_watchers, KubeStore};
use keel_orchestrate::{EngineConfig, Orchestrator, PassOutcome, StagePlan, TemplateSource};
use keel_store::{spawn_ingest, SnapshotCache};
use kube::api::Api;
use kube::runtime::controller::{Action, Controller};
use kube::runtime::watcher::Config as WatcherConfig;
use kube::Client;
use tracing::{debug, error, info, warn};

pub struct Ctx {
    orchestrator: Orchestrator<KubeStore, SnapshotCache>,
}

/// Requeue decision for a finished pass.
pub fn action_for(outcome: &PassOutcome, config: &EngineConfig) -> Action {
    match outcome {
        PassOutcome::Converged(_) => Action::requeue(config.resync),
        PassOutcome::Deferred { retry_after, .. } => Action::requeue(*retry_after),
    }
}

async fn reconcile(tenant: Arc<Cluster>, ctx: Arc<Ctx>) -> Result<Action, Error> {
    let outcome = ctx.orchestrator.run_pass(&tenant).await?;
    Ok(action_for(&outcome, ctx.orchestrator.config()))
}

fn error_policy(tenant: Arc<Cluster>, err: &Error, ctx: Arc<Ctx>) -> Action {
    let config = ctx.orchestrator.config();
    // A lagging cache resolves itself after the next watch event
    let delay = if err.is_conflict() { config.gate_retry } else { config.error_requeue };
    warn!(tenant = %tenant.name(), error = %err, retry_ms = delay.as_millis() as u64, "requeue after error");
    Action::requeue(delay)
}

/// Waits for the first cache snapshot or `wait`, whichever comes first.
async fn prime(cache: &SnapshotCache, wait: Duration) {
    match tokio::time::timeout(wait, cache.wait_for_epoch(1)).await {
        Ok(true) => info!(objects = cache.current().len(), "read cache primed"),
        Ok(false) => warn!("cache ingest stopped before the first snapshot"),
        Err(_) => warn!(wait_secs = wait.as_secs(), "starting before the first cache snapshot"),
    }
}

pub async fn run(
    templates: Arc<dyn TemplateSource>,
    plan: Arc<dyn StagePlan>,
    config: EngineConfig,
    wait: Duration,
) -> Result<()> {
    let client = Client::try_default().await.context("building kube client")?;
    let (delta_tx, cache) = spawn_ingest(config.cache_cap);
    let watchers = spawn_watchers(&client, &delta_tx);
    prime(&cache, wait).await;

    info!(plan = plan.name(), watchers = watchers.len(), "controller starting");
    let orchestrator =
        Orchestrator::new(Arc::new(KubeStore::new(client.clone())), Arc::new(cache), templates, config).with_plan(plan);
    let ctx = Arc::new(Ctx { orchestrator });

    let cfg = WatcherConfig::default;
    Controller::new(Api::<Cluster>::all(client.clone()), cfg())
        .owns(Api::<Namespace>::all(client.clone()), cfg())
        .owns(Api::<Service>::all(client.clone()), cfg())
        .owns(Api::<Secret>::all(client.clone()), cfg())
        .owns(Api::<ConfigMap>::all(client.clone()), cfg())
        .owns(Api::<StatefulSet>::all(client.clone()), cfg())
        .owns(Api::<Deployment>::all(client.clone()), cfg())
        .owns(Api::<CronJob>::all(client.clone()), cfg())
        .owns(Api::<PodDisruptionBudget>::all(client.clone()), cfg())
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| {
            match res {
                Ok((obj, action)) => debug!(tenant = %obj.name, ?action, "reconciled"),
                Err(e) => error!(error = %e, "reconcile failed"),
            }
            std::future::ready(())
        })
        .await;

    drop(delta_tx);
    for w in watchers {
        w.abort();
    }
    info!("controller stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use keel_orchestrate::{Gate, PassReport};

    #[test]
    fn converged_waits_for_resync() {
        let config = EngineConfig::default();
        let action = action_for(&PassOutcome::Converged(PassReport::default()), &config);
        assert_eq!(action, Action::requeue(Duration::from_secs(300)));
    }

    #[test]
    fn deferred_retries_after_gate_interval() {
        let config = EngineConfig::default();
        let outcome = PassOutcome::Deferred {
            gate: Gate::InfrastructureReady,
            retry_after: Duration::from_millis(750),
            report: PassReport::default(),
        };
        assert_eq!(action_for(&outcome, &config), Action::requeue(Duration::from_millis(750)));
    }
}
