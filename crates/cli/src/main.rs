use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum};
use keel_core::{Cluster, ClusterStatus};
use keel_orchestrate::{EngineConfig, Orchestrator, PassOutcome, SeedPlan, StagePlan, TemplateSource, UserClusterPlan};
use keel_store::MemoryStore;
use keel_templates::{SampleTemplates, TemplateSettings};
use tracing::info;

mod controller;

#[derive(Parser, Debug)]
#[command(name = "keelctl", version, about = "Keel tenant control-plane reconciler")]
struct Cli {
    /// Output format (human: YAML documents or a numbered step list)
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Which step sequence to run
    #[arg(long = "plan", value_enum, global = true, default_value_t = PlanKind::Seed)]
    plan: PlanKind,

    /// Template settings file (YAML); built-in defaults when absent
    #[arg(long = "settings", global = true, env = "KEEL_TEMPLATE_SETTINGS")]
    settings: Option<PathBuf>,

    /// Let autoscaler policies act instead of only recommending
    #[arg(long = "enable-autoscaling", action = ArgAction::SetTrue, global = true)]
    enable_autoscaling: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum PlanKind { Seed, UserCluster }

impl PlanKind {
    fn plan(self) -> Arc<dyn StagePlan> {
        match self {
            PlanKind::Seed => Arc::new(SeedPlan),
            PlanKind::UserCluster => Arc::new(UserClusterPlan),
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run the controller against the current kube context
    Run {
        /// Seconds to wait for the first read-cache snapshot
        #[arg(long = "wait-secs", env = "KEEL_WAIT_SECS", default_value_t = 8)]
        wait_secs: u64,
    },
    /// Run one pass for a tenant against an in-memory store and print the result
    Render {
        /// Tenant object (YAML or JSON)
        tenant: PathBuf,
        /// Treat the tenant's infrastructure as ready
        #[arg(long = "infra-ready", action = ArgAction::SetTrue)]
        infra_ready: bool,
    },
    /// Print the step sequence for a tenant
    Plan {
        /// Tenant object (YAML or JSON)
        tenant: PathBuf,
    },
}

fn init_tracing() {
    let env = std::env::var("KEEL_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(true).with_writer(std::io::stderr).init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KEEL_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid KEEL_METRICS_ADDR; expected host:port");
        }
    }
}

fn load_tenant(path: &Path) -> Result<Cluster> {
    let text = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_yaml::from_str(&text).with_context(|| format!("parsing tenant {}", path.display()))
}

fn load_settings(path: Option<&Path>) -> Result<TemplateSettings> {
    match path {
        Some(p) => {
            let text = std::fs::read_to_string(p).with_context(|| format!("reading {}", p.display()))?;
            serde_yaml::from_str(&text).with_context(|| format!("parsing settings {}", p.display()))
        }
        None => Ok(TemplateSettings::default()),
    }
}

fn mark_infra_ready(tenant: &mut Cluster) {
    tenant.status.get_or_insert_with(ClusterStatus::default).health.cloud_provider_infrastructure = true;
}

fn print_objects(store: &MemoryStore, output: Output) -> Result<()> {
    let objects: Vec<serde_json::Value> = store.dump().into_iter().map(|(_, _, v)| v).collect();
    match output {
        Output::Human => {
            for obj in objects {
                println!("---");
                print!("{}", serde_yaml::to_string(&obj)?);
            }
        }
        Output::Json => println!("{}", serde_json::to_string_pretty(&objects)?),
    }
    Ok(())
}

async fn render(
    tenant: Cluster,
    plan: Arc<dyn StagePlan>,
    templates: Arc<dyn TemplateSource>,
    config: EngineConfig,
) -> Result<(Arc<MemoryStore>, PassOutcome)> {
    let store = Arc::new(MemoryStore::new());
    let orch = Orchestrator::new(Arc::clone(&store), Arc::clone(&store), templates, config).with_plan(plan);
    let outcome = orch.run_pass(&tenant).await?;
    Ok((store, outcome))
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();

    let mut config = EngineConfig::from_env();
    config.autoscaling_enabled |= cli.enable_autoscaling;
    let settings = load_settings(cli.settings.as_deref())?;
    let templates: Arc<dyn TemplateSource> = Arc::new(SampleTemplates::new(settings));
    let plan = cli.plan.plan();

    match cli.command {
        Commands::Run { wait_secs } => {
            info!(plan = plan.name(), autoscaling = config.autoscaling_enabled, "run invoked");
            controller::run(templates, plan, config, Duration::from_secs(wait_secs)).await?;
        }
        Commands::Render { tenant, infra_ready } => {
            let mut tenant = load_tenant(&tenant)?;
            if infra_ready {
                mark_infra_ready(&mut tenant);
            }
            let (store, outcome) = render(tenant, plan, templates, config).await?;
            if let PassOutcome::Deferred { gate, .. } = &outcome {
                eprintln!("pass deferred at gate {gate}; later groups not rendered (try --infra-ready)");
            }
            print_objects(&store, cli.output)?;
        }
        Commands::Plan { tenant } => {
            let tenant = load_tenant(&tenant)?;
            let steps: Vec<String> = plan.steps(&tenant).iter().map(|s| s.to_string()).collect();
            match cli.output {
                Output::Human => {
                    for (i, step) in steps.iter().enumerate() {
                        println!("{:>2}. {}", i + 1, step);
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&steps)?),
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TENANT: &str = r#"
metadata:
  name: d3adb33f
  uid: 0b5e-uid
spec:
  network:
    pods: ["172.25.0.0/16"]
    services: ["10.240.16.0/20"]
"#;

    fn tenant() -> Cluster { serde_yaml::from_str(TENANT).unwrap() }

    #[test]
    fn infra_flag_opens_gate() {
        let mut t = tenant();
        assert!(!t.infrastructure_ready());
        mark_infra_ready(&mut t);
        assert!(t.infrastructure_ready());
    }

    #[tokio::test]
    async fn render_stops_at_gate_without_flag() {
        let templates: Arc<dyn TemplateSource> = Arc::new(SampleTemplates::default());
        let (store, outcome) = render(tenant(), PlanKind::Seed.plan(), templates, EngineConfig::default()).await.unwrap();
        assert!(!outcome.is_converged());
        assert!(store.keys(keel_core::Kind::Deployment).is_empty());
        assert!(!store.keys(keel_core::Kind::StatefulSet).is_empty());
    }

    #[test]
    fn cli_parses_render() {
        let cli = Cli::try_parse_from(["keelctl", "render", "t.yaml", "--infra-ready", "-o", "json"]).unwrap();
        assert_eq!(cli.output, Output::Json);
        assert!(matches!(cli.command, Commands::Render { infra_ready: true, .. }));
    }
}
