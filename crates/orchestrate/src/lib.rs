//! Keel orchestrate: ordered reconcile passes per tenant.
//!
//! A pass ensures the tenant namespace, then reconciles one registry per
//! kind in plan order. A closed gate ends the pass as `Deferred`; the first
//! error ends it as failed. Passes for one tenant never overlap.

#![forbid(unsafe_code)]

pub mod config;
pub mod creators;
pub mod orchestrator;
pub mod plan;
pub mod single_flight;

pub use config::EngineConfig;
pub use creators::{CreatorSet, TemplateSource};
pub use orchestrator::{Orchestrator, PassOutcome, PassReport};
pub use plan::{Gate, Group, SeedPlan, StagePlan, Step, Steps, UserClusterPlan};
pub use single_flight::{FlightGuard, SingleFlight};
