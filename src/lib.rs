//! Sentinel - a self-healing SRE agent.
//!
//! Sentinel ingests signals (manual issue reports, log alerts, Slack
//! messages, GitHub webhooks) into an incident queue; a background
//! worker drives each incident through an Observe -> Reason -> Act ->
//! Evaluate loop, using a large-language-model to propose and narrate
//! remediation.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`incident`] - The incident record and its lifecycle contract
//! - [`signal`] - Normalization of external events into incidents
//! - [`store`] - Incident store trait and implementations
//! - [`context`] - Read-only context bundles for reasoning
//! - [`reasoning`] - The LLM contract, prompts, and strict parsing
//! - [`executor`] - Pluggable action execution
//! - [`r#loop`] - The loop controller state machine
//! - [`channel`] - Push/pull delivery of loop transitions
//! - [`worker`] - The queue-draining worker pool
//! - [`testing`] - Mocks and fixtures
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use sentinel::channel::DeliveryChannel;
//! use sentinel::config::SentinelConfig;
//! use sentinel::r#loop::{ControllerConfig, LoopController, LoopDependencies};
//!
//! let controller = LoopController::new(deps, ControllerConfig::from_config(&config));
//! let outcome = controller.run(&incident_id).await?;
//! ```

pub mod channel;
pub mod config;
pub mod context;
pub mod error;
pub mod executor;
pub mod health;
pub mod incident;
pub mod r#loop;
pub mod reasoning;
pub mod signal;
pub mod store;
pub mod testing;
pub mod worker;

// Re-export commonly used types
pub use error::{ReasoningError, Result, SentinelError};

// Re-export the incident data model
pub use incident::{Incident, IncidentStatus, Severity, SignalType};

// Re-export the loop core
pub use r#loop::{ControllerConfig, LoopController, LoopDependencies, LoopState, RunOutcome, Stage};

// Re-export collaborator traits
pub use context::{ContextBundle, ContextHydrator};
pub use executor::{ActionExecutor, ActionOutcome};
pub use health::HealthProbe;
pub use reasoning::{Diagnosis, ReasoningEngine, Verdict};
pub use store::IncidentStore;

// Re-export configuration types
pub use config::{ParseFailurePolicy, SentinelConfig};
