//! The incident processing loop.
//!
//! This module contains the core state machine components:
//!
//! - [`controller`] - Sequences Observe -> Reason -> Act -> Evaluate
//!   and decides whether to loop or terminate
//! - [`state`] - The ephemeral [`state::LoopState`] threaded through
//!   each stage
//! - [`retry`] - Backoff policy for reasoning failures
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐     ┌─────────────┐     ┌──────────────┐
//! │LoopController│────>│ LoopState   │────>│DeliveryChannel│
//! └──────────────┘     └─────────────┘     └──────────────┘
//!        │                    │
//!        v                    v
//! ┌──────────────┐     ┌─────────────┐
//! │ Reasoning    │     │ Action      │
//! │ Engine       │     │ Executor    │
//! └──────────────┘     └─────────────┘
//! ```

pub mod controller;
pub mod retry;
pub mod state;

// Re-exports for convenience
pub use controller::{ControllerConfig, LoopController, LoopDependencies, RunOutcome};
pub use state::{LoopState, Stage};
