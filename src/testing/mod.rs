//! Testing infrastructure: mocks and fixtures.
//!
//! The loop controller takes every collaborator as a trait object, so
//! the whole state machine is testable without a model provider, a log
//! source, or a subprocess. This module ships scripted mocks for each
//! trait and a handful of incident fixtures; integration tests under
//! `tests/` use them as well, which is why they live in the library
//! rather than behind `#[cfg(test)]`.
//!
//! # Example
//!
//! ```rust,ignore
//! use sentinel::testing::{MockReasoner, MockExecutor, MockHydrator};
//!
//! let reasoner = MockReasoner::new()
//!     .with_diagnosis("upstream unreachable", "restart upstream service")
//!     .with_verdict(true);
//! ```

pub mod fixtures;
pub mod mocks;

pub use fixtures::{bundle_with_lines, log_incident, manual_incident, slack_incident};
pub use mocks::{MockExecutor, MockHydrator, MockReasoner, StaticProbe};
