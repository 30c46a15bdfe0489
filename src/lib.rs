//! Cellplane - control plane for cell swarms
//!
//! Reconciles declarative resources (Cell, Formation, Mission, Experiment,
//! SpawnRequest and friends) into running workloads while enforcing:
//! - hierarchical budget conservation through an append-only ledger
//! - topology-derived publish allow-lists on the message bus
//! - recursion limits on cell spawning
//! - mission progression through completion checks, retries and review

pub mod adapters;
pub mod application;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

pub use domain::errors::{ControlError, ControlResult};
