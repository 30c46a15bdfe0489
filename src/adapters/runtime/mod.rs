//! Workload runtime adapters.

pub mod local;

pub use local::LocalWorkloadRuntime;
