//! Application services for the cellplane control plane.

pub mod analysis;
pub mod checks;
pub mod credential_service;
pub mod protocol;
pub mod recursion;
pub mod retry;
pub mod spawn_service;
pub mod subject;
pub mod topology;
pub mod workload_builder;

pub use analysis::analyze_runs;
pub use checks::CheckRunner;
pub use credential_service::CredentialService;
pub use protocol::{MessageVerdict, ProtocolEnforcer};
pub use recursion::{RecursionValidator, SpawnInput, SpawnVerdict};
pub use retry::{transient, Backoff, RetryPolicy};
pub use spawn_service::SpawnRequestService;
pub use subject::{matches_any, subject_matches};
pub use topology::{generate_routes, peers_of, route_table_json, RouteTable};
pub use workload_builder::{
    build_workload, parse_embedded_spec, spec_changed, workload_name, BuilderEndpoints,
};
