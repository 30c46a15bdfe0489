//! Domain models
//!
//! Pure domain entities with business logic and validation rules.
//! These models are framework-agnostic and contain no infrastructure
//! concerns.

pub mod budget;
pub mod cell;
pub mod collective;
pub mod config;
pub mod credentials;
pub mod duration;
pub mod envelope;
pub mod experiment;
pub mod formation;
pub mod meta;
pub mod mission;
pub mod protocol;
pub mod spawn_request;
pub mod workload;

pub use budget::{replay_ledger, BudgetBalance, BudgetOperation, BudgetTreeNode, LedgerEntry};
pub use cell::{
    Cell, CellPhase, CellResources, CellSpec, CellStatus, MemoryWindow, MindSpec, RecursionSpec,
    SpawnPolicy, ToolRef,
};
pub use collective::{
    Blueprint, BlueprintSpec, Channel, ChannelSpec, Federation, FederationSpec, KnowledgeGraph,
    KnowledgeGraphSpec, Role, RoleBinding, RoleBindingSpec, RoleRule, RoleSpec, SimplePhase,
    SimpleStatus, Swarm, SwarmSpec,
};
pub use config::{
    Config, ControllerConfig, DatabaseConfig, LimitsConfig, LoggingConfig, RetryConfig,
};
pub use credentials::{BusOp, BusPermissions, NatsCredentials};
pub use duration::parse_duration;
pub use envelope::{Envelope, MessageType};
pub use experiment::{
    Analysis, Experiment, ExperimentBudget, ExperimentPhase, ExperimentSpec, ExperimentStatus,
    MetricSpec, MetricSummary, MetricType, RunPhase, RunSpec, RunStatus, Variable,
};
pub use formation::{
    CellTemplate, Formation, FormationBudget, FormationPhase, FormationSpec, FormationStatus,
    MemberStatus, Route, TopologyKind, TopologySpec,
};
pub use meta::{
    is_valid_label, validate_label, ObjectMeta, OwnerReference, ResourceKind, MAX_LABEL_LEN,
};
pub use mission::{
    AttemptRecord, CheckResult, CheckSpec, CheckStatus, CompareOp, CompletionSpec, Entrypoint,
    Mission, MissionPhase, MissionSpec, MissionStatus, ReviewDecision, ReviewRecord, ReviewSpec,
};
pub use protocol::{
    auction_protocol, builtin_protocols, contract_protocol, deliberation_protocol,
    ProtocolSession, ProtocolSpec, ProtocolState, ProtocolTransition, SessionStep,
};
pub use spawn_request::{SpawnDecision, SpawnRequest, SpawnRequestSpec, SpawnRequestStatus};
pub use workload::{
    ResourceRequirements, RestartPolicy, VolumeMount, WorkloadPhase, WorkloadSpec, WorkloadState,
    CELL_SPEC_ENV, PRIVATE_WORKSPACE_PREFIX, ROUTE_TABLE_PATH, SHARED_WORKSPACE_PATH,
};

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Implemented by every declarative kind the store persists and the
/// controllers watch.
pub trait CustomResource: Clone + Send + Sync + Serialize + DeserializeOwned + 'static {
    const KIND: ResourceKind;
    type Spec: Clone + Send + Sync + Serialize + DeserializeOwned;
    type Status: Clone + Send + Sync + Serialize + DeserializeOwned;

    fn from_parts(meta: ObjectMeta, spec: Self::Spec, status: Option<Self::Status>) -> Self;
    fn meta(&self) -> &ObjectMeta;
    fn meta_mut(&mut self) -> &mut ObjectMeta;
    fn spec(&self) -> &Self::Spec;
    fn status(&self) -> Option<&Self::Status>;
    fn set_status(&mut self, status: Self::Status);

    /// Admission validation: metadata grammar plus spec constraints.
    fn validate(&self) -> Result<(), String>;
}

/// Wires a resource struct (`meta` + `spec` + optional `status` fields) into
/// [`CustomResource`]. The spec type must provide an inherent
/// `validate(&self) -> Result<(), String>`.
macro_rules! custom_resource {
    ($resource:ident, $spec:ty, $status:ty, $kind:expr) => {
        impl $crate::domain::models::CustomResource for $resource {
            const KIND: $crate::domain::models::meta::ResourceKind = $kind;
            type Spec = $spec;
            type Status = $status;

            fn from_parts(
                meta: $crate::domain::models::meta::ObjectMeta,
                spec: Self::Spec,
                status: Option<Self::Status>,
            ) -> Self {
                Self { meta, spec, status }
            }

            fn meta(&self) -> &$crate::domain::models::meta::ObjectMeta {
                &self.meta
            }

            fn meta_mut(&mut self) -> &mut $crate::domain::models::meta::ObjectMeta {
                &mut self.meta
            }

            fn spec(&self) -> &Self::Spec {
                &self.spec
            }

            fn status(&self) -> Option<&Self::Status> {
                self.status.as_ref()
            }

            fn set_status(&mut self, status: Self::Status) {
                self.status = Some(status);
            }

            fn validate(&self) -> Result<(), String> {
                $crate::domain::models::meta::validate_label(&self.meta.name)?;
                $crate::domain::models::meta::validate_label(&self.meta.namespace)?;
                self.spec.validate()
            }
        }
    };
}

pub(crate) use custom_resource;
