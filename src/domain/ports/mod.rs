//! Domain ports (interfaces) for the cellplane control plane.

pub mod audit_log;
pub mod budget_ledger;
pub mod cell_tree;
pub mod credential_store;
pub mod event_recorder;
pub mod message_bus;
pub mod resource_store;
pub mod workload_runtime;

pub use audit_log::{AuditEntry, AuditFilter, AuditLog, AuditOutcome};
pub use budget_ledger::BudgetLedger;
pub use cell_tree::{CellTreeEntry, CellTreeStore};
pub use credential_store::CredentialStore;
pub use event_recorder::{EventKind, EventRecord, EventRecorder, ObjectRef};
pub use message_bus::{BusMessage, MessageBus, Subscription};
pub use resource_store::{
    create_typed, get_typed, list_typed, update_status_typed, update_typed, RawResource,
    ResourceStore, WatchEvent, WatchEventKind, WatchStream,
};
pub use workload_runtime::WorkloadRuntime;
