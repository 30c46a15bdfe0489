//! SQLite adapters for the persistence ports.

pub mod audit_log;
pub mod budget_ledger;
pub mod cell_tree;
pub mod connection;
pub mod credentials;
pub mod events;
pub mod migrations;
pub mod resource_store;

pub use audit_log::SqliteAuditLog;
pub use budget_ledger::SqliteBudgetLedger;
pub use cell_tree::SqliteCellTree;
pub use connection::{create_pool, create_test_pool, verify_connection, ConnectionError, PoolConfig};
pub use credentials::SqliteCredentialStore;
pub use events::SqliteEventRecorder;
pub use migrations::{all_embedded_migrations, migrated_test_pool, Migration, MigrationError, Migrator};
pub use resource_store::SqliteResourceStore;
