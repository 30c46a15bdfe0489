//! CLI surface and bootstrap wiring.

pub mod commands;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::adapters::bus::{GuardedBus, InMemoryBus};
use crate::adapters::runtime::LocalWorkloadRuntime;
use crate::adapters::sqlite::{
    all_embedded_migrations, create_pool, Migrator, SqliteAuditLog, SqliteBudgetLedger,
    SqliteCellTree, SqliteCredentialStore, SqliteEventRecorder, SqliteResourceStore,
};
use crate::application::ControllerContext;
use crate::domain::models::config::Config;
use crate::services::checks::CheckRunner;
use crate::services::credential_service::CredentialService;
use crate::services::protocol::ProtocolEnforcer;
use crate::services::recursion::RecursionValidator;
use crate::services::spawn_service::SpawnRequestService;
use crate::services::workload_builder::BuilderEndpoints;

#[derive(Parser)]
#[command(name = "cellplane", version, about = "Control plane for cell swarms")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Configuration file (defaults to hierarchical .cellplane/ loading)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Namespace for namespaced operations
    #[arg(short = 'n', long, global = true, default_value = "default")]
    pub namespace: String,

    /// Emit JSON instead of tables
    #[arg(long, global = true)]
    pub json: bool,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the control plane until interrupted
    Serve,

    /// Apply resource manifests from a YAML file
    Apply {
        /// Manifest file (`-` reads stdin); multiple YAML documents allowed
        #[arg(short, long)]
        file: PathBuf,
    },

    /// List resources of a kind, or show one by name
    Get {
        kind: String,
        name: Option<String>,
    },

    /// Delete a resource (owned children cascade)
    Delete {
        kind: String,
        name: String,
    },

    /// Show recent events for a resource
    Events {
        kind: String,
        name: String,
    },

    /// Budget ledger operations
    #[command(subcommand)]
    Budget(BudgetCommands),

    /// Spawn request approvals
    #[command(subcommand)]
    Spawns(SpawnCommands),
}

#[derive(Subcommand)]
pub enum BudgetCommands {
    /// Create a root balance for a cell
    InitRoot { cell: String, amount: f64 },
    /// Show one cell's balance
    Show { cell: String },
    /// Show the aggregated budget tree under a root cell
    Tree { root: String },
    /// Show a cell's journal, newest first
    History {
        cell: String,
        #[arg(long, default_value_t = 20)]
        limit: u32,
    },
}

#[derive(Subcommand)]
pub enum SpawnCommands {
    /// List spawn requests awaiting a decision
    List,
    /// Approve a spawn request, creating the child cell
    Approve {
        name: String,
        #[arg(long)]
        comment: Option<String>,
    },
    /// Reject a spawn request
    Reject {
        name: String,
        #[arg(long)]
        comment: Option<String>,
    },
}

/// Everything a command handler needs, built once per invocation.
pub struct App {
    pub ctx: Arc<ControllerContext>,
    pub spawn_service: SpawnRequestService,
    pub recursion: RecursionValidator,
    pub enforcer: Arc<ProtocolEnforcer>,
}

/// Wire the adapters and services behind a single database.
pub async fn bootstrap(config: Config) -> Result<App> {
    let database_url = format!("sqlite:{}", config.database.path);
    let pool = create_pool(&database_url, None)
        .await
        .context("Failed to connect to database")?;
    Migrator::new(pool.clone())
        .run_embedded_migrations(all_embedded_migrations())
        .await
        .context("Failed to run database migrations")?;

    let store = Arc::new(SqliteResourceStore::new(pool.clone()));
    let events = Arc::new(SqliteEventRecorder::new(pool.clone()));
    let ledger = Arc::new(SqliteBudgetLedger::new(pool.clone()));
    let tree = Arc::new(SqliteCellTree::new(pool.clone()));
    let audit = Arc::new(SqliteAuditLog::new(pool.clone()));
    let credentials = Arc::new(CredentialService::new(Arc::new(SqliteCredentialStore::new(
        pool.clone(),
    ))));
    let enforcer = Arc::new(ProtocolEnforcer::with_builtins());

    let raw_bus = Arc::new(InMemoryBus::new());
    let bus = Arc::new(GuardedBus::new(
        raw_bus,
        Arc::clone(&credentials),
        Arc::clone(&enforcer),
    ));
    let runtime = Arc::new(LocalWorkloadRuntime::new());
    let checks = Arc::new(CheckRunner::new(bus.clone()));

    let ctx = Arc::new(ControllerContext {
        store: store.clone(),
        events,
        runtime,
        bus,
        ledger: ledger.clone(),
        tree: tree.clone(),
        audit: audit.clone(),
        credentials,
        checks,
        endpoints: BuilderEndpoints::default(),
        config: config.clone(),
    });

    let spawn_service = SpawnRequestService::new(store.clone(), tree.clone(), audit);
    let recursion = RecursionValidator::new(tree, ledger, store, config.limits.max_total_cells);

    Ok(App { ctx, spawn_service, recursion, enforcer })
}
