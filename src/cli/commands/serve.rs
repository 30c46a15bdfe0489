//! `serve`: run every controller until interrupted.

use std::sync::Arc;

use anyhow::Result;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::application::{
    CellReconciler, ControllerContext, ControllerWorker, ExperimentReconciler,
    FormationReconciler, MissionReconciler, Reconciler, SimpleReconciler,
};
use crate::domain::models::collective::{
    Blueprint, Channel, Federation, KnowledgeGraph, Role, RoleBinding, Swarm,
};
use crate::services::retry::RetryPolicy;

pub async fn handle_serve(ctx: Arc<ControllerContext>) -> Result<()> {
    let shutdown = CancellationToken::new();
    let mut workers = JoinSet::new();

    let reconcilers: Vec<Arc<dyn Reconciler>> = vec![
        Arc::new(CellReconciler::new(ctx.clone())),
        Arc::new(FormationReconciler::new(ctx.clone())),
        Arc::new(MissionReconciler::new(ctx.clone())),
        Arc::new(ExperimentReconciler::new(ctx.clone())),
        Arc::new(SimpleReconciler::<Channel>::new(ctx.clone())),
        Arc::new(SimpleReconciler::<Swarm>::new(ctx.clone())),
        Arc::new(SimpleReconciler::<Federation>::new(ctx.clone())),
        Arc::new(SimpleReconciler::<KnowledgeGraph>::new(ctx.clone())),
        Arc::new(SimpleReconciler::<Role>::new(ctx.clone())),
        Arc::new(SimpleReconciler::<RoleBinding>::new(ctx.clone())),
        Arc::new(SimpleReconciler::<Blueprint>::new(ctx.clone())),
    ];

    for reconciler in reconcilers {
        let kind = reconciler.kind();
        let worker = ControllerWorker::new(
            reconciler,
            ctx.store.clone(),
            RetryPolicy::from_config(&ctx.config.retry),
            ctx.config.reconcile_timeout(kind.as_str()),
            ctx.config.controllers.workers,
            std::time::Duration::from_secs(ctx.config.controllers.resync_interval_secs),
        );
        let shutdown = shutdown.clone();
        workers.spawn(async move {
            if let Err(err) = worker.run(shutdown).await {
                warn!(kind = %kind, error = %err, "controller exited with error");
            }
        });
    }

    info!("control plane running; press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received; draining reconcilers");
    shutdown.cancel();
    while workers.join_next().await.is_some() {}
    info!("all controllers drained");
    Ok(())
}
