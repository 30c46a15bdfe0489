//! Simple resource lifecycles.
//!
//! Channel, Swarm, Federation, KnowledgeGraph, Role, RoleBinding and
//! Blueprint share one reconciliation shape: admission-validate, then mark
//! Running with an event. One generic reconciler covers them all.

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::domain::errors::ControlResult;
use crate::domain::models::collective::{SimplePhase, SimpleStatus};
use crate::domain::models::meta::ResourceKind;
use crate::domain::models::CustomResource;
use crate::domain::ports::event_recorder::{EventKind, ObjectRef};
use crate::domain::ports::resource_store::{get_typed, update_status_typed};

use super::worker::Reconciler;
use super::ControllerContext;

pub struct SimpleReconciler<T> {
    ctx: Arc<ControllerContext>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> SimpleReconciler<T>
where
    T: CustomResource<Status = SimpleStatus>,
{
    pub fn new(ctx: Arc<ControllerContext>) -> Self {
        Self { ctx, _marker: PhantomData }
    }

    async fn write_if_changed(&self, resource: &T, status: SimpleStatus) -> ControlResult<()> {
        if resource.status() == Some(&status) {
            return Ok(());
        }
        let phase = status.phase;
        update_status_typed(self.ctx.store.as_ref(), resource, &status).await?;
        self.ctx
            .events
            .emit(
                ObjectRef::new(T::KIND, resource.meta()),
                if phase == SimplePhase::Failed { EventKind::Warning } else { EventKind::Normal },
                &format!("{}{}", T::KIND, phase.as_str()),
                &format!("{} entered {}", T::KIND, phase.as_str()),
            )
            .await
    }
}

#[async_trait]
impl<T> Reconciler for SimpleReconciler<T>
where
    T: CustomResource<Status = SimpleStatus>,
{
    fn kind(&self) -> ResourceKind {
        T::KIND
    }

    async fn reconcile(
        &self,
        namespace: &str,
        name: &str,
        _cancel: &CancellationToken,
    ) -> ControlResult<()> {
        let Some(resource) = get_typed::<T>(self.ctx.store.as_ref(), namespace, name).await?
        else {
            return Ok(());
        };

        let status = match resource.validate() {
            Ok(()) => SimpleStatus { phase: SimplePhase::Running, message: None },
            Err(reason) => SimpleStatus { phase: SimplePhase::Failed, message: Some(reason) },
        };
        self.write_if_changed(&resource, status).await
    }
}
