//! Resource store port.
//!
//! Strongly-consistent CRUD over declarative resources keyed by
//! `(kind, namespace, name)`, with conditional updates on resource_version
//! and watch streams per kind.

use std::collections::BTreeMap;
use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use uuid::Uuid;

use crate::domain::errors::{ControlError, ControlResult};
use crate::domain::models::meta::{ObjectMeta, ResourceKind};
use crate::domain::models::CustomResource;

/// A resource in storage shape: metadata plus untyped spec/status JSON.
#[derive(Debug, Clone, PartialEq)]
pub struct RawResource {
    pub kind: ResourceKind,
    pub meta: ObjectMeta,
    pub spec: serde_json::Value,
    pub status: Option<serde_json::Value>,
}

impl RawResource {
    /// Convert a typed resource into storage shape.
    pub fn from_typed<T: CustomResource>(resource: &T) -> ControlResult<Self> {
        Ok(Self {
            kind: T::KIND,
            meta: resource.meta().clone(),
            spec: serde_json::to_value(resource.spec())?,
            status: resource.status().map(serde_json::to_value).transpose()?,
        })
    }

    /// Convert storage shape back into a typed resource.
    pub fn into_typed<T: CustomResource>(self) -> ControlResult<T> {
        if self.kind != T::KIND {
            return Err(ControlError::Validation(format!(
                "expected kind {}, found {}",
                T::KIND,
                self.kind
            )));
        }
        let spec: T::Spec = serde_json::from_value(self.spec)?;
        let status: Option<T::Status> = self.status.map(serde_json::from_value).transpose()?;
        Ok(T::from_parts(self.meta, spec, status))
    }
}

/// The three watch event flavours.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Added,
    Updated,
    Deleted,
}

/// One event on a kind's watch stream, delivered in resource_version order
/// per object.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub event: WatchEventKind,
    pub resource: RawResource,
}

pub type WatchStream = Pin<Box<dyn Stream<Item = WatchEvent> + Send>>;

/// Strongly-consistent resource persistence.
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Create a resource. Fails with `Validation` if the key already exists.
    async fn create(&self, resource: RawResource) -> ControlResult<RawResource>;

    async fn get(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
    ) -> ControlResult<Option<RawResource>>;

    async fn get_by_uid(&self, uid: Uuid) -> ControlResult<Option<RawResource>>;

    /// List resources of a kind, optionally restricted to a namespace and
    /// filtered by label selector.
    async fn list(
        &self,
        kind: ResourceKind,
        namespace: Option<&str>,
        selector: &BTreeMap<String, String>,
    ) -> ControlResult<Vec<RawResource>>;

    /// Replace spec (and labels) conditionally on the carried
    /// resource_version; bumps the version on success. Returns
    /// `ControlError::Conflict` when the version does not match.
    async fn update(&self, resource: RawResource) -> ControlResult<RawResource>;

    /// Replace only status, conditionally on `expected_version`.
    async fn update_status(
        &self,
        kind: ResourceKind,
        namespace: &str,
        name: &str,
        expected_version: u64,
        status: serde_json::Value,
    ) -> ControlResult<RawResource>;

    /// Delete a resource; children carrying an owner reference to its uid
    /// are deleted in cascade by the store.
    async fn delete(&self, kind: ResourceKind, namespace: &str, name: &str) -> ControlResult<()>;

    /// Stream of change events for one kind.
    async fn watch(&self, kind: ResourceKind) -> ControlResult<WatchStream>;
}

/// Typed convenience wrappers over the dynamic store.
pub async fn get_typed<T: CustomResource>(
    store: &dyn ResourceStore,
    namespace: &str,
    name: &str,
) -> ControlResult<Option<T>> {
    match store.get(T::KIND, namespace, name).await? {
        Some(raw) => Ok(Some(raw.into_typed()?)),
        None => Ok(None),
    }
}

pub async fn list_typed<T: CustomResource>(
    store: &dyn ResourceStore,
    namespace: Option<&str>,
    selector: &BTreeMap<String, String>,
) -> ControlResult<Vec<T>> {
    store
        .list(T::KIND, namespace, selector)
        .await?
        .into_iter()
        .map(RawResource::into_typed)
        .collect()
}

pub async fn create_typed<T: CustomResource>(
    store: &dyn ResourceStore,
    resource: &T,
) -> ControlResult<T> {
    store.create(RawResource::from_typed(resource)?).await?.into_typed()
}

pub async fn update_typed<T: CustomResource>(
    store: &dyn ResourceStore,
    resource: &T,
) -> ControlResult<T> {
    store.update(RawResource::from_typed(resource)?).await?.into_typed()
}

/// Conditional status write for a typed resource.
pub async fn update_status_typed<T: CustomResource>(
    store: &dyn ResourceStore,
    resource: &T,
    status: &T::Status,
) -> ControlResult<T> {
    let meta = resource.meta();
    store
        .update_status(
            T::KIND,
            &meta.namespace,
            &meta.name,
            meta.resource_version,
            serde_json::to_value(status)?,
        )
        .await?
        .into_typed()
}
