// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! The authoritative backing store the engine reads from and writes to.

pub mod memory;

pub use memory::MemoryStore;

use crate::error::Result;
use crate::types::{ObjectKey, Resource, ResourceKind};
use crate::watch::WatchEvent;
use async_trait::async_trait;
use futures::stream::BoxStream;

/// Remote source of truth for resource records.
///
/// Every write is guarded by optimistic concurrency: the record's
/// `resource_version` must match the stored one or the call fails with a
/// conflict. Nothing is ever locked pessimistically.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    async fn get(&self, kind: &ResourceKind, key: &ObjectKey) -> Result<Resource>;

    async fn list(&self, kind: &ResourceKind) -> Result<Vec<Resource>>;

    async fn create(&self, object: Resource) -> Result<Resource>;

    /// Persist metadata (finalizers, owners, labels, annotations) and spec.
    /// Status in `object` is ignored.
    async fn update(&self, object: &Resource) -> Result<Resource>;

    /// Persist status only. Metadata and spec in `object` are ignored.
    async fn update_status(&self, object: &Resource) -> Result<Resource>;

    /// Apply an RFC 6902 patch whose paths are rooted at `/status`.
    async fn patch_status(
        &self,
        kind: &ResourceKind,
        key: &ObjectKey,
        patch: &json_patch::Patch,
    ) -> Result<Resource>;

    /// Request deletion. Objects with finalizers only get a deletion timestamp.
    async fn delete(&self, kind: &ResourceKind, key: &ObjectKey) -> Result<()>;

    /// List-then-watch stream: one `Added` per existing object, a `Synced`
    /// marker, then live changes in persistence order.
    fn watch(&self, kind: &ResourceKind) -> BoxStream<'static, Result<WatchEvent>>;
}
