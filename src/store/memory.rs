// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! In-process store with API-server write semantics.

use super::ObjectStore;
use crate::error::{ConvergeError, Result};
use crate::types::{ObjectKey, Resource, ResourceKind, Status};
use crate::watch::WatchEvent;
use async_trait::async_trait;
use chrono::Utc;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::broadcast;
use tracing::debug;

const WATCH_BUFFER: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOp {
    Create,
    Update,
    UpdateStatus,
    PatchStatus,
    Delete,
}

/// One persisted mutation, kept for inspection.
#[derive(Debug, Clone, PartialEq)]
pub struct StoreWrite {
    pub op: WriteOp,
    pub kind: ResourceKind,
    pub key: ObjectKey,
    pub resource_version: String,
}

#[derive(Default)]
struct Inner {
    objects: HashMap<ResourceKind, BTreeMap<ObjectKey, Resource>>,
    watchers: HashMap<ResourceKind, broadcast::Sender<WatchEvent>>,
    last_version: u64,
    last_uid: u64,
    writes: Vec<StoreWrite>,
}

impl Inner {
    fn next_version(&mut self) -> String {
        self.last_version += 1;
        self.last_version.to_string()
    }

    fn current(&self, kind: &ResourceKind, key: &ObjectKey) -> Result<&Resource> {
        self.objects
            .get(kind)
            .and_then(|objects| objects.get(key))
            .ok_or_else(|| ConvergeError::NotFound {
                kind: kind.to_string(),
                key: key.clone(),
            })
    }

    fn check_version(&self, object: &Resource) -> Result<Resource> {
        let current = self.current(&object.kind, &object.key)?;
        if current.resource_version != object.resource_version {
            return Err(ConvergeError::conflict(
                &object.key,
                format!(
                    "resource version {} is stale, current is {}",
                    object.resource_version, current.resource_version
                ),
            ));
        }
        Ok(current.clone())
    }

    fn record(&mut self, op: WriteOp, object: &Resource) {
        self.writes.push(StoreWrite {
            op,
            kind: object.kind.clone(),
            key: object.key.clone(),
            resource_version: object.resource_version.clone(),
        });
    }

    fn emit(&self, event: WatchEvent) {
        let Some(kind) = event.object().map(|o| &o.kind) else {
            return;
        };
        if let Some(tx) = self.watchers.get(kind) {
            // No subscribers is fine
            let _ = tx.send(event);
        }
    }

    /// Persist `object` with a fresh version, or erase it when termination is complete.
    fn commit(&mut self, op: WriteOp, mut object: Resource) -> Resource {
        object.resource_version = self.next_version();
        self.record(op, &object);
        let objects = self.objects.entry(object.kind.clone()).or_default();
        if object.is_deleting() && object.finalizers.is_empty() {
            objects.remove(&object.key);
            debug!("Erased {} {}", object.kind, object.key);
            self.emit(WatchEvent::Deleted(object.clone()));
        } else {
            let existed = objects.insert(object.key.clone(), object.clone()).is_some();
            self.emit(if existed {
                WatchEvent::Modified(object.clone())
            } else {
                WatchEvent::Added(object.clone())
            });
        }
        object
    }
}

/// Authoritative in-memory store.
///
/// Mirrors the API server rules the engine depends on: versions change on
/// every write, `generation` moves on spec changes and on deletion requests,
/// deletion of an object with finalizers only sets `deletion_timestamp`, and
/// the record is erased once its finalizers are gone.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Inner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// All writes persisted so far, in order.
    pub fn writes(&self) -> Vec<StoreWrite> {
        self.lock().writes.clone()
    }

    pub fn writes_for(&self, key: &ObjectKey) -> Vec<StoreWrite> {
        self.lock()
            .writes
            .iter()
            .filter(|w| &w.key == key)
            .cloned()
            .collect()
    }

    pub fn contains(&self, kind: &ResourceKind, key: &ObjectKey) -> bool {
        self.lock().current(kind, key).is_ok()
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, kind: &ResourceKind, key: &ObjectKey) -> Result<Resource> {
        self.lock().current(kind, key).cloned()
    }

    async fn list(&self, kind: &ResourceKind) -> Result<Vec<Resource>> {
        Ok(self
            .lock()
            .objects
            .get(kind)
            .map(|objects| objects.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn create(&self, mut object: Resource) -> Result<Resource> {
        let mut inner = self.lock();
        if inner.current(&object.kind, &object.key).is_ok() {
            return Err(ConvergeError::AlreadyExists {
                kind: object.kind.to_string(),
                key: object.key.clone(),
            });
        }
        inner.last_uid += 1;
        object.uid = format!("uid-{}", inner.last_uid);
        object.generation = 1;
        object.deletion_timestamp = None;
        object.status = Status::default();
        Ok(inner.commit(WriteOp::Create, object))
    }

    async fn update(&self, object: &Resource) -> Result<Resource> {
        let mut inner = self.lock();
        let current = inner.check_version(object)?;

        if current.is_deleting() && object.finalizers.iter().any(|f| !current.has_finalizer(f)) {
            return Err(ConvergeError::permanent(format!(
                "no new finalizers can be added to {} while it is being deleted",
                object.key
            )));
        }

        let mut next = current.clone();
        next.finalizers = object.finalizers.clone();
        next.owner_references = object.owner_references.clone();
        next.labels = object.labels.clone();
        next.annotations = object.annotations.clone();
        if next.spec != object.spec || next.extra != object.extra {
            next.spec = object.spec.clone();
            next.extra = object.extra.clone();
            next.generation += 1;
        }
        if next == current {
            return Ok(current);
        }
        Ok(inner.commit(WriteOp::Update, next))
    }

    async fn update_status(&self, object: &Resource) -> Result<Resource> {
        let mut inner = self.lock();
        let current = inner.check_version(object)?;
        if current.status == object.status {
            return Ok(current);
        }
        let mut next = current;
        next.status = object.status.clone();
        Ok(inner.commit(WriteOp::UpdateStatus, next))
    }

    async fn patch_status(
        &self,
        kind: &ResourceKind,
        key: &ObjectKey,
        patch: &json_patch::Patch,
    ) -> Result<Resource> {
        let mut inner = self.lock();
        let current = inner.current(kind, key)?.clone();
        let mut document = serde_json::json!({
            "metadata": { "resourceVersion": current.resource_version },
            "status": serde_json::to_value(&current.status)?,
        });
        // A failed `test` op surfaces as a conflict
        json_patch::patch(&mut document, patch)?;
        let status: Status = serde_json::from_value(document["status"].take())?;
        if status == current.status {
            return Ok(current);
        }
        let mut next = current;
        next.status = status;
        Ok(inner.commit(WriteOp::PatchStatus, next))
    }

    async fn delete(&self, kind: &ResourceKind, key: &ObjectKey) -> Result<()> {
        let mut inner = self.lock();
        let mut next = inner.current(kind, key)?.clone();
        if next.is_deleting() {
            return Ok(());
        }
        next.deletion_timestamp = Some(Utc::now());
        if !next.finalizers.is_empty() {
            next.generation += 1;
        }
        inner.commit(WriteOp::Delete, next);
        Ok(())
    }

    fn watch(&self, kind: &ResourceKind) -> BoxStream<'static, Result<WatchEvent>> {
        let mut inner = self.lock();
        let rx = inner
            .watchers
            .entry(kind.clone())
            .or_insert_with(|| broadcast::channel(WATCH_BUFFER).0)
            .subscribe();
        let snapshot: Vec<Result<WatchEvent>> = inner
            .objects
            .get(kind)
            .map(|objects| {
                objects
                    .values()
                    .cloned()
                    .map(|o| Ok(WatchEvent::Added(o)))
                    .collect()
            })
            .unwrap_or_default();
        drop(inner);

        let live = stream::unfold(rx, |mut rx| async move {
            match rx.recv().await {
                Ok(event) => Some((Ok(event), rx)),
                Err(broadcast::error::RecvError::Lagged(missed)) => Some((
                    Err(ConvergeError::transient(format!(
                        "watch fell behind by {} events",
                        missed
                    ))),
                    rx,
                )),
                Err(broadcast::error::RecvError::Closed) => None,
            }
        });

        stream::iter(snapshot)
            .chain(stream::once(async { Ok(WatchEvent::Synced) }))
            .chain(live)
            .boxed()
    }
}
