// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Status-only writes with optimistic concurrency.

use super::retry::retry_on_conflict;
use crate::constants::conflict;
use crate::error::Result;
use crate::store::ObjectStore;
use crate::types::{self, Condition, ObjectKey, Resource, ResourceKind, Status};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, trace};

/// How a status change is submitted.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum WriteMode {
    /// Replace the status, guarded by the record's resource version.
    #[default]
    Update,
    /// Send a JSON patch computed against the snapshot. The patch starts
    /// with a `test` on the snapshot's resource version, so it is rejected as
    /// a conflict once the record has moved on.
    Patch,
}

/// Applies status mutations and resolves version conflicts by re-reading the
/// record and re-applying the mutation, never by resubmitting stale values.
#[derive(Clone)]
pub struct StatusWriter {
    store: Arc<dyn ObjectStore>,
    mode: WriteMode,
    retries: u32,
    delay: Duration,
}

impl StatusWriter {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            mode: WriteMode::default(),
            retries: conflict::RETRIES,
            delay: Duration::from_millis(conflict::RETRY_DELAY_MS),
        }
    }

    pub fn with_mode(mut self, mode: WriteMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_retries(mut self, retries: u32, delay: Duration) -> Self {
        self.retries = retries;
        self.delay = delay;
        self
    }

    /// Fetch the latest record and apply `mutate` to its status.
    pub async fn update<F>(&self, kind: &ResourceKind, key: &ObjectKey, mutate: F) -> Result<Resource>
    where
        F: Fn(&mut Status) + Send + Sync,
    {
        let mutate = &mutate;
        retry_on_conflict(self.retries, self.delay, || self.attempt(kind, key, None, mutate)).await
    }

    /// Apply `mutate` on top of `base`, the snapshot the caller worked from.
    /// Conflicting attempts fall back to fresh reads.
    #[instrument(skip(self, base, mutate), fields(key = %base.key))]
    pub async fn update_from<F>(&self, base: &Resource, mutate: F) -> Result<Resource>
    where
        F: Fn(&mut Status) + Send + Sync,
    {
        let mutate = &mutate;
        let mut snapshot = Some(base.clone());
        retry_on_conflict(self.retries, self.delay, || {
            self.attempt(&base.kind, &base.key, snapshot.take(), mutate)
        })
        .await
    }

    pub async fn set_condition(&self, object: &Resource, condition: Condition) -> Result<Resource> {
        self.update_from(object, |status| {
            types::set_condition(&mut status.conditions, condition.clone());
        })
        .await
    }

    /// Record that the generation of `object` has been reconciled.
    pub async fn observe_generation(&self, object: &Resource) -> Result<Resource> {
        let generation = object.generation;
        self.update_from(object, |status| {
            status.observed_generation = Some(generation);
        })
        .await
    }

    async fn attempt<F>(
        &self,
        kind: &ResourceKind,
        key: &ObjectKey,
        base: Option<Resource>,
        mutate: &F,
    ) -> Result<Resource>
    where
        F: Fn(&mut Status) + Send + Sync,
    {
        let current = match base {
            Some(base) => base,
            None => self.store.get(kind, key).await?,
        };
        let mut desired = current.clone();
        mutate(&mut desired.status);
        if desired.status == current.status {
            trace!("Status of {} already up to date", key);
            return Ok(current);
        }

        debug!("Writing status of {} {} at version {}", kind, key, current.resource_version);
        match self.mode {
            WriteMode::Update => self.store.update_status(&desired).await,
            WriteMode::Patch => {
                let patch = status_patch(&current, &desired.status)?;
                self.store.patch_status(kind, key, &patch).await
            }
        }
    }
}

/// The JSON patch taking `base` to `desired`, guarded by the version `base`
/// was read at.
fn status_patch(base: &Resource, desired: &Status) -> Result<json_patch::Patch> {
    let before = json!({ "status": serde_json::to_value(&base.status)? });
    let after = json!({ "status": serde_json::to_value(desired)? });
    let json_patch::Patch(changes) = json_patch::diff(&before, &after);

    let guard: json_patch::PatchOperation = serde_json::from_value(json!({
        "op": "test",
        "path": "/metadata/resourceVersion",
        "value": base.resource_version,
    }))?;
    let mut operations = Vec::with_capacity(changes.len() + 1);
    operations.push(guard);
    operations.extend(changes);
    Ok(json_patch::Patch(operations))
}
