// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! [`ObjectStore`] backed by the Kubernetes API server.

use super::convert::{api_resource, to_dynamic, to_resource};
use crate::error::{ConvergeError, Result};
use crate::store::ObjectStore;
use crate::types::{ObjectKey, Resource, ResourceKind};
use crate::watch::WatchEvent;
use async_trait::async_trait;
use futures::stream::{BoxStream, StreamExt};
use kube::api::{
    Api, ApiResource, DeleteParams, DynamicObject, ListParams, Patch, PatchParams, PostParams,
};
use kube::runtime::watcher;
use kube::Client;
use std::collections::HashMap;
use tracing::{debug, instrument};

/// Reads and writes any group/version/kind through `DynamicObject`s.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    namespace: Option<String>,
    resources: HashMap<ResourceKind, ApiResource>,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            namespace: None,
            resources: HashMap::new(),
        }
    }

    /// Restrict list and watch calls to one namespace.
    pub fn within(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Use a discovered resource for `kind` instead of guessing its plural.
    pub fn with_resource(mut self, kind: ResourceKind, resource: ApiResource) -> Self {
        self.resources.insert(kind, resource);
        self
    }

    fn resource(&self, kind: &ResourceKind) -> ApiResource {
        self.resources
            .get(kind)
            .cloned()
            .unwrap_or_else(|| api_resource(kind))
    }

    /// API handle for a single object.
    fn object_api(&self, kind: &ResourceKind, key: &ObjectKey) -> Api<DynamicObject> {
        let ar = self.resource(kind);
        if key.is_namespaced() {
            Api::namespaced_with(self.client.clone(), &key.namespace, &ar)
        } else {
            Api::all_with(self.client.clone(), &ar)
        }
    }

    /// API handle for listing and watching.
    fn collection_api(&self, kind: &ResourceKind) -> Api<DynamicObject> {
        let ar = self.resource(kind);
        match &self.namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }
}

/// Map API errors onto the engine's error kinds.
fn api_error(kind: &ResourceKind, key: &ObjectKey, e: kube::Error) -> ConvergeError {
    match &e {
        kube::Error::Api(ae) if ae.code == 404 => ConvergeError::NotFound {
            kind: kind.to_string(),
            key: key.clone(),
        },
        kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
            ConvergeError::AlreadyExists {
                kind: kind.to_string(),
                key: key.clone(),
            }
        }
        kube::Error::Api(ae) if ae.code == 409 => ConvergeError::conflict(key, ae.message.clone()),
        _ => ConvergeError::KubeError(e),
    }
}

/// Translate one watcher event. A second initial listing on the same stream
/// means the watcher re-listed after losing its place; that surfaces as an
/// error so the consumer restarts with a fresh snapshot.
fn translate(
    kind: &ResourceKind,
    event: watcher::Event<DynamicObject>,
    listed: &mut bool,
) -> Option<Result<WatchEvent>> {
    match event {
        watcher::Event::Init if *listed => Some(Err(ConvergeError::transient(format!(
            "watch of {} re-listed",
            kind
        )))),
        watcher::Event::Init => None,
        watcher::Event::InitApply(o) => Some(to_resource(kind, o).map(WatchEvent::Added)),
        watcher::Event::InitDone => {
            *listed = true;
            Some(Ok(WatchEvent::Synced))
        }
        watcher::Event::Apply(o) => Some(to_resource(kind, o).map(WatchEvent::Modified)),
        watcher::Event::Delete(o) => Some(to_resource(kind, o).map(WatchEvent::Deleted)),
    }
}

#[async_trait]
impl ObjectStore for KubeStore {
    async fn get(&self, kind: &ResourceKind, key: &ObjectKey) -> Result<Resource> {
        let object = self
            .object_api(kind, key)
            .get(&key.name)
            .await
            .map_err(|e| api_error(kind, key, e))?;
        to_resource(kind, object)
    }

    async fn list(&self, kind: &ResourceKind) -> Result<Vec<Resource>> {
        let objects = self.collection_api(kind).list(&ListParams::default()).await?;
        objects
            .items
            .into_iter()
            .map(|o| to_resource(kind, o))
            .collect()
    }

    #[instrument(skip(self, object), fields(kind = %object.kind, key = %object.key))]
    async fn create(&self, object: Resource) -> Result<Resource> {
        let created = self
            .object_api(&object.kind, &object.key)
            .create(&PostParams::default(), &to_dynamic(&object)?)
            .await
            .map_err(|e| api_error(&object.kind, &object.key, e))?;
        debug!("Created {} {}", object.kind, object.key);
        to_resource(&object.kind, created)
    }

    #[instrument(skip(self, object), fields(kind = %object.kind, key = %object.key))]
    async fn update(&self, object: &Resource) -> Result<Resource> {
        let updated = self
            .object_api(&object.kind, &object.key)
            .replace(&object.key.name, &PostParams::default(), &to_dynamic(object)?)
            .await
            .map_err(|e| api_error(&object.kind, &object.key, e))?;
        to_resource(&object.kind, updated)
    }

    #[instrument(skip(self, object), fields(kind = %object.kind, key = %object.key))]
    async fn update_status(&self, object: &Resource) -> Result<Resource> {
        let body = serde_json::to_vec(&to_dynamic(object)?)?;
        let updated = self
            .object_api(&object.kind, &object.key)
            .replace_status(&object.key.name, &PostParams::default(), body)
            .await
            .map_err(|e| api_error(&object.kind, &object.key, e))?;
        to_resource(&object.kind, updated)
    }

    #[instrument(skip(self, patch), fields(kind = %kind, key = %key))]
    async fn patch_status(
        &self,
        kind: &ResourceKind,
        key: &ObjectKey,
        patch: &json_patch::Patch,
    ) -> Result<Resource> {
        let patched = self
            .object_api(kind, key)
            .patch_status(
                &key.name,
                &PatchParams::default(),
                &Patch::<()>::Json(patch.clone()),
            )
            .await
            .map_err(|e| match e {
                // A failed `test` operation comes back as Invalid.
                kube::Error::Api(ae) if ae.code == 422 => ConvergeError::conflict(key, ae.message),
                e => api_error(kind, key, e),
            })?;
        to_resource(kind, patched)
    }

    async fn delete(&self, kind: &ResourceKind, key: &ObjectKey) -> Result<()> {
        self.object_api(kind, key)
            .delete(&key.name, &DeleteParams::default())
            .await
            .map_err(|e| api_error(kind, key, e))?;
        Ok(())
    }

    fn watch(&self, kind: &ResourceKind) -> BoxStream<'static, Result<WatchEvent>> {
        let kind = kind.clone();
        let mut listed = false;
        watcher(self.collection_api(&kind), watcher::Config::default())
            .filter_map(move |event| {
                let translated = match event {
                    Ok(event) => translate(&kind, event, &mut listed),
                    Err(e) => Some(Err(ConvergeError::transient(format!(
                        "watch of {} failed: {}",
                        kind, e
                    )))),
                };
                futures::future::ready(translated)
            })
            .boxed()
    }
}
