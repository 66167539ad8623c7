// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! The resource record mirrored by caches and persisted by stores.

use super::condition::Condition;
use super::identity::{ObjectKey, ObjectRef, OwnerReference, ResourceKind};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Status sub-resource. Only the status writer mutates it.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_generation: Option<i64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub conditions: Vec<Condition>,
    /// Any further status fields owned by the reconciler.
    #[serde(flatten)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Resource {
    pub kind: ResourceKind,
    pub key: ObjectKey,
    #[serde(default)]
    pub uid: String,
    #[serde(default)]
    pub generation: i64,
    #[serde(default)]
    pub resource_version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_timestamp: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finalizers: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub owner_references: Vec<OwnerReference>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: BTreeMap<String, String>,
    #[serde(default)]
    pub spec: serde_json::Value,
    #[serde(default)]
    pub status: Status,
    /// Top-level fields outside metadata, spec and status, such as a
    /// ConfigMap's `data`.
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl Resource {
    /// A fresh, not yet persisted record.
    pub fn new(kind: ResourceKind, key: ObjectKey, spec: serde_json::Value) -> Self {
        Self {
            kind,
            key,
            uid: String::new(),
            generation: 0,
            resource_version: String::new(),
            deletion_timestamp: None,
            finalizers: Vec::new(),
            owner_references: Vec::new(),
            labels: BTreeMap::new(),
            annotations: BTreeMap::new(),
            spec,
            status: Status::default(),
            extra: serde_json::Map::new(),
        }
    }

    pub fn object_ref(&self) -> ObjectRef {
        ObjectRef::new(self.kind.clone(), self.key.clone())
    }

    pub fn is_deleting(&self) -> bool {
        self.deletion_timestamp.is_some()
    }

    pub fn has_finalizer(&self, finalizer: &str) -> bool {
        self.finalizers.iter().any(|f| f == finalizer)
    }

    /// Returns true if the finalizer was not yet present.
    pub fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            false
        } else {
            self.finalizers.push(finalizer.to_string());
            true
        }
    }

    /// Returns true if the finalizer was present.
    pub fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let len = self.finalizers.len();
        self.finalizers.retain(|f| f != finalizer);
        self.finalizers.len() != len
    }

    /// The last processed generation matches the desired one.
    pub fn is_converged(&self) -> bool {
        self.status.observed_generation == Some(self.generation)
    }

    /// Owner references pointing at objects of `kind`, resolved to their
    /// identities in this object's namespace.
    pub fn owners_of_kind<'a>(&'a self, kind: &'a ResourceKind) -> impl Iterator<Item = ObjectKey> + 'a {
        self.owner_references
            .iter()
            .filter(move |o| o.refers_to(kind))
            .map(|o| ObjectKey::new(self.key.namespace.clone(), o.name.clone()))
    }

    pub fn owner_reference(&self, controller: bool) -> OwnerReference {
        OwnerReference {
            api_version: self.kind.api_version(),
            kind: self.kind.kind.clone(),
            name: self.key.name.clone(),
            uid: self.uid.clone(),
            controller: controller.then_some(true),
        }
    }

    pub fn annotation(&self, key: &str) -> Option<&str> {
        self.annotations.get(key).map(|v| v.as_str())
    }
}
