// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Local mirror of the watched collections.

use crate::types::{ObjectKey, Resource, ResourceKind};
use crate::watch::WatchEvent;
use std::collections::HashMap;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

type Objects = HashMap<ObjectKey, Arc<Resource>>;

/// Eventually-consistent, read-only-to-workers cache of resource records.
///
/// Reads never reach the backing store. Only the watch dispatcher applies
/// events, which keeps a single writer per kind.
#[derive(Clone, Default)]
pub struct ObjectCache {
    kinds: Arc<RwLock<HashMap<ResourceKind, Objects>>>,
}

impl ObjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<ResourceKind, Objects>> {
        self.kinds.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<ResourceKind, Objects>> {
        self.kinds.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn get(&self, kind: &ResourceKind, key: &ObjectKey) -> Option<Arc<Resource>> {
        self.read().get(kind).and_then(|objects| objects.get(key).cloned())
    }

    pub fn list<F>(&self, kind: &ResourceKind, predicate: F) -> Vec<Arc<Resource>>
    where
        F: Fn(&Resource) -> bool,
    {
        self.read()
            .get(kind)
            .map(|objects| {
                objects
                    .values()
                    .filter(|o| predicate(o))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn len(&self, kind: &ResourceKind) -> usize {
        self.read().get(kind).map_or(0, |objects| objects.len())
    }

    pub fn is_empty(&self, kind: &ResourceKind) -> bool {
        self.len(kind) == 0
    }

    /// Apply one watch event, returning the record it replaced.
    pub(crate) fn apply(&self, event: &WatchEvent) -> Option<Arc<Resource>> {
        let mut kinds = self.write();
        match event {
            WatchEvent::Added(o) | WatchEvent::Modified(o) => kinds
                .entry(o.kind.clone())
                .or_default()
                .insert(o.key.clone(), Arc::new(o.clone())),
            WatchEvent::Deleted(o) => kinds.get_mut(&o.kind).and_then(|objects| objects.remove(&o.key)),
            WatchEvent::Synced => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn make_widget(name: &str, version: &str) -> Resource {
        let mut r = Resource::new(
            ResourceKind::new("example.com", "v1", "Widget"),
            ObjectKey::new("default", name),
            json!({}),
        );
        r.resource_version = version.to_string();
        r
    }

    #[test]
    fn test_apply_keeps_latest_record() {
        let cache = ObjectCache::new();
        let kind = ResourceKind::new("example.com", "v1", "Widget");

        assert!(cache.apply(&WatchEvent::Added(make_widget("a", "1"))).is_none());
        let old = cache.apply(&WatchEvent::Modified(make_widget("a", "2")));

        assert_eq!(old.unwrap().resource_version, "1");
        let current = cache.get(&kind, &ObjectKey::new("default", "a")).unwrap();
        assert_eq!(current.resource_version, "2");
    }

    #[test]
    fn test_delete_removes_record() {
        let cache = ObjectCache::new();
        let kind = ResourceKind::new("example.com", "v1", "Widget");
        cache.apply(&WatchEvent::Added(make_widget("a", "1")));

        cache.apply(&WatchEvent::Deleted(make_widget("a", "2")));

        assert!(cache.get(&kind, &ObjectKey::new("default", "a")).is_none());
        assert!(cache.is_empty(&kind));
    }

    #[test]
    fn test_list_filters() {
        let cache = ObjectCache::new();
        let kind = ResourceKind::new("example.com", "v1", "Widget");
        cache.apply(&WatchEvent::Added(make_widget("a", "1")));
        cache.apply(&WatchEvent::Added(make_widget("b", "2")));

        let only_b = cache.list(&kind, |o| o.key.name == "b");
        assert_eq!(only_b.len(), 1);
        assert_eq!(cache.list(&kind, |_| true).len(), 2);
    }
}
