// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Turns store change events into work queue entries.

use super::event::WatchEvent;
use super::predicate::Predicate;
use crate::cache::{Index, ObjectCache};
use crate::error::Result;
use crate::queue::{BackoffReset, WorkQueue};
use crate::store::ObjectStore;
use crate::types::{ObjectKey, ObjectRef, Resource, ResourceKind};
use futures::StreamExt;
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

const RESTART_INTERVAL_SECS: u64 = 1;
const RESTART_MAX_INTERVAL_SECS: u64 = 30;

/// Maps a secondary object to the primaries that must be reconciled.
pub type MapFn = Arc<dyn Fn(&Resource) -> Vec<ObjectKey> + Send + Sync>;

/// Extracts the secondary objects a primary references from its spec.
pub type ReferenceFn = Arc<dyn Fn(&Resource) -> Vec<ObjectRef> + Send + Sync>;

/// How events of a secondary kind find their primaries.
#[derive(Clone)]
pub enum Trigger {
    /// The secondary carries an owner reference to the primary.
    Owned,
    /// Primaries reference the secondary; resolved through the index.
    Indexed,
    /// A caller-supplied mapping function.
    Mapped(MapFn),
}

#[derive(Clone)]
pub struct SecondaryWatch {
    pub kind: ResourceKind,
    pub trigger: Trigger,
    pub predicate: Predicate,
}

impl SecondaryWatch {
    pub fn new(kind: ResourceKind, trigger: Trigger) -> Self {
        Self {
            kind,
            trigger,
            predicate: Predicate::resource_version_changed(),
        }
    }

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }
}

/// Tracks which watched kinds have delivered their initial listing.
#[derive(Clone)]
pub struct CacheSync {
    expected: usize,
    synced: watch::Sender<BTreeSet<ResourceKind>>,
}

impl CacheSync {
    fn new(expected: usize) -> Self {
        Self {
            expected,
            synced: watch::channel(BTreeSet::new()).0,
        }
    }

    fn mark(&self, kind: &ResourceKind) {
        self.synced.send_if_modified(|synced| synced.insert(kind.clone()));
    }

    pub fn is_synced(&self) -> bool {
        self.synced.borrow().len() >= self.expected
    }

    /// Wait until every kind has synced. Returns false on timeout.
    pub async fn wait(&self, timeout: Duration) -> bool {
        let mut rx = self.synced.subscribe();
        let expected = self.expected;
        tokio::time::timeout(timeout, rx.wait_for(|synced| synced.len() >= expected))
            .await
            .is_ok_and(|res| res.is_ok())
    }
}

/// Single producer feeding the cache, the index and the work queue.
///
/// Construct it with its collaborators and call [`Dispatcher::run`]; there
/// is no global registry of handlers.
pub struct Dispatcher {
    store: Arc<dyn ObjectStore>,
    cache: ObjectCache,
    index: Index,
    queue: WorkQueue<ObjectKey>,
    primary: ResourceKind,
    predicate: Predicate,
    references: Option<ReferenceFn>,
    secondaries: Vec<SecondaryWatch>,
    reset: BackoffReset,
    sync: CacheSync,
}

impl Dispatcher {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        cache: ObjectCache,
        index: Index,
        queue: WorkQueue<ObjectKey>,
        primary: ResourceKind,
    ) -> Self {
        Self {
            store,
            cache,
            index,
            queue,
            primary,
            predicate: Predicate::default_primary(),
            references: None,
            secondaries: Vec::new(),
            reset: BackoffReset::default(),
            sync: CacheSync::new(1),
        }
    }

    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn with_references(mut self, references: ReferenceFn) -> Self {
        self.references = Some(references);
        self
    }

    pub fn with_reset(mut self, reset: BackoffReset) -> Self {
        self.reset = reset;
        self
    }

    pub fn watch(mut self, secondary: SecondaryWatch) -> Self {
        self.secondaries.push(secondary);
        self.sync = CacheSync::new(1 + self.secondaries.len());
        self
    }

    pub fn cache_sync(&self) -> CacheSync {
        self.sync.clone()
    }

    /// Consume watch streams of every kind until `token` is cancelled.
    pub async fn run(self, token: CancellationToken) -> Result<()> {
        let this = Arc::new(self);
        let mut tasks = JoinSet::new();

        let mut kinds: Vec<ResourceKind> = vec![this.primary.clone()];
        kinds.extend(this.secondaries.iter().map(|s| s.kind.clone()));
        for kind in kinds {
            let this = this.clone();
            let token = token.clone();
            tasks.spawn(async move { this.watch_kind(kind, token).await });
        }

        while let Some(res) = tasks.join_next().await {
            if let Err(e) = res {
                warn!("Watch task ended abnormally: {}", e);
            }
        }
        info!("Dispatcher for {} stopped", this.primary);
        Ok(())
    }

    #[instrument(skip(self, token), fields(kind = %kind))]
    async fn watch_kind(&self, kind: ResourceKind, token: CancellationToken) {
        let mut interval = RESTART_INTERVAL_SECS;
        loop {
            match self.consume(&kind, &token).await {
                Ok(()) => return,
                Err(e) => {
                    warn!("Watch of {} failed: {}, restarting in {} seconds", kind, e, interval);
                }
            }
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(Duration::from_secs(interval)) => {}
            }
            interval = (interval * 2).min(RESTART_MAX_INTERVAL_SECS);
        }
    }

    /// Drive one watch stream. `Ok` means cancelled or the stream ended.
    async fn consume(&self, kind: &ResourceKind, token: &CancellationToken) -> Result<()> {
        let mut events = self.store.watch(kind);
        // Keys seen during the initial listing, to drop records deleted while disconnected
        let mut listed: Option<HashSet<ObjectKey>> = Some(HashSet::new());

        loop {
            let event = tokio::select! {
                _ = token.cancelled() => return Ok(()),
                event = events.next() => event,
            };
            let event = match event {
                Some(event) => event?,
                None => return Ok(()),
            };

            match (&event, listed.as_mut()) {
                (WatchEvent::Synced, Some(seen)) => {
                    let stale: Vec<Resource> = self
                        .cache
                        .list(kind, |o| !seen.contains(&o.key))
                        .into_iter()
                        .map(|o| (*o).clone())
                        .collect();
                    for gone in stale {
                        debug!("{} {} vanished while disconnected", kind, gone.key);
                        self.dispatch(kind, WatchEvent::Deleted(gone));
                    }
                    listed = None;
                    self.sync.mark(kind);
                    debug!("Initial listing of {} complete", kind);
                }
                (WatchEvent::Added(o), Some(seen)) => {
                    seen.insert(o.key.clone());
                    self.dispatch(kind, event);
                }
                _ => self.dispatch(kind, event),
            }
        }
    }

    fn dispatch(&self, kind: &ResourceKind, event: WatchEvent) {
        if kind == &self.primary {
            self.handle_primary(event);
        } else if let Some(secondary) = self.secondaries.iter().find(|s| &s.kind == kind) {
            self.handle_secondary(secondary, event);
        }
    }

    fn handle_primary(&self, event: WatchEvent) {
        let Some(key) = event.key().cloned() else {
            return;
        };
        let before = self.cache.apply(&event);
        let after = if event.is_delete() { None } else { event.object() };

        match after {
            Some(object) => self.index.update(&key, self.secondary_refs(object)),
            None => self.index.remove_primary(&key),
        }

        if self.reset == BackoffReset::OnSuccessOrChange
            && Predicate::generation_changed().matches(before.as_deref(), after)
        {
            self.queue.forget(&key);
        }

        if self.predicate.matches(before.as_deref(), after) {
            trace!("Enqueueing {} after {} event", key, event.type_name());
            self.queue.add(key);
        } else {
            trace!("Filtered {} event for {}", event.type_name(), key);
        }
    }

    fn handle_secondary(&self, secondary: &SecondaryWatch, event: WatchEvent) {
        let Some(object) = event.object() else {
            return;
        };
        let before = self.cache.apply(&event);
        let after = if event.is_delete() { None } else { Some(object) };
        if !secondary.predicate.matches(before.as_deref(), after) {
            return;
        }

        let mut keys: BTreeSet<ObjectKey> = BTreeSet::new();
        match &secondary.trigger {
            Trigger::Owned => {
                keys.extend(object.owners_of_kind(&self.primary));
                // An owner dropped from the references must hear about it too
                if let Some(before) = before.as_deref() {
                    keys.extend(before.owners_of_kind(&self.primary));
                }
            }
            Trigger::Indexed => keys.extend(self.index.lookup(&object.object_ref())),
            Trigger::Mapped(map) => keys.extend(map(object)),
        }

        for key in keys {
            trace!("{} {} triggers {}", secondary.kind, object.key, key);
            self.queue.add(key);
        }
    }

    fn secondary_refs(&self, object: &Resource) -> Vec<ObjectRef> {
        let mut refs: Vec<ObjectRef> = self
            .references
            .as_ref()
            .map(|extract| extract(object))
            .unwrap_or_default();
        refs.extend(object.owner_references.iter().map(|owner| {
            ObjectRef::new(
                owner.resource_kind(),
                ObjectKey::new(object.key.namespace.clone(), owner.name.clone()),
            )
        }));
        refs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use serde_json::json;

    fn make_primary_kind() -> ResourceKind {
        ResourceKind::new("example.com", "v1", "Widget")
    }

    fn make_config_kind() -> ResourceKind {
        ResourceKind::new("", "v1", "ConfigMap")
    }

    fn make_widget(name: &str, config: &str) -> Resource {
        Resource::new(
            make_primary_kind(),
            ObjectKey::new("default", name),
            json!({ "configMapName": config }),
        )
    }

    fn config_refs() -> ReferenceFn {
        Arc::new(|o: &Resource| {
            o.spec["configMapName"]
                .as_str()
                .map(|name| {
                    vec![ObjectRef::new(
                        make_config_kind(),
                        ObjectKey::new(o.key.namespace.clone(), name),
                    )]
                })
                .unwrap_or_default()
        })
    }

    struct Fixture {
        store: MemoryStore,
        cache: ObjectCache,
        queue: WorkQueue<ObjectKey>,
        token: CancellationToken,
        sync: CacheSync,
    }

    async fn start(secondary: SecondaryWatch) -> Fixture {
        let store = MemoryStore::new();
        let cache = ObjectCache::new();
        let queue = WorkQueue::with_backoff(Duration::from_millis(5), Duration::from_secs(1));
        let dispatcher = Dispatcher::new(
            Arc::new(store.clone()),
            cache.clone(),
            Index::new(),
            queue.clone(),
            make_primary_kind(),
        )
        .with_references(config_refs())
        .watch(secondary);
        let sync = dispatcher.cache_sync();
        let token = CancellationToken::new();
        tokio::spawn(dispatcher.run(token.clone()));
        assert!(sync.wait(Duration::from_secs(5)).await);
        Fixture {
            store,
            cache,
            queue,
            token,
            sync,
        }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    async fn drain(queue: &WorkQueue<ObjectKey>) -> Vec<ObjectKey> {
        let mut keys = Vec::new();
        while !queue.is_empty() {
            let key = queue.get().await.unwrap();
            queue.done(&key);
            keys.push(key);
        }
        keys
    }

    #[tokio::test]
    async fn test_primary_events_fill_cache_and_queue() {
        let f = start(SecondaryWatch::new(make_config_kind(), Trigger::Indexed)).await;
        assert!(f.sync.is_synced());

        f.store.create(make_widget("a", "cfg")).await.unwrap();
        settle().await;

        assert!(f
            .cache
            .get(&make_primary_kind(), &ObjectKey::new("default", "a"))
            .is_some());
        assert_eq!(drain(&f.queue).await, vec![ObjectKey::new("default", "a")]);
        f.token.cancel();
    }

    #[tokio::test]
    async fn test_status_writes_are_filtered_by_default() {
        let f = start(SecondaryWatch::new(make_config_kind(), Trigger::Indexed)).await;
        let created = f.store.create(make_widget("a", "cfg")).await.unwrap();
        settle().await;
        drain(&f.queue).await;

        let mut status = created.clone();
        status.status.observed_generation = Some(1);
        f.store.update_status(&status).await.unwrap();
        settle().await;

        assert!(f.queue.is_empty());
        f.token.cancel();
    }

    #[tokio::test]
    async fn test_indexed_secondary_enqueues_dependents() {
        let f = start(SecondaryWatch::new(make_config_kind(), Trigger::Indexed)).await;
        f.store.create(make_widget("a", "shared")).await.unwrap();
        f.store.create(make_widget("b", "shared")).await.unwrap();
        f.store.create(make_widget("c", "other")).await.unwrap();
        settle().await;
        drain(&f.queue).await;

        f.store
            .create(Resource::new(
                make_config_kind(),
                ObjectKey::new("default", "shared"),
                json!({"data": {}}),
            ))
            .await
            .unwrap();
        settle().await;

        assert_eq!(
            drain(&f.queue).await,
            vec![ObjectKey::new("default", "a"), ObjectKey::new("default", "b")]
        );
        f.token.cancel();
    }

    #[tokio::test]
    async fn test_owned_secondary_enqueues_owner() {
        let f = start(SecondaryWatch::new(make_config_kind(), Trigger::Owned)).await;
        let owner = f.store.create(make_widget("a", "cfg")).await.unwrap();
        settle().await;
        drain(&f.queue).await;

        let mut child = Resource::new(
            make_config_kind(),
            ObjectKey::new("default", "a-child"),
            json!({}),
        );
        child.owner_references.push(owner.owner_reference(true));
        f.store.create(child).await.unwrap();
        settle().await;

        assert_eq!(drain(&f.queue).await, vec![ObjectKey::new("default", "a")]);
        f.token.cancel();
    }

    #[tokio::test]
    async fn test_mapped_secondary_uses_mapping_function() {
        let map: MapFn = Arc::new(|o: &Resource| vec![ObjectKey::new("default", format!("{}-owner", o.key.name))]);
        let f = start(SecondaryWatch::new(make_config_kind(), Trigger::Mapped(map))).await;

        f.store
            .create(Resource::new(make_config_kind(), ObjectKey::new("default", "x"), json!({})))
            .await
            .unwrap();
        settle().await;

        assert_eq!(drain(&f.queue).await, vec![ObjectKey::new("default", "x-owner")]);
        f.token.cancel();
    }

    #[tokio::test]
    async fn test_delete_removes_from_cache_and_enqueues() {
        let f = start(SecondaryWatch::new(make_config_kind(), Trigger::Indexed)).await;
        f.store.create(make_widget("a", "cfg")).await.unwrap();
        settle().await;
        drain(&f.queue).await;

        f.store
            .delete(&make_primary_kind(), &ObjectKey::new("default", "a"))
            .await
            .unwrap();
        settle().await;

        assert!(f.cache.is_empty(&make_primary_kind()));
        assert_eq!(drain(&f.queue).await, vec![ObjectKey::new("default", "a")]);
        f.token.cancel();
    }
}
