// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Wiring of dispatcher, cache, queue, controller and leader election.

use crate::cache::{Index, ObjectCache};
use crate::controller::{Controller, ControllerConfig, Reconciler};
use crate::error::{ConvergeError, Result};
use crate::events::{EventRecorder, TracingRecorder};
use crate::leader::LeaderElector;
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::queue::WorkQueue;
use crate::store::ObjectStore;
use crate::types::{ObjectKey, ObjectRef, Resource, ResourceKind};
use crate::watch::{CacheSync, Dispatcher, MapFn, Predicate, ReferenceFn, SecondaryWatch, Trigger};
use std::sync::Arc;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

pub struct ControllerBuilder {
    store: Arc<dyn ObjectStore>,
    kind: ResourceKind,
    name: String,
    finalizer: Option<String>,
    predicate: Predicate,
    extractors: Vec<ReferenceFn>,
    secondaries: Vec<SecondaryWatch>,
    config: ControllerConfig,
    metrics: Arc<dyn MetricsSink>,
    recorder: Arc<dyn EventRecorder>,
    elector: Option<LeaderElector>,
}

impl ControllerBuilder {
    pub fn new(store: Arc<dyn ObjectStore>, kind: ResourceKind) -> Self {
        Self {
            store,
            name: kind.kind.to_lowercase(),
            kind,
            finalizer: None,
            predicate: Predicate::default_primary(),
            extractors: Vec::new(),
            secondaries: Vec::new(),
            config: ControllerConfig::default(),
            metrics: Arc::new(NoopMetrics),
            recorder: Arc::new(TracingRecorder),
            elector: None,
        }
    }

    /// Name used in logs and metric labels.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Guard deletion with `finalizer` and run cleanup before it is removed.
    pub fn finalizer(mut self, finalizer: impl Into<String>) -> Self {
        self.finalizer = Some(finalizer.into());
        self
    }

    /// Reconcile the owner whenever a child of `kind` changes.
    pub fn owns(mut self, kind: ResourceKind) -> Self {
        self.secondaries.push(SecondaryWatch::new(kind, Trigger::Owned));
        self
    }

    /// Reconcile the primaries `mapper` returns for each change of `kind`.
    pub fn watches<F>(mut self, kind: ResourceKind, mapper: F) -> Self
    where
        F: Fn(&Resource) -> Vec<ObjectKey> + Send + Sync + 'static,
    {
        let mapper: MapFn = Arc::new(mapper);
        self.secondaries
            .push(SecondaryWatch::new(kind, Trigger::Mapped(mapper)));
        self
    }

    /// Reconcile every primary whose `extractor` names the changed object of `kind`.
    pub fn indexed<F>(mut self, kind: ResourceKind, extractor: F) -> Self
    where
        F: Fn(&Resource) -> Vec<ObjectRef> + Send + Sync + 'static,
    {
        self.extractors.push(Arc::new(extractor));
        self.secondaries
            .push(SecondaryWatch::new(kind, Trigger::Indexed));
        self
    }

    /// Add a fully specified secondary watch.
    pub fn watch(mut self, secondary: SecondaryWatch) -> Self {
        self.secondaries.push(secondary);
        self
    }

    /// Replace the primary event filter.
    pub fn with_event_filter(mut self, predicate: Predicate) -> Self {
        self.predicate = predicate;
        self
    }

    pub fn config(mut self, config: ControllerConfig) -> Self {
        self.config = config;
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn recorder(mut self, recorder: Arc<dyn EventRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    /// Only run workers while `elector` holds the lease.
    pub fn leader_election(mut self, elector: LeaderElector) -> Self {
        self.elector = Some(elector);
        self
    }

    pub fn build(self, reconciler: Arc<dyn Reconciler>) -> Manager {
        let cache = ObjectCache::new();
        let queue = WorkQueue::with_backoff(self.config.backoff_base, self.config.backoff_max);

        let mut dispatcher = Dispatcher::new(
            self.store.clone(),
            cache.clone(),
            Index::new(),
            queue.clone(),
            self.kind.clone(),
        )
        .with_predicate(self.predicate)
        .with_reset(self.config.backoff_reset);
        if !self.extractors.is_empty() {
            let extractors = self.extractors;
            let references: ReferenceFn = Arc::new(move |object: &Resource| {
                extractors
                    .iter()
                    .flat_map(|extract| extract(object))
                    .collect::<Vec<ObjectRef>>()
            });
            dispatcher = dispatcher.with_references(references);
        }
        for secondary in self.secondaries {
            dispatcher = dispatcher.watch(secondary);
        }

        let mut controller = Controller::new(
            self.name.clone(),
            self.kind,
            reconciler,
            self.store,
            cache.clone(),
            queue.clone(),
        )
        .with_config(self.config.clone())
        .with_recorder(self.recorder)
        .with_metrics(self.metrics);
        if let Some(finalizer) = self.finalizer {
            controller = controller.with_finalizer(finalizer);
        }

        Manager {
            name: self.name,
            sync: dispatcher.cache_sync(),
            dispatcher,
            controller,
            cache,
            queue,
            elector: self.elector,
            config: self.config,
        }
    }
}

fn joined(res: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    res.map_err(|e| ConvergeError::transient(format!("task failed: {}", e)))?
}

/// A built controller, ready to run.
pub struct Manager {
    name: String,
    dispatcher: Dispatcher,
    controller: Controller,
    cache: ObjectCache,
    queue: WorkQueue<ObjectKey>,
    sync: CacheSync,
    elector: Option<LeaderElector>,
    config: ControllerConfig,
}

impl Manager {
    pub fn cache(&self) -> ObjectCache {
        self.cache.clone()
    }

    pub fn queue(&self) -> WorkQueue<ObjectKey> {
        self.queue.clone()
    }

    /// Becomes synced once every watched kind delivered its initial listing.
    pub fn cache_sync(&self) -> CacheSync {
        self.sync.clone()
    }

    /// Run until `token` is cancelled or leadership is lost.
    ///
    /// Caches fill regardless of leadership; workers only start once the
    /// caches synced and, with leader election, once the lease is held.
    #[instrument(skip(self, token), fields(controller = %self.name))]
    pub async fn run(self, token: CancellationToken) -> Result<()> {
        let watch_token = token.child_token();
        let dispatcher = tokio::spawn(self.dispatcher.run(watch_token.clone()));

        let timeout = self.config.cache_sync_timeout;
        let synced = tokio::select! {
            synced = self.sync.wait(timeout) => synced,
            _ = token.cancelled() => true,
        };

        let result = if !synced {
            Err(ConvergeError::transient(format!(
                "caches of {} did not sync within {:?}",
                self.name, timeout
            )))
        } else if token.is_cancelled() {
            Ok(())
        } else {
            info!("Caches of {} synced", self.name);
            match self.elector {
                None => self.controller.run(token.child_token()).await,
                Some(elector) => lead(self.controller, elector, &token).await,
            }
        };

        watch_token.cancel();
        if let Err(e) = joined(dispatcher.await) {
            warn!("Dispatcher of {} failed: {}", self.name, e);
        }
        result
    }
}

/// Run `controller` while `elector` holds the lease. A lost lease aborts the
/// workers without a grace period and surfaces as [`ConvergeError::LeaseLost`].
async fn lead(controller: Controller, elector: LeaderElector, token: &CancellationToken) -> Result<()> {
    let mut leading = elector.subscribe();
    // Released only after the workers stopped
    let election_token = CancellationToken::new();
    let mut election = tokio::spawn(elector.run(election_token.clone()));

    let acquired = tokio::select! {
        res = leading.wait_for(|leading| *leading) => res.is_ok(),
        _ = token.cancelled() => false,
    };
    if !acquired {
        election_token.cancel();
        return joined(election.await);
    }

    info!("Leadership acquired, starting workers");
    let workers = token.child_token();
    let abort = CancellationToken::new();
    let pool = tokio::spawn(controller.run_with_abort(workers.clone(), abort.clone()));

    tokio::select! {
        res = &mut election => {
            // Another holder may take over any moment now
            abort.cancel();
            workers.cancel();
            joined(pool.await)?;
            joined(res)
        }
        _ = token.cancelled() => {
            joined(pool.await)?;
            election_token.cancel();
            joined(election.await)
        }
    }
}
