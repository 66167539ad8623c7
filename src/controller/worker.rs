// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

use super::{Action, Context, ControllerConfig, Lifecycle, Reconciler};
use crate::cache::ObjectCache;
use crate::error::{ConvergeError, Result};
use crate::events::{reasons, EventRecorder, EventType, TracingRecorder};
use crate::metrics::{MetricsSink, NoopMetrics};
use crate::queue::{BackoffReset, WorkQueue};
use crate::status::{retry_on_conflict, StatusWriter};
use crate::store::ObjectStore;
use crate::types::{ObjectKey, Resource, ResourceKind};
use futures::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// Fixed-size pool of workers draining the work queue.
///
/// The queue hands an identity to at most one worker at a time, so a
/// reconcile or cleanup for one object never overlaps with another.
pub struct Controller {
    name: String,
    kind: ResourceKind,
    finalizer: Option<String>,
    reconciler: Arc<dyn Reconciler>,
    store: Arc<dyn ObjectStore>,
    cache: ObjectCache,
    queue: WorkQueue<ObjectKey>,
    status: StatusWriter,
    recorder: Arc<dyn EventRecorder>,
    metrics: Arc<dyn MetricsSink>,
    config: ControllerConfig,
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic payload".to_string())
}

impl Controller {
    pub fn new(
        name: impl Into<String>,
        kind: ResourceKind,
        reconciler: Arc<dyn Reconciler>,
        store: Arc<dyn ObjectStore>,
        cache: ObjectCache,
        queue: WorkQueue<ObjectKey>,
    ) -> Self {
        let config = ControllerConfig::default();
        Self {
            name: name.into(),
            kind,
            finalizer: None,
            reconciler,
            status: Self::status_writer(&store, &config),
            store,
            cache,
            queue,
            recorder: Arc::new(TracingRecorder),
            metrics: Arc::new(NoopMetrics),
            config,
        }
    }

    fn status_writer(store: &Arc<dyn ObjectStore>, config: &ControllerConfig) -> StatusWriter {
        StatusWriter::new(store.clone())
            .with_mode(config.status_mode)
            .with_retries(config.conflict_retries, config.conflict_delay)
    }

    pub fn with_finalizer(mut self, finalizer: impl Into<String>) -> Self {
        self.finalizer = Some(finalizer.into());
        self
    }

    pub fn with_config(mut self, config: ControllerConfig) -> Self {
        self.status = Self::status_writer(&self.store, &config);
        self.config = config;
        self
    }

    pub fn with_recorder(mut self, recorder: Arc<dyn EventRecorder>) -> Self {
        self.recorder = recorder;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        let sink = metrics.clone();
        let name = self.name.clone();
        self.queue.on_depth(move |depth| sink.queue_depth(&name, depth));
        self.metrics = metrics;
        self
    }

    fn context(&self, token: CancellationToken) -> Context {
        Context {
            store: self.store.clone(),
            cache: self.cache.clone(),
            status: self.status.clone(),
            recorder: self.recorder.clone(),
            token,
        }
    }

    /// Run the worker pool until `token` is cancelled, then give in-flight
    /// work the configured grace period before aborting it.
    pub async fn run(self, token: CancellationToken) -> Result<()> {
        self.run_with_abort(token, CancellationToken::new()).await
    }

    /// Like [`Controller::run`], but cancelling `abort` cuts the grace period
    /// short. Once this returns no reconcile is running anymore.
    pub async fn run_with_abort(self, token: CancellationToken, abort: CancellationToken) -> Result<()> {
        let ctx = Arc::new(self.context(token.clone()));
        let workers = self.config.workers.max(1);
        let grace = self.config.shutdown_grace;
        let this = Arc::new(self);

        let mut pool = JoinSet::new();
        for id in 0..workers {
            pool.spawn(this.clone().work(id, ctx.clone(), token.clone()));
        }
        info!("Controller {} started {} workers", this.name, workers);

        token.cancelled().await;
        this.queue.shut_down();

        let drain = tokio::time::timeout(grace, async {
            while let Some(res) = pool.join_next().await {
                if let Err(e) = res {
                    warn!("Worker ended abnormally: {}", e);
                }
            }
        });
        let drained = tokio::select! {
            biased;
            _ = abort.cancelled() => {
                warn!("Controller {} aborting in-flight work", this.name);
                false
            }
            drained = drain => match drained {
                Ok(()) => true,
                Err(_) => {
                    warn!("Controller {} workers did not stop within {:?}, aborting", this.name, grace);
                    false
                }
            },
        };
        if !drained {
            pool.abort_all();
            while pool.join_next().await.is_some() {}
        }
        info!("Controller {} stopped", this.name);
        Ok(())
    }

    async fn work(self: Arc<Self>, id: usize, ctx: Arc<Context>, token: CancellationToken) {
        debug!("Worker {} of {} started", id, self.name);
        loop {
            let key = tokio::select! {
                biased;
                _ = token.cancelled() => break,
                key = self.queue.get() => match key {
                    Some(key) => key,
                    None => break,
                },
            };
            self.handle(&ctx, key).await;
        }
        debug!("Worker {} of {} stopped", id, self.name);
    }

    /// One pass for `key`: run it, turn the outcome into queue state and
    /// release the in-flight mark.
    #[instrument(skip(self, ctx), fields(controller = %self.name, key = %key))]
    async fn handle(&self, ctx: &Context, key: ObjectKey) {
        let started = Instant::now();
        self.metrics.reconcile_attempt(&self.name);

        let result = match AssertUnwindSafe(self.process(ctx, &key)).catch_unwind().await {
            Ok(result) => result,
            Err(panic) => {
                let message = panic_message(&*panic);
                error!("Reconcile of {} panicked: {}", key, message);
                Err(ConvergeError::Panicked {
                    key: key.clone(),
                    message,
                })
            }
        };
        // Only the object itself vanishing counts as success
        let result = match result {
            Err(e) if e.is_not_found() => {
                if self.is_gone(&key).await {
                    debug!("{} disappeared during reconcile", key);
                    self.queue.forget(&key);
                    Ok(Action::await_change())
                } else {
                    Err(e)
                }
            }
            other => other,
        };
        let elapsed = started.elapsed();

        match result {
            Ok(action) => {
                self.metrics.reconcile_success(&self.name, elapsed);
                self.succeeded(&key, action);
            }
            Err(e) => {
                self.metrics.reconcile_failure(&self.name, e.class(), elapsed);
                let delay = self.queue.add_rate_limited(key.clone());
                warn!(
                    "Reconcile of {} failed ({}): {}, retry {} in {:?}",
                    key,
                    e.class().as_str(),
                    e,
                    self.queue.retries(&key),
                    delay
                );
            }
        }
        self.queue.done(&key);
    }

    fn succeeded(&self, key: &ObjectKey, action: Action) {
        if self.config.backoff_reset != BackoffReset::Never {
            self.queue.forget(key);
        }
        if let Some(after) = action.requeue_after() {
            debug!("Requeueing {} in {:?}", key, after);
            self.queue.add_after(key.clone(), after);
        }
    }

    async fn is_gone(&self, key: &ObjectKey) -> bool {
        matches!(self.store.get(&self.kind, key).await, Err(e) if e.is_not_found())
    }

    async fn process(&self, ctx: &Context, key: &ObjectKey) -> Result<Action> {
        let Some(cached) = self.cache.get(&self.kind, key) else {
            debug!("{} {} is no longer cached", self.kind, key);
            // Deleted: whatever backoff the key built up goes with it
            self.queue.forget(key);
            return Ok(Action::await_change());
        };
        let finalizer = self.finalizer.as_deref();

        let (state, object) = match (Lifecycle::of(&cached, finalizer), finalizer) {
            (Lifecycle::Pending, Some(finalizer)) => {
                let persisted = self.add_finalizer(&cached, finalizer).await?;
                (Lifecycle::of(&persisted, Some(finalizer)), Arc::new(persisted))
            }
            (state, _) => (state, cached),
        };

        match state {
            Lifecycle::Live => self.reconcile(ctx, object).await,
            Lifecycle::Terminating => self.terminate(ctx, object).await,
            Lifecycle::Pending | Lifecycle::Released => {
                debug!("Nothing to do for {} ({:?})", key, state);
                Ok(Action::await_change())
            }
        }
    }

    async fn reconcile(&self, ctx: &Context, object: Arc<Resource>) -> Result<Action> {
        debug!("Reconciling {} at generation {}", object.key, object.generation);
        let result = self.reconciler.reconcile(object.clone(), ctx).await;
        if let Err(e) = &result {
            self.recorder
                .record(&object, EventType::Warning, reasons::RECONCILE_FAILED, &e.to_string());
        }
        result
    }

    async fn terminate(&self, ctx: &Context, object: Arc<Resource>) -> Result<Action> {
        let Some(finalizer) = self.finalizer.as_deref() else {
            return Ok(Action::await_change());
        };
        info!("Running cleanup for {}", object.key);
        if let Err(e) = self.reconciler.cleanup(object.clone(), ctx).await {
            self.recorder
                .record(&object, EventType::Warning, reasons::CLEANUP_FAILED, &e.to_string());
            return Err(e);
        }

        match self.remove_finalizer(&object, finalizer).await {
            Ok(_) => {}
            Err(e) if e.is_not_found() => {}
            Err(e) => return Err(e),
        }
        self.recorder.record(
            &object,
            EventType::Normal,
            reasons::FINALIZER_REMOVED,
            &format!("Removed finalizer {}", finalizer),
        );
        Ok(Action::await_change())
    }

    /// Persist `finalizer` on the object, starting from the cached snapshot
    /// and re-reading on conflict.
    async fn add_finalizer(&self, cached: &Resource, finalizer: &str) -> Result<Resource> {
        let mut snapshot = Some(cached.clone());
        let persisted = retry_on_conflict(self.config.conflict_retries, self.config.conflict_delay, || {
            self.try_add_finalizer(snapshot.take(), &cached.key, finalizer)
        })
        .await?;

        if persisted.has_finalizer(finalizer) {
            debug!("Added finalizer {} to {}", finalizer, persisted.key);
            self.recorder.record(
                &persisted,
                EventType::Normal,
                reasons::FINALIZER_ADDED,
                &format!("Added finalizer {}", finalizer),
            );
        }
        Ok(persisted)
    }

    async fn try_add_finalizer(
        &self,
        snapshot: Option<Resource>,
        key: &ObjectKey,
        finalizer: &str,
    ) -> Result<Resource> {
        let mut current = match snapshot {
            Some(snapshot) => snapshot,
            None => self.store.get(&self.kind, key).await?,
        };
        // Terminating objects accept no new finalizers
        if current.is_deleting() || !current.add_finalizer(finalizer) {
            return Ok(current);
        }
        self.store.update(&current).await
    }

    async fn remove_finalizer(&self, object: &Resource, finalizer: &str) -> Result<Resource> {
        let mut snapshot = Some(object.clone());
        retry_on_conflict(self.config.conflict_retries, self.config.conflict_delay, || {
            self.try_remove_finalizer(snapshot.take(), &object.key, finalizer)
        })
        .await
    }

    async fn try_remove_finalizer(
        &self,
        snapshot: Option<Resource>,
        key: &ObjectKey,
        finalizer: &str,
    ) -> Result<Resource> {
        let mut current = match snapshot {
            Some(snapshot) => snapshot,
            None => self.store.get(&self.kind, key).await?,
        };
        if !current.remove_finalizer(finalizer) {
            return Ok(current);
        }
        self.store.update(&current).await
    }
}
