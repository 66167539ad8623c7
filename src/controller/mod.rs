// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Worker pool driving reconcile and cleanup functions.

pub mod action;
pub mod lifecycle;
pub mod worker;

pub use action::Action;
pub use lifecycle::Lifecycle;
pub use worker::Controller;

use crate::cache::ObjectCache;
use crate::constants::{backoff, conflict, lifecycle as defaults};
use crate::error::Result;
use crate::events::EventRecorder;
use crate::queue::BackoffReset;
use crate::status::{StatusWriter, WriteMode};
use crate::store::ObjectStore;
use crate::types::Resource;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// User logic driven by the controller.
///
/// Both functions must be idempotent: they can run again for the same
/// record, after a crash or a failed write.
#[async_trait]
pub trait Reconciler: Send + Sync + 'static {
    async fn reconcile(&self, object: Arc<Resource>, ctx: &Context) -> Result<Action>;

    /// Runs while the object is terminating and our finalizer is present.
    async fn cleanup(&self, _object: Arc<Resource>, _ctx: &Context) -> Result<()> {
        Ok(())
    }
}

/// Collaborators handed to every reconcile and cleanup call.
pub struct Context {
    pub store: Arc<dyn ObjectStore>,
    pub cache: ObjectCache,
    pub status: StatusWriter,
    pub recorder: Arc<dyn EventRecorder>,
    /// Cancelled on shutdown or lost leadership; pass it into long calls.
    pub token: CancellationToken,
}

#[derive(Debug, Clone)]
pub struct ControllerConfig {
    pub workers: usize,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub backoff_reset: BackoffReset,
    pub conflict_retries: u32,
    pub conflict_delay: Duration,
    pub status_mode: WriteMode,
    pub shutdown_grace: Duration,
    pub cache_sync_timeout: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            workers: defaults::WORKERS,
            backoff_base: Duration::from_millis(backoff::BASE_DELAY_MS),
            backoff_max: Duration::from_secs(backoff::MAX_DELAY_SECS),
            backoff_reset: BackoffReset::default(),
            conflict_retries: conflict::RETRIES,
            conflict_delay: Duration::from_millis(conflict::RETRY_DELAY_MS),
            status_mode: WriteMode::default(),
            shutdown_grace: Duration::from_secs(defaults::SHUTDOWN_GRACE_SECS),
            cache_sync_timeout: Duration::from_secs(defaults::CACHE_SYNC_TIMEOUT_SECS),
        }
    }
}
