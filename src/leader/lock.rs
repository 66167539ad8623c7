// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

use crate::error::Result;
use async_trait::async_trait;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;

/// A shared lease at most one holder can own at a time.
#[async_trait]
pub trait LeaseLock: Send + Sync + 'static {
    /// Take the lease if it is free or expired, or renew it if `identity`
    /// already holds it. Returns whether `identity` holds it afterwards.
    async fn try_acquire_or_renew(&self, identity: &str, duration: Duration) -> Result<bool>;

    /// Give the lease up if `identity` holds it.
    async fn release(&self, identity: &str) -> Result<()>;
}

#[derive(Debug, Clone)]
struct Holder {
    identity: String,
    renewed: Instant,
    duration: Duration,
}

/// Lease shared between electors of one process.
#[derive(Debug, Clone, Default)]
pub struct MemoryLease {
    holder: Arc<Mutex<Option<Holder>>>,
}

impl MemoryLease {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Holder>> {
        self.holder.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Current holder, if the lease has not expired.
    pub fn holder(&self) -> Option<String> {
        self.lock()
            .as_ref()
            .filter(|h| h.renewed + h.duration > Instant::now())
            .map(|h| h.identity.clone())
    }

    /// Hand the lease to `identity` regardless of the current holder.
    pub fn steal(&self, identity: &str, duration: Duration) {
        *self.lock() = Some(Holder {
            identity: identity.to_string(),
            renewed: Instant::now(),
            duration,
        });
    }
}

#[async_trait]
impl LeaseLock for MemoryLease {
    async fn try_acquire_or_renew(&self, identity: &str, duration: Duration) -> Result<bool> {
        let now = Instant::now();
        let mut holder = self.lock();
        let available = match holder.as_ref() {
            None => true,
            Some(h) => h.identity == identity || h.renewed + h.duration <= now,
        };
        if available {
            *holder = Some(Holder {
                identity: identity.to_string(),
                renewed: now,
                duration,
            });
        }
        Ok(available)
    }

    async fn release(&self, identity: &str) -> Result<()> {
        let mut holder = self.lock();
        if holder.as_ref().is_some_and(|h| h.identity == identity) {
            *holder = None;
        }
        Ok(())
    }
}
