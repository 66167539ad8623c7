// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Acquire-then-renew loop publishing leadership on a watch channel.

use super::lock::LeaseLock;
use crate::constants::lease;
use crate::error::{ConvergeError, Result};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

#[derive(Debug, Clone, Copy)]
pub struct LeaseTiming {
    /// How long a holder keeps the lease without renewing it.
    pub duration: Duration,
    /// How long the leader keeps leading without a successful renewal. Must
    /// be shorter than `duration`, so the leader steps down before anyone
    /// else can acquire the lease.
    pub renew_deadline: Duration,
    /// Pause between renewals while leading.
    pub renew_interval: Duration,
    /// Pause between acquisition attempts while following.
    pub retry_period: Duration,
}

impl Default for LeaseTiming {
    fn default() -> Self {
        Self {
            duration: Duration::from_secs(lease::DURATION_SECS),
            renew_deadline: Duration::from_secs(lease::RENEW_DEADLINE_SECS),
            renew_interval: Duration::from_secs(lease::RENEW_INTERVAL_SECS),
            retry_period: Duration::from_secs(lease::RETRY_PERIOD_SECS),
        }
    }
}

pub struct LeaderElector {
    lock: Arc<dyn LeaseLock>,
    identity: String,
    timing: LeaseTiming,
    leading: watch::Sender<bool>,
}

impl LeaderElector {
    pub fn new(lock: Arc<dyn LeaseLock>, identity: impl Into<String>) -> Self {
        Self {
            lock,
            identity: identity.into(),
            timing: LeaseTiming::default(),
            leading: watch::channel(false).0,
        }
    }

    pub fn with_timing(mut self, timing: LeaseTiming) -> Self {
        self.timing = timing;
        self
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Leadership changes: `true` once acquired, `false` when lost or released.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.leading.subscribe()
    }

    /// Campaign for the lease and keep renewing it.
    ///
    /// Returns `Ok` after a cancellation (releasing a held lease) and
    /// [`ConvergeError::LeaseLost`] when the lease is taken over or cannot be
    /// renewed within the renew deadline. Failed renewals are retried every
    /// retry period until then. Leadership is never re-entered after a loss.
    #[instrument(skip(self, token), fields(identity = %self.identity))]
    pub async fn run(self, token: CancellationToken) -> Result<()> {
        if !self.acquire(&token).await {
            return Ok(());
        }
        info!("Acquired leadership as {}", self.identity);
        self.leading.send_replace(true);

        let mut renewed = Instant::now();
        let mut failing = false;
        loop {
            let deadline = renewed + self.timing.renew_deadline;
            let pause = if failing {
                self.timing.retry_period
            } else {
                self.timing.renew_interval
            };
            let next = (Instant::now() + pause).min(deadline);
            tokio::select! {
                _ = token.cancelled() => {
                    self.leading.send_replace(false);
                    if let Err(e) = self.lock.release(&self.identity).await {
                        warn!("Failed to release lease: {}", e);
                    } else {
                        info!("Released leadership");
                    }
                    return Ok(());
                }
                _ = tokio::time::sleep_until(next) => {}
            }

            let renewal = self.lock.try_acquire_or_renew(&self.identity, self.timing.duration);
            match tokio::time::timeout_at(deadline, renewal).await {
                Ok(Ok(true)) => {
                    debug!("Renewed lease");
                    renewed = Instant::now();
                    failing = false;
                }
                Ok(Ok(false)) => {
                    error!("Lease taken over by another holder");
                    break;
                }
                Ok(Err(e)) if Instant::now() < deadline => {
                    warn!("Failed to renew lease: {}, retrying in {:?}", e, self.timing.retry_period);
                    failing = true;
                }
                Ok(Err(e)) => {
                    error!("Failed to renew lease within {:?}: {}", self.timing.renew_deadline, e);
                    break;
                }
                Err(_) => {
                    error!("Lease renewal did not finish within {:?}", self.timing.renew_deadline);
                    break;
                }
            }
        }

        self.leading.send_replace(false);
        Err(ConvergeError::LeaseLost(self.identity.clone()))
    }

    /// Returns false when cancelled before acquiring.
    async fn acquire(&self, token: &CancellationToken) -> bool {
        loop {
            match self.lock.try_acquire_or_renew(&self.identity, self.timing.duration).await {
                Ok(true) => return true,
                Ok(false) => debug!("Lease is held elsewhere, retrying in {:?}", self.timing.retry_period),
                Err(e) => warn!("Failed to acquire lease: {}", e),
            }
            tokio::select! {
                _ = token.cancelled() => return false,
                _ = tokio::time::sleep(self.timing.retry_period) => {}
            }
        }
    }
}
