// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Per-item retry delays.

use serde::Deserialize;
use std::collections::HashMap;
use std::hash::Hash;
use std::str::FromStr;
use std::time::Duration;

/// Decides how long a failing item waits before it is handed out again.
pub trait RateLimiter<K>: Send + Sync {
    /// Delay for the next retry of `key`; counts as one more failure.
    fn when(&mut self, key: &K) -> Duration;
    /// Reset the failure history of `key`.
    fn forget(&mut self, key: &K);
    /// Consecutive failures recorded for `key`.
    fn retries(&self, key: &K) -> u32;
}

/// When the failure history of an item is cleared.
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub enum BackoffReset {
    /// After a successful reconcile. Re-adds leave the history alone.
    #[default]
    OnSuccess,
    /// After a successful reconcile or any observed change to the object.
    OnSuccessOrChange,
    /// Never; delays keep growing to the ceiling.
    Never,
}

impl FromStr for BackoffReset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "onsuccess" | "on-success" | "success" => Ok(BackoffReset::OnSuccess),
            "onsuccessorchange" | "on-success-or-change" | "change" => {
                Ok(BackoffReset::OnSuccessOrChange)
            }
            "never" => Ok(BackoffReset::Never),
            other => Err(format!("unknown backoff reset policy '{}'", other)),
        }
    }
}

/// Doubles the delay per consecutive failure, starting at `base` and capped at `max`.
pub struct ExponentialBackoff<K> {
    base: Duration,
    max: Duration,
    failures: HashMap<K, u32>,
}

impl<K: Eq + Hash + Clone> ExponentialBackoff<K> {
    pub fn new(base: Duration, max: Duration) -> Self {
        Self {
            base,
            max,
            failures: HashMap::new(),
        }
    }

    fn delay_for(&self, failures: u32) -> Duration {
        1u32.checked_shl(failures)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.max, |delay| delay.min(self.max))
    }
}

impl<K: Eq + Hash + Clone + Send + Sync> RateLimiter<K> for ExponentialBackoff<K> {
    fn when(&mut self, key: &K) -> Duration {
        let failures = self.failures.entry(key.clone()).or_insert(0);
        let current = *failures;
        *failures = failures.saturating_add(1);
        self.delay_for(current)
    }

    fn forget(&mut self, key: &K) {
        self.failures.remove(key);
    }

    fn retries(&self, key: &K) -> u32 {
        self.failures.get(key).copied().unwrap_or(0)
    }
}
