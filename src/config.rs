// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use crate::constants::{backoff, lease, lifecycle, DEFAULT_FINALIZER};
use crate::controller::ControllerConfig;
use crate::error::{ConvergeError, Result};
use crate::leader::LeaseTiming;
use crate::queue::BackoffReset;
use crate::status::WriteMode;
use crate::types::ResourceKind;
use anyhow::Context;
use serde::Deserialize;
use std::env;
use std::fmt::Display;
use std::str::FromStr;
use std::time::Duration;

/// Environment variable naming an optional YAML configuration file
pub const CONFIG_FILE_ENV: &str = "CONVERGE_CONFIG";

/// Operator configuration loaded from a YAML file and environment variables
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub leader_elect: bool,
    /// Name of the Lease object used for leader election
    pub leader_election_id: String,
    pub leader_election_namespace: String,
    /// Identity written into the lease
    pub pod_name: String,
    pub max_concurrent_reconciles: usize,
    pub requeue_base_delay_ms: u64,
    pub requeue_max_delay_secs: u64,
    pub backoff_reset: BackoffReset,
    pub status_write_mode: WriteMode,
    pub lease_duration_secs: u64,
    /// Leadership is given up when renewals keep failing for this long
    pub renew_deadline_secs: u64,
    pub renew_interval_secs: u64,
    pub retry_period_secs: u64,
    pub shutdown_grace_secs: u64,
    pub cache_sync_timeout_secs: u64,
    pub metrics_bind_address: String,
    pub finalizer: String,
    pub watch_group: String,
    pub watch_version: String,
    pub watch_kind: String,
    /// Restrict watches to one namespace; all namespaces when unset
    pub watch_namespace: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            leader_elect: false,
            leader_election_id: lease::DEFAULT_NAME.to_string(),
            leader_election_namespace: "default".to_string(),
            pod_name: "converge".to_string(),
            max_concurrent_reconciles: lifecycle::WORKERS,
            requeue_base_delay_ms: backoff::BASE_DELAY_MS,
            requeue_max_delay_secs: backoff::MAX_DELAY_SECS,
            backoff_reset: BackoffReset::default(),
            status_write_mode: WriteMode::default(),
            lease_duration_secs: lease::DURATION_SECS,
            renew_deadline_secs: lease::RENEW_DEADLINE_SECS,
            renew_interval_secs: lease::RENEW_INTERVAL_SECS,
            retry_period_secs: lease::RETRY_PERIOD_SECS,
            shutdown_grace_secs: lifecycle::SHUTDOWN_GRACE_SECS,
            cache_sync_timeout_secs: lifecycle::CACHE_SYNC_TIMEOUT_SECS,
            metrics_bind_address: "0.0.0.0:8080".to_string(),
            finalizer: DEFAULT_FINALIZER.to_string(),
            watch_group: String::new(),
            watch_version: String::new(),
            watch_kind: String::new(),
            watch_namespace: None,
        }
    }
}

fn parse<T>(name: &str, value: &str) -> Result<T>
where
    T: FromStr,
    T::Err: Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| ConvergeError::Config(format!("{}={:?} is invalid: {}", name, value, e)))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConvergeError::Config(format!("{}={:?} is not a boolean", name, value))),
    }
}

impl Config {
    /// Load configuration from `CONVERGE_CONFIG` and environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        let file = match env::var(CONFIG_FILE_ENV) {
            Ok(path) => Some(
                std::fs::read_to_string(&path)
                    .with_context(|| format!("failed to read configuration file {}", path))?,
            ),
            Err(_) => None,
        };
        let config = Self::load(file.as_deref(), |name| env::var(name).ok())
            .context("invalid operator configuration")?;
        Ok(config)
    }

    /// Build a configuration from optional YAML `file` contents, then apply
    /// overrides found through `lookup`. The result is validated.
    pub fn load<F>(file: Option<&str>, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = match file {
            Some(yaml) if !yaml.trim().is_empty() => serde_yaml::from_str(yaml)?,
            _ => Config::default(),
        };

        if let Some(pod) = lookup("POD_NAME").or_else(|| lookup("HOSTNAME")) {
            config.pod_name = pod;
        }
        if let Some(v) = lookup("LEADER_ELECT") {
            config.leader_elect = parse_bool("LEADER_ELECT", &v)?;
        }
        if let Some(v) = lookup("LEADER_ELECTION_ID") {
            config.leader_election_id = v;
        }
        if let Some(v) = lookup("LEADER_ELECTION_NAMESPACE") {
            config.leader_election_namespace = v;
        }
        if let Some(v) = lookup("MAX_CONCURRENT_RECONCILES") {
            config.max_concurrent_reconciles = parse("MAX_CONCURRENT_RECONCILES", &v)?;
        }
        if let Some(v) = lookup("REQUEUE_BASE_DELAY_MS") {
            config.requeue_base_delay_ms = parse("REQUEUE_BASE_DELAY_MS", &v)?;
        }
        if let Some(v) = lookup("REQUEUE_MAX_DELAY_SECS") {
            config.requeue_max_delay_secs = parse("REQUEUE_MAX_DELAY_SECS", &v)?;
        }
        if let Some(v) = lookup("BACKOFF_RESET") {
            config.backoff_reset = parse("BACKOFF_RESET", &v)?;
        }
        if let Some(v) = lookup("STATUS_WRITE_MODE") {
            config.status_write_mode = serde_yaml::from_str(v.trim())
                .map_err(|e| ConvergeError::Config(format!("STATUS_WRITE_MODE={:?} is invalid: {}", v, e)))?;
        }
        if let Some(v) = lookup("LEASE_DURATION_SECS") {
            config.lease_duration_secs = parse("LEASE_DURATION_SECS", &v)?;
        }
        if let Some(v) = lookup("RENEW_DEADLINE_SECS") {
            config.renew_deadline_secs = parse("RENEW_DEADLINE_SECS", &v)?;
        }
        if let Some(v) = lookup("RENEW_INTERVAL_SECS") {
            config.renew_interval_secs = parse("RENEW_INTERVAL_SECS", &v)?;
        }
        if let Some(v) = lookup("RETRY_PERIOD_SECS") {
            config.retry_period_secs = parse("RETRY_PERIOD_SECS", &v)?;
        }
        if let Some(v) = lookup("SHUTDOWN_GRACE_SECS") {
            config.shutdown_grace_secs = parse("SHUTDOWN_GRACE_SECS", &v)?;
        }
        if let Some(v) = lookup("CACHE_SYNC_TIMEOUT_SECS") {
            config.cache_sync_timeout_secs = parse("CACHE_SYNC_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("METRICS_BIND_ADDRESS") {
            config.metrics_bind_address = v;
        }
        if let Some(v) = lookup("FINALIZER") {
            config.finalizer = v;
        }
        if let Some(v) = lookup("WATCH_GROUP") {
            config.watch_group = v;
        }
        if let Some(v) = lookup("WATCH_VERSION") {
            config.watch_version = v;
        }
        if let Some(v) = lookup("WATCH_KIND") {
            config.watch_kind = v;
        }
        if let Some(v) = lookup("WATCH_NAMESPACE") {
            config.watch_namespace = Some(v).filter(|ns| !ns.is_empty());
        }

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        let invalid = |msg: &str| Err(ConvergeError::Config(msg.to_string()));
        if self.max_concurrent_reconciles == 0 {
            return invalid("MAX_CONCURRENT_RECONCILES must be at least 1");
        }
        if self.requeue_base_delay_ms == 0 {
            return invalid("REQUEUE_BASE_DELAY_MS must be positive");
        }
        if Duration::from_millis(self.requeue_base_delay_ms) > Duration::from_secs(self.requeue_max_delay_secs) {
            return invalid("REQUEUE_BASE_DELAY_MS exceeds REQUEUE_MAX_DELAY_SECS");
        }
        if self.retry_period_secs == 0 || self.renew_interval_secs == 0 {
            return invalid("lease renew and retry periods must be positive");
        }
        if self.renew_interval_secs >= self.renew_deadline_secs {
            return invalid("RENEW_INTERVAL_SECS must be shorter than RENEW_DEADLINE_SECS");
        }
        if self.renew_deadline_secs >= self.lease_duration_secs {
            return invalid("RENEW_DEADLINE_SECS must be shorter than LEASE_DURATION_SECS");
        }
        if self.watch_kind.is_empty() || self.watch_version.is_empty() {
            return invalid("WATCH_KIND and WATCH_VERSION must be set");
        }
        if self.leader_elect && self.pod_name.is_empty() {
            return invalid("POD_NAME must be set when LEADER_ELECT is enabled");
        }
        Ok(())
    }

    /// The primary kind this operator reconciles
    pub fn watched_kind(&self) -> ResourceKind {
        ResourceKind::new(&self.watch_group, &self.watch_version, &self.watch_kind)
    }

    pub fn controller_config(&self) -> ControllerConfig {
        ControllerConfig {
            workers: self.max_concurrent_reconciles,
            backoff_base: Duration::from_millis(self.requeue_base_delay_ms),
            backoff_max: Duration::from_secs(self.requeue_max_delay_secs),
            backoff_reset: self.backoff_reset,
            status_mode: self.status_write_mode,
            shutdown_grace: Duration::from_secs(self.shutdown_grace_secs),
            cache_sync_timeout: Duration::from_secs(self.cache_sync_timeout_secs),
            ..ControllerConfig::default()
        }
    }

    pub fn lease_timing(&self) -> LeaseTiming {
        LeaseTiming {
            duration: Duration::from_secs(self.lease_duration_secs),
            renew_deadline: Duration::from_secs(self.renew_deadline_secs),
            renew_interval: Duration::from_secs(self.renew_interval_secs),
            retry_period: Duration::from_secs(self.retry_period_secs),
        }
    }
}
