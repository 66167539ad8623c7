// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Reconcile metrics, exposed for an external collector.

use crate::error::{ConvergeError, ErrorClass, Result};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::time::Duration;

pub trait MetricsSink: Send + Sync {
    fn reconcile_attempt(&self, controller: &str);
    fn reconcile_success(&self, controller: &str, elapsed: Duration);
    fn reconcile_failure(&self, controller: &str, class: ErrorClass, elapsed: Duration);
    fn queue_depth(&self, controller: &str, depth: usize);
}

/// Discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn reconcile_attempt(&self, _controller: &str) {}
    fn reconcile_success(&self, _controller: &str, _elapsed: Duration) {}
    fn reconcile_failure(&self, _controller: &str, _class: ErrorClass, _elapsed: Duration) {}
    fn queue_depth(&self, _controller: &str, _depth: usize) {}
}

#[derive(Clone)]
pub struct PrometheusMetrics {
    registry: Registry,
    attempts: IntCounterVec,
    successes: IntCounterVec,
    failures: IntCounterVec,
    depth: IntGaugeVec,
    duration: HistogramVec,
}

fn registration(e: prometheus::Error) -> ConvergeError {
    ConvergeError::Config(format!("failed to register metric: {}", e))
}

impl PrometheusMetrics {
    pub fn new() -> Result<Self> {
        Self::with_registry(Registry::new())
    }

    pub fn with_registry(registry: Registry) -> Result<Self> {
        let attempts = IntCounterVec::new(
            Opts::new("converge_reconcile_attempts_total", "Reconcile invocations"),
            &["controller"],
        )
        .map_err(registration)?;
        let successes = IntCounterVec::new(
            Opts::new("converge_reconcile_successes_total", "Reconcile invocations that succeeded"),
            &["controller"],
        )
        .map_err(registration)?;
        let failures = IntCounterVec::new(
            Opts::new("converge_reconcile_failures_total", "Reconcile invocations that failed"),
            &["controller", "class"],
        )
        .map_err(registration)?;
        let depth = IntGaugeVec::new(
            Opts::new("converge_queue_depth", "Identities waiting in the work queue"),
            &["controller"],
        )
        .map_err(registration)?;
        let duration = HistogramVec::new(
            HistogramOpts::new("converge_reconcile_duration_seconds", "Time spent per reconcile")
                .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0]),
            &["controller"],
        )
        .map_err(registration)?;

        registry.register(Box::new(attempts.clone())).map_err(registration)?;
        registry.register(Box::new(successes.clone())).map_err(registration)?;
        registry.register(Box::new(failures.clone())).map_err(registration)?;
        registry.register(Box::new(depth.clone())).map_err(registration)?;
        registry.register(Box::new(duration.clone())).map_err(registration)?;

        Ok(Self {
            registry,
            attempts,
            successes,
            failures,
            depth,
            duration,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Render every registered metric in the Prometheus text format.
    pub fn encode(&self) -> Result<(String, Vec<u8>)> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| ConvergeError::transient(format!("failed to encode metrics: {}", e)))?;
        Ok((encoder.format_type().to_string(), buffer))
    }
}

impl MetricsSink for PrometheusMetrics {
    fn reconcile_attempt(&self, controller: &str) {
        self.attempts.with_label_values(&[controller]).inc();
    }

    fn reconcile_success(&self, controller: &str, elapsed: Duration) {
        self.successes.with_label_values(&[controller]).inc();
        self.duration
            .with_label_values(&[controller])
            .observe(elapsed.as_secs_f64());
    }

    fn reconcile_failure(&self, controller: &str, class: ErrorClass, elapsed: Duration) {
        self.failures
            .with_label_values(&[controller, class.as_str()])
            .inc();
        self.duration
            .with_label_values(&[controller])
            .observe(elapsed.as_secs_f64());
    }

    fn queue_depth(&self, controller: &str, depth: usize) {
        self.depth
            .with_label_values(&[controller])
            .set(i64::try_from(depth).unwrap_or(i64::MAX));
    }
}
