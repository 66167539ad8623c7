// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use kube::Client;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use converge::config::Config;
use converge::constants::conditions;
use converge::controller::{Action, Context, Reconciler};
use converge::http::{self, Probes};
use converge::kubernetes::{wait_for_kind, KubeLease, KubeStore};
use converge::leader::LeaderElector;
use converge::manager::ControllerBuilder;
use converge::metrics::PrometheusMetrics;
use converge::types::{set_condition, Condition, Resource};

/// Marks every object Ready once its generation has been observed.
struct ReadyReconciler;

#[async_trait]
impl Reconciler for ReadyReconciler {
    async fn reconcile(&self, object: Arc<Resource>, ctx: &Context) -> converge::error::Result<Action> {
        info!("Reconciling {} at generation {}", object.key, object.generation);
        let generation = object.generation;
        ctx.status
            .update_from(&object, move |status| {
                status.observed_generation = Some(generation);
                set_condition(
                    &mut status.conditions,
                    Condition::new(conditions::READY, true, conditions::RECONCILED, "Generation observed")
                        .with_observed_generation(generation),
                );
            })
            .await?;
        Ok(Action::await_change())
    }

    async fn cleanup(&self, object: Arc<Resource>, _ctx: &Context) -> converge::error::Result<()> {
        info!("Cleaning up {}", object.key);
        Ok(())
    }
}

/// Resolves on SIGINT, or SIGTERM on unix.
async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!("Cannot listen for SIGTERM: {}", e),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for ctrl-c: {}", e);
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Starting converge operator");

    // Load configuration
    let config = Config::from_env()?;
    let kind = config.watched_kind();
    info!(
        "Configuration loaded: kind={}, workers={}, leader_elect={}",
        kind, config.max_concurrent_reconciles, config.leader_elect
    );

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    // Wait for the watched kind before starting the controller
    info!("Waiting for {} to become available...", kind);
    let served = wait_for_kind(&client, &kind).await?;

    let mut store = KubeStore::new(client.clone()).with_resource(kind.clone(), served.resource);
    if let Some(namespace) = &config.watch_namespace {
        store = store.within(namespace.clone());
    }

    let metrics = Arc::new(PrometheusMetrics::new()?);
    let mut builder = ControllerBuilder::new(Arc::new(store), kind)
        .finalizer(config.finalizer.clone())
        .config(config.controller_config())
        .metrics(metrics.clone());
    if config.leader_elect {
        let lock = KubeLease::new(
            client.clone(),
            &config.leader_election_namespace,
            config.leader_election_id.clone(),
        );
        let elector = LeaderElector::new(Arc::new(lock), config.pod_name.clone()).with_timing(config.lease_timing());
        builder = builder.leader_election(elector);
    }
    let manager = builder.build(Arc::new(ReadyReconciler));

    let sync = manager.cache_sync();
    let probes = Probes::new()
        .with_metrics(metrics)
        .with_readiness(move || sync.is_synced());
    let listener = TcpListener::bind(&config.metrics_bind_address)
        .await
        .with_context(|| format!("failed to bind {}", config.metrics_bind_address))?;

    let token = CancellationToken::new();
    let shutdown = token.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        info!("Shutdown requested");
        shutdown.cancel();
    });

    info!("Starting controller...");

    // Run the controller and the probe server until shutdown or lost leadership
    tokio::try_join!(
        manager.run(token.clone()),
        http::serve(listener, probes, token.clone())
    )?;

    info!("Operator stopped");
    Ok(())
}
