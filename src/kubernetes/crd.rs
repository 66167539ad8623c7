// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Kind availability checking utilities

use crate::constants::crd::{POLL_INTERVAL_SECS, POLL_MAX_INTERVAL_SECS};
use crate::error::Result;
use crate::types::ResourceKind;
use kube::api::ApiResource;
use kube::discovery::{Discovery, Scope};
use kube::Client;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

/// A kind as served by the API server.
#[derive(Debug, Clone)]
pub struct ServedKind {
    pub resource: ApiResource,
    pub namespaced: bool,
}

/// Wait for `kind` to be served by the API server.
/// This uses exponential backoff starting at POLL_INTERVAL_SECS seconds.
pub async fn wait_for_kind(client: &Client, kind: &ResourceKind) -> Result<ServedKind> {
    let mut interval = POLL_INTERVAL_SECS;

    loop {
        match find_kind(client, kind).await {
            Ok(Some(served)) => {
                info!("{} is available as {}", kind, served.resource.plural);
                return Ok(served);
            }
            Ok(None) => {
                info!("{} not yet available, waiting {} seconds...", kind, interval);
            }
            Err(e) => {
                warn!("Error checking for {}: {}, retrying in {} seconds...", kind, e, interval);
            }
        }

        sleep(Duration::from_secs(interval)).await;

        // Exponential backoff with max cap
        interval = (interval * 2).min(POLL_MAX_INTERVAL_SECS);
    }
}

/// Look `kind` up through discovery of its API group.
pub async fn find_kind(client: &Client, kind: &ResourceKind) -> Result<Option<ServedKind>> {
    let discovery = Discovery::new(client.clone())
        .filter(&[kind.group.as_str()])
        .run()
        .await?;

    for group in discovery.groups() {
        if group.name() != kind.group {
            continue;
        }
        for (ar, caps) in group.versioned_resources(&kind.version) {
            if ar.kind == kind.kind {
                return Ok(Some(ServedKind {
                    resource: ar,
                    namespaced: caps.scope == Scope::Namespaced,
                }));
            }
        }
    }

    Ok(None)
}
