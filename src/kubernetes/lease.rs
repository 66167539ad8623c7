// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Leader election lock over a `coordination.k8s.io/v1` Lease.

use crate::error::{ConvergeError, Result};
use crate::leader::LeaseLock;
use async_trait::async_trait;
use chrono::Utc;
use k8s_openapi::api::coordination::v1::{Lease, LeaseSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{MicroTime, ObjectMeta};
use kube::api::{Api, PostParams};
use kube::Client;
use std::time::Duration;
use tracing::{debug, info, instrument};

pub struct KubeLease {
    api: Api<Lease>,
    name: String,
}

impl KubeLease {
    pub fn new(client: Client, namespace: &str, name: impl Into<String>) -> Self {
        Self {
            api: Api::namespaced(client, namespace),
            name: name.into(),
        }
    }

    fn is_conflict(e: &kube::Error) -> bool {
        matches!(e, kube::Error::Api(ae) if ae.code == 409)
    }

    async fn create(&self, identity: &str, duration: Duration) -> Result<bool> {
        let now = MicroTime(Utc::now());
        let lease = Lease {
            metadata: ObjectMeta {
                name: Some(self.name.clone()),
                ..ObjectMeta::default()
            },
            spec: Some(LeaseSpec {
                holder_identity: Some(identity.to_string()),
                lease_duration_seconds: Some(duration.as_secs() as i32),
                acquire_time: Some(now.clone()),
                renew_time: Some(now),
                lease_transitions: Some(0),
                ..LeaseSpec::default()
            }),
        };
        match self.api.create(&PostParams::default(), &lease).await {
            Ok(_) => {
                info!("Created lease {} held by {}", self.name, identity);
                Ok(true)
            }
            // Someone else created it first
            Err(e) if Self::is_conflict(&e) => Ok(false),
            Err(e) => Err(ConvergeError::KubeError(e)),
        }
    }
}

/// Whether the holder recorded in `spec` let the lease run out.
fn expired(spec: &LeaseSpec) -> bool {
    match (&spec.renew_time, spec.lease_duration_seconds) {
        (Some(MicroTime(renewed)), Some(seconds)) => {
            *renewed + chrono::Duration::seconds(i64::from(seconds)) < Utc::now()
        }
        _ => true,
    }
}

#[async_trait]
impl LeaseLock for KubeLease {
    #[instrument(skip(self), fields(lease = %self.name))]
    async fn try_acquire_or_renew(&self, identity: &str, duration: Duration) -> Result<bool> {
        let Some(mut lease) = self.api.get_opt(&self.name).await? else {
            return self.create(identity, duration).await;
        };

        let mut spec = lease.spec.take().unwrap_or_default();
        let holder = spec.holder_identity.clone().unwrap_or_default();
        let ours = holder == identity;
        if !ours && !holder.is_empty() && !expired(&spec) {
            debug!("Lease {} held by {}", self.name, holder);
            return Ok(false);
        }

        let now = MicroTime(Utc::now());
        if !ours {
            spec.acquire_time = Some(now.clone());
            spec.lease_transitions = Some(spec.lease_transitions.unwrap_or(0) + 1);
        }
        spec.holder_identity = Some(identity.to_string());
        spec.lease_duration_seconds = Some(duration.as_secs() as i32);
        spec.renew_time = Some(now);
        lease.spec = Some(spec);

        // The resource version read above guards against a concurrent taker
        match self.api.replace(&self.name, &PostParams::default(), &lease).await {
            Ok(_) => Ok(true),
            Err(e) if Self::is_conflict(&e) => Ok(false),
            Err(e) => Err(ConvergeError::KubeError(e)),
        }
    }

    #[instrument(skip(self), fields(lease = %self.name))]
    async fn release(&self, identity: &str) -> Result<()> {
        let Some(mut lease) = self.api.get_opt(&self.name).await? else {
            return Ok(());
        };
        let Some(spec) = lease.spec.as_mut() else {
            return Ok(());
        };
        if spec.holder_identity.as_deref() != Some(identity) {
            return Ok(());
        }
        spec.holder_identity = None;
        spec.lease_duration_seconds = Some(1);
        spec.renew_time = Some(MicroTime(Utc::now()));

        match self.api.replace(&self.name, &PostParams::default(), &lease).await {
            Ok(_) => Ok(()),
            Err(e) if Self::is_conflict(&e) => Ok(()),
            Err(e) => Err(ConvergeError::KubeError(e)),
        }
    }
}
