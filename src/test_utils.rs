// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Test utilities: a mocked Kubernetes API, fixtures and a recording reconciler.

use crate::cache::ObjectCache;
use crate::controller::{Action, Context as ReconcileContext, Reconciler};
use crate::error::{ConvergeError, Result};
use crate::store::ObjectStore;
use crate::types::{ObjectKey, Resource, ResourceKind};
use crate::watch::WatchEvent;
use async_trait::async_trait;
use http::{Request, Response};
use http_body_util::BodyExt;
use kube::client::Body;
use kube::Client;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;
use tower::Service;

/// A request seen by [`MockService`].
#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: String,
    pub path: String,
    pub query: String,
    pub body: String,
}

/// A mock HTTP service that returns predefined responses based on request paths.
#[derive(Clone, Default)]
pub struct MockService {
    responses: Arc<Mutex<HashMap<(String, String), (u16, String)>>>,
    requests: Arc<Mutex<Vec<RecordedRequest>>>,
}

impl MockService {
    pub fn new() -> Self {
        Self::default()
    }

    fn on(self, method: &str, path: &str, status: u16, body: &str) -> Self {
        self.responses
            .lock()
            .unwrap()
            .insert((method.to_string(), path.to_string()), (status, body.to_string()));
        self
    }

    /// Add a response for GET requests matching the exact path
    pub fn on_get(self, path: &str, status: u16, body: &str) -> Self {
        self.on("GET", path, status, body)
    }

    pub fn on_post(self, path: &str, status: u16, body: &str) -> Self {
        self.on("POST", path, status, body)
    }

    pub fn on_put(self, path: &str, status: u16, body: &str) -> Self {
        self.on("PUT", path, status, body)
    }

    pub fn on_patch(self, path: &str, status: u16, body: &str) -> Self {
        self.on("PATCH", path, status, body)
    }

    pub fn on_delete(self, path: &str, status: u16, body: &str) -> Self {
        self.on("DELETE", path, status, body)
    }

    /// Every request received so far, in order
    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    /// Build a kube Client from this mock service
    pub fn into_client(self) -> Client {
        Client::new(self, "https://kubernetes.default.svc")
    }

    fn find_response(&self, method: &str, path: &str) -> Option<(u16, String)> {
        let responses = self.responses.lock().unwrap();

        if let Some(resp) = responses.get(&(method.to_string(), path.to_string())) {
            return Some(resp.clone());
        }

        // Longest prefix wins for paths like /apis/example.com/v1/namespaces/default/widgets/a
        responses
            .iter()
            .filter(|((m, p), _)| m == method && path.starts_with(p.as_str()))
            .max_by_key(|((_, p), _)| p.len())
            .map(|(_, resp)| resp.clone())
    }
}

impl Service<Request<Body>> for MockService {
    type Response = Response<Body>;
    type Error = tower::BoxError;
    type Future = std::pin::Pin<
        Box<dyn std::future::Future<Output = std::result::Result<Self::Response, Self::Error>> + Send>,
    >;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<std::result::Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<Body>) -> Self::Future {
        let method = req.method().to_string();
        let path = req.uri().path().to_string();
        let query = req.uri().query().unwrap_or_default().to_string();

        let response = self.find_response(&method, &path);
        let requests = self.requests.clone();

        Box::pin(async move {
            let body = req.into_body().collect().await?.to_bytes();
            requests.lock().unwrap().push(RecordedRequest {
                method,
                path,
                query,
                body: String::from_utf8_lossy(&body).to_string(),
            });

            let (status, body) = response.unwrap_or_else(|| (404, not_found_json("resource", "unknown")));
            Ok(Response::builder()
                .status(status)
                .header("content-type", "application/json")
                .body(Body::from(body.into_bytes()))
                .unwrap())
        })
    }
}

/// Create a 404 not found response
pub fn not_found_json(resource: &str, name: &str) -> String {
    serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Failure",
        "message": format!("{} \"{}\" not found", resource, name),
        "reason": "NotFound",
        "code": 404
    })
    .to_string()
}

/// Create a 409 conflict response
pub fn conflict_json(resource: &str, name: &str) -> String {
    serde_json::json!({
        "kind": "Status",
        "apiVersion": "v1",
        "status": "Failure",
        "message": format!("Operation cannot be fulfilled on {} \"{}\": the object has been modified", resource, name),
        "reason": "Conflict",
        "code": 409
    })
    .to_string()
}

/// Create a mock Widget JSON response
pub fn widget_json(name: &str, resource_version: &str, finalizers: &[&str]) -> String {
    serde_json::json!({
        "apiVersion": "example.com/v1",
        "kind": "Widget",
        "metadata": {
            "name": name,
            "namespace": "default",
            "uid": format!("uid-{}", name),
            "generation": 1,
            "resourceVersion": resource_version,
            "finalizers": finalizers,
        },
        "spec": { "size": 1 },
        "status": {}
    })
    .to_string()
}

/// Create a mock coordination.k8s.io/v1 Lease JSON response
pub fn lease_json(name: &str, holder: &str, resource_version: &str, renew_time: &str) -> String {
    serde_json::json!({
        "apiVersion": "coordination.k8s.io/v1",
        "kind": "Lease",
        "metadata": {
            "name": name,
            "namespace": "default",
            "resourceVersion": resource_version,
        },
        "spec": {
            "holderIdentity": holder,
            "leaseDurationSeconds": 15,
            "acquireTime": renew_time,
            "renewTime": renew_time,
            "leaseTransitions": 0
        }
    })
    .to_string()
}

pub fn make_widget_kind() -> ResourceKind {
    ResourceKind::new("example.com", "v1", "Widget")
}

pub fn make_widget(name: &str) -> Resource {
    Resource::new(
        make_widget_kind(),
        ObjectKey::new("default", name),
        serde_json::json!({ "size": 1 }),
    )
}

/// Bring `cache` in line with what `store` currently holds for `kind`.
pub async fn sync_cache(store: &dyn ObjectStore, cache: &ObjectCache, kind: &ResourceKind) {
    let objects = store.list(kind).await.unwrap();
    let live: HashSet<ObjectKey> = objects.iter().map(|o| o.key.clone()).collect();
    for gone in cache.list(kind, |o| !live.contains(&o.key)) {
        cache.apply(&WatchEvent::Deleted((*gone).clone()));
    }
    for object in objects {
        cache.apply(&WatchEvent::Modified(object));
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Reconcile,
    Cleanup,
}

/// One call observed by [`RecordingReconciler`].
#[derive(Debug, Clone)]
pub struct Invocation {
    pub op: Op,
    pub key: ObjectKey,
    pub generation: i64,
    pub resource_version: String,
    pub finalizers: Vec<String>,
}

/// Reconciler that records its calls and fails or panics on demand.
#[derive(Default)]
pub struct RecordingReconciler {
    invocations: Mutex<Vec<Invocation>>,
    in_flight: Mutex<HashSet<ObjectKey>>,
    overlaps: AtomicUsize,
    reconcile_failures: AtomicU32,
    cleanup_failures: AtomicU32,
    panic: AtomicBool,
    delay: Duration,
    requeue: Option<Duration>,
    observe: bool,
}

impl RecordingReconciler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep this long inside every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn with_requeue(mut self, after: Duration) -> Self {
        self.requeue = Some(after);
        self
    }

    /// Write `observedGeneration` through the status writer on success.
    pub fn observing(mut self) -> Self {
        self.observe = true;
        self
    }

    pub fn fail_reconciles(&self, times: u32) {
        self.reconcile_failures.store(times, Ordering::SeqCst);
    }

    pub fn fail_cleanups(&self, times: u32) {
        self.cleanup_failures.store(times, Ordering::SeqCst);
    }

    pub fn panic_once(&self) {
        self.panic.store(true, Ordering::SeqCst);
    }

    pub fn invocations(&self) -> Vec<Invocation> {
        self.invocations.lock().unwrap().clone()
    }

    fn count(&self, op: Op, key: &ObjectKey) -> usize {
        self.invocations
            .lock()
            .unwrap()
            .iter()
            .filter(|i| i.op == op && &i.key == key)
            .count()
    }

    pub fn reconciles(&self, key: &ObjectKey) -> usize {
        self.count(Op::Reconcile, key)
    }

    pub fn cleanups(&self, key: &ObjectKey) -> usize {
        self.count(Op::Cleanup, key)
    }

    /// Calls that started while another call for the same key was running.
    pub fn overlaps(&self) -> usize {
        self.overlaps.load(Ordering::SeqCst)
    }

    fn enter(&self, op: Op, object: &Resource) {
        if !self.in_flight.lock().unwrap().insert(object.key.clone()) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
        self.invocations.lock().unwrap().push(Invocation {
            op,
            key: object.key.clone(),
            generation: object.generation,
            resource_version: object.resource_version.clone(),
            finalizers: object.finalizers.clone(),
        });
    }

    fn leave(&self, object: &Resource) {
        self.in_flight.lock().unwrap().remove(&object.key);
    }

    fn take_failure(counter: &AtomicU32) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl Reconciler for RecordingReconciler {
    async fn reconcile(&self, object: Arc<Resource>, ctx: &ReconcileContext) -> Result<Action> {
        self.enter(Op::Reconcile, &object);
        if self.panic.swap(false, Ordering::SeqCst) {
            self.leave(&object);
            panic!("reconcile of {} exploded", object.key);
        }
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let result = if Self::take_failure(&self.reconcile_failures) {
            Err(ConvergeError::transient("simulated reconcile failure"))
        } else if self.observe {
            ctx.status.observe_generation(&object).await.map(|_| ())
        } else {
            Ok(())
        };
        self.leave(&object);
        result?;
        Ok(self.requeue.map(Action::requeue).unwrap_or_else(Action::await_change))
    }

    async fn cleanup(&self, object: Arc<Resource>, _ctx: &ReconcileContext) -> Result<()> {
        self.enter(Op::Cleanup, &object);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let failed = Self::take_failure(&self.cleanup_failures);
        self.leave(&object);
        if failed {
            return Err(ConvergeError::transient("simulated cleanup failure"));
        }
        Ok(())
    }
}
