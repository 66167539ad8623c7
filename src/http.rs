// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! Metrics and probe endpoints.

use crate::error::Result;
use crate::metrics::PrometheusMetrics;
use bytes::Bytes;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Method, Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type Readiness = Arc<dyn Fn() -> bool + Send + Sync>;

/// What the endpoints report on.
#[derive(Clone)]
pub struct Probes {
    metrics: Option<Arc<PrometheusMetrics>>,
    ready: Readiness,
}

impl Default for Probes {
    fn default() -> Self {
        Self {
            metrics: None,
            ready: Arc::new(|| true),
        }
    }
}

fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response
        .headers_mut()
        .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
    response
}

impl Probes {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_metrics(mut self, metrics: Arc<PrometheusMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// `/readyz` answers 200 only while `ready` returns true.
    pub fn with_readiness<F>(mut self, ready: F) -> Self
    where
        F: Fn() -> bool + Send + Sync + 'static,
    {
        self.ready = Arc::new(ready);
        self
    }

    pub fn respond(&self, method: &Method, path: &str) -> Response<Full<Bytes>> {
        if method != Method::GET {
            return text(StatusCode::METHOD_NOT_ALLOWED, "method not allowed\n");
        }
        match path {
            "/healthz" => text(StatusCode::OK, "ok\n"),
            "/readyz" if (self.ready)() => text(StatusCode::OK, "ok\n"),
            "/readyz" => text(StatusCode::SERVICE_UNAVAILABLE, "caches not synced\n"),
            "/metrics" => self.metrics(),
            _ => text(StatusCode::NOT_FOUND, "not found\n"),
        }
    }

    fn metrics(&self) -> Response<Full<Bytes>> {
        let Some(metrics) = &self.metrics else {
            return text(StatusCode::NOT_FOUND, "metrics disabled\n");
        };
        match metrics.encode() {
            Ok((content_type, body)) => {
                let mut response = text(StatusCode::OK, body);
                if let Ok(value) = HeaderValue::from_str(&content_type) {
                    response.headers_mut().insert(CONTENT_TYPE, value);
                }
                response
            }
            Err(e) => {
                error!("Failed to encode metrics: {}", e);
                text(StatusCode::INTERNAL_SERVER_ERROR, "failed to encode metrics\n")
            }
        }
    }
}

/// Serve `probes` on `listener` until `token` is cancelled.
pub async fn serve(listener: TcpListener, probes: Probes, token: CancellationToken) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("Serving metrics and probes on http://{}", addr);
    }
    loop {
        let stream = tokio::select! {
            _ = token.cancelled() => return Ok(()),
            accepted = listener.accept() => match accepted {
                Ok((stream, _)) => stream,
                Err(e) => {
                    warn!("Failed to accept connection: {}", e);
                    continue;
                }
            },
        };

        let probes = probes.clone();
        tokio::spawn(async move {
            let service = service_fn(move |req: Request<Incoming>| {
                let response = probes.respond(req.method(), req.uri().path());
                async move { Ok::<_, Infallible>(response) }
            });
            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!("Connection error: {}", e);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsSink;
    use http_body_util::BodyExt;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    async fn body_of(response: Response<Full<Bytes>>) -> String {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8_lossy(&bytes).to_string()
    }

    #[tokio::test]
    async fn test_readyz_follows_readiness() {
        let ready = Arc::new(AtomicBool::new(false));
        let flag = ready.clone();
        let probes = Probes::new().with_readiness(move || flag.load(Ordering::SeqCst));

        assert_eq!(probes.respond(&Method::GET, "/readyz").status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(probes.respond(&Method::GET, "/healthz").status(), StatusCode::OK);

        ready.store(true, Ordering::SeqCst);
        assert_eq!(probes.respond(&Method::GET, "/readyz").status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_metrics_are_exposed() {
        let metrics = Arc::new(PrometheusMetrics::new().unwrap());
        metrics.reconcile_attempt("widget");
        let probes = Probes::new().with_metrics(metrics);

        let response = probes.respond(&Method::GET, "/metrics");

        assert_eq!(response.status(), StatusCode::OK);
        assert!(body_of(response).await.contains("converge_reconcile_attempts_total"));
    }

    #[tokio::test]
    async fn test_unknown_paths_and_methods() {
        let probes = Probes::new();
        assert_eq!(probes.respond(&Method::GET, "/metrics").status(), StatusCode::NOT_FOUND);
        assert_eq!(probes.respond(&Method::GET, "/nope").status(), StatusCode::NOT_FOUND);
        assert_eq!(
            probes.respond(&Method::POST, "/healthz").status(),
            StatusCode::METHOD_NOT_ALLOWED
        );
    }

    #[tokio::test]
    async fn test_serves_over_tcp_until_cancelled() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let token = CancellationToken::new();
        let server = tokio::spawn(serve(listener, Probes::new(), token.clone()));

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(b"GET /healthz HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .await
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        assert!(response.starts_with("HTTP/1.1 200 OK"));

        token.cancel();
        tokio::time::timeout(Duration::from_secs(1), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
