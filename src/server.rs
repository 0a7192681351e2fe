// Copyright 2026, Jeroen van Erp <jeroen@geeko.me>
// SPDX-License-Identifier: Apache-2.0

//! HTTP endpoints for Prometheus scraping and Kubernetes probes.
//!
//! - `/metrics` on the metrics address, Prometheus text format
//! - `/healthz` on the probe address, always 200 once the process serves
//! - `/readyz` on the probe address, 200 after startup has completed

use anyhow::{Context, Result};
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, TextEncoder};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::metrics;

#[derive(Debug, Default)]
pub struct ServerState {
    ready: AtomicBool,
}

impl ServerState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_ready(&self) {
        self.ready.store(true, Ordering::Relaxed);
    }

    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::Relaxed)
    }
}

pub fn metrics_router() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

pub fn probe_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .with_state(state)
}

/// Bind `addr` and serve `router` in the background until `shutdown` is cancelled.
///
/// Returns the bound address, which differs from `addr` when port 0 was requested.
pub async fn start_server(
    addr: SocketAddr,
    router: Router,
    shutdown: CancellationToken,
) -> Result<(SocketAddr, JoinHandle<()>)> {
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind HTTP server to {}", addr))?;
    let local = listener.local_addr()?;
    info!("HTTP server listening on {}", local);

    let handle = tokio::spawn(async move {
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.cancelled_owned())
            .await;
        if let Err(e) = served {
            error!("HTTP server on {} failed: {}", local, e);
        }
    });

    Ok((local, handle))
}

async fn metrics_handler() -> impl IntoResponse {
    let mut buffer = Vec::new();
    if let Err(e) = TextEncoder::new().encode(&metrics::gather(), &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain")],
            format!("Failed to encode metrics: {}", e).into_bytes(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        buffer,
    )
}

async fn healthz_handler() -> impl IntoResponse {
    StatusCode::OK
}

async fn readyz_handler(State(state): State<Arc<ServerState>>) -> impl IntoResponse {
    if state.is_ready() {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}
