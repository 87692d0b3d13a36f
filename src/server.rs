//! # HTTP Server
//!
//! Serves the admission webhook and its probes.
//!
//! Provides endpoints:
//! - `POST /pods` - Pod mutation admission reviews
//! - `/healthz` - Liveness probe (always returns 200)
//! - `/metrics` - Prometheus metrics in text format, moved to a separate
//!   listener when `TELEMETRY_LISTEN_ADDRESS` is set
//!
//! HTTPS is served with rustls when a certificate and key are configured,
//! the API server only calls webhooks over TLS.

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use axum::{
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    serve::Listener,
    Router,
};
use prometheus::{Encoder, TextEncoder};
use rustls::pki_types::{pem::PemObject, CertificateDer, PrivateKeyDer};
use tokio::net::{TcpListener, TcpStream};
use tokio_rustls::{server::TlsStream, TlsAcceptor};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

use crate::config::WebhookConfig;
use crate::webhook::{mutate_pods_handler, WebhookState};

/// Router of the webhook listener
pub fn router(state: Arc<WebhookState>, serve_metrics: bool) -> Router {
    let router = Router::new()
        .route("/pods", post(mutate_pods_handler))
        .route("/healthz", get(healthz_handler));
    let router = if serve_metrics {
        router.route("/metrics", get(metrics_handler))
    } else {
        router
    };
    router.layer(TraceLayer::new_for_http()).with_state(state)
}

/// Router of the separate telemetry listener
pub fn telemetry_router() -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
}

/// Run the webhook (and telemetry) listeners until shutdown
///
/// # Errors
///
/// Invalid addresses, unreadable TLS material or bind failures.
pub async fn start_server(config: &WebhookConfig, state: Arc<WebhookState>) -> Result<()> {
    let addr = config.listen_socket_addr()?;
    let telemetry_addr = config.telemetry_socket_addr()?;
    let tls_files = config.tls_files()?;

    if let Some(telemetry_addr) = telemetry_addr {
        let listener = TcpListener::bind(telemetry_addr)
            .await
            .with_context(|| format!("Failed to bind telemetry listener on {telemetry_addr}"))?;
        info!("Telemetry server listening on {}", telemetry_addr);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, telemetry_router())
                .with_graceful_shutdown(shutdown_signal())
                .await
            {
                error!("Telemetry server error: {}", e);
            }
        });
    }

    let app = router(state, telemetry_addr.is_none());
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind webhook listener on {addr}"))?;

    match tls_files {
        Some((cert, key)) => {
            let acceptor = tls_acceptor(&cert, &key)?;
            info!("Webhook listening on https://{}", addr);
            axum::serve(TlsListener { listener, acceptor }, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("HTTPS server error")?;
        }
        None => {
            warn!("No TLS certificate configured, serving plain HTTP on {}", addr);
            axum::serve(listener, app)
                .with_graceful_shutdown(shutdown_signal())
                .await
                .context("HTTP server error")?;
        }
    }

    info!("Webhook server shutdown completed");
    Ok(())
}

fn tls_acceptor(cert_path: &Path, key_path: &Path) -> Result<TlsAcceptor> {
    let cert_bytes = std::fs::read(cert_path)
        .with_context(|| format!("Failed to read TLS certificate {}", cert_path.display()))?;
    let cert_chain = CertificateDer::pem_slice_iter(&cert_bytes)
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Invalid PEM certificate {}", cert_path.display()))?;
    if cert_chain.is_empty() {
        anyhow::bail!("No certificate found in {}", cert_path.display());
    }

    let key_bytes = std::fs::read(key_path)
        .with_context(|| format!("Failed to read TLS private key {}", key_path.display()))?;
    let private_key = PrivateKeyDer::from_pem_slice(&key_bytes)
        .with_context(|| format!("Invalid PEM private key {}", key_path.display()))?;

    let provider = rustls::crypto::ring::default_provider();
    let server_config = rustls::ServerConfig::builder_with_provider(provider.into())
        .with_safe_default_protocol_versions()
        .context("Invalid TLS protocol configuration")?
        .with_no_client_auth()
        .with_single_cert(cert_chain, private_key)
        .context("Failed to load TLS certificate")?;

    Ok(TlsAcceptor::from(Arc::new(server_config)))
}

struct TlsListener {
    listener: TcpListener,
    acceptor: TlsAcceptor,
}

impl Listener for TlsListener {
    type Io = TlsStream<TcpStream>;
    type Addr = SocketAddr;

    async fn accept(&mut self) -> (Self::Io, Self::Addr) {
        loop {
            match self.listener.accept().await {
                Ok((stream, addr)) => match self.acceptor.accept(stream).await {
                    Ok(tls_stream) => return (tls_stream, addr),
                    Err(err) => {
                        warn!(error = %err, %addr, "TLS handshake failed");
                    }
                },
                Err(err) => {
                    if is_connection_error(&err) {
                        continue;
                    }
                    error!("HTTPS accept error: {err}");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        }
    }

    fn local_addr(&self) -> std::io::Result<Self::Addr> {
        self.listener.local_addr()
    }
}

fn is_connection_error(error: &std::io::Error) -> bool {
    matches!(
        error.kind(),
        std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::ConnectionReset
    )
}

/// Resolves on Ctrl-C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received");
}

fn gather() -> Vec<prometheus::proto::MetricFamily> {
    use crate::observability::metrics::REGISTRY;
    REGISTRY.gather()
}

async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = gather();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain")],
            format!("Failed to encode metrics: {e}").into_bytes(),
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
