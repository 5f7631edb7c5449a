//! UM Drive server binary.
//!
//! Exposes a single storage directory over HTTP: files can be listed,
//! uploaded, downloaded and deleted, and each file carries a JSON metadata
//! record kept in a reserved document inside the same directory.

mod atomic;
mod config;
mod error;
mod files;
mod frontend;
mod http;
mod locking;
mod logging;
mod metadata;
mod metrics;
mod openapi;
mod routes;
mod sanitize;
mod storage;
mod version;

use axum::extract::connect_info::ConnectInfo;
use axum::http::Request;
use axum_server::Handle;
use clap::Parser;
use shadow_rs::shadow;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::trace::{DefaultOnRequest, DefaultOnResponse, TraceLayer};
use tracing::{Level, info, info_span};

use crate::config::{Args, SHUTDOWN_GRACE_SECS};
use crate::files::UploadConfig;
use crate::http::{build_cors_layer, resolve_client_ip};
use crate::metrics::RequestMetrics;
use crate::storage::FileRepository;

shadow!(build);

/// Starts the UM Drive server and blocks until shutdown.
#[tokio::main]
async fn main() -> Result<(), std::io::Error> {
    logging::init_logging();

    let args = Args::parse();
    let repository = FileRepository::open(
        &args.storage_dir,
        Duration::from_secs(args.lock_wait_timeout_secs),
    )
    .await
    .map_err(|err| std::io::Error::other(err.to_string()))?;
    info!(
        root = %repository.root_path().display(),
        max_upload_size = args.max_upload_size,
        "storage ready"
    );
    let repository = Arc::new(repository);
    let upload_config = Arc::new(UploadConfig {
        max_size: args.max_upload_size,
    });
    let metrics = args.metrics.then(|| Arc::new(RequestMetrics::new()));

    let mut app = routes::build_router(repository, upload_config, metrics).layer(
        TraceLayer::new_for_http()
            .make_span_with(|request: &Request<_>| {
                let connect_ip = request
                    .extensions()
                    .get::<ConnectInfo<SocketAddr>>()
                    .map(|ConnectInfo(addr)| addr.ip());
                let client_ip = resolve_client_ip(request.headers(), connect_ip)
                    .map(|ip| ip.to_string())
                    .unwrap_or_else(|| "unknown".to_string());

                info_span!(
                    env!("CARGO_CRATE_NAME"),
                    client_ip,
                    method = ?request.method(),
                    path = ?request.uri().path(),
                )
            })
            .on_request(DefaultOnRequest::new().level(Level::DEBUG))
            .on_response(DefaultOnResponse::new().level(Level::DEBUG)),
    );

    if let Some(cors_layer) = build_cors_layer(args.cors_origins.as_deref()) {
        app = app.layer(cors_layer);
    }

    let host = args
        .host
        .parse::<IpAddr>()
        .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidInput, err.to_string()))?;
    let addr = SocketAddr::new(host, args.port);
    let handle = Handle::new();

    info!("Starting HTTP server at {}", addr);

    let server = axum_server::bind(addr)
        .handle(handle.clone())
        .serve(app.into_make_service_with_connect_info::<SocketAddr>());

    tokio::spawn(shutdown_signal(handle));
    server.await?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal(handle: Handle) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Received termination signal shutting down");
    handle.graceful_shutdown(Some(Duration::from_secs(SHUTDOWN_GRACE_SECS)));
}
