use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use qbridge_rs::auth::{CachingAuthProvider, OidcTokenRefresher};
use qbridge_rs::config::{load_from_env, AppConfig};
use qbridge_rs::error::GatewayError;
use qbridge_rs::observability::init_tracing;
use qbridge_rs::routing::dispatch::{dispatch_request, normalize_base_path};
use qbridge_rs::state::AppState;
use qbridge_rs::transport::UpstreamClient;
use tokio_util::sync::CancellationToken;

fn main() {
    let config = load_from_env().unwrap_or_else(|e| {
        eprintln!("Failed to load configuration: {e}");
        eprintln!("Copy 'config.example.yaml' to 'config.yaml' or set QBRIDGE_CONFIG.");
        std::process::exit(1);
    });

    init_tracing(&config.features.log_level);
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_io()
        .enable_time()
        .build()
        .unwrap_or_else(|e| {
            eprintln!("Failed to initialize Tokio runtime: {e}");
            std::process::exit(1);
        });

    runtime.block_on(async move {
        if let Err(err) = run(config).await {
            eprintln!("{err}");
            std::process::exit(1);
        }
    });
}

async fn run(config: AppConfig) -> Result<(), GatewayError> {
    let host = config.server.host.clone();
    let port = config.server.port;
    let base_path = normalize_base_path(&config.server.base_path);

    let upstream = UpstreamClient::new(&config.server, &config.upstream)?;
    let refresher = OidcTokenRefresher::new(&config.auth, &config.server)?;
    let auth = Arc::new(CachingAuthProvider::new(refresher));
    let shutdown = CancellationToken::new();
    let _refresh_loop = Arc::clone(&auth).spawn_refresh_loop(
        Duration::from_secs(config.auth.refresh_interval_secs),
        shutdown.child_token(),
    );

    let state = Arc::new(AppState::new(config, upstream, auth));
    let dispatch_base_path = Arc::<str>::from(base_path.clone());

    tracing::info!(
        "qbridge-rs starting on {}:{} with base_path='{}'",
        host,
        port,
        base_path
    );

    let listener = tokio::net::TcpListener::bind(format!("{host}:{port}"))
        .await
        .map_err(|err| GatewayError::Config(format!("Failed to bind to {host}:{port}: {err}")))?;
    tracing::info!(
        upstream = %state.upstream.url(),
        "qbridge-rs is ready to accept connections"
    );

    serve_accept_loop(listener, AutoBuilder::new(TokioExecutor::new()), state, dispatch_base_path)
        .await;
    shutdown.cancel();
    Ok(())
}

async fn serve_accept_loop(
    listener: tokio::net::TcpListener,
    conn_builder: AutoBuilder<TokioExecutor>,
    dispatch_state: Arc<AppState>,
    dispatch_base_path: Arc<str>,
) {
    loop {
        let (stream, remote_addr) = match listener.accept().await {
            Ok((stream, remote_addr)) => (stream, remote_addr),
            Err(err) => {
                tracing::warn!("accept error: {err}");
                continue;
            }
        };

        if let Err(err) = stream.set_nodelay(true) {
            tracing::debug!("failed to enable TCP_NODELAY for {remote_addr}: {err}");
        }

        let io = TokioIo::new(stream);
        let conn_builder = conn_builder.clone();
        let request_state = Arc::clone(&dispatch_state);
        let request_base_path = Arc::clone(&dispatch_base_path);
        let hyper_service = service_fn(move |request: Request<Incoming>| {
            dispatch_request(
                Arc::clone(&request_state),
                Arc::clone(&request_base_path),
                request.map(Body::new),
            )
        });

        tokio::spawn(async move {
            if let Err(err) = conn_builder.serve_connection(io, hyper_service).await {
                tracing::debug!("failed to serve connection from {remote_addr}: {err:#}");
            }
        });
    }
}
