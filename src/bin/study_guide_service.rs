//! Study guide service.
//!
//! Serves the catalog, premium, and admin APIs over PostgreSQL.
//!
//! ## Environment
//!
//! | Variable | Meaning |
//! |----------|---------|
//! | `DATABASE_URL` | PostgreSQL connection string (required) |
//! | `SESSION_SECRET` | HMAC key for admin sessions; admin login is off without it |
//! | `GEMINI_API_KEY`, `GROQ_API_KEY` | Refinement provider keys |
//! | `OCR_ENGINE_URL` | OCR engine base URL |
//! | `HOST`, `PORT` | Bind address (`0.0.0.0:8001`) |
//! | `RUST_LOG` | Filter directives |
//! | `LOG_FORMAT` | `json` (default) or `pretty` |
//!
//! ```bash
//! DATABASE_URL=postgresql://... SESSION_SECRET=... cargo run --bin study_guide_service --features service
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use axum::{extract::Request, middleware::Next, response::Response, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn, Instrument};
use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

use study_guide_kernel::service::{create_router, metrics_middleware, ServiceState};
use study_guide_kernel::{KernelConfig, PostgresContentStore};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_FILTER: &str =
    "study_guide_service=info,study_guide_kernel=info,study_guide=info,tower_http=info,sqlx=warn";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    fn from_env() -> Self {
        match std::env::var("LOG_FORMAT").as_deref() {
            Ok("pretty") => Self::Pretty,
            _ => Self::Json,
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let registry = tracing_subscriber::registry().with(filter);
    let layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE);

    match format {
        LogFormat::Pretty => registry.with(layer).init(),
        LogFormat::Json => registry
            .with(layer.json().with_current_span(true).flatten_event(true))
            .init(),
    }
}

/// Tag each request with a correlation id and log one access line for it.
async fn access_log(request: Request, next: Next) -> Response {
    let started = Instant::now();
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .map(str::to_owned)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    let method = request.method().to_string();
    let path = request.uri().path().to_owned();

    let span = tracing::info_span!("request", request_id = %request_id, method = %method, path = %path);
    let response = next.run(request).instrument(span).await;

    info!(
        target: "study_guide_service::access",
        request_id = %request_id,
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "request served"
    );
    response
}

fn warn_on_missing_settings(config: &KernelConfig) {
    if config.session.is_none() {
        warn!("SESSION_SECRET not set. Admin login is disabled.");
    }
    if config.ocr.base_url.is_none() {
        warn!("OCR_ENGINE_URL not set. Image ingestion will fail.");
    }
    for (name, settings) in [("Gemini", &config.refinement.gemini), ("Groq", &config.refinement.groq)] {
        if settings.api_key.is_none() {
            warn!(provider = name, "Refinement provider has no API key");
        }
    }
}

async fn connect_store() -> Result<PostgresContentStore, Box<dyn std::error::Error>> {
    let started = Instant::now();
    let store = match tokio::time::timeout(CONNECT_TIMEOUT, PostgresContentStore::from_env()).await {
        Ok(Ok(store)) => store,
        Ok(Err(e)) => {
            error!(error = %e, "Database connection failed");
            return Err(e.into());
        }
        Err(_) => {
            error!(timeout_secs = CONNECT_TIMEOUT.as_secs(), "Database connection timed out");
            return Err("database connection timed out".into());
        }
    };
    store.migrate().await?;

    let pool = store.pool_stats();
    info!(
        elapsed_ms = started.elapsed().as_millis() as u64,
        pool_size = pool.size,
        pool_idle = pool.idle,
        pool_max = pool.max,
        "Database ready"
    );
    Ok(store)
}

fn build_app(state: ServiceState<PostgresContentStore>) -> Router {
    create_router(state)
        .layer(axum::middleware::from_fn(metrics_middleware))
        .layer(axum::middleware::from_fn(access_log))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

async fn shutdown_signal() {
    let interrupt = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "Cannot listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "Cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => info!(signal = "SIGINT", "Shutting down"),
        _ = terminate => info!(signal = "SIGTERM", "Shutting down"),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing(LogFormat::from_env());
    info!(
        version = env!("CARGO_PKG_VERSION"),
        build_sha = option_env!("BUILD_SHA").unwrap_or("dev"),
        "Starting study guide service"
    );

    let config = KernelConfig::from_env();
    warn_on_missing_settings(&config);

    let store = Arc::new(connect_store().await?);
    let app = build_app(ServiceState::from_config(store, &config)?);

    let addr: SocketAddr = config.server.bind_address().parse()?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(address = %addr, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Stopped");
    Ok(())
}
