use axum::{Json, Router, extract::State, http::StatusCode, response::IntoResponse, routing::get};
use cellmap_server::config::Config;
use cellmap_server::{AppServices, build_router};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use serde::Serialize;
use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tower::ServiceBuilder;
use tower_http::compression::CompressionLayer;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::{ServeDir, ServeFile};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Application start time for uptime calculation
static START_TIME: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();

#[derive(Clone)]
struct HealthState {
    services: AppServices,
    prometheus: Option<PrometheusHandle>,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    data_dir: &'static str,
    experiments: usize,
    cached_experiments: usize,
    uptime_seconds: u64,
}

fn uptime_seconds() -> u64 {
    START_TIME.get().map(|t| t.elapsed().as_secs()).unwrap_or(0)
}

async fn health(State(state): State<HealthState>) -> (StatusCode, Json<HealthResponse>) {
    let registry = &state.services.registry;
    let data_ready = registry.data_dir().is_dir();
    let experiments = if data_ready { registry.list().len() } else { 0 };

    let http_status = if data_ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        http_status,
        Json(HealthResponse {
            status: if data_ready { "healthy" } else { "degraded" },
            version: env!("CARGO_PKG_VERSION"),
            data_dir: if data_ready { "ready" } else { "unavailable" },
            experiments,
            cached_experiments: registry.cached_count(),
            uptime_seconds: uptime_seconds(),
        }),
    )
}

/// Endpoint to expose metrics in Prometheus format
async fn prometheus_metrics(State(state): State<HealthState>) -> impl IntoResponse {
    match &state.prometheus {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed".to_string(),
        ),
    }
}

/// Ensure a directory exists, creating it if necessary.
/// Returns true if the directory is empty.
fn ensure_directory(path: &Path, name: &str) -> std::io::Result<bool> {
    if !path.exists() {
        std::fs::create_dir_all(path)?;
        info!("Created {} directory: {:?}", name, path);
        Ok(true)
    } else if path.is_dir() {
        Ok(path.read_dir()?.next().is_none())
    } else {
        Err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            format!("{} path {:?} exists but is not a directory", name, path),
        ))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    START_TIME.set(Instant::now()).ok();

    // Must be installed before any metric is recorded
    let prometheus = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            eprintln!("Failed to install Prometheus recorder: {}", e);
            None
        }
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cellmap=debug,cellmap_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    info!(
        "Loaded configuration: host={}, port={}, data_dir={:?}, tile_size={}",
        config.host, config.port, config.data_dir, config.tile_size
    );

    match ensure_directory(&config.data_dir, "data") {
        Ok(true) => warn!(
            "Data directory {:?} is empty - run cellmap-build to publish experiments",
            config.data_dir
        ),
        Ok(false) => {}
        Err(e) => warn!("Failed to create data directory {:?}: {}", config.data_dir, e),
    }

    let services = AppServices::from_config(&config);
    let health_state = HealthState {
        services: services.clone(),
        prometheus,
    };

    // Periodic update of gauge metrics
    let registry = Arc::clone(&services.registry);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(5));
        loop {
            interval.tick().await;
            metrics::gauge!("cellmap_experiments_cached").set(registry.cached_count() as f64);
            metrics::gauge!("cellmap_uptime_seconds").set(uptime_seconds() as f64);
        }
    });

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = Router::new()
        .route("/health", get(health))
        .route("/metrics/prometheus", get(prometheus_metrics))
        .with_state(health_state)
        .merge(build_router(services))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    let app = match &config.static_files_dir {
        Some(static_dir) if static_dir.exists() => {
            info!("Serving static files from: {:?}", static_dir);
            let serve_dir = ServeDir::new(static_dir).not_found_service(ServeFile::new(static_dir.join("index.html")));
            let static_service = ServiceBuilder::new()
                .layer(CompressionLayer::new())
                .service(serve_dir);
            app.fallback_service(static_service)
        }
        Some(static_dir) => {
            warn!(
                "Static files directory not found: {:?} - static file serving disabled",
                static_dir
            );
            app
        }
        None => {
            info!("Static file serving disabled (STATIC_FILES_DIR not set)");
            app
        }
    };

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("CellMap server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
