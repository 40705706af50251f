mod models;
mod handlers;
mod routes;
mod docs;
mod websocket;
mod config;
mod clients;
mod services;
mod ws;

use std::panic;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clients::runner_client::RunnerClient;
use config::Config;
use routes::create_routes;
use services::execution_service::ExecutionService;
use services::headcount_service::{HeadcountPublisher, HeadcountSink, RedisHeadcountSink};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use ws::registry::RoomRegistry;

/// Shared state of the relay
pub struct AppState {
    pub config: Config,
    pub registry: Arc<RoomRegistry>,
    pub execution: ExecutionService,
    /// Whether the last headcount publish succeeded
    pub redis_healthy: Arc<AtomicBool>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() {

    // Set panic hook for better error messages
    panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
    }));

    // Initialize tracing
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            "codepad_collab=debug,tower_http=debug,axum::rejection=trace,info".into()
        }))
        .init();

    info!("Starting server...");

    // Load configuration
    let config = Config::load().unwrap_or_else(|e| {
        error!("Failed to load configuration: {}", e);
        warn!("Using default configuration");
        Config::default()
    });

    if config.is_production() && config.cors_origins.is_none() {
        warn!("No CORS origins configured in production - accepting any origin");
    }

    let runner = match RunnerClient::new(config.runner_url.clone(), config.execution_timeout()) {
        Ok(runner) => runner,
        Err(e) => {
            error!("Failed to create execution client: {}", e);
            return;
        }
    };
    let execution = ExecutionService::new(
        Arc::new(runner),
        config.execution_timeout(),
        config.execution_inner_timeout_ms,
    );

    let registry = Arc::new(RoomRegistry::new(config.broadcast_capacity, config.seed_content.clone()));
    let redis_healthy = Arc::new(AtomicBool::new(false));

    // Headcount publishing is optional; without redis the relay runs standalone.
    let sink: Option<Arc<dyn HeadcountSink>> = match config.redis_url.as_deref() {
        Some(url) => match RedisHeadcountSink::new(url, config.headcount_channel.clone()) {
            Ok(sink) => {
                info!("Publishing headcount to redis channel {}", config.headcount_channel);
                Some(Arc::new(sink))
            }
            Err(e) => {
                error!("Invalid redis URL: {}", e);
                None
            }
        },
        None => {
            warn!("No redis URL configured - headcount will not be published");
            None
        }
    };
    let publisher = HeadcountPublisher::new(sink, redis_healthy.clone());
    tokio::spawn(publisher.run(registry.clone(), config.headcount_interval()));

    let address = config.server_address();
    let app_state = Arc::new(AppState {
        config,
        registry,
        execution,
        redis_healthy,
    });
    let app_routes = create_routes(app_state);

    let listener = match tokio::net::TcpListener::bind(&address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind to {}: {}", address, e);
            return;
        }
    };

    info!("🚀 Server running on http://{}", address);
    info!("📡 WebSocket rooms available at ws://{}/<room>", address);
    info!("📚 Swagger UI available at http://{}/swagger", address);

    if let Err(e) = axum::serve(listener, app_routes)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!("Server error: {}", e);
    }
    info!("Server stopped");
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
