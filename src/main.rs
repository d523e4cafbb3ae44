//! Submarine combat server entry point

use std::future::IntoFuture;
use std::net::SocketAddr;

use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use subsim_server::app::AppState;
use subsim_server::config::Config;
use subsim_server::game::{GameConfig, Rules, Terrain, TickMode};
use subsim_server::http::build_router;
use subsim_server::util::time::init_server_time;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = Config::from_env()?;
    init_tracing(&config.log_level);
    init_server_time();

    let rules = Rules::from_env()?;
    let terrain = Terrain::arena(
        config.map_width,
        config.map_height,
        config.map_scale,
        config.units_per_team,
    )
    .context("building arena")?;
    let game = GameConfig::new(terrain, rules);

    info!("Starting submarine combat server");
    info!(
        teams = config.teams,
        units_per_team = config.units_per_team,
        stations_per_unit = config.stations_per_unit,
        seed = config.match_seed,
        "Match configuration"
    );

    let addr: SocketAddr = config.server_addr;
    let (state, mut failures) = AppState::new(config, game, TickMode::Realtime);
    let session = state.session.clone();
    let router = build_router(state);

    let listener = TcpListener::bind(addr).await?;
    info!("Server listening on {}", addr);
    info!("Health check: http://{}/health", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    let server = axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .into_future();

    let result = tokio::select! {
        served = server => served.map_err(anyhow::Error::from),
        Some(err) = failures.recv() => {
            error!(error = %err, "Simulation engine failed");
            Err(anyhow::Error::from(err).context("simulation engine failed"))
        }
    };

    session.shutdown();
    info!("Server shutdown complete");
    result
}

/// Initialize tracing/logging
fn init_tracing(log_level: &str) {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, starting graceful shutdown");
        }
        _ = terminate => {
            info!("Received terminate signal, starting graceful shutdown");
        }
    }
}
