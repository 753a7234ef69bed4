use std::process::exit;

use tracing::{error, info};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = stream_engine::cli::parse_args();

    let config = match stream_engine::config::load_config_from_path(&args.config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load configuration: {err}");
            exit(1);
        }
    };

    let runtime = tokio::runtime::Runtime::new().expect("failed to start tokio runtime");
    runtime.block_on(run(config));
}

async fn run(config: stream_engine::config::EngineConfig) {
    info!(version = env!("CARGO_PKG_VERSION"), "stream engine starting");

    let bind = config.server_bind.clone();
    let engine = match stream_engine::Engine::build(config) {
        Ok(engine) => engine,
        Err(err) => {
            eprintln!("failed to build engine: {err}");
            exit(1);
        }
    };

    if let Err(err) = engine.start().await {
        error!(error = %err, "stream core failed to start");
        exit(1);
    }

    let router = engine.router();
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .unwrap_or_else(|err| panic!("failed to bind {bind}: {err}"));
    info!(addr = %bind, "stream engine listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");

    engine.core.stop();
    engine.active_users.stop_periodic_refresh();
    info!("stream engine shut down gracefully");
}

async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => { info!("received Ctrl+C, shutting down"); },
        _ = terminate => { info!("received SIGTERM, shutting down"); },
    }
}
