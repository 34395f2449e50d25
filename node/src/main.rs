// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use conduit_node::config::NodeConfig;
use conduit_node::pipeline::Pipeline;
use conduit_node::server::build_router;
use conduit_node::shutdown::wait_for_shutdown_signal;
use conduit_node::telemetry::init_telemetry;
use tokio::net::TcpListener;

#[tokio::main]
async fn main() {
    init_telemetry();

    let cfg = match NodeConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };
    tracing::info!("Initializing Conduit node with config: {:?}", cfg);

    let mut pipeline = match Pipeline::open(cfg.clone()).await {
        Ok(p) => p,
        Err(e) => {
            tracing::error!("Startup failed: {}", e);
            std::process::exit(1);
        }
    };
    pipeline.start();

    let app = build_router(pipeline.app_state(), cfg.body_limit);

    let token = pipeline.token();
    let broadcaster = pipeline.broadcaster.clone();
    let signal = async move {
        match wait_for_shutdown_signal().await {
            Ok(name) => tracing::info!("Received {}, shutting down...", name),
            Err(e) => tracing::error!("Signal handler failed: {}; shutting down", e),
        }
        token.cancel();
        // Ends open SSE responses so graceful shutdown can complete.
        broadcaster.close_all();
    };

    tracing::info!("Listening on {}", cfg.bind_addr);
    let listener = TcpListener::bind(cfg.bind_addr).await.expect("failed to bind listener");
    if let Err(e) = axum::serve(listener, app).with_graceful_shutdown(signal).await {
        tracing::error!("Server error: {}", e);
    }

    if let Err(e) = pipeline.shutdown().await {
        tracing::error!("Shutdown error: {}", e);
    }
}
