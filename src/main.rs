use std::sync::Arc;

use tokio::signal;
use tracing::info;
use warp::Filter;

use huddle::health::HealthReporter;
use huddle::metrics::register_metrics;
use huddle::{config, gateway, logging, SignalingCore};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Validate environment variables before starting the server
    let cfg = config::validate_env().unwrap_or_else(|e| {
        eprintln!("Environment validation failed: {}", e);
        std::process::exit(1);
    });

    // Initialize tracing with validated RUST_LOG
    logging::init(&cfg.rust_log);

    // Initialize Metrics
    register_metrics();

    // Start Metrics Server
    let metrics_port = cfg.metrics_port;
    let metrics_handle = tokio::spawn(async move {
        let metrics_route = warp::path("metrics").and(warp::get()).map(|| {
            use prometheus::Encoder;
            let encoder = prometheus::TextEncoder::new();
            let mut buffer = vec![];
            let metric_families = prometheus::gather();
            encoder.encode(&metric_families, &mut buffer).unwrap();
            String::from_utf8(buffer).unwrap()
        });

        info!("Metrics server listening on 0.0.0.0:{}", metrics_port);
        warp::serve(metrics_route)
            .run(([0, 0, 0, 0], metrics_port))
            .await;
    });

    let signal_port = cfg.signal_port;
    let core = SignalingCore::new(Arc::new(cfg));
    let health = HealthReporter::new();
    let routes = gateway::routes(Arc::clone(&core), &health);

    info!("Signaling server listening on 0.0.0.0:{}", signal_port);

    let shutdown_health = health.clone();
    let (_addr, server) = warp::serve(routes).bind_with_graceful_shutdown(
        ([0, 0, 0, 0], signal_port),
        async move {
            signal::ctrl_c()
                .await
                .expect("Failed to install CTRL+C signal handler");
            info!("Received shutdown signal (SIGINT/SIGTERM)");
            shutdown_health.set_serving(false);
        },
    );
    server.await;

    // Shutdown sequence: rooms broadcast roomClosed, then sockets drain.
    info!("Shutting down - closing active rooms...");
    core.registry.shutdown().await;
    info!("Shutdown complete");

    // Abort metrics server
    metrics_handle.abort();

    Ok(())
}
