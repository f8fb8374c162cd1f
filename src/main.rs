//! s3gate - S3 wire-protocol compatibility layer

use clap::Parser;
use s3gate::api::handlers::AppState;
use s3gate::api::router;
use s3gate::config::Config;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::cors::CorsLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// s3gate - S3-compatible gateway with signing, ACLs and multipart uploads
#[derive(Parser, Debug)]
#[command(name = "s3gate")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<String>,

    /// Listen address (overrides config)
    #[arg(short, long, value_name = "ADDR")]
    listen: Option<String>,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(ref addr) = cli.listen {
        config.listen_addr = addr.parse()?;
    }

    // Initialize tracing. RUST_LOG wins over the configured level.
    let log_level = if cli.verbose {
        "s3gate=trace,tower_http=trace".to_string()
    } else {
        config.log_level.clone()
    };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    config.validate()?;

    info!("Starting s3gate S3 server");
    info!("  Listen address: {}", config.listen_addr);
    info!("  Region: {}", config.region);
    info!(
        "  Max object size: {} MB",
        config.max_object_size / 1024 / 1024
    );
    info!("  Presign default expiry: {}", config.presign_default_expiry);
    info!("  Credentials: {}", config.credentials.len());
    if config.credentials.is_empty() {
        warn!("  No credentials configured, only anonymous requests can succeed");
    }
    if config.allow_anonymous {
        info!("  Anonymous access: enabled (public grants only)");
    }

    let listen_addr = config.listen_addr;
    let state = Arc::new(AppState::in_memory(config)?);
    let app = router(state).layer(CorsLayer::permissive());

    // Start server with graceful shutdown
    let listener = TcpListener::bind(&listen_addr).await?;
    info!("s3gate listening on http://{}", listen_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Handle shutdown signals (SIGINT, SIGTERM)
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            warn!("Failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            warn!("Received Ctrl+C, initiating graceful shutdown...");
        }
        _ = terminate => {
            warn!("Received SIGTERM, initiating graceful shutdown...");
        }
    }
}
