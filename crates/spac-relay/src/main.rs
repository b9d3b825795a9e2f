use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use spac_config::{Config, load_config, validate_config};
use spac_core::event::FrameCodec;
use spac_relay::{SessionMux, serve};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "spac-relay", version, about = "HTTP-tunnelled relay server for spac")]
struct Args {
    /// Config file path (json/yaml/toml)
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,
    /// Override relay listen address, e.g. 0.0.0.0:48101
    #[arg(long)]
    listen: Option<String>,
    /// Override log level (trace/debug/info/warn/error)
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let mut config = if args.config.exists() {
        load_config(&args.config)?
    } else {
        Config::default()
    };
    if let Some(listen) = args.listen {
        config.relay.listen = listen;
    }
    if let Some(level) = args.log_level {
        config.logging.level = Some(level);
    }
    validate_config(&config)?;

    let level = config.logging.level.as_deref().unwrap_or("info");
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown signal received");
        }
        signal.cancel();
    });

    let mux = Arc::new(SessionMux::new(Arc::new(FrameCodec)));
    let listener = TcpListener::bind(&config.relay.listen).await?;
    serve(listener, mux, shutdown).await?;
    Ok(())
}
