//! detect_server - demo detection HTTP service
//!
//! This daemon:
//! 1. Loads configuration (file + DETECT_* environment)
//! 2. Builds the image acquisition resolver for the configured stream backend
//! 3. Serves `/`, `/detect` and `/test_rtsp` until Ctrl-C

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;

use stream_detect::{
    api::{ApiConfig, ApiServer},
    config::ServerConfig,
    resolver_from_config,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Demo detection service with multi-source image acquisition")]
struct Args {
    /// Path to a JSON or TOML config file.
    #[arg(long, env = "DETECT_CONFIG")]
    config: Option<PathBuf>,

    /// Listen address; overrides the config file and DETECT_ADDR.
    #[arg(long)]
    addr: Option<String>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = ServerConfig::load_from(args.config.as_deref())?;
    if let Some(addr) = args.addr {
        config.addr = addr;
    }

    let resolver = resolver_from_config(&config)?;
    log::info!(
        "stream backend: {}, http timeout: {:?}, stream timeout: {:?}",
        resolver.stream_backend_name(),
        config.acquire.http_timeout,
        config.acquire.stream_timeout
    );

    let api_config = ApiConfig {
        addr: config.addr.clone(),
        max_request_bytes: config.max_request_bytes,
    };
    let api_handle = ApiServer::new(api_config, resolver).spawn()?;
    log::info!("detection api listening on {}", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;

    log::info!("detect_server waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}
