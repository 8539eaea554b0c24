//! objectai-sink - detection log sink and UI host
//!
//! Serves `POST /api/log` (appends JSON lines), the `POST /api/detect`
//! placeholder and the static UI bundle until Ctrl-C.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;

use objectai::sink::SinkServer;
use objectai::OverlayConfig;

#[derive(Parser, Debug)]
#[command(author, version, about = "Detection log sink for the objectai overlay")]
struct Args {
    /// Listen address (default from config, OBJECTAI_SINK_ADDR or PORT).
    #[arg(long)]
    addr: Option<String>,
    /// File that receives one JSON line per logged batch.
    #[arg(long)]
    log_path: Option<PathBuf>,
    /// Directory with a prebuilt UI bundle.
    #[arg(long)]
    static_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = OverlayConfig::load()?;
    if let Some(addr) = args.addr {
        cfg.sink.addr = addr;
    }
    if let Some(path) = args.log_path {
        cfg.sink.log_path = path;
    }
    if let Some(dir) = args.static_dir {
        cfg.sink.static_dir = dir;
    }
    cfg.validate()?;

    let handle = SinkServer::new(cfg.sink.clone()).spawn()?;
    log::info!("Backend listening on http://{}", handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .context("install Ctrl-C handler")?;

    log::info!("objectai-sink waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping sink...");
    handle.stop()?;
    Ok(())
}
