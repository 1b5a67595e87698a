//! traffic_gated - HTTP service for the traffic gate engine
//!
//! This daemon:
//! 1. Loads `ServiceConfig` (TOML file from TRAFFIC_GATE_CONFIG, then env)
//! 2. Builds the configured detector backend
//! 3. Serves the analyze/reset/config API until Ctrl-C

use anyhow::{anyhow, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::mpsc;
use std::sync::Arc;

use traffic_gate::{
    api::{ApiConfig, ApiServer},
    BackendRegistry, Engine, Recorder, ServiceConfig,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Serve toy-car counts as a GREEN/RED traffic signal")]
struct Args {
    /// Listen address; overrides the config file and TRAFFIC_GATE_ADDR.
    #[arg(long)]
    addr: Option<String>,

    /// Detector backend name; overrides the config file and TRAFFIC_GATE_DETECTOR.
    #[arg(long)]
    detector: Option<String>,

    /// Save annotated frames and a detection log into this directory.
    #[arg(long)]
    logs_dir: Option<PathBuf>,

    /// Run one inference on a blank input before serving.
    #[arg(long)]
    warm_up: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = ServiceConfig::load()?;
    if let Some(addr) = args.addr {
        config.addr = addr;
    }
    if let Some(detector) = args.detector {
        config.detector = detector.trim().to_lowercase();
    }
    if let Some(dir) = args.logs_dir {
        config.logs_dir = Some(dir);
    }

    let registry = BackendRegistry::for_service(&config)?;
    let detector = registry.resolve(None)?;
    if args.warm_up {
        detector.warm_up()?;
    }
    let engine = Arc::new(Engine::new(detector, config.engine.clone())?);
    log::info!(
        "detector '{}' ready (available: {}); green when {}",
        engine.detector_name(),
        registry.list().join(", "),
        config.engine.traffic_rule().describe()
    );

    let mut server = ApiServer::new(
        ApiConfig {
            addr: config.addr.clone(),
        },
        engine,
    );
    if let Some(dir) = &config.logs_dir {
        let recorder = Recorder::new(dir)?;
        log::info!("recording analyzed frames to {}", recorder.dir().display());
        server = server.with_recorder(recorder);
    }
    let api_handle = server.spawn()?;
    log::info!("traffic api listening on {}", api_handle.addr);

    let (tx, rx) = mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {}", e))?;

    log::info!("traffic_gated waiting for shutdown signal (Ctrl-C)...");
    let _ = rx.recv();
    log::info!("shutdown signal received, stopping API server...");
    api_handle.stop()?;

    Ok(())
}
