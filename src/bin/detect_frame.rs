//! detect_frame - run a detector on one image file.
//!
//! Prints the candidate boxes, car count and decision as JSON. The decision
//! is unsmoothed since there is no history for a single frame.

use anyhow::{Context, Result};
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;

use traffic_gate::recorder::annotate;
use traffic_gate::{BackendRegistry, Engine, Frame, ServiceConfig};

#[derive(Parser, Debug)]
#[command(author, version, about = "Count toy cars in a single image")]
struct Args {
    /// Image to analyze (PNG or JPEG).
    image: PathBuf,

    /// Detector backend name; defaults to the configured detector.
    #[arg(long)]
    detector: Option<String>,

    /// Write the annotated frame to this path.
    #[arg(long)]
    annotated: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    let args = Args::parse();

    let config = ServiceConfig::load()?;
    let registry = BackendRegistry::for_service(&config)?;
    let detector = registry.resolve(args.detector.as_deref())?;
    let engine = Engine::new(detector, config.engine.clone())?;

    let frame = Frame::open(&args.image)?;
    let analysis = engine.analyze(&frame)?;

    if let Some(path) = &args.annotated {
        annotate(&frame, &analysis)
            .save(path)
            .with_context(|| format!("failed to write {}", path.display()))?;
        log::info!("annotated frame written to {}", path.display());
    }

    let report = json!({
        "image": args.image.display().to_string(),
        "width": frame.width(),
        "height": frame.height(),
        "detector": engine.detector_name(),
        "green_range": config.engine.traffic_rule().describe(),
        "cars": analysis.cars,
        "decision": analysis.raw_decision,
        "boxes": analysis.candidates,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
