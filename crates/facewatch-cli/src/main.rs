mod config;
mod console;
mod presenter;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use config::Config;
use facewatch_core::{decode_image, BoundingBox, FaceAnalyzer, OnnxAnalyzer, Session};
use facewatch_hw::V4lCamera;
use presenter::TerminalPresenter;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "facewatch", about = "Live face recognition from a webcam")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load models and read commands from stdin
    Run {
        /// Register a face before starting (repeatable)
        #[arg(short, long = "register", value_name = "NAME=IMAGE", value_parser = console::parse_registration)]
        registrations: Vec<(String, PathBuf)>,
        /// Save the annotated frame to this PNG after every iteration
        #[arg(long, value_name = "PATH")]
        snapshot: Option<PathBuf>,
        /// Start recognition immediately
        #[arg(long)]
        autostart: bool,
    },
    /// Print the faces found in an image as JSON
    Detect {
        image: PathBuf,
    },
    /// List V4L2 capture devices
    Devices,
}

#[derive(Serialize)]
struct DetectionReport {
    #[serde(flatten)]
    bbox: BoundingBox,
    descriptor_len: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Run {
            registrations,
            snapshot,
            autostart,
        } => run(config, registrations, snapshot, autostart).await,
        Commands::Detect { image } => detect(&config, &image),
        Commands::Devices => {
            let devices = V4lCamera::list_devices();
            if devices.is_empty() {
                println!("No V4L2 capture devices found");
            }
            for dev in devices {
                println!("{}  {} ({}, {})", dev.path, dev.name, dev.driver, dev.bus);
            }
            Ok(())
        }
    }
}

async fn run(
    config: Config,
    registrations: Vec<(String, PathBuf)>,
    snapshot: Option<PathBuf>,
    autostart: bool,
) -> Result<()> {
    tracing::info!(
        camera = %config.camera_device,
        model_dir = %config.model_dir.display(),
        threshold = config.match_threshold,
        "facewatch starting"
    );

    let presenter = Arc::new(TerminalPresenter::stdout(snapshot));
    let camera = Arc::new(V4lCamera::new(config.camera_device.clone()));
    let mut session = Session::new(camera, presenter.clone(), config.settings());

    let model_dir = config.model_dir.clone();
    session
        .load_analyzer(|| OnnxAnalyzer::load(&model_dir))
        .context("model load failed; set FACEWATCH_MODEL_DIR to the directory holding the ONNX models")?;

    console::register_all(&session, &registrations).await;
    if autostart {
        // Failures are reported by the session; the console stays usable.
        let _ = session.start_recognition();
    }

    let result = console::run(&session, &presenter).await;
    session.shutdown();
    result
}

fn detect(config: &Config, image: &std::path::Path) -> Result<()> {
    let bytes =
        std::fs::read(image).with_context(|| format!("failed to read {}", image.display()))?;
    let frame = decode_image(&bytes).with_context(|| format!("failed to decode {}", image.display()))?;

    let mut analyzer = OnnxAnalyzer::load(&config.model_dir)?;
    let report: Vec<DetectionReport> = analyzer
        .detect_all(&frame)?
        .into_iter()
        .map(|d| DetectionReport {
            bbox: d.bbox,
            descriptor_len: d.descriptor.len(),
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
