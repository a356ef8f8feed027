//! coproc: run the vision pipeline from the command line.
//!
//! Frames come from image files (`--source`, one per camera port) or
//! from a synthetic moving target (`--synthetic`). The five stages run
//! until the source ends, `--ticks` is reached, or a stage halts; the
//! run diagnostics are then printed.
//!
//! # Usage
//!
//! ```text
//! cargo run --release --bin coproc -- --synthetic --ticks 300 --output-dir frames/
//! cargo run --release --bin coproc -- --source captures/ --json
//! ```

#![allow(clippy::print_stdout, clippy::print_stderr)]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use coproc_pipeline::{
    Collaborators, Device, DisplaySink, FileDevice, MosaicSink, PatternDevice, PipelineConfig,
    vision_tracking,
};
use tracing_subscriber::EnvFilter;

/// Width of the synthetic camera frame.
const SYNTHETIC_WIDTH: u32 = 320;
/// Height of the synthetic camera frame.
const SYNTHETIC_HEIGHT: u32 = 240;

/// Fixed-order vision pipeline for a robot co-processor.
///
/// Captures frames, thresholds them in HSV, traces contours, boxes the
/// target and shows all four stages side by side.
#[derive(Parser)]
#[command(name = "coproc", version)]
struct Cli {
    /// Image file or directory of frames for a camera port. Repeat to
    /// define ports 0, 1, ...
    #[arg(long = "source", value_name = "PATH")]
    sources: Vec<PathBuf>,

    /// Use a synthetic camera showing a moving green square.
    #[arg(long, conflicts_with = "sources")]
    synthetic: bool,

    /// Replay `--source` frames forever instead of stopping at the end.
    #[arg(long = "loop", requires = "sources")]
    looping: bool,

    /// Camera port to open.
    #[arg(long)]
    port: Option<u32>,

    /// Stop after this many ticks.
    #[arg(long, value_parser = clap::builder::RangedU64ValueParser::<u64>::new().range(1..))]
    ticks: Option<u64>,

    /// Display frame rate; 0 disables pacing.
    #[arg(long)]
    fps: Option<u32>,

    /// Write every displayed mosaic to this directory as numbered PNGs.
    #[arg(long, value_name = "DIR")]
    output_dir: Option<PathBuf>,

    /// Full pipeline config as a JSON string.
    ///
    /// Individual flags given alongside it override the matching fields.
    #[arg(long, conflicts_with = "config")]
    config_json: Option<String>,

    /// Read the pipeline config from a JSON file.
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print run diagnostics as JSON instead of a report.
    #[arg(long)]
    json: bool,

    /// More log output (-v debug, -vv trace). `RUST_LOG` takes precedence.
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

/// Build the [`PipelineConfig`] from the config source and flag overrides.
fn config_from_cli(cli: &Cli) -> Result<PipelineConfig, String> {
    let mut config: PipelineConfig = if let Some(ref json) = cli.config_json {
        serde_json::from_str(json).map_err(|e| format!("Error parsing --config-json: {e}"))?
    } else if let Some(ref path) = cli.config {
        let text = std::fs::read_to_string(path)
            .map_err(|e| format!("Error reading {}: {e}", path.display()))?;
        serde_json::from_str(&text).map_err(|e| format!("Error parsing {}: {e}", path.display()))?
    } else {
        PipelineConfig::default()
    };

    if let Some(port) = cli.port {
        config.device.port = port;
    }
    if let Some(ticks) = cli.ticks {
        config.max_ticks = Some(ticks);
    }
    if let Some(fps) = cli.fps {
        config.target_fps = fps;
    }
    Ok(config)
}

fn init_logging(verbose: u8) {
    let default = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut config = match config_from_cli(&cli) {
        Ok(c) => c,
        Err(msg) => {
            eprintln!("{msg}");
            return ExitCode::FAILURE;
        }
    };

    let device: Box<dyn Device> = if cli.sources.is_empty() {
        if !cli.synthetic {
            tracing::info!("no --source given; using the synthetic camera");
        }
        Box::new(PatternDevice::new(SYNTHETIC_WIDTH, SYNTHETIC_HEIGHT))
    } else {
        Box::new(FileDevice::new(cli.sources.clone()).looping(cli.looping))
    };

    // fps 0 means "as fast as possible": present unpaced at the default
    // nominal rate so config validation still holds.
    let paced = config.target_fps > 0;
    if !paced {
        config.target_fps = PipelineConfig::DEFAULT_TARGET_FPS;
    }
    let mut sink = MosaicSink::new();
    if !paced {
        sink = sink.without_pacing();
    }
    if let Some(ref dir) = cli.output_dir {
        sink = sink.with_output_dir(dir);
    }
    let display: Box<dyn DisplaySink> = Box::new(sink);

    let mut app = match vision_tracking(&config, Collaborators::standard(device, display)) {
        Ok(app) => app,
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            return ExitCode::FAILURE;
        }
    };

    if let Err(e) = app.run() {
        eprintln!("Pipeline error: {e}");
        return ExitCode::FAILURE;
    }

    let diagnostics = app.diagnostics();
    if cli.json {
        match serde_json::to_string_pretty(diagnostics) {
            Ok(json) => println!("{json}"),
            Err(e) => {
                eprintln!("Error serializing diagnostics: {e}");
                return ExitCode::FAILURE;
            }
        }
    } else {
        println!("{}", diagnostics.report());
    }

    if diagnostics.init_failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
