//! live-ocr - Live text recognition over a frame stream
//!
//! Captures frames, recognizes text on the freshest frame whenever the
//! recognition engine is free, and keeps the display showing the newest text.

mod app;
mod capture;
mod config;
mod pipeline;
mod sink;
mod vision;

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{info, Level};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use crate::app::{LiveOcrApp, PipelineSettings};
use crate::capture::ImageDirSource;
use crate::config::{AppConfig, OutputKind};
use crate::vision::CommandEngine;

/// live-ocr - Live text recognition over a frame stream
#[derive(Parser, Debug)]
#[command(name = "live-ocr")]
#[command(about = "Recognize text on a live frame stream and show the newest result")]
struct Args {
    /// Configuration file (defaults to the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Write the effective configuration to the config path and exit
    #[arg(long)]
    init_config: bool,

    /// Directory of images to replay as frames
    #[arg(short, long)]
    source: Option<PathBuf>,

    /// Maximum capture frames per second
    #[arg(long)]
    fps: Option<u32>,

    /// Replay the source once instead of looping
    #[arg(long)]
    once: bool,

    /// Maximum recognitions in flight
    #[arg(short = 'k', long)]
    max_in_flight: Option<usize>,

    /// Per-job recognition timeout in milliseconds
    #[arg(long)]
    timeout_ms: Option<u64>,

    /// OCR program to run for each frame
    #[arg(long)]
    engine: Option<String>,

    /// Argument for the OCR program (repeatable, replaces configured args)
    #[arg(long = "engine-arg", allow_hyphen_values = true)]
    engine_args: Vec<String>,

    /// Where published text goes
    #[arg(short, long, value_enum)]
    output: Option<OutputKind>,

    /// Output file for the file and json-lines sinks
    #[arg(long)]
    output_path: Option<PathBuf>,

    /// Stop after this many seconds
    #[arg(long)]
    duration_secs: Option<u64>,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    /// Apply command-line overrides on top of the loaded configuration
    fn apply(&self, config: &mut AppConfig) {
        if let Some(source) = &self.source {
            config.capture.source_dir = Some(source.clone());
        }
        if let Some(fps) = self.fps {
            config.capture.max_fps = fps;
        }
        if self.once {
            config.capture.loop_frames = false;
        }
        if let Some(k) = self.max_in_flight {
            config.recognition.max_in_flight = k;
        }
        if let Some(timeout) = self.timeout_ms {
            config.recognition.job_timeout_ms = Some(timeout);
        }
        if let Some(engine) = &self.engine {
            config.recognition.command = engine.clone();
        }
        if !self.engine_args.is_empty() {
            config.recognition.args = self.engine_args.clone();
        }
        if let Some(output) = self.output {
            config.output.sink = output;
        }
        if let Some(path) = &self.output_path {
            config.output.path = Some(path.clone());
        }
    }
}

fn init_logging(verbose: u8) -> Result<()> {
    let level = match verbose {
        0 => Level::INFO,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };

    // Logs go to stderr; stdout belongs to the text sink
    let builder = FmtSubscriber::builder().with_writer(std::io::stderr);
    if std::env::var_os("RUST_LOG").is_some() {
        let subscriber = builder.with_env_filter(EnvFilter::from_default_env()).finish();
        tracing::subscriber::set_global_default(subscriber)?;
    } else {
        let subscriber = builder.with_max_level(level).finish();
        tracing::subscriber::set_global_default(subscriber)?;
    }
    Ok(())
}

/// Load configuration from the given or default path, falling back to defaults
fn load_or_default_config(path: Option<&PathBuf>) -> Result<AppConfig> {
    if let Some(path) = path {
        return config::load_config(path);
    }

    if let Ok(path) = config::default_config_path() {
        if path.exists() {
            let config = config::load_config(&path)?;
            info!("Loaded configuration from {:?}", path);
            return Ok(config);
        }
    }
    info!("Using default configuration");
    Ok(AppConfig::default())
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose)?;

    let fresh_init = args.init_config && args.config.as_ref().is_some_and(|p| !p.exists());
    let mut config = if fresh_init {
        AppConfig::default()
    } else {
        load_or_default_config(args.config.as_ref())?
    };
    args.apply(&mut config);

    if args.init_config {
        let path = match &args.config {
            Some(path) => path.clone(),
            None => config::default_config_path()?,
        };
        config::save_config(&config, &path)?;
        println!("Wrote configuration to {}", path.display());
        return Ok(());
    }

    let source_dir = config
        .capture
        .source_dir
        .clone()
        .context("No frame source configured (use --source or capture.source_dir)")?;
    let source = ImageDirSource::new(source_dir, config.capture.loop_frames);
    let engine = Arc::new(CommandEngine::new(config.recognition.engine_config()));
    let sink = sink::build_sink(&config.output)?;

    let settings = PipelineSettings {
        capture: config.capture.capture_config(),
        dispatcher: config.recognition.dispatcher_config(),
        line_separator: config.output.line_separator.clone(),
        ..Default::default()
    };

    let mut app = LiveOcrApp::new(settings);
    app.start(source, engine, sink, Handle::current())?;

    let deadline = args.duration_secs.map(Duration::from_secs);
    let run = async {
        let mut ticker = tokio::time::interval(Duration::from_millis(100));
        while app.is_capturing() {
            ticker.tick().await;
        }
        info!("Frame source finished");
    };

    tokio::select! {
        _ = run => {}
        _ = tokio::signal::ctrl_c() => info!("Received Ctrl+C, shutting down..."),
        _ = async {
            match deadline {
                Some(d) => tokio::time::sleep(d).await,
                None => std::future::pending().await,
            }
        } => info!("Run duration elapsed"),
    }

    if let Some(mut report) = app.stop().await {
        info!(
            "Captured {} frames: {} recognized, {} dropped, {} failed, {} timed out",
            report.frames_captured,
            report.stats.completed,
            report.stats.dropped,
            report.stats.failed,
            report.stats.timed_out
        );
        if let Some(sequence) = report.final_text.last_applied {
            info!(
                "Final text from frame {} ({} lines, {:?} updates rendered)",
                sequence,
                report.final_text.text.lines().count(),
                report.rendered
            );
        }
        if let Some(e) = report.capture_error.take() {
            return Err(anyhow::Error::new(e).context("Frame source failed during capture"));
        }
    }

    Ok(())
}
