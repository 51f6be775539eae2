use anyhow::{Context, Result};
use clap::Parser;
use framegate::output::{DisplaySink, LabelLog, LoopbackDisplay};
use framegate::stage::{self, Passthrough};
use framegate::{
    EndOfStreamPolicy, PipelineConfig, PipelineController, PipelineError, PipelineState, Stage,
    StageHandle, StageRegistry, UriOpener,
};
use std::io::BufRead;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Video source: camera index, /dev/videoN, stream URL, file path or synthetic://
    source: String,

    /// ONNX classifier to load as a stage (repeat for more stages)
    #[arg(short, long)]
    model: Vec<PathBuf>,

    /// Class labels file, one label per line
    #[arg(long)]
    labels: Option<PathBuf>,

    /// Capture resolution width
    #[arg(long, default_value_t = 640)]
    width: u32,

    /// Capture resolution height
    #[arg(long, default_value_t = 480)]
    height: u32,

    /// Decoded frames buffered by the source (0 = newest frame only)
    #[arg(long, default_value_t = 0)]
    buffer_depth: usize,

    /// Stop when the source ends instead of retrying
    #[arg(long)]
    stop_on_eos: bool,

    /// Output v4l2loopback device path; without it labels are only logged
    #[arg(long)]
    display: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

fn main() -> Result<()> {
    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(err) if err.use_stderr() => {
            let _ = err.print();
            std::process::exit(1);
        }
        Err(err) => err.exit(),
    };

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    tracing::info!("framegate starting");
    tracing::info!("Source: {}", args.source);
    tracing::info!("Capture: {}x{}", args.width, args.height);

    // Load every stage before the pipeline exists
    let stages: Vec<Box<dyn Stage>> = if args.model.is_empty() {
        tracing::info!("Running in passthrough mode (no model)");
        vec![Box::new(Passthrough::new())]
    } else {
        stage::load_classifiers(&args.model, args.labels.as_deref())?
    };
    let registry = StageRegistry::new(stages)?;

    let mut config = PipelineConfig::new(args.source.clone());
    config.source.width = args.width;
    config.source.height = args.height;
    config.source.buffer_depth = args.buffer_depth;
    config.stats_interval = 30;
    if args.stop_on_eos {
        config.end_of_stream = EndOfStreamPolicy::Stop;
    }

    let mut display: Box<dyn DisplaySink> = match &args.display {
        Some(path) => Box::new(
            LoopbackDisplay::new(path, args.width, args.height)
                .context("Failed to initialize v4l2loopback output")?,
        ),
        None => Box::new(LabelLog::new()),
    };

    let pipeline = Arc::new(PipelineController::new(UriOpener, registry, config)?);
    for (index, name) in pipeline.stage_names().iter().enumerate() {
        tracing::info!("Stage {}: {}", index, name);
    }

    // Stopping from the handler also interrupts a start() still opening the source
    let shutdown = Arc::new(AtomicBool::new(false));
    {
        let shutdown = shutdown.clone();
        let pipeline = pipeline.clone();
        if let Err(err) = ctrlc::set_handler(move || {
            shutdown.store(true, Ordering::SeqCst);
            pipeline.stop();
        }) {
            tracing::warn!("Failed to install Ctrl+C handler: {}", err);
        }
    }

    match pipeline.start() {
        Ok(()) => {}
        Err(PipelineError::StartCancelled) => {
            tracing::info!("Interrupted before {} opened", args.source);
            return Ok(());
        }
        Err(err) => {
            return Err(err).with_context(|| format!("Failed to start pipeline on {}", args.source))
        }
    }

    spawn_stage_input(pipeline.clone());
    tracing::info!("Type a stage number and press Enter to switch; Ctrl+C to stop");

    run_display(&pipeline, display.as_mut(), &shutdown);

    pipeline.stop();
    let stats = pipeline.stats();
    tracing::info!(
        "Done: {} frames captured, {} published, {} read failures",
        stats.frames_captured,
        stats.frames_published,
        stats.read_failures
    );

    Ok(())
}

/// Consumer loop: show each new frame until shutdown or the pipeline ends
fn run_display(pipeline: &PipelineController, display: &mut dyn DisplaySink, shutdown: &AtomicBool) {
    let mut last_sequence = None;

    while !shutdown.load(Ordering::SeqCst) {
        match pipeline.wait_for_frame(last_sequence, Duration::from_millis(200)) {
            Some(frame) => {
                last_sequence = Some(frame.sequence());
                if let Err(err) = display.show(&frame) {
                    tracing::warn!("Display failed: {:#}", err);
                }
            }
            None if pipeline.state() == PipelineState::Stopped => {
                tracing::info!("Pipeline ended");
                break;
            }
            None => {}
        }
    }
}

/// Read stage numbers from stdin and forward them to the pipeline
fn spawn_stage_input(pipeline: Arc<PipelineController>) {
    let spawned = thread::Builder::new()
        .name("stage-input".into())
        .spawn(move || {
            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let Ok(line) = line else { break };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match line.parse::<usize>() {
                    Ok(index) => match pipeline.select_stage(StageHandle::new(index)) {
                        Ok(()) => tracing::info!("Stage {} selected", index),
                        Err(err) => tracing::warn!("{}", err),
                    },
                    Err(_) => tracing::warn!("Not a stage number: {:?}", line),
                }
            }
        });

    if let Err(err) = spawned {
        tracing::warn!("Stage selection from stdin unavailable: {}", err);
    }
}
