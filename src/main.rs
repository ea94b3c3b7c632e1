use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use temstream::calibrate::center_z_height;
use temstream::capture::open_camera;
use temstream::config::Config;
use temstream::experiment::Experiment;
use temstream::sink::{spawn_sink, DisplaySink, TiffWriter};
use temstream::stage::SimulatedStage;
use temstream::stream::VideoStream;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the YAML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Make a template configuration yaml file
    New {
        #[arg(short, long)]
        path: PathBuf,
    },

    /// Run the live stream, optionally taking one-shot acquisitions
    Stream {
        /// Seconds to stream for
        #[arg(long, default_value_t = 5.0)]
        duration: f64,

        /// Number of one-shot acquisitions spread over the run
        #[arg(long, default_value_t = 0)]
        acquire: u32,

        /// Exposure for acquisitions in seconds (camera default if omitted)
        #[arg(long)]
        exposure: Option<f64>,

        /// Display contrast factor
        #[arg(long, default_value_t = 1.0)]
        contrast: f32,

        /// Write the last displayed frame to this PNG file
        #[arg(long)]
        snapshot: Option<PathBuf>,
    },

    /// Collect a tilt series
    Collect {
        /// Exposure per frame in seconds
        #[arg(long, default_value_t = 0.5)]
        exposure: f64,

        /// Total tilt range in degrees
        #[arg(long, default_value_t = 10.0)]
        tilt_range: f64,

        /// Tilt step in degrees
        #[arg(long, default_value_t = 1.0)]
        stepsize: f64,

        /// Output directory (defaults to a timestamped folder under output.directory)
        #[arg(long)]
        path: Option<PathBuf>,
    },

    /// Find the eucentric height
    CenterZ {
        /// Move the stage to the height found instead of returning to the start
        #[arg(long)]
        apply: bool,
    },
}

fn main() -> Result<()> {
    let args = Args::parse();

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

    if let Command::New { path } = &args.command {
        tracing::info!("Making a template config at {}...", path.display());
        Config::default()
            .write_config_file(path)
            .context("Failed to write template config")?;
        tracing::info!("Done.");
        return Ok(());
    }

    let config = match &args.config {
        Some(path) => {
            tracing::info!("Loading config from {}...", path.display());
            Config::read_config_file(path).context("Failed to load config")?
        }
        None => {
            tracing::info!("No config given, using defaults");
            Config::default()
        }
    };

    tracing::info!("temstream starting");
    tracing::info!(
        "Camera: {} {}x{}",
        config.camera.name,
        config.camera.dimensions.0,
        config.camera.dimensions.1
    );
    tracing::info!("Frametime: {} s", config.stream.frametime);

    // Initialize stage and camera
    let mut stage = SimulatedStage::new(config.stage.clone());
    let camera = open_camera(&config.camera, &config.simulation, Some(stage.handle()))
        .context("Failed to initialize camera")?;
    let stream = VideoStream::start(camera, &config.stream).context("Failed to start stream")?;

    match args.command {
        Command::New { .. } => {}
        Command::Stream {
            duration,
            acquire,
            exposure,
            contrast,
            snapshot,
        } => run_stream(
            stream,
            &config,
            duration,
            acquire,
            exposure,
            contrast,
            snapshot.as_deref(),
        )?,
        Command::Collect {
            exposure,
            tilt_range,
            stepsize,
            path,
        } => {
            let path = path.unwrap_or_else(|| {
                config.output.directory.join(format!(
                    "experiment_{}",
                    chrono::Local::now().format("%Y%m%d-%H%M%S")
                ))
            });
            let mut experiment = Experiment::new(&path, &stream);
            experiment
                .start_collection(&stream, &mut stage, exposure, tilt_range, stepsize)
                .context("Tilt series failed")?;
            experiment.finalize();
            stream.join();
        }
        Command::CenterZ { apply } => {
            let height = center_z_height(&stream, &mut stage, &config.center_z)
                .context("Eucentric height search failed")?;
            if apply {
                height.apply(&mut stage)?;
            } else {
                tracing::info!(
                    "Found eucentric height: {:.0} nm. Rerun with --apply to set it.",
                    height.z
                );
                height.restore(&mut stage)?;
            }
            stream.join();
        }
    }

    Ok(())
}

fn run_stream(
    stream: VideoStream,
    config: &Config,
    duration: f64,
    acquire: u32,
    exposure: Option<f64>,
    contrast: f32,
    snapshot: Option<&Path>,
) -> Result<()> {
    if !(duration.is_finite() && duration > 0.0) {
        return Err(anyhow!("Stream duration must be positive, got {duration}"));
    }
    let duration = Duration::from_secs_f64(duration);

    let display = spawn_sink(stream.subscribe(), DisplaySink::new(contrast));
    let writer = if acquire > 0 {
        let writer = TiffWriter::new(&config.output.directory)
            .context("Failed to prepare output directory")?;
        Some(spawn_sink(stream.subscribe(), writer))
    } else {
        None
    };

    tracing::info!("Streaming for {:?}", duration);
    let start = Instant::now();
    let interval = duration / (acquire + 1);
    for i in 0..acquire {
        std::thread::sleep(interval);
        let frame = stream
            .get_image(exposure, None)
            .with_context(|| format!("Acquisition {} failed", i + 1))?;
        tracing::info!(
            "Acquired frame {} (exposure {:?} s)",
            frame.sequence,
            frame.exposure()
        );
    }
    if let Some(remaining) = duration.checked_sub(start.elapsed()) {
        std::thread::sleep(remaining);
    }

    let stats = stream.stats();
    stream.join();
    tracing::info!(
        "Stream finished: {} previews, {} acquisitions, {} capture failures",
        stats.previews,
        stats.acquisitions,
        stats.capture_failures
    );

    let display = display
        .join()
        .map_err(|_| anyhow!("Display sink panicked"))?;
    if let Some(rate) = display.frame_rate() {
        tracing::info!(
            "Display: fps={:.2}, frametime={:.2}ms, overhead={:.2}ms",
            rate.fps,
            rate.frametime_ms,
            rate.overhead_ms
        );
    }
    if let Some(path) = snapshot {
        if display.save_latest(path).context("Failed to write snapshot")? {
            tracing::info!("Wrote snapshot to {}", path.display());
        }
    }

    if let Some(writer) = writer {
        let writer = writer.join().map_err(|_| anyhow!("Frame writer panicked"))?;
        tracing::info!(
            "Saved {} frames to {}",
            writer.written().len(),
            writer.directory().display()
        );
    }

    Ok(())
}
