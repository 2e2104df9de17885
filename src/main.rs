use rollcall::camera::{FrameSource, ImageSequence};
use rollcall::common::{paths, Config, DevMode};
use rollcall::core::training::is_image_file;
use rollcall::core::{BoundingBox, FaceTracker, FrameProcessor, RecognizerEngine, RemoveOutcome, TrainOutcome};
use rollcall::storage::ModelStore;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "rollcall")]
#[command(about = "Face tracking and LBPH recognition for classroom attendance")]
struct Cli {
    /// Enable development mode (saves data locally for testing)
    #[arg(long, global = true)]
    dev: bool,

    /// Config file (defaults to configs/rollcall.toml, then the system config)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train from scratch on every identity under the training root
    Train,
    /// Copy photos into the training root and add them to the model
    Enroll {
        #[arg(short, long)]
        identity: String,
        /// Directory of photos to import
        #[arg(short, long)]
        dir: PathBuf,
    },
    /// Forget an identity and rebuild the model without it
    Remove {
        #[arg(short, long)]
        identity: String,
        /// Also delete the identity's training photos
        #[arg(long)]
        purge: bool,
    },
    /// Recognize a single pre-cropped face image
    Recognize {
        #[arg(short, long)]
        image: PathBuf,
    },
    /// Run tracking and recognition over a directory of frames
    Replay {
        /// Directory of frames, replayed in file-name order
        #[arg(short, long)]
        frames: PathBuf,
        /// JSON object mapping frame file name to a list of boxes
        #[arg(short, long)]
        detections: PathBuf,
        /// Simulated time between frames
        #[arg(long, default_value = "33")]
        frame_interval_ms: u64,
        /// Write annotated frames into this directory (dev mode: dev_data/debug)
        #[arg(long)]
        annotate: Option<PathBuf>,
    },
    /// Capture enrollment photos from the camera
    #[cfg(feature = "camera")]
    Capture {
        #[arg(short, long)]
        identity: String,
        #[arg(short = 'n', long, default_value = "10")]
        count: usize,
    },
    /// List V4L2 capture devices
    #[cfg(feature = "camera")]
    DetectCamera,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.dev);

    let dev_mode = DevMode::new(cli.dev)?;
    let config = load_config(cli.config.as_deref(), &dev_mode)?;
    let training_root = config
        .storage
        .training_root
        .clone()
        .unwrap_or_else(|| dev_mode.training_dir());
    let model_dir = config.storage.model_dir.clone().unwrap_or_else(|| dev_mode.model_dir());

    match cli.command {
        Commands::Train => {
            let engine = RecognizerEngine::new(&config);
            report_training(engine.train(&training_root))?;
            engine.save_model(&model_dir)?;
            println!("Model saved to {}", model_dir.display());
        }
        Commands::Enroll { identity, dir } => {
            let dest = training_root.join(&identity);
            let copied = import_photos(&dir, &dest)?;
            println!("Imported {} photos for {}", copied, identity);

            let engine = open_engine(&config, &training_root, &model_dir)?;
            report_training(engine.update_incremental(&dest, &identity))?;
            engine.save_model(&model_dir)?;
        }
        Commands::Remove { identity, purge } => {
            let dir = training_root.join(&identity);
            if dir.is_dir() {
                if !purge {
                    bail!("{} still has photos in {}; pass --purge to delete them", identity, dir.display());
                }
                fs::remove_dir_all(&dir)
                    .with_context(|| format!("Failed to delete {}", dir.display()))?;
            }

            let engine = open_engine(&config, &training_root, &model_dir)?;
            match engine.remove_student(&identity) {
                RemoveOutcome::NotEnrolled => println!("{} is not enrolled", identity),
                RemoveOutcome::Retrained(outcome) => {
                    println!("Removed {}", identity);
                    report_removal_retrain(&engine, outcome, &model_dir)?;
                }
                RemoveOutcome::Untrained => {
                    println!("Removed {}; no identities left", identity);
                    ModelStore::new(&model_dir).clear()?;
                }
            }
        }
        Commands::Recognize { image } => {
            let engine = open_engine(&config, &training_root, &model_dir)?;
            if !engine.is_trained() {
                bail!("No trained model in {}", model_dir.display());
            }
            let face = image::open(&image)
                .with_context(|| format!("Failed to open {}", image.display()))?;
            println!("{}", serde_json::to_string(&engine.recognize(&face))?);
        }
        Commands::Replay { frames, detections, frame_interval_ms, annotate } => {
            let engine = Arc::new(open_engine(&config, &training_root, &model_dir)?);
            let annotate = annotate.or_else(|| dev_mode.debug_dir());
            replay(&config, engine, &frames, &detections, Duration::from_millis(frame_interval_ms), annotate.as_deref())?;
        }
        #[cfg(feature = "camera")]
        Commands::Capture { identity, count } => {
            use rollcall::camera::{capture_enrollment_samples, DeviceLock, V4lCamera};
            use rollcall::core::LaplacianVarianceGate;

            let lock = DeviceLock::new();
            let mut camera = V4lCamera::open(&lock, &config.camera)?;
            let mut session = camera.start_session()?;
            let dest = training_root.join(&identity);
            let saved = capture_enrollment_samples(
                &mut session,
                &LaplacianVarianceGate,
                config.quality.pre_capture_blur_threshold,
                &dest,
                count,
                count * 10,
            )?;
            drop(session);
            drop(camera);
            if saved.is_empty() {
                bail!("No usable frames captured");
            }
            println!("Captured {} photos for {}", saved.len(), identity);

            let engine = open_engine(&config, &training_root, &model_dir)?;
            report_training(engine.update_incremental(&dest, &identity))?;
            engine.save_model(&model_dir)?;
        }
        #[cfg(feature = "camera")]
        Commands::DetectCamera => {
            let cameras = rollcall::camera::V4lCamera::list_all_cameras()?;
            if cameras.is_empty() {
                println!("No cameras found. Check /dev/video* permissions.");
            }
            for camera in cameras {
                println!("/dev/video{}: {} [{}]", camera.index, camera.name, camera.formats.join(", "));
            }
        }
    }

    Ok(())
}

fn setup_logging(dev_mode: bool) {
    let filter = log_filter(std::env::var("RUST_LOG").ok().as_deref(), dev_mode);
    if dev_mode {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_file(true)
            .with_line_number(true)
            .with_thread_ids(true)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }
}

/// `RUST_LOG` directives when they parse, else debug in dev mode and info
/// otherwise.
fn log_filter(directives: Option<&str>, dev_mode: bool) -> EnvFilter {
    let fallback = if dev_mode { "debug" } else { "info" };
    directives
        .and_then(|d| EnvFilter::try_new(d).ok())
        .unwrap_or_else(|| EnvFilter::new(fallback))
}

fn load_config(explicit: Option<&Path>, dev_mode: &DevMode) -> Result<Config> {
    if let Some(path) = explicit {
        return Ok(Config::load_from_path(path)?);
    }
    if dev_mode.is_enabled() || Path::new("configs/rollcall.toml").exists() {
        if let Ok(config) = Config::load() {
            return Ok(config);
        }
    }
    let system = paths::system_config_file();
    if system.exists() {
        return Ok(Config::load_from_path(&system)?);
    }
    tracing::debug!("No config file found, using defaults");
    Ok(Config::default())
}

/// Engine rooted at `training_root`, with the persisted model loaded if any.
fn open_engine(config: &Config, training_root: &Path, model_dir: &Path) -> Result<RecognizerEngine> {
    let engine = RecognizerEngine::new(config).with_training_root(training_root);
    if ModelStore::new(model_dir).exists() {
        engine
            .load_model(model_dir)
            .with_context(|| format!("Failed to load model from {}", model_dir.display()))?;
    }
    Ok(engine)
}

fn report_training(outcome: TrainOutcome) -> Result<()> {
    match outcome {
        TrainOutcome::Trained(summary) => {
            println!(
                "Generation {}: {} identities, {} samples",
                summary.generation, summary.identities, summary.samples
            );
            Ok(())
        }
        TrainOutcome::Unchanged(reason) => bail!("Model unchanged: {}", reason),
    }
}

fn report_removal_retrain(engine: &RecognizerEngine, outcome: TrainOutcome, model_dir: &Path) -> Result<()> {
    match outcome {
        TrainOutcome::Trained(_) => {
            report_training(outcome)?;
            Ok(engine.save_model(model_dir)?)
        }
        TrainOutcome::Unchanged(reason) => {
            // The engine still holds the pre-removal model; the stale files
            // must not resurrect the identity on the next run.
            ModelStore::new(model_dir).clear()?;
            println!("Model cleared, retrain needed: {}", reason);
            Ok(())
        }
    }
}

fn import_photos(src: &Path, dest: &Path) -> Result<usize> {
    fs::create_dir_all(dest)?;
    let mut copied = 0;
    for entry in fs::read_dir(src).with_context(|| format!("Failed to read {}", src.display()))? {
        let path = entry?.path();
        if !path.is_file() || !is_image_file(&path) {
            continue;
        }
        if let Some(name) = path.file_name() {
            fs::copy(&path, dest.join(name))?;
            copied += 1;
        }
    }
    if copied == 0 {
        bail!("No photos found in {}", src.display());
    }
    Ok(copied)
}

fn replay(
    config: &Config,
    engine: Arc<RecognizerEngine>,
    frames: &Path,
    detections: &Path,
    interval: Duration,
    annotate: Option<&Path>,
) -> Result<()> {
    let text = fs::read_to_string(detections)
        .with_context(|| format!("Failed to read {}", detections.display()))?;
    let boxes: HashMap<String, Vec<BoundingBox>> = serde_json::from_str(&text)?;

    if let Some(dir) = annotate {
        fs::create_dir_all(dir)?;
    }

    let mut processor = FrameProcessor::new(
        FaceTracker::new(Duration::from_millis(config.tracker.max_age_ms)),
        engine,
        Duration::from_millis(config.tracker.recognition_interval_ms),
    );
    let mut source = ImageSequence::open(frames)?;
    let start = Instant::now();
    let mut index: u32 = 0;

    while let Some(frame) = source.capture_frame()? {
        let name = source
            .current_path()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let dets = boxes.get(&name).map(Vec::as_slice).unwrap_or(&[]);
        let now = start + interval * index;

        for event in processor.process_at(&frame, dets, now) {
            println!("{}", serde_json::to_string(&event)?);
        }
        if let Some(dir) = annotate {
            processor.annotate(&frame).save(dir.join(&name).with_extension("png"))?;
        }
        index += 1;
    }
    tracing::info!("Replayed {} frames", index);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case(None, false, "info")]
    #[case(None, true, "debug")]
    #[case(Some("rollcall=trace"), false, "rollcall=trace")]
    #[case(Some("warn"), true, "warn")]
    fn log_filter_honours_rust_log(
        #[case] directives: Option<&str>,
        #[case] dev_mode: bool,
        #[case] expected: &str,
    ) {
        assert_eq!(log_filter(directives, dev_mode).to_string(), expected);
    }
}
