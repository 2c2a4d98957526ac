//! prelabel - plan, evaluate, refine and run auto-labeling jobs
//!
//! Every subcommand prints JSON on stdout; progress goes to stderr.

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use orion_prelabel::config::PrelabelConfig;
use orion_prelabel::{
    build_initial_plan, compute_sample_metrics, refine_plan, BackendRegistry, DetectedBox,
    DetectionPlan, JobStore, PrelabelJob, PrelabelRequest, PrelabelRunner, ReplayBackend,
    SampleMetrics, SqliteJobStore, StubBackend,
};

#[path = "../ui.rs"]
mod ui;

const IMAGE_EXTENSIONS: [&str; 5] = ["jpg", "jpeg", "png", "bmp", "webp"];

#[derive(Parser, Debug)]
#[command(name = "prelabel", author, version, about)]
struct Args {
    /// UI mode for stderr progress (auto|plain|pretty)
    #[arg(long, default_value = "auto", value_name = "MODE", global = true)]
    ui: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the initial plan for a goal and instructions
    Plan {
        /// fast | balanced | quality (defaults to the configured goal)
        #[arg(long)]
        goal: Option<String>,
        #[arg(long, default_value = "")]
        instructions: String,
    },

    /// Score a sample run (JSON array of per-image box arrays)
    Evaluate {
        #[arg(long)]
        sample: PathBuf,
    },

    /// Refine a plan with sample metrics
    Refine {
        #[arg(long)]
        plan: PathBuf,
        #[arg(long)]
        metrics: PathBuf,
    },

    /// Label every image of a dataset
    Run {
        #[arg(long)]
        dataset: String,
        /// Image directory (defaults to the recorded images of the replay backend)
        #[arg(long)]
        images: Option<PathBuf>,
        #[arg(long)]
        goal: Option<String>,
        #[arg(long, default_value = "")]
        instructions: String,
        /// Sample, evaluate and refine before the full run
        #[arg(long)]
        agent: bool,
        /// Recorded detections for the replay backend
        #[arg(long)]
        detections: Option<PathBuf>,
        #[arg(long, default_value = "annotations.json")]
        output: PathBuf,
    },

    /// Show job records
    Status {
        #[arg(long, conflicts_with = "dataset")]
        job: Option<String>,
        #[arg(long)]
        dataset: Option<String>,
    },
}

#[derive(Serialize)]
struct RunReport<'a> {
    job: &'a PrelabelJob,
    annotations: &'a BTreeMap<String, Vec<DetectedBox>>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let cfg = PrelabelConfig::load()?;
    let ui = ui::Ui::from_args(
        Some(&args.ui),
        std::io::stderr().is_terminal(),
        !std::io::stdout().is_terminal(),
    );

    match args.command {
        Command::Plan { goal, instructions } => {
            let goal = goal.unwrap_or_else(|| cfg.agent.default_goal.clone());
            print_json(&build_initial_plan(&goal, &instructions))
        }
        Command::Evaluate { sample } => {
            let sample: Vec<Vec<DetectedBox>> = read_json(&sample)?;
            print_json(&compute_sample_metrics(&sample))
        }
        Command::Refine { plan, metrics } => {
            let plan: DetectionPlan = read_json(&plan)?;
            let metrics: SampleMetrics = read_json(&metrics)?;
            print_json(&refine_plan(&plan, &metrics))
        }
        Command::Run {
            dataset,
            images,
            goal,
            instructions,
            agent,
            detections,
            output,
        } => {
            let mut cfg = cfg;
            if detections.is_some() {
                cfg.detector.detections_path = detections;
            }
            let request = PrelabelRequest {
                goal: goal.unwrap_or_else(|| cfg.agent.default_goal.clone()),
                instructions,
                agent_mode: agent,
            };
            run_job(&cfg, &ui, &dataset, images.as_deref(), &request, &output)
        }
        Command::Status { job, dataset } => {
            let store = SqliteJobStore::open(&cfg.db_path)?;
            match (job, dataset) {
                (Some(id), _) => {
                    let job = store
                        .load_job(&id)?
                        .ok_or_else(|| anyhow!("job {} not found", id))?;
                    print_json(&job)
                }
                (None, Some(dataset)) => print_json(&store.jobs_for_dataset(&dataset)?),
                (None, None) => Err(anyhow!("pass --job or --dataset")),
            }
        }
    }
}

fn run_job(
    cfg: &PrelabelConfig,
    ui: &ui::Ui,
    dataset: &str,
    images_dir: Option<&Path>,
    request: &PrelabelRequest,
    output: &Path,
) -> Result<()> {
    let (registry, recorded_images) = {
        let _stage = ui.stage(&format!("Load {} detector", cfg.detector.backend));
        build_registry(cfg)?
    };
    let images = match (images_dir, recorded_images) {
        (Some(dir), _) => list_images(dir)?,
        (None, Some(recorded)) => recorded,
        (None, None) => {
            return Err(anyhow!(
                "--images is required unless the replay backend is used"
            ))
        }
    };

    let mut store = SqliteJobStore::open(&cfg.db_path)?;
    let cancel = Arc::new(AtomicBool::new(false));
    {
        let flag = cancel.clone();
        ctrlc::set_handler(move || {
            log::warn!("interrupt received; stopping after the current image");
            flag.store(true, Ordering::SeqCst);
        })?;
    }

    let mut runner = PrelabelRunner::new(&registry, &mut store)
        .with_backend(&cfg.detector.backend)
        .with_sample_size(cfg.agent.sample_size)
        .with_cancel_flag(cancel);
    let mut job = runner.enqueue(dataset, request, &images)?;
    let mut rng = match cfg.agent.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let mut annotations: BTreeMap<String, Vec<DetectedBox>> = BTreeMap::new();
    let result = {
        let _stage = ui.stage(if request.agent_mode {
            "Plan, sample, refine and label"
        } else {
            "Label images"
        });
        let mut progress = ui.images(images.len());
        runner.run(&mut job, request, &images, &mut rng, &mut |image, boxes| {
            let key = image.to_string_lossy().into_owned();
            progress.tick(&key, boxes.len());
            annotations.insert(key, boxes.to_vec());
            Ok(())
        })
    };

    {
        let _stage = ui.stage("Write annotations");
        let report = RunReport {
            job: &job,
            annotations: &annotations,
        };
        std::fs::write(output, serde_json::to_vec_pretty(&report)?).map_err(|e| {
            anyhow!("failed to write annotations to {}: {}", output.display(), e)
        })?;
    }
    print_json(&job)?;
    result
}

fn build_registry(cfg: &PrelabelConfig) -> Result<(BackendRegistry, Option<Vec<PathBuf>>)> {
    let mut registry = BackendRegistry::new();
    let mut recorded = None;
    match cfg.detector.backend.as_str() {
        "stub" => registry.register(StubBackend::new()),
        "replay" => {
            let path = cfg.detector.detections_path.as_ref().ok_or_else(|| {
                anyhow!("the replay backend needs --detections or PRELABEL_DETECTIONS")
            })?;
            let backend = ReplayBackend::from_path(path)?;
            recorded = Some(backend.images());
            registry.register(backend);
        }
        #[cfg(feature = "backend-tract")]
        "tract" => registry.register(orion_prelabel::TractBackend::new(
            cfg.detector.model_dir.clone(),
        )),
        other => return Err(anyhow!("detector backend '{}' is not available", other)),
    }
    Ok((registry, recorded))
}

fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir)
        .map_err(|e| anyhow!("failed to read image directory {}: {}", dir.display(), e))?;
    let mut images = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        if path.is_file() && is_image {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read {}: {}", path.display(), e))?;
    serde_json::from_str(&raw).map_err(|e| anyhow!("invalid JSON in {}: {}", path.display(), e))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
