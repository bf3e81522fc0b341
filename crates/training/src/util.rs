use crate::checkpoint::{load_checkpoint, resolve_resume};
use crate::engine::Trainer;
use crate::{ADBackend, RunConfig, TrainBackend};
use anyhow::Context;
use burn::module::{AutodiffModule, Module};
use burn::optim::AdamWConfig;
use burn::tensor::backend::Backend;
use burn::tensor::Tensor;
use clap::Parser;
use cli_support::{init_logging, run_timestamp, DataDirArgs, LogDirArgs, RunDirOpts};
use models::{Architecture, Fcn, PlainUnet, SegmentationModel};
use std::fs;
use std::path::{Path, PathBuf};
use tile_dataset::DataSources;

/// Side length of the dummy input used by `--summary`.
const SUMMARY_TILE: usize = 256;

#[derive(Parser, Debug, Clone)]
#[command(
    name = "train",
    about = "Train a thaw-slump segmentation model on a multi-phase schedule"
)]
pub struct TrainArgs {
    /// Only print the model summary and return.
    #[arg(short = 's', long)]
    pub summary: bool,
    #[command(flatten)]
    pub data: DataDirArgs,
    #[command(flatten)]
    pub logs: LogDirArgs,
    /// Give this run a name, so that it is logged into <log_dir>/<NAME>_<timestamp>.
    #[arg(short = 'n', long, default_value = "")]
    pub name: String,
    /// Run config to use.
    #[arg(short = 'c', long, default_value = "config.yml")]
    pub config: PathBuf,
    /// Resume from a run id (e.g. "2020-06-29_18-12-03"), a run directory or a checkpoint file.
    /// Overrides the resume option in the config file.
    #[arg(short = 'r', long)]
    pub resume: Option<String>,
}

/// Everything resolved before the model exists.
#[derive(Debug, Clone)]
pub struct RunSetup {
    pub config: RunConfig,
    pub architecture: Architecture,
    pub run_dir: PathBuf,
    pub log_dir: PathBuf,
    pub data_root: PathBuf,
    pub timestamp: String,
    pub sources: DataSources,
    pub resume: Option<PathBuf>,
}

/// Load the config, create the run directory and logging, resolve sources and resume.
pub fn prepare_run(args: &TrainArgs) -> anyhow::Result<RunSetup> {
    let mut config = RunConfig::load(&args.config)
        .with_context(|| format!("loading run config {}", args.config.display()))?;
    let architecture = config.validate()?;

    let timestamp = run_timestamp();
    let log_dir = args.logs.log_dir.clone();
    let run_dir = RunDirOpts::new(log_dir.clone(), Some(args.name.clone()), timestamp.clone())
        .resolve();
    fs::create_dir_all(&log_dir)
        .with_context(|| format!("creating log dir {}", log_dir.display()))?;
    fs::create_dir(&run_dir)
        .with_context(|| format!("creating run dir {}", run_dir.display()))?;
    init_logging(&run_dir.join("train.log"))?;
    tracing::info!("run directory {}", run_dir.display());

    let sources = config.sources()?;
    config.model.input_channels = sources.channels();

    if let Some(resume) = args.resume.as_ref().filter(|r| !r.trim().is_empty()) {
        config.resume = Some(resume.clone());
    }
    let resume = match config.resume_path() {
        Some(r) => Some(resolve_resume(Path::new(r), &log_dir)?),
        None => None,
    };
    if let Some(path) = &resume {
        config.resume = Some(path.display().to_string());
        tracing::info!("Resuming training from checkpoint {}", path.display());
    }

    Ok(RunSetup {
        config,
        architecture,
        run_dir,
        log_dir,
        data_root: args.data.data_dir.clone(),
        timestamp,
        sources,
        resume,
    })
}

/// Source revision for the config snapshot: `CODE_VERSION`, else `git describe`, else the crate version.
pub fn git_head() -> String {
    if let Ok(version) = std::env::var("CODE_VERSION") {
        if !version.trim().is_empty() {
            return version.trim().to_string();
        }
    }
    std::process::Command::new("git")
        .args(["describe", "--always"])
        .output()
        .ok()
        .filter(|out| out.status.success())
        .and_then(|out| String::from_utf8(out.stdout).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| format!("v{}", env!("CARGO_PKG_VERSION")))
}

fn print_summary<M>(setup: &RunSetup, model: &M, device: &<ADBackend as Backend>::Device)
where
    M: AutodiffModule<ADBackend>,
    M::InnerModule: SegmentationModel<TrainBackend>,
{
    let channels = setup.config.model.input_channels;
    let input = Tensor::<TrainBackend, 4>::zeros([1, channels, SUMMARY_TILE, SUMMARY_TILE], device);
    let output = model.valid().forward(input);
    println!("Architecture: {}", setup.architecture);
    println!("Parameters:   {}", model.num_params());
    println!("Input shape:  [1, {channels}, {SUMMARY_TILE}, {SUMMARY_TILE}]");
    println!("Output shape: {:?}", output.dims());
}

fn train_with<M>(setup: RunSetup, model: M, summary: bool) -> anyhow::Result<PathBuf>
where
    M: AutodiffModule<ADBackend> + SegmentationModel<ADBackend>,
    M::InnerModule: SegmentationModel<TrainBackend>,
{
    let device = <ADBackend as Backend>::Device::default();
    let model = match &setup.resume {
        Some(path) => load_checkpoint::<ADBackend, M>(model, path, &device)?,
        None => model,
    };
    tracing::info!("Training on {device:?} device");

    if summary {
        print_summary(&setup, &model, &device);
        return Ok(setup.run_dir);
    }

    let run_dir = setup.run_dir.clone();
    let optim = AdamWConfig::new().init::<ADBackend, M>();
    let mut trainer = Trainer::new(setup, model, optim, device)?;
    trainer.run()?;
    Ok(run_dir)
}

/// Train the configured architecture; returns the run directory.
pub fn run_train(args: &TrainArgs) -> anyhow::Result<PathBuf> {
    let setup = prepare_run(args)?;
    let device = <ADBackend as Backend>::Device::default();
    match setup.architecture {
        Architecture::PlainUnet => {
            let model = PlainUnet::<ADBackend>::new(setup.config.model.plain_unet(), &device);
            train_with(setup, model, args.summary)
        }
        Architecture::Fcn => {
            let model = Fcn::<ADBackend>::new(setup.config.model.fcn(), &device);
            train_with(setup, model, args.summary)
        }
    }
}
