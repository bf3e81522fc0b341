//! Schedule-driven training loop.

use crate::checkpoint::{save_checkpoint, CHECKPOINT_DIR};
use crate::config::RunInfo;
use crate::loaders::{LoaderCache, LoaderContext};
use crate::lr::LrScheduler;
use crate::metric_log::{csv_tag, prefixed, CsvLog, JsonlTracker, Tracker};
use crate::metrics::{format_metrics, Metrics};
use crate::schedule::{Phase, Step};
use crate::scopes::ConfigScopes;
use crate::util::{git_head, RunSetup};
use crate::visualize::{render_tiles, PredictionHistory, PREDICTIONS_DIR};
use crate::{RunConfig, TrainError};
use burn::module::AutodiffModule;
use burn::optim::{GradientsParams, Optimizer};
use burn::tensor::activation::sigmoid;
use burn::tensor::backend::{AutodiffBackend, Backend};
use burn::tensor::Tensor;
use models::{LossKind, SegmentationModel};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tile_dataset::{build_pool, DataSources, LoaderOptions, TileBatch, TileDataset, TileLoader};

pub const CONFIG_SNAPSHOT: &str = "config.yml";
pub const TRACKER_FILE: &str = "metrics.jsonl";
pub const TRAIN_CSV: &str = "train.csv";

#[derive(Debug, Clone, PartialEq)]
pub enum RunState {
    Initializing,
    Running {
        phase: String,
        epoch: usize,
        step: usize,
    },
    Completed,
    Failed(String),
}

fn to_host<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>, TrainError> {
    tensor
        .into_data()
        .to_vec::<f32>()
        .map_err(|e| TrainError::Tensor(format!("{e:?}")))
}

fn scalar<B: Backend>(tensor: Tensor<B, 1>) -> Result<f64, TrainError> {
    Ok(to_host(tensor)?.first().copied().map_or(f64::NAN, f64::from))
}

/// Validation log file for `tag`; never the training log.
pub fn validation_csv(tag: &str) -> String {
    let file = format!("{tag}.csv");
    if file == TRAIN_CSV {
        format!("val_{file}")
    } else {
        file
    }
}

/// Owns the model, optimizer, LR schedule and loaders of one run.
pub struct Trainer<B, M, O>
where
    B: AutodiffBackend,
{
    model: M,
    optim: O,
    device: B::Device,
    config: RunConfig,
    run_dir: PathBuf,
    checkpoints: PathBuf,
    sources: DataSources,
    lr: LrScheduler,
    metrics: Metrics,
    loaders: LoaderCache,
    vis: Arc<TileLoader>,
    history: PredictionHistory,
    tracker: Box<dyn Tracker>,
    run_scope: serde_yaml::Mapping,
    epoch: usize,
    state: RunState,
}

impl<B, M, O> Trainer<B, M, O>
where
    B: AutodiffBackend,
    M: AutodiffModule<B> + SegmentationModel<B>,
    M::InnerModule: SegmentationModel<B::InnerBackend>,
    O: Optimizer<M, B>,
{
    /// Finish run setup: visualization loader, config snapshot, checkpoint dir and tracker.
    pub fn new(setup: RunSetup, model: M, optim: O, device: B::Device) -> Result<Self, TrainError> {
        let RunSetup {
            mut config,
            run_dir,
            data_root,
            timestamp,
            sources,
            ..
        } = setup;

        let lr = LrScheduler::from_config(&config);
        match lr.decay() {
            Some(decay) => tracing::info!(?decay, "running with learning rate scheduler"),
            None => tracing::info!("running without learning rate scheduler"),
        }

        let pool = build_pool(config.data_threads)?;
        let vis_spec = &config.visualization_tiles;
        let vis_dataset = if vis_spec.tiles.is_empty() {
            TileDataset {
                tiles: Vec::new(),
                channels: sources.channels(),
                tile_size: vis_spec.tile_size,
            }
        } else {
            vis_spec.load(&data_root, &sources, &pool)?
        };
        let vis_opts = LoaderOptions {
            batch_size: config.batch_size,
            ..LoaderOptions::default()
        };
        let vis = Arc::new(TileLoader::new(vis_dataset, vis_opts, pool)?);
        let history = PredictionHistory::new(vis.len());

        config.run_info = Some(RunInfo {
            timestamp,
            git_head: git_head(),
        });
        config.save(&run_dir.join(CONFIG_SNAPSHOT))?;

        let checkpoints = run_dir.join(CHECKPOINT_DIR);
        std::fs::create_dir(&checkpoints).map_err(|source| TrainError::Io {
            path: checkpoints.clone(),
            source,
        })?;
        let tracker = JsonlTracker::create(run_dir.join(TRACKER_FILE))?;

        let loaders = LoaderCache::new(
            LoaderContext {
                data_root,
                sources: sources.clone(),
                batch_size: config.batch_size,
                data_threads: config.data_threads,
            },
            config.datasets.clone(),
        );
        let run_scope = config.to_mapping()?;

        Ok(Self {
            model,
            optim,
            device,
            config,
            run_dir,
            checkpoints,
            sources,
            lr,
            metrics: Metrics::default(),
            loaders,
            vis,
            history,
            tracker: Box::new(tracker),
            run_scope,
            epoch: 0,
            state: RunState::Initializing,
        })
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn run_dir(&self) -> &Path {
        &self.run_dir
    }

    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// Training epochs executed so far.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    pub fn learning_rate(&self) -> f64 {
        self.lr.current()
    }

    pub fn loaders(&self) -> &LoaderCache {
        &self.loaders
    }

    /// Execute every phase of the schedule.
    pub fn run(&mut self) -> Result<(), TrainError> {
        let schedule = self.config.schedule.clone();
        match self.run_schedule(&schedule) {
            Ok(()) => {
                self.state = RunState::Completed;
                tracing::info!(epochs = self.epoch, "run completed");
                Ok(())
            }
            Err(e) => {
                self.state = RunState::Failed(e.to_string());
                tracing::error!("run failed: {e}");
                Err(e)
            }
        }
    }

    fn run_schedule(&mut self, schedule: &[Phase]) -> Result<(), TrainError> {
        for phase in schedule {
            tracing::info!("Starting phase \"{}\"", phase.phase);
            let scopes = ConfigScopes::new()
                .with_scope(format!("phase {}", phase.phase), phase.overrides.clone())
                .with_scope("run", self.run_scope.clone());
            for epoch in 0..phase.epochs {
                let loss_name: String = scopes.get("loss_function")?;
                let loss = LossKind::from_name(&loss_name)?;
                for (index, step) in phase.steps.iter().enumerate() {
                    self.state = RunState::Running {
                        phase: phase.phase.clone(),
                        epoch,
                        step: index,
                    };
                    match step {
                        Step::TrainOn(name) => self.train_epoch(name, loss)?,
                        Step::ValidateOn(name) => self.validate(name, loss)?,
                        Step::LogImages => self.log_images()?,
                    }
                }
                if !self.lr.is_constant() {
                    let (before, after) = self.lr.step();
                    tracing::info!(before, after, "learning rate step");
                }
            }
        }
        Ok(())
    }

    fn train_epoch(&mut self, name: &str, loss_kind: LossKind) -> Result<(), TrainError> {
        let loader = self.loaders.get(name)?;
        self.epoch += 1;
        let epoch = self.epoch;
        self.tracker.log(epoch, &[("epoch".to_string(), epoch as f64)])?;
        tracing::info!("Epoch {epoch} - Training Started");

        self.metrics.reset();
        let lr = self.lr.current();
        for batch in loader.iter::<B>(&self.device) {
            let TileBatch {
                images,
                targets,
                labels,
                names,
            } = batch;
            let logits = self.model.forward(images);
            let loss = loss_kind.compute(logits.clone(), targets);
            let loss_value = scalar(loss.clone().detach())?;
            let host_logits = to_host(logits.detach())?;

            let grads = GradientsParams::from_grads(loss.backward(), &self.model);
            self.model = self.optim.step(lr, self.model.clone(), grads);

            self.metrics
                .step(&host_logits, &labels, names.len(), &[("Loss", loss_value)]);
        }

        let values = self.metrics.evaluate();
        tracing::info!("Epoch {epoch} - Training Metrics: {}", format_metrics(&values));
        CsvLog::new(self.run_dir.join(TRAIN_CSV)).append(epoch, &values)?;
        self.tracker.log(epoch, &prefixed("trn", &values))?;
        let path = save_checkpoint::<B, M>(&self.model, &self.checkpoints, epoch)?;
        tracing::debug!("saved checkpoint {}", path.display());
        Ok(())
    }

    fn validate(&mut self, name: &str, loss_kind: LossKind) -> Result<(), TrainError> {
        let loader = self.loaders.get(name)?;
        let epoch = self.epoch;
        tracing::info!("Epoch {epoch} - Validation Started");

        self.metrics.reset();
        let model = self.model.valid();
        for batch in loader.iter::<B::InnerBackend>(&self.device) {
            if !batch.has_valid_pixels() {
                continue;
            }
            let TileBatch {
                images,
                targets,
                labels,
                names,
            } = batch;
            let logits = model.forward(images);
            let loss_value = scalar(loss_kind.compute(logits.clone(), targets))?;
            let host_logits = to_host(logits)?;
            self.metrics
                .step(&host_logits, &labels, names.len(), &[("Loss", loss_value)]);
        }

        let values = self.metrics.evaluate();
        let tag = csv_tag(name);
        tracing::info!("Epoch {epoch} - Validation Metrics: {}", format_metrics(&values));
        CsvLog::new(self.run_dir.join(validation_csv(&tag))).append(epoch, &values)?;
        self.tracker.log(epoch, &prefixed(&tag, &values))?;
        Ok(())
    }

    fn log_images(&mut self) -> Result<(), TrainError> {
        tracing::debug!("Epoch {} - Image Logging", self.epoch);
        let model = self.model.valid();
        let mut probabilities = Vec::new();
        for batch in self.vis.iter::<B::InnerBackend>(&self.device) {
            probabilities.extend(to_host(sigmoid(model.forward(batch.images)))?);
        }
        let tile = self.vis.dataset().tile_size;
        self.history.append(&probabilities, tile * tile);
        render_tiles(
            self.vis.dataset(),
            &self.sources,
            &self.history,
            &self.run_dir.join(PREDICTIONS_DIR),
        )?;
        Ok(())
    }
}
