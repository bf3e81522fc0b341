#![recursion_limit = "256"]

pub mod checkpoint;
pub mod config;
pub mod engine;
pub mod loaders;
pub mod lr;
pub mod metric_log;
pub mod metrics;
pub mod schedule;
pub mod scopes;
pub mod util;
pub mod visualize;

pub use config::{ConfigError, LrSchedulerKind, RunConfig, RunInfo};
pub use engine::{RunState, Trainer};
pub use loaders::{LoaderCache, LoaderContext};
pub use metrics::{MetricKind, Metrics};
pub use schedule::{Phase, Step};
pub use scopes::ConfigScopes;
pub use util::{prepare_run, run_train, RunSetup, TrainArgs};

use burn::backend::Autodiff;
use std::path::PathBuf;
use thiserror::Error;

/// Backend alias for training (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type TrainBackend = burn::backend::Wgpu<f32>;
#[cfg(not(feature = "backend-wgpu"))]
pub type TrainBackend = burn::backend::NdArray<f32>;

pub type ADBackend = Autodiff<TrainBackend>;

#[derive(Debug, Error)]
pub enum TrainError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Dataset(#[from] tile_dataset::DatasetError),
    #[error(transparent)]
    Model(#[from] models::ModelError),
    #[error("There is no checkpoint at {0} to resume from")]
    CheckpointNotFound(PathBuf),
    #[error("checkpoint {path}: {msg}")]
    Checkpoint { path: PathBuf, msg: String },
    #[error("cannot resolve loader `{0}`: not a dataset name or slump_tiles(<dataset>)")]
    UnresolvableLoader(String),
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write image {path}: {msg}")]
    Image { path: PathBuf, msg: String },
    #[error("tensor readback failed: {0}")]
    Tensor(String),
    #[error(transparent)]
    Log(#[from] anyhow::Error),
}
