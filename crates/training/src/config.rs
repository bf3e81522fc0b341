//! Run configuration loaded from YAML.

use crate::schedule::Phase;
use models::{Architecture, LossKind, ModelConfig, ModelError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tile_dataset::{DataSources, DatasetError, DatasetSpec, VisualizationSpec};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("unknown step command `{0}`. Available options are: [\"train_on\", \"validate_on\", \"log_images\"]")]
    UnknownStep(String),
    #[error("invalid step: {0}")]
    InvalidStep(String),
    #[error("could not find \"{key}\" in any scope (searched {scopes:?})")]
    KeyNotFound { key: String, scopes: Vec<String> },
    #[error("config key \"{key}\" has the wrong type: {source}")]
    WrongType {
        key: String,
        #[source]
        source: serde_yaml::Error,
    },
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error(transparent)]
    Dataset(#[from] DatasetError),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LrSchedulerKind {
    StepLR,
    ExponentialLR,
}

/// Provenance recorded in the config snapshot of a run directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunInfo {
    pub timestamp: String,
    pub git_head: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub data_sources: Vec<String>,
    pub model: ModelConfig,
    pub learning_rate: f64,
    pub batch_size: usize,
    pub data_threads: usize,
    pub datasets: BTreeMap<String, DatasetSpec>,
    pub schedule: Vec<Phase>,
    pub visualization_tiles: VisualizationSpec,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resume: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub learning_rate_scheduler: Option<LrSchedulerKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lr_step_size: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lr_gamma: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loss_function: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub run_info: Option<RunInfo>,
}

impl RunConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_yaml(&text).map_err(|e| match e {
            ConfigError::Parse { source, .. } => ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            },
            other => other,
        })
    }

    /// Parse and validate; the step grammar is checked while parsing.
    pub fn from_yaml(text: &str) -> Result<Self, ConfigError> {
        let config: RunConfig = serde_yaml::from_str(text).map_err(|source| ConfigError::Parse {
            path: PathBuf::new(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<Architecture, ConfigError> {
        let arch = self.model.validate()?;
        let sources = self.sources()?;
        if sources.0.is_empty() {
            return Err(ConfigError::Invalid("data_sources must not be empty".into()));
        }
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be positive".into()));
        }
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "learning_rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if self.lr_step_size == Some(0) {
            return Err(ConfigError::Invalid("lr_step_size must be positive".into()));
        }
        for (name, spec) in &self.datasets {
            spec.validate()
                .map_err(|e| ConfigError::Invalid(format!("dataset `{name}`: {e}")))?;
        }
        if let Some(name) = &self.loss_function {
            LossKind::from_name(name)?;
        }
        Ok(arch)
    }

    pub fn sources(&self) -> Result<DataSources, ConfigError> {
        Ok(DataSources::parse(&self.data_sources)?)
    }

    /// Non-empty `resume` entry.
    pub fn resume_path(&self) -> Option<&str> {
        self.resume.as_deref().filter(|r| !r.trim().is_empty())
    }

    /// The whole config as a YAML mapping, used as the outermost lookup scope.
    pub fn to_mapping(&self) -> Result<serde_yaml::Mapping, ConfigError> {
        match serde_yaml::to_value(self) {
            Ok(serde_yaml::Value::Mapping(m)) => Ok(m),
            Ok(_) => Err(ConfigError::Invalid("config did not serialize to a mapping".into())),
            Err(e) => Err(ConfigError::Invalid(e.to_string())),
        }
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let text = serde_yaml::to_string(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }
}
