//! Phases and steps of a training schedule.
//!
//! In YAML a step is either a bare command (`- log_images`) or a single-key map
//! whose value names a loader (`- train_on: train`).

use crate::config::ConfigError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawStep", into = "RawStep")]
pub enum Step {
    TrainOn(String),
    ValidateOn(String),
    LogImages,
}

impl Step {
    pub fn command(&self) -> &'static str {
        match self {
            Step::TrainOn(_) => "train_on",
            Step::ValidateOn(_) => "validate_on",
            Step::LogImages => "log_images",
        }
    }

    pub fn loader(&self) -> Option<&str> {
        match self {
            Step::TrainOn(name) | Step::ValidateOn(name) => Some(name),
            Step::LogImages => None,
        }
    }
}

impl std::fmt::Display for Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.loader() {
            Some(name) => write!(f, "{}({name})", self.command()),
            None => f.write_str(self.command()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawStep {
    Bare(String),
    Keyed(BTreeMap<String, serde_yaml::Value>),
}

fn keyed(command: &str, value: serde_yaml::Value) -> Result<Step, ConfigError> {
    let name = || match &value {
        serde_yaml::Value::String(s) if !s.trim().is_empty() => Ok(s.clone()),
        other => Err(ConfigError::InvalidStep(format!(
            "`{command}` needs a loader name, got {other:?}"
        ))),
    };
    match command {
        "train_on" => Ok(Step::TrainOn(name()?)),
        "validate_on" => Ok(Step::ValidateOn(name()?)),
        "log_images" => Ok(Step::LogImages),
        other => Err(ConfigError::UnknownStep(other.to_string())),
    }
}

impl TryFrom<RawStep> for Step {
    type Error = ConfigError;

    fn try_from(raw: RawStep) -> Result<Self, Self::Error> {
        match raw {
            RawStep::Bare(command) => keyed(&command, serde_yaml::Value::Null),
            RawStep::Keyed(map) => {
                let mut entries = map.into_iter();
                match (entries.next(), entries.next()) {
                    (Some((command, value)), None) => keyed(&command, value),
                    _ => Err(ConfigError::InvalidStep(
                        "a step map must have exactly one key".into(),
                    )),
                }
            }
        }
    }
}

impl From<Step> for RawStep {
    fn from(step: Step) -> Self {
        let command = step.command().to_string();
        match step {
            Step::LogImages => RawStep::Bare(command),
            Step::TrainOn(name) | Step::ValidateOn(name) => {
                RawStep::Keyed(BTreeMap::from([(command, serde_yaml::Value::String(name))]))
            }
        }
    }
}

/// One schedule entry: `epochs` repetitions of `steps`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Phase {
    pub phase: String,
    pub epochs: usize,
    pub steps: Vec<Step>,
    /// Phase-level overrides of run-level keys, e.g. `loss_function`.
    #[serde(flatten)]
    pub overrides: serde_yaml::Mapping,
}
