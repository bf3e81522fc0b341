//! Metric sinks: per-tag CSV files and a JSON-lines experiment tracker.

use anyhow::Context;
use serde_json::{Map, Value};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// File-name safe tag: characters outside `[A-Za-z0-9_-]` become `_`, trailing `_` trimmed.
pub fn csv_tag(name: &str) -> String {
    let tag: String = name
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = tag.trim_end_matches('_');
    if trimmed.is_empty() {
        "val".to_string()
    } else {
        trimmed.to_string()
    }
}

/// Append-only CSV of one row per epoch; the header is written with the first row.
#[derive(Debug, Clone)]
pub struct CsvLog {
    path: PathBuf,
}

impl CsvLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn append(&self, epoch: usize, values: &[(String, f64)]) -> anyhow::Result<()> {
        let new_file = !self.path.exists();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .with_context(|| format!("opening {}", self.path.display()))?;
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(file);
        if new_file {
            let header = std::iter::once("Epoch".to_string())
                .chain(values.iter().map(|(name, _)| name.clone()));
            writer.write_record(header)?;
        }
        let row = std::iter::once(epoch.to_string())
            .chain(values.iter().map(|(_, v)| v.to_string()));
        writer.write_record(row)?;
        writer.flush()?;
        Ok(())
    }
}

/// Experiment tracking sink keyed by the global epoch.
pub trait Tracker {
    fn log(&mut self, step: usize, values: &[(String, f64)]) -> anyhow::Result<()>;
}

/// One JSON object per `log` call: `{"step": n, "<key>": value, ...}`.
pub struct JsonlTracker {
    path: PathBuf,
    out: BufWriter<File>,
}

impl JsonlTracker {
    pub fn create(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let path = path.into();
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("opening tracker file {}", path.display()))?;
        Ok(Self {
            path,
            out: BufWriter::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Tracker for JsonlTracker {
    fn log(&mut self, step: usize, values: &[(String, f64)]) -> anyhow::Result<()> {
        let mut record = Map::new();
        record.insert("step".into(), Value::from(step));
        for (key, value) in values {
            // NaN and infinities become null.
            record.insert(key.clone(), Value::from(*value));
        }
        serde_json::to_writer(&mut self.out, &Value::Object(record))?;
        self.out.write_all(b"\n")?;
        self.out.flush()?;
        Ok(())
    }
}

/// Prefix every key with `<prefix>/`.
pub fn prefixed(prefix: &str, values: &[(String, f64)]) -> Vec<(String, f64)> {
    values
        .iter()
        .map(|(k, v)| (format!("{prefix}/{k}"), *v))
        .collect()
}
