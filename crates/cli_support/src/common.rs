use clap::Args;
use std::path::{Path, PathBuf};

/// Data processing root shared by the cube builder and the trainer.
#[derive(Debug, Clone, Args)]
pub struct DataDirArgs {
    /// Path to the data processing dir.
    #[arg(long = "data_dir", default_value = "data")]
    pub data_dir: PathBuf,
}

/// Log root shared by the cube builder and the trainer.
#[derive(Debug, Clone, Args)]
pub struct LogDirArgs {
    /// Path to the log dir.
    #[arg(long = "log_dir", default_value = "logs")]
    pub log_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct RunDirOpts {
    pub log_root: PathBuf,
    pub name: Option<String>,
    pub timestamp: String,
}

impl RunDirOpts {
    pub fn new(log_root: PathBuf, name: Option<String>, timestamp: String) -> Self {
        Self {
            log_root,
            name: name.filter(|n| !n.trim().is_empty()),
            timestamp,
        }
    }

    /// Resolve `<log_root>/<name>_<timestamp>`, or `<log_root>/<timestamp>` for unnamed runs.
    pub fn resolve(&self) -> PathBuf {
        let dir_name = match &self.name {
            Some(name) => format!("{name}_{}", self.timestamp),
            None => self.timestamp.clone(),
        };
        self.log_root.join(dir_name)
    }
}

/// Wall-clock timestamp used for run and log file names.
pub fn run_timestamp() -> String {
    chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string()
}

/// Log file for one cube-building invocation: `<log_dir>/build_data_cubes-<timestamp>.log`.
pub fn build_log_path(log_dir: &Path, timestamp: &str) -> PathBuf {
    log_dir.join(format!("build_data_cubes-{timestamp}.log"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn named_runs_prefix_the_timestamp() {
        let opts = RunDirOpts::new("logs".into(), Some("unet".into()), "2024-01-02_03-04-05".into());
        assert_eq!(opts.resolve(), PathBuf::from("logs/unet_2024-01-02_03-04-05"));
    }

    #[test]
    fn blank_names_fall_back_to_timestamp() {
        let opts = RunDirOpts::new("logs".into(), Some("  ".into()), "2024-01-02_03-04-05".into());
        assert_eq!(opts.resolve(), PathBuf::from("logs/2024-01-02_03-04-05"));
    }
}
