//! Build-job enumeration and parallel execution with per-job outcome reporting.

use crate::labels::{has_extension, list_nested_files, load_scene_infos, SceneInfo};
use crate::layers::{complete_scene, AuxiliaryPaths};
use crate::sources::{PlanetScope, SceneQuery, Sentinel2Archive};
use crate::types::{CubeError, CubeResult};
use chrono::{Duration, NaiveDate};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};

pub const REPORT_FILE: &str = "build_report.json";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum CubeMode {
    Planet,
    Sentinel2,
    #[value(name = "s2_timeseries")]
    S2Timeseries,
}

impl CubeMode {
    pub fn output_subdir(&self) -> &'static str {
        match self {
            CubeMode::Planet => "planet_cubes",
            CubeMode::Sentinel2 => "s2_cubes",
            CubeMode::S2Timeseries => "s2_timeseries",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            CubeMode::Planet => "nc",
            CubeMode::Sentinel2 | CubeMode::S2Timeseries => "id",
        }
    }

    /// Acquisition window searched around a labeled footprint.
    pub fn window(&self, label_date: NaiveDate) -> (NaiveDate, NaiveDate) {
        match self {
            CubeMode::S2Timeseries => (
                NaiveDate::from_ymd_opt(2010, 1, 1).unwrap_or(NaiveDate::MIN),
                NaiveDate::from_ymd_opt(2030, 1, 1).unwrap_or(NaiveDate::MAX),
            ),
            CubeMode::Planet | CubeMode::Sentinel2 => {
                (label_date - Duration::days(5), label_date + Duration::days(5))
            }
        }
    }
}

impl std::fmt::Display for CubeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CubeMode::Planet => "planet",
            CubeMode::Sentinel2 => "sentinel2",
            CubeMode::S2Timeseries => "s2_timeseries",
        };
        f.write_str(s)
    }
}

/// Immutable configuration shared by every job of one build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CubeBuildConfig {
    pub data_dir: PathBuf,
    pub mode: CubeMode,
    pub aux: AuxiliaryPaths,
    pub out_dir: PathBuf,
    pub sentinel2_root: PathBuf,
}

impl CubeBuildConfig {
    pub fn new(data_dir: impl Into<PathBuf>, mode: CubeMode) -> Self {
        let data_dir = data_dir.into();
        Self {
            aux: AuxiliaryPaths::under(&data_dir),
            out_dir: data_dir.join(mode.output_subdir()),
            sentinel2_root: data_dir.join("sentinel2"),
            mode,
            data_dir,
        }
    }

    pub fn input_dir(&self) -> PathBuf {
        self.data_dir.join("input")
    }

    pub fn label_root(&self) -> PathBuf {
        self.data_dir
            .join("ML_training_labels")
            .join("retrogressive_thaw_slumps")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum BuildJob {
    Planet { raw: PathBuf },
    Footprint { info: SceneInfo },
}

impl BuildJob {
    pub fn label(&self) -> String {
        match self {
            BuildJob::Planet { raw } => raw.display().to_string(),
            BuildJob::Footprint { info } => format!("{} ({})", info.image_id, info.date),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Parallelism {
    Sequential,
    Pool(usize),
}

impl Parallelism {
    /// `0` runs in the calling thread, negative uses every core, `n` uses `n` workers.
    pub fn from_n_jobs(n_jobs: i64) -> Self {
        match n_jobs {
            0 => Parallelism::Sequential,
            n if n < 0 => Parallelism::Pool(
                std::thread::available_parallelism()
                    .map(|n| n.get())
                    .unwrap_or(1),
            ),
            n => Parallelism::Pool(n as usize),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CubeRecord {
    pub path: PathBuf,
    pub sha256: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Succeeded { cubes: Vec<CubeRecord> },
    Failed { kind: String, error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOutcome {
    pub job: String,
    #[serde(flatten)]
    pub status: JobStatus,
}

impl JobOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, JobStatus::Succeeded { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildReport {
    pub mode: CubeMode,
    pub jobs: Vec<JobOutcome>,
}

impl BuildReport {
    pub fn succeeded(&self) -> usize {
        self.jobs.iter().filter(|j| j.is_success()).count()
    }

    pub fn failed(&self) -> usize {
        self.jobs.len() - self.succeeded()
    }

    pub fn failures(&self) -> impl Iterator<Item = &JobOutcome> {
        self.jobs.iter().filter(|j| !j.is_success())
    }

    pub fn save(&self, path: &Path) -> CubeResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| CubeError::io(parent, e))?;
        }
        let data = serde_json::to_vec_pretty(self)
            .map_err(|e| CubeError::Other(format!("encode build report: {e}")))?;
        std::fs::write(path, data).map_err(|e| CubeError::io(path, e))
    }

    /// Log the summary line and one line per failed job.
    pub fn log_summary(&self) {
        tracing::info!(
            mode = %self.mode,
            succeeded = self.succeeded(),
            failed = self.failed(),
            "cube build finished"
        );
        for outcome in self.failures() {
            if let JobStatus::Failed { kind, error } = &outcome.status {
                tracing::error!(job = %outcome.job, kind = %kind, "{error}");
            }
        }
    }
}

/// Jobs for the configured mode, in deterministic order.
pub fn enumerate_jobs(config: &CubeBuildConfig) -> CubeResult<Vec<BuildJob>> {
    match config.mode {
        CubeMode::Planet => {
            let files = list_nested_files(&config.input_dir(), |n| {
                n.contains("_SR") && has_extension(n, "tif")
            })?;
            Ok(files
                .into_iter()
                .map(|raw| BuildJob::Planet { raw })
                .collect())
        }
        CubeMode::Sentinel2 | CubeMode::S2Timeseries => Ok(load_scene_infos(&config.label_root())?
            .into_iter()
            .map(|info| BuildJob::Footprint { info })
            .collect()),
    }
}

fn sha256_file(path: &Path) -> CubeResult<String> {
    let bytes = std::fs::read(path).map_err(|e| CubeError::io(path, e))?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

/// Build and save every scene of one job.
pub fn run_job(config: &CubeBuildConfig, job: &BuildJob) -> CubeResult<Vec<CubeRecord>> {
    let ext = config.mode.extension();
    let scenes = match job {
        BuildJob::Planet { raw } => {
            let mut scene = PlanetScope::build_scene(raw)?;
            complete_scene(&mut scene, &config.aux)?;
            vec![scene]
        }
        BuildJob::Footprint { info } => {
            let bounds = info
                .bounds()
                .ok_or_else(|| CubeError::InvalidQuery(format!("empty footprint for {}", info.image_id)))?;
            let (start, end) = config.mode.window(info.date);
            let query = SceneQuery {
                id_prefix: info.image_id.clone(),
                bounds,
                crs: None,
                start,
                end,
            };
            let archive = Sentinel2Archive::new(&config.sentinel2_root);
            let mut scenes = archive.build_scenes(&query)?;
            if config.mode == CubeMode::Sentinel2 {
                for scene in &mut scenes {
                    complete_scene(scene, &config.aux)?;
                }
            }
            scenes
        }
    };
    let mut records = Vec::with_capacity(scenes.len());
    for scene in scenes {
        let path = scene.save(&config.out_dir, ext)?;
        let sha256 = sha256_file(&path)?;
        tracing::info!(scene = %scene.id, layers = ?scene.layer_names(), "wrote {}", path.display());
        records.push(CubeRecord { path, sha256 });
    }
    Ok(records)
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

fn run_one(config: &CubeBuildConfig, job: &BuildJob) -> JobOutcome {
    let result = catch_unwind(AssertUnwindSafe(|| run_job(config, job)))
        .unwrap_or_else(|payload| Err(CubeError::Panicked(panic_message(payload))));
    let status = match result {
        Ok(cubes) => JobStatus::Succeeded { cubes },
        Err(err) => {
            tracing::warn!(job = %job.label(), "job failed: {err}");
            JobStatus::Failed {
                kind: err.kind().to_string(),
                error: err.to_string(),
            }
        }
    };
    JobOutcome {
        job: job.label(),
        status,
    }
}

/// Fail every job that wrote a cube path another job also wrote.
fn reject_shared_outputs(outcomes: &mut [JobOutcome]) {
    let mut writers: BTreeMap<PathBuf, Vec<usize>> = BTreeMap::new();
    for (index, outcome) in outcomes.iter().enumerate() {
        if let JobStatus::Succeeded { cubes } = &outcome.status {
            for cube in cubes {
                writers.entry(cube.path.clone()).or_default().push(index);
            }
        }
    }
    for (path, mut indices) in writers {
        indices.dedup();
        if indices.len() < 2 {
            continue;
        }
        let err = CubeError::DuplicateOutput {
            path,
            jobs: indices.iter().map(|&i| outcomes[i].job.clone()).collect(),
        };
        tracing::warn!("{err}");
        for &i in &indices {
            outcomes[i].status = JobStatus::Failed {
                kind: err.kind().to_string(),
                error: err.to_string(),
            };
        }
    }
}

/// Run jobs with the requested parallelism; outcomes keep job order.
pub fn run_jobs(
    config: &CubeBuildConfig,
    jobs: &[BuildJob],
    parallelism: Parallelism,
) -> CubeResult<BuildReport> {
    let mut outcomes = run_with(jobs, parallelism, |job| run_one(config, job))?;
    reject_shared_outputs(&mut outcomes);
    Ok(BuildReport {
        mode: config.mode,
        jobs: outcomes,
    })
}

/// Map `f` over `jobs` in the calling thread or on a dedicated rayon pool.
pub fn run_with<J, T, F>(jobs: &[J], parallelism: Parallelism, f: F) -> CubeResult<Vec<T>>
where
    J: Sync,
    T: Send,
    F: Fn(&J) -> T + Sync,
{
    match parallelism {
        Parallelism::Sequential => Ok(jobs.iter().map(&f).collect()),
        Parallelism::Pool(threads) => {
            use rayon::prelude::*;
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads.max(1))
                .build()
                .map_err(|e| CubeError::Other(format!("build worker pool: {e}")))?;
            Ok(pool.install(|| jobs.par_iter().map(&f).collect()))
        }
    }
}

/// Enumerate, run, write `build_report.json` into the output directory.
pub fn build_all(config: &CubeBuildConfig, parallelism: Parallelism) -> CubeResult<BuildReport> {
    let jobs = enumerate_jobs(config)?;
    tracing::info!(
        mode = %config.mode,
        jobs = jobs.len(),
        ?parallelism,
        "building cubes into {}",
        config.out_dir.display()
    );
    let report = run_jobs(config, &jobs, parallelism)?;
    report.save(&config.out_dir.join(REPORT_FILE))?;
    report.log_summary();
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn n_jobs_maps_to_parallelism() {
        assert_eq!(Parallelism::from_n_jobs(0), Parallelism::Sequential);
        assert_eq!(Parallelism::from_n_jobs(3), Parallelism::Pool(3));
        assert!(matches!(Parallelism::from_n_jobs(-1), Parallelism::Pool(n) if n >= 1));
    }

    #[test]
    fn pool_results_keep_job_order() {
        let jobs: Vec<u32> = (0..32).collect();
        let out = run_with(&jobs, Parallelism::Pool(4), |j| j * 2).unwrap();
        assert_eq!(out, (0..32).map(|j| j * 2).collect::<Vec<_>>());
    }

    fn succeeded(job: &str, paths: &[&str]) -> JobOutcome {
        JobOutcome {
            job: job.into(),
            status: JobStatus::Succeeded {
                cubes: paths
                    .iter()
                    .map(|p| CubeRecord {
                        path: PathBuf::from(p),
                        sha256: String::new(),
                    })
                    .collect(),
            },
        }
    }

    #[test]
    fn jobs_sharing_an_output_path_fail() {
        let mut outcomes = vec![
            succeeded("a", &["out/x.id", "out/a.id"]),
            succeeded("b", &["out/b.id"]),
            succeeded("c", &["out/x.id"]),
        ];
        reject_shared_outputs(&mut outcomes);
        assert!(!outcomes[0].is_success());
        assert!(outcomes[1].is_success());
        let JobStatus::Failed { kind, error } = &outcomes[2].status else {
            panic!("expected failure");
        };
        assert_eq!(kind, "duplicate_output");
        assert!(error.contains("a, c"), "{error}");
    }

    #[test]
    fn modes_pick_outputs_and_windows() {
        let cfg = CubeBuildConfig::new("data", CubeMode::Sentinel2);
        assert_eq!(cfg.out_dir, PathBuf::from("data/s2_cubes"));
        let d = NaiveDate::from_ymd_opt(2020, 7, 10).unwrap();
        let (start, end) = CubeMode::Sentinel2.window(d);
        assert_eq!(start, NaiveDate::from_ymd_opt(2020, 7, 5).unwrap());
        assert_eq!(end, NaiveDate::from_ymd_opt(2020, 7, 15).unwrap());
        assert_eq!(CubeMode::Planet.extension(), "nc");
        assert_eq!(CubeMode::S2Timeseries.extension(), "id");
    }
}
