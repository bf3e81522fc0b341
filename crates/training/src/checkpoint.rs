//! Epoch checkpoints under `<run>/checkpoints/<NN>.bin`.

use crate::TrainError;
use burn::module::Module;
use burn::record::{BinFileRecorder, FullPrecisionSettings};
use burn::tensor::backend::Backend;
use std::path::{Path, PathBuf};

pub const CHECKPOINT_DIR: &str = "checkpoints";
pub const CHECKPOINT_EXT: &str = "bin";

pub fn checkpoint_path(dir: &Path, epoch: usize) -> PathBuf {
    dir.join(format!("{epoch:02}.{CHECKPOINT_EXT}"))
}

pub fn save_checkpoint<B: Backend, M: Module<B>>(
    model: &M,
    dir: &Path,
    epoch: usize,
) -> Result<PathBuf, TrainError> {
    let path = checkpoint_path(dir, epoch);
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .clone()
        .save_file(&path, &recorder)
        .map_err(|e| TrainError::Checkpoint {
            path: path.clone(),
            msg: e.to_string(),
        })?;
    Ok(path)
}

pub fn load_checkpoint<B: Backend, M: Module<B>>(
    model: M,
    path: &Path,
    device: &B::Device,
) -> Result<M, TrainError> {
    let recorder = BinFileRecorder::<FullPrecisionSettings>::new();
    model
        .load_file(path, &recorder, device)
        .map_err(|e| TrainError::Checkpoint {
            path: path.to_path_buf(),
            msg: e.to_string(),
        })
}

/// Checkpoint with the numerically largest integer stem in `dir`.
pub fn latest_checkpoint(dir: &Path) -> Option<PathBuf> {
    std::fs::read_dir(dir)
        .ok()?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| p.is_file())
        .filter_map(|p| {
            let epoch: u64 = p.file_stem()?.to_str()?.parse().ok()?;
            Some((epoch, p))
        })
        .max_by_key(|(epoch, _)| *epoch)
        .map(|(_, p)| p)
}

/// Resolve a resume argument to a checkpoint file.
///
/// A directory resolves to the latest checkpoint of its `checkpoints/`
/// subdirectory (or of the directory itself); a file is used as is. Paths that
/// do not exist are retried relative to `log_dir`, so a run id works too.
pub fn resolve_resume(resume: &Path, log_dir: &Path) -> Result<PathBuf, TrainError> {
    let candidate = if resume.exists() {
        resume.to_path_buf()
    } else {
        let in_logs = log_dir.join(resume);
        if !in_logs.exists() {
            return Err(TrainError::CheckpointNotFound(resume.to_path_buf()));
        }
        in_logs
    };
    if candidate.is_file() {
        return Ok(candidate);
    }
    let nested = candidate.join(CHECKPOINT_DIR);
    let dir = if nested.is_dir() { nested } else { candidate };
    latest_checkpoint(&dir).ok_or(TrainError::CheckpointNotFound(dir))
}
