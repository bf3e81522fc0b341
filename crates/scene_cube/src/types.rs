//! Error definitions shared by the scene builders and the orchestrator.

use std::path::PathBuf;
use thiserror::Error;

pub type CubeResult<T> = Result<T, CubeError>;

#[derive(Debug, Error)]
pub enum CubeError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("tiff error at {path}: {source}")]
    Tiff {
        path: PathBuf,
        #[source]
        source: tiff::TiffError,
    },
    #[error("shapefile error at {path}: {source}")]
    Shapefile {
        path: PathBuf,
        #[source]
        source: shapefile::Error,
    },
    #[error("invalid raster {path}: {msg}")]
    InvalidRaster { path: PathBuf, msg: String },
    #[error("no {layer} data under {root} covers scene {scene}")]
    MissingAuxiliaryData {
        layer: String,
        scene: String,
        root: PathBuf,
    },
    #[error("cannot align layer {layer} to scene {scene}: {msg}")]
    Alignment {
        layer: String,
        scene: String,
        msg: String,
    },
    #[error("no label shapefile found in {dir}")]
    MissingLabels { dir: PathBuf },
    #[error("invalid scene query: {0}")]
    InvalidQuery(String),
    #[error("cube format error at {path}: {msg}")]
    Format { path: PathBuf, msg: String },
    #[error("{path} was written by more than one job: {}", jobs.join(", "))]
    DuplicateOutput { path: PathBuf, jobs: Vec<String> },
    #[error("job panicked: {0}")]
    Panicked(String),
    #[error("{0}")]
    Other(String),
}

impl CubeError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CubeError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn tiff(path: impl Into<PathBuf>, source: tiff::TiffError) -> Self {
        CubeError::Tiff {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn shapefile(path: impl Into<PathBuf>, source: shapefile::Error) -> Self {
        CubeError::Shapefile {
            path: path.into(),
            source,
        }
    }

    /// Short machine-friendly kind used in build reports.
    pub fn kind(&self) -> &'static str {
        match self {
            CubeError::Io { .. } => "io",
            CubeError::Tiff { .. } => "tiff",
            CubeError::Shapefile { .. } => "shapefile",
            CubeError::InvalidRaster { .. } => "invalid_raster",
            CubeError::MissingAuxiliaryData { .. } => "missing_auxiliary_data",
            CubeError::Alignment { .. } => "alignment",
            CubeError::MissingLabels { .. } => "missing_labels",
            CubeError::InvalidQuery(_) => "invalid_query",
            CubeError::Format { .. } => "format",
            CubeError::DuplicateOutput { .. } => "duplicate_output",
            CubeError::Panicked(_) => "panicked",
            CubeError::Other(_) => "other",
        }
    }
}
