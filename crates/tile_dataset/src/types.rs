//! Core types and error definitions for tile_dataset.

use scene_cube::CubeError;
use std::path::PathBuf;
use thiserror::Error;

pub type DatasetResult<T> = Result<T, DatasetError>;

#[derive(Debug, Error)]
pub enum DatasetError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Cube(#[from] CubeError),
    #[error("unknown data source `{name}`. Available options are: {available:?}")]
    UnknownDataSource {
        name: String,
        available: Vec<&'static str>,
    },
    #[error("scene {scene} has no `{layer}` layer")]
    MissingLayer { scene: String, layer: String },
    #[error("no cube for scene {scene} in {dir}")]
    MissingScene { scene: String, dir: PathBuf },
    #[error("scene {scene} has no tile {index}")]
    MissingTile { scene: String, index: usize },
    #[error("invalid dataset spec: {0}")]
    InvalidSpec(String),
    #[error("{0}")]
    Other(String),
}

/// One fixed-size tile cut from a scene.
#[derive(Debug, Clone, PartialEq)]
pub struct Tile {
    /// `<scene>_<index>`
    pub name: String,
    pub scene: String,
    pub index: usize,
    /// Channels-first `[C, T, T]`, flattened.
    pub image: Vec<f32>,
    /// `[T, T]` labels: 0 background, 1 slump, 255 ignore.
    pub target: Vec<u8>,
}

impl Tile {
    pub fn has_slump(&self) -> bool {
        self.target.contains(&scene_cube::MASK_SLUMP)
    }
}
