//! Tile extraction and burn batching over scene data cubes.
//!
//! - Data sources and channel scaling (`sources`)
//! - Dataset specs and tile cutting (`tiles`)
//! - Shuffled, augmented batch iteration (`batch`)

pub mod batch;
pub mod sources;
pub mod tiles;
pub mod types;

pub use batch::{BatchIter, LoaderOptions, RawBatch, TileBatch, TileLoader};
pub use sources::{DataSource, DataSources};
pub use tiles::{DatasetSpec, TileDataset, VisualizationSpec};
pub use types::*;

use std::sync::Arc;

/// Worker pool for cube loading and batch assembly.
pub fn build_pool(threads: usize) -> DatasetResult<Arc<rayon::ThreadPool>> {
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads.max(1))
        .thread_name(|i| format!("tile-loader-{i}"))
        .build()
        .map(Arc::new)
        .map_err(|e| DatasetError::Other(format!("build loader pool: {e}")))
}
