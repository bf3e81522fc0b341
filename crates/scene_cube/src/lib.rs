//! Scene assembly and data-cube building for thaw-slump segmentation.
//!
//! - GeoTIFF rasters and grids (`raster`, `geo`)
//! - Label and footprint stores (`labels`)
//! - Scenes and the cube file format (`scene`)
//! - Primary imagery sources and auxiliary layers (`sources`, `layers`)
//! - Job enumeration and parallel builds (`orchestrator`)

pub mod geo;
pub mod labels;
pub mod layers;
pub mod orchestrator;
pub mod raster;
pub mod scene;
pub mod sources;
pub mod types;

pub use geo::{Bounds, GeoTransform, Grid, Polygon};
pub use labels::SceneInfo;
pub use layers::{complete_scene, AuxiliaryLayer, AuxiliaryPaths};
pub use orchestrator::{
    build_all, enumerate_jobs, run_jobs, BuildJob, BuildReport, CubeBuildConfig, CubeMode,
    JobOutcome, JobStatus, Parallelism,
};
pub use raster::Raster;
pub use scene::{CubeHeader, Layer, Scene, MASK_BACKGROUND, MASK_IGNORE, MASK_SLUMP};
pub use sources::{PlanetScope, SceneQuery, Sentinel2Archive};
pub use types::{CubeError, CubeResult};
