//! Tile cutting and dataset specs.

use crate::sources::DataSources;
use crate::types::{DatasetError, DatasetResult, Tile};
use ndarray::{Array2, Array3};
use rayon::prelude::*;
use scene_cube::{Scene, MASK_IGNORE};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

fn default_cube_dir() -> PathBuf {
    PathBuf::from("planet_cubes")
}

fn default_tile_size() -> usize {
    256
}

/// Declarative dataset entry of a run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatasetSpec {
    /// Relative to the data root.
    #[serde(default = "default_cube_dir")]
    pub cube_dir: PathBuf,
    /// Scene ids (cube file stems) to use; all cubes when absent.
    #[serde(default)]
    pub scenes: Option<Vec<String>>,
    #[serde(default = "default_tile_size")]
    pub tile_size: usize,
    /// Defaults to the tile size (no overlap).
    #[serde(default)]
    pub stride: Option<usize>,
    #[serde(default)]
    pub shuffle: bool,
    /// Random horizontal and vertical flips.
    #[serde(default)]
    pub augment: bool,
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub drop_last: bool,
}

impl Default for DatasetSpec {
    fn default() -> Self {
        Self {
            cube_dir: default_cube_dir(),
            scenes: None,
            tile_size: default_tile_size(),
            stride: None,
            shuffle: false,
            augment: false,
            seed: 0,
            batch_size: None,
            drop_last: false,
        }
    }
}

impl DatasetSpec {
    pub fn stride(&self) -> usize {
        self.stride.unwrap_or(self.tile_size)
    }

    pub fn validate(&self) -> DatasetResult<()> {
        if self.tile_size == 0 {
            return Err(DatasetError::InvalidSpec("tile_size must be positive".into()));
        }
        if self.stride() == 0 {
            return Err(DatasetError::InvalidSpec("stride must be positive".into()));
        }
        if self.batch_size == Some(0) {
            return Err(DatasetError::InvalidSpec("batch_size must be positive".into()));
        }
        Ok(())
    }
}

/// Cube files directly inside `dir`, sorted; restricted to `allow` stems when given.
pub fn list_cubes(dir: &Path, allow: Option<&[String]>) -> DatasetResult<Vec<PathBuf>> {
    let entries = std::fs::read_dir(dir).map_err(|e| DatasetError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;
    let mut out = Vec::new();
    for entry in entries {
        let path = entry
            .map_err(|e| DatasetError::Io {
                path: dir.to_path_buf(),
                source: e,
            })?
            .path();
        if !path.is_file()
            || path
                .file_name()
                .is_some_and(|n| n == scene_cube::orchestrator::REPORT_FILE)
        {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        if allow.is_some_and(|names| !names.iter().any(|n| n == stem)) {
            continue;
        }
        out.push(path);
    }
    out.sort();
    Ok(out)
}

/// Row-major tile origins `(row, col)` covering `rows x cols`.
pub fn tile_origins(rows: usize, cols: usize, tile: usize, stride: usize) -> Vec<(usize, usize)> {
    if rows < tile || cols < tile || tile == 0 || stride == 0 {
        return Vec::new();
    }
    let mut out = Vec::new();
    for r in (0..=rows - tile).step_by(stride) {
        for c in (0..=cols - tile).step_by(stride) {
            out.push((r, c));
        }
    }
    out
}

/// Cut a stacked input and its mask into tiles; NaN inputs become 0 with an ignored target.
pub fn cut_tiles(
    scene_id: &str,
    input: &Array3<f32>,
    mask: Option<&Array2<u8>>,
    tile: usize,
    stride: usize,
) -> Vec<Tile> {
    let (channels, rows, cols) = input.dim();
    tile_origins(rows, cols, tile, stride)
        .into_iter()
        .enumerate()
        .map(|(index, (r0, c0))| {
            let mut image = Vec::with_capacity(channels * tile * tile);
            let mut target = vec![MASK_IGNORE; tile * tile];
            if let Some(mask) = mask {
                for r in 0..tile {
                    for c in 0..tile {
                        target[r * tile + c] = mask[[r0 + r, c0 + c]];
                    }
                }
            }
            for ch in 0..channels {
                for r in 0..tile {
                    for c in 0..tile {
                        let v = input[[ch, r0 + r, c0 + c]];
                        if v.is_finite() {
                            image.push(v);
                        } else {
                            image.push(0.0);
                            target[r * tile + c] = MASK_IGNORE;
                        }
                    }
                }
            }
            Tile {
                name: format!("{scene_id}_{index}"),
                scene: scene_id.to_string(),
                index,
                image,
                target,
            }
        })
        .collect()
}

pub fn scene_tiles(
    scene: &Scene,
    sources: &DataSources,
    tile: usize,
    stride: usize,
) -> DatasetResult<Vec<Tile>> {
    let input = sources.stack(scene)?;
    Ok(cut_tiles(&scene.id, &input, scene.mask.as_ref(), tile, stride))
}

/// In-memory tiles of one dataset.
#[derive(Debug, Clone, Default)]
pub struct TileDataset {
    pub tiles: Vec<Tile>,
    pub channels: usize,
    pub tile_size: usize,
}

impl TileDataset {
    /// Load every selected cube under `data_root/spec.cube_dir` on the given pool.
    pub fn load(
        data_root: &Path,
        spec: &DatasetSpec,
        sources: &DataSources,
        pool: &rayon::ThreadPool,
    ) -> DatasetResult<Self> {
        spec.validate()?;
        let dir = data_root.join(&spec.cube_dir);
        let cubes = list_cubes(&dir, spec.scenes.as_deref())?;
        let (tile, stride) = (spec.tile_size, spec.stride());
        let per_scene: Vec<DatasetResult<Vec<Tile>>> = pool.install(|| {
            cubes
                .par_iter()
                .map(|path| {
                    let scene = Scene::load(path)?;
                    scene_tiles(&scene, sources, tile, stride)
                })
                .collect()
        });
        let mut tiles = Vec::new();
        for scene_tiles in per_scene {
            tiles.extend(scene_tiles?);
        }
        tracing::info!(
            cubes = cubes.len(),
            tiles = tiles.len(),
            "loaded tiles from {}",
            dir.display()
        );
        Ok(Self {
            tiles,
            channels: sources.channels(),
            tile_size: tile,
        })
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }

    /// Keep only tiles with at least one slump pixel.
    pub fn slumps_only(mut self) -> Self {
        self.tiles.retain(Tile::has_slump);
        self
    }
}

/// Fixed tiles rendered after every `log_images` step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisualizationSpec {
    #[serde(default = "default_cube_dir")]
    pub cube_dir: PathBuf,
    #[serde(default = "default_tile_size")]
    pub tile_size: usize,
    /// Scene id to tile indices (row-major, non-overlapping).
    #[serde(default)]
    pub tiles: BTreeMap<String, Vec<usize>>,
}

impl VisualizationSpec {
    pub fn load(
        &self,
        data_root: &Path,
        sources: &DataSources,
        pool: &rayon::ThreadPool,
    ) -> DatasetResult<TileDataset> {
        if self.tile_size == 0 {
            return Err(DatasetError::InvalidSpec("tile_size must be positive".into()));
        }
        let dir = data_root.join(&self.cube_dir);
        let scenes: Vec<String> = self.tiles.keys().cloned().collect();
        let cubes = list_cubes(&dir, Some(&scenes))?;
        for scene in &scenes {
            let found = cubes
                .iter()
                .any(|p| p.file_stem().and_then(|s| s.to_str()) == Some(scene.as_str()));
            if !found {
                return Err(DatasetError::MissingScene {
                    scene: scene.clone(),
                    dir,
                });
            }
        }
        let tile = self.tile_size;
        let per_scene: Vec<DatasetResult<Vec<Tile>>> = pool.install(|| {
            cubes
                .par_iter()
                .map(|path| {
                    let scene = Scene::load(path)?;
                    let wanted = self.tiles.get(&scene.id).cloned().unwrap_or_default();
                    let all = scene_tiles(&scene, sources, tile, tile)?;
                    wanted
                        .into_iter()
                        .map(|idx| {
                            all.get(idx).cloned().ok_or_else(|| DatasetError::MissingTile {
                                scene: scene.id.clone(),
                                index: idx,
                            })
                        })
                        .collect()
                })
                .collect()
        });
        let mut tiles = Vec::new();
        for t in per_scene {
            tiles.extend(t?);
        }
        Ok(TileDataset {
            tiles,
            channels: sources.channels(),
            tile_size: tile,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn origins_are_row_major_and_skip_partial_tiles() {
        assert_eq!(
            tile_origins(5, 6, 2, 2),
            vec![(0, 0), (0, 2), (0, 4), (2, 0), (2, 2), (2, 4)]
        );
        assert!(tile_origins(1, 6, 2, 2).is_empty());
    }

    #[test]
    fn nan_inputs_become_ignored_targets() {
        let mut input = Array3::from_elem((2, 2, 2), 1.0f32);
        input[[1, 0, 1]] = f32::NAN;
        let mask = Array2::from_elem((2, 2), 1u8);
        let tiles = cut_tiles("s", &input, Some(&mask), 2, 2);
        assert_eq!(tiles.len(), 1);
        assert_eq!(tiles[0].name, "s_0");
        assert_eq!(tiles[0].target, vec![1, 255, 1, 1]);
        assert_eq!(tiles[0].image[5], 0.0);
    }

    #[test]
    fn missing_mask_ignores_everything() {
        let input = Array3::from_elem((1, 2, 2), 1.0f32);
        let tiles = cut_tiles("s", &input, None, 2, 2);
        assert!(tiles[0].target.iter().all(|&t| t == MASK_IGNORE));
        assert!(!tiles[0].has_slump());
    }

    #[test]
    fn spec_defaults() {
        let spec: DatasetSpec = serde_yaml::from_str("shuffle: false").unwrap();
        assert_eq!(spec.cube_dir, PathBuf::from("planet_cubes"));
        assert_eq!(spec.tile_size, 256);
        assert_eq!(spec.stride(), 256);
        assert!(!spec.shuffle);
        assert_eq!(spec, DatasetSpec::default());
    }
}
