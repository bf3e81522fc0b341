#![allow(dead_code)]

use cli_support::{DataDirArgs, LogDirArgs};
use ndarray::{Array2, Array3};
use scene_cube::{GeoTransform, Grid, Layer, Scene};
use std::path::Path;
use training::TrainArgs;

pub const TWO_EPOCHS: &str = "  - phase: p1
    epochs: 2
    steps:
      - train_on: train
      - validate_on: val
";

/// 4x4 planet scene; slump in the top-left pixel, ignored bottom-right pixel.
pub fn write_cube(dir: &Path, id: &str) {
    let grid = Grid {
        crs: Some("EPSG:32606".into()),
        width: 4,
        height: 4,
        transform: GeoTransform {
            origin_x: 0.0,
            origin_y: 12.0,
            pixel_width: 3.0,
            pixel_height: -3.0,
        },
    };
    let mut scene = Scene::new(id, grid, None);
    let planet =
        Array3::from_shape_fn((4, 4, 4), |(b, r, c)| 500.0 + (b * 16 + r * 4 + c) as f32 * 100.0);
    scene
        .push_layer(Layer::new(
            "planet",
            ["blue", "green", "red", "nir"].map(String::from).to_vec(),
            planet,
        ))
        .unwrap();
    let mut mask = Array2::<u8>::zeros((4, 4));
    mask[[0, 0]] = 1;
    mask[[3, 3]] = 255;
    scene.set_mask(mask).unwrap();
    scene.save(dir, "nc").unwrap();
}

pub fn config_yaml(schedule: &str, extra: &str) -> String {
    format!(
        "data_sources: [planet, ndvi]
model:
  architecture: FCN
  base_channels: 4
learning_rate: 0.001
batch_size: 2
data_threads: 1
datasets:
  train:
    cube_dir: planet_cubes
    tile_size: 2
    scenes: [scene_a]
    shuffle: true
    augment: true
  val:
    cube_dir: planet_cubes
    tile_size: 2
    scenes: [scene_b]
schedule:
{schedule}visualization_tiles:
  tile_size: 2
  tiles:
    scene_b: [0, 3]
{extra}"
    )
}

/// Data root with two cubes plus a config file; returns the args of a run named `name`.
pub struct Workspace {
    pub dir: tempfile::TempDir,
}

impl Workspace {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let cubes = dir.path().join("data").join("planet_cubes");
        write_cube(&cubes, "scene_a");
        write_cube(&cubes, "scene_b");
        Self { dir }
    }

    pub fn data_root(&self) -> std::path::PathBuf {
        self.dir.path().join("data")
    }

    pub fn log_dir(&self) -> std::path::PathBuf {
        self.dir.path().join("logs")
    }

    pub fn args(&self, name: &str, config: &str) -> TrainArgs {
        let config_path = self.dir.path().join(format!("{name}.yml"));
        std::fs::write(&config_path, config).unwrap();
        TrainArgs {
            summary: false,
            data: DataDirArgs {
                data_dir: self.data_root(),
            },
            logs: LogDirArgs {
                log_dir: self.log_dir(),
            },
            name: name.to_string(),
            config: config_path,
            resume: None,
        }
    }
}

pub fn lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(String::from)
        .collect()
}
