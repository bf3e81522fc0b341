//! Prediction panels for the fixed visualization tiles.

use crate::TrainError;
use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};
use tile_dataset::{DataSource, DataSources, TileDataset};

pub const PREDICTIONS_DIR: &str = "tile_predictions";
const GAP: u32 = 2;
const GAP_COLOR: Rgb<u8> = Rgb([255, 255, 255]);

/// Sigmoid outputs of every `log_images` call, per tile.
#[derive(Debug, Clone, Default)]
pub struct PredictionHistory {
    /// `[tile][epoch][T * T]`
    tiles: Vec<Vec<Vec<f32>>>,
}

impl PredictionHistory {
    pub fn new(num_tiles: usize) -> Self {
        Self {
            tiles: vec![Vec::new(); num_tiles],
        }
    }

    /// Append one epoch of probabilities laid out tile after tile.
    pub fn append(&mut self, probabilities: &[f32], pixels_per_tile: usize) {
        for (history, chunk) in self
            .tiles
            .iter_mut()
            .zip(probabilities.chunks(pixels_per_tile.max(1)))
        {
            history.push(chunk.to_vec());
        }
    }

    pub fn epochs(&self) -> usize {
        self.tiles.first().map_or(0, Vec::len)
    }

    pub fn tile(&self, index: usize) -> &[Vec<f32>] {
        self.tiles.get(index).map(Vec::as_slice).unwrap_or(&[])
    }
}

fn to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

/// Min-max stretch of one channel plane to `[0, 1]`.
fn stretch(plane: &[f32]) -> Vec<f32> {
    let (lo, hi) = plane
        .iter()
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let range = hi - lo;
    if !range.is_finite() || range <= f32::EPSILON {
        return vec![0.0; plane.len()];
    }
    plane.iter().map(|v| (v - lo) / range).collect()
}

fn plane(image: &[f32], channel: usize, pixels: usize) -> &[f32] {
    &image[channel * pixels..(channel + 1) * pixels]
}

fn rgb_panel(r: &[f32], g: &[f32], b: &[f32], tile: u32) -> RgbImage {
    RgbImage::from_fn(tile, tile, |x, y| {
        let i = (y * tile + x) as usize;
        Rgb([to_u8(r[i]), to_u8(g[i]), to_u8(b[i])])
    })
}

fn gray_panel(values: &[f32], tile: u32) -> RgbImage {
    rgb_panel(values, values, values, tile)
}

/// True-colour composite from the spectral channels (bands ordered blue, green, red, nir).
fn composite_panel(image: &[f32], sources: &DataSources, tile: u32) -> RgbImage {
    let pixels = (tile * tile) as usize;
    let spectral = sources
        .offset_of(DataSource::Planet)
        .or_else(|| sources.offset_of(DataSource::Sentinel2));
    match spectral {
        Some(offset) => {
            let r = stretch(plane(image, offset + 2, pixels));
            let g = stretch(plane(image, offset + 1, pixels));
            let b = stretch(plane(image, offset, pixels));
            rgb_panel(&r, &g, &b, tile)
        }
        None => gray_panel(&stretch(plane(image, 0, pixels)), tile),
    }
}

/// TCVIS if present, else NDVI, else blank.
fn auxiliary_panel(image: &[f32], sources: &DataSources, tile: u32) -> RgbImage {
    let pixels = (tile * tile) as usize;
    if let Some(offset) = sources.offset_of(DataSource::Tcvis) {
        return rgb_panel(
            plane(image, offset, pixels),
            plane(image, offset + 1, pixels),
            plane(image, offset + 2, pixels),
            tile,
        );
    }
    if let Some(offset) = sources.offset_of(DataSource::Ndvi) {
        let ndvi: Vec<f32> = plane(image, offset, pixels)
            .iter()
            .map(|v| (v + 1.0) / 2.0)
            .collect();
        return gray_panel(&ndvi, tile);
    }
    RgbImage::new(tile, tile)
}

fn target_panel(target: &[u8], tile: u32) -> RgbImage {
    RgbImage::from_fn(tile, tile, |x, y| match target[(y * tile + x) as usize] {
        0 => Rgb([0, 0, 0]),
        255 => Rgb([128, 128, 128]),
        _ => Rgb([255, 255, 255]),
    })
}

fn hstack(panels: &[RgbImage], tile: u32) -> RgbImage {
    let n = panels.len() as u32;
    let width = n * tile + n.saturating_sub(1) * GAP;
    let mut out = RgbImage::from_pixel(width.max(1), tile, GAP_COLOR);
    for (i, panel) in panels.iter().enumerate() {
        let x0 = i as u32 * (tile + GAP);
        for (x, y, px) in panel.enumerate_pixels() {
            out.put_pixel(x0 + x, y, *px);
        }
    }
    out
}

/// Render `<out_dir>/<tile>.jpg` for every visualization tile.
pub fn render_tiles(
    dataset: &TileDataset,
    sources: &DataSources,
    history: &PredictionHistory,
    out_dir: &Path,
) -> Result<Vec<PathBuf>, TrainError> {
    std::fs::create_dir_all(out_dir).map_err(|source| TrainError::Io {
        path: out_dir.to_path_buf(),
        source,
    })?;
    let tile = dataset.tile_size as u32;
    let mut written = Vec::with_capacity(dataset.tiles.len());
    for (i, t) in dataset.tiles.iter().enumerate() {
        let mut panels = vec![
            composite_panel(&t.image, sources, tile),
            target_panel(&t.target, tile),
            auxiliary_panel(&t.image, sources, tile),
        ];
        panels.extend(history.tile(i).iter().map(|p| gray_panel(p, tile)));
        let path = out_dir.join(format!("{}.jpg", t.name));
        hstack(&panels, tile)
            .save(&path)
            .map_err(|e| TrainError::Image {
                path: path.clone(),
                msg: e.to_string(),
            })?;
        written.push(path);
    }
    Ok(written)
}
