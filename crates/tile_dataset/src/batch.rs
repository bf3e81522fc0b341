//! Batch iteration over tile datasets.

use crate::sources::DataSources;
use crate::tiles::{DatasetSpec, TileDataset};
use crate::types::{DatasetError, DatasetResult, Tile};
use burn::tensor::{backend::Backend, Tensor, TensorData};
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq)]
pub struct LoaderOptions {
    pub batch_size: usize,
    pub shuffle: bool,
    pub augment: bool,
    pub seed: u64,
    pub drop_last: bool,
}

impl Default for LoaderOptions {
    fn default() -> Self {
        Self {
            batch_size: 1,
            shuffle: false,
            augment: false,
            seed: 0,
            drop_last: false,
        }
    }
}

/// Host-side batch before upload to a device.
#[derive(Debug, Clone, PartialEq)]
pub struct RawBatch {
    pub images: Vec<f32>,
    pub labels: Vec<u8>,
    pub names: Vec<String>,
    pub channels: usize,
    pub tile_size: usize,
}

impl RawBatch {
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    pub fn to_device<B: Backend>(self, device: &B::Device) -> TileBatch<B> {
        let n = self.len();
        let (c, t) = (self.channels, self.tile_size);
        let images = Tensor::<B, 4>::from_data(TensorData::new(self.images, [n, c, t, t]), device);
        let targets_f: Vec<f32> = self.labels.iter().map(|&v| v as f32).collect();
        let targets = Tensor::<B, 3>::from_data(TensorData::new(targets_f, [n, t, t]), device);
        TileBatch {
            images,
            targets,
            labels: self.labels,
            names: self.names,
        }
    }
}

pub struct TileBatch<B: Backend> {
    /// `[N, C, T, T]`
    pub images: Tensor<B, 4>,
    /// `[N, T, T]` with values 0, 1 or 255.
    pub targets: Tensor<B, 3>,
    /// Same values as `targets`, row-major on the host.
    pub labels: Vec<u8>,
    pub names: Vec<String>,
}

impl<B: Backend> TileBatch<B> {
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// True when at least one pixel is not ignored.
    pub fn has_valid_pixels(&self) -> bool {
        self.labels.iter().any(|&v| v < scene_cube::MASK_IGNORE)
    }
}

/// Mirror a `[C, T, T]` image and its `[T, T]` target in place.
pub fn flip_tile(image: &mut [f32], target: &mut [u8], tile: usize, horizontal: bool, vertical: bool) {
    if !horizontal && !vertical {
        return;
    }
    let src_image = image.to_vec();
    let src_target = target.to_vec();
    let plane = tile * tile;
    let channels = image.len() / plane.max(1);
    for r in 0..tile {
        let sr = if vertical { tile - 1 - r } else { r };
        for c in 0..tile {
            let sc = if horizontal { tile - 1 - c } else { c };
            target[r * tile + c] = src_target[sr * tile + sc];
            for ch in 0..channels {
                image[ch * plane + r * tile + c] = src_image[ch * plane + sr * tile + sc];
            }
        }
    }
}

/// Batches over a shared dataset; every call to `iter` starts a new pass.
pub struct TileLoader {
    dataset: Arc<TileDataset>,
    opts: LoaderOptions,
    pool: Arc<rayon::ThreadPool>,
    passes: AtomicU64,
}

impl TileLoader {
    pub fn new(
        dataset: TileDataset,
        opts: LoaderOptions,
        pool: Arc<rayon::ThreadPool>,
    ) -> DatasetResult<Self> {
        if opts.batch_size == 0 {
            return Err(DatasetError::InvalidSpec("batch_size must be positive".into()));
        }
        Ok(Self {
            dataset: Arc::new(dataset),
            opts,
            pool,
            passes: AtomicU64::new(0),
        })
    }

    /// Load a dataset spec under `data_root`; `batch_size` applies when the spec has none.
    pub fn from_spec(
        data_root: &Path,
        spec: &DatasetSpec,
        sources: &DataSources,
        batch_size: usize,
        pool: Arc<rayon::ThreadPool>,
    ) -> DatasetResult<Self> {
        let dataset = TileDataset::load(data_root, spec, sources, &pool)?;
        let opts = LoaderOptions {
            batch_size: spec.batch_size.unwrap_or(batch_size),
            shuffle: spec.shuffle,
            augment: spec.augment,
            seed: spec.seed,
            drop_last: spec.drop_last,
        };
        TileLoader::new(dataset, opts, pool)
    }

    /// The same loader over only the tiles with at least one slump pixel.
    pub fn slumps_only(self) -> Self {
        let dataset = Arc::try_unwrap(self.dataset).unwrap_or_else(|shared| (*shared).clone());
        Self {
            dataset: Arc::new(dataset.slumps_only()),
            opts: self.opts,
            pool: self.pool,
            passes: AtomicU64::new(0),
        }
    }

    pub fn dataset(&self) -> &TileDataset {
        &self.dataset
    }

    pub fn options(&self) -> &LoaderOptions {
        &self.opts
    }

    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dataset.is_empty()
    }

    /// Batches per pass.
    pub fn num_batches(&self) -> usize {
        let n = self.dataset.len();
        let bs = self.opts.batch_size;
        if self.opts.drop_last {
            n / bs
        } else {
            n.div_ceil(bs)
        }
    }

    /// Host-side batches of the next pass, reshuffled per pass when enabled.
    pub fn raw_batches(&self) -> RawBatchIter<'_> {
        let pass = self.passes.fetch_add(1, Ordering::Relaxed);
        let seed = self.opts.seed.wrapping_add(pass);
        let mut order: Vec<usize> = (0..self.dataset.len()).collect();
        if self.opts.shuffle {
            let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
            order.shuffle(&mut rng);
        }
        RawBatchIter {
            loader: self,
            order,
            cursor: 0,
            seed,
        }
    }

    pub fn iter<B: Backend>(&self, device: &B::Device) -> BatchIter<'_, B> {
        BatchIter {
            inner: self.raw_batches(),
            device: device.clone(),
        }
    }

    fn assemble(&self, indices: &[usize], seed: u64, batch_no: usize) -> RawBatch {
        let tile = self.dataset.tile_size;
        let augment = self.opts.augment;
        let prepared: Vec<(Vec<f32>, Vec<u8>, String)> = self.pool.install(|| {
            indices
                .par_iter()
                .enumerate()
                .map(|(i, &idx)| {
                    let Tile {
                        name,
                        image,
                        target,
                        ..
                    } = &self.dataset.tiles[idx];
                    let mut image = image.clone();
                    let mut target = target.clone();
                    if augment {
                        let mut rng = rand::rngs::StdRng::seed_from_u64(
                            seed ^ ((batch_no as u64) << 32) ^ i as u64,
                        );
                        let h: bool = rng.random();
                        let v: bool = rng.random();
                        flip_tile(&mut image, &mut target, tile, h, v);
                    }
                    (image, target, name.clone())
                })
                .collect()
        });
        let mut raw = RawBatch {
            images: Vec::with_capacity(indices.len() * self.dataset.channels * tile * tile),
            labels: Vec::with_capacity(indices.len() * tile * tile),
            names: Vec::with_capacity(indices.len()),
            channels: self.dataset.channels,
            tile_size: tile,
        };
        for (image, target, name) in prepared {
            raw.images.extend_from_slice(&image);
            raw.labels.extend_from_slice(&target);
            raw.names.push(name);
        }
        raw
    }
}

pub struct RawBatchIter<'a> {
    loader: &'a TileLoader,
    order: Vec<usize>,
    cursor: usize,
    seed: u64,
}

impl Iterator for RawBatchIter<'_> {
    type Item = RawBatch;

    fn next(&mut self) -> Option<RawBatch> {
        let bs = self.loader.opts.batch_size;
        if self.cursor >= self.order.len() {
            return None;
        }
        let end = (self.cursor + bs).min(self.order.len());
        if self.loader.opts.drop_last && end - self.cursor < bs {
            self.cursor = self.order.len();
            return None;
        }
        let batch_no = self.cursor / bs;
        let batch = self
            .loader
            .assemble(&self.order[self.cursor..end], self.seed, batch_no);
        self.cursor = end;
        Some(batch)
    }
}

pub struct BatchIter<'a, B: Backend> {
    inner: RawBatchIter<'a>,
    device: B::Device,
}

impl<B: Backend> Iterator for BatchIter<'_, B> {
    type Item = TileBatch<B>;

    fn next(&mut self) -> Option<TileBatch<B>> {
        self.inner.next().map(|raw| raw.to_device(&self.device))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flips_move_pixels_and_labels_together() {
        // 1 channel, 2x2: [a b; c d]
        let mut image = vec![1.0, 2.0, 3.0, 4.0];
        let mut target = vec![0u8, 1, 0, 255];
        flip_tile(&mut image, &mut target, 2, true, false);
        assert_eq!(image, vec![2.0, 1.0, 4.0, 3.0]);
        assert_eq!(target, vec![1, 0, 255, 0]);
        flip_tile(&mut image, &mut target, 2, false, true);
        assert_eq!(image, vec![4.0, 3.0, 2.0, 1.0]);
        assert_eq!(target, vec![255, 0, 1, 0]);
    }

    #[test]
    fn fully_ignored_batch_has_no_valid_pixels() {
        let raw = |labels: Vec<u8>| RawBatch {
            images: vec![0.0; 4],
            labels,
            names: vec!["s_0".into()],
            channels: 1,
            tile_size: 2,
        };
        let device = Default::default();
        let ignored = raw(vec![255; 4]).to_device::<burn::backend::NdArray<f32>>(&device);
        assert!(!ignored.has_valid_pixels());
        let mixed = raw(vec![255, 0, 255, 255]).to_device::<burn::backend::NdArray<f32>>(&device);
        assert!(mixed.has_valid_pixels());
    }
}
