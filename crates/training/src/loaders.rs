//! Named tile loaders, built on first use and memoized for the whole run.

use crate::TrainError;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tile_dataset::{build_pool, DataSources, DatasetSpec, TileLoader};

/// What a loader name refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoaderRequest {
    Dataset(String),
    /// `slump_tiles(name)`: tiles of `name` with at least one slump pixel.
    SlumpTiles(String),
}

/// Split `func(arg)` into its parts.
fn call_expression(name: &str) -> Option<(&str, &str)> {
    let open = name.find('(')?;
    let inner = name[open + 1..].strip_suffix(')')?;
    let func = name[..open].trim();
    let arg = inner.trim();
    let is_word = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_alphanumeric() || c == '_');
    (is_word(func) && is_word(arg)).then_some((func, arg))
}

pub fn parse_loader_name(
    name: &str,
    datasets: &BTreeMap<String, DatasetSpec>,
) -> Result<LoaderRequest, TrainError> {
    if datasets.contains_key(name) {
        return Ok(LoaderRequest::Dataset(name.to_string()));
    }
    match call_expression(name) {
        Some(("slump_tiles", arg)) if datasets.contains_key(arg) => {
            Ok(LoaderRequest::SlumpTiles(arg.to_string()))
        }
        _ => Err(TrainError::UnresolvableLoader(name.to_string())),
    }
}

/// Settings every loader of a run shares.
#[derive(Debug, Clone)]
pub struct LoaderContext {
    pub data_root: PathBuf,
    pub sources: DataSources,
    pub batch_size: usize,
    pub data_threads: usize,
}

pub struct LoaderCache {
    ctx: LoaderContext,
    datasets: BTreeMap<String, DatasetSpec>,
    loaders: HashMap<String, Arc<TileLoader>>,
}

impl LoaderCache {
    pub fn new(ctx: LoaderContext, datasets: BTreeMap<String, DatasetSpec>) -> Self {
        Self {
            ctx,
            datasets,
            loaders: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.loaders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loaders.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.loaders.contains_key(name)
    }

    /// Cached loader for `name`, constructing it on first request.
    pub fn get(&mut self, name: &str) -> Result<Arc<TileLoader>, TrainError> {
        if let Some(loader) = self.loaders.get(name) {
            return Ok(Arc::clone(loader));
        }
        let loader = Arc::new(self.build(name)?);
        tracing::info!(
            loader = name,
            tiles = loader.len(),
            batches = loader.num_batches(),
            "built loader"
        );
        self.loaders.insert(name.to_string(), Arc::clone(&loader));
        Ok(loader)
    }

    fn build(&self, name: &str) -> Result<TileLoader, TrainError> {
        let request = parse_loader_name(name, &self.datasets)?;
        let dataset_name = match &request {
            LoaderRequest::Dataset(n) | LoaderRequest::SlumpTiles(n) => n,
        };
        let spec = self
            .datasets
            .get(dataset_name)
            .ok_or_else(|| TrainError::UnresolvableLoader(name.to_string()))?;
        let pool = build_pool(self.ctx.data_threads)?;
        let loader = TileLoader::from_spec(
            &self.ctx.data_root,
            spec,
            &self.ctx.sources,
            self.ctx.batch_size,
            pool,
        )?;
        Ok(match request {
            LoaderRequest::Dataset(_) => loader,
            LoaderRequest::SlumpTiles(_) => loader.slumps_only(),
        })
    }
}
