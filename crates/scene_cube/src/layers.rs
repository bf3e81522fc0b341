//! Auxiliary layers (elevation, slope, TCVIS) and label mask rasterization.

use crate::geo::{Grid, Polygon};
use crate::labels::has_extension;
use crate::raster::Raster;
use crate::scene::{Layer, Scene, MASK_BACKGROUND, MASK_IGNORE, MASK_SLUMP};
use crate::types::{CubeError, CubeResult};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Roots of the local auxiliary rasters, handed to every builder call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuxiliaryPaths {
    pub elevation: PathBuf,
    pub slope: PathBuf,
    pub tcvis: PathBuf,
}

impl AuxiliaryPaths {
    /// `<data_dir>/auxiliary/{elevation,slope,tcvis}`
    pub fn under(data_dir: &Path) -> Self {
        let root = data_dir.join("auxiliary");
        Self {
            elevation: root.join("elevation"),
            slope: root.join("slope"),
            tcvis: root.join("tcvis"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuxiliaryLayer {
    AbsoluteElevation,
    Slope,
    Tcvis,
}

impl AuxiliaryLayer {
    /// Order in which `complete_scene` appends layers.
    pub const ALL: [AuxiliaryLayer; 3] = [
        AuxiliaryLayer::AbsoluteElevation,
        AuxiliaryLayer::Slope,
        AuxiliaryLayer::Tcvis,
    ];

    pub fn layer_name(&self) -> &'static str {
        match self {
            AuxiliaryLayer::AbsoluteElevation => "elevation",
            AuxiliaryLayer::Slope => "slope",
            AuxiliaryLayer::Tcvis => "tcvis",
        }
    }

    pub fn band_names(&self) -> Vec<String> {
        match self {
            AuxiliaryLayer::AbsoluteElevation => vec!["elevation".into()],
            AuxiliaryLayer::Slope => vec!["slope".into()],
            AuxiliaryLayer::Tcvis => vec!["tcvis_r".into(), "tcvis_g".into(), "tcvis_b".into()],
        }
    }

    pub fn root<'a>(&self, paths: &'a AuxiliaryPaths) -> &'a Path {
        match self {
            AuxiliaryLayer::AbsoluteElevation => &paths.elevation,
            AuxiliaryLayer::Slope => &paths.slope,
            AuxiliaryLayer::Tcvis => &paths.tcvis,
        }
    }

    /// First GeoTIFF under the layer root (recursive, sorted by path) covering the scene.
    ///
    /// When nothing usable covers the scene but a candidate was rejected for its CRS or a
    /// degenerate grid, that is reported as [`CubeError::Alignment`].
    pub fn find_source(&self, scene: &Scene, paths: &AuxiliaryPaths) -> CubeResult<PathBuf> {
        let name = self.layer_name();
        let misaligned = |msg: String| CubeError::Alignment {
            layer: name.into(),
            scene: scene.id.clone(),
            msg,
        };
        if scene.grid.transform.is_degenerate() {
            return Err(misaligned("degenerate scene grid".into()));
        }
        let root = self.root(paths);
        let mut candidates = Vec::new();
        collect_tifs(root, &mut candidates)?;
        candidates.sort();
        let scene_bounds = scene.grid.bounds();
        // Allow a hundredth of a pixel of slack at the edges.
        let tol = scene.grid.transform.pixel_width.abs() * 0.01;
        let mut rejected: Option<String> = None;
        for path in candidates {
            let (grid, _) = match Raster::read_grid_header_unchecked(&path) {
                Ok(v) => v,
                Err(err) => {
                    tracing::warn!("skipping unreadable {}: {err}", path.display());
                    continue;
                }
            };
            if grid.transform.is_degenerate() {
                rejected.get_or_insert_with(|| format!("{}: degenerate grid", path.display()));
                continue;
            }
            if !grid.crs_compatible(scene.grid.crs.as_deref()) {
                rejected.get_or_insert_with(|| {
                    format!(
                        "{}: crs {:?} differs from scene crs {:?}",
                        path.display(),
                        grid.crs.as_deref().unwrap_or("unknown"),
                        scene.grid.crs.as_deref().unwrap_or("unknown")
                    )
                });
                continue;
            }
            if grid.bounds().contains(&scene_bounds, tol) {
                return Ok(path);
            }
        }
        if let Some(msg) = rejected {
            return Err(misaligned(msg));
        }
        Err(CubeError::MissingAuxiliaryData {
            layer: name.to_string(),
            scene: scene.id.clone(),
            root: root.to_path_buf(),
        })
    }

    /// Resample the covering raster onto the scene grid.
    pub fn build_layer(&self, scene: &Scene, paths: &AuxiliaryPaths) -> CubeResult<Layer> {
        let source = self.find_source(scene, paths)?;
        let raster = Raster::read_geotiff(&source)?;
        let name = self.layer_name();
        let bands = self.band_names();
        if raster.bands() < bands.len() {
            return Err(CubeError::Alignment {
                layer: name.into(),
                scene: scene.id.clone(),
                msg: format!("expected {} bands, found {}", bands.len(), raster.bands()),
            });
        }
        let resampled = raster.resample_bilinear(&scene.grid);
        let data = resampled
            .slice(ndarray::s![0..bands.len(), .., ..])
            .to_owned();
        tracing::debug!(
            layer = name,
            scene = %scene.id,
            "resampled {} onto scene grid",
            source.display()
        );
        Ok(Layer::new(name, bands, data))
    }

    pub fn add_to(&self, scene: &mut Scene, paths: &AuxiliaryPaths) -> CubeResult<()> {
        let layer = self.build_layer(scene, paths)?;
        scene.push_layer(layer)
    }
}

fn collect_tifs(dir: &Path, out: &mut Vec<PathBuf>) -> CubeResult<()> {
    if !dir.is_dir() {
        return Ok(());
    }
    for entry in std::fs::read_dir(dir).map_err(|e| CubeError::io(dir, e))? {
        let path = entry.map_err(|e| CubeError::io(dir, e))?.path();
        if path.is_dir() {
            collect_tifs(&path, out)?;
        } else if path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| has_extension(n, "tif") || has_extension(n, "tiff"))
        {
            out.push(path);
        }
    }
    Ok(())
}

/// Append elevation, slope and TCVIS, in that order.
pub fn complete_scene(scene: &mut Scene, paths: &AuxiliaryPaths) -> CubeResult<()> {
    for aux in AuxiliaryLayer::ALL {
        aux.add_to(scene, paths)?;
    }
    Ok(())
}

/// Burn polygons at pixel centres: slump inside, background outside, ignore where `valid` is false.
pub fn rasterize_mask(grid: &Grid, polygons: &[Polygon], valid: &Array2<bool>) -> Array2<u8> {
    let boxes: Vec<_> = polygons.iter().map(|p| p.bounds()).collect();
    Array2::from_shape_fn((grid.height, grid.width), |(row, col)| {
        if !valid[[row, col]] {
            return MASK_IGNORE;
        }
        let (x, y) = grid.transform.pixel_center(col, row);
        let hit = polygons.iter().zip(&boxes).any(|(poly, bbox)| {
            bbox.is_some_and(|b| x >= b.min_x && x <= b.max_x && y >= b.min_y && y <= b.max_y)
                && poly.contains(x, y)
        });
        if hit {
            MASK_SLUMP
        } else {
            MASK_BACKGROUND
        }
    })
}
