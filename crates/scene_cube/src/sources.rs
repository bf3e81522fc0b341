//! Primary imagery sources: PlanetScope surface reflectance files and a local Sentinel-2 archive.

use crate::geo::{Bounds, Polygon};
use crate::labels::{has_extension, list_files, parse_date, read_polygons};
use crate::layers::rasterize_mask;
use crate::raster::Raster;
use crate::scene::{Layer, Scene};
use crate::types::{CubeError, CubeResult};
use chrono::NaiveDate;
use std::path::{Path, PathBuf};

pub const PLANET_LAYER: &str = "planet";
pub const SENTINEL2_LAYER: &str = "sentinel2";

/// Band names for a primary raster: named for 4-band imagery, indexed otherwise.
pub fn spectral_band_names(bands: usize) -> Vec<String> {
    if bands == 4 {
        ["blue", "green", "red", "nir"]
            .iter()
            .map(|s| s.to_string())
            .collect()
    } else {
        (0..bands).map(|i| format!("band_{i}")).collect()
    }
}

fn file_stem(path: &Path) -> CubeResult<&str> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| CubeError::InvalidRaster {
            path: path.to_path_buf(),
            msg: "file name is not valid UTF-8".into(),
        })
}

/// Leading `YYYYMMDD` of a file stem.
pub fn leading_date(stem: &str) -> Option<NaiveDate> {
    let head = stem.get(..8)?;
    if !head.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    parse_date(head)
}

pub struct PlanetScope;

impl PlanetScope {
    /// `20190727_203106_1050_3B_AnalyticMS_SR` -> `20190727_203106_1050`.
    pub fn scene_id(path: &Path) -> CubeResult<String> {
        let stem = file_stem(path)?;
        let id = stem
            .find("_3B")
            .or_else(|| stem.find("_SR"))
            .map_or(stem, |idx| &stem[..idx]);
        Ok(id.to_string())
    }

    /// The first `*.shp` next to the raw raster, by file name.
    pub fn label_file(raw: &Path) -> CubeResult<PathBuf> {
        let dir = raw.parent().unwrap_or_else(|| Path::new("."));
        list_files(dir, |n| has_extension(n, "shp"))?
            .into_iter()
            .next()
            .ok_or_else(|| CubeError::MissingLabels {
                dir: dir.to_path_buf(),
            })
    }

    /// Primary layer plus label mask for one raw PlanetScope file.
    pub fn build_scene(raw: &Path) -> CubeResult<Scene> {
        let polygons = read_polygons(&Self::label_file(raw)?)?;
        Self::build_scene_with_labels(raw, &polygons)
    }

    pub fn build_scene_with_labels(raw: &Path, polygons: &[Polygon]) -> CubeResult<Scene> {
        let id = Self::scene_id(raw)?;
        let date = leading_date(file_stem(raw)?);
        let raster = Raster::read_geotiff(raw)?;
        let valid = raster.valid_mask();
        let mask = rasterize_mask(&raster.grid, polygons, &valid);
        let mut scene = Scene::new(id, raster.grid.clone(), date);
        let bands = spectral_band_names(raster.bands());
        scene.add_layer(PLANET_LAYER, bands, raster)?;
        scene.set_mask(mask)?;
        tracing::debug!(
            scene = %scene.id,
            polygons = polygons.len(),
            "built planet scene from {}",
            raw.display()
        );
        Ok(scene)
    }
}

/// Spatio-temporal query against the Sentinel-2 archive.
#[derive(Debug, Clone)]
pub struct SceneQuery {
    pub id_prefix: String,
    pub bounds: Bounds,
    pub crs: Option<String>,
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl SceneQuery {
    pub fn validate(&self) -> CubeResult<()> {
        if self.start > self.end {
            return Err(CubeError::InvalidQuery(format!(
                "start {} is after end {}",
                self.start, self.end
            )));
        }
        if !self.bounds.is_valid() {
            return Err(CubeError::InvalidQuery(format!(
                "bounds {:?} are empty or not finite",
                self.bounds
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ArchiveImage {
    pub path: PathBuf,
    pub date: NaiveDate,
    pub stem: String,
}

/// Directory of `<YYYYMMDD>_<name>.tif` files.
#[derive(Debug, Clone)]
pub struct Sentinel2Archive {
    pub root: PathBuf,
}

impl Sentinel2Archive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// `<data_dir>/sentinel2`
    pub fn under(data_dir: &Path) -> Self {
        Self::new(data_dir.join("sentinel2"))
    }

    /// Dated images in the archive, ordered by date then name.
    pub fn images(&self) -> CubeResult<Vec<ArchiveImage>> {
        let files = list_files(&self.root, |n| has_extension(n, "tif") || has_extension(n, "tiff"))?;
        let mut out = Vec::new();
        for path in files {
            let stem = file_stem(&path)?.to_string();
            match leading_date(&stem) {
                Some(date) => out.push(ArchiveImage { path, date, stem }),
                None => tracing::debug!("ignoring undated archive file {}", path.display()),
            }
        }
        out.sort_by(|a, b| a.date.cmp(&b.date).then_with(|| a.stem.cmp(&b.stem)));
        Ok(out)
    }

    /// One scene per archive image dated within the window and overlapping the bounds.
    pub fn build_scenes(&self, query: &SceneQuery) -> CubeResult<Vec<Scene>> {
        query.validate()?;
        let mut scenes = Vec::new();
        for image in self.images()? {
            if image.date < query.start || image.date > query.end {
                continue;
            }
            let (grid, _) = Raster::read_grid_header(&image.path)?;
            if !grid.crs_compatible(query.crs.as_deref()) {
                continue;
            }
            let Some(overlap) = grid.bounds().intersection(&query.bounds) else {
                continue;
            };
            let raster = Raster::read_geotiff(&image.path)?;
            let Some(cropped) = raster.crop(&overlap) else {
                continue;
            };
            let id = format!("{}_{}", query.id_prefix, image.stem);
            let mut scene = Scene::new(id, cropped.grid.clone(), Some(image.date));
            let bands = spectral_band_names(cropped.bands());
            scene.push_layer(Layer::new(SENTINEL2_LAYER, bands, cropped.data))?;
            scenes.push(scene);
        }
        tracing::debug!(
            prefix = %query.id_prefix,
            scenes = scenes.len(),
            "sentinel-2 query {}..{}",
            query.start,
            query.end
        );
        Ok(scenes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn planet_ids_cut_product_suffixes() {
        let id = |s: &str| PlanetScope::scene_id(Path::new(s)).unwrap();
        assert_eq!(id("in/a/20190727_203106_1050_3B_AnalyticMS_SR.tif"), "20190727_203106_1050");
        assert_eq!(id("20190727_203106_1050_SR_clip.tif"), "20190727_203106_1050");
        assert_eq!(id("scene.tif"), "scene");
    }

    #[test]
    fn leading_date_requires_digits() {
        assert_eq!(leading_date("20190727_x"), NaiveDate::from_ymd_opt(2019, 7, 27));
        assert_eq!(leading_date("2019072x_x"), None);
        assert_eq!(leading_date("short"), None);
    }

    #[test]
    fn inverted_query_window_is_rejected() {
        let query = SceneQuery {
            id_prefix: "p".into(),
            bounds: Bounds::new(0.0, 0.0, 1.0, 1.0),
            crs: None,
            start: NaiveDate::from_ymd_opt(2020, 2, 1).unwrap(),
            end: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(),
        };
        assert!(matches!(query.validate(), Err(CubeError::InvalidQuery(_))));
        let archive = Sentinel2Archive::new("does-not-exist");
        assert!(archive.build_scenes(&query).is_err());
    }

    #[test]
    fn band_names_fall_back_to_indices() {
        assert_eq!(spectral_band_names(4)[3], "nir");
        assert_eq!(spectral_band_names(2), vec!["band_0", "band_1"]);
    }
}
