//! Label and footprint stores (ESRI shapefiles) and the footprint join.

use crate::geo::{Bounds, Polygon};
use crate::types::{CubeError, CubeResult};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use shapefile::dbase::{FieldValue, Record};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// One imagery footprint record with the acquisition date of its labels.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneInfo {
    pub image_id: String,
    pub date: NaiveDate,
    /// Every part of the record's geometry.
    pub footprint: Vec<Polygon>,
}

impl SceneInfo {
    /// Union of the bounds of all footprint parts.
    pub fn bounds(&self) -> Option<Bounds> {
        self.footprint
            .iter()
            .filter_map(Polygon::bounds)
            .reduce(|a, b| a.union(&b))
    }
}

#[derive(Debug, Clone)]
pub struct LabelRecord {
    pub image_id: String,
    pub date: NaiveDate,
}

/// One footprint record; multi-part geometries stay together.
#[derive(Debug, Clone)]
pub struct Footprint {
    pub image_id: String,
    pub polygons: Vec<Polygon>,
}

/// Files directly inside `dir` whose name satisfies `accept`, sorted by path.
pub fn list_files(dir: &Path, accept: impl Fn(&str) -> bool) -> CubeResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut out = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| CubeError::io(dir, e))? {
        let path = entry.map_err(|e| CubeError::io(dir, e))?.path();
        if !path.is_file() {
            continue;
        }
        if path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(&accept)
        {
            out.push(path);
        }
    }
    out.sort();
    Ok(out)
}

/// Like [`list_files`] but one directory level down: `<dir>/*/<name>`.
pub fn list_nested_files(dir: &Path, accept: impl Fn(&str) -> bool) -> CubeResult<Vec<PathBuf>> {
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut subdirs = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(|e| CubeError::io(dir, e))? {
        let path = entry.map_err(|e| CubeError::io(dir, e))?.path();
        if path.is_dir() {
            subdirs.push(path);
        }
    }
    subdirs.sort();
    let mut out = Vec::new();
    for sub in subdirs {
        out.extend(list_files(&sub, &accept)?);
    }
    out.sort();
    Ok(out)
}

pub fn has_extension(name: &str, ext: &str) -> bool {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case(ext))
}

/// Split shapefile polygons into outer rings with their holes.
fn convert_polygon(shape: &shapefile::Polygon) -> Vec<Polygon> {
    let mut out: Vec<Polygon> = Vec::new();
    for ring in shape.rings() {
        let points: Vec<[f64; 2]> = ring.points().iter().map(|p| [p.x, p.y]).collect();
        match ring {
            shapefile::PolygonRing::Outer(_) => out.push(Polygon::new(points)),
            shapefile::PolygonRing::Inner(_) => match out.last_mut() {
                Some(last) => last.holes.push(points),
                None => out.push(Polygon::new(points)),
            },
        }
    }
    out
}

/// All polygons of a shapefile, attributes ignored.
pub fn read_polygons(path: &Path) -> CubeResult<Vec<Polygon>> {
    let shapes = shapefile::read_shapes_as::<_, shapefile::Polygon>(path)
        .map_err(|e| CubeError::shapefile(path, e))?;
    Ok(shapes.iter().flat_map(convert_polygon).collect())
}

fn read_with_records(path: &Path) -> CubeResult<Vec<(shapefile::Polygon, Record)>> {
    shapefile::read_as::<_, shapefile::Polygon, Record>(path)
        .map_err(|e| CubeError::shapefile(path, e))
}

fn string_field(record: &Record, name: &str) -> Option<String> {
    match record.get(name)? {
        FieldValue::Character(Some(s)) | FieldValue::Memo(s) => {
            let s = s.trim();
            (!s.is_empty()).then(|| s.to_string())
        }
        FieldValue::Numeric(Some(v)) => Some(format!("{v}")),
        _ => None,
    }
}

fn date_field(record: &Record, name: &str) -> Option<NaiveDate> {
    match record.get(name)? {
        FieldValue::Date(Some(d)) => NaiveDate::from_ymd_opt(d.year() as i32, d.month(), d.day()),
        FieldValue::Character(Some(s)) => parse_date(s.trim()),
        _ => None,
    }
}

/// Accepts `YYYY-MM-DD`, `YYYY/MM/DD` and `YYYYMMDD`, optionally followed by a time part.
pub fn parse_date(s: &str) -> Option<NaiveDate> {
    let head = s.split(['T', ' ']).next()?;
    ["%Y-%m-%d", "%Y/%m/%d", "%Y%m%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(head, fmt).ok())
}

/// Training labels with their `image_id` and `image_date`; records lacking either are skipped.
pub fn read_label_records(path: &Path) -> CubeResult<Vec<LabelRecord>> {
    let mut out = Vec::new();
    for (_, record) in read_with_records(path)? {
        let (Some(image_id), Some(date)) = (
            string_field(&record, "image_id"),
            date_field(&record, "image_date"),
        ) else {
            tracing::debug!(path = %path.display(), "skipping label without image_id/image_date");
            continue;
        };
        out.push(LabelRecord { image_id, date });
    }
    Ok(out)
}

pub fn read_footprints(path: &Path) -> CubeResult<Vec<Footprint>> {
    let mut out = Vec::new();
    for (shape, record) in read_with_records(path)? {
        let Some(image_id) = string_field(&record, "image_id") else {
            continue;
        };
        let polygons = convert_polygon(&shape);
        if polygons.is_empty() {
            continue;
        }
        out.push(Footprint { image_id, polygons });
    }
    Ok(out)
}

/// Keep footprints with labels; each takes the date of the last label read for its image.
pub fn join_footprints(labels: &[LabelRecord], footprints: Vec<Footprint>) -> Vec<SceneInfo> {
    let mut dates: HashMap<&str, NaiveDate> = HashMap::new();
    for label in labels {
        dates.insert(label.image_id.as_str(), label.date);
    }
    footprints
        .into_iter()
        .filter_map(|fp| {
            let date = *dates.get(fp.image_id.as_str())?;
            Some(SceneInfo {
                image_id: fp.image_id,
                date,
                footprint: fp.polygons,
            })
        })
        .collect()
}

/// `TrainingLabel*.shp` and `ImageFootprints*.shp` one level below `root`, joined.
pub fn load_scene_infos(root: &Path) -> CubeResult<Vec<SceneInfo>> {
    let label_files = list_nested_files(root, |n| {
        n.starts_with("TrainingLabel") && has_extension(n, "shp")
    })?;
    let footprint_files = list_nested_files(root, |n| {
        n.starts_with("ImageFootprints") && has_extension(n, "shp")
    })?;
    let mut labels = Vec::new();
    for path in &label_files {
        labels.extend(read_label_records(path)?);
    }
    let mut footprints = Vec::new();
    for path in &footprint_files {
        footprints.extend(read_footprints(path)?);
    }
    tracing::info!(
        labels = labels.len(),
        footprints = footprints.len(),
        "loaded label stores from {}",
        root.display()
    );
    Ok(join_footprints(&labels, footprints))
}
