#![allow(dead_code)]

use shapefile::dbase::{FieldValue, Record, TableWriterBuilder};
use shapefile::{Point, PolygonRing};
use std::fs::{self, File};
use std::path::Path;
use tiff::encoder::{colortype, TiffEncoder};
use tiff::tags::Tag;

pub const UTM_6N: u16 = 32606;
/// GeoKeyDirectory for the projected UTM 6N CRS used by every fixture.
pub const UTM_6N_KEYS: [u16; 8] = [1, 1, 0, 1, 3072, 0, 1, UTM_6N];
/// GeoKeyDirectory for geographic WGS 84.
pub const WGS84_KEYS: [u16; 8] = [1, 1, 0, 1, 2048, 0, 1, 4326];
pub const PIXEL: f64 = 3.0;

/// Top-left corner and size of a north-up test raster.
#[derive(Clone, Copy)]
pub struct Placement {
    pub origin_x: f64,
    pub origin_y: f64,
    pub width: u32,
    pub height: u32,
}

impl Placement {
    pub fn new(origin_x: f64, origin_y: f64, width: u32, height: u32) -> Self {
        Self {
            origin_x,
            origin_y,
            width,
            height,
        }
    }
}

macro_rules! write_geotiff {
    ($path:expr, $color:ty, $at:expr, $data:expr, $nodata:expr) => {
        write_geotiff!($path, $color, $at, $data, $nodata, &UTM_6N_KEYS)
    };
    ($path:expr, $color:ty, $at:expr, $data:expr, $nodata:expr, $keys:expr) => {{
        let path: &Path = $path;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        let at: Placement = $at;
        let file = File::create(path).unwrap();
        let mut tiff = TiffEncoder::new(file).unwrap();
        let mut image = tiff.new_image::<$color>(at.width, at.height).unwrap();
        let enc = image.encoder();
        enc.write_tag(Tag::ModelPixelScaleTag, &[PIXEL, PIXEL, 0.0][..])
            .unwrap();
        enc.write_tag(
            Tag::ModelTiepointTag,
            &[0.0, 0.0, 0.0, at.origin_x, at.origin_y, 0.0][..],
        )
        .unwrap();
        let keys: &[u16; 8] = $keys;
        enc.write_tag(Tag::GeoKeyDirectoryTag, &keys[..]).unwrap();
        let nodata: Option<&str> = $nodata;
        if let Some(nd) = nodata {
            enc.write_tag(Tag::GdalNodata, nd).unwrap();
        }
        image.write_data($data).unwrap();
    }};
}

/// Four-band 16-bit reflectance raster; `value(band, row, col)` gives the samples.
pub fn write_reflectance(path: &Path, at: Placement, value: impl Fn(u32, u32, u32) -> u16) {
    let mut data = Vec::with_capacity((at.width * at.height * 4) as usize);
    for row in 0..at.height {
        for col in 0..at.width {
            for band in 0..4 {
                data.push(value(band, row, col));
            }
        }
    }
    write_geotiff!(path, colortype::RGBA16, at, &data, None);
}

/// Single-band float raster such as elevation or slope.
pub fn write_float(path: &Path, at: Placement, value: impl Fn(u32, u32) -> f32) {
    let mut data = Vec::with_capacity((at.width * at.height) as usize);
    for row in 0..at.height {
        for col in 0..at.width {
            data.push(value(row, col));
        }
    }
    write_geotiff!(path, colortype::Gray32Float, at, &data, Some("-9999"));
}

/// Single-band float raster tagged with an explicit GeoKeyDirectory.
pub fn write_float_with_keys(
    path: &Path,
    at: Placement,
    keys: &[u16; 8],
    value: impl Fn(u32, u32) -> f32,
) {
    let mut data = Vec::with_capacity((at.width * at.height) as usize);
    for row in 0..at.height {
        for col in 0..at.width {
            data.push(value(row, col));
        }
    }
    write_geotiff!(path, colortype::Gray32Float, at, &data, Some("-9999"), keys);
}

/// Three-band 8-bit raster (TCVIS).
pub fn write_rgb(path: &Path, at: Placement, value: impl Fn(u32, u32) -> [u8; 3]) {
    let mut data = Vec::with_capacity((at.width * at.height * 3) as usize);
    for row in 0..at.height {
        for col in 0..at.width {
            data.extend_from_slice(&value(row, col));
        }
    }
    write_geotiff!(path, colortype::RGB8, at, &data, None);
}

/// Clockwise rectangle ring in map coordinates.
fn rect_ring(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> PolygonRing<Point> {
    PolygonRing::Outer(vec![
        Point::new(min_x, max_y),
        Point::new(max_x, max_y),
        Point::new(max_x, min_y),
        Point::new(min_x, min_y),
        Point::new(min_x, max_y),
    ])
}

/// Shapefile of rectangles with `image_id` / `image_date` text attributes.
pub fn write_rect_shapefile(path: &Path, rects: &[([f64; 4], &str, &str)]) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let table = TableWriterBuilder::new()
        .add_character_field("image_id".try_into().unwrap(), 64)
        .add_character_field("image_date".try_into().unwrap(), 16);
    let mut writer = shapefile::Writer::from_path(path, table).unwrap();
    for ([min_x, min_y, max_x, max_y], id, date) in rects {
        let polygon = shapefile::Polygon::new(rect_ring(*min_x, *min_y, *max_x, *max_y));
        let mut record = Record::default();
        record.insert(
            "image_id".to_string(),
            FieldValue::Character(Some(id.to_string())),
        );
        record.insert(
            "image_date".to_string(),
            FieldValue::Character(Some(date.to_string())),
        );
        writer.write_shape_and_record(&polygon, &record).unwrap();
    }
}

/// Shapefile holding one multi-part record made of disjoint rectangles.
pub fn write_multipart_shapefile(path: &Path, parts: &[[f64; 4]], id: &str, date: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).unwrap();
    }
    let table = TableWriterBuilder::new()
        .add_character_field("image_id".try_into().unwrap(), 64)
        .add_character_field("image_date".try_into().unwrap(), 16);
    let mut writer = shapefile::Writer::from_path(path, table).unwrap();
    let rings = parts
        .iter()
        .map(|[min_x, min_y, max_x, max_y]| rect_ring(*min_x, *min_y, *max_x, *max_y))
        .collect();
    let polygon = shapefile::Polygon::with_rings(rings);
    let mut record = Record::default();
    record.insert(
        "image_id".to_string(),
        FieldValue::Character(Some(id.to_string())),
    );
    record.insert(
        "image_date".to_string(),
        FieldValue::Character(Some(date.to_string())),
    );
    writer.write_shape_and_record(&polygon, &record).unwrap();
}

/// Elevation, slope and TCVIS rasters on a lattice shared with scenes at `PIXEL` spacing.
pub fn write_auxiliary(data_dir: &Path, at: Placement) {
    let aux = data_dir.join("auxiliary");
    write_float(&aux.join("elevation").join("dem.tif"), at, |r, c| {
        (r * 100 + c) as f32
    });
    write_float(&aux.join("slope").join("slope.tif"), at, |r, c| {
        ((r + c) % 45) as f32
    });
    write_rgb(&aux.join("tcvis").join("tcvis.tif"), at, |r, c| {
        [r as u8, c as u8, 200]
    });
}
