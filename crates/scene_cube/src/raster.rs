//! GeoTIFF rasters: georeferencing, cropping and bilinear resampling.

use crate::geo::{Bounds, GeoTransform, Grid};
use crate::types::{CubeError, CubeResult};
use ndarray::{Array2, Array3};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use tiff::decoder::{Decoder, DecodingResult, Limits};
use tiff::tags::Tag;

const PROJECTED_CS_TYPE_KEY: u32 = 3072;
const GEOGRAPHIC_TYPE_KEY: u32 = 2048;
const USER_DEFINED: u32 = 32767;

/// Multi-band raster, band-major `[bands, rows, cols]`.
#[derive(Debug, Clone)]
pub struct Raster {
    pub grid: Grid,
    pub data: Array3<f32>,
    pub nodata: Option<f64>,
}

impl Raster {
    pub fn bands(&self) -> usize {
        self.data.shape()[0]
    }

    /// Decode a whole GeoTIFF into f32 samples.
    pub fn read_geotiff(path: &Path) -> CubeResult<Self> {
        let mut decoder = open_decoder(path)?;
        let (grid, nodata) = read_georef(&mut decoder, path)?;
        let samples: Vec<f32> = match decoder
            .read_image()
            .map_err(|e| CubeError::tiff(path, e))?
        {
            DecodingResult::U8(v) => v.into_iter().map(|x| x as f32).collect(),
            DecodingResult::U16(v) => v.into_iter().map(|x| x as f32).collect(),
            DecodingResult::U32(v) => v.into_iter().map(|x| x as f32).collect(),
            DecodingResult::U64(v) => v.into_iter().map(|x| x as f32).collect(),
            DecodingResult::I8(v) => v.into_iter().map(|x| x as f32).collect(),
            DecodingResult::I16(v) => v.into_iter().map(|x| x as f32).collect(),
            DecodingResult::I32(v) => v.into_iter().map(|x| x as f32).collect(),
            DecodingResult::I64(v) => v.into_iter().map(|x| x as f32).collect(),
            DecodingResult::F32(v) => v,
            DecodingResult::F64(v) => v.into_iter().map(|x| x as f32).collect(),
            #[allow(unreachable_patterns)]
            _ => {
                return Err(CubeError::InvalidRaster {
                    path: path.to_path_buf(),
                    msg: "unsupported sample format".into(),
                })
            }
        };
        let pixels = grid.pixel_count();
        if pixels == 0 || samples.len() % pixels != 0 {
            return Err(CubeError::InvalidRaster {
                path: path.to_path_buf(),
                msg: format!(
                    "{} samples do not fill a {}x{} grid",
                    samples.len(),
                    grid.width,
                    grid.height
                ),
            });
        }
        let bands = samples.len() / pixels;
        // Chunky (pixel-interleaved) to band-major.
        let mut data = Array3::<f32>::zeros((bands, grid.height, grid.width));
        for (i, px) in samples.chunks_exact(bands).enumerate() {
            let (row, col) = (i / grid.width, i % grid.width);
            for (b, v) in px.iter().enumerate() {
                data[[b, row, col]] = *v;
            }
        }
        Ok(Self { grid, data, nodata })
    }

    /// Grid and nodata value without decoding pixel data.
    pub fn read_grid_header(path: &Path) -> CubeResult<(Grid, Option<f64>)> {
        let mut decoder = open_decoder(path)?;
        read_georef(&mut decoder, path)
    }

    /// Like [`Raster::read_grid_header`] but a degenerate pixel scale is returned, not rejected.
    pub fn read_grid_header_unchecked(path: &Path) -> CubeResult<(Grid, Option<f64>)> {
        let mut decoder = open_decoder(path)?;
        read_georef_unchecked(&mut decoder, path)
    }

    fn is_nodata(&self, v: f32) -> bool {
        v.is_nan() || self.nodata.is_some_and(|nd| (v as f64) == nd)
    }

    /// Pixels where at least one band carries data (non-zero, non-nodata).
    pub fn valid_mask(&self) -> Array2<bool> {
        let (bands, rows, cols) = self.data.dim();
        Array2::from_shape_fn((rows, cols), |(r, c)| {
            (0..bands).any(|b| {
                let v = self.data[[b, r, c]];
                v != 0.0 && !self.is_nodata(v)
            })
        })
    }

    /// Crop to the pixels covering `bounds`; `None` when they do not overlap.
    pub fn crop(&self, bounds: &Bounds) -> Option<Raster> {
        let (col, row, width, height) = self.grid.window(bounds)?;
        let data = self
            .data
            .slice(ndarray::s![.., row..row + height, col..col + width])
            .to_owned();
        Some(Raster {
            grid: self.grid.subgrid(col, row, width, height),
            data,
            nodata: self.nodata,
        })
    }

    /// Bilinear resampling onto `target`, sampling at target pixel centres.
    ///
    /// Samples outside the source, or touching a nodata neighbour, are NaN.
    pub fn resample_bilinear(&self, target: &Grid) -> Array3<f32> {
        let (bands, src_rows, src_cols) = self.data.dim();
        let mut out = Array3::<f32>::from_elem((bands, target.height, target.width), f32::NAN);
        if src_rows == 0 || src_cols == 0 {
            return out;
        }
        let max_c = (src_cols - 1) as f64;
        let max_r = (src_rows - 1) as f64;
        for row in 0..target.height {
            for col in 0..target.width {
                let (x, y) = target.transform.pixel_center(col, row);
                let (fc, fr) = self.grid.transform.to_pixel(x, y);
                let (fc, fr) = (fc - 0.5, fr - 0.5);
                // Half a pixel of slack at the outer edge, clamped to the border samples.
                if fc < -0.5 || fr < -0.5 || fc > max_c + 0.5 || fr > max_r + 0.5 {
                    continue;
                }
                let fc = fc.clamp(0.0, max_c);
                let fr = fr.clamp(0.0, max_r);
                let c0 = fc.floor() as usize;
                let r0 = fr.floor() as usize;
                let c1 = (c0 + 1).min(src_cols - 1);
                let r1 = (r0 + 1).min(src_rows - 1);
                let tx = (fc - c0 as f64) as f32;
                let ty = (fr - r0 as f64) as f32;
                for b in 0..bands {
                    let v00 = self.data[[b, r0, c0]];
                    let v01 = self.data[[b, r0, c1]];
                    let v10 = self.data[[b, r1, c0]];
                    let v11 = self.data[[b, r1, c1]];
                    if [v00, v01, v10, v11].iter().any(|v| self.is_nodata(*v)) {
                        continue;
                    }
                    let top = v00 + (v01 - v00) * tx;
                    let bottom = v10 + (v11 - v10) * tx;
                    out[[b, row, col]] = top + (bottom - top) * ty;
                }
            }
        }
        out
    }
}

fn open_decoder(path: &Path) -> CubeResult<Decoder<BufReader<File>>> {
    let file = File::open(path).map_err(|e| CubeError::io(path, e))?;
    let decoder = Decoder::new(BufReader::new(file)).map_err(|e| CubeError::tiff(path, e))?;
    Ok(decoder.with_limits(Limits::unlimited()))
}

fn read_georef(
    decoder: &mut Decoder<BufReader<File>>,
    path: &Path,
) -> CubeResult<(Grid, Option<f64>)> {
    let (grid, nodata) = read_georef_unchecked(decoder, path)?;
    if grid.transform.is_degenerate() {
        return Err(CubeError::InvalidRaster {
            path: path.to_path_buf(),
            msg: "degenerate pixel scale".into(),
        });
    }
    Ok((grid, nodata))
}

fn read_georef_unchecked(
    decoder: &mut Decoder<BufReader<File>>,
    path: &Path,
) -> CubeResult<(Grid, Option<f64>)> {
    let invalid = |msg: &str| CubeError::InvalidRaster {
        path: path.to_path_buf(),
        msg: msg.to_string(),
    };
    let (width, height) = decoder.dimensions().map_err(|e| CubeError::tiff(path, e))?;
    let scale = decoder
        .find_tag(Tag::ModelPixelScaleTag)
        .map_err(|e| CubeError::tiff(path, e))?
        .ok_or_else(|| invalid("missing ModelPixelScale tag"))?
        .into_f64_vec()
        .map_err(|e| CubeError::tiff(path, e))?;
    let tiepoint = decoder
        .find_tag(Tag::ModelTiepointTag)
        .map_err(|e| CubeError::tiff(path, e))?
        .ok_or_else(|| invalid("missing ModelTiepoint tag"))?
        .into_f64_vec()
        .map_err(|e| CubeError::tiff(path, e))?;
    if scale.len() < 2 || tiepoint.len() < 6 {
        return Err(invalid("truncated georeferencing tags"));
    }
    let transform = GeoTransform {
        origin_x: tiepoint[3] - tiepoint[0] * scale[0],
        origin_y: tiepoint[4] + tiepoint[1] * scale[1],
        pixel_width: scale[0],
        pixel_height: -scale[1],
    };
    let crs = match decoder
        .find_tag(Tag::GeoKeyDirectoryTag)
        .map_err(|e| CubeError::tiff(path, e))?
    {
        Some(value) => epsg_from_geokeys(&value.into_u32_vec().map_err(|e| CubeError::tiff(path, e))?),
        None => None,
    };
    let nodata = decoder
        .get_tag_ascii_string(Tag::GdalNodata)
        .ok()
        .and_then(|s| s.trim_matches(char::from(0)).trim().parse::<f64>().ok());
    Ok((
        Grid {
            crs,
            width: width as usize,
            height: height as usize,
            transform,
        },
        nodata,
    ))
}

/// `EPSG:<code>` from a GeoKeyDirectory; the projected key wins over the geographic one.
pub fn epsg_from_geokeys(keys: &[u32]) -> Option<String> {
    if keys.len() < 4 {
        return None;
    }
    let entries = keys[4..].chunks_exact(4);
    let mut geographic = None;
    let mut projected = None;
    for entry in entries {
        // Inline values only (tag location 0).
        if entry[1] != 0 || entry[3] == 0 || entry[3] == USER_DEFINED {
            continue;
        }
        match entry[0] {
            PROJECTED_CS_TYPE_KEY => projected = Some(entry[3]),
            GEOGRAPHIC_TYPE_KEY => geographic = Some(entry[3]),
            _ => {}
        }
    }
    projected.or(geographic).map(|code| format!("EPSG:{code}"))
}
