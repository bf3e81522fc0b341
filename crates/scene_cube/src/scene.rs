//! Scene stacks and the cube file format.
//!
//! Layout: `RTSC` magic, u32 LE format version, u64 LE header length, JSON
//! header, layer samples (f32 LE, band-major, in layer order), mask bytes.

use crate::geo::Grid;
use crate::raster::Raster;
use crate::types::{CubeError, CubeResult};
use chrono::NaiveDate;
use ndarray::{Array2, Array3};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const CUBE_MAGIC: &[u8; 4] = b"RTSC";
pub const CUBE_VERSION: u32 = 1;
const PREAMBLE_LEN: usize = 16;

/// Relative tolerance (in pixels) when comparing grids.
const GRID_TOLERANCE: f64 = 1e-6;

pub const MASK_BACKGROUND: u8 = 0;
pub const MASK_SLUMP: u8 = 1;
pub const MASK_IGNORE: u8 = 255;

#[derive(Debug, Clone, PartialEq)]
pub struct Layer {
    pub name: String,
    pub band_names: Vec<String>,
    /// `[bands, rows, cols]`
    pub data: Array3<f32>,
}

impl Layer {
    pub fn new(name: impl Into<String>, band_names: Vec<String>, data: Array3<f32>) -> Self {
        Self {
            name: name.into(),
            band_names,
            data,
        }
    }

    pub fn band(&self, name: &str) -> Option<ndarray::ArrayView2<'_, f32>> {
        let idx = self.band_names.iter().position(|b| b == name)?;
        Some(self.data.index_axis(ndarray::Axis(0), idx))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Scene {
    pub id: String,
    pub grid: Grid,
    pub date: Option<NaiveDate>,
    pub layers: Vec<Layer>,
    pub mask: Option<Array2<u8>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LayerHeader {
    pub name: String,
    pub bands: Vec<String>,
    /// Byte offset of the layer samples from the start of the file.
    pub offset: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CubeHeader {
    pub id: String,
    pub grid: Grid,
    pub date: Option<NaiveDate>,
    pub layers: Vec<LayerHeader>,
    pub mask_offset: Option<u64>,
}

impl CubeHeader {
    pub fn layer(&self, name: &str) -> Option<&LayerHeader> {
        self.layers.iter().find(|l| l.name == name)
    }
}

pub fn grids_match(a: &Grid, b: &Grid) -> bool {
    let ta = &a.transform;
    let tb = &b.transform;
    let tol_x = ta.pixel_width.abs() * GRID_TOLERANCE;
    let tol_y = ta.pixel_height.abs() * GRID_TOLERANCE;
    a.width == b.width
        && a.height == b.height
        && crate::geo::crs_compatible(a.crs.as_deref(), b.crs.as_deref())
        && (ta.origin_x - tb.origin_x).abs() <= tol_x
        && (ta.origin_y - tb.origin_y).abs() <= tol_y
        && (ta.pixel_width - tb.pixel_width).abs() <= tol_x
        && (ta.pixel_height - tb.pixel_height).abs() <= tol_y
}

impl Scene {
    pub fn new(id: impl Into<String>, grid: Grid, date: Option<NaiveDate>) -> Self {
        Self {
            id: id.into(),
            grid,
            date,
            layers: Vec::new(),
            mask: None,
        }
    }

    /// Append a layer already sampled on the scene grid.
    pub fn push_layer(&mut self, layer: Layer) -> CubeResult<()> {
        let (bands, rows, cols) = layer.data.dim();
        if rows != self.grid.height || cols != self.grid.width {
            return Err(CubeError::Alignment {
                layer: layer.name,
                scene: self.id.clone(),
                msg: format!(
                    "shape {cols}x{rows} differs from scene grid {}x{}",
                    self.grid.width, self.grid.height
                ),
            });
        }
        if bands != layer.band_names.len() {
            return Err(CubeError::Alignment {
                layer: layer.name,
                scene: self.id.clone(),
                msg: format!("{bands} bands but {} band names", layer.band_names.len()),
            });
        }
        if self.layer(&layer.name).is_some() {
            return Err(CubeError::Alignment {
                layer: layer.name,
                scene: self.id.clone(),
                msg: "duplicate layer name".into(),
            });
        }
        self.layers.push(layer);
        Ok(())
    }

    /// Append a raster whose grid must coincide with the scene grid.
    pub fn add_layer(
        &mut self,
        name: &str,
        band_names: Vec<String>,
        raster: Raster,
    ) -> CubeResult<()> {
        if !grids_match(&self.grid, &raster.grid) {
            return Err(CubeError::Alignment {
                layer: name.to_string(),
                scene: self.id.clone(),
                msg: "raster grid differs from scene grid".into(),
            });
        }
        self.push_layer(Layer::new(name, band_names, raster.data))
    }

    pub fn set_mask(&mut self, mask: Array2<u8>) -> CubeResult<()> {
        if mask.dim() != (self.grid.height, self.grid.width) {
            return Err(CubeError::Alignment {
                layer: "mask".into(),
                scene: self.id.clone(),
                msg: "mask shape differs from scene grid".into(),
            });
        }
        self.mask = Some(mask);
        Ok(())
    }

    pub fn layer(&self, name: &str) -> Option<&Layer> {
        self.layers.iter().find(|l| l.name == name)
    }

    pub fn layer_names(&self) -> Vec<&str> {
        self.layers.iter().map(|l| l.name.as_str()).collect()
    }

    fn header(&self, header_len: u64) -> CubeHeader {
        let mut offset = PREAMBLE_LEN as u64 + header_len;
        let mut layers = Vec::with_capacity(self.layers.len());
        for layer in &self.layers {
            layers.push(LayerHeader {
                name: layer.name.clone(),
                bands: layer.band_names.clone(),
                offset,
            });
            offset += (layer.data.len() * std::mem::size_of::<f32>()) as u64;
        }
        CubeHeader {
            id: self.id.clone(),
            grid: self.grid.clone(),
            date: self.date,
            layers,
            mask_offset: self.mask.as_ref().map(|_| offset),
        }
    }

    /// Serialized header bytes; offsets depend on the header length, so iterate to a fixed point.
    fn encode_header(&self) -> CubeResult<Vec<u8>> {
        let mut len = 0u64;
        loop {
            let bytes = serde_json::to_vec(&self.header(len))
                .map_err(|e| CubeError::Other(format!("encode cube header: {e}")))?;
            if bytes.len() as u64 == len {
                return Ok(bytes);
            }
            len = bytes.len() as u64;
        }
    }

    /// Write `<out_dir>/<id>.<extension>`, creating the directory and overwriting any previous cube.
    pub fn save(&self, out_dir: &Path, extension: &str) -> CubeResult<PathBuf> {
        fs::create_dir_all(out_dir).map_err(|e| CubeError::io(out_dir, e))?;
        let path = out_dir.join(format!("{}.{extension}", self.id));
        let header = self.encode_header()?;
        let file = fs::File::create(&path).map_err(|e| CubeError::io(&path, e))?;
        let mut w = BufWriter::new(file);
        let io = |e| CubeError::io(&path, e);
        w.write_all(CUBE_MAGIC).map_err(io)?;
        w.write_all(&CUBE_VERSION.to_le_bytes()).map_err(io)?;
        w.write_all(&(header.len() as u64).to_le_bytes()).map_err(io)?;
        w.write_all(&header).map_err(io)?;
        for layer in &self.layers {
            for v in layer.data.iter() {
                w.write_all(&v.to_le_bytes()).map_err(io)?;
            }
        }
        if let Some(mask) = &self.mask {
            let bytes: Vec<u8> = mask.iter().copied().collect();
            w.write_all(&bytes).map_err(io)?;
        }
        w.flush().map_err(io)?;
        Ok(path)
    }

    /// Parse only the preamble and header of a cube.
    pub fn read_header(path: &Path) -> CubeResult<CubeHeader> {
        use std::io::Read;
        let mut file = fs::File::open(path).map_err(|e| CubeError::io(path, e))?;
        let file_len = file
            .metadata()
            .map_err(|e| CubeError::io(path, e))?
            .len();
        let mut preamble = [0u8; PREAMBLE_LEN];
        file.read_exact(&mut preamble)
            .map_err(|e| CubeError::io(path, e))?;
        let header_len = parse_preamble(path, &preamble, file_len)?;
        let mut header = vec![0u8; header_len];
        file.read_exact(&mut header)
            .map_err(|e| CubeError::io(path, e))?;
        decode_header(path, &header)
    }

    pub fn load(path: &Path) -> CubeResult<Scene> {
        let data = fs::read(path).map_err(|e| CubeError::io(path, e))?;
        let format = |msg: String| CubeError::Format {
            path: path.to_path_buf(),
            msg,
        };
        if data.len() < PREAMBLE_LEN {
            return Err(format("file too small".into()));
        }
        let header_len = parse_preamble(path, &data[..PREAMBLE_LEN], data.len() as u64)?;
        let header_end = PREAMBLE_LEN + header_len;
        let header = decode_header(path, &data[PREAMBLE_LEN..header_end])?;
        let (rows, cols) = (header.grid.height, header.grid.width);
        let pixels = rows
            .checked_mul(cols)
            .ok_or_else(|| format(format!("grid {cols}x{rows} overflows")))?;
        let mut scene = Scene::new(header.id.clone(), header.grid.clone(), header.date);
        for lh in &header.layers {
            let range = byte_span(lh.offset, lh.bands.len(), pixels, 4, data.len())
                .ok_or_else(|| format(format!("layer {} truncated", lh.name)))?;
            let samples: Vec<f32> = data[range]
                .chunks_exact(4)
                .map(|c| {
                    let mut arr = [0u8; 4];
                    arr.copy_from_slice(c);
                    f32::from_le_bytes(arr)
                })
                .collect();
            let arr = Array3::from_shape_vec((lh.bands.len(), rows, cols), samples)
                .map_err(|e| format(e.to_string()))?;
            scene.push_layer(Layer::new(lh.name.clone(), lh.bands.clone(), arr))?;
        }
        if let Some(offset) = header.mask_offset {
            let range = byte_span(offset, 1, pixels, 1, data.len())
                .ok_or_else(|| format("mask truncated".into()))?;
            let mask = Array2::from_shape_vec((rows, cols), data[range].to_vec())
                .map_err(|e| format(e.to_string()))?;
            scene.mask = Some(mask);
        }
        Ok(scene)
    }
}

/// `offset..offset + bands * pixels * width` when it fits inside a file of `file_len` bytes.
fn byte_span(
    offset: u64,
    bands: usize,
    pixels: usize,
    width: usize,
    file_len: usize,
) -> Option<std::ops::Range<usize>> {
    let start = usize::try_from(offset).ok()?;
    let len = bands.checked_mul(pixels)?.checked_mul(width)?;
    let end = start.checked_add(len)?;
    (end <= file_len).then_some(start..end)
}

/// Header length after checking magic and version; it must fit in the rest of the file.
fn parse_preamble(path: &Path, bytes: &[u8], file_len: u64) -> CubeResult<usize> {
    let format = |msg: String| CubeError::Format {
        path: path.to_path_buf(),
        msg,
    };
    if &bytes[0..4] != CUBE_MAGIC {
        return Err(format("bad magic".into()));
    }
    let mut v = [0u8; 4];
    v.copy_from_slice(&bytes[4..8]);
    let version = u32::from_le_bytes(v);
    if version != CUBE_VERSION {
        return Err(format(format!("unsupported version {version}")));
    }
    let mut l = [0u8; 8];
    l.copy_from_slice(&bytes[8..16]);
    let header_len = u64::from_le_bytes(l);
    if header_len > file_len.saturating_sub(PREAMBLE_LEN as u64) {
        return Err(format(format!(
            "header length {header_len} exceeds file size {file_len}"
        )));
    }
    usize::try_from(header_len).map_err(|_| format(format!("header length {header_len} too large")))
}

fn decode_header(path: &Path, bytes: &[u8]) -> CubeResult<CubeHeader> {
    serde_json::from_slice(bytes).map_err(|e| CubeError::Format {
        path: path.to_path_buf(),
        msg: format!("header: {e}"),
    })
}
