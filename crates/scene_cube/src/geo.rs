//! Grids, bounds and polygons in map coordinates.

use serde::{Deserialize, Serialize};

/// North-up affine transform from pixel to map coordinates.
///
/// `pixel_height` is negative for the usual top-left origin.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub origin_x: f64,
    pub origin_y: f64,
    pub pixel_width: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// Map coordinates of the centre of pixel (`col`, `row`).
    pub fn pixel_center(&self, col: usize, row: usize) -> (f64, f64) {
        (
            self.origin_x + (col as f64 + 0.5) * self.pixel_width,
            self.origin_y + (row as f64 + 0.5) * self.pixel_height,
        )
    }

    /// Fractional (col, row) position of a map coordinate; pixel centres sit at `.5`.
    pub fn to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.origin_x) / self.pixel_width,
            (y - self.origin_y) / self.pixel_height,
        )
    }

    pub fn is_degenerate(&self) -> bool {
        !(self.pixel_width.is_finite()
            && self.pixel_height.is_finite()
            && self.pixel_width != 0.0
            && self.pixel_height != 0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Bounds {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self {
            min_x,
            min_y,
            max_x,
            max_y,
        }
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn height(&self) -> f64 {
        self.max_y - self.min_y
    }

    /// True when all coordinates are finite and the area is positive.
    pub fn is_valid(&self) -> bool {
        [self.min_x, self.min_y, self.max_x, self.max_y]
            .iter()
            .all(|v| v.is_finite())
            && self.width() > 0.0
            && self.height() > 0.0
    }

    /// `other` lies within `self`, allowing `tol` map units of slack.
    pub fn contains(&self, other: &Bounds, tol: f64) -> bool {
        other.min_x >= self.min_x - tol
            && other.min_y >= self.min_y - tol
            && other.max_x <= self.max_x + tol
            && other.max_y <= self.max_y + tol
    }

    pub fn intersection(&self, other: &Bounds) -> Option<Bounds> {
        let b = Bounds::new(
            self.min_x.max(other.min_x),
            self.min_y.max(other.min_y),
            self.max_x.min(other.max_x),
            self.max_y.min(other.max_y),
        );
        b.is_valid().then_some(b)
    }

    /// Smallest bounds containing both.
    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds::new(
            self.min_x.min(other.min_x),
            self.min_y.min(other.min_y),
            self.max_x.max(other.max_x),
            self.max_y.max(other.max_y),
        )
    }

    pub fn from_points(points: &[[f64; 2]]) -> Option<Bounds> {
        let first = points.first()?;
        let mut b = Bounds::new(first[0], first[1], first[0], first[1]);
        for p in &points[1..] {
            b.min_x = b.min_x.min(p[0]);
            b.min_y = b.min_y.min(p[1]);
            b.max_x = b.max_x.max(p[0]);
            b.max_y = b.max_y.max(p[1]);
        }
        Some(b)
    }
}

/// Raster grid: CRS, shape and transform. All layers of a scene share one grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Grid {
    /// `EPSG:<code>` when known.
    pub crs: Option<String>,
    pub width: usize,
    pub height: usize,
    pub transform: GeoTransform,
}

impl Grid {
    pub fn bounds(&self) -> Bounds {
        let t = &self.transform;
        let x0 = t.origin_x;
        let x1 = t.origin_x + self.width as f64 * t.pixel_width;
        let y0 = t.origin_y;
        let y1 = t.origin_y + self.height as f64 * t.pixel_height;
        Bounds::new(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }

    /// Unknown CRS on either side is accepted.
    pub fn crs_compatible(&self, other: Option<&str>) -> bool {
        crs_compatible(self.crs.as_deref(), other)
    }

    /// Pixel window `(col, row, width, height)` covering `bounds`, clipped to the grid.
    pub fn window(&self, bounds: &Bounds) -> Option<(usize, usize, usize, usize)> {
        let t = &self.transform;
        let (c0, r0) = t.to_pixel(bounds.min_x, bounds.max_y);
        let (c1, r1) = t.to_pixel(bounds.max_x, bounds.min_y);
        let (c_lo, c_hi) = (c0.min(c1), c0.max(c1));
        let (r_lo, r_hi) = (r0.min(r1), r0.max(r1));
        let col0 = c_lo.floor().max(0.0) as usize;
        let row0 = r_lo.floor().max(0.0) as usize;
        let col1 = (c_hi.ceil().max(0.0) as usize).min(self.width);
        let row1 = (r_hi.ceil().max(0.0) as usize).min(self.height);
        if col1 <= col0 || row1 <= row0 {
            return None;
        }
        Some((col0, row0, col1 - col0, row1 - row0))
    }

    /// Sub-grid for a pixel window.
    pub fn subgrid(&self, col: usize, row: usize, width: usize, height: usize) -> Grid {
        let t = &self.transform;
        Grid {
            crs: self.crs.clone(),
            width,
            height,
            transform: GeoTransform {
                origin_x: t.origin_x + col as f64 * t.pixel_width,
                origin_y: t.origin_y + row as f64 * t.pixel_height,
                pixel_width: t.pixel_width,
                pixel_height: t.pixel_height,
            },
        }
    }
}

pub fn crs_compatible(a: Option<&str>, b: Option<&str>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => a.eq_ignore_ascii_case(b),
        _ => true,
    }
}

/// Polygon with optional holes; rings are closed implicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    pub exterior: Vec<[f64; 2]>,
    #[serde(default)]
    pub holes: Vec<Vec<[f64; 2]>>,
}

impl Polygon {
    pub fn new(exterior: Vec<[f64; 2]>) -> Self {
        Self {
            exterior,
            holes: Vec::new(),
        }
    }

    pub fn bounds(&self) -> Option<Bounds> {
        Bounds::from_points(&self.exterior)
    }

    /// Even-odd containment over the exterior and every hole.
    pub fn contains(&self, x: f64, y: f64) -> bool {
        let mut inside = ring_contains(&self.exterior, x, y);
        for hole in &self.holes {
            if ring_contains(hole, x, y) {
                inside = !inside;
            }
        }
        inside
    }
}

fn ring_contains(ring: &[[f64; 2]], x: f64, y: f64) -> bool {
    if ring.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = ring.len() - 1;
    for i in 0..ring.len() {
        let [xi, yi] = ring[i];
        let [xj, yj] = ring[j];
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}
