//! Input channels drawn from scene layers, with their scaling.

use crate::types::{DatasetError, DatasetResult};
use ndarray::{Array3, Axis};
use scene_cube::Scene;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    Planet,
    Sentinel2,
    Ndvi,
    Tcvis,
    Elevation,
    Slope,
}

impl DataSource {
    pub const ALL: [DataSource; 6] = [
        DataSource::Planet,
        DataSource::Sentinel2,
        DataSource::Ndvi,
        DataSource::Tcvis,
        DataSource::Elevation,
        DataSource::Slope,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            DataSource::Planet => "planet",
            DataSource::Sentinel2 => "sentinel2",
            DataSource::Ndvi => "ndvi",
            DataSource::Tcvis => "tcvis",
            DataSource::Elevation => "elevation",
            DataSource::Slope => "slope",
        }
    }

    pub fn channels(&self) -> usize {
        match self {
            DataSource::Planet | DataSource::Sentinel2 => 4,
            DataSource::Tcvis => 3,
            DataSource::Ndvi | DataSource::Elevation | DataSource::Slope => 1,
        }
    }

    fn divisor(&self) -> f32 {
        match self {
            DataSource::Planet | DataSource::Sentinel2 => 10_000.0,
            DataSource::Tcvis => 255.0,
            DataSource::Elevation => 1_000.0,
            DataSource::Slope => 90.0,
            DataSource::Ndvi => 1.0,
        }
    }

    /// Scaled `[channels, rows, cols]` array; NaN marks missing data.
    pub fn extract(&self, scene: &Scene) -> DatasetResult<Array3<f32>> {
        match self {
            DataSource::Ndvi => ndvi(scene).map(|a| a.insert_axis(Axis(0))),
            other => {
                let layer = scene
                    .layer(other.name())
                    .ok_or_else(|| DatasetError::MissingLayer {
                        scene: scene.id.clone(),
                        layer: other.name().to_string(),
                    })?;
                let bands = layer.data.shape()[0];
                if bands < other.channels() {
                    return Err(DatasetError::MissingLayer {
                        scene: scene.id.clone(),
                        layer: format!("{} ({} of {} bands)", other.name(), bands, other.channels()),
                    });
                }
                let d = other.divisor();
                Ok(layer
                    .data
                    .slice(ndarray::s![0..other.channels(), .., ..])
                    .mapv(|v| v / d))
            }
        }
    }
}

/// `(nir - red) / (nir + red)` from the planet layer, else sentinel2.
fn ndvi(scene: &Scene) -> DatasetResult<ndarray::Array2<f32>> {
    let layer = scene
        .layer(DataSource::Planet.name())
        .or_else(|| scene.layer(DataSource::Sentinel2.name()))
        .ok_or_else(|| DatasetError::MissingLayer {
            scene: scene.id.clone(),
            layer: "planet|sentinel2 (for ndvi)".into(),
        })?;
    let missing = |band: &str| DatasetError::MissingLayer {
        scene: scene.id.clone(),
        layer: format!("{}.{band}", layer.name),
    };
    let red = layer.band("red").ok_or_else(|| missing("red"))?;
    let nir = layer.band("nir").ok_or_else(|| missing("nir"))?;
    let mut out = ndarray::Array2::<f32>::zeros(red.raw_dim());
    ndarray::Zip::from(&mut out)
        .and(&red)
        .and(&nir)
        .for_each(|o, &r, &n| {
            let sum = n + r;
            *o = if sum == 0.0 { 0.0 } else { (n - r) / sum };
        });
    Ok(out)
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for DataSource {
    type Err = DatasetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DataSource::ALL
            .into_iter()
            .find(|d| d.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| DatasetError::UnknownDataSource {
                name: s.to_string(),
                available: DataSource::ALL.iter().map(|d| d.name()).collect(),
            })
    }
}

/// Ordered channel recipe for a run.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DataSources(pub Vec<DataSource>);

impl DataSources {
    pub fn parse<S: AsRef<str>>(names: &[S]) -> DatasetResult<Self> {
        names
            .iter()
            .map(|n| n.as_ref().parse())
            .collect::<DatasetResult<Vec<_>>>()
            .map(DataSources)
    }

    pub fn channels(&self) -> usize {
        self.0.iter().map(|s| s.channels()).sum()
    }

    pub fn contains(&self, source: DataSource) -> bool {
        self.0.contains(&source)
    }

    /// Channel offset of `source` in the stacked input, if present.
    pub fn offset_of(&self, source: DataSource) -> Option<usize> {
        let mut offset = 0;
        for s in &self.0 {
            if *s == source {
                return Some(offset);
            }
            offset += s.channels();
        }
        None
    }

    /// Stack every source into `[C, rows, cols]`.
    pub fn stack(&self, scene: &Scene) -> DatasetResult<Array3<f32>> {
        let parts = self
            .0
            .iter()
            .map(|s| s.extract(scene))
            .collect::<DatasetResult<Vec<_>>>()?;
        let views: Vec<_> = parts.iter().map(|a| a.view()).collect();
        if views.is_empty() {
            return Err(DatasetError::InvalidSpec("no data sources configured".into()));
        }
        ndarray::concatenate(Axis(0), &views).map_err(|e| DatasetError::Other(e.to_string()))
    }
}
