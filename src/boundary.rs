use crate::config::BoundaryConfig;
use anyhow::{anyhow, bail, Context, Result};
use geo::{BooleanOps, BoundingRect, Coord, LineString, MultiPolygon, Polygon, Rect};
use geojson::GeoJson;
use std::fs::File;
use std::io::BufReader;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use tracing::info;

/// Fixed outline that every catchment hull is clipped to.
#[derive(Debug, Clone)]
pub struct ReferenceBoundary {
    shape: MultiPolygon<f64>,
    bbox: Option<Rect<f64>>,
}

impl ReferenceBoundary {
    pub fn new(shape: MultiPolygon<f64>) -> Self {
        let bbox = shape.bounding_rect();
        Self { shape, bbox }
    }

    pub fn from_config(config: &BoundaryConfig) -> Result<Self> {
        if let Some(path) = &config.file {
            return Self::from_geojson_file(path);
        }
        match &config.coordinates {
            Some(coords) => Ok(Self::from_ring(coords)),
            None => Err(anyhow!("No boundary coordinates or file configured")),
        }
    }

    /// Builds from `[lon, lat]` pairs; the ring is closed if it isn't already.
    pub fn from_ring(coords: &[[f64; 2]]) -> Self {
        let ring: Vec<Coord<f64>> = coords.iter().map(|&[x, y]| Coord { x, y }).collect();
        let polygon = Polygon::new(LineString::new(ring), vec![]);
        Self::new(MultiPolygon::new(vec![polygon]))
    }

    pub fn from_geojson_file(path: &Path) -> Result<Self> {
        info!("Loading reference boundary from {:?}", path);
        let file = File::open(path)
            .with_context(|| format!("Failed to open boundary file: {:?}", path))?;
        let geojson = GeoJson::from_reader(BufReader::new(file))
            .context("Failed to parse boundary GeoJSON")?;

        let values: Vec<geojson::Value> = match geojson {
            GeoJson::FeatureCollection(fc) => fc
                .features
                .into_iter()
                .filter_map(|f| f.geometry.map(|g| g.value))
                .collect(),
            GeoJson::Feature(f) => f.geometry.map(|g| g.value).into_iter().collect(),
            GeoJson::Geometry(g) => vec![g.value],
        };

        let mut polygons = Vec::new();
        for value in values {
            let geometry: geo::Geometry<f64> = value
                .try_into()
                .map_err(|e| anyhow!("Failed to convert boundary geometry: {:?}", e))?;
            match geometry {
                geo::Geometry::Polygon(p) => polygons.push(p),
                geo::Geometry::MultiPolygon(mp) => polygons.extend(mp),
                _ => {}
            }
        }

        if polygons.is_empty() {
            bail!("Boundary file {:?} contains no polygons", path);
        }

        let mut shape = MultiPolygon::new(vec![polygons.remove(0)]);
        for polygon in polygons {
            shape = union(&shape, &MultiPolygon::new(vec![polygon]))
                .with_context(|| format!("Failed to merge boundary parts of {:?}", path))?;
        }
        info!("Boundary built from {} part(s)", shape.0.len());
        Ok(Self::new(shape))
    }

    pub fn shape(&self) -> &MultiPolygon<f64> {
        &self.shape
    }

    pub fn bounding_rect(&self) -> Option<Rect<f64>> {
        self.bbox
    }

    pub fn clip(&self, hull: &Polygon<f64>) -> Result<MultiPolygon<f64>> {
        intersect(&MultiPolygon::new(vec![hull.clone()]), &self.shape)
    }
}

/// Boolean intersection that reports a panic inside the boolean-ops engine
/// as an error.
pub fn intersect(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>> {
    guarded("intersection", || a.intersection(b))
}

pub fn union(a: &MultiPolygon<f64>, b: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>> {
    guarded("union", || a.union(b))
}

fn guarded<F>(op: &str, f: F) -> Result<MultiPolygon<f64>>
where
    F: FnOnce() -> MultiPolygon<f64>,
{
    panic::catch_unwind(AssertUnwindSafe(f)).map_err(|payload| {
        let msg = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        anyhow!("Polygon {} failed: {}", op, msg)
    })
}
