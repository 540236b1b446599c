use geo::{MultiPolygon, Point};
use serde::{Deserialize, Serialize};

/// A destination that trips are analysed against.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PoiLocation {
    pub name: String,
    #[serde(default)]
    pub display: Option<String>,
    /// Stem of the trip table, `{file}_inbound_trips.csv`.
    pub file: String,
    pub lat: f64,
    pub lon: f64,
}

impl PoiLocation {
    pub fn display_name(&self) -> &str {
        self.display.as_deref().unwrap_or(&self.name)
    }

    pub fn point(&self) -> Point<f64> {
        Point::new(self.lon, self.lat)
    }
}

#[derive(Debug, Clone)]
pub struct Zone {
    pub id: String,
    pub centroid: Point<f64>,
}

/// One row of a POI's inbound trip table.
#[derive(Debug, Clone)]
pub struct TripRecord {
    pub zone_id: String,
    pub total_trips: f64,
    // fraction per column, in the order of AppConfig::fraction_columns
    pub fractions: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct CatchmentPolygon {
    pub geometry: MultiPolygon<f64>,
    pub area_km2: f64,
    pub included_points: usize,
    pub included_weight: f64,
    pub total_weight: f64,
    pub target_weight: f64,
    pub max_distance_km: f64,
}

/// Result of a single catchment computation.
#[derive(Debug, Clone)]
pub enum CatchmentOutcome {
    Catchment(CatchmentPolygon),
    /// Fewer than three points carry positive weight.
    InsufficientData { valid_points: usize },
    EmptyIntersection,
    GeometryError(String),
}

impl CatchmentOutcome {
    pub fn status(&self) -> &'static str {
        match self {
            CatchmentOutcome::Catchment(_) => "ok",
            CatchmentOutcome::InsufficientData { .. } => "insufficient_data",
            CatchmentOutcome::EmptyIntersection => "empty_intersection",
            CatchmentOutcome::GeometryError(_) => "geometry_error",
        }
    }

    pub fn polygon(&self) -> Option<&CatchmentPolygon> {
        match self {
            CatchmentOutcome::Catchment(c) => Some(c),
            _ => None,
        }
    }
}

/// A computed catchment tagged with the POI and mode it belongs to.
#[derive(Debug, Clone)]
pub struct Catchment {
    pub poi: String,
    pub mode: String,
    pub color: String,
    pub polygon: CatchmentPolygon,
}
