use crate::catchment::is_lon_lat;
use crate::config::{AppConfig, ModeConfig};
use crate::types::{PoiLocation, TripRecord, Zone};
use anyhow::{anyhow, bail, Context, Result};
use csv::ReaderBuilder;
use geo::{Centroid, MultiPolygon, Point};
use proj4rs::proj::Proj;
use shapefile::Reader;
use std::collections::HashMap;
use std::fs::File;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Zone ids arrive as strings, integers or floats ("123.0") depending on the
/// source file; they are compared in integer form when possible.
pub fn normalize_id(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.parse::<f64>() {
        Ok(v) if v.is_finite() && v.fract() == 0.0 && v.abs() < 1e15 => format!("{}", v as i64),
        _ => trimmed.to_string(),
    }
}

const WGS84: &str = "+proj=longlat +ellps=WGS84 +datum=WGS84 +no_defs";

/// Converts points from a projected CRS to WGS84 lon/lat.
pub struct Reprojector {
    from: Proj,
    to: Proj,
}

impl Reprojector {
    pub fn new(definition: &str) -> Result<Self> {
        let from = Proj::from_proj_string(definition)
            .map_err(|e| anyhow!("Invalid zones_crs '{}': {:?}", definition, e))?;
        let to = Proj::from_proj_string(WGS84)
            .map_err(|e| anyhow!("Failed to build WGS84 projection: {:?}", e))?;
        Ok(Self { from, to })
    }

    pub fn to_wgs84(&self, point: Point<f64>) -> Result<Point<f64>> {
        let mut xyz = (point.x(), point.y(), 0.0);
        proj4rs::transform::transform(&self.from, &self.to, &mut xyz)
            .map_err(|e| anyhow!("Failed to reproject ({}, {}): {:?}", point.x(), point.y(), e))?;
        // proj4rs works in radians for geographic coordinates
        Ok(Point::new(xyz.0.to_degrees(), xyz.1.to_degrees()))
    }
}

/// Zone centroids keyed by normalised id, in WGS84 lon/lat. Fails when a
/// centroid isn't lon/lat after optional reprojection via `input.zones_crs`.
pub fn load_zones(config: &AppConfig) -> Result<HashMap<String, Zone>> {
    let path = &config.input.zones;
    let extension = path.extension()
        .and_then(|e| e.to_str())
        .map(|s: &str| s.to_lowercase())
        .ok_or_else(|| anyhow!("Input geometry file has no extension"))?;

    let shapes = match extension.as_str() {
        "shp" => load_shapefile(path, &config.input.zone_id_column)?,
        "json" | "geojson" => load_geojson(path, &config.input.zone_id_column)?,
        _ => return Err(anyhow!("Unsupported geometry format: {}", extension)),
    };

    let reprojector = match &config.input.zones_crs {
        Some(definition) => {
            info!("Reprojecting zone centroids from '{}'", definition);
            Some(Reprojector::new(definition)?)
        }
        None => None,
    };

    let mut zones = HashMap::new();
    for (id, geometry) in shapes {
        match geometry.centroid() {
            Some(centroid) => {
                let centroid = match &reprojector {
                    Some(r) => r.to_wgs84(centroid)
                        .with_context(|| format!("Zone {}", id))?,
                    None => centroid,
                };
                if !is_lon_lat(centroid.x(), centroid.y()) {
                    bail!(
                        "Zone {} centroid ({}, {}) is not WGS84 lon/lat; set input.zones_crs to the projection of {:?}",
                        id, centroid.x(), centroid.y(), path
                    );
                }
                if let Some(previous) = zones.insert(id.clone(), Zone { id, centroid }) {
                    warn!("Duplicate zone id {}, keeping the last one", previous.id);
                }
            }
            None => warn!("Zone {} has an empty geometry, skipping", id),
        }
    }

    info!("Loaded {} zones with centroids from {:?}", zones.len(), path);
    Ok(zones)
}

fn load_shapefile(path: &Path, id_column: &str) -> Result<Vec<(String, MultiPolygon<f64>)>> {
    let mut reader = Reader::from_path(path)
        .with_context(|| format!("Failed to open Shapefile: {:?}", path))?;

    let mut shapes = Vec::new();

    for result in reader.iter_shapes_and_records() {
        let (shape, record) = result?;

        let id_value = record.get(id_column)
            .ok_or_else(|| anyhow!("Join column '{}' not found in Shapefile", id_column))?;

        let id = match id_value {
            shapefile::dbase::FieldValue::Character(Some(s)) => normalize_id(s),
            shapefile::dbase::FieldValue::Numeric(Some(n)) => normalize_id(&n.to_string()),
            shapefile::dbase::FieldValue::Character(None)
            | shapefile::dbase::FieldValue::Numeric(None) => continue,
            _ => return Err(anyhow!("Shapefile join column must be a string or number")),
        };

        let geometry: MultiPolygon<f64> = match shape {
            shapefile::Shape::Polygon(polygon) => polygon.try_into()
                .map_err(|e| anyhow!("Failed to convert polygon: {:?}", e))?,
            shapefile::Shape::PolygonM(polygon) => polygon.try_into()
                .map_err(|e| anyhow!("Failed to convert polygonM: {:?}", e))?,
            shapefile::Shape::PolygonZ(polygon) => polygon.try_into()
                .map_err(|e| anyhow!("Failed to convert polygonZ: {:?}", e))?,
            _ => continue, // Skip non-polygon shapes
        };

        shapes.push((id, geometry));
    }

    Ok(shapes)
}

fn load_geojson(path: &Path, id_column: &str) -> Result<Vec<(String, MultiPolygon<f64>)>> {
    use geojson::GeoJson;
    use std::io::BufReader;

    let file = File::open(path)
        .with_context(|| format!("Failed to open GeoJSON file: {:?}", path))?;
    let geojson = GeoJson::from_reader(BufReader::new(file)).context("Failed to parse GeoJSON")?;

    let collection = match geojson {
        GeoJson::FeatureCollection(fc) => fc,
        _ => return Err(anyhow!("GeoJSON must be a FeatureCollection")),
    };

    let mut shapes = Vec::new();

    for feature in collection.features {
        let id_val = feature.properties.as_ref()
            .and_then(|props| props.get(id_column));

        let id = match id_val {
            Some(serde_json::Value::String(s)) => normalize_id(s),
            Some(serde_json::Value::Number(n)) => normalize_id(&n.to_string()),
            _ => continue, // Skip if no ID or not string/number
        };

        let geometry = match feature.geometry {
            Some(geom) => {
                let geometry: geo::Geometry<f64> = geom.value.try_into()
                    .map_err(|e| anyhow!("Failed to convert geojson geometry: {:?}", e))?;
                match geometry {
                    geo::Geometry::MultiPolygon(mp) => mp,
                    geo::Geometry::Polygon(p) => MultiPolygon::new(vec![p]),
                    _ => continue, // Skip points/lines
                }
            }
            None => continue,
        };

        shapes.push((id, geometry));
    }

    Ok(shapes)
}

pub fn trips_path(config: &AppConfig, poi: &PoiLocation) -> PathBuf {
    config.input.trips_dir.join(format!("{}_inbound_trips.csv", poi.file))
}

/// Reads a POI's inbound trip table. Fractions are stored in the order of
/// [`AppConfig::fraction_columns`]; missing columns or cells read as 0.
pub fn load_trips(config: &AppConfig, path: &Path) -> Result<Vec<TripRecord>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open CSV file: {:?}", path))?;
    let mut rdr = ReaderBuilder::new().from_reader(file);
    let headers = rdr.headers()?.clone();

    let find = |name: &str| headers.iter().position(|h| h.trim() == name);

    let id_idx = find(config.input.trip_id_column.as_str())
        .ok_or_else(|| anyhow!("Join column '{}' not found in CSV", config.input.trip_id_column))?;
    let total_idx = find(config.input.total_trips_column.as_str())
        .ok_or_else(|| anyhow!("Column '{}' not found in CSV", config.input.total_trips_column))?;

    let columns = config.fraction_columns();
    let fraction_idx: Vec<Option<usize>> = columns.iter().map(|c| find(c.as_str())).collect();
    for (column, idx) in columns.iter().zip(&fraction_idx) {
        if idx.is_none() {
            warn!("Mode column '{}' missing from {:?}, treating as 0", column, path);
        }
    }

    let parse = |cell: Option<&str>| -> f64 {
        cell.and_then(|s| s.trim().parse::<f64>().ok())
            .filter(|v| v.is_finite())
            .unwrap_or(0.0)
    };

    let mut records = Vec::new();
    for result in rdr.records() {
        let record = result?;
        let zone_id = normalize_id(record.get(id_idx).unwrap_or(""));
        if zone_id.is_empty() {
            continue;
        }

        let fractions = fraction_idx.iter()
            .map(|idx| parse(idx.and_then(|i| record.get(i))))
            .collect();

        records.push(TripRecord {
            zone_id,
            total_trips: parse(record.get(total_idx)),
            fractions,
        });
    }

    Ok(records)
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FractionReport {
    pub rows: usize,
    pub violations: usize,
    /// First offending row: zone id and its fraction sum.
    pub first_violation: Option<(String, f64)>,
}

/// Checks that every row's mode fractions sum to 1 within `tolerance`.
pub fn validate_mode_fractions(records: &[TripRecord], tolerance: f64) -> FractionReport {
    let mut report = FractionReport { rows: records.len(), ..Default::default() };
    for record in records {
        let sum: f64 = record.fractions.iter().sum();
        if (sum - 1.0).abs() > tolerance {
            report.violations += 1;
            if report.first_violation.is_none() {
                report.first_violation = Some((record.zone_id.clone(), sum));
            }
        }
    }
    report
}

/// Loads and validates the trip table of one POI.
pub fn load_poi_trips(config: &AppConfig, poi: &PoiLocation) -> Result<Vec<TripRecord>> {
    let path = trips_path(config, poi);
    let records = load_trips(config, &path)?;
    info!("Loaded {} trip rows for {} from {:?}", records.len(), poi.name, path);

    let report = validate_mode_fractions(&records, config.catchment.fraction_tolerance);
    if let Some((zone, sum)) = &report.first_violation {
        if config.catchment.strict_fractions {
            bail!(
                "{}: mode fractions of zone {} sum to {:.4} (tolerance {})",
                poi.name, zone, sum, config.catchment.fraction_tolerance
            );
        }
        warn!(
            "{}: {} of {} rows have mode fractions not summing to 1 (first: zone {} = {:.4})",
            poi.name, report.violations, report.rows, zone, sum
        );
    }

    Ok(records)
}

/// `total_trips` times the sum of the mode's fraction columns.
pub fn mode_weight(total_trips: f64, fractions: &[f64], indices: &[usize]) -> f64 {
    let share: f64 = indices.iter().map(|&i| fractions[i]).sum();
    total_trips * share
}

/// Positions of `mode`'s columns within [`TripRecord::fractions`].
pub fn mode_column_indices(config: &AppConfig, mode: &ModeConfig) -> Vec<usize> {
    let columns = config.fraction_columns();
    mode.columns.iter()
        .filter_map(|c| columns.iter().position(|x| x == c))
        .collect()
}

/// Origin coordinates and weights for one mode. Rows whose zone has no
/// centroid get NaN coordinates and are dropped by the calculator.
pub fn mode_points(
    config: &AppConfig,
    mode: &ModeConfig,
    records: &[TripRecord],
    zones: &HashMap<String, Zone>,
) -> (Vec<(f64, f64)>, Vec<f64>) {
    let indices = mode_column_indices(config, mode);
    records.iter()
        .map(|r| {
            let coords = zones.get(&r.zone_id)
                .map(|z| (z.centroid.x(), z.centroid.y()))
                .unwrap_or((f64::NAN, f64::NAN));
            (coords, mode_weight(r.total_trips, &r.fractions, &indices))
        })
        .unzip()
}
