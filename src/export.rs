use crate::config::AppConfig;
use crate::processing::{Overlap, PoiCatchments};
use crate::stats::DistanceStats;
use crate::types::{Catchment, PoiLocation};
use anyhow::{Context, Result};
use geojson::{Feature, FeatureCollection, Geometry, JsonObject, Value};
use serde::Serialize;
use serde_json::json;
use std::fs;
use std::path::Path;
use tracing::info;

/// Single-part catchments become `Polygon`, the rest `MultiPolygon`.
pub fn catchment_geometry(catchment: &Catchment) -> Geometry {
    let shape = &catchment.polygon.geometry;
    let value = match shape.0.as_slice() {
        [single] => Value::from(single),
        _ => Value::from(shape),
    };
    Geometry::new(value)
}

pub fn catchment_feature(config: &AppConfig, poi: &PoiLocation, catchment: &Catchment) -> Feature {
    let mode_display = config.mode(&catchment.mode)
        .map(|m| m.display_name().to_string())
        .unwrap_or_else(|| catchment.mode.clone());
    let c = &catchment.polygon;

    let mut properties = JsonObject::new();
    properties.insert("poi".into(), json!(poi.name));
    properties.insert("poi_display".into(), json!(poi.display_name()));
    properties.insert("mode".into(), json!(catchment.mode));
    properties.insert("mode_display".into(), json!(mode_display));
    properties.insert("color".into(), json!(catchment.color));
    properties.insert("area_km2".into(), json!(c.area_km2));
    properties.insert("included_points".into(), json!(c.included_points));
    properties.insert("included_weight".into(), json!(c.included_weight));
    properties.insert("total_weight".into(), json!(c.total_weight));
    properties.insert("target_weight".into(), json!(c.target_weight));
    properties.insert("max_distance_km".into(), json!(c.max_distance_km));
    properties.insert("percentile".into(), json!(config.catchment.percentile));

    Feature {
        bbox: None,
        geometry: Some(catchment_geometry(catchment)),
        id: None,
        properties: Some(properties),
        foreign_members: None,
    }
}

/// Features for the given POIs, each POI's catchments largest first.
pub fn feature_collection<'a>(
    config: &AppConfig,
    results: impl IntoIterator<Item = &'a PoiCatchments>,
) -> FeatureCollection {
    let features = results.into_iter()
        .flat_map(|r| {
            r.catchments(config)
                .into_iter()
                .map(move |c| catchment_feature(config, &r.poi, &c))
        })
        .collect();

    FeatureCollection { bbox: None, features, foreign_members: None }
}

#[derive(Debug, Serialize)]
struct AreaRow<'a> {
    poi: &'a str,
    mode: &'a str,
    status: &'a str,
    area_km2: Option<f64>,
    included_points: Option<usize>,
    max_distance_km: Option<f64>,
}

pub fn write_geojson(path: &Path, collection: &FeatureCollection) -> Result<()> {
    let text = serde_json::to_string(collection)?;
    fs::write(path, text).with_context(|| format!("Failed to write GeoJSON: {:?}", path))
}

/// One row per POI and mode. POIs whose data failed to load get a
/// `load_error` row per mode.
pub fn write_areas_csv(path: &Path, config: &AppConfig, results: &[PoiCatchments]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create CSV: {:?}", path))?;

    for r in results {
        for mode in &config.modes {
            let outcome = r.outcome(&mode.name);
            let polygon = outcome.and_then(|o| o.polygon());
            wtr.serialize(AreaRow {
                poi: &r.poi.name,
                mode: &mode.name,
                status: outcome.map(|o| o.status()).unwrap_or("load_error"),
                area_km2: polygon.map(|p| p.area_km2),
                included_points: polygon.map(|p| p.included_points),
                max_distance_km: polygon.map(|p| p.max_distance_km),
            })?;
        }
    }

    wtr.flush()?;
    Ok(())
}

pub fn write_overlaps_csv(path: &Path, overlaps: &[Overlap]) -> Result<()> {
    write_rows(path, overlaps)
}

pub fn write_stats_csv(path: &Path, stats: &[DistanceStats]) -> Result<()> {
    write_rows(path, stats)
}

fn write_rows<T: Serialize>(path: &Path, rows: &[T]) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("Failed to create CSV: {:?}", path))?;
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Writes catchments.geojson, catchment_areas.csv and catchment_overlaps.csv
/// into the output directory.
pub fn write_all(config: &AppConfig, results: &[PoiCatchments], overlaps: &[Overlap]) -> Result<()> {
    let dir = &config.output.dir;
    fs::create_dir_all(dir).with_context(|| format!("Failed to create output directory {:?}", dir))?;

    let collection = feature_collection(config, results);
    write_geojson(&dir.join("catchments.geojson"), &collection)?;
    write_areas_csv(&dir.join("catchment_areas.csv"), config, results)?;
    write_overlaps_csv(&dir.join("catchment_overlaps.csv"), overlaps)?;

    info!(
        "Wrote {} catchments and {} overlaps to {:?}",
        collection.features.len(), overlaps.len(), dir
    );
    Ok(())
}
