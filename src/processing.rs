use crate::boundary::{intersect, ReferenceBoundary};
use crate::catchment::calculate_catchment;
use crate::config::AppConfig;
use crate::data;
use crate::types::{Catchment, CatchmentOutcome, PoiLocation, TripRecord, Zone};
use geo::{BoundingRect, GeodesicArea, Rect};
use rayon::prelude::*;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{error, info, info_span, warn};

#[derive(Debug, Clone)]
pub struct ModeResult {
    pub mode: String,
    pub outcome: CatchmentOutcome,
}

#[derive(Debug, Clone)]
pub struct PoiCatchments {
    pub poi: PoiLocation,
    /// One entry per configured mode, in configuration order. Empty when the
    /// POI's trip table couldn't be loaded.
    pub results: Vec<ModeResult>,
    pub bounds: Option<Rect<f64>>,
    pub load_error: Option<String>,
}

impl PoiCatchments {
    /// Successful catchments, largest first.
    pub fn catchments(&self, config: &AppConfig) -> Vec<Catchment> {
        let mut catchments: Vec<Catchment> = self.results.iter()
            .filter_map(|r| {
                let polygon = r.outcome.polygon()?;
                let color = config.mode(&r.mode).map(|m| m.color.clone()).unwrap_or_default();
                Some(Catchment {
                    poi: self.poi.name.clone(),
                    mode: r.mode.clone(),
                    color,
                    polygon: polygon.clone(),
                })
            })
            .collect();
        catchments.sort_by(|a, b| b.polygon.area_km2.total_cmp(&a.polygon.area_km2));
        catchments
    }

    pub fn outcome(&self, mode: &str) -> Option<&CatchmentOutcome> {
        self.results.iter().find(|r| r.mode == mode).map(|r| &r.outcome)
    }
}

/// Computes every mode's catchment for one POI from its trip rows.
pub fn compute_poi(
    config: &AppConfig,
    poi: &PoiLocation,
    records: &[TripRecord],
    zones: &HashMap<String, Zone>,
    boundary: &ReferenceBoundary,
) -> PoiCatchments {
    let mut results = Vec::with_capacity(config.modes.len());
    let mut bounds: Option<Rect<f64>> = None;

    for mode in &config.modes {
        let _span = info_span!("catchment", poi = %poi.name, mode = %mode.name).entered();

        let (points, weights) = data::mode_points(config, mode, records, zones);
        let outcome = calculate_catchment(
            &points,
            &weights,
            poi.point(),
            config.catchment.percentile,
            boundary,
        );

        match &outcome {
            CatchmentOutcome::Catchment(c) => {
                info!(
                    "{:.2} km2 from {} zones (max {:.1} km)",
                    c.area_km2, c.included_points, c.max_distance_km
                );
                if let Some(rect) = c.geometry.bounding_rect() {
                    bounds = Some(match bounds {
                        Some(b) => merge_rects(b, rect),
                        None => rect,
                    });
                }
            }
            other => warn!("No catchment: {}", other.status()),
        }

        results.push(ModeResult { mode: mode.name.clone(), outcome });
    }

    PoiCatchments { poi: poi.clone(), results, bounds, load_error: None }
}

/// Runs every configured POI. A POI whose trip table fails to load is kept
/// with its error and no results; the others are unaffected.
pub fn process_all(
    config: &AppConfig,
    zones: &HashMap<String, Zone>,
    boundary: &ReferenceBoundary,
) -> Vec<PoiCatchments> {
    info!(
        "Processing catchments for {} POIs x {} modes at {}%",
        config.pois.len(), config.modes.len(), config.catchment.percentile
    );

    config.pois.par_iter().map(|poi| {
        match data::load_poi_trips(config, poi) {
            Ok(records) => compute_poi(config, poi, &records, zones, boundary),
            Err(e) => {
                error!("Error loading data for {}: {:#}", poi.name, e);
                PoiCatchments {
                    poi: poi.clone(),
                    results: Vec::new(),
                    bounds: None,
                    load_error: Some(format!("{:#}", e)),
                }
            }
        }
    }).collect()
}

fn merge_rects(a: Rect<f64>, b: Rect<f64>) -> Rect<f64> {
    Rect::new(
        geo::Coord { x: a.min().x.min(b.min().x), y: a.min().y.min(b.min().y) },
        geo::Coord { x: a.max().x.max(b.max().x), y: a.max().y.max(b.max().y) },
    )
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapKind {
    PoiToPoi,
    ModeToMode,
}

#[derive(Debug, Clone, Serialize)]
pub struct Overlap {
    pub kind: OverlapKind,
    /// The mode for POI pairs, the POI for mode pairs.
    pub group: String,
    pub entity1: String,
    pub entity2: String,
    pub intersection_area_km2: f64,
    pub overlap_pct_of_1: f64,
    pub overlap_pct_of_2: f64,
}

/// Pairwise overlaps: POI against POI within each mode, and mode against
/// mode within each POI. Pairs are unordered with `entity1 < entity2`.
pub fn compute_overlaps(config: &AppConfig, results: &[PoiCatchments]) -> Vec<Overlap> {
    let mut overlaps = Vec::new();

    for mode in &config.modes {
        for a in results {
            for b in results {
                if a.poi.name >= b.poi.name {
                    continue;
                }
                if let (Some(CatchmentOutcome::Catchment(ca)), Some(CatchmentOutcome::Catchment(cb))) =
                    (a.outcome(&mode.name), b.outcome(&mode.name))
                {
                    if let Some(o) = overlap(OverlapKind::PoiToPoi, &mode.name, &a.poi.name, &b.poi.name, ca, cb) {
                        overlaps.push(o);
                    }
                }
            }
        }
    }

    for poi in results {
        for a in &poi.results {
            for b in &poi.results {
                if a.mode >= b.mode {
                    continue;
                }
                if let (CatchmentOutcome::Catchment(ca), CatchmentOutcome::Catchment(cb)) = (&a.outcome, &b.outcome) {
                    if let Some(o) = overlap(OverlapKind::ModeToMode, &poi.poi.name, &a.mode, &b.mode, ca, cb) {
                        overlaps.push(o);
                    }
                }
            }
        }
    }

    overlaps
}

fn overlap(
    kind: OverlapKind,
    group: &str,
    entity1: &str,
    entity2: &str,
    a: &crate::types::CatchmentPolygon,
    b: &crate::types::CatchmentPolygon,
) -> Option<Overlap> {
    let shared = match intersect(&a.geometry, &b.geometry) {
        Ok(shared) => shared,
        Err(e) => {
            warn!("Skipping overlap {} / {} ({}): {:#}", entity1, entity2, group, e);
            return None;
        }
    };
    let intersection_area_km2 = shared.geodesic_area_unsigned() / 1_000_000.0;
    let pct = |area: f64| if area > 0.0 { intersection_area_km2 / area * 100.0 } else { 0.0 };

    Some(Overlap {
        kind,
        group: group.to_string(),
        entity1: entity1.to_string(),
        entity2: entity2.to_string(),
        intersection_area_km2,
        overlap_pct_of_1: pct(a.area_km2),
        overlap_pct_of_2: pct(b.area_km2),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::SAMPLE;
    use geo::Point;

    fn zones() -> HashMap<String, Zone> {
        let centroids = [
            ("1", 34.81, 31.26),
            ("2", 34.80, 31.28),
            ("3", 34.77, 31.26),
            ("4", 34.80, 31.23),
            ("5", 34.85, 31.27),
        ];
        centroids.iter()
            .map(|&(id, x, y)| (id.to_string(), Zone { id: id.to_string(), centroid: Point::new(x, y) }))
            .collect()
    }

    fn records() -> Vec<TripRecord> {
        // fractions: mode_car, mode_bus, mode_link, mode_train
        let rows = [
            ("1", 100.0, [0.5, 0.3, 0.1, 0.1]),
            ("2", 80.0, [0.5, 0.2, 0.2, 0.1]),
            ("3", 60.0, [1.0, 0.0, 0.0, 0.0]),
            ("4", 40.0, [0.5, 0.5, 0.0, 0.0]),
            ("5", 20.0, [0.0, 0.0, 0.0, 0.0]),
            ("missing", 500.0, [1.0, 0.0, 0.0, 0.0]),
        ];
        rows.iter()
            .map(|(id, total, f)| TripRecord { zone_id: id.to_string(), total_trips: *total, fractions: f.to_vec() })
            .collect()
    }

    #[test]
    fn computes_each_mode_and_orders_by_area() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        let boundary = ReferenceBoundary::from_config(&config.boundary).unwrap();
        let poi = config.poi("BGU").unwrap();

        let result = compute_poi(&config, poi, &records(), &zones(), &boundary);
        assert_eq!(result.results.len(), 2);
        assert_eq!(result.results[0].mode, "car");
        assert!(matches!(result.outcome("car"), Some(CatchmentOutcome::Catchment(_))));
        assert!(matches!(result.outcome("transit"), Some(CatchmentOutcome::Catchment(_))));
        assert!(result.bounds.is_some());

        let catchments = result.catchments(&config);
        assert_eq!(catchments.len(), 2);
        assert!(catchments[0].polygon.area_km2 >= catchments[1].polygon.area_km2);
        assert!(catchments.iter().all(|c| c.color.starts_with('#')));

        // The 500-trip row has no centroid and must not count.
        let car = result.outcome("car").unwrap().polygon().unwrap();
        assert!((car.total_weight - 170.0).abs() < 1e-9);
    }

    #[test]
    fn overlaps_between_modes() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        let boundary = ReferenceBoundary::from_config(&config.boundary).unwrap();
        let poi = config.poi("BGU").unwrap();
        let result = compute_poi(&config, poi, &records(), &zones(), &boundary);

        let overlaps = compute_overlaps(&config, &[result]);
        assert_eq!(overlaps.len(), 1);
        let o = &overlaps[0];
        assert_eq!(o.kind, OverlapKind::ModeToMode);
        assert_eq!((o.entity1.as_str(), o.entity2.as_str()), ("car", "transit"));
        assert!(o.intersection_area_km2 > 0.0);
        assert!(o.overlap_pct_of_1 <= 100.0 + 1e-6);
        assert!(o.overlap_pct_of_2 <= 100.0 + 1e-6);
    }

    #[test]
    fn merged_bounds_cover_both() {
        let a = Rect::new(geo::Coord { x: 0.0, y: 0.0 }, geo::Coord { x: 1.0, y: 1.0 });
        let b = Rect::new(geo::Coord { x: -1.0, y: 0.5 }, geo::Coord { x: 0.5, y: 3.0 });
        let m = merge_rects(a, b);
        assert_eq!((m.min().x, m.min().y, m.max().x, m.max().y), (-1.0, 0.0, 1.0, 3.0));
    }
}
