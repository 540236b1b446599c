//! Catchment polygons: the smallest nearest-first set of origin points that
//! carries a target share of a POI's trips, hulled and clipped to the
//! reference boundary.
//!
//! The greedy walk approximates "smallest area holding X% of trips" by
//! assuming trip density falls off with distance from the POI. It is not a
//! minimal-area search.

use crate::boundary::ReferenceBoundary;
use crate::types::{CatchmentOutcome, CatchmentPolygon};
use geo::{Area, BoundingRect, ConvexHull, GeodesicArea, GeodesicDistance, MultiPoint, Point, Polygon};
use tracing::{debug, warn};

pub const DEFAULT_PERCENTILE: f64 = 90.0;

/// A hull needs at least three points.
pub const MIN_HULL_POINTS: usize = 3;

#[derive(Debug, Clone, Copy)]
pub struct RankedPoint {
    pub point: Point<f64>,
    pub weight: f64,
    pub distance_km: f64,
}

/// Great-circle distance on the WGS84 ellipsoid, in kilometres.
pub fn geodesic_km(a: Point<f64>, b: Point<f64>) -> f64 {
    a.geodesic_distance(&b) / 1000.0
}

/// True for a finite longitude/latitude pair within WGS84 range.
pub fn is_lon_lat(x: f64, y: f64) -> bool {
    (-180.0..=180.0).contains(&x) && (-90.0..=90.0).contains(&y)
}

/// Drops points that aren't lon/lat, points with non-positive weight and
/// points whose distance can't be computed, then orders the rest by distance
/// from `poi`. Ties keep their input order.
pub fn rank_points(points: &[(f64, f64)], weights: &[f64], poi: Point<f64>) -> Vec<RankedPoint> {
    let mut dropped = 0usize;
    let mut ranked: Vec<RankedPoint> = points
        .iter()
        .zip(weights)
        .filter(|((x, y), _)| x.is_finite() && y.is_finite())
        .filter(|((x, y), _)| {
            let keep = is_lon_lat(*x, *y);
            dropped += usize::from(!keep);
            keep
        })
        .map(|(&(x, y), &weight)| {
            let point = Point::new(x, y);
            RankedPoint { point, weight, distance_km: geodesic_km(poi, point) }
        })
        .filter(|p| p.weight.is_finite() && p.weight > 0.0 && p.distance_km.is_finite())
        .collect();

    if dropped > 0 {
        warn!("Dropped {} points outside lon/lat range; are the zones projected?", dropped);
    }

    ranked.sort_by(|a, b| a.distance_km.total_cmp(&b.distance_km));
    ranked
}

/// Number of leading points needed to reach `target` weight, never fewer
/// than [`MIN_HULL_POINTS`] (capped at `ranked.len()`).
pub fn nearest_until(ranked: &[RankedPoint], target: f64) -> usize {
    let mut cumulative = 0.0;
    for (i, p) in ranked.iter().enumerate() {
        cumulative += p.weight;
        let count = i + 1;
        if cumulative >= target && count >= MIN_HULL_POINTS {
            return count;
        }
    }
    ranked.len()
}

fn hull_of(points: &[RankedPoint]) -> Polygon<f64> {
    MultiPoint::new(points.iter().map(|p| p.point).collect()).convex_hull()
}

/// Computes the catchment of `poi` over origin `points` (lon, lat) weighted
/// by `weights`, covering `percentile` percent of the total weight.
pub fn calculate_catchment(
    points: &[(f64, f64)],
    weights: &[f64],
    poi: Point<f64>,
    percentile: f64,
    boundary: &ReferenceBoundary,
) -> CatchmentOutcome {
    if points.len() != weights.len() {
        let msg = format!("{} points but {} weights", points.len(), weights.len());
        warn!("Catchment input mismatch: {}", msg);
        return CatchmentOutcome::GeometryError(msg);
    }

    let ranked = rank_points(points, weights, poi);
    if ranked.len() < MIN_HULL_POINTS {
        warn!("Not enough non-zero weight points ({})", ranked.len());
        return CatchmentOutcome::InsufficientData { valid_points: ranked.len() };
    }

    let total_weight: f64 = ranked.iter().map(|p| p.weight).sum();
    let target_weight = total_weight * (percentile / 100.0);
    let mut count = nearest_until(&ranked, target_weight);

    // Collinear leading points have no area; take the next nearest until
    // the hull opens up.
    let mut hull = hull_of(&ranked[..count]);
    while hull.unsigned_area() <= 0.0 && count < ranked.len() {
        count += 1;
        hull = hull_of(&ranked[..count]);
    }
    if hull.unsigned_area() <= 0.0 {
        let msg = format!("{} collinear points give a degenerate hull", count);
        warn!("{}", msg);
        return CatchmentOutcome::GeometryError(msg);
    }

    let included = &ranked[..count];
    let included_weight: f64 = included.iter().map(|p| p.weight).sum();
    let max_distance_km = included.last().map(|p| p.distance_km).unwrap_or(0.0);

    debug!(
        total_weight,
        target_weight,
        included = count,
        max_distance_km,
        "Selected nearest origins"
    );

    let disjoint = match (hull.bounding_rect(), boundary.bounding_rect()) {
        (Some(h), Some(b)) => h.max().x < b.min().x || h.min().x > b.max().x || h.max().y < b.min().y || h.min().y > b.max().y,
        _ => false,
    };
    if disjoint {
        warn!("Catchment hull lies outside the reference boundary");
        return CatchmentOutcome::EmptyIntersection;
    }

    let clipped = match boundary.clip(&hull) {
        Ok(clipped) => clipped,
        Err(e) => {
            warn!("Error during clipping: {:#}", e);
            return CatchmentOutcome::GeometryError(e.to_string());
        }
    };

    if clipped.0.is_empty() || clipped.unsigned_area() <= 0.0 {
        warn!("Clipping resulted in empty polygon");
        return CatchmentOutcome::EmptyIntersection;
    }

    let area_km2 = clipped.geodesic_area_unsigned() / 1_000_000.0;

    CatchmentOutcome::Catchment(CatchmentPolygon {
        geometry: clipped,
        area_km2,
        included_points: count,
        included_weight,
        total_weight,
        target_weight,
        max_distance_km,
    })
}
