use crate::catchment::geodesic_km;
use crate::types::{PoiLocation, TripRecord, Zone};
use serde::Serialize;
use std::collections::{HashMap, HashSet};

/// How far a POI's trips travel, over all modes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DistanceStats {
    pub poi: String,
    pub total_trips: f64,
    pub avg_distance_km: f64,
    pub median_distance_km: f64,
    pub p75_distance_km: f64,
    pub p90_distance_km: f64,
    pub unique_zones: usize,
}

/// Returns `None` when no zone with a known centroid carries trips.
pub fn distance_stats(
    poi: &PoiLocation,
    records: &[TripRecord],
    zones: &HashMap<String, Zone>,
) -> Option<DistanceStats> {
    let mut seen = HashSet::new();
    let mut rows: Vec<(f64, f64)> = records.iter()
        .filter(|r| r.total_trips > 0.0)
        .filter_map(|r| {
            let zone = zones.get(&r.zone_id)?;
            seen.insert(zone.id.as_str());
            Some((geodesic_km(poi.point(), zone.centroid), r.total_trips))
        })
        .collect();

    let total_trips: f64 = rows.iter().map(|(_, t)| t).sum();
    if rows.is_empty() || total_trips <= 0.0 {
        return None;
    }

    rows.sort_by(|a, b| a.0.total_cmp(&b.0));

    let avg_distance_km = rows.iter().map(|(d, t)| d * t).sum::<f64>() / total_trips;

    Some(DistanceStats {
        poi: poi.name.clone(),
        total_trips,
        avg_distance_km,
        median_distance_km: distance_at_share(&rows, total_trips, 50.0),
        p75_distance_km: distance_at_share(&rows, total_trips, 75.0),
        p90_distance_km: distance_at_share(&rows, total_trips, 90.0),
        unique_zones: seen.len(),
    })
}

// rows sorted by distance
fn distance_at_share(rows: &[(f64, f64)], total: f64, pct: f64) -> f64 {
    let mut cumulative = 0.0;
    for (distance, trips) in rows {
        cumulative += trips;
        if cumulative / total * 100.0 >= pct {
            return *distance;
        }
    }
    rows.last().map(|(d, _)| *d).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Point;

    fn poi() -> PoiLocation {
        PoiLocation { name: "BGU".into(), display: None, file: "bgu".into(), lat: 31.25, lon: 34.80 }
    }

    #[test]
    fn thresholds_follow_cumulative_share() {
        // about 1, 2, 3 and 4 km north of the POI
        let mut zones = HashMap::new();
        for (i, dy) in [0.009, 0.018, 0.027, 0.036].iter().enumerate() {
            let id = format!("z{}", i);
            zones.insert(id.clone(), Zone { id, centroid: Point::new(34.80, 31.25 + dy) });
        }
        let records: Vec<TripRecord> = [("z3", 10.0), ("z0", 30.0), ("z1", 25.0), ("z2", 15.0), ("z0", 20.0), ("nowhere", 99.0)]
            .iter()
            .map(|(id, t)| TripRecord { zone_id: id.to_string(), total_trips: *t, fractions: vec![] })
            .collect();

        let stats = distance_stats(&poi(), &records, &zones).unwrap();
        assert_eq!(stats.total_trips, 100.0);
        // z0 appears twice, "nowhere" has no centroid
        assert_eq!(stats.unique_zones, 4);
        // 50% is reached by the nearest zone alone, 75% by the second, 90% by the third.
        assert!((stats.median_distance_km - 1.0).abs() < 0.05);
        assert!((stats.p75_distance_km - 2.0).abs() < 0.05);
        assert!((stats.p90_distance_km - 3.0).abs() < 0.05);
        assert!(stats.avg_distance_km > stats.median_distance_km);
    }

    #[test]
    fn no_trips_means_no_stats() {
        let zones = HashMap::new();
        let records = vec![TripRecord { zone_id: "a".into(), total_trips: 5.0, fractions: vec![] }];
        assert!(distance_stats(&poi(), &records, &zones).is_none());
    }
}
