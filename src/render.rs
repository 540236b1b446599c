use crate::config::{parse_hex_color, AppConfig};
use crate::processing::PoiCatchments;
use crate::types::Catchment;
use anyhow::{Context, Result};
use geo::{BoundingRect, Contains, Point, Rect};
use image::{ImageBuffer, Rgba, RgbaImage};
use rayon::prelude::*;
use std::f64::consts::PI;
use std::fs;
use std::path::PathBuf;
use tracing::{info, warn};

const BACKGROUND: Rgba<u8> = Rgba([26, 26, 26, 255]);
const POI_MARKER: Rgba<u8> = Rgba([255, 255, 255, 255]);
const FILL_ALPHA: u8 = 150;
const PADDING: f64 = 0.1;
// Half-width of the frame when a POI has no catchments, in degrees.
const EMPTY_FRAME_DEG: f64 = 0.05;

/// Renders one PNG per POI into `{output.dir}/maps`. Returns the written paths.
pub fn render_maps(config: &AppConfig, results: &[PoiCatchments]) -> Result<Vec<PathBuf>> {
    let dir = config.output.dir.join("maps");
    fs::create_dir_all(&dir).context("Failed to create maps directory")?;

    let written: Vec<PathBuf> = results.par_iter().filter_map(|r| {
        let path = dir.join(format!("{}.png", r.poi.file));
        let img = render_poi(config, r);
        match img.save(&path) {
            Ok(()) => Some(path),
            Err(e) => {
                warn!("Failed to save map {:?}: {:?}", path, e);
                None
            }
        }
    }).collect();

    info!("Rendered {} maps into {:?}", written.len(), dir);
    Ok(written)
}

pub fn render_poi(config: &AppConfig, result: &PoiCatchments) -> RgbaImage {
    let size = config.output.image_size;
    let poi = result.poi.point();
    let bounds = result.bounds.unwrap_or_else(|| {
        Rect::new(
            geo::Coord { x: poi.x() - EMPTY_FRAME_DEG, y: poi.y() - EMPTY_FRAME_DEG },
            geo::Coord { x: poi.x() + EMPTY_FRAME_DEG, y: poi.y() + EMPTY_FRAME_DEG },
        )
    });
    let frame = MapFrame::around(bounds, poi, size);

    let mut img: RgbaImage = ImageBuffer::from_pixel(size, size, BACKGROUND);

    // largest first, so smaller catchments stay visible on top
    for catchment in result.catchments(config) {
        fill_catchment(&mut img, &frame, &catchment);
    }

    let (px, py) = frame.to_pixel(poi.x(), poi.y());
    draw_marker(&mut img, px, py, (size / 200).max(3) as i64);
    img
}

fn fill_catchment(img: &mut RgbaImage, frame: &MapFrame, catchment: &Catchment) {
    let rgb = match parse_hex_color(&catchment.color) {
        Ok(rgb) => rgb,
        Err(e) => {
            warn!("Mode {} has an unusable color: {}", catchment.mode, e);
            return;
        }
    };
    let color = Rgba([rgb[0], rgb[1], rgb[2], FILL_ALPHA]);
    let geometry = &catchment.polygon.geometry;
    let Some(bbox) = geometry.bounding_rect() else { return };

    // pixel window covering the bbox; y grows downwards
    let (x0, y1) = frame.to_pixel(bbox.min().x, bbox.min().y);
    let (x1, y0) = frame.to_pixel(bbox.max().x, bbox.max().y);
    let clamp = |v: f64| v.floor().max(0.0).min(frame.size as f64 - 1.0) as u32;
    let (x0, x1, y0, y1) = (clamp(x0), clamp(x1), clamp(y0), clamp(y1));

    let rows: Vec<(u32, Vec<u32>)> = (y0..=y1).into_par_iter().map(|py| {
        let inside = (x0..=x1)
            .filter(|&px| {
                let (lon, lat) = frame.to_lon_lat(px as f64 + 0.5, py as f64 + 0.5);
                geometry.contains(&Point::new(lon, lat))
            })
            .collect();
        (py, inside)
    }).collect();

    for (py, xs) in rows {
        for px in xs {
            let blended = blend(*img.get_pixel(px, py), color);
            img.put_pixel(px, py, blended);
        }
    }
}

fn draw_marker(img: &mut RgbaImage, cx: f64, cy: f64, radius: i64) {
    let (cx, cy) = (cx.round() as i64, cy.round() as i64);
    for dy in -radius..=radius {
        for dx in -radius..=radius {
            if dx * dx + dy * dy > radius * radius {
                continue;
            }
            let (x, y) = (cx + dx, cy + dy);
            if x >= 0 && y >= 0 && (x as u32) < img.width() && (y as u32) < img.height() {
                img.put_pixel(x as u32, y as u32, POI_MARKER);
            }
        }
    }
}

fn blend(base: Rgba<u8>, over: Rgba<u8>) -> Rgba<u8> {
    let a = over[3] as f64 / 255.0;
    let mix = |b: u8, o: u8| (o as f64 * a + b as f64 * (1.0 - a)).round() as u8;
    Rgba([mix(base[0], over[0]), mix(base[1], over[1]), mix(base[2], over[2]), 255])
}

/// Square Web Mercator window mapped onto `size` x `size` pixels.
#[derive(Debug, Clone, Copy)]
pub struct MapFrame {
    min_x: f64,
    min_y: f64,
    span: f64,
    size: u32,
}

impl MapFrame {
    /// Frames `bounds` (widened to include `poi`) with padding, keeping the
    /// aspect square.
    pub fn around(bounds: Rect<f64>, poi: Point<f64>, size: u32) -> Self {
        let (ax, ay) = mercator(bounds.min().x.min(poi.x()), bounds.max().y.max(poi.y()));
        let (bx, by) = mercator(bounds.max().x.max(poi.x()), bounds.min().y.min(poi.y()));
        let span = (bx - ax).max(by - ay).max(1e-9) * (1.0 + 2.0 * PADDING);
        let (cx, cy) = ((ax + bx) / 2.0, (ay + by) / 2.0);
        Self { min_x: cx - span / 2.0, min_y: cy - span / 2.0, span, size }
    }

    pub fn to_pixel(&self, lon: f64, lat: f64) -> (f64, f64) {
        let (x, y) = mercator(lon, lat);
        let scale = self.size as f64 / self.span;
        ((x - self.min_x) * scale, (y - self.min_y) * scale)
    }

    pub fn to_lon_lat(&self, px: f64, py: f64) -> (f64, f64) {
        let scale = self.span / self.size as f64;
        inverse_mercator(self.min_x + px * scale, self.min_y + py * scale)
    }
}

// Web Mercator in [0, 1] world units, y pointing south.
fn mercator(lon: f64, lat: f64) -> (f64, f64) {
    let x = (lon + 180.0) / 360.0;
    let lat_rad = lat.to_radians();
    let y = (1.0 - (lat_rad.tan() + (1.0 / lat_rad.cos())).ln() / PI) / 2.0;
    (x, y)
}

fn inverse_mercator(x: f64, y: f64) -> (f64, f64) {
    let lon = x * 360.0 - 180.0;
    let lat = (PI * (1.0 - 2.0 * y)).sinh().atan().to_degrees();
    (lon, lat)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::SAMPLE;
    use crate::processing::ModeResult;
    use crate::types::{CatchmentOutcome, CatchmentPolygon};
    use geo::{polygon, MultiPolygon};

    #[test]
    fn mercator_round_trips() {
        let (x, y) = mercator(34.8, 31.25);
        let (lon, lat) = inverse_mercator(x, y);
        assert!((lon - 34.8).abs() < 1e-9);
        assert!((lat - 31.25).abs() < 1e-9);
    }

    #[test]
    fn frame_keeps_bounds_and_poi_inside() {
        let bounds = Rect::new(geo::Coord { x: 34.7, y: 31.2 }, geo::Coord { x: 34.9, y: 31.3 });
        let frame = MapFrame::around(bounds, Point::new(34.95, 31.25), 512);
        for (lon, lat) in [(34.7, 31.2), (34.9, 31.3), (34.95, 31.25)] {
            let (px, py) = frame.to_pixel(lon, lat);
            assert!(px > 0.0 && px < 512.0, "{} {}", lon, px);
            assert!(py > 0.0 && py < 512.0, "{} {}", lat, py);
        }
        // north is up
        assert!(frame.to_pixel(34.8, 31.3).1 < frame.to_pixel(34.8, 31.2).1);
    }

    #[test]
    fn blend_mixes_by_alpha() {
        let out = blend(Rgba([0, 0, 0, 255]), Rgba([255, 0, 100, 128]));
        assert_eq!(out[3], 255);
        assert!(out[0] > 120 && out[0] < 135);
        assert_eq!(out[1], 0);
    }

    #[test]
    fn renders_catchment_and_marker() {
        let text = SAMPLE.replace("dir = \"output\"", "dir = \"output\"\nimage_size = 128");
        let config = AppConfig::from_toml(&text).unwrap();
        let poi = config.pois[0].clone();
        let geometry = MultiPolygon::new(vec![polygon![
            (x: 34.75, y: 31.22), (x: 34.85, y: 31.22), (x: 34.85, y: 31.30), (x: 34.75, y: 31.30), (x: 34.75, y: 31.22)
        ]]);
        let bounds = geometry.bounding_rect();
        let result = PoiCatchments {
            poi: poi.clone(),
            results: vec![ModeResult {
                mode: "car".into(),
                outcome: CatchmentOutcome::Catchment(CatchmentPolygon {
                    geometry,
                    area_km2: 80.0,
                    included_points: 3,
                    included_weight: 9.0,
                    total_weight: 10.0,
                    target_weight: 9.0,
                    max_distance_km: 5.0,
                }),
            }],
            bounds,
            load_error: None,
        };

        let img = render_poi(&config, &result);
        assert_eq!(img.dimensions(), (128, 128));
        assert_eq!(*img.get_pixel(1, 1), BACKGROUND);

        let frame = MapFrame::around(bounds.unwrap(), poi.point(), 128);
        let (px, py) = frame.to_pixel(34.76, 31.29);
        let filled = img.get_pixel(px as u32, py as u32);
        assert_ne!(*filled, BACKGROUND);
        assert!(filled[0] > BACKGROUND[0]);

        let (mx, my) = frame.to_pixel(poi.lon, poi.lat);
        assert_eq!(*img.get_pixel(mx.round() as u32, my.round() as u32), POI_MARKER);
    }
}
