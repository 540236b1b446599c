use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::fs;
use anyhow::{bail, Context, Result};

use crate::catchment::DEFAULT_PERCENTILE;
use crate::types::PoiLocation;

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub input: InputConfig,
    #[serde(default)]
    pub catchment: CatchmentConfig,
    pub boundary: BoundaryConfig,
    pub pois: Vec<PoiLocation>,
    pub modes: Vec<ModeConfig>,
    pub output: OutputConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    /// Zone polygons, GeoJSON or Shapefile.
    pub zones: PathBuf,
    pub zone_id_column: String,
    /// PROJ.4 definition of the zone file's coordinates when they aren't
    /// WGS84 lon/lat, e.g. the Israeli TM Grid. Centroids are reprojected.
    #[serde(default)]
    pub zones_crs: Option<String>,
    /// Directory holding `{poi.file}_inbound_trips.csv`.
    pub trips_dir: PathBuf,
    #[serde(default = "default_trip_id_column")]
    pub trip_id_column: String,
    #[serde(default = "default_total_trips_column")]
    pub total_trips_column: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct CatchmentConfig {
    #[serde(default = "default_percentile")]
    pub percentile: f64,
    #[serde(default = "default_fraction_tolerance")]
    pub fraction_tolerance: f64,
    /// Reject a POI's trip table when a row's mode fractions don't sum to 1.
    #[serde(default)]
    pub strict_fractions: bool,
}

impl Default for CatchmentConfig {
    fn default() -> Self {
        Self {
            percentile: default_percentile(),
            fraction_tolerance: default_fraction_tolerance(),
            strict_fractions: false,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct BoundaryConfig {
    /// Closed ring of `[lon, lat]` pairs.
    #[serde(default)]
    pub coordinates: Option<Vec<[f64; 2]>>,
    /// GeoJSON file, used instead of `coordinates` when set.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ModeConfig {
    pub name: String,
    #[serde(default)]
    pub display: Option<String>,
    pub color: String, // Hex code
    pub columns: Vec<String>, // fraction columns to sum
}

impl ModeConfig {
    pub fn display_name(&self) -> &str {
        self.display.as_deref().unwrap_or(&self.name)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    pub dir: PathBuf,
    #[serde(default = "default_image_size")]
    pub image_size: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self { port: 8080 }
    }
}

fn default_trip_id_column() -> String {
    "tract".to_string()
}

fn default_total_trips_column() -> String {
    "total_trips".to_string()
}

fn default_percentile() -> f64 {
    DEFAULT_PERCENTILE
}

fn default_fraction_tolerance() -> f64 {
    0.005
}

fn default_image_size() -> u32 {
    1024
}

impl AppConfig {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(content)
            .with_context(|| "Failed to parse TOML configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let p = self.catchment.percentile;
        if !(p > 0.0 && p <= 100.0) {
            bail!("catchment.percentile must be in (0, 100], got {}", p);
        }
        if !(self.catchment.fraction_tolerance >= 0.0) {
            bail!("catchment.fraction_tolerance must be non-negative");
        }
        if self.pois.is_empty() {
            bail!("At least one [[pois]] entry is required");
        }
        if self.modes.is_empty() {
            bail!("At least one [[modes]] entry is required");
        }

        let mut names = BTreeSet::new();
        for poi in &self.pois {
            if !names.insert(poi.name.as_str()) {
                bail!("Duplicate POI name '{}'", poi.name);
            }
            if !(-90.0..=90.0).contains(&poi.lat) || !(-180.0..=180.0).contains(&poi.lon) {
                bail!("POI '{}' has out-of-range coordinates ({}, {})", poi.name, poi.lat, poi.lon);
            }
        }

        let mut names = BTreeSet::new();
        for mode in &self.modes {
            if !names.insert(mode.name.as_str()) {
                bail!("Duplicate mode name '{}'", mode.name);
            }
            if mode.columns.is_empty() {
                bail!("Mode '{}' lists no fraction columns", mode.name);
            }
            parse_hex_color(&mode.color)
                .with_context(|| format!("Mode '{}' has an invalid color", mode.name))?;
        }

        match (&self.boundary.coordinates, &self.boundary.file) {
            (_, Some(_)) => {}
            (Some(coords), None) if coords.len() >= 4 => {}
            (Some(_), None) => bail!("boundary.coordinates needs at least 4 positions"),
            (None, None) => bail!("Either boundary.coordinates or boundary.file is required"),
        }

        Ok(())
    }

    pub fn mode(&self, name: &str) -> Option<&ModeConfig> {
        self.modes.iter().find(|m| m.name == name)
    }

    pub fn poi(&self, name: &str) -> Option<&PoiLocation> {
        self.pois.iter().find(|p| p.name == name)
    }

    /// Every distinct fraction column any mode reads, in first-seen order.
    pub fn fraction_columns(&self) -> Vec<String> {
        let mut seen = BTreeSet::new();
        self.modes
            .iter()
            .flat_map(|m| m.columns.iter())
            .filter(|c| seen.insert(c.as_str()))
            .cloned()
            .collect()
    }
}

pub fn parse_hex_color(hex: &str) -> Result<[u8; 3]> {
    let digits = hex.trim_start_matches('#');
    if digits.len() != 6 || !digits.chars().all(|c| c.is_ascii_hexdigit()) {
        bail!("Expected #RRGGBB, got '{}'", hex);
    }
    let channel = |i: usize| u8::from_str_radix(&digits[i..i + 2], 16);
    Ok([channel(0)?, channel(2)?, channel(4)?])
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) const SAMPLE: &str = r##"
[input]
zones = "zones.geojson"
zone_id_column = "YISHUV_STAT11"
trips_dir = "dashboard_data"

[boundary]
coordinates = [[34.2, 29.5], [34.3, 31.2], [35.6, 31.5], [35.0, 29.5], [34.2, 29.5]]

[[pois]]
name = "BGU"
display = "Ben Gurion University"
file = "bgu"
lat = 31.262218
lon = 34.801472

[[modes]]
name = "car"
color = "#FF6B6B"
columns = ["mode_car"]

[[modes]]
name = "transit"
display = "Public Transit"
color = "#4ECDC4"
columns = ["mode_bus", "mode_link", "mode_train"]

[output]
dir = "output"
"##;

    #[test]
    fn parses_sample_with_defaults() {
        let config = AppConfig::from_toml(SAMPLE).unwrap();
        assert_eq!(config.catchment.percentile, 90.0);
        assert_eq!(config.catchment.fraction_tolerance, 0.005);
        assert!(!config.catchment.strict_fractions);
        assert_eq!(config.input.trip_id_column, "tract");
        assert_eq!(config.input.total_trips_column, "total_trips");
        assert!(config.input.zones_crs.is_none());
        assert_eq!(config.output.image_size, 1024);
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.mode("transit").unwrap().display_name(), "Public Transit");
        assert_eq!(config.mode("car").unwrap().display_name(), "car");
        assert_eq!(
            config.fraction_columns(),
            vec!["mode_car", "mode_bus", "mode_link", "mode_train"]
        );
    }

    #[test]
    fn rejects_bad_percentile() {
        let text = format!("{}\n[catchment]\npercentile = 0.0\n", SAMPLE);
        assert!(AppConfig::from_toml(&text).is_err());
        let text = format!("{}\n[catchment]\npercentile = 150.0\n", SAMPLE);
        assert!(AppConfig::from_toml(&text).is_err());
    }

    #[test]
    fn rejects_bad_color() {
        let text = SAMPLE.replace("#FF6B6B", "red");
        assert!(AppConfig::from_toml(&text).is_err());
    }

    #[test]
    fn rejects_missing_boundary() {
        let text = SAMPLE.replace(
            "coordinates = [[34.2, 29.5], [34.3, 31.2], [35.6, 31.5], [35.0, 29.5], [34.2, 29.5]]",
            "",
        );
        assert!(AppConfig::from_toml(&text).is_err());
    }

    #[test]
    fn hex_colors() {
        assert_eq!(parse_hex_color("#4ECDC4").unwrap(), [0x4E, 0xCD, 0xC4]);
        assert_eq!(parse_hex_color("96ceb4").unwrap(), [0x96, 0xCE, 0xB4]);
        assert!(parse_hex_color("#FFF").is_err());
        assert!(parse_hex_color("#GGGGGG").is_err());
    }
}
