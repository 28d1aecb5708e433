use crate::frame::{AlbersEqualArea, AlbersParams, CoordinateFrame, FrameRegistry};
use crate::matcher::{MatchOptions, MatchStrategy, DEFAULT_TIE_TOLERANCE};
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub input: InputConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    pub output: OutputConfig,
    #[serde(default)]
    pub frames: Vec<FrameConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct InputConfig {
    pub tracts: PathBuf, // .shp, .json or .geojson
    #[serde(default = "default_tract_id_column")]
    pub tract_id_column: String,
    /// Left-pads all-digit tract ids with zeros to this width (GEOID is 11).
    #[serde(default)]
    pub tract_id_width: Option<usize>,
    #[serde(default)]
    pub tract_columns: Vec<String>,
    #[serde(default = "default_tract_frame")]
    pub tract_frame: CoordinateFrame,
    pub facilities_csv: PathBuf,
    #[serde(default = "default_lon_column")]
    pub facility_lon_column: String,
    #[serde(default = "default_lat_column")]
    pub facility_lat_column: String,
    pub facility_id_column: Option<String>, // row numbers when absent
    #[serde(default = "default_facility_frame")]
    pub facility_frame: CoordinateFrame,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProcessingConfig {
    #[serde(default = "default_target_frame")]
    pub target_frame: CoordinateFrame,
    #[serde(default)]
    pub strategy: MatchStrategy,
    #[serde(default = "default_tie_tolerance")]
    pub tie_tolerance: f64,
    #[serde(default = "default_column_prefix")]
    pub column_prefix: String,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            target_frame: default_target_frame(),
            strategy: MatchStrategy::default(),
            tie_tolerance: default_tie_tolerance(),
            column_prefix: default_column_prefix(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct OutputConfig {
    pub csv: PathBuf,
}

/// A custom Albers frame registered on top of the built-in ones.
#[derive(Debug, Deserialize, Clone)]
pub struct FrameConfig {
    pub code: CoordinateFrame,
    #[serde(flatten)]
    pub albers: AlbersParams,
}

fn default_tract_id_column() -> String {
    "GEOID".to_string()
}

fn default_tract_frame() -> CoordinateFrame {
    CoordinateFrame::epsg(3488)
}

fn default_lon_column() -> String {
    "lon".to_string()
}

fn default_lat_column() -> String {
    "lat".to_string()
}

fn default_facility_frame() -> CoordinateFrame {
    CoordinateFrame::epsg(4326)
}

fn default_target_frame() -> CoordinateFrame {
    CoordinateFrame::epsg(3488)
}

fn default_tie_tolerance() -> f64 {
    DEFAULT_TIE_TOLERANCE
}

fn default_column_prefix() -> String {
    "nearest_mrf_".to_string()
}

impl AppConfig {
    /// Reads a TOML config. Relative paths inside it are resolved against
    /// the directory holding the config file, never the process cwd.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;
        let mut config: AppConfig = toml::from_str(&content)
            .with_context(|| "Failed to parse TOML configuration")?;

        if let Some(base) = path.parent() {
            config.resolve_paths(base);
        }
        Ok(config)
    }

    fn resolve_paths(&mut self, base: &Path) {
        for path in [
            &mut self.input.tracts,
            &mut self.input.facilities_csv,
            &mut self.output.csv,
        ] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
    }

    /// Built-in frames plus any `[[frames]]` from the config.
    pub fn frame_registry(&self) -> FrameRegistry {
        let mut registry = FrameRegistry::with_defaults();
        for frame in &self.frames {
            registry.register(frame.code.clone(), AlbersEqualArea::new(frame.albers));
        }
        registry
    }

    pub fn match_options(&self) -> MatchOptions {
        MatchOptions {
            strategy: self.processing.strategy,
            tie_tolerance: self.processing.tie_tolerance,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, body: &str) -> PathBuf {
        let path = dir.path().join("config.toml");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(body.as_bytes()).unwrap();
        path
    }

    #[test]
    fn minimal_config_gets_defaults() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
            [input]
            tracts = "data/tracts.shp"
            facilities_csv = "US_MRF_Compilation.csv"

            [output]
            csv = "out/tracts_with_nearest_mrfs.csv"
            "#,
        );

        let config = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(config.input.tract_id_column, "GEOID");
        assert_eq!(config.input.tract_frame, CoordinateFrame::epsg(3488));
        assert_eq!(config.input.facility_frame, CoordinateFrame::epsg(4326));
        assert_eq!(config.input.facility_id_column, None);
        assert_eq!(config.input.tract_id_width, None);
        assert_eq!(config.processing.target_frame, CoordinateFrame::epsg(3488));
        assert_eq!(config.processing.strategy, MatchStrategy::Indexed);
        assert_eq!(config.processing.column_prefix, "nearest_mrf_");
        assert_eq!(config.input.tracts, dir.path().join("data/tracts.shp"));
        assert_eq!(
            config.output.csv,
            dir.path().join("out/tracts_with_nearest_mrfs.csv")
        );
    }

    #[test]
    fn custom_frames_are_registered() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
            [input]
            tracts = "/abs/tracts.geojson"
            facilities_csv = "mrfs.csv"
            facility_id_column = "Facility Name"
            tract_frame = "epsg:4269"
            tract_id_width = 11

            [processing]
            target_frame = "ESRI:102003"
            strategy = "brute_force"
            tie_tolerance = 0.5

            [output]
            csv = "out.csv"

            [[frames]]
            code = "ESRI:102003"
            standard_parallel_1 = 29.5
            standard_parallel_2 = 45.5
            latitude_of_origin = 37.5
            central_meridian = -96.0
            "#,
        );

        let config = AppConfig::load_from_file(&path).unwrap();
        assert_eq!(config.input.tracts, PathBuf::from("/abs/tracts.geojson"));
        assert_eq!(config.input.tract_frame, CoordinateFrame::epsg(4269));
        assert_eq!(config.input.tract_id_width, Some(11));
        assert_eq!(config.processing.strategy, MatchStrategy::BruteForce);
        assert_eq!(config.match_options().tie_tolerance, 0.5);

        let registry = config.frame_registry();
        assert!(registry.contains(&CoordinateFrame::new("ESRI", 102003)));
        assert!(registry.contains(&CoordinateFrame::epsg(3488)));
    }

    #[test]
    fn malformed_frame_is_a_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            r#"
            [input]
            tracts = "t.shp"
            facilities_csv = "f.csv"
            tract_frame = "albers"

            [output]
            csv = "out.csv"
            "#,
        );
        assert!(AppConfig::load_from_file(&path).is_err());
    }
}
