use serde::{Deserialize, Deserializer, Serialize};
use std::fs;
use std::path::Path;

use crate::errors::{FiberMorphError, Result};

/// Configuration for fibermorph
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    #[serde(default = "default_input_path")]
    pub input_path: String,

    #[serde(default = "default_output_base_dir")]
    pub output_base_dir: String,

    #[serde(default)]
    pub analysis: AnalysisMode,

    #[serde(default = "default_image_extensions")]
    pub image_extensions: Vec<String>,

    // Resolution
    #[serde(default = "default_resolution_mm")]
    pub resolution_mm: f64,

    #[serde(default = "default_resolution_mu")]
    pub resolution_mu: f64,

    // Windows of measurement; each size is a separate measurement of every
    // element, none measures whole elements
    #[serde(default, deserialize_with = "one_or_many")]
    pub window_size: Vec<f64>,

    #[serde(default)]
    pub window_unit: WindowUnit,

    #[serde(default = "default_min_window_fraction")]
    pub min_window_fraction: f64,

    #[serde(default = "default_min_window_px")]
    pub min_window_px: usize,

    // Binarization
    #[serde(default)]
    pub threshold_method: ThresholdMethod,

    #[serde(default)]
    pub threshold_value: Option<u8>,

    #[serde(default)]
    pub ridge_filter: bool,

    #[serde(default = "default_ridge_sigmas")]
    pub ridge_sigmas: Vec<f32>,

    #[serde(default)]
    pub dilation_radius: u8,

    #[serde(default)]
    pub border_buffer: u32,

    #[serde(default)]
    pub min_particle_area: Option<usize>,

    // Pruning
    #[serde(default = "default_min_spur_length")]
    pub min_spur_length: usize,

    #[serde(default = "default_max_prune_iterations")]
    pub max_prune_iterations: usize,

    #[serde(default = "default_min_element_length")]
    pub min_element_length: usize,

    // Section bounds (microns)
    #[serde(default = "default_minsize")]
    pub minsize: f64,

    #[serde(default = "default_maxsize")]
    pub maxsize: f64,

    #[serde(default = "default_section_crop_padding")]
    pub section_crop_padding: u32,

    /// Sections within this many pixels of the image edge are discarded; 0 keeps them
    #[serde(default = "default_section_border_buffer")]
    pub section_border_buffer: u32,

    // Batch
    #[serde(default)]
    pub jobs: Option<usize>,

    #[serde(default)]
    pub save_image: bool,

    #[serde(default)]
    pub within_element: bool,
}

/// Which pipeline the runner dispatches to
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    #[default]
    Curvature,
    Section,
}

impl AnalysisMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnalysisMode::Curvature => "curvature",
            AnalysisMode::Section => "section",
        }
    }
}

/// Unit of the window of measurement
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum WindowUnit {
    #[default]
    Px,
    Mm,
}

impl WindowUnit {
    pub fn as_str(&self) -> &'static str {
        match self {
            WindowUnit::Px => "px",
            WindowUnit::Mm => "mm",
        }
    }
}

/// Binarization method
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ThresholdMethod {
    #[default]
    Otsu,
    Fixed,
}

/// Accept `window_size = 1.5` as well as `window_size = [0.5, 1.5]`
fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(f64),
        Many(Vec<f64>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(size) => vec![size],
        OneOrMany::Many(sizes) => sizes,
    })
}

fn default_input_path() -> String {
    "./input".to_string()
}

fn default_output_base_dir() -> String {
    "./output".to_string()
}

fn default_image_extensions() -> Vec<String> {
    vec!["tif".to_string(), "tiff".to_string(), "png".to_string()]
}

fn default_resolution_mm() -> f64 {
    132.0
}

fn default_resolution_mu() -> f64 {
    4.25
}

fn default_min_window_fraction() -> f64 {
    0.5
}

fn default_min_window_px() -> usize {
    10
}

fn default_ridge_sigmas() -> Vec<f32> {
    vec![1.0, 2.0, 3.0]
}

fn default_min_spur_length() -> usize {
    10
}

fn default_max_prune_iterations() -> usize {
    50
}

fn default_min_element_length() -> usize {
    10
}

fn default_minsize() -> f64 {
    20.0
}

fn default_maxsize() -> f64 {
    150.0
}

fn default_section_crop_padding() -> u32 {
    100
}

fn default_section_border_buffer() -> u32 {
    1
}

impl Default for Config {
    fn default() -> Self {
        Self {
            input_path: default_input_path(),
            output_base_dir: default_output_base_dir(),
            analysis: AnalysisMode::Curvature,
            image_extensions: default_image_extensions(),
            resolution_mm: default_resolution_mm(),
            resolution_mu: default_resolution_mu(),
            window_size: Vec::new(),
            window_unit: WindowUnit::Px,
            min_window_fraction: default_min_window_fraction(),
            min_window_px: default_min_window_px(),
            threshold_method: ThresholdMethod::Otsu,
            threshold_value: None,
            ridge_filter: false,
            ridge_sigmas: default_ridge_sigmas(),
            dilation_radius: 0,
            border_buffer: 0,
            min_particle_area: None,
            min_spur_length: default_min_spur_length(),
            max_prune_iterations: default_max_prune_iterations(),
            min_element_length: default_min_element_length(),
            minsize: default_minsize(),
            maxsize: default_maxsize(),
            section_crop_padding: default_section_crop_padding(),
            section_border_buffer: default_section_border_buffer(),
            jobs: None,
            save_image: false,
            within_element: false,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path).map_err(|e| FiberMorphError::ConfigLoad {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        let config: Config = toml::from_str(&content).map_err(|e| FiberMorphError::ConfigLoad {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;

        Ok(config)
    }

    /// Validate parameter combinations. Runs before any image is touched.
    pub fn validate(&self) -> Result<()> {
        if !(self.resolution_mm.is_finite() && self.resolution_mm > 0.0) {
            return Err(FiberMorphError::Config(
                "resolution_mm must be a positive number".to_string(),
            ));
        }

        if !(self.resolution_mu.is_finite() && self.resolution_mu > 0.0) {
            return Err(FiberMorphError::Config(
                "resolution_mu must be a positive number".to_string(),
            ));
        }

        for &size in &self.window_size {
            if !(size.is_finite() && size > 0.0) {
                return Err(FiberMorphError::Config(format!(
                    "window_size must be > 0 (got {})",
                    size
                )));
            }
        }

        if !(0.0..=1.0).contains(&self.min_window_fraction) {
            return Err(FiberMorphError::Config(
                "min_window_fraction must be between 0.0 and 1.0".to_string(),
            ));
        }

        if self.threshold_method == ThresholdMethod::Fixed && self.threshold_value.is_none() {
            return Err(FiberMorphError::Config(
                "threshold_method = \"fixed\" requires threshold_value".to_string(),
            ));
        }

        if self.ridge_sigmas.is_empty() || self.ridge_sigmas.iter().any(|s| !(*s > 0.0)) {
            return Err(FiberMorphError::Config(
                "ridge_sigmas must be a non-empty list of positive scales".to_string(),
            ));
        }

        if self.max_prune_iterations == 0 {
            return Err(FiberMorphError::Config(
                "max_prune_iterations must be > 0".to_string(),
            ));
        }

        if self.minsize < 0.0 || self.maxsize < 0.0 {
            return Err(FiberMorphError::Config(format!(
                "section size bounds must be non-negative (minsize={}, maxsize={})",
                self.minsize, self.maxsize
            )));
        }

        if self.maxsize <= self.minsize {
            return Err(FiberMorphError::Config(format!(
                "maxsize ({}) must be greater than minsize ({})",
                self.maxsize, self.minsize
            )));
        }

        if self.jobs == Some(0) {
            return Err(FiberMorphError::Config("jobs must be > 0".to_string()));
        }

        if self.image_extensions.is_empty() {
            return Err(FiberMorphError::Config(
                "image_extensions must list at least one extension".to_string(),
            ));
        }

        Ok(())
    }

    /// Minimum particle area (pixels) kept in the curvature mask
    pub fn effective_min_particle_area(&self) -> usize {
        self.min_particle_area
            .unwrap_or_else(|| (self.resolution_mm / 2.0).floor() as usize)
    }

    /// Section diameter bounds in pixels at `resolution_mu` pixels per micron
    pub fn section_bounds_px(&self, resolution_mu: f64) -> (f64, f64) {
        (self.minsize * resolution_mu, self.maxsize * resolution_mu)
    }

    /// Worker count, defaulting to the available parallelism
    pub fn effective_jobs(&self) -> usize {
        self.jobs.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }

    /// Parameters recorded alongside every result row
    pub fn parameters_json(&self) -> Result<String> {
        let value = match self.analysis {
            AnalysisMode::Curvature => serde_json::json!({
                "resolution_mm": self.resolution_mm,
                "window_size": self.window_size,
                "window_unit": self.window_unit.as_str(),
                "min_window_fraction": self.min_window_fraction,
                "ridge_filter": self.ridge_filter,
                "min_spur_length": self.min_spur_length,
                "min_particle_area": self.effective_min_particle_area(),
            }),
            AnalysisMode::Section => serde_json::json!({
                "resolution_mu": self.resolution_mu,
                "minsize": self.minsize,
                "maxsize": self.maxsize,
                "section_border_buffer": self.section_border_buffer,
            }),
        };

        serde_json::to_string(&value).map_err(|e| FiberMorphError::Serialization(e.to_string()))
    }

    /// Save configuration to a TOML file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = toml::to_string_pretty(self).map_err(|e| {
            FiberMorphError::Serialization(format!("Failed to serialize config: {}", e))
        })?;

        fs::write(path, content)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn rejects_negative_section_bounds() {
        let config = Config {
            minsize: -5.0,
            ..Config::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn rejects_inverted_section_bounds() {
        let config = Config {
            minsize: 100.0,
            maxsize: 50.0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_jobs_and_bad_window() {
        let config = Config {
            jobs: Some(0),
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            window_size: vec![1.0, 0.0],
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn fixed_threshold_needs_value() {
        let config = Config {
            threshold_method: ThresholdMethod::Fixed,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            threshold_method: ThresholdMethod::Fixed,
            threshold_value: Some(128),
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_partial_toml_with_defaults() {
        let config: Config = toml::from_str(
            r#"
            analysis = "section"
            window_size = 1.5
            window_unit = "mm"
            jobs = 2
            "#,
        )
        .unwrap();

        assert_eq!(config.analysis, AnalysisMode::Section);
        assert_eq!(config.window_unit, WindowUnit::Mm);
        assert_eq!(config.window_size, vec![1.5]);
        assert_eq!(config.jobs, Some(2));
        assert_eq!(config.min_spur_length, 10);
        assert_eq!(config.effective_min_particle_area(), 66);
    }

    #[test]
    fn parses_several_window_sizes() {
        let config: Config = toml::from_str("window_size = [0.5, 1.0, 2.5]").unwrap();
        assert_eq!(config.window_size, vec![0.5, 1.0, 2.5]);

        let saved = toml::to_string_pretty(&config).unwrap();
        let reloaded: Config = toml::from_str(&saved).unwrap();
        assert_eq!(reloaded.window_size, config.window_size);
    }

    #[test]
    fn section_bounds_use_micron_resolution() {
        let config = Config::default();
        let (min_px, max_px) = config.section_bounds_px(config.resolution_mu);
        assert!((min_px - 85.0).abs() < 1e-9);
        assert!((max_px - 637.5).abs() < 1e-9);
    }
}
