use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ConfigError;

/// Application configuration. Read from YAML with serde_yaml and handed to
/// the constructors that need it; every section falls back to its defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct Config {
    pub camera: CameraConfig,
    pub stream: StreamConfig,
    pub stage: StageConfig,
    pub simulation: SimulationConfig,
    pub center_z: CenterZConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CameraConfig {
    /// Driver kind. Only `simulate` ships with this crate.
    pub name: String,
    /// Frame size (rows, columns) at binsize 1
    pub dimensions: (usize, usize),
    pub default_exposure: f64,
    pub default_binsize: u32,
    pub binsizes: Vec<u32>,
    pub min_exposure: f64,
    pub max_exposure: f64,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            name: String::from("simulate"),
            dimensions: (512, 512),
            default_exposure: 0.1,
            default_binsize: 1,
            binsizes: vec![1, 2, 4],
            min_exposure: 0.001,
            max_exposure: 10.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StreamConfig {
    /// Preview cadence in seconds, also used as the preview exposure
    pub frametime: f64,
    /// Seconds to wait for a one-shot acquisition; `None` waits forever
    pub acquire_timeout: Option<f64>,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            frametime: 0.1,
            acquire_timeout: Some(30.0),
        }
    }
}

impl StreamConfig {
    pub fn frametime(&self) -> Duration {
        Duration::from_secs_f64(self.frametime)
    }

    pub fn acquire_timeout(&self) -> Option<Duration> {
        self.acquire_timeout.map(Duration::from_secs_f64)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct StageConfig {
    /// Alpha tilt limits in degrees
    pub alpha_limits: (f64, f64),
    /// Z travel limits in nm
    pub z_limits: (f64, f64),
    /// Simulated alpha rotation speed in deg/s; `None` moves instantly
    pub alpha_speed: Option<f64>,
}

impl Default for StageConfig {
    fn default() -> Self {
        Self {
            alpha_limits: (-70.0, 70.0),
            z_limits: (-375_000.0, 375_000.0),
            alpha_speed: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SimulationConfig {
    /// Z (nm) at which tilting leaves the simulated image in place
    pub eucentric_z: f64,
    /// Specimen sampling in nm per pixel at binsize 1
    pub pixel_size: f64,
    /// Noise amplitude in counts
    pub noise: f64,
    pub features: usize,
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            eucentric_z: 3_400.0,
            pixel_size: 10.0,
            noise: 20.0,
            features: 12,
            seed: 7,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct CenterZConfig {
    pub steps: usize,
    /// Z increment between steps in nm
    pub z_step: f64,
    /// Tilt between the image pair in degrees
    pub tilt: f64,
    pub start_alpha: f64,
    pub exposure: f64,
    /// Distance in nm used to approach a z target from one side
    pub backlash: f64,
    /// Seconds to wait after each z step
    pub settle_time: f64,
}

impl Default for CenterZConfig {
    fn default() -> Self {
        Self {
            steps: 10,
            z_step: 1_000.0,
            tilt: 10.0,
            start_alpha: -5.0,
            exposure: 0.01,
            backlash: 2_000.0,
            settle_time: 1.0,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OutputConfig {
    pub directory: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            directory: PathBuf::from("data"),
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a validated Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;
        let config = serde_yaml::from_str::<Self>(&yaml_str)?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration to a YAML file
    pub fn write_config_file(&self, config_path: &Path) -> Result<(), ConfigError> {
        let yaml_str = serde_yaml::to_string(self)?;
        std::fs::write(config_path, yaml_str)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let camera = &self.camera;
        if camera.dimensions.0 == 0 || camera.dimensions.1 == 0 {
            return Err(invalid("camera.dimensions", "must be non-zero"));
        }
        if !(camera.min_exposure > 0.0 && camera.min_exposure <= camera.max_exposure) {
            return Err(invalid(
                "camera.min_exposure",
                format!(
                    "expected 0 < min_exposure <= max_exposure, got [{}, {}]",
                    camera.min_exposure, camera.max_exposure
                ),
            ));
        }
        if camera.binsizes.is_empty() || camera.binsizes.contains(&0) {
            return Err(invalid("camera.binsizes", "must list non-zero binsizes"));
        }
        if !camera.binsizes.contains(&camera.default_binsize) {
            return Err(invalid(
                "camera.default_binsize",
                format!("{} is not in {:?}", camera.default_binsize, camera.binsizes),
            ));
        }
        if !in_range(camera.default_exposure, camera.min_exposure, camera.max_exposure) {
            return Err(invalid(
                "camera.default_exposure",
                format!("{} is outside the exposure range", camera.default_exposure),
            ));
        }
        if !in_range(self.stream.frametime, camera.min_exposure, camera.max_exposure) {
            return Err(invalid(
                "stream.frametime",
                format!("{} is outside the exposure range", self.stream.frametime),
            ));
        }
        if let Some(timeout) = self.stream.acquire_timeout {
            if !(timeout.is_finite() && timeout > 0.0) {
                return Err(invalid("stream.acquire_timeout", "must be positive"));
            }
        }
        let (a_min, a_max) = self.stage.alpha_limits;
        if !(a_min < a_max) {
            return Err(invalid("stage.alpha_limits", "lower limit must be below upper"));
        }
        let (z_min, z_max) = self.stage.z_limits;
        if !(z_min < z_max) {
            return Err(invalid("stage.z_limits", "lower limit must be below upper"));
        }
        if let Some(speed) = self.stage.alpha_speed {
            if !(speed.is_finite() && speed > 0.0) {
                return Err(invalid("stage.alpha_speed", "must be positive"));
            }
        }
        if !(self.simulation.pixel_size > 0.0) {
            return Err(invalid("simulation.pixel_size", "must be positive"));
        }
        if self.center_z.steps < 2 {
            return Err(invalid("center_z.steps", "at least two steps are needed"));
        }
        if !in_range(self.center_z.exposure, camera.min_exposure, camera.max_exposure) {
            return Err(invalid(
                "center_z.exposure",
                format!("{} is outside the exposure range", self.center_z.exposure),
            ));
        }
        if self.center_z.settle_time < 0.0 {
            return Err(invalid("center_z.settle_time", "must not be negative"));
        }
        Ok(())
    }
}

fn in_range(value: f64, min: f64, max: f64) -> bool {
    value.is_finite() && value >= min && value <= max
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field,
        reason: reason.into(),
    }
}
