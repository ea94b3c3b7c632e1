use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum CaptureError {
    #[error("Camera {camera} failed to read out a frame: {reason}")]
    Device { camera: String, reason: String },
    #[error("Camera kind `{0}` is not supported by this build")]
    UnsupportedCamera(String),
    #[error("Frame shape {got:?} does not match camera dimensions {expected:?}")]
    ShapeMismatch {
        expected: (usize, usize),
        got: (usize, usize),
    },
}

#[derive(Debug, Error)]
pub enum AcquireError {
    #[error("Exposure {exposure} s is outside the camera range [{min}, {max}] s")]
    InvalidExposure { exposure: f64, min: f64, max: f64 },
    #[error("Binsize {binsize} is not supported; allowed binsizes are {allowed:?}")]
    InvalidBinsize { binsize: u32, allowed: Vec<u32> },
    #[error("Frametime {0} s is invalid for this camera")]
    InvalidFrametime(f64),
    #[error("Acquisition timeout {0} s must be positive")]
    InvalidTimeout(f64),
    #[error("An acquisition is already in progress")]
    Busy,
    #[error("Acquisition aborted because the stream stopped")]
    Aborted,
    #[error("Acquisition timed out after {0:?}")]
    Timeout(std::time::Duration),
    #[error("Acquisition failed: {0}")]
    Capture(#[from] CaptureError),
}

#[derive(Debug, Clone, Error)]
pub enum StageError {
    #[error("Stage target {axis} = {value} is outside the limits [{min}, {max}]")]
    OutOfRange {
        axis: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },
    #[error("Stage target {axis} = {value} is not a finite number")]
    NotFinite { axis: &'static str, value: f64 },
    #[error("Stage device failure: {0}")]
    Device(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not open configuration because file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Configuration failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Could not parse configuration YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to encode image {path:?}: {source}")]
    Encode {
        path: PathBuf,
        source: image::ImageError,
    },
    #[error("Sink failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Failed to serialize frame header: {0}")]
    Header(#[from] serde_yaml::Error),
    #[error("Frame of shape {0:?} cannot be stored as an image")]
    BadShape((usize, usize)),
}

#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("Eucentric height calibration failed to acquire an image: {0}")]
    Acquire(#[from] AcquireError),
    #[error("Eucentric height calibration failed to move the stage: {0}")]
    Stage(#[from] StageError),
    #[error("Images of shape {0:?} and {1:?} cannot be cross-correlated")]
    ShapeMismatch((usize, usize), (usize, usize)),
    #[error("Not enough points to fit the image shift ({0})")]
    NotEnoughPoints(usize),
    #[error("Image shift does not change with z; cannot locate the eucentric height")]
    DegenerateFit,
}

#[derive(Debug, Error)]
pub enum ExperimentError {
    #[error("Tilt series step size must be non-zero and finite, got {0}")]
    BadStepSize(f64),
    #[error("Tilt range {tilt_range} with step {stepsize} needs more than {max} frames")]
    TooManySteps {
        tilt_range: f64,
        stepsize: f64,
        max: usize,
    },
    #[error("Tilt series failed to acquire an image: {0}")]
    Acquire(#[from] AcquireError),
    #[error("Tilt series failed to move the stage: {0}")]
    Stage(#[from] StageError),
    #[error("Tilt series failed to save an image: {0}")]
    Sink(#[from] SinkError),
    #[error("Tilt series failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}
