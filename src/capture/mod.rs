mod simulated;

pub use simulated::SimulatedCamera;

use crate::config::{CameraConfig, SimulationConfig};
use crate::error::{AcquireError, CaptureError};
use crate::frame::Metadata;
use crate::stage::StageHandle;
use ndarray::Array2;

/// Static description of a camera, used to validate requests without
/// touching the device
#[derive(Debug, Clone, PartialEq)]
pub struct CameraInfo {
    pub name: String,
    /// (rows, columns) at binsize 1
    pub dimensions: (usize, usize),
    pub default_exposure: f64,
    pub default_binsize: u32,
    pub binsizes: Vec<u32>,
    pub min_exposure: f64,
    pub max_exposure: f64,
}

impl CameraInfo {
    pub fn from_config(config: &CameraConfig) -> Self {
        Self {
            name: config.name.clone(),
            dimensions: config.dimensions,
            default_exposure: config.default_exposure,
            default_binsize: config.default_binsize,
            binsizes: config.binsizes.clone(),
            min_exposure: config.min_exposure,
            max_exposure: config.max_exposure,
        }
    }

    /// Out-of-range exposures are rejected, never clamped
    pub fn validate_exposure(&self, exposure: f64) -> Result<(), AcquireError> {
        if exposure.is_finite() && exposure >= self.min_exposure && exposure <= self.max_exposure
        {
            Ok(())
        } else {
            Err(AcquireError::InvalidExposure {
                exposure,
                min: self.min_exposure,
                max: self.max_exposure,
            })
        }
    }

    pub fn validate_binsize(&self, binsize: u32) -> Result<(), AcquireError> {
        if self.binsizes.contains(&binsize) {
            Ok(())
        } else {
            Err(AcquireError::InvalidBinsize {
                binsize,
                allowed: self.binsizes.clone(),
            })
        }
    }

    /// Frame shape delivered at `binsize`
    pub fn binned_dimensions(&self, binsize: u32) -> (usize, usize) {
        let bin = binsize.max(1) as usize;
        (self.dimensions.0 / bin, self.dimensions.1 / bin)
    }
}

/// Trait for detector devices.
///
/// Implementations wrap the vendor driver. `get_image` is called from the
/// stream's producer thread, repeatedly, at the preview cadence, so it must
/// tolerate back-to-back calls and report failures as errors instead of
/// panicking.
pub trait Camera: Send {
    fn info(&self) -> CameraInfo;

    /// Expose for `exposure` seconds at `binsize` and return the frame with
    /// its header
    fn get_image(
        &mut self,
        exposure: f64,
        binsize: u32,
    ) -> Result<(Array2<u16>, Metadata), CaptureError>;
}

impl Camera for Box<dyn Camera> {
    fn info(&self) -> CameraInfo {
        (**self).info()
    }

    fn get_image(
        &mut self,
        exposure: f64,
        binsize: u32,
    ) -> Result<(Array2<u16>, Metadata), CaptureError> {
        (**self).get_image(exposure, binsize)
    }
}

/// Open the camera named in the configuration
pub fn open_camera(
    camera: &CameraConfig,
    simulation: &SimulationConfig,
    stage: Option<StageHandle>,
) -> Result<Box<dyn Camera>, CaptureError> {
    match camera.name.as_str() {
        "simulate" => {
            let mut cam = SimulatedCamera::new(camera.clone(), simulation.clone());
            if let Some(stage) = stage {
                cam = cam.with_stage(stage);
            }
            Ok(Box::new(cam))
        }
        other => Err(CaptureError::UnsupportedCamera(other.to_string())),
    }
}
