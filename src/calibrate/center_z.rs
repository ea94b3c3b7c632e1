use super::{cross_correlate, linear_fit, reject_outliers};
use crate::config::CenterZConfig;
use crate::error::CalibrationError;
use crate::stage::{Stage, StageTarget};
use crate::stream::VideoStream;
use std::time::Duration;

/// Image shift measured between the untilted and tilted image at one z
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShiftPoint {
    pub z: f64,
    /// Signed shift magnitude in pixels; the sign follows the row shift
    pub shift: f64,
}

/// Result of the eucentric height search
#[derive(Debug, Clone, PartialEq)]
pub struct EucentricHeight {
    pub z: f64,
    /// Stage z and alpha before the search
    pub start_z: f64,
    pub alpha: f64,
    pub slope: f64,
    pub intercept: f64,
    pub points: Vec<ShiftPoint>,
    /// Points left out of the fit as outliers
    pub rejected: usize,
    backlash: f64,
}

impl EucentricHeight {
    /// Move to the eucentric height, approaching it from the side the stage
    /// is currently on
    pub fn apply<S: Stage + ?Sized>(&self, stage: &mut S) -> Result<(), CalibrationError> {
        let current = stage.position()?.z;
        let approach = if self.z > current {
            self.z - self.backlash
        } else {
            self.z + self.backlash
        };
        stage.set_position(StageTarget::az(self.alpha, approach), true)?;
        stage.set_position(StageTarget::az(self.alpha, self.z), true)?;
        tracing::info!("Eucentric height set to z = {:.0} nm", self.z);
        Ok(())
    }

    /// Return to the position the search started from
    pub fn restore<S: Stage + ?Sized>(&self, stage: &mut S) -> Result<(), CalibrationError> {
        stage.set_position(StageTarget::az(self.alpha, self.start_z), true)?;
        Ok(())
    }
}

/// Find the eucentric height by tilting at a series of z heights.
///
/// At each height an image pair is taken at `start_alpha` and
/// `start_alpha + tilt`; the image shift between them is proportional to the
/// distance from the eucentric height, so the zero crossing of a line fitted
/// to shift(z) is the answer.
///
/// Koster, A. J., et al. "Automated microscopy for electron tomography."
/// Ultramicroscopy 46.1-4 (1992): 207-227.
pub fn center_z_height<S: Stage + ?Sized>(
    stream: &VideoStream,
    stage: &mut S,
    config: &CenterZConfig,
) -> Result<EucentricHeight, CalibrationError> {
    tracing::info!("Finding eucentric height...");

    let z0 = stage.position()?.z;
    stage.set_position(StageTarget::a(config.start_alpha), true)?;
    let a0 = stage.position()?.a;

    // Approach z0 from below
    stage.set_position(StageTarget::z(z0 - config.backlash), true)?;
    stage.set_position(StageTarget::z(z0 - config.backlash / 2.0), true)?;
    stage.set_position(StageTarget::z(z0), true)?;

    let settle = Duration::from_secs_f64(config.settle_time.max(0.0));
    let mut points = Vec::with_capacity(config.steps);
    for step in 0..config.steps {
        let z1 = stage.position()?.z;

        stage.set_position(StageTarget::a(a0), true)?;
        let untilted = stream.get_image(Some(config.exposure), None)?;
        stage.set_position(StageTarget::a(a0 + config.tilt), true)?;
        let tilted = stream.get_image(Some(config.exposure), None)?;

        let (dy, dx) = cross_correlate(&untilted.data, &tilted.data)?;
        let magnitude = dy.hypot(dx);
        let shift = if dy < 0.0 { -magnitude } else { magnitude };
        tracing::info!("Step {}: z = {:.0}, d = {:.2}", step, z1, magnitude);
        points.push(ShiftPoint { z: z1, shift });

        stage.set_position(StageTarget::z(z1 + config.z_step), true)?;
        if !settle.is_zero() {
            std::thread::sleep(settle);
        }
    }

    let shifts: Vec<f64> = points.iter().map(|p| p.shift).collect();
    let kept = reject_outliers(&shifts, 2.0);
    if kept.len() < 2 {
        return Err(CalibrationError::NotEnoughPoints(kept.len()));
    }
    let z: Vec<f64> = kept.iter().map(|&i| points[i].z).collect();
    let d: Vec<f64> = kept.iter().map(|&i| points[i].shift).collect();
    let (slope, intercept) = linear_fit(&z, &d).ok_or(CalibrationError::DegenerateFit)?;
    if slope == 0.0 || !slope.is_finite() {
        return Err(CalibrationError::DegenerateFit);
    }
    let z_center = -intercept / slope;

    tracing::info!(
        "Found eucentric height: {:.0} nm ({} of {} points used)",
        z_center,
        kept.len(),
        points.len()
    );

    Ok(EucentricHeight {
        z: z_center,
        start_z: z0,
        alpha: a0,
        slope,
        intercept,
        rejected: points.len() - kept.len(),
        points,
        backlash: config.backlash,
    })
}
