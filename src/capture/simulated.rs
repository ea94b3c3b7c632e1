use super::{Camera, CameraInfo};
use crate::config::{CameraConfig, SimulationConfig};
use crate::error::CaptureError;
use crate::frame::Metadata;
use crate::stage::{StageHandle, StagePosition};
use ndarray::Array2;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::time::Duration;

/// Background flux in counts per second per unbinned pixel
const BACKGROUND_FLUX: f64 = 10_000.0;
/// Peak flux of a specimen feature in counts per second
const FEATURE_FLUX: f64 = 100_000.0;

#[derive(Debug, Clone, Copy)]
struct Feature {
    /// Specimen coordinates in nm
    x: f64,
    y: f64,
    /// Width in nm
    sigma: f64,
    weight: f64,
}

/// Camera that renders a synthetic specimen of gaussian particles.
///
/// Linked to a simulated stage, the image follows stage x/y, and a specimen
/// that is not at the eucentric height shifts by `(z - eucentric_z) * sin(a)`
/// when tilted.
pub struct SimulatedCamera {
    info: CameraInfo,
    simulation: SimulationConfig,
    features: Vec<Feature>,
    stage: Option<StageHandle>,
    rng: StdRng,
}

impl SimulatedCamera {
    pub fn new(camera: CameraConfig, simulation: SimulationConfig) -> Self {
        tracing::info!(
            "Initializing simulated camera {}x{} with {} features",
            camera.dimensions.0,
            camera.dimensions.1,
            simulation.features
        );

        let mut rng = StdRng::seed_from_u64(simulation.seed);
        let half_height = camera.dimensions.0 as f64 * simulation.pixel_size * 0.4;
        let half_width = camera.dimensions.1 as f64 * simulation.pixel_size * 0.4;
        let features = (0..simulation.features)
            .map(|_| Feature {
                x: rng.gen_range(-half_width..=half_width),
                y: rng.gen_range(-half_height..=half_height),
                sigma: simulation.pixel_size * rng.gen_range(4.0..10.0),
                weight: rng.gen_range(0.5..1.0),
            })
            .collect();

        Self {
            info: CameraInfo::from_config(&camera),
            simulation,
            features,
            stage: None,
            rng,
        }
    }

    pub fn with_stage(mut self, stage: StageHandle) -> Self {
        self.stage = Some(stage);
        self
    }

    fn render(&mut self, position: &StagePosition, exposure: f64, binsize: u32) -> Array2<u16> {
        let _span = tracing::debug_span!("simulate_render").entered();

        let (rows, cols) = self.info.binned_dimensions(binsize);
        let pixel = self.simulation.pixel_size * binsize as f64;
        let bin_area = (binsize * binsize) as f64;
        let tilt_shift = (position.z - self.simulation.eucentric_z) * position.a.to_radians().sin();

        let mut signal = Array2::<f64>::from_elem((rows, cols), BACKGROUND_FLUX * bin_area);
        for feature in &self.features {
            let col = (feature.x - position.x) / pixel + cols as f64 / 2.0;
            let row = (feature.y - position.y + tilt_shift) / pixel + rows as f64 / 2.0;
            let sigma = feature.sigma / pixel;
            let reach = 4.0 * sigma;

            let r0 = (row - reach).floor().max(0.0) as usize;
            let r1 = ((row + reach).ceil().max(0.0) as usize).min(rows);
            let c0 = (col - reach).floor().max(0.0) as usize;
            let c1 = ((col + reach).ceil().max(0.0) as usize).min(cols);
            let peak = FEATURE_FLUX * feature.weight * bin_area;

            for r in r0..r1 {
                let dr = r as f64 - row;
                for c in c0..c1 {
                    let dc = c as f64 - col;
                    signal[[r, c]] += peak * (-(dr * dr + dc * dc) / (2.0 * sigma * sigma)).exp();
                }
            }
        }

        let noise = self.simulation.noise;
        signal.mapv(|flux| {
            let jitter = if noise > 0.0 {
                self.rng.gen_range(-noise..=noise)
            } else {
                0.0
            };
            (flux * exposure + jitter).clamp(0.0, u16::MAX as f64) as u16
        })
    }
}

impl Camera for SimulatedCamera {
    fn info(&self) -> CameraInfo {
        self.info.clone()
    }

    fn get_image(
        &mut self,
        exposure: f64,
        binsize: u32,
    ) -> Result<(Array2<u16>, Metadata), CaptureError> {
        if !self.info.binsizes.contains(&binsize) {
            return Err(CaptureError::Device {
                camera: self.info.name.clone(),
                reason: format!("unsupported binsize {binsize}"),
            });
        }

        let position = self
            .stage
            .as_ref()
            .map(StageHandle::position)
            .unwrap_or_default();

        std::thread::sleep(Duration::from_secs_f64(exposure.max(0.0)));
        let data = self.render(&position, exposure, binsize);

        let mut metadata = Metadata::new();
        metadata.insert("camera".into(), self.info.name.as_str().into());
        metadata.insert("exposure".into(), exposure.into());
        metadata.insert("binsize".into(), binsize.into());
        Ok((data, metadata))
    }
}
