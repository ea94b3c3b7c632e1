use crate::error::ExperimentError;
use crate::sink::TiffWriter;
use crate::stage::{Stage, StageTarget};
use crate::stream::VideoStream;
use std::path::{Path, PathBuf};

/// Most frames a single tilt series may take
pub const MAX_TILT_STEPS: usize = 10_000;

/// Outcome of one tilt series
#[derive(Debug, Clone, PartialEq)]
pub struct CollectionSummary {
    pub start_angle: f64,
    pub end_angle: f64,
    pub files: Vec<PathBuf>,
}

/// Automated diffraction tomography: step the stage through a tilt range
/// and acquire one frame per step. Frame numbering continues across
/// collections in the same experiment.
pub struct Experiment {
    path: PathBuf,
    camera: String,
    offset: usize,
}

impl Experiment {
    pub fn new<P: AsRef<Path>>(path: P, stream: &VideoStream) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            camera: stream.camera_info().name.clone(),
            offset: 0,
        }
    }

    /// Frames collected so far
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Tilt angles `start, start + step, ...` short of `start + range`
    pub fn tilt_positions(
        start: f64,
        tilt_range: f64,
        stepsize: f64,
    ) -> Result<Vec<f64>, ExperimentError> {
        if stepsize == 0.0 || !stepsize.is_finite() || !tilt_range.is_finite() {
            return Err(ExperimentError::BadStepSize(stepsize));
        }
        let count = (tilt_range / stepsize).ceil();
        if count <= 0.0 {
            return Ok(Vec::new());
        }
        if count > MAX_TILT_STEPS as f64 {
            return Err(ExperimentError::TooManySteps {
                tilt_range,
                stepsize,
                max: MAX_TILT_STEPS,
            });
        }
        Ok((0..count as usize)
            .map(|i| start + i as f64 * stepsize)
            .collect())
    }

    pub fn start_collection<S: Stage + ?Sized>(
        &mut self,
        stream: &VideoStream,
        stage: &mut S,
        exposure: f64,
        tilt_range: f64,
        stepsize: f64,
    ) -> Result<CollectionSummary, ExperimentError> {
        std::fs::create_dir_all(&self.path)?;

        let start_angle = stage.position()?.a;
        let tilt_positions = Self::tilt_positions(start_angle, tilt_range, stepsize)?;

        tracing::info!(
            "Data recording started at: {}",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
        );
        tracing::info!("Data saving path: {}", self.path.display());
        tracing::info!("Data collection camera: {}", self.camera);
        tracing::info!("Data collection exposure time: {} s", exposure);
        tracing::info!("Data collection tilt range: {} degrees", tilt_range);
        tracing::info!("Data collection step size: {} degrees", stepsize);

        let mut files = Vec::with_capacity(tilt_positions.len());
        for (i, angle) in tilt_positions.iter().enumerate() {
            stage.set_position(StageTarget::a(*angle), true)?;

            let frame = stream.get_image(Some(exposure), None)?;
            let position = stage.position()?;
            let index = i + self.offset;
            let frame = frame
                .annotated(position.header_entries())
                .annotated([("image_index", index as i64)]);

            let path = self.path.join(format!("{index:05}.tiff"));
            TiffWriter::write_frame(&path, &frame)?;
            tracing::debug!("Tilt {:.2} deg -> {}", angle, path.display());
            files.push(path);
        }
        self.offset += tilt_positions.len();

        let end_angle = stage.position()?.a;
        tracing::info!(
            "Data collected from {} degree to {} degree.",
            start_angle,
            end_angle
        );

        Ok(CollectionSummary {
            start_angle,
            end_angle,
            files,
        })
    }

    pub fn finalize(&self) {
        tracing::info!(
            "Data collection finalized: {} frames in {}",
            self.offset,
            self.path.display()
        );
    }
}
