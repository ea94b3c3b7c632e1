use super::FrameSink;
use crate::error::SinkError;
use crate::frame::{Frame, FrameKind, Metadata};
use chrono::{DateTime, Local};
use image::{ImageBuffer, ImageFormat, Luma};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// YAML sidecar written next to every image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FrameHeader {
    pub sequence: u64,
    pub kind: FrameKind,
    pub timestamp: DateTime<Local>,
    pub shape: (usize, usize),
    pub metadata: Metadata,
}

impl FrameHeader {
    pub fn from_frame(frame: &Frame) -> Self {
        Self {
            sequence: frame.sequence,
            kind: frame.kind,
            timestamp: frame.timestamp,
            shape: frame.dimensions(),
            metadata: frame.metadata.clone(),
        }
    }
}

/// Writes frames as 16-bit grayscale TIFF with a `.yaml` header sidecar
pub struct TiffWriter {
    directory: PathBuf,
    written: Vec<PathBuf>,
}

impl TiffWriter {
    pub fn new<P: AsRef<Path>>(directory: P) -> Result<Self, SinkError> {
        let directory = directory.as_ref().to_path_buf();
        std::fs::create_dir_all(&directory)?;
        tracing::info!("Saving acquired frames to {}", directory.display());
        Ok(Self {
            directory,
            written: Vec::new(),
        })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// Files written through the sink interface, in order
    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    /// Write `frame` to `path` and its header next to it
    pub fn write_frame(path: &Path, frame: &Frame) -> Result<(), SinkError> {
        let (rows, cols) = frame.dimensions();
        let pixels: Vec<u16> = frame.data.iter().copied().collect();
        let image: ImageBuffer<Luma<u16>, Vec<u16>> =
            ImageBuffer::from_raw(cols as u32, rows as u32, pixels)
                .ok_or(SinkError::BadShape((rows, cols)))?;

        image
            .save_with_format(path, ImageFormat::Tiff)
            .map_err(|source| SinkError::Encode {
                path: path.to_path_buf(),
                source,
            })?;

        let header = serde_yaml::to_string(&FrameHeader::from_frame(frame))?;
        std::fs::write(path.with_extension("yaml"), header)?;

        tracing::debug!("Wrote frame {} to {}", frame.sequence, path.display());
        Ok(())
    }

    /// Timestamped file name, e.g. `20240131-142501.123456.tiff`
    pub fn timestamped_name(frame: &Frame) -> String {
        format!("{}.tiff", frame.timestamp.format("%Y%m%d-%H%M%S%.6f"))
    }
}

impl FrameSink for TiffWriter {
    fn on_preview(&mut self, _frame: &Frame) -> Result<(), SinkError> {
        Ok(())
    }

    fn on_acquired(&mut self, frame: &Frame) -> Result<(), SinkError> {
        let path = self.directory.join(Self::timestamped_name(frame));
        Self::write_frame(&path, frame)?;
        tracing::info!("Wrote file: {}", path.display());
        self.written.push(path);
        Ok(())
    }
}

/// Read back the pixel data of a TIFF written by [`TiffWriter`]
pub fn read_frame(path: &Path) -> Result<Array2<u16>, SinkError> {
    let image = image::open(path)
        .map_err(|source| SinkError::Encode {
            path: path.to_path_buf(),
            source,
        })?
        .into_luma16();
    let (width, height) = image.dimensions();
    Array2::from_shape_vec((height as usize, width as usize), image.into_raw())
        .map_err(|_| SinkError::BadShape((height as usize, width as usize)))
}
