use super::FrameSink;
use crate::error::SinkError;
use crate::frame::{Frame, FrameKind};
use image::{GrayImage, Luma};
use std::path::Path;
use std::time::{Duration, Instant};

/// Render a frame to 8-bit grayscale, stretching its min..max to 0..255,
/// then apply a contrast factor. Contrast blends each pixel with the mean
/// gray level: 0 gives a flat image, 1 leaves it unchanged.
pub fn render_preview(frame: &Frame, contrast: f32) -> GrayImage {
    let _span = tracing::debug_span!("render_preview").entered();

    let (rows, cols) = frame.dimensions();
    let (min, max) = frame
        .data
        .iter()
        .fold((u16::MAX, u16::MIN), |(lo, hi), &v| (lo.min(v), hi.max(v)));
    let span = max.saturating_sub(min) as f32;

    let mut image = GrayImage::from_fn(cols as u32, rows as u32, |x, y| {
        let value = frame.data[[y as usize, x as usize]];
        let scaled = if span > 0.0 {
            (value - min) as f32 * 255.0 / span
        } else {
            0.0
        };
        Luma([scaled.round() as u8])
    });

    if contrast != 1.0 && !image.is_empty() {
        let sum: u64 = image.pixels().map(|p| u64::from(p[0])).sum();
        let mean = (sum as f32 / image.len() as f32).round();
        for pixel in image.pixels_mut() {
            let v = mean + contrast * (pixel[0] as f32 - mean);
            pixel[0] = v.clamp(0.0, 255.0).round() as u8;
        }
    }

    image
}

/// Display statistics over the last update window
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct FrameRate {
    pub fps: f64,
    /// Measured time per displayed frame
    pub frametime_ms: f64,
    /// Measured frametime minus the nominal frametime
    pub overhead_ms: f64,
}

/// Averages frame intervals over an update window
#[derive(Debug, Clone)]
pub struct FrameTimer {
    last: Instant,
    nframes: u32,
    update_frequency: Duration,
    current: Option<FrameRate>,
}

impl FrameTimer {
    pub fn new(update_frequency: Duration) -> Self {
        Self {
            last: Instant::now(),
            nframes: 1,
            update_frequency,
            current: None,
        }
    }

    /// Count a frame at `now`. Returns the new statistics when the window
    /// closed on this frame.
    pub fn tick(&mut self, now: Instant, nominal: Duration) -> Option<FrameRate> {
        let delta = now.saturating_duration_since(self.last);
        if delta > self.update_frequency {
            let frametime = delta.as_secs_f64() / f64::from(self.nframes);
            let rate = FrameRate {
                fps: 1.0 / frametime,
                frametime_ms: frametime * 1000.0,
                overhead_ms: (frametime - nominal.as_secs_f64()) * 1000.0,
            };
            self.current = Some(rate);
            self.last = now;
            self.nframes = 1;
            Some(rate)
        } else {
            self.nframes += 1;
            None
        }
    }

    pub fn current(&self) -> Option<FrameRate> {
        self.current
    }
}

/// Live view consumer: keeps the latest rendering and tracks the frame rate
pub struct DisplaySink {
    contrast: f32,
    latest: Option<GrayImage>,
    latest_kind: Option<FrameKind>,
    timer: FrameTimer,
    frames: u64,
}

impl Default for DisplaySink {
    fn default() -> Self {
        Self::new(1.0)
    }
}

impl DisplaySink {
    /// Negative contrast factors are clamped to 0
    pub fn new(contrast: f32) -> Self {
        Self {
            contrast: contrast.max(0.0),
            latest: None,
            latest_kind: None,
            timer: FrameTimer::new(Duration::from_millis(500)),
            frames: 0,
        }
    }

    pub fn set_contrast(&mut self, contrast: f32) {
        self.contrast = contrast.max(0.0);
    }

    pub fn latest(&self) -> Option<&GrayImage> {
        self.latest.as_ref()
    }

    pub fn latest_kind(&self) -> Option<FrameKind> {
        self.latest_kind
    }

    pub fn frame_rate(&self) -> Option<FrameRate> {
        self.timer.current()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Write the latest rendering as PNG
    pub fn save_latest(&self, path: &Path) -> Result<bool, SinkError> {
        match &self.latest {
            Some(image) => {
                image.save(path).map_err(|source| SinkError::Encode {
                    path: path.to_path_buf(),
                    source,
                })?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    fn show(&mut self, frame: &Frame) {
        self.latest = Some(render_preview(frame, self.contrast));
        self.latest_kind = Some(frame.kind);
        self.frames += 1;
    }
}

impl FrameSink for DisplaySink {
    fn on_preview(&mut self, frame: &Frame) -> Result<(), SinkError> {
        self.show(frame);

        let nominal = Duration::from_secs_f64(frame.exposure().unwrap_or(0.0).max(0.0));
        self.timer.tick(Instant::now(), nominal);

        // Log stats every 30 frames
        if self.frames % 30 == 0 {
            if let Some(rate) = self.timer.current() {
                tracing::info!(
                    "Frame {}: fps={:.2}, frametime={:.2}ms, overhead={:.2}ms",
                    self.frames,
                    rate.fps,
                    rate.frametime_ms,
                    rate.overhead_ms
                );
            }
        }
        Ok(())
    }

    fn on_acquired(&mut self, frame: &Frame) -> Result<(), SinkError> {
        self.show(frame);
        Ok(())
    }
}
