//! Live frame stream with one-shot acquisitions.
//!
//! A producer thread captures preview frames at the configured frametime and
//! publishes each into a single-slot buffer, overwriting whatever a slow sink
//! did not pick up. [`VideoStream::get_image`] asks the producer for one
//! authoritative frame and blocks until it is served:
//!
//! ```text
//! IDLE --get_image--> REQUEST_PENDING --producer picks up--> SERVING --caller collects--> IDLE
//!   \___________________________ stop ________________________________________/--> STOPPED
//! ```
//!
//! A second request while one is outstanding is rejected with
//! [`AcquireError::Busy`]. Stopping the stream releases blocked callers with
//! [`AcquireError::Aborted`].

mod shared;
mod streamer;

pub use shared::{StreamPhase, StreamStats};

use crate::capture::{Camera, CameraInfo};
use crate::config::StreamConfig;
use crate::error::AcquireError;
use crate::frame::Frame;
use crate::sink::FrameReceiver;
pub(crate) use shared::Shared;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use streamer::VideoStreamer;

/// Handle to a running stream. Dropping it stops and joins the producer.
pub struct VideoStream {
    shared: Arc<Shared>,
    info: CameraInfo,
    acquire_timeout: Option<Duration>,
    handle: Option<JoinHandle<()>>,
}

impl VideoStream {
    /// Spawn the producer thread for `camera`
    pub fn start<C>(camera: C, config: &StreamConfig) -> Result<Self, AcquireError>
    where
        C: Camera + 'static,
    {
        let info = camera.info();
        if !(config.frametime.is_finite() && config.frametime > 0.0) {
            return Err(AcquireError::InvalidFrametime(config.frametime));
        }
        info.validate_exposure(config.frametime)
            .map_err(|_| AcquireError::InvalidFrametime(config.frametime))?;
        if let Some(timeout) = config.acquire_timeout {
            if !(timeout.is_finite() && timeout > 0.0) {
                return Err(AcquireError::InvalidTimeout(timeout));
            }
        }

        tracing::info!(
            "Starting stream: camera={}, frametime={} s, timeout={:?}",
            info.name,
            config.frametime,
            config.acquire_timeout()
        );

        let shared = Arc::new(Shared::new(config.frametime()));
        let streamer = VideoStreamer::new(camera, Arc::clone(&shared), info.default_binsize);
        let handle = std::thread::Builder::new()
            .name(String::from("video-stream"))
            .spawn(move || streamer.run())
            .map_err(|e| {
                tracing::warn!("Failed to spawn stream thread: {}", e);
                AcquireError::Aborted
            })?;

        Ok(Self {
            shared,
            info,
            acquire_timeout: config.acquire_timeout(),
            handle: Some(handle),
        })
    }

    pub fn camera_info(&self) -> &CameraInfo {
        &self.info
    }

    /// Acquire one frame, blocking until the producer serves it.
    ///
    /// `None` falls back to the camera's default exposure and binsize.
    /// Invalid parameters are rejected before the producer is signalled.
    pub fn get_image(
        &self,
        exposure: Option<f64>,
        binsize: Option<u32>,
    ) -> Result<Arc<Frame>, AcquireError> {
        let exposure = exposure.unwrap_or(self.info.default_exposure);
        let binsize = binsize.unwrap_or(self.info.default_binsize);
        self.info.validate_exposure(exposure)?;
        self.info.validate_binsize(binsize)?;

        let request = self.shared.submit(exposure, binsize)?;
        tracing::debug!(
            "Requested acquisition {} (exposure={} s, binsize={})",
            request.id,
            exposure,
            binsize
        );
        self.shared.wait_for(request.id, self.acquire_timeout)
    }

    /// Current preview cadence
    pub fn frametime(&self) -> Duration {
        self.shared.state.lock().frametime
    }

    /// Change the preview cadence. The frametime doubles as the preview
    /// exposure, so it must be within the camera's exposure range.
    pub fn set_frametime(&self, frametime: f64) -> Result<(), AcquireError> {
        self.info
            .validate_exposure(frametime)
            .map_err(|_| AcquireError::InvalidFrametime(frametime))?;
        self.shared.state.lock().frametime = Duration::from_secs_f64(frametime);
        self.shared.request_cv.notify_all();
        Ok(())
    }

    pub fn phase(&self) -> StreamPhase {
        self.shared.state.lock().phase
    }

    pub fn stats(&self) -> StreamStats {
        self.shared.state.lock().stats
    }

    /// Latest preview frame, if one has been produced
    pub fn latest_preview(&self) -> Option<Arc<Frame>> {
        self.shared.state.lock().preview.clone()
    }

    /// Receiver for frame notifications, starting from the current frames
    pub fn subscribe(&self) -> FrameReceiver {
        FrameReceiver::new(Arc::clone(&self.shared))
    }

    /// Signal the producer to stop. A capture in progress completes first.
    pub fn stop(&self) {
        self.shared.stop();
    }

    pub fn is_stopped(&self) -> bool {
        self.phase() == StreamPhase::Stopped
    }

    /// Stop and wait for the producer thread to exit
    pub fn join(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.shared.stop();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("Video stream thread panicked");
            }
        }
    }
}

impl Drop for VideoStream {
    fn drop(&mut self) {
        self.shutdown();
    }
}
