use super::shared::{AcquireRequest, Completion, Shared, StreamPhase};
use crate::capture::Camera;
use crate::error::CaptureError;
use crate::frame::{Frame, FrameKind};
use std::sync::Arc;
use std::time::Instant;

/// Stops the stream when the producer exits, including by panic
struct StopGuard(Arc<Shared>);

impl Drop for StopGuard {
    fn drop(&mut self) {
        self.0.stop();
    }
}

enum Job {
    Stop,
    Acquire(AcquireRequest),
    Preview { exposure: f64 },
}

/// Producer side of the stream. Owns the camera and runs on its own thread.
pub(crate) struct VideoStreamer<C: Camera> {
    camera: C,
    shared: Arc<Shared>,
    binsize: u32,
    sequence: u64,
    cycle: u64,
}

impl<C: Camera> VideoStreamer<C> {
    pub fn new(camera: C, shared: Arc<Shared>, binsize: u32) -> Self {
        Self {
            camera,
            shared,
            binsize,
            sequence: 0,
            cycle: 0,
        }
    }

    pub fn run(mut self) {
        tracing::info!("Video stream started for camera {}", self.camera.info().name);
        let _guard = StopGuard(Arc::clone(&self.shared));

        let mut next_tick = Instant::now();
        loop {
            match self.next_job(next_tick) {
                Job::Stop => break,
                Job::Acquire(request) => self.serve(request),
                Job::Preview { exposure } => {
                    let cycle_start = Instant::now();
                    self.preview(exposure);
                    let frametime = self.shared.state.lock().frametime;
                    next_tick = cycle_start + frametime;
                }
            }
            self.cycle += 1;
        }

        tracing::info!(
            "Video stream stopped after {} cycles ({} frames)",
            self.cycle,
            self.sequence
        );
    }

    /// Wait for the next thing to do. Requests preempt the preview cadence.
    fn next_job(&self, next_tick: Instant) -> Job {
        let mut state = self.shared.state.lock();
        loop {
            if state.phase == StreamPhase::Stopped {
                return Job::Stop;
            }
            if let Some(request) = state.pending.take() {
                state.phase = StreamPhase::Serving;
                return Job::Acquire(request);
            }
            // While a served frame waits to be collected the preview keeps going
            if Instant::now() >= next_tick {
                return Job::Preview {
                    exposure: state.frametime.as_secs_f64(),
                };
            }
            self.shared.request_cv.wait_until(&mut state, next_tick);
        }
    }

    fn capture(
        &mut self,
        exposure: f64,
        binsize: u32,
        kind: FrameKind,
    ) -> Result<Arc<Frame>, CaptureError> {
        let (data, metadata) = self.camera.get_image(exposure, binsize)?;
        let expected = self.camera.info().binned_dimensions(binsize);
        if data.dim() != expected {
            return Err(CaptureError::ShapeMismatch {
                expected,
                got: data.dim(),
            });
        }
        let frame = Frame::new(data, metadata, kind, self.sequence);
        self.sequence += 1;
        Ok(Arc::new(frame))
    }

    fn preview(&mut self, exposure: f64) {
        let result = self.capture(exposure, self.binsize, FrameKind::Preview);
        let mut state = self.shared.state.lock();
        match result {
            Ok(frame) => {
                state.preview = Some(frame);
                state.preview_count += 1;
                state.stats.previews += 1;
                drop(state);
                self.shared.frame_cv.notify_all();
            }
            Err(e) => {
                state.stats.capture_failures += 1;
                drop(state);
                tracing::warn!("Preview capture failed on cycle {}: {}", self.cycle, e);
            }
        }
    }

    fn serve(&mut self, request: AcquireRequest) {
        let _span = tracing::debug_span!("acquire", id = request.id).entered();
        let result = self.capture(request.exposure, request.binsize, FrameKind::Acquired);

        let mut state = self.shared.state.lock();
        if state.phase == StreamPhase::Stopped {
            tracing::debug!("Discarding acquisition {}: stream stopped", request.id);
            return;
        }
        if state.abandoned == Some(request.id) {
            state.abandoned = None;
            state.phase = StreamPhase::Idle;
            tracing::debug!("Discarding acquisition {}: caller gave up", request.id);
            return;
        }

        match &result {
            Ok(frame) => {
                state.push_acquired(Arc::clone(frame));
                state.stats.acquisitions += 1;
                tracing::debug!(
                    "Served acquisition {} ({} s) in {:?}",
                    request.id,
                    request.exposure,
                    request.issued_at.elapsed()
                );
            }
            Err(e) => {
                state.stats.capture_failures += 1;
                tracing::warn!(
                    "Acquisition capture failed on cycle {}: {}",
                    self.cycle,
                    e
                );
            }
        }
        state.completed = Some(Completion {
            id: request.id,
            result,
        });
        drop(state);
        self.shared.result_cv.notify_all();
        self.shared.frame_cv.notify_all();
    }
}
