mod display;
mod tiff;

pub use display::{render_preview, DisplaySink, FrameRate, FrameTimer};
pub use tiff::{read_frame, FrameHeader, TiffWriter};

use crate::error::SinkError;
use crate::frame::Frame;
use crate::stream::{Shared, StreamPhase};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

/// Trait for frame consumers (display, persistence)
pub trait FrameSink {
    /// Handle a best-effort preview frame
    fn on_preview(&mut self, frame: &Frame) -> Result<(), SinkError>;

    /// Handle the result of a one-shot acquisition.
    ///
    /// Defaults to treating it like a preview frame.
    fn on_acquired(&mut self, frame: &Frame) -> Result<(), SinkError> {
        self.on_preview(frame)
    }
}

/// A frame notification
#[derive(Debug, Clone)]
pub enum Delivery {
    Preview(Arc<Frame>),
    Acquired(Arc<Frame>),
}

impl Delivery {
    pub fn frame(&self) -> &Arc<Frame> {
        match self {
            Delivery::Preview(frame) | Delivery::Acquired(frame) => frame,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvTimeoutError {
    Timeout,
    Stopped,
}

/// Consumer end of a stream. Only the `Arc` is copied under the stream lock.
///
/// Every acquired frame is delivered, in order, as long as the receiver stays
/// within the stream's acquisition backlog. Preview frames overwritten before
/// they were received are counted in [`FrameReceiver::dropped`].
pub struct FrameReceiver {
    shared: Arc<Shared>,
    seen_preview: u64,
    seen_acquired: u64,
    dropped: u64,
    missed_acquisitions: u64,
}

impl FrameReceiver {
    pub(crate) fn new(shared: Arc<Shared>) -> Self {
        let (seen_preview, seen_acquired) = {
            let state = shared.state.lock();
            (state.preview_count, state.acquired_count)
        };
        Self {
            shared,
            seen_preview,
            seen_acquired,
            dropped: 0,
            missed_acquisitions: 0,
        }
    }

    /// Wait for the next frame. Returns `None` once the stream has stopped
    /// and nothing new is left.
    pub fn recv(&mut self) -> Option<Delivery> {
        self.next(None).ok()
    }

    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<Delivery, RecvTimeoutError> {
        self.next(Some(Instant::now() + timeout))
    }

    /// Preview frames that were overwritten before this receiver saw them
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Acquired frames evicted from the backlog before this receiver got them
    pub fn missed_acquisitions(&self) -> u64 {
        self.missed_acquisitions
    }

    fn next(&mut self, deadline: Option<Instant>) -> Result<Delivery, RecvTimeoutError> {
        let mut state = self.shared.state.lock();
        loop {
            if state.acquired_count > self.seen_acquired {
                let oldest = state.oldest_acquired();
                if self.seen_acquired < oldest {
                    let missed = oldest - self.seen_acquired;
                    tracing::warn!("Receiver fell behind, {} acquired frames lost", missed);
                    self.missed_acquisitions += missed;
                    self.seen_acquired = oldest;
                }
                let slot = (self.seen_acquired - oldest) as usize;
                match state.acquired.get(slot).cloned() {
                    Some(frame) => {
                        self.seen_acquired += 1;
                        return Ok(Delivery::Acquired(frame));
                    }
                    None => self.seen_acquired = state.acquired_count,
                }
            }
            if state.preview_count > self.seen_preview {
                self.dropped += state.preview_count - self.seen_preview - 1;
                self.seen_preview = state.preview_count;
                if let Some(frame) = state.preview.clone() {
                    return Ok(Delivery::Preview(frame));
                }
            }
            if state.phase == StreamPhase::Stopped {
                return Err(RecvTimeoutError::Stopped);
            }
            match deadline {
                Some(deadline) => {
                    if self
                        .shared
                        .frame_cv
                        .wait_until(&mut state, deadline)
                        .timed_out()
                    {
                        return Err(RecvTimeoutError::Timeout);
                    }
                }
                None => self.shared.frame_cv.wait(&mut state),
            }
        }
    }
}

/// Run `sink` on its own thread until the stream stops. Sink errors are
/// logged and do not end the loop. The sink is handed back on join.
pub fn spawn_sink<S>(mut receiver: FrameReceiver, mut sink: S) -> JoinHandle<S>
where
    S: FrameSink + Send + 'static,
{
    std::thread::spawn(move || {
        while let Some(delivery) = receiver.recv() {
            let result = match &delivery {
                Delivery::Preview(frame) => sink.on_preview(frame),
                Delivery::Acquired(frame) => sink.on_acquired(frame),
            };
            if let Err(e) = result {
                tracing::warn!(
                    "Sink failed on frame {}: {}",
                    delivery.frame().sequence,
                    e
                );
            }
        }
        tracing::debug!(
            "Sink finished, {} preview frames dropped, {} acquired frames missed",
            receiver.dropped(),
            receiver.missed_acquisitions()
        );
        sink
    })
}
