use crate::error::{AcquireError, CaptureError};
use crate::frame::Frame;
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Acquired frames kept for receivers that have not caught up yet
pub(crate) const ACQUIRED_BACKLOG: usize = 64;

/// Coordinator state. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamPhase {
    Idle,
    RequestPending,
    Serving,
    Stopped,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct AcquireRequest {
    pub id: u64,
    pub exposure: f64,
    pub binsize: u32,
    pub issued_at: Instant,
}

pub(crate) struct Completion {
    pub id: u64,
    pub result: Result<Arc<Frame>, CaptureError>,
}

/// Counters reported by [`super::VideoStream::stats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    pub previews: u64,
    pub acquisitions: u64,
    pub capture_failures: u64,
}

pub(crate) struct StreamState {
    pub phase: StreamPhase,
    pub frametime: Duration,
    pub pending: Option<AcquireRequest>,
    /// Id of a request the caller gave up on while it was being served
    pub abandoned: Option<u64>,
    pub completed: Option<Completion>,
    pub next_request_id: u64,
    /// Latest preview frame, overwritten on every cycle
    pub preview: Option<Arc<Frame>>,
    pub preview_count: u64,
    /// Recent acquired frames for sinks, oldest first. The last one is
    /// number `acquired_count - 1`.
    pub acquired: VecDeque<Arc<Frame>>,
    pub acquired_count: u64,
    pub stats: StreamStats,
}

impl StreamState {
    /// Publish an acquired frame, evicting the oldest beyond the backlog
    pub fn push_acquired(&mut self, frame: Arc<Frame>) {
        if self.acquired.len() == ACQUIRED_BACKLOG {
            self.acquired.pop_front();
        }
        self.acquired.push_back(frame);
        self.acquired_count += 1;
    }

    /// Number of the oldest acquired frame still held
    pub fn oldest_acquired(&self) -> u64 {
        self.acquired_count - self.acquired.len() as u64
    }
}

/// Everything the producer, the coordinator and the sinks share. All fields
/// of `StreamState` sit behind the one lock, which is never held across a
/// capture.
pub(crate) struct Shared {
    pub state: Mutex<StreamState>,
    /// Producer wakeup: a request arrived, the cadence changed, or stop
    pub request_cv: Condvar,
    /// Caller wakeup: an acquisition completed, or stop
    pub result_cv: Condvar,
    /// Sink wakeup: a frame was published, or stop
    pub frame_cv: Condvar,
}

impl Shared {
    pub fn new(frametime: Duration) -> Self {
        Self {
            state: Mutex::new(StreamState {
                phase: StreamPhase::Idle,
                frametime,
                pending: None,
                abandoned: None,
                completed: None,
                next_request_id: 0,
                preview: None,
                preview_count: 0,
                acquired: VecDeque::with_capacity(ACQUIRED_BACKLOG),
                acquired_count: 0,
                stats: StreamStats::default(),
            }),
            request_cv: Condvar::new(),
            result_cv: Condvar::new(),
            frame_cv: Condvar::new(),
        }
    }

    /// Move to `Stopped`, drop any pending request and wake everyone. A frame
    /// already served stays collectable by its waiter.
    pub fn stop(&self) {
        {
            let mut state = self.state.lock();
            if state.phase != StreamPhase::Stopped {
                tracing::info!("Stopping video stream");
            }
            state.phase = StreamPhase::Stopped;
            state.pending = None;
        }
        self.request_cv.notify_all();
        self.result_cv.notify_all();
        self.frame_cv.notify_all();
    }

    /// Register a one-shot request. Only one request may be outstanding.
    pub fn submit(&self, exposure: f64, binsize: u32) -> Result<AcquireRequest, AcquireError> {
        let request = {
            let mut state = self.state.lock();
            match state.phase {
                StreamPhase::Stopped => return Err(AcquireError::Aborted),
                StreamPhase::RequestPending | StreamPhase::Serving => {
                    return Err(AcquireError::Busy)
                }
                StreamPhase::Idle => {}
            }
            let request = AcquireRequest {
                id: state.next_request_id,
                exposure,
                binsize,
                issued_at: Instant::now(),
            };
            state.next_request_id += 1;
            state.pending = Some(request);
            state.phase = StreamPhase::RequestPending;
            request
        };
        self.request_cv.notify_all();
        Ok(request)
    }

    /// Block until request `id` is served, the stream stops, or `timeout`
    /// elapses. On timeout the request is withdrawn; a capture already in
    /// progress finishes and its frame is discarded.
    pub fn wait_for(
        &self,
        id: u64,
        timeout: Option<Duration>,
    ) -> Result<Arc<Frame>, AcquireError> {
        let deadline = timeout.map(|t| Instant::now() + t);
        let mut state = self.state.lock();
        loop {
            if state.completed.as_ref().is_some_and(|c| c.id == id) {
                let completion = state.completed.take();
                if state.phase != StreamPhase::Stopped {
                    state.phase = StreamPhase::Idle;
                }
                return match completion {
                    Some(c) => c.result.map_err(AcquireError::from),
                    None => Err(AcquireError::Aborted),
                };
            }
            if state.phase == StreamPhase::Stopped {
                return Err(AcquireError::Aborted);
            }
            match deadline {
                Some(deadline) if Instant::now() >= deadline => {
                    match state.phase {
                        StreamPhase::RequestPending => {
                            state.pending = None;
                            state.phase = StreamPhase::Idle;
                        }
                        StreamPhase::Serving => state.abandoned = Some(id),
                        _ => {}
                    }
                    tracing::warn!("Acquisition request {} timed out", id);
                    return Err(AcquireError::Timeout(timeout.unwrap_or_default()));
                }
                Some(deadline) => {
                    self.result_cv.wait_until(&mut state, deadline);
                }
                None => self.result_cv.wait(&mut state),
            }
        }
    }
}
