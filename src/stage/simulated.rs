use super::{Stage, StagePosition, StageTarget};
use crate::config::StageConfig;
use crate::error::StageError;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug)]
struct Motion {
    from: StagePosition,
    to: StagePosition,
    started: Instant,
    duration: Duration,
}

impl Motion {
    fn position_at(&self, now: Instant) -> StagePosition {
        let elapsed = now.saturating_duration_since(self.started);
        if elapsed >= self.duration || self.duration.is_zero() {
            return self.to;
        }
        let t = elapsed.as_secs_f64() / self.duration.as_secs_f64();
        let lerp = |a: f64, b: f64| a + (b - a) * t;
        StagePosition {
            x: lerp(self.from.x, self.to.x),
            y: lerp(self.from.y, self.to.y),
            z: lerp(self.from.z, self.to.z),
            a: lerp(self.from.a, self.to.a),
            b: lerp(self.from.b, self.to.b),
        }
    }

    fn finished(&self, now: Instant) -> bool {
        now.saturating_duration_since(self.started) >= self.duration
    }
}

#[derive(Debug)]
struct StageState {
    position: StagePosition,
    motion: Option<Motion>,
}

impl StageState {
    fn current(&mut self, now: Instant) -> StagePosition {
        if let Some(motion) = &self.motion {
            self.position = motion.position_at(now);
            if motion.finished(now) {
                self.motion = None;
            }
        }
        self.position
    }
}

/// Read-only view of a simulated stage, used by the simulated camera to
/// render what the specimen looks like at the current position
#[derive(Debug, Clone)]
pub struct StageHandle {
    state: Arc<Mutex<StageState>>,
}

impl StageHandle {
    pub fn position(&self) -> StagePosition {
        self.state.lock().current(Instant::now())
    }
}

/// In-memory goniometer with limit checks and optional time-based alpha travel
pub struct SimulatedStage {
    state: Arc<Mutex<StageState>>,
    config: StageConfig,
}

impl SimulatedStage {
    pub fn new(config: StageConfig) -> Self {
        Self::with_position(config, StagePosition::default())
    }

    pub fn with_position(config: StageConfig, position: StagePosition) -> Self {
        Self {
            state: Arc::new(Mutex::new(StageState {
                position,
                motion: None,
            })),
            config,
        }
    }

    pub fn handle(&self) -> StageHandle {
        StageHandle {
            state: Arc::clone(&self.state),
        }
    }

    fn check(&self, target: &StagePosition) -> Result<(), StageError> {
        for (axis, value) in [
            ("x", target.x),
            ("y", target.y),
            ("z", target.z),
            ("a", target.a),
            ("b", target.b),
        ] {
            if !value.is_finite() {
                return Err(StageError::NotFinite { axis, value });
            }
        }
        let (a_min, a_max) = self.config.alpha_limits;
        if target.a < a_min || target.a > a_max {
            return Err(StageError::OutOfRange {
                axis: "a",
                value: target.a,
                min: a_min,
                max: a_max,
            });
        }
        let (z_min, z_max) = self.config.z_limits;
        if target.z < z_min || target.z > z_max {
            return Err(StageError::OutOfRange {
                axis: "z",
                value: target.z,
                min: z_min,
                max: z_max,
            });
        }
        Ok(())
    }

    fn travel_time(&self, from: &StagePosition, to: &StagePosition) -> Duration {
        match self.config.alpha_speed {
            Some(speed) => Duration::from_secs_f64((to.a - from.a).abs() / speed),
            None => Duration::ZERO,
        }
    }
}

impl Stage for SimulatedStage {
    fn position(&self) -> Result<StagePosition, StageError> {
        Ok(self.state.lock().current(Instant::now()))
    }

    fn set_position(&mut self, target: StageTarget, wait: bool) -> Result<(), StageError> {
        let remaining = {
            let mut state = self.state.lock();
            let now = Instant::now();
            let from = state.current(now);
            let to = target.resolve(&from);
            self.check(&to)?;

            let duration = self.travel_time(&from, &to);
            tracing::debug!("Stage move {:?} -> {:?} ({:?})", from, to, duration);
            if duration.is_zero() {
                state.position = to;
                state.motion = None;
            } else {
                state.motion = Some(Motion {
                    from,
                    to,
                    started: now,
                    duration,
                });
            }
            duration
        };

        if wait && !remaining.is_zero() {
            std::thread::sleep(remaining);
            // Settle the final position
            self.state.lock().current(Instant::now());
        }
        Ok(())
    }

    fn is_moving(&self) -> Result<bool, StageError> {
        let mut state = self.state.lock();
        state.current(Instant::now());
        Ok(state.motion.is_some())
    }

    fn stop(&mut self) -> Result<(), StageError> {
        let mut state = self.state.lock();
        state.current(Instant::now());
        state.motion = None;
        Ok(())
    }
}
