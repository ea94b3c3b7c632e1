mod simulated;

pub use simulated::{SimulatedStage, StageHandle};

use crate::error::StageError;
use serde::{Deserialize, Serialize};

/// Goniometer position: x, y, z in nm and the alpha/beta tilts in degrees
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct StagePosition {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub a: f64,
    pub b: f64,
}

impl StagePosition {
    /// Header entries for annotating acquired frames
    pub fn header_entries(&self) -> [(&'static str, f64); 5] {
        [
            ("stage_x", self.x),
            ("stage_y", self.y),
            ("stage_z", self.z),
            ("stage_a", self.a),
            ("stage_b", self.b),
        ]
    }
}

/// A move request. Axes left as `None` keep their current value.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StageTarget {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub a: Option<f64>,
    pub b: Option<f64>,
}

impl StageTarget {
    pub fn z(z: f64) -> Self {
        Self {
            z: Some(z),
            ..Self::default()
        }
    }

    pub fn a(a: f64) -> Self {
        Self {
            a: Some(a),
            ..Self::default()
        }
    }

    pub fn az(a: f64, z: f64) -> Self {
        Self {
            a: Some(a),
            z: Some(z),
            ..Self::default()
        }
    }

    /// Resolve this target against the current position
    pub fn resolve(&self, current: &StagePosition) -> StagePosition {
        StagePosition {
            x: self.x.unwrap_or(current.x),
            y: self.y.unwrap_or(current.y),
            z: self.z.unwrap_or(current.z),
            a: self.a.unwrap_or(current.a),
            b: self.b.unwrap_or(current.b),
        }
    }
}

/// Trait for specimen stages
pub trait Stage {
    fn position(&self) -> Result<StagePosition, StageError>;

    /// Move to `target`. With `wait` the call returns once the stage has arrived.
    fn set_position(&mut self, target: StageTarget, wait: bool) -> Result<(), StageError>;

    fn is_moving(&self) -> Result<bool, StageError>;

    /// Halt any move in progress where it is
    fn stop(&mut self) -> Result<(), StageError>;
}
