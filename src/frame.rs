use chrono::{DateTime, Local};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Instant;

/// Scalar header value recorded alongside a frame
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl MetaValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetaValue::Float(v) => Some(*v),
            MetaValue::Int(v) => Some(*v as f64),
            _ => None,
        }
    }
}

impl fmt::Display for MetaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MetaValue::Bool(v) => write!(f, "{v}"),
            MetaValue::Int(v) => write!(f, "{v}"),
            MetaValue::Float(v) => write!(f, "{v}"),
            MetaValue::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<f64> for MetaValue {
    fn from(value: f64) -> Self {
        MetaValue::Float(value)
    }
}

impl From<i64> for MetaValue {
    fn from(value: i64) -> Self {
        MetaValue::Int(value)
    }
}

impl From<u32> for MetaValue {
    fn from(value: u32) -> Self {
        MetaValue::Int(i64::from(value))
    }
}

impl From<bool> for MetaValue {
    fn from(value: bool) -> Self {
        MetaValue::Bool(value)
    }
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        MetaValue::Text(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        MetaValue::Text(value)
    }
}

/// Frame header: exposure, binsize, stage position and whatever else the
/// device reported at capture time
pub type Metadata = BTreeMap<String, MetaValue>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FrameKind {
    /// Best-effort live frame
    Preview,
    /// Authoritative result of a one-shot request
    Acquired,
}

/// A captured detector image. Frames are immutable once produced and are
/// handed around as `Arc<Frame>`.
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Array2<u16>,
    pub metadata: Metadata,
    pub kind: FrameKind,
    /// Per-stream capture counter, strictly increasing
    pub sequence: u64,
    pub captured_at: Instant,
    pub timestamp: DateTime<Local>,
}

impl Frame {
    pub fn new(data: Array2<u16>, metadata: Metadata, kind: FrameKind, sequence: u64) -> Self {
        Self {
            data,
            metadata,
            kind,
            sequence,
            captured_at: Instant::now(),
            timestamp: Local::now(),
        }
    }

    /// (rows, columns)
    pub fn dimensions(&self) -> (usize, usize) {
        self.data.dim()
    }

    pub fn exposure(&self) -> Option<f64> {
        self.metadata.get("exposure").and_then(MetaValue::as_f64)
    }

    pub fn binsize(&self) -> Option<u32> {
        match self.metadata.get("binsize") {
            Some(MetaValue::Int(v)) => u32::try_from(*v).ok(),
            _ => None,
        }
    }

    /// Copy of this frame with extra header entries, e.g. stage position
    pub fn annotated<I, K, V>(&self, entries: I) -> Frame
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<MetaValue>,
    {
        let mut frame = self.clone();
        frame
            .metadata
            .extend(entries.into_iter().map(|(k, v)| (k.into(), v.into())));
        frame
    }
}
