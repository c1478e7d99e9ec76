//! Latest-value channels.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

/// Holds the most recent value written to one signal.
///
/// Each channel carries its own lock, so writers to different channels never
/// contend. Readers observe either the previous or the new value in full.
#[derive(Debug)]
pub struct TelemetryChannel<T> {
    slot: RwLock<Option<T>>,
}

impl<T> Default for TelemetryChannel<T> {
    fn default() -> Self {
        Self {
            slot: RwLock::new(None),
        }
    }
}

impl<T: Clone> TelemetryChannel<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the current value; last writer wins.
    pub fn write(&self, value: T) {
        *self.slot.write() = Some(value);
    }

    /// Copy of the current value, `None` until the first write.
    pub fn read(&self) -> Option<T> {
        self.slot.read().clone()
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.slot.read().is_some()
    }

    /// Drop the value and mark the channel unready again.
    pub fn reset(&self) {
        *self.slot.write() = None;
    }
}

/// Discriminant of a [`ChannelValue`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Vector3,
    Quaternion,
    Scalar,
    Integer,
    Bytes,
    Text,
}

/// A typed telemetry payload.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum ChannelValue {
    Vector3([f64; 3]),
    /// `[x, y, z, w]`.
    Quaternion([f64; 4]),
    Scalar(f64),
    Integer(i64),
    Bytes(Vec<u8>),
    Text(String),
}

impl ChannelValue {
    pub fn kind(&self) -> ValueKind {
        match self {
            Self::Vector3(_) => ValueKind::Vector3,
            Self::Quaternion(_) => ValueKind::Quaternion,
            Self::Scalar(_) => ValueKind::Scalar,
            Self::Integer(_) => ValueKind::Integer,
            Self::Bytes(_) => ValueKind::Bytes,
            Self::Text(_) => ValueKind::Text,
        }
    }
}

impl From<[f64; 3]> for ChannelValue {
    fn from(v: [f64; 3]) -> Self {
        Self::Vector3(v)
    }
}

impl From<f64> for ChannelValue {
    fn from(v: f64) -> Self {
        Self::Scalar(v)
    }
}

impl From<i64> for ChannelValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<String> for ChannelValue {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<&str> for ChannelValue {
    fn from(v: &str) -> Self {
        Self::Text(v.to_owned())
    }
}
