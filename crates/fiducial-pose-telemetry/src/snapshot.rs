//! Point-in-time view of every channel.

use serde::ser::{Serialize, SerializeMap, Serializer};

use crate::channel::ChannelValue;
use crate::registry::{ChannelKind, ChannelSpec};

/// A rendered snapshot field.
#[derive(Clone, Debug, PartialEq)]
pub enum SnapshotValue {
    Text(String),
    Integer(i64),
    /// No usable value: channel unready or payload malformed.
    Placeholder,
}

impl SnapshotValue {
    pub fn is_placeholder(&self) -> bool {
        matches!(self, Self::Placeholder)
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(s) => Some(s),
            _ => None,
        }
    }
}

impl Serialize for SnapshotValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Text(s) => serializer.serialize_str(s),
            Self::Integer(v) => serializer.serialize_i64(*v),
            Self::Placeholder => serializer.serialize_str(""),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SnapshotEntry {
    pub key: String,
    pub value: SnapshotValue,
    /// Whether the backing channel had been written.
    pub ready: bool,
}

/// Ordered key/value copy of the telemetry channels.
///
/// Serializes to a JSON object whose keys keep registry order.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TelemetrySnapshot {
    entries: Vec<SnapshotEntry>,
}

impl TelemetrySnapshot {
    /// The snapshot returned before the readiness gate opens.
    pub fn empty() -> Self {
        Self::default()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn entries(&self) -> &[SnapshotEntry] {
        &self.entries
    }

    pub fn get(&self, key: &str) -> Option<&SnapshotEntry> {
        self.entries.iter().find(|e| e.key == key)
    }

    pub(crate) fn push_channel(&mut self, spec: &ChannelSpec, value: Option<ChannelValue>) {
        let ready = value.is_some();
        match spec.kind {
            ChannelKind::ByteGroups { groups, group_len } => {
                if spec.kind.byte_payload_len().is_none() {
                    log::debug!("telemetry '{}': unusable byte group shape", spec.name);
                    self.entries.push(SnapshotEntry {
                        key: spec.label.clone(),
                        value: SnapshotValue::Placeholder,
                        ready,
                    });
                    return;
                }
                let bytes = match &value {
                    Some(ChannelValue::Bytes(b)) => Some(b.as_slice()),
                    _ => None,
                };
                for g in 0..groups {
                    let start = g * group_len;
                    let chunk = bytes.and_then(|b| b.get(start..start + group_len));
                    let value = match chunk {
                        Some(c) => SnapshotValue::Text(format_list(c.iter().map(u8::to_string))),
                        None => {
                            if ready {
                                log::debug!(
                                    "telemetry '{}': payload too short for group {}",
                                    spec.name,
                                    g + 1
                                );
                            }
                            SnapshotValue::Placeholder
                        }
                    };
                    self.entries.push(SnapshotEntry {
                        key: format!("{} {}", spec.label, g + 1),
                        value,
                        ready,
                    });
                }
            }
            _ => self.entries.push(SnapshotEntry {
                key: spec.label.clone(),
                value: value.map_or(SnapshotValue::Placeholder, |v| render(&v, spec.precision)),
                ready,
            }),
        }
    }
}

impl Serialize for TelemetrySnapshot {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for e in &self.entries {
            map.serialize_entry(&e.key, &e.value)?;
        }
        map.end()
    }
}

fn format_list(items: impl Iterator<Item = String>) -> String {
    format!("[{}]", items.collect::<Vec<_>>().join(", "))
}

fn render(value: &ChannelValue, precision: usize) -> SnapshotValue {
    let fixed = |v: &f64| format!("{v:.precision$}");
    match value {
        ChannelValue::Vector3(v) => SnapshotValue::Text(format_list(v.iter().map(fixed))),
        ChannelValue::Quaternion(q) => SnapshotValue::Text(format_list(q.iter().map(fixed))),
        ChannelValue::Scalar(v) => SnapshotValue::Text(fixed(v)),
        ChannelValue::Integer(v) => SnapshotValue::Integer(*v),
        ChannelValue::Text(s) => SnapshotValue::Text(s.clone()),
        ChannelValue::Bytes(b) => SnapshotValue::Text(format_list(b.iter().map(u8::to_string))),
    }
}
