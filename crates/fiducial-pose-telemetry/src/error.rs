use crate::channel::ValueKind;

/// Rejected telemetry operations.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("unknown telemetry channel '{0}'")]
    UnknownChannel(String),
    #[error("channel '{channel}' expects {expected:?}, got {got:?}")]
    KindMismatch {
        channel: String,
        expected: ValueKind,
        got: ValueKind,
    },
    #[error("channel '{0}' registered twice")]
    DuplicateChannel(String),
    #[error("channel '{channel}': {groups} groups of {group_len} bytes is not a valid payload shape")]
    InvalidByteGroups {
        channel: String,
        groups: usize,
        group_len: usize,
    },
    #[error("telemetry is closed")]
    Closed,
}
