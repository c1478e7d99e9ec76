//! Channel registrations and the standard signal set.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::channel::ValueKind;
use crate::error::TelemetryError;

/// Channel written by the pipeline with the latest object-detection summary.
pub const OBJECT_DETECTION_CHANNEL: &str = "/cv_results";
/// Channel written by the pipeline with the latest pose summary.
pub const POSE_DETECTION_CHANNEL: &str = "/cv/pose_results";

/// Largest byte payload a `ByteGroups` channel may declare.
pub const MAX_BYTE_PAYLOAD: usize = 4096;

/// Shape of a channel's payload and how it renders in a snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum ChannelKind {
    Vector3,
    Quaternion,
    Scalar,
    Integer,
    Text,
    /// Fixed-size byte payload shown as `groups` entries of `group_len` bytes.
    /// Entries are labelled `"{label} 1"`, `"{label} 2"`, ...
    ByteGroups { groups: usize, group_len: usize },
}

impl ChannelKind {
    /// Value kind accepted by writes to this channel.
    pub fn value_kind(&self) -> ValueKind {
        match self {
            Self::Vector3 => ValueKind::Vector3,
            Self::Quaternion => ValueKind::Quaternion,
            Self::Scalar => ValueKind::Scalar,
            Self::Integer => ValueKind::Integer,
            Self::Text => ValueKind::Text,
            Self::ByteGroups { .. } => ValueKind::Bytes,
        }
    }

    /// Total payload length of a `ByteGroups` channel, if its shape is
    /// non-empty and within [`MAX_BYTE_PAYLOAD`].
    pub fn byte_payload_len(&self) -> Option<usize> {
        match *self {
            Self::ByteGroups { groups, group_len } if groups > 0 && group_len > 0 => groups
                .checked_mul(group_len)
                .filter(|&total| total <= MAX_BYTE_PAYLOAD),
            _ => None,
        }
    }
}

/// One registered signal.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ChannelSpec {
    /// Name writers use, e.g. `/gnc/ekf/position`.
    pub name: String,
    /// Snapshot key.
    pub label: String,
    pub kind: ChannelKind,
    /// Decimal places for floating-point values.
    #[serde(default = "default_precision")]
    pub precision: usize,
}

fn default_precision() -> usize {
    4
}

impl ChannelSpec {
    pub fn new(name: impl Into<String>, label: impl Into<String>, kind: ChannelKind) -> Self {
        Self {
            name: name.into(),
            label: label.into(),
            kind,
            precision: default_precision(),
        }
    }

    pub fn with_precision(mut self, precision: usize) -> Self {
        self.precision = precision;
        self
    }
}

/// Ordered set of channel registrations. Snapshot entries follow this order.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<ChannelSpec>", into = "Vec<ChannelSpec>")]
pub struct TelemetryRegistry {
    specs: Vec<ChannelSpec>,
}

impl TryFrom<Vec<ChannelSpec>> for TelemetryRegistry {
    type Error = TelemetryError;

    fn try_from(specs: Vec<ChannelSpec>) -> Result<Self, Self::Error> {
        let mut registry = Self::default();
        for spec in specs {
            registry.register(spec)?;
        }
        Ok(registry)
    }
}

impl From<TelemetryRegistry> for Vec<ChannelSpec> {
    fn from(r: TelemetryRegistry) -> Self {
        r.specs
    }
}

impl TelemetryRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a channel; names must be unique.
    pub fn register(&mut self, spec: ChannelSpec) -> Result<(), TelemetryError> {
        if self.specs.iter().any(|s| s.name == spec.name) {
            return Err(TelemetryError::DuplicateChannel(spec.name));
        }
        if let ChannelKind::ByteGroups { groups, group_len } = spec.kind {
            if spec.kind.byte_payload_len().is_none() {
                return Err(TelemetryError::InvalidByteGroups {
                    channel: spec.name,
                    groups,
                    group_len,
                });
            }
        }
        self.specs.push(spec);
        Ok(())
    }

    /// Builder-style [`register`](Self::register).
    pub fn with(mut self, spec: ChannelSpec) -> Result<Self, TelemetryError> {
        self.register(spec)?;
        Ok(self)
    }

    #[inline]
    pub fn specs(&self) -> &[ChannelSpec] {
        &self.specs
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.specs.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    /// The servicer/client GNC signal set plus the two pipeline result channels.
    pub fn standard() -> Self {
        use ChannelKind::*;

        let specs = [
            ChannelSpec::new("/robot_name", "Robot Name", Text),
            ChannelSpec::new("/simulinkclock", "Time", Scalar).with_precision(2),
            ChannelSpec::new("/simulinkphase", "Phase", Integer),
            ChannelSpec::new("/gnc/ekf/position", "EKF Position", Vector3),
            ChannelSpec::new("/gnc/ekf/attitude", "EKF Attitude", Quaternion),
            ChannelSpec::new(
                "/hw/pmc/command",
                "Nozzle Positions Side",
                ByteGroups {
                    groups: 2,
                    group_len: 6,
                },
            ),
            ChannelSpec::new("/client/gnc/nav/position_est", "Client KF Position", Vector3),
            ChannelSpec::new("/client/gnc/guidance/error", "Client Position Error", Vector3),
            ChannelSpec::new(
                "/client/attitude_control/q_error",
                "Client Quaternion Error",
                Quaternion,
            ),
            ChannelSpec::new(
                "/client/attitude_control/qdesired",
                "Client Quaternion Desired",
                Quaternion,
            ),
            ChannelSpec::new("/client/gnc/guidance/pos", "Client Desired Position", Vector3),
            ChannelSpec::new(
                "/client/gnc/ctl/acceleration",
                "Client Desired Acceleration",
                Vector3,
            ),
            ChannelSpec::new("/client/attitude_control/torque", "Client Control Torque", Vector3),
            ChannelSpec::new(
                "/adaptive_gnc/ctl/xm/pos_error",
                "Servicer Xm Position Error",
                Vector3,
            ),
            ChannelSpec::new(
                "/adaptive_gnc/guidance/error",
                "Servicer Guided Position Error",
                Vector3,
            ),
            ChannelSpec::new("/adaptive_gnc/ctl/xm/pos", "Servicer Xm Position", Vector3),
            ChannelSpec::new("/adaptive_gnc/guidance/pos", "Servicer Guided Position", Vector3),
            ChannelSpec::new("/adaptive_gnc/ctl/xm/vel", "Servicer Xm Velocity", Vector3),
            ChannelSpec::new(
                "/adaptive_gnc/ctl/xm/vel_error",
                "Servicer Xm Velocity Error",
                Vector3,
            ),
            ChannelSpec::new(
                "/adaptive_gnc/ctl/acceleration",
                "Servicer Control Acceleration",
                Vector3,
            ),
            ChannelSpec::new(
                "/attitude_control/qdesired",
                "Servicer Quaternion Desired",
                Quaternion,
            ),
            ChannelSpec::new("/attitude_control/q_error", "Servicer Quaternion Error", Quaternion),
            ChannelSpec::new("/attitude_control/torque", "Servicer Control Torque", Vector3),
            ChannelSpec::new(
                "/adaptive_gnc/nav/relative_position",
                "Servicer Pos Wrt Client",
                Vector3,
            ),
            ChannelSpec::new(
                "/adaptive_gnc/nav/target_states",
                "Servicer's Recv'd Abs Client Position",
                Vector3,
            ),
            ChannelSpec::new(OBJECT_DETECTION_CHANNEL, "Object Detection Results", Text),
            ChannelSpec::new(POSE_DETECTION_CHANNEL, "Pose Detection Results", Text),
        ];

        debug_assert_eq!(
            specs.iter().map(|s| &s.name).collect::<HashSet<_>>().len(),
            specs.len()
        );
        Self {
            specs: specs.into(),
        }
    }
}
