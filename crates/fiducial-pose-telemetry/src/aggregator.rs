//! Registry of independently locked channels behind a readiness gate.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::channel::{ChannelValue, TelemetryChannel};
use crate::error::TelemetryError;
use crate::gate::ReadinessGate;
use crate::registry::{ChannelSpec, TelemetryRegistry};
use crate::snapshot::TelemetrySnapshot;

/// Collects the latest value of every registered signal.
///
/// Writes go straight to the target channel's own lock, so concurrent writers
/// on different channels never contend and never wait for a snapshot in
/// progress on another channel. A snapshot reads the channels one by one;
/// it is consistent per channel, not across channels.
#[derive(Debug)]
pub struct TelemetryAggregator {
    specs: Vec<ChannelSpec>,
    channels: Vec<TelemetryChannel<ChannelValue>>,
    index: HashMap<String, usize>,
    gate: ReadinessGate,
    closed: AtomicBool,
}

impl TelemetryAggregator {
    /// Allocate one unready channel per registration.
    pub fn new(registry: TelemetryRegistry) -> Self {
        let specs: Vec<ChannelSpec> = registry.into();
        let index = specs
            .iter()
            .enumerate()
            .map(|(i, s)| (s.name.clone(), i))
            .collect();
        let channels = specs.iter().map(|_| TelemetryChannel::new()).collect();
        Self {
            specs,
            channels,
            index,
            gate: ReadinessGate::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Aggregator over [`TelemetryRegistry::standard`].
    pub fn standard() -> Self {
        Self::new(TelemetryRegistry::standard())
    }

    pub fn specs(&self) -> &[ChannelSpec] {
        &self.specs
    }

    #[inline]
    pub fn gate(&self) -> &ReadinessGate {
        &self.gate
    }

    /// Store `value` as the latest value of channel `name`.
    pub fn write(&self, name: &str, value: impl Into<ChannelValue>) -> Result<(), TelemetryError> {
        if self.closed.load(Ordering::Acquire) {
            return Err(TelemetryError::Closed);
        }
        let &i = self
            .index
            .get(name)
            .ok_or_else(|| TelemetryError::UnknownChannel(name.to_owned()))?;
        let value = value.into();
        let expected = self.specs[i].kind.value_kind();
        if value.kind() != expected {
            return Err(TelemetryError::KindMismatch {
                channel: name.to_owned(),
                expected,
                got: value.kind(),
            });
        }
        self.channels[i].write(value);
        Ok(())
    }

    /// Latest raw value of one channel.
    pub fn read(&self, name: &str) -> Option<ChannelValue> {
        self.index.get(name).and_then(|&i| self.channels[i].read())
    }

    pub fn is_ready(&self, name: &str) -> bool {
        self.index
            .get(name)
            .is_some_and(|&i| self.channels[i].is_ready())
    }

    /// Every channel's current value. Empty while the gate is closed and
    /// again once the aggregator is closed.
    pub fn snapshot(&self) -> TelemetrySnapshot {
        let mut snap = TelemetrySnapshot::empty();
        if !self.gate.is_open() || self.is_closed() {
            return snap;
        }
        for (spec, channel) in self.specs.iter().zip(&self.channels) {
            snap.push_channel(spec, channel.read());
        }
        snap
    }

    /// Reject all further writes.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            log::info!("telemetry closed to writes");
        }
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Clear every channel back to unready.
    pub fn reset(&self) {
        for channel in &self.channels {
            channel.reset();
        }
        log::debug!("telemetry reset ({} channels)", self.channels.len());
    }
}
