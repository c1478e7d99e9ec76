//! Periodic snapshot delivery on a background thread.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crossbeam_channel::{bounded, RecvTimeoutError, Sender};

use crate::aggregator::TelemetryAggregator;
use crate::snapshot::TelemetrySnapshot;

/// Takes a snapshot every `interval` and hands it to a sink.
///
/// Snapshots taken while the readiness gate is closed are empty and are not
/// delivered. Dropping the reporter stops it.
pub struct SnapshotReporter {
    stop: Option<Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl SnapshotReporter {
    pub fn spawn<F>(
        aggregator: Arc<TelemetryAggregator>,
        interval: Duration,
        mut sink: F,
    ) -> std::io::Result<Self>
    where
        F: FnMut(TelemetrySnapshot) + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let worker = thread::Builder::new()
            .name("telemetry-snapshot".into())
            .spawn(move || {
                log::debug!("snapshot reporter started, interval {interval:?}");
                loop {
                    match stop_rx.recv_timeout(interval) {
                        Err(RecvTimeoutError::Timeout) => {
                            let snap = aggregator.snapshot();
                            if snap.is_empty() {
                                log::trace!("snapshot reporter: gate closed, nothing to send");
                                continue;
                            }
                            sink(snap);
                        }
                        Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                log::debug!("snapshot reporter stopped");
            })?;
        Ok(Self {
            stop: Some(stop_tx),
            worker: Some(worker),
        })
    }

    /// Stop the thread and wait for it to exit.
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                log::warn!("snapshot reporter thread panicked");
            }
        }
    }
}

impl Drop for SnapshotReporter {
    fn drop(&mut self) {
        self.shutdown();
    }
}
