//! Streams: ordered, asynchronous command queues.
//!
//! [`Stream::dispatch`] validates a whole command list, stamps it with the
//! next sequence number and hands it to the backend without waiting. The
//! backend advances the stream's [`Timeline`] as batches finish;
//! [`Stream::synchronize`] blocks until the timeline reaches the last
//! submitted sequence number.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use serde::Serialize;
use tracing::{debug, trace};

use crate::backend::{CommandBatch, StreamBackend};
use crate::capture::QueuedEvent;
use crate::command::{Command, CommandOp};
use crate::device::DeviceShared;
use crate::error::{ArcheError, Result};
use crate::trace::{category, TraceArgs};

struct TimelineState {
    completed: u64,
    fault: Option<String>,
}

/// Monotonic completion marker shared by a stream and its backend.
///
/// The core advances `submitted` on dispatch; the backend advances
/// `completed` (or records a fault) as batches finish.
pub struct Timeline {
    submitted: AtomicU64,
    state: Mutex<TimelineState>,
    cond: Condvar,
}

impl Timeline {
    /// Create a timeline at zero.
    pub fn new() -> Self {
        Self {
            submitted: AtomicU64::new(0),
            state: Mutex::new(TimelineState {
                completed: 0,
                fault: None,
            }),
            cond: Condvar::new(),
        }
    }

    /// Last submitted sequence number.
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Acquire)
    }

    fn set_submitted(&self, seq: u64) {
        self.submitted.store(seq, Ordering::Release);
    }

    /// Last completed sequence number.
    pub fn completed(&self) -> u64 {
        self.state.lock().completed
    }

    /// First fault reported, if any.
    pub fn fault(&self) -> Option<String> {
        self.state.lock().fault.clone()
    }

    /// Mark every batch up to `seq` complete.
    pub fn complete(&self, seq: u64) {
        let mut state = self.state.lock();
        if seq > state.completed {
            state.completed = seq;
        }
        self.cond.notify_all();
    }

    /// Record a device fault while executing batch `seq`.
    ///
    /// The first fault is kept; every later wait fails with it.
    pub fn fail(&self, seq: u64, reason: impl Into<String>) {
        let mut state = self.state.lock();
        if state.fault.is_none() {
            state.fault = Some(reason.into());
        }
        if seq > state.completed {
            state.completed = seq;
        }
        self.cond.notify_all();
    }

    /// Block until `target` is complete; `Err` carries the fault reason.
    pub fn wait(&self, target: u64) -> std::result::Result<(), String> {
        let mut state = self.state.lock();
        loop {
            if let Some(fault) = &state.fault {
                return Err(fault.clone());
            }
            if state.completed >= target {
                return Ok(());
            }
            self.cond.wait(&mut state);
        }
    }
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether a stream has work in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Nothing pending.
    Idle,
    /// Batches not yet known to be complete.
    Busy {
        /// Number of pending batches.
        pending: u64,
    },
}

/// Counters of submitted work.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StreamMetrics {
    /// `dispatch` calls that submitted work.
    pub batches: u64,
    /// Commands submitted.
    pub commands: u64,
    /// Kernel launches submitted.
    pub launches: u64,
    /// Bytes copied host to device.
    pub bytes_uploaded: u64,
    /// Bytes copied device to host.
    pub bytes_downloaded: u64,
    /// Bytes copied device to device.
    pub bytes_copied: u64,
    /// Counter samples submitted.
    pub counter_samples: u64,
}

impl StreamMetrics {
    fn add(&mut self, other: &StreamMetrics) {
        self.batches += other.batches;
        self.commands += other.commands;
        self.launches += other.launches;
        self.bytes_uploaded += other.bytes_uploaded;
        self.bytes_downloaded += other.bytes_downloaded;
        self.bytes_copied += other.bytes_copied;
        self.counter_samples += other.counter_samples;
    }

    fn record(&mut self, commands: &[Command]) {
        self.batches += 1;
        self.commands += commands.len() as u64;
        for cmd in commands {
            match cmd.op() {
                CommandOp::CopyIn { .. } => self.bytes_uploaded += cmd.transfer_bytes(),
                CommandOp::CopyOut { .. } => self.bytes_downloaded += cmd.transfer_bytes(),
                CommandOp::CopyBuffer { .. } => self.bytes_copied += cmd.transfer_bytes(),
                CommandOp::Launch(_) => self.launches += 1,
                CommandOp::SampleCounter { .. } => self.counter_samples += 1,
            }
        }
    }
}

pub(crate) struct StreamInner {
    id: u64,
    // Dropped before `device` so queued work drains while the device lives.
    backend: Box<dyn StreamBackend>,
    device: Arc<DeviceShared>,
    timeline: Arc<Timeline>,
    dispatch_lock: Mutex<()>,
    metrics: Mutex<StreamMetrics>,
}

impl StreamInner {
    pub(crate) fn new(
        id: u64,
        device: Arc<DeviceShared>,
        backend: Box<dyn StreamBackend>,
        timeline: Arc<Timeline>,
    ) -> Self {
        Self {
            id,
            device,
            backend,
            timeline,
            dispatch_lock: Mutex::new(()),
            metrics: Mutex::new(StreamMetrics::default()),
        }
    }

    fn dispatch(&self, mut commands: Vec<Command>) -> Result<()> {
        if commands.is_empty() {
            return Ok(());
        }
        self.device.ensure_usable()?;
        for cmd in &commands {
            cmd.check_device(self.device.id)?;
        }
        // Host bytes are read here; later writes to the array do not reach
        // the queued copy.
        for cmd in &mut commands {
            cmd.snapshot_host_source();
        }

        let _guard = self.dispatch_lock.lock();
        let seq = self.timeline.submitted() + 1;
        let count = commands.len();

        let mut metrics = StreamMetrics::default();
        metrics.record(&commands);
        let capturing = self.device.capture.is_recording(self.id);
        let queued_at = Instant::now();
        let events: Vec<QueuedEvent> = if capturing {
            commands.iter().map(QueuedEvent::of).collect()
        } else {
            Vec::new()
        };
        for cmd in &commands {
            trace!(stream = self.id, seq, command = %cmd.name(), "Queued command");
        }

        self.backend.submit(CommandBatch { seq, commands })?;
        self.timeline.set_submitted(seq);
        self.metrics.lock().add(&metrics);
        if capturing {
            self.device
                .capture
                .record_dispatch(self.id, seq, queued_at, events);
        }

        debug!(stream = self.id, seq, commands = count, "Dispatched batch");
        Ok(())
    }

    pub(crate) fn synchronize(&self) -> Result<()> {
        self.device.ensure_alive()?;

        let target = self.timeline.submitted();
        if self.timeline.completed() >= target && self.timeline.fault().is_none() {
            return Ok(());
        }

        let start = Instant::now();
        let result = self
            .backend
            .synchronize(target)
            .and_then(|()| self.timeline.wait(target).map_err(ArcheError::DeviceLost));

        match result {
            Ok(()) => {
                let elapsed = start.elapsed();
                self.device.capture.record_span(
                    self.id,
                    "synchronize",
                    category::SYNC,
                    start,
                    elapsed,
                    TraceArgs::default().with_seq(target),
                );
                debug!(stream = self.id, seq = target, ?elapsed, "Synchronized");
                Ok(())
            }
            Err(e) => {
                let reason = match e {
                    ArcheError::DeviceLost(reason) => reason,
                    other => other.to_string(),
                };
                self.device.mark_lost(&reason);
                Err(ArcheError::DeviceLost(reason))
            }
        }
    }

    fn pending(&self) -> u64 {
        self.timeline
            .submitted()
            .saturating_sub(self.timeline.completed())
    }
}

impl Drop for StreamInner {
    fn drop(&mut self) {
        debug!(stream = self.id, pending = self.pending(), "Releasing stream");
    }
}

/// An ordered command queue on one device.
///
/// Commands execute in submission order. Dropping the stream waits for
/// queued work to finish.
pub struct Stream {
    pub(crate) inner: Arc<StreamInner>,
}

impl Stream {
    /// Process-unique stream id.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Owning device id.
    pub fn device_id(&self) -> u64 {
        self.inner.device.id
    }

    /// Submit commands for asynchronous execution, in list order.
    ///
    /// Returns without waiting. The whole list is validated first: if any
    /// command references a resource of another device the call fails with
    /// `CrossDeviceReference` and nothing is submitted. An empty list is a
    /// no-op.
    pub fn dispatch(&self, commands: impl IntoIterator<Item = Command>) -> Result<()> {
        self.inner.dispatch(commands.into_iter().collect())
    }

    /// Block until every previously dispatched command has completed.
    ///
    /// Returns immediately when nothing is pending. A device fault is
    /// reported as `DeviceLost` and is terminal for the device.
    pub fn synchronize(&self) -> Result<()> {
        self.inner.synchronize()
    }

    /// Current state.
    pub fn state(&self) -> StreamState {
        match self.inner.pending() {
            0 => StreamState::Idle,
            pending => StreamState::Busy { pending },
        }
    }

    /// Number of batches not yet known to be complete.
    pub fn pending(&self) -> u64 {
        self.inner.pending()
    }

    /// Sequence number of the last submitted batch.
    pub fn submitted_marker(&self) -> u64 {
        self.inner.timeline.submitted()
    }

    /// Sequence number of the last completed batch.
    pub fn completed_marker(&self) -> u64 {
        self.inner.timeline.completed()
    }

    /// Submission counters.
    pub fn metrics(&self) -> StreamMetrics {
        *self.inner.metrics.lock()
    }
}

impl fmt::Debug for Stream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Stream")
            .field("id", &self.inner.id)
            .field("device", &self.inner.device.id)
            .field("submitted", &self.inner.timeline.submitted())
            .field("completed", &self.inner.timeline.completed())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_timeline_wait_returns_after_complete() {
        let timeline = Arc::new(Timeline::new());
        timeline.set_submitted(2);

        let t = Arc::clone(&timeline);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            t.complete(1);
            t.complete(2);
        });

        assert_eq!(timeline.wait(2), Ok(()));
        assert_eq!(timeline.completed(), 2);
        handle.join().unwrap();
    }

    #[test]
    fn test_timeline_never_goes_backwards() {
        let timeline = Timeline::new();
        timeline.complete(5);
        timeline.complete(3);
        assert_eq!(timeline.completed(), 5);
        assert_eq!(timeline.wait(4), Ok(()));
    }

    #[test]
    fn test_timeline_fault_is_sticky() {
        let timeline = Timeline::new();
        timeline.fail(1, "out of memory");
        timeline.fail(2, "second");
        assert_eq!(timeline.wait(1), Err("out of memory".to_string()));
        assert_eq!(timeline.wait(0), Err("out of memory".to_string()));
        assert_eq!(timeline.fault().as_deref(), Some("out of memory"));
    }

    #[test]
    fn test_metrics_default() {
        let metrics = StreamMetrics::default();
        assert_eq!(metrics.batches, 0);
        assert_eq!(metrics.launches, 0);
    }
}
