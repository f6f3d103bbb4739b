//! Timestamp counters sampled between commands.
//!
//! A [`Counter`] owns a fixed number of sample slots. [`Counter::sample`]
//! builds a command that stores the device time in one slot when it
//! executes on a stream. Slot values are nanoseconds on a clock private to
//! the counter, so only differences between slots mean anything, and only
//! after the stream that ran the samples has been synchronized.
//!
//! ```ignore
//! let counter = device.create_counter(2)?;
//! stream.dispatch([
//!     counter.sample(0)?,
//!     kernel.launch_thread_groups([64, 1, 1], [64, 1, 1], &[&buffer])?,
//!     counter.sample(1)?,
//! ])?;
//! stream.synchronize()?;
//! let elapsed = counter.elapsed_between(0, 1)?;
//! ```

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::backend::CounterBackend;
use crate::command::{Command, CommandOp};
use crate::device::DeviceShared;
use crate::error::{ArcheError, Result};

struct CounterInner {
    id: u64,
    device: Arc<DeviceShared>,
    epoch: Instant,
    samples: Mutex<Vec<Option<u64>>>,
    native: Arc<dyn CounterBackend>,
}

/// Handle to a set of timestamp slots on one device.
#[derive(Clone)]
pub struct Counter {
    inner: Arc<CounterInner>,
}

impl Counter {
    pub(crate) fn new(
        id: u64,
        device: Arc<DeviceShared>,
        sample_count: u32,
        native: Arc<dyn CounterBackend>,
    ) -> Self {
        Self {
            inner: Arc::new(CounterInner {
                id,
                device,
                epoch: Instant::now(),
                samples: Mutex::new(vec![None; sample_count as usize]),
                native,
            }),
        }
    }

    /// Process-unique counter id.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Owning device id.
    pub fn device_id(&self) -> u64 {
        self.inner.device.id
    }

    /// Number of sample slots.
    pub fn sample_count(&self) -> u32 {
        self.inner.samples.lock().len() as u32
    }

    /// Native query objects.
    pub fn native(&self) -> &Arc<dyn CounterBackend> {
        &self.inner.native
    }

    /// Host instant the counter was created; host-clock backends measure
    /// samples from it.
    pub fn epoch(&self) -> Instant {
        self.inner.epoch
    }

    pub(crate) fn describe(&self) -> String {
        format!("counter #{}", self.inner.id)
    }

    fn check_index(&self, index: u32) -> Result<()> {
        let count = self.sample_count();
        if index >= count {
            return Err(ArcheError::argument(format!(
                "sample index {} is out of range for {} with {} slots",
                index,
                self.describe(),
                count
            )));
        }
        Ok(())
    }

    /// Command storing the device time in slot `index` when it executes.
    ///
    /// Fails with `InvalidArgument` for an index past the last slot.
    pub fn sample(&self, index: u32) -> Result<Command> {
        self.inner.device.ensure_usable()?;
        self.check_index(index)?;
        Ok(Command::new(
            self.inner.device.id,
            CommandOp::SampleCounter {
                counter: self.clone(),
                index,
            },
        ))
    }

    /// Store a sample. Backends call this once a sample command has run.
    pub fn record(&self, index: u32, nanos: u64) {
        if let Some(slot) = self.inner.samples.lock().get_mut(index as usize) {
            *slot = Some(nanos);
        }
    }

    /// Value of slot `index`, if its sample has executed.
    pub fn timestamp(&self, index: u32) -> Option<Duration> {
        self.inner
            .samples
            .lock()
            .get(index as usize)
            .copied()
            .flatten()
            .map(Duration::from_nanos)
    }

    /// Time between two samples.
    ///
    /// Fails with `InvalidArgument` for an out-of-range index and with
    /// `InvalidState` if either sample has not executed yet. A pair sampled
    /// in the wrong order gives zero.
    pub fn elapsed_between(&self, begin: u32, end: u32) -> Result<Duration> {
        self.check_index(begin)?;
        self.check_index(end)?;
        let read = |index: u32| {
            self.timestamp(index).ok_or_else(|| {
                ArcheError::state(format!(
                    "sample {} of {} has not executed",
                    index,
                    self.describe()
                ))
            })
        };
        let (start, stop) = (read(begin)?, read(end)?);
        Ok(stop.saturating_sub(start))
    }

    /// Clear every slot.
    pub fn reset(&self) {
        self.inner.samples.lock().fill(None);
    }
}

impl fmt::Debug for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Counter")
            .field("id", &self.inner.id)
            .field("device", &self.inner.device.id)
            .field("samples", &self.sample_count())
            .finish()
    }
}
