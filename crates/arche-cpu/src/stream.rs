//! Streams executed by a dedicated worker thread.
//!
//! Each stream owns one worker fed through an unbounded channel, so
//! `submit` never blocks and batches run strictly in order. The worker
//! advances the shared timeline after every batch. A failing command, or a
//! panic inside the interpreter, faults the timeline; later batches are
//! skipped.

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};
use std::time::Instant;

use crossbeam::channel::{self, Sender};
use parking_lot::MutexGuard;
use tracing::{debug, error, trace, warn};

use arche_core::backend::{CommandBatch, StreamBackend, StreamContext};
use arche_core::buffer::BufferView;
use arche_core::command::{Argument, Command, CommandOp, Launch};
use arche_core::counter::Counter;
use arche_core::error::{ArcheError, Result};
use arche_core::trace::{category, TraceArgs};

use crate::interp::{ArgSlot, LaunchMemory};
use crate::kernel::CpuKernel;
use crate::memory::CpuBuffer;
use crate::runtime::CpuCounter;

/// A stream backed by one worker thread.
pub struct CpuStream {
    stream_id: u64,
    sender: Option<Sender<CommandBatch>>,
    worker: Option<JoinHandle<()>>,
}

impl CpuStream {
    /// Spawn the worker for `ctx`.
    pub fn spawn(ctx: StreamContext) -> Result<Self> {
        let (sender, receiver) = channel::unbounded::<CommandBatch>();
        let stream_id = ctx.stream_id;

        let worker = thread::Builder::new()
            .name(format!("arche-cpu-stream-{}", stream_id))
            .spawn(move || {
                let worker = Worker { ctx };
                for batch in receiver {
                    worker.run_batch(batch);
                }
                trace!(stream = worker.ctx.stream_id, "Worker exiting");
            })
            .map_err(|e| ArcheError::resource(format!("cannot spawn stream worker: {}", e)))?;

        Ok(Self {
            stream_id,
            sender: Some(sender),
            worker: Some(worker),
        })
    }
}

impl StreamBackend for CpuStream {
    fn submit(&self, batch: CommandBatch) -> Result<()> {
        let sender = self
            .sender
            .as_ref()
            .ok_or_else(|| ArcheError::state("stream worker has stopped"))?;
        sender
            .send(batch)
            .map_err(|_| ArcheError::lost(format!("stream {} worker has exited", self.stream_id)))
    }
}

impl Drop for CpuStream {
    fn drop(&mut self) {
        // Closing the channel lets the worker drain and exit.
        drop(self.sender.take());
        if let Some(worker) = self.worker.take() {
            if worker.join().is_err() {
                warn!(stream = self.stream_id, "Stream worker panicked");
            }
        }
    }
}

struct Worker {
    ctx: StreamContext,
}

impl Worker {
    fn run_batch(&self, batch: CommandBatch) {
        let timeline = &self.ctx.timeline;
        if let Some(fault) = timeline.fault() {
            debug!(stream = self.ctx.stream_id, seq = batch.seq, %fault, "Skipping batch after fault");
            timeline.fail(batch.seq, fault);
            return;
        }

        for cmd in &batch.commands {
            let start = Instant::now();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.execute(cmd)))
                .unwrap_or_else(|payload| Err(ArcheError::lost(panic_message(payload))));

            if let Err(e) = outcome {
                error!(
                    stream = self.ctx.stream_id,
                    seq = batch.seq,
                    command = %cmd.name(),
                    "Command failed: {}",
                    e
                );
                timeline.fail(batch.seq, format!("{} failed: {}", cmd.name(), e));
                return;
            }

            self.ctx.capture.record_span(
                self.ctx.stream_id,
                cmd.name(),
                category::EXECUTE,
                start,
                start.elapsed(),
                span_args(cmd).with_seq(batch.seq),
            );
            trace!(stream = self.ctx.stream_id, seq = batch.seq, command = %cmd.name(), "Executed");
        }

        timeline.complete(batch.seq);
    }

    fn execute(&self, cmd: &Command) -> Result<()> {
        match cmd.op() {
            CommandOp::CopyIn { dst, src } => {
                let buffer = CpuBuffer::of(dst)?;
                let mut data = buffer.lock();
                src.with_bytes(|bytes| {
                    let window = window_mut(&mut data, dst, bytes.len())?;
                    window.copy_from_slice(bytes);
                    Ok(())
                })
            }
            CommandOp::CopyOut { src, dst } => {
                let buffer = CpuBuffer::of(src)?;
                let data = buffer.lock();
                let window = window(&data, src, dst.size_bytes())?;
                dst.write_bytes(0, window);
                Ok(())
            }
            CommandOp::CopyBuffer { src, dst } => copy_buffer(src, dst),
            CommandOp::Launch(launch) => run_launch(launch),
            CommandOp::SampleCounter { counter, index } => sample(counter, *index),
        }
    }
}

fn span_args(cmd: &Command) -> TraceArgs {
    match cmd.op() {
        CommandOp::CopyIn { .. } => TraceArgs::transfer("host_to_device", cmd.transfer_bytes()),
        CommandOp::CopyOut { .. } => TraceArgs::transfer("device_to_host", cmd.transfer_bytes()),
        CommandOp::CopyBuffer { .. } => {
            TraceArgs::transfer("device_to_device", cmd.transfer_bytes())
        }
        CommandOp::Launch(launch) => TraceArgs::launch(
            launch.grid,
            launch.group,
            launch.args.len(),
            launch.kernel.lib_name(),
        ),
        CommandOp::SampleCounter { index, .. } => TraceArgs::sample(*index),
    }
}

fn sample(counter: &Counter, index: u32) -> Result<()> {
    if !counter.native().as_any().is::<CpuCounter>() {
        return Err(ArcheError::argument(format!(
            "counter {} was not created by the host interpreter",
            counter.id()
        )));
    }
    counter.record(index, counter.epoch().elapsed().as_nanos() as u64);
    Ok(())
}

fn bounds(view: &BufferView, len: usize) -> Result<std::ops::Range<usize>> {
    let start = view.offset() as usize;
    if len as u64 > view.len() {
        return Err(ArcheError::size_mismatch(
            format!("window of buffer {}", view.buffer().id()),
            len as u64,
            view.len(),
        ));
    }
    Ok(start..start + len)
}

fn window<'d>(data: &'d [u8], view: &BufferView, len: usize) -> Result<&'d [u8]> {
    let range = bounds(view, len)?;
    let available = data.len() as u64;
    data.get(range)
        .ok_or_else(|| ArcheError::size_mismatch("host buffer", view.offset() + len as u64, available))
}

fn window_mut<'d>(data: &'d mut [u8], view: &BufferView, len: usize) -> Result<&'d mut [u8]> {
    let range = bounds(view, len)?;
    let available = data.len() as u64;
    data.get_mut(range)
        .ok_or_else(|| ArcheError::size_mismatch("host buffer", view.offset() + len as u64, available))
}

fn copy_buffer(src: &BufferView, dst: &BufferView) -> Result<()> {
    let from = CpuBuffer::of(src)?;
    let to = CpuBuffer::of(dst)?;
    let len = src.len() as usize;

    if from.store_id() == to.store_id() {
        let mut data = from.lock();
        let source = bounds(src, len)?;
        let target = bounds(dst, len)?;
        if source.end > data.len() || target.end > data.len() {
            return Err(ArcheError::size_mismatch(
                "host buffer",
                source.end.max(target.end) as u64,
                data.len() as u64,
            ));
        }
        data.copy_within(source, target.start);
        return Ok(());
    }

    let (first, mut second) = if from.store_id() < to.store_id() {
        (from.lock(), to.lock())
    } else {
        let second = to.lock();
        (from.lock(), second)
    };
    let source = window(&first, src, len)?;
    let target = window_mut(&mut second, dst, len)?;
    target.copy_from_slice(source);
    Ok(())
}

fn run_launch(launch: &Launch) -> Result<()> {
    let kernel = launch
        .kernel
        .native()
        .as_any()
        .downcast_ref::<CpuKernel>()
        .ok_or_else(|| {
            ArcheError::argument(format!(
                "kernel '{}' was not compiled by the host interpreter",
                launch.kernel.entry()
            ))
        })?;

    // Every distinct buffer is locked once, in store order.
    let mut natives: Vec<&CpuBuffer> = Vec::new();
    for arg in &launch.args {
        if let Argument::Buffer(view) = arg {
            let native = CpuBuffer::of(view)?;
            if !natives.iter().any(|n| n.store_id() == native.store_id()) {
                natives.push(native);
            }
        }
    }
    natives.sort_by_key(|n| n.store_id());
    let mut guards: Vec<MutexGuard<'_, Vec<u8>>> = natives.iter().map(|n| n.lock()).collect();

    let mut slots = Vec::with_capacity(launch.args.len());
    for arg in &launch.args {
        slots.push(match arg {
            Argument::Buffer(view) => {
                let native = CpuBuffer::of(view)?;
                let store = natives
                    .iter()
                    .position(|n| n.store_id() == native.store_id())
                    .ok_or_else(|| ArcheError::state("launch buffer not locked"))?;
                ArgSlot::Buffer {
                    store,
                    offset: view.offset() as usize,
                    len: view.len() as usize,
                }
            }
            Argument::Bytes(bytes) => ArgSlot::Bytes(bytes.clone()),
        });
    }

    let stores = guards.iter_mut().map(|g| &mut **g).collect();
    let mut memory = LaunchMemory::new(stores, slots)
        .map_err(|e| ArcheError::dispatch(format!("kernel '{}': {}", kernel.entry(), e)))?;
    kernel.run(launch.grid.to_array(), &mut memory)
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        format!("interpreter panicked: {}", msg)
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        format!("interpreter panicked: {}", msg)
    } else {
        "interpreter panicked".to_string()
    }
}
