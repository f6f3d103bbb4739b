//! Streams recorded into wgpu command encoders.
//!
//! Each batch becomes one command buffer submitted to the device queue, so
//! batches of a stream run in order. Encoding runs inside a validation
//! error scope: a batch the driver rejects is never submitted and fails
//! `dispatch` with `InvalidArgument`, leaving the device usable.
//!
//! `copy_to` results and counter samples go through mappable staging
//! buffers and reach the host when the batch is retired, which happens on
//! the next submit (if the GPU is done by then) or on `synchronize`.

use std::num::NonZeroU64;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};
use wgpu::util::DeviceExt;

use arche_core::backend::{CommandBatch, StreamBackend, StreamContext};
use arche_core::buffer::BufferView;
use arche_core::command::{Argument, CommandOp, Launch};
use arche_core::counter::Counter;
use arche_core::error::{ArcheError, Result};
use arche_core::host::HostArray;
use arche_core::trace::{category, TraceArgs};

use crate::adapter::WgpuShared;
use crate::counter::{ticks_to_nanos, WgpuCounter, SAMPLE_SIZE};
use crate::memory::{Readback, WgpuBuffer, COPY_ALIGNMENT};
use crate::shader::WgpuKernel;

enum Delivery {
    Host {
        readback: Readback,
        dst: HostArray,
    },
    Sample {
        readback: Readback,
        counter: Counter,
        index: u32,
    },
}

impl Delivery {
    fn readback(&self) -> &Readback {
        match self {
            Delivery::Host { readback, .. } | Delivery::Sample { readback, .. } => readback,
        }
    }

    fn deliver(&self, bytes: &[u8], period: f32) -> Result<()> {
        match self {
            Delivery::Host { dst, .. } => dst.write_bytes(0, bytes),
            Delivery::Sample { counter, index, .. } => {
                let nanos = ticks_to_nanos(bytes, period).ok_or_else(|| {
                    ArcheError::lost(format!("timestamp {} resolved to {} bytes", index, bytes.len()))
                })?;
                counter.record(*index, nanos);
            }
        }
        Ok(())
    }
}

struct InFlight {
    seq: u64,
    commands: usize,
    submitted_at: Instant,
    done: Arc<AtomicBool>,
    deliveries: Vec<Delivery>,
}

/// A stream on a wgpu device.
pub struct WgpuStream {
    shared: Arc<WgpuShared>,
    ctx: StreamContext,
    in_flight: Mutex<Vec<InFlight>>,
}

impl WgpuStream {
    /// Create a stream over `shared`.
    pub fn new(shared: Arc<WgpuShared>, ctx: StreamContext) -> Self {
        Self {
            shared,
            ctx,
            in_flight: Mutex::new(Vec::new()),
        }
    }

    fn encode(&self, batch: &CommandBatch) -> Result<(wgpu::CommandBuffer, Vec<Delivery>)> {
        let device = &self.shared.device;
        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("Arche Batch"),
        });
        let mut deliveries = Vec::new();

        for cmd in &batch.commands {
            match cmd.op() {
                CommandOp::CopyIn { dst, src } => {
                    let len = src.size_bytes() as u64;
                    check_copy("copy_from", dst, len)?;
                    let target = WgpuBuffer::of(dst)?;
                    // `src` is the snapshot taken by dispatch.
                    let staging = src.with_bytes(|bytes| {
                        device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                            label: Some("Arche Upload"),
                            contents: bytes,
                            usage: wgpu::BufferUsages::COPY_SRC,
                        })
                    });
                    encoder.copy_buffer_to_buffer(&staging, 0, target.inner(), dst.offset(), len);
                }
                CommandOp::CopyOut { src, dst } => {
                    let len = dst.size_bytes() as u64;
                    check_copy("copy_to", src, len)?;
                    let source = WgpuBuffer::of(src)?;
                    let readback = Readback::new(&self.shared, len);
                    encoder.copy_buffer_to_buffer(
                        source.inner(),
                        src.offset(),
                        readback.inner(),
                        0,
                        len,
                    );
                    deliveries.push(Delivery::Host {
                        readback,
                        dst: dst.clone(),
                    });
                }
                CommandOp::CopyBuffer { src, dst } => {
                    let len = src.len();
                    check_copy("copy_buffer", src, len)?;
                    check_copy("copy_buffer", dst, len)?;
                    let from = WgpuBuffer::of(src)?;
                    let to = WgpuBuffer::of(dst)?;
                    if len == 0 {
                        continue;
                    }
                    if src.buffer().ptr_eq(dst.buffer()) {
                        // Source and destination of a copy must differ.
                        let bounce = device.create_buffer(&wgpu::BufferDescriptor {
                            label: Some("Arche Bounce"),
                            size: len,
                            usage: wgpu::BufferUsages::COPY_SRC | wgpu::BufferUsages::COPY_DST,
                            mapped_at_creation: false,
                        });
                        encoder.copy_buffer_to_buffer(from.inner(), src.offset(), &bounce, 0, len);
                        encoder.copy_buffer_to_buffer(&bounce, 0, to.inner(), dst.offset(), len);
                    } else {
                        encoder.copy_buffer_to_buffer(
                            from.inner(),
                            src.offset(),
                            to.inner(),
                            dst.offset(),
                            len,
                        );
                    }
                }
                CommandOp::Launch(launch) => self.encode_launch(&mut encoder, launch)?,
                CommandOp::SampleCounter { counter, index } => {
                    let queries = WgpuCounter::of(counter)?.query_set();
                    encoder.write_timestamp(queries, *index);
                    let resolve = device.create_buffer(&wgpu::BufferDescriptor {
                        label: Some("Arche Timestamp Resolve"),
                        size: SAMPLE_SIZE,
                        usage: wgpu::BufferUsages::QUERY_RESOLVE | wgpu::BufferUsages::COPY_SRC,
                        mapped_at_creation: false,
                    });
                    encoder.resolve_query_set(queries, *index..*index + 1, &resolve, 0);
                    let readback = Readback::new(&self.shared, SAMPLE_SIZE);
                    encoder.copy_buffer_to_buffer(&resolve, 0, readback.inner(), 0, SAMPLE_SIZE);
                    deliveries.push(Delivery::Sample {
                        readback,
                        counter: counter.clone(),
                        index: *index,
                    });
                }
            }
        }

        Ok((encoder.finish(), deliveries))
    }

    fn encode_launch(&self, encoder: &mut wgpu::CommandEncoder, launch: &Launch) -> Result<()> {
        let device = &self.shared.device;
        let kernel = launch
            .kernel
            .native()
            .as_any()
            .downcast_ref::<WgpuKernel>()
            .ok_or_else(|| {
                ArcheError::argument(format!(
                    "kernel '{}' was not compiled by the wgpu backend",
                    launch.kernel.entry()
                ))
            })?;

        // Inline arguments get their own small uniform-capable buffers.
        let mut inline = Vec::with_capacity(launch.args.len());
        for arg in &launch.args {
            inline.push(match arg {
                Argument::Bytes(bytes) => {
                    let mut padded = bytes.to_vec();
                    padded.resize(bytes.len().div_ceil(16).max(1) * 16, 0);
                    Some(device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
                        label: Some("Arche Inline Argument"),
                        contents: &padded,
                        usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::STORAGE,
                    }))
                }
                Argument::Buffer(_) => None,
            });
        }

        let mut groups = Vec::with_capacity(kernel.group_layouts().len());
        for (group, layout) in kernel.group_layouts().iter().enumerate() {
            let mut entries = Vec::new();
            for (index, (arg, info)) in launch
                .args
                .iter()
                .zip(&kernel.signature().arguments)
                .enumerate()
            {
                if info.group as usize != group {
                    continue;
                }
                let resource = match (arg, &inline[index]) {
                    (Argument::Buffer(view), _) => {
                        wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                            buffer: WgpuBuffer::of(view)?.inner(),
                            offset: view.offset(),
                            size: NonZeroU64::new(view.len()),
                        })
                    }
                    (Argument::Bytes(_), Some(buffer)) => buffer.as_entire_binding(),
                    (Argument::Bytes(_), None) => {
                        return Err(ArcheError::state("inline argument has no buffer"))
                    }
                };
                entries.push(wgpu::BindGroupEntry {
                    binding: info.binding,
                    resource,
                });
            }
            groups.push(device.create_bind_group(&wgpu::BindGroupDescriptor {
                label: Some("Arche Bind Group"),
                layout,
                entries: &entries,
            }));
        }

        let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
            label: Some(launch.kernel.entry()),
            timestamp_writes: None,
        });
        pass.set_pipeline(kernel.pipeline());
        for (index, group) in groups.iter().enumerate() {
            pass.set_bind_group(index as u32, group, &[]);
        }
        pass.dispatch_workgroups(launch.grid.x, launch.grid.y, launch.grid.z);
        trace!(
            stream = self.ctx.stream_id,
            kernel = %launch.kernel.entry(),
            grid = %launch.grid,
            "Encoded dispatch"
        );
        Ok(())
    }

    /// Retire finished batches in order; stops at the first unfinished one.
    fn retire(&self) {
        let mut in_flight = self.in_flight.lock();
        let timeline = &self.ctx.timeline;

        let mut finished = 0;
        for batch in in_flight.iter() {
            if let Some(fault) = self.shared.fault() {
                timeline.fail(batch.seq, fault);
                finished += 1;
                continue;
            }
            let ready = batch.done.load(Ordering::Acquire)
                && batch.deliveries.iter().all(|d| d.readback().is_ready());
            if !ready {
                break;
            }

            let period = self.shared.queue.get_timestamp_period();
            let mut failure = None;
            for delivery in &batch.deliveries {
                let delivered = match delivery.readback().read() {
                    Some(bytes) => bytes.and_then(|bytes| delivery.deliver(&bytes, period)),
                    None => Err(ArcheError::lost("readback was not mapped")),
                };
                if let Err(e) = delivered {
                    failure = Some(e.to_string());
                }
            }
            match failure {
                Some(reason) => timeline.fail(batch.seq, reason),
                None => {
                    self.ctx.capture.record_span(
                        self.ctx.stream_id,
                        "gpu_batch",
                        category::EXECUTE,
                        batch.submitted_at,
                        batch.submitted_at.elapsed(),
                        TraceArgs::default().with_seq(batch.seq),
                    );
                    timeline.complete(batch.seq);
                }
            }
            trace!(
                stream = self.ctx.stream_id,
                seq = batch.seq,
                commands = batch.commands,
                "Retired batch"
            );
            finished += 1;
        }
        in_flight.drain(..finished);
    }
}

impl StreamBackend for WgpuStream {
    fn submit(&self, batch: CommandBatch) -> Result<()> {
        if let Some(fault) = self.shared.fault() {
            return Err(ArcheError::lost(fault));
        }

        let (encoded, error) = self.shared.validated(|| self.encode(&batch));
        let (buffer, deliveries) = encoded?;
        if let Some(error) = error {
            debug!(stream = self.ctx.stream_id, seq = batch.seq, "Driver rejected batch: {}", error);
            return Err(ArcheError::argument(format!(
                "batch rejected by the wgpu backend: {}",
                error
            )));
        }
        let done = Arc::new(AtomicBool::new(false));
        let submitted_at = Instant::now();

        self.shared.queue.submit(Some(buffer));
        let flag = Arc::clone(&done);
        self.shared
            .queue
            .on_submitted_work_done(move || flag.store(true, Ordering::Release));
        for delivery in &deliveries {
            delivery.readback().request_map();
        }

        self.in_flight.lock().push(InFlight {
            seq: batch.seq,
            commands: batch.commands.len(),
            submitted_at,
            done,
            deliveries,
        });

        self.shared.poll();
        self.retire();
        Ok(())
    }

    fn synchronize(&self, target: u64) -> Result<()> {
        let waiting = self
            .in_flight
            .lock()
            .iter()
            .any(|b| b.seq <= target);
        if waiting {
            self.shared.wait();
        }
        self.retire();
        debug!(stream = self.ctx.stream_id, seq = target, "wgpu stream drained");
        Ok(())
    }
}

impl Drop for WgpuStream {
    fn drop(&mut self) {
        if self.in_flight.lock().is_empty() {
            return;
        }
        self.shared.wait();
        self.retire();
        let left = self.in_flight.lock().len();
        if left > 0 {
            warn!(stream = self.ctx.stream_id, left, "Batches left unretired on drop");
        }
    }
}

fn check_copy(op: &str, view: &BufferView, len: u64) -> Result<()> {
    if view.offset() % COPY_ALIGNMENT != 0 || len % COPY_ALIGNMENT != 0 {
        return Err(ArcheError::argument(format!(
            "{} on the wgpu backend needs offset ({}) and length ({}) to be multiples of {} bytes",
            op, view.offset(), len, COPY_ALIGNMENT
        )));
    }
    if len > view.len() {
        return Err(ArcheError::size_mismatch(op, len, view.len()));
    }
    Ok(())
}
