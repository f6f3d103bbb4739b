//! Debug capture tests on the host device.

#![cfg(feature = "cpu")]

use arche::prelude::*;
use arche::trace::category;
use arche::backend::{
    BufferBackend, CommandBatch, CounterBackend, DeviceBackend, DeviceProvider, KernelBackend,
    KernelSource, StreamBackend, StreamContext,
};
use arche::{Backend, CaptureDestination, CpuProvider, DeviceInfo};
use std::sync::Arc;

const TWICE: &str = r#"
@group(0) @binding(0) var<storage, read_write> data: array<f32>;

@compute @workgroup_size(4)
fn twice(@builtin(global_invocation_id) id: vec3<u32>) {
    data[id.x] = data[id.x] * 2.0;
}
"#;

struct Fixture {
    device: Device,
    stream: Stream,
    kernel: Kernel,
    buffer: Buffer,
    output: HostArray,
}

impl Fixture {
    fn new(config: DeviceConfig) -> Self {
        let device = arche::create_device_with(&config).expect("Failed to create CPU device");
        let stream = device.create_stream().unwrap();
        let kernel = device.create_kernel(TWICE, "twice").unwrap();
        let buffer = device.create_buffer_for::<f32>(4).unwrap();
        Self {
            device,
            stream,
            kernel,
            buffer,
            output: HostArray::zeros::<f32>(4),
        }
    }

    fn cpu() -> Self {
        Self::new(DeviceConfig::new(DeviceKind::Cpu))
    }

    fn run(&self, stream: &Stream) {
        stream
            .dispatch([
                self.buffer
                    .copy_from(&HostArray::from_slice(&[1.0f32, 2.0, 3.0, 4.0]))
                    .unwrap(),
                self.kernel
                    .launch_thread_groups([1, 1, 1], [4, 1, 1], &[&self.buffer])
                    .unwrap(),
                self.buffer.copy_to(&self.output).unwrap(),
            ])
            .unwrap();
        stream.synchronize().unwrap();
    }
}

#[test]
fn test_capture_state_machine() {
    let fx = Fixture::cpu();
    let capture = fx.device.debug_capture().unwrap();
    let scope = capture
        .create_scope("frame", CaptureOptions::developer_tools())
        .unwrap();

    assert!(matches!(
        scope.stop_debug_capture(),
        Err(ArcheError::InvalidState(_))
    ));
    assert!(matches!(scope.mark_begin(), Err(ArcheError::InvalidState(_))));

    scope.start_debug_capture().unwrap();
    assert!(scope.is_capturing());
    assert!(capture.is_capturing());
    assert!(matches!(
        scope.start_debug_capture(),
        Err(ArcheError::InvalidState(_))
    ));

    assert!(matches!(scope.mark_end(), Err(ArcheError::InvalidState(_))));
    scope.mark_begin().unwrap();
    assert!(matches!(scope.mark_begin(), Err(ArcheError::InvalidState(_))));
    scope.mark_end().unwrap();

    let summary = scope.stop_debug_capture().unwrap();
    assert_eq!(summary.label, "frame");
    assert!(summary.path.is_none());
    assert!(!scope.is_capturing());

    // Reusable by default.
    scope.start_debug_capture().unwrap();
    scope.stop_debug_capture().unwrap();
    assert_eq!(scope.capture_count(), 2);
}

#[test]
fn test_capture_records_stream_activity() {
    let fx = Fixture::cpu();
    let scope = fx
        .device
        .debug_capture()
        .unwrap()
        .create_scope("twice", CaptureOptions::developer_tools())
        .unwrap();

    scope.start_debug_capture().unwrap();
    fx.run(&fx.stream);
    let summary = scope.stop_debug_capture().unwrap();

    let trace = scope.last_trace().expect("trace kept in memory");
    assert_eq!(summary.events, trace.events.len());
    assert_eq!(trace.events_in(category::TRANSFER).count(), 2);
    assert_eq!(trace.events_in(category::KERNEL).count(), 1);
    assert_eq!(trace.events_in(category::EXECUTE).count(), 3);
    assert!(trace.events_in(category::SYNC).count() <= 1);
    assert!(trace.events.iter().all(|e| e.pid == fx.device.id()));

    let launch = trace
        .events_in(category::KERNEL)
        .next()
        .expect("kernel event");
    assert_eq!(launch.name, "twice");
    assert_eq!(launch.args.grid, Some([1, 1, 1]));
}

#[test]
fn test_capture_is_a_pure_observer() {
    let fx = Fixture::cpu();
    fx.run(&fx.stream);
    let plain = fx.output.to_vec::<f32>().unwrap();

    let scope = fx
        .device
        .debug_capture()
        .unwrap()
        .create_scope("observed", CaptureOptions::developer_tools())
        .unwrap();
    scope.start_debug_capture().unwrap();
    fx.run(&fx.stream);
    scope.stop_debug_capture().unwrap();

    assert_eq!(fx.output.to_vec::<f32>().unwrap(), plain);
    assert_eq!(plain, vec![2.0, 4.0, 6.0, 8.0]);
}

#[test]
fn test_nothing_recorded_outside_capture() {
    let fx = Fixture::cpu();
    let scope = fx
        .device
        .debug_capture()
        .unwrap()
        .create_scope("idle", CaptureOptions::developer_tools())
        .unwrap();

    fx.run(&fx.stream);
    scope.start_debug_capture().unwrap();
    let summary = scope.stop_debug_capture().unwrap();
    assert_eq!(summary.events, 0);
}

#[test]
fn test_marker_trigger() {
    let fx = Fixture::cpu();
    let scope = fx
        .device
        .debug_capture()
        .unwrap()
        .create_scope(
            "markers",
            CaptureOptions::developer_tools().with_trigger(CaptureTrigger::Markers),
        )
        .unwrap();

    scope.start_debug_capture().unwrap();
    fx.run(&fx.stream);
    scope.mark_begin_named("second").unwrap();
    fx.run(&fx.stream);
    scope.mark_end().unwrap();
    scope.stop_debug_capture().unwrap();

    let trace = scope.last_trace().unwrap();
    assert_eq!(trace.events_in(category::KERNEL).count(), 1);

    let markers: Vec<_> = trace.events_in(category::MARKER).collect();
    assert_eq!(markers.len(), 2);
    assert_eq!(markers[0].ph, "B");
    assert_eq!(markers[1].ph, "E");
    assert!(markers.iter().all(|m| m.name == "second"));
}

#[test]
fn test_stream_scope_records_one_stream() {
    let fx = Fixture::cpu();
    let other = fx.device.create_stream().unwrap();
    let scope = fx
        .device
        .debug_capture()
        .unwrap()
        .create_stream_scope(&fx.stream, "one", CaptureOptions::developer_tools())
        .unwrap();
    assert_eq!(scope.stream_id(), Some(fx.stream.id()));

    scope.start_debug_capture().unwrap();
    fx.run(&other);
    fx.run(&fx.stream);
    scope.stop_debug_capture().unwrap();

    let trace = scope.last_trace().unwrap();
    assert!(!trace.events.is_empty());
    assert!(trace.events.iter().all(|e| e.tid == fx.stream.id()));
    assert_eq!(trace.events_in(category::KERNEL).count(), 1);
}

#[test]
fn test_stream_scope_rejects_foreign_stream() {
    let fx = Fixture::cpu();
    let other = arche::create_device(DeviceKind::Cpu).unwrap();
    let foreign = other.create_stream().unwrap();
    let result = fx.device.debug_capture().unwrap().create_stream_scope(
        &foreign,
        "foreign",
        CaptureOptions::developer_tools(),
    );
    assert!(matches!(
        result,
        Err(ArcheError::CrossDeviceReference { .. })
    ));
}

#[test]
fn test_one_capture_per_device() {
    let fx = Fixture::cpu();
    let capture = fx.device.debug_capture().unwrap();
    let first = capture
        .create_scope("first", CaptureOptions::default())
        .unwrap();
    let second = capture
        .create_scope("second", CaptureOptions::default())
        .unwrap();

    first.start_debug_capture().unwrap();
    assert!(matches!(
        second.start_debug_capture(),
        Err(ArcheError::InvalidState(_))
    ));
    assert!(!second.is_capturing());

    first.stop_debug_capture().unwrap();
    second.start_debug_capture().unwrap();
    second.stop_debug_capture().unwrap();
}

#[test]
fn test_single_use_scope() {
    let fx = Fixture::cpu();
    let scope = fx
        .device
        .debug_capture()
        .unwrap()
        .create_scope("once", CaptureOptions::developer_tools().single_use())
        .unwrap();

    scope.start_debug_capture().unwrap();
    scope.stop_debug_capture().unwrap();
    assert!(matches!(
        scope.start_debug_capture(),
        Err(ArcheError::InvalidState(_))
    ));
}

#[test]
fn test_trace_document_written() {
    let dir = tempfile::tempdir().unwrap();
    let fx = Fixture::new(DeviceConfig::new(DeviceKind::Cpu).with_capture_dir(dir.path()));

    let options = CaptureOptions::trace_document(None);
    assert!(matches!(
        options.destination,
        CaptureDestination::TraceDocument { path: None }
    ));
    let scope = fx
        .device
        .debug_capture()
        .unwrap()
        .create_scope("saxpy_run", options)
        .unwrap();

    scope.start_debug_capture().unwrap();
    scope.mark_begin().unwrap();
    fx.run(&fx.stream);
    scope.mark_end().unwrap();
    let summary = scope.stop_debug_capture().unwrap();

    let path = summary.path.expect("trace document path");
    assert_eq!(path, dir.path().join("saxpy_run.trace.json"));

    let text = std::fs::read_to_string(&path).unwrap();
    let json: serde_json::Value = serde_json::from_str(&text).unwrap();
    let events = json["traceEvents"].as_array().expect("traceEvents array");

    let dispatched = |cat: &str, name: &str| {
        events
            .iter()
            .filter(|e| e["cat"] == cat && e["name"] == name)
            .count()
    };
    assert_eq!(dispatched("transfer", "copy_from"), 1);
    assert_eq!(dispatched("transfer", "copy_to"), 1);
    assert_eq!(dispatched("kernel", "twice"), 1);
    assert_eq!(dispatched("execute", "twice"), 1);
    assert!(events.iter().any(|e| e["cat"] == "marker" && e["ph"] == "B"));
    assert!(events.iter().any(|e| e["cat"] == "marker" && e["ph"] == "E"));
}

#[test]
fn test_trace_document_explicit_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("custom.json");
    let fx = Fixture::cpu();
    let scope = fx
        .device
        .debug_capture()
        .unwrap()
        .create_scope("", CaptureOptions::trace_document(Some(path.clone())))
        .unwrap();

    scope.start_debug_capture().unwrap();
    fx.run(&fx.stream);
    let summary = scope.stop_debug_capture().unwrap();

    assert_eq!(summary.path.as_deref(), Some(path.as_path()));
    assert!(path.exists());
}

/// Host backend whose streams refuse every batch.
struct RejectingProvider(CpuProvider);

struct RejectingDevice(Arc<dyn DeviceBackend>);

struct RejectingStream;

impl DeviceProvider for RejectingProvider {
    fn backend(&self) -> Backend {
        self.0.backend()
    }

    fn adapters(&self) -> Vec<DeviceInfo> {
        self.0.adapters()
    }

    fn open(&self, info: &DeviceInfo, config: &DeviceConfig) -> Result<Arc<dyn DeviceBackend>> {
        Ok(Arc::new(RejectingDevice(self.0.open(info, config)?)))
    }
}

impl DeviceBackend for RejectingDevice {
    fn info(&self) -> &DeviceInfo {
        self.0.info()
    }

    fn create_buffer(&self, size: u64, label: Option<&str>) -> Result<Arc<dyn BufferBackend>> {
        self.0.create_buffer(size, label)
    }

    fn create_stream(&self, _ctx: StreamContext) -> Result<Box<dyn StreamBackend>> {
        Ok(Box::new(RejectingStream))
    }

    fn compile_kernel(&self, source: &KernelSource<'_>) -> Result<Arc<dyn KernelBackend>> {
        self.0.compile_kernel(source)
    }

    fn create_counter(&self, sample_count: u32) -> Result<Arc<dyn CounterBackend>> {
        self.0.create_counter(sample_count)
    }

    fn wait_idle(&self) -> Result<()> {
        self.0.wait_idle()
    }
}

impl StreamBackend for RejectingStream {
    fn submit(&self, batch: CommandBatch) -> Result<()> {
        Err(ArcheError::argument(format!("batch {} rejected", batch.seq)))
    }
}

#[test]
fn test_rejected_batch_not_recorded() {
    let providers: Vec<Box<dyn DeviceProvider>> =
        vec![Box::new(RejectingProvider(CpuProvider::new()))];
    let device = Device::create(&providers, &DeviceConfig::new(DeviceKind::Cpu)).unwrap();
    let stream = device.create_stream().unwrap();
    let buffer = device.create_buffer_for::<f32>(4).unwrap();
    let scope = device
        .debug_capture()
        .unwrap()
        .create_scope("rejected", CaptureOptions::developer_tools())
        .unwrap();

    scope.start_debug_capture().unwrap();
    let err = stream
        .dispatch([
            buffer.copy_from(&HostArray::zeros::<f32>(4)).unwrap(),
            buffer.copy_to(&HostArray::zeros::<f32>(4)).unwrap(),
        ])
        .unwrap_err();
    assert!(matches!(err, ArcheError::InvalidArgument(_)));
    let summary = scope.stop_debug_capture().unwrap();

    assert_eq!(summary.events, 0);
    assert_eq!(stream.submitted_marker(), 0);
    assert_eq!(stream.metrics().batches, 0);
    assert!(!device.is_lost());
}
