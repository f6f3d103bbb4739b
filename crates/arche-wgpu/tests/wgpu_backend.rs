//! WebGPU backend integration tests.
//!
//! These tests require GPU hardware and the `wgpu-tests` feature.
//! Run with: cargo test -p arche-wgpu --features wgpu-tests -- --ignored

#![cfg(feature = "wgpu-tests")]

use arche_core::backend::DeviceProvider;
use arche_core::{ArcheError, Backend, Device, DeviceConfig, DeviceKind, HostArray};
use arche_wgpu::WgpuProvider;

const SCALE: &str = r#"
@group(0) @binding(0) var<storage, read_write> data: array<f32>;

@compute @workgroup_size(64)
fn scale(@builtin(global_invocation_id) id: vec3<u32>) {
    if id.x < arrayLength(&data) {
        data[id.x] = data[id.x] * 2.0;
    }
}
"#;

const COPY_ACROSS: &str = r#"
@group(0) @binding(0) var<storage, read> src: array<u32>;
@group(0) @binding(1) var<storage, read_write> dst: array<u32>;

@compute @workgroup_size(4)
fn copy_across(@builtin(global_invocation_id) id: vec3<u32>) {
    dst[id.x] = src[id.x];
}
"#;

/// Helper to open a wgpu device if one is present.
fn wgpu_device() -> Option<Device> {
    if !arche_wgpu::is_wgpu_available() {
        eprintln!("Skipping test: WebGPU not available");
        return None;
    }
    let providers: Vec<Box<dyn DeviceProvider>> = vec![Box::new(WgpuProvider::new())];
    let config = DeviceConfig::new(DeviceKind::Any).with_backends(&[Backend::Wgpu]);
    Some(Device::create(&providers, &config).expect("Failed to open device"))
}

#[test]
#[ignore] // Requires GPU
fn test_wgpu_device_creation() {
    let Some(device) = wgpu_device() else { return };
    assert_eq!(device.backend(), Backend::Wgpu);
    assert!(device.limits().max_workgroups_per_dimension > 0);
}

#[test]
#[ignore] // Requires GPU
fn test_wgpu_scale_round_trip() {
    let Some(device) = wgpu_device() else { return };
    let stream = device.create_stream().unwrap();
    let kernel = device.create_kernel(SCALE, "scale").unwrap();

    let input: Vec<f32> = (1..=100).map(|v| v as f32).collect();
    let output = HostArray::zeros::<f32>(100);
    let buffer = device.create_buffer_for::<f32>(100).unwrap();

    stream
        .dispatch([
            buffer.copy_from(&HostArray::from_slice(&input)).unwrap(),
            kernel
                .launch_thread_groups([2, 1, 1], [64, 1, 1], &[&buffer])
                .unwrap(),
            buffer.copy_to(&output).unwrap(),
        ])
        .unwrap();
    stream.synchronize().unwrap();

    let expected: Vec<f32> = input.iter().map(|v| v * 2.0).collect();
    assert_eq!(output.to_vec::<f32>().unwrap(), expected);
}

#[test]
#[ignore] // Requires GPU
fn test_wgpu_invalid_shader_is_compilation_error() {
    let Some(device) = wgpu_device() else { return };
    let err = device.create_kernel("fn broken( {", "main").unwrap_err();
    assert!(matches!(err, ArcheError::CompilationError { .. }));
}

#[test]
#[ignore] // Requires GPU
fn test_wgpu_unaligned_copy_rejected() {
    let Some(device) = wgpu_device() else { return };
    let stream = device.create_stream().unwrap();
    let buffer = device.create_buffer(6).unwrap();
    let err = stream
        .dispatch([buffer
            .copy_from(&HostArray::from_slice(&[1u8, 2, 3]))
            .unwrap()])
        .unwrap_err();
    assert!(matches!(err, ArcheError::InvalidArgument(_)));
    assert_eq!(stream.submitted_marker(), 0);

    // The rejected batch leaves the device usable.
    assert!(!device.is_lost());
    let aligned = device.create_buffer_for::<u32>(2).unwrap();
    let output = HostArray::zeros::<u32>(2);
    stream
        .dispatch([
            aligned.copy_from(&HostArray::from_slice(&[3u32, 4])).unwrap(),
            aligned.copy_to(&output).unwrap(),
        ])
        .unwrap();
    stream.synchronize().unwrap();
    assert_eq!(output.to_vec::<u32>().unwrap(), vec![3, 4]);
}

#[test]
#[ignore] // Requires GPU
fn test_wgpu_conflicting_binding_rejected() {
    let Some(device) = wgpu_device() else { return };
    let kernel = device.create_kernel(COPY_ACROSS, "copy_across").unwrap();
    let buffer = device.create_buffer_for::<u32>(4).unwrap();
    let err = kernel
        .launch_thread_groups([1, 1, 1], [4, 1, 1], &[&buffer, &buffer])
        .unwrap_err();
    assert!(matches!(err, ArcheError::InvalidArgument(_)));
    assert!(!device.is_lost());
}

#[test]
#[ignore] // Requires GPU
fn test_wgpu_counter_samples() {
    let Some(device) = wgpu_device() else { return };
    let counter = match device.create_counter(2) {
        Ok(counter) => counter,
        Err(ArcheError::BackendUnavailable(_)) => {
            eprintln!("Skipping test: adapter has no timestamp queries");
            return;
        }
        Err(e) => panic!("unexpected error: {e}"),
    };
    let stream = device.create_stream().unwrap();
    let kernel = device.create_kernel(SCALE, "scale").unwrap();
    let buffer = device.create_buffer_for::<f32>(256).unwrap();

    stream
        .dispatch([
            counter.sample(0).unwrap(),
            kernel
                .launch_thread_groups([4, 1, 1], [64, 1, 1], &[&buffer])
                .unwrap(),
            counter.sample(1).unwrap(),
        ])
        .unwrap();
    stream.synchronize().unwrap();

    assert!(counter.timestamp(0).is_some());
    assert!(counter.elapsed_between(0, 1).is_ok());
    assert_eq!(stream.metrics().counter_samples, 2);
}
