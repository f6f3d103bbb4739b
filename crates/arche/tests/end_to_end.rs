//! End-to-end tests on the host device.

#![cfg(feature = "cpu")]

use arche::prelude::*;
use arche::{StreamMetrics, StreamState};

const OVERWRITE_FIRST: &str = r#"
@group(0) @binding(0) var<storage, read_write> data: array<f32>;

@compute @workgroup_size(1)
fn overwrite_first() {
    data[0] = 10.0;
}
"#;

const ADD_ONE: &str = r#"
@group(0) @binding(0) var<storage, read_write> data: array<u32>;

@compute @workgroup_size(4)
fn add_one(@builtin(global_invocation_id) id: vec3<u32>) {
    if id.x < arrayLength(&data) {
        data[id.x] = data[id.x] + 1u;
    }
}
"#;

const SAXPY: &str = r#"
struct Params {
    a: f32,
    n: u32,
}

@group(0) @binding(0) var<uniform> params: Params;
@group(0) @binding(1) var<storage, read> x: array<f32>;
@group(0) @binding(2) var<storage, read_write> y: array<f32>;

@compute @workgroup_size(8)
fn saxpy(@builtin(global_invocation_id) id: vec3<u32>) {
    if id.x < params.n {
        y[id.x] = params.a * x[id.x] + y[id.x];
    }
}

@compute @workgroup_size(8)
fn clear(@builtin(global_invocation_id) id: vec3<u32>) {
    if id.x < arrayLength(&y) {
        y[id.x] = 0.0;
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

fn cpu_device() -> Device {
    arche::create_device(DeviceKind::Cpu).expect("Failed to create CPU device")
}

fn run_overwrite_first(device: &Device) -> Vec<f32> {
    let stream = device.create_stream().unwrap();
    let kernel = device
        .create_kernel(OVERWRITE_FIRST, "overwrite_first")
        .unwrap();
    let buffer = device.create_buffer_for::<f32>(10).unwrap();

    let input: Vec<f32> = (1..=10).map(|v| v as f32).collect();
    let output = HostArray::zeros::<f32>(10);

    stream
        .dispatch([
            buffer.copy_from(&HostArray::from_slice(&input)).unwrap(),
            kernel
                .launch_thread_groups([1, 1, 1], [1, 1, 1], &[&buffer])
                .unwrap(),
            buffer.copy_to(&output).unwrap(),
        ])
        .unwrap();
    stream.synchronize().unwrap();

    output.to_vec::<f32>().unwrap()
}

#[test]
fn test_overwrite_first_element() {
    let device = cpu_device();
    assert_eq!(
        run_overwrite_first(&device),
        vec![10.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0]
    );
}

#[test]
#[cfg(feature = "wgpu-tests")]
#[ignore] // Requires GPU
fn test_overwrite_first_element_gpu() {
    if !arche::availability::wgpu() {
        eprintln!("Skipping test: WebGPU not available");
        return;
    }
    let device = arche::create_device(DeviceKind::Gpu).expect("Failed to create GPU device");
    assert_eq!(
        run_overwrite_first(&device),
        vec![10.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0]
    );
}

#[test]
fn test_no_device_for_unavailable_kind() {
    let config = DeviceConfig::new(DeviceKind::Gpu).with_backends(&[Backend::Cpu]);
    let err = arche::create_device_with(&config).unwrap_err();
    assert!(matches!(err, ArcheError::NoDeviceFound(_)));
    assert!(arche::enumerate_devices(&config).is_empty());
}

#[test]
fn test_no_device_for_adapter_filter() {
    let config = DeviceConfig::new(DeviceKind::Any)
        .with_backends(&[Backend::Cpu])
        .with_adapter_name("no such adapter");
    assert!(matches!(
        arche::create_device_with(&config),
        Err(ArcheError::NoDeviceFound(_))
    ));
}

#[test]
fn test_any_falls_back_to_host() {
    let config = DeviceConfig::new(DeviceKind::Any).with_backends(&[Backend::Cpu]);
    let device = arche::create_device_with(&config).unwrap();
    assert_eq!(device.device_type(), DeviceType::Cpu);
    assert_eq!(device.backend(), Backend::Cpu);
    assert!(!device.name().is_empty());
}

#[test]
fn test_copy_round_trip() {
    let device = cpu_device();
    let stream = device.create_stream().unwrap();
    let buffer = device.create_buffer_for::<u32>(16).unwrap();

    // A prefix of the buffer round-trips exactly.
    let data: Vec<u32> = (0..12).map(|v| v * 7 + 3).collect();
    let sink = HostArray::zeros::<u32>(12);
    stream
        .dispatch([
            buffer.copy_from(&HostArray::from_slice(&data)).unwrap(),
            buffer.copy_to(&sink).unwrap(),
        ])
        .unwrap();
    stream.synchronize().unwrap();
    assert_eq!(sink.to_vec::<u32>().unwrap(), data);

    let too_long = HostArray::from_slice(&[0u32; 17]);
    assert!(matches!(
        buffer.copy_from(&too_long),
        Err(ArcheError::SizeMismatch { .. })
    ));
}

#[test]
fn test_partial_element_rejected() {
    let device = cpu_device();
    let buffer = device.create_buffer_with_stride(4, 4).unwrap();
    let err = buffer
        .copy_from(&HostArray::from_slice(&[1u8, 2, 3]))
        .unwrap_err();
    assert!(matches!(err, ArcheError::SizeMismatch { .. }));
}

#[test]
fn test_argument_count_mismatch() {
    let device = cpu_device();
    let kernel = device.create_kernel(ADD_ONE, "add_one").unwrap();
    assert_eq!(kernel.argument_count(), 1);

    let a = device.create_buffer_for::<u32>(4).unwrap();
    let b = device.create_buffer_for::<u32>(4).unwrap();

    assert!(matches!(
        kernel.launch_thread_groups([1, 1, 1], [4, 1, 1], &[]),
        Err(ArcheError::ArgumentCountMismatch {
            expected: 1,
            actual: 0,
            ..
        })
    ));
    assert!(matches!(
        kernel.launch_thread_groups([1, 1, 1], [4, 1, 1], &[&a, &b]),
        Err(ArcheError::ArgumentCountMismatch {
            expected: 1,
            actual: 2,
            ..
        })
    ));
    assert!(kernel
        .launch_thread_groups([1, 1, 1], [4, 1, 1], &[&a])
        .is_ok());
}

#[test]
fn test_invalid_dispatch_sizes() {
    let device = cpu_device();
    let kernel = device.create_kernel(ADD_ONE, "add_one").unwrap();
    let buffer = device.create_buffer_for::<u32>(4).unwrap();

    for (grid, group) in [([0, 1, 1], [4, 1, 1]), ([1, 1, 1], [4, 0, 1])] {
        assert!(matches!(
            kernel.launch_thread_groups(grid, group, &[&buffer]),
            Err(ArcheError::InvalidDispatchSize(_))
        ));
    }

    // The group must match the declared @workgroup_size.
    assert_eq!(kernel.workgroup_size(), Dim3::new(4, 1, 1));
    assert!(matches!(
        kernel.launch_thread_groups([1, 1, 1], [8, 1, 1], &[&buffer]),
        Err(ArcheError::InvalidDispatchSize(_))
    ));
}

#[test]
fn test_compile_errors() {
    let device = cpu_device();
    assert!(matches!(
        device.create_kernel("fn broken( {", "main"),
        Err(ArcheError::CompilationError { .. })
    ));
    assert!(matches!(
        device.create_kernel(ADD_ONE, "missing"),
        Err(ArcheError::EntryNotFound { .. })
    ));
    assert!(matches!(
        device.kernel_builder().source(ADD_ONE).build(),
        Err(ArcheError::InvalidConfig(_))
    ));
}

#[test]
fn test_synchronize_is_idempotent() {
    let device = cpu_device();
    let stream = device.create_stream().unwrap();

    stream.synchronize().unwrap();
    stream.synchronize().unwrap();
    assert_eq!(stream.state(), StreamState::Idle);
    assert_eq!(stream.submitted_marker(), 0);

    stream.dispatch(Vec::new()).unwrap();
    assert_eq!(stream.submitted_marker(), 0);
    assert_eq!(stream.metrics(), StreamMetrics::default());
}

#[test]
fn test_order_across_dispatch_calls() {
    let device = cpu_device();
    let stream = device.create_stream().unwrap();
    let kernel = device.create_kernel(ADD_ONE, "add_one").unwrap();
    let buffer = device.create_buffer_for::<u32>(8).unwrap();
    let output = HostArray::zeros::<u32>(8);

    stream
        .dispatch([buffer.copy_from(&HostArray::zeros::<u32>(8)).unwrap()])
        .unwrap();
    for _ in 0..5 {
        stream
            .dispatch([kernel
                .launch_thread_groups([2, 1, 1], [4, 1, 1], &[&buffer])
                .unwrap()])
            .unwrap();
    }
    stream.dispatch([buffer.copy_to(&output).unwrap()]).unwrap();
    stream.synchronize().unwrap();

    assert_eq!(output.to_vec::<u32>().unwrap(), vec![5u32; 8]);
    assert_eq!(stream.submitted_marker(), 7);
    assert_eq!(stream.completed_marker(), 7);

    let metrics = stream.metrics();
    assert_eq!(metrics.batches, 7);
    assert_eq!(metrics.launches, 5);
    assert_eq!(metrics.bytes_uploaded, 32);
    assert_eq!(metrics.bytes_downloaded, 32);
}

#[test]
fn test_uniform_and_views() {
    #[repr(C)]
    #[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
    struct Params {
        a: f32,
        n: u32,
    }

    let device = cpu_device();
    let stream = device.create_stream().unwrap();
    let kernel = device
        .kernel_builder()
        .lib_name("blas")
        .entry("saxpy")
        .source(SAXPY)
        .build()
        .unwrap();
    assert_eq!(kernel.lib_name(), "blas");
    assert_eq!(kernel.argument_count(), 3);

    let x = device.create_buffer_for::<f32>(8).unwrap();
    let y = device.create_buffer_for::<f32>(8).unwrap();
    let output = HostArray::zeros::<f32>(8);

    stream
        .dispatch([
            x.copy_from(&HostArray::from_slice(&[1.0f32; 8])).unwrap(),
            y.copy_from(&HostArray::from_slice(&[1.0f32; 8])).unwrap(),
            kernel
                .launch(
                    [1, 1, 1],
                    [8, 1, 1],
                    vec![
                        Argument::value(&Params { a: 2.0, n: 4 }),
                        x.view().into(),
                        y.view().into(),
                    ],
                )
                .unwrap(),
            y.copy_to(&output).unwrap(),
        ])
        .unwrap();
    stream.synchronize().unwrap();

    assert_eq!(
        output.to_vec::<f32>().unwrap(),
        vec![3.0, 3.0, 3.0, 3.0, 1.0, 1.0, 1.0, 1.0]
    );
}

#[test]
fn test_inline_bytes_need_read_only_argument() {
    let device = cpu_device();
    let kernel = device.create_kernel(ADD_ONE, "add_one").unwrap();
    let err = kernel
        .launch([1, 1, 1], [4, 1, 1], vec![Argument::bytes([0u8; 16])])
        .unwrap_err();
    assert!(matches!(err, ArcheError::InvalidArgument(_)));
}

#[test]
fn test_writable_binding_must_be_exclusive() {
    let device = cpu_device();
    let stream = device.create_stream().unwrap();
    let kernel = device.create_kernel(COPY_ACROSS, "copy_across").unwrap();
    let a = device.create_buffer_for::<u32>(8).unwrap();
    let b = device.create_buffer_for::<u32>(8).unwrap();

    assert!(matches!(
        kernel.launch_thread_groups([1, 1, 1], [4, 1, 1], &[&a, &a]),
        Err(ArcheError::InvalidArgument(_))
    ));
    // Views of one buffer conflict too.
    assert!(matches!(
        kernel.launch(
            [1, 1, 1],
            [4, 1, 1],
            vec![
                Argument::Buffer(a.view()),
                Argument::Buffer(a.view_range(0, 4).unwrap()),
            ],
        ),
        Err(ArcheError::InvalidArgument(_))
    ));
    assert!(!device.is_lost());

    let output = HostArray::zeros::<u32>(8);
    stream
        .dispatch([
            a.copy_from(&HostArray::from_slice(&[1u32, 2, 3, 4, 5, 6, 7, 8]))
                .unwrap(),
            kernel
                .launch_thread_groups([1, 1, 1], [4, 1, 1], &[&a, &b])
                .unwrap(),
            b.copy_to(&output).unwrap(),
        ])
        .unwrap();
    stream.synchronize().unwrap();
    assert_eq!(
        output.to_vec::<u32>().unwrap(),
        vec![1, 2, 3, 4, 0, 0, 0, 0]
    );
}

#[test]
fn test_host_source_read_at_dispatch() {
    let device = cpu_device();
    let stream = device.create_stream().unwrap();
    let buffer = device.create_buffer_for::<u32>(4).unwrap();
    let input = HostArray::from_slice(&[1u32, 2, 3, 4]);
    let output = HostArray::zeros::<u32>(4);

    let upload = buffer.copy_from(&input).unwrap();
    input.write(&[5u32, 6, 7, 8]).unwrap();
    stream
        .dispatch([upload, buffer.copy_to(&output).unwrap()])
        .unwrap();
    // Too late to reach the queued copy.
    input.write(&[9u32, 9, 9, 9]).unwrap();
    stream.synchronize().unwrap();

    assert_eq!(output.to_vec::<u32>().unwrap(), vec![5, 6, 7, 8]);
}

#[test]
fn test_unaligned_copy_on_host() {
    // Only the wgpu backend needs whole 4-byte words.
    let device = cpu_device();
    let stream = device.create_stream().unwrap();
    let buffer = device.create_buffer(6).unwrap();
    let output = HostArray::zeros::<u8>(3);

    stream
        .dispatch([
            buffer
                .view_range(3, 3)
                .unwrap()
                .copy_from(&HostArray::from_slice(&[7u8, 8, 9]))
                .unwrap(),
            buffer.view_range(3, 3).unwrap().copy_to(&output).unwrap(),
        ])
        .unwrap();
    stream.synchronize().unwrap();
    assert_eq!(output.to_vec::<u8>().unwrap(), vec![7, 8, 9]);
}

#[test]
fn test_shared_module_cache() {
    let device = cpu_device();
    let saxpy = device
        .kernel_builder()
        .lib_name("blas")
        .entry("saxpy")
        .source(SAXPY)
        .build()
        .unwrap();
    let clear = device
        .kernel_builder()
        .lib_name("blas")
        .entry("clear")
        .source(SAXPY)
        .build()
        .unwrap();

    assert_eq!(device.cached_modules(), 1);
    assert!(std::sync::Arc::ptr_eq(saxpy.module(), clear.module()));
    assert_eq!(clear.argument_count(), 1);
}

#[test]
fn test_device_to_device_copy() {
    let device = cpu_device();
    let stream = device.create_stream().unwrap();
    let a = device.create_buffer_for::<u32>(4).unwrap();
    let b = device.create_buffer_for::<u32>(8).unwrap();
    let output = HostArray::zeros::<u32>(8);

    stream
        .dispatch([
            a.copy_from(&HostArray::from_slice(&[1u32, 2, 3, 4])).unwrap(),
            b.copy_from(&HostArray::zeros::<u32>(8)).unwrap(),
            b.view_range(2, 4).unwrap().copy_from_view(&a.view()).unwrap(),
            b.copy_to(&output).unwrap(),
        ])
        .unwrap();
    stream.synchronize().unwrap();

    assert_eq!(
        output.to_vec::<u32>().unwrap(),
        vec![0, 0, 1, 2, 3, 4, 0, 0]
    );
    assert_eq!(stream.metrics().bytes_copied, 16);
}

#[test]
fn test_cross_device_reference() {
    let first = cpu_device();
    let second = cpu_device();
    assert_ne!(first, second);

    let stream = first.create_stream().unwrap();
    let local = first.create_buffer_for::<u32>(4).unwrap();
    let foreign = second.create_buffer_for::<u32>(4).unwrap();
    let data = HostArray::from_slice(&[1u32, 2, 3, 4]);

    // Nothing of a rejected list is submitted.
    let err = stream
        .dispatch([
            local.copy_from(&data).unwrap(),
            foreign.copy_from(&data).unwrap(),
        ])
        .unwrap_err();
    assert!(matches!(err, ArcheError::CrossDeviceReference { .. }));
    assert_eq!(stream.submitted_marker(), 0);

    let kernel = first.create_kernel(ADD_ONE, "add_one").unwrap();
    assert!(matches!(
        kernel.launch_thread_groups([1, 1, 1], [4, 1, 1], &[&foreign]),
        Err(ArcheError::CrossDeviceReference { .. })
    ));
    assert!(matches!(
        local.copy_from_buffer(&foreign.view()),
        Err(ArcheError::CrossDeviceReference { .. })
    ));
}

#[test]
fn test_buffer_dropped_while_queued() {
    let device = cpu_device();
    let stream = device.create_stream().unwrap();
    let output = HostArray::zeros::<f32>(64);

    {
        let buffer = device.create_buffer_for::<f32>(64).unwrap();
        stream
            .dispatch([
                buffer
                    .copy_from(&HostArray::from_slice(&[4.5f32; 64]))
                    .unwrap(),
                buffer.copy_to(&output).unwrap(),
            ])
            .unwrap();
    }

    stream.synchronize().unwrap();
    assert_eq!(output.to_vec::<f32>().unwrap(), vec![4.5f32; 64]);
}

#[test]
fn test_device_synchronize_drains_all_streams() {
    let device = cpu_device();
    let streams: Vec<_> = (0..3).map(|_| device.create_stream().unwrap()).collect();
    let outputs: Vec<_> = (0..3).map(|_| HostArray::zeros::<u32>(4)).collect();

    for (i, (stream, output)) in streams.iter().zip(&outputs).enumerate() {
        let buffer = device.create_buffer_for::<u32>(4).unwrap();
        stream
            .dispatch([
                buffer
                    .copy_from(&HostArray::from_slice(&[i as u32; 4]))
                    .unwrap(),
                buffer.copy_to(output).unwrap(),
            ])
            .unwrap();
    }

    device.synchronize().unwrap();
    for (i, (stream, output)) in streams.iter().zip(&outputs).enumerate() {
        assert_eq!(stream.state(), StreamState::Idle);
        assert_eq!(output.to_vec::<u32>().unwrap(), vec![i as u32; 4]);
    }
}

#[test]
fn test_shutdown_refuses_new_work() {
    let device = cpu_device();
    let stream = device.create_stream().unwrap();
    let buffer = device.create_buffer_for::<u32>(4).unwrap();
    let command = buffer.copy_from(&HostArray::zeros::<u32>(4)).unwrap();

    device.shutdown().unwrap();
    assert!(device.is_shut_down());

    assert!(matches!(
        device.create_stream(),
        Err(ArcheError::InvalidState(_))
    ));
    assert!(matches!(
        device.create_buffer(16),
        Err(ArcheError::InvalidState(_))
    ));
    assert!(matches!(
        stream.dispatch([command]),
        Err(ArcheError::InvalidState(_))
    ));

    // Copy builders refuse up front, like launches.
    let host = HostArray::zeros::<u32>(4);
    assert!(matches!(
        buffer.copy_from(&host),
        Err(ArcheError::InvalidState(_))
    ));
    assert!(matches!(
        buffer.copy_to(&host),
        Err(ArcheError::InvalidState(_))
    ));
    assert!(matches!(
        buffer.view_range(0, 2).unwrap().copy_from_view(&buffer.view_range(2, 2).unwrap()),
        Err(ArcheError::InvalidState(_))
    ));
    // Nothing is pending, so this still succeeds.
    stream.synchronize().unwrap();
}

#[test]
fn test_invalid_buffer_sizes() {
    let device = cpu_device();
    for result in [
        device.create_buffer(0),
        device.create_buffer_with_stride(4, 0),
        device.create_buffer_with_stride(u64::MAX, 2),
        device.create_buffer(device.limits().max_buffer_size + 1),
    ] {
        assert!(matches!(result, Err(ArcheError::ResourceCreationFailed(_))));
    }
}
