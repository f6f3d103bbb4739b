//! End-to-end tests of the core execution model on the host interpreter.

use arche_core::backend::DeviceProvider;
use arche_core::{Argument, ArcheError, Device, DeviceConfig, DeviceKind, HostArray, StreamState};
use arche_cpu::CpuProvider;

const SCALE: &str = r#"
@group(0) @binding(0) var<storage, read_write> data: array<f32>;

@compute @workgroup_size(4)
fn double_it(@builtin(global_invocation_id) id: vec3<u32>) {
    if id.x < arrayLength(&data) {
        data[id.x] = data[id.x] * 2.0;
    }
}
"#;

fn cpu_device() -> Device {
    let providers: Vec<Box<dyn DeviceProvider>> =
        vec![Box::new(CpuProvider::new().with_loop_limit(100_000))];
    Device::create(&providers, &DeviceConfig::new(DeviceKind::Cpu)).unwrap()
}

#[test]
fn test_copy_launch_copy_back() {
    let device = cpu_device();
    let stream = device.create_stream().unwrap();
    let kernel = device.create_kernel(SCALE, "double_it").unwrap();

    let input = HostArray::from_slice(&(1..=10).map(|v| v as f32).collect::<Vec<_>>());
    let output = HostArray::zeros::<f32>(10);
    let buffer = device.create_buffer_for::<f32>(10).unwrap();

    stream
        .dispatch([
            buffer.copy_from(&input).unwrap(),
            kernel
                .launch_thread_groups([3, 1, 1], [4, 1, 1], &[&buffer])
                .unwrap(),
            buffer.copy_to(&output).unwrap(),
        ])
        .unwrap();
    stream.synchronize().unwrap();

    assert_eq!(
        output.to_vec::<f32>().unwrap(),
        vec![2.0, 4.0, 6.0, 8.0, 10.0, 12.0, 14.0, 16.0, 18.0, 20.0]
    );
    assert_eq!(stream.state(), StreamState::Idle);
    assert_eq!(stream.completed_marker(), 1);
}

#[test]
fn test_batches_run_in_order() {
    let device = cpu_device();
    let stream = device.create_stream().unwrap();
    let kernel = device.create_kernel(SCALE, "double_it").unwrap();
    let buffer = device.create_buffer_for::<f32>(4).unwrap();
    let output = HostArray::zeros::<f32>(4);

    stream
        .dispatch([buffer
            .copy_from(&HostArray::from_slice(&[1.0f32, 1.0, 1.0, 1.0]))
            .unwrap()])
        .unwrap();
    for _ in 0..3 {
        stream
            .dispatch([kernel
                .launch_thread_groups([1, 1, 1], [4, 1, 1], &[&buffer])
                .unwrap()])
            .unwrap();
    }
    stream.dispatch([buffer.copy_to(&output).unwrap()]).unwrap();
    stream.synchronize().unwrap();

    assert_eq!(output.to_vec::<f32>().unwrap(), vec![8.0; 4]);
    assert_eq!(stream.submitted_marker(), 5);
}

#[test]
fn test_views_and_inline_arguments() {
    let device = cpu_device();
    let stream = device.create_stream().unwrap();
    let kernel = device
        .create_kernel(
            r#"
            struct Params { add: u32 }
            @group(0) @binding(0) var<storage, read_write> data: array<u32>;
            @group(0) @binding(1) var<uniform> params: Params;
            @compute @workgroup_size(1)
            fn add(@builtin(global_invocation_id) id: vec3<u32>) {
                data[id.x] += params.add;
            }
        "#,
            "add",
        )
        .unwrap();

    let buffer = device.create_buffer_for::<u32>(8).unwrap();
    let output = HostArray::zeros::<u32>(8);
    let tail = buffer.view_range(4, 4).unwrap();

    stream
        .dispatch([
            buffer
                .copy_from(&HostArray::from_slice(&[0u32, 1, 2, 3, 4, 5, 6, 7]))
                .unwrap(),
            kernel
                .launch([4, 1, 1], [1, 1, 1], vec![Argument::from(&tail), Argument::value(&100u32)])
                .unwrap(),
            buffer.copy_to(&output).unwrap(),
        ])
        .unwrap();
    stream.synchronize().unwrap();

    assert_eq!(
        output.to_vec::<u32>().unwrap(),
        vec![0, 1, 2, 3, 104, 105, 106, 107]
    );
}

#[test]
fn test_buffer_to_buffer_copy() {
    let device = cpu_device();
    let stream = device.create_stream().unwrap();
    let a = device.create_buffer_for::<u32>(4).unwrap();
    let b = device.create_buffer_for::<u32>(4).unwrap();
    let output = HostArray::zeros::<u32>(4);

    stream
        .dispatch([
            a.copy_from(&HostArray::from_slice(&[9u32, 8, 7, 6])).unwrap(),
            b.copy_from_buffer(&a.view()).unwrap(),
            b.copy_to(&output).unwrap(),
        ])
        .unwrap();
    stream.synchronize().unwrap();
    assert_eq!(output.to_vec::<u32>().unwrap(), vec![9, 8, 7, 6]);
}

#[test]
fn test_barrier_kernel_fails_to_compile() {
    let device = cpu_device();
    let err = device
        .create_kernel(
            r#"
            var<workgroup> tile: array<f32, 64>;
            @group(0) @binding(0) var<storage, read_write> data: array<f32>;
            @compute @workgroup_size(64)
            fn reduce(@builtin(local_invocation_index) i: u32) {
                tile[i] = data[i];
                workgroupBarrier();
                data[i] = tile[63u - i];
            }
        "#,
            "reduce",
        )
        .unwrap_err();
    assert!(matches!(err, ArcheError::CompilationError { .. }));
}

#[test]
fn test_runaway_kernel_loses_device() {
    let device = cpu_device();
    let stream = device.create_stream().unwrap();
    let kernel = device
        .create_kernel(
            r#"
            @group(0) @binding(0) var<storage, read_write> data: array<u32>;
            @compute @workgroup_size(1)
            fn spin() {
                var i = 0u;
                loop {
                    if data[0] == 7u { break; }
                    i += 1u;
                }
            }
        "#,
            "spin",
        )
        .unwrap();
    let buffer = device.create_buffer_for::<u32>(1).unwrap();

    stream
        .dispatch([kernel
            .launch_thread_groups([1, 1, 1], [1, 1, 1], &[&buffer])
            .unwrap()])
        .unwrap();
    let err = stream.synchronize().unwrap_err();
    assert!(matches!(err, ArcheError::DeviceLost(_)));
    assert!(device.is_lost());
    assert!(matches!(
        device.create_stream(),
        Err(ArcheError::DeviceLost(_))
    ));
}

#[test]
fn test_dropping_stream_drains_work() {
    let device = cpu_device();
    let kernel = device.create_kernel(SCALE, "double_it").unwrap();
    let buffer = device.create_buffer_for::<f32>(4).unwrap();
    let output = HostArray::zeros::<f32>(4);

    {
        let stream = device.create_stream().unwrap();
        stream
            .dispatch([
                buffer
                    .copy_from(&HostArray::from_slice(&[1.0f32, 2.0, 3.0, 4.0]))
                    .unwrap(),
                kernel
                    .launch_thread_groups([1, 1, 1], [4, 1, 1], &[&buffer])
                    .unwrap(),
                buffer.copy_to(&output).unwrap(),
            ])
            .unwrap();
    }

    assert_eq!(output.to_vec::<f32>().unwrap(), vec![2.0, 4.0, 6.0, 8.0]);
}
