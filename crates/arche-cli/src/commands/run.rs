//! `arche run` command - Run a WGSL kernel over f32 data.
//!
//! Every argument of the entry point gets its own f32 buffer, initialized
//! from `--input`. Writable arguments are read back and printed.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;

use colored::Colorize;
use serde::Serialize;
use tracing::debug;

use arche::shader::ArgumentKind;
use arche::{CaptureOptions, DeviceConfig, Dim3, HostArray};

use crate::error::{CliError, CliResult};

use super::check::lib_name;

/// Options of one `run` invocation.
pub struct RunOptions<'a> {
    /// Kernel file.
    pub path: &'a Path,
    /// Entry point.
    pub entry: &'a str,
    /// Initial buffer contents.
    pub input: Vec<f32>,
    /// Grid; defaults to enough groups to cover the input.
    pub grid: Option<Dim3>,
    /// Trace document written around the run.
    pub capture: Option<PathBuf>,
    /// Print results as JSON.
    pub json: bool,
}

#[derive(Serialize)]
struct Output {
    device: String,
    entry: String,
    grid: [u32; 3],
    group: [u32; 3],
    elapsed_us: u64,
    buffers: Vec<OutputBuffer>,
    #[serde(skip_serializing_if = "Option::is_none")]
    trace: Option<PathBuf>,
}

#[derive(Serialize)]
struct OutputBuffer {
    name: String,
    values: Vec<f32>,
}

/// Groups needed to cover `len` invocations with groups of `group`.
pub fn covering_grid(len: usize, group: Dim3) -> Dim3 {
    let per_group = group.x.max(1) as usize;
    Dim3::new(len.div_ceil(per_group).max(1) as u32, 1, 1)
}

/// Execute the `run` command.
pub fn execute(options: RunOptions<'_>, config: &DeviceConfig) -> CliResult<()> {
    if options.input.is_empty() {
        return Err(CliError::InvalidArgument(
            "--input needs at least one value".to_string(),
        ));
    }

    let source = fs::read_to_string(options.path)?;
    let device = arche::create_device_with(config)?;
    let kernel = device
        .kernel_builder()
        .lib_name(lib_name(options.path))
        .entry(options.entry)
        .source(source)
        .build()?;

    let signature = kernel.signature();
    if let Some(arg) = signature
        .arguments
        .iter()
        .find(|a| a.kind == ArgumentKind::Uniform)
    {
        return Err(CliError::UnsupportedKernel(format!(
            "'{}' takes a uniform argument ({}); run only binds f32 storage buffers",
            signature.entry, arg
        )));
    }

    let group = kernel.workgroup_size();
    let grid = options
        .grid
        .unwrap_or_else(|| covering_grid(options.input.len(), group));

    let stream = device.create_stream()?;
    let mut buffers = Vec::with_capacity(signature.arguments.len());
    let mut readbacks = Vec::new();
    for (index, arg) in signature.arguments.iter().enumerate() {
        let min_len = arg.min_size.div_ceil(4) as usize;
        let len = options.input.len().max(min_len);
        let mut data = options.input.clone();
        data.resize(len, 0.0);

        let name = arg
            .name
            .clone()
            .unwrap_or_else(|| format!("arg{}", index));
        let buffer = device.create_buffer_labeled(&name, 4, len as u64)?;
        if arg.kind.is_writable() {
            readbacks.push((name, HostArray::zeros::<f32>(options.input.len())));
        }
        buffers.push((buffer, HostArray::from_slice(&data)));
    }

    let mut commands = Vec::with_capacity(buffers.len() * 2 + 1);
    for (buffer, data) in &buffers {
        commands.push(buffer.copy_from(data)?);
    }
    let bound: Vec<_> = buffers.iter().map(|(b, _)| b).collect();
    commands.push(kernel.launch_thread_groups(grid, group, &bound)?);
    let mut readback_iter = readbacks.iter();
    for ((buffer, _), arg) in buffers.iter().zip(&signature.arguments) {
        if arg.kind.is_writable() {
            if let Some((_, sink)) = readback_iter.next() {
                commands.push(buffer.copy_to(sink)?);
            }
        }
    }

    let scope = match &options.capture {
        Some(path) => {
            let scope = device.debug_capture()?.create_scope(
                options.entry,
                CaptureOptions::trace_document(Some(path.clone())),
            )?;
            scope.start_debug_capture()?;
            Some(scope)
        }
        None => None,
    };

    let start = Instant::now();
    stream.dispatch(commands)?;
    stream.synchronize()?;
    let elapsed = start.elapsed();
    debug!(entry = %options.entry, ?elapsed, metrics = ?stream.metrics(), "Run finished");

    let trace = match scope {
        Some(scope) => scope.stop_debug_capture()?.path,
        None => None,
    };

    let output = Output {
        device: device.name().to_string(),
        entry: options.entry.to_string(),
        grid: grid.to_array(),
        group: group.to_array(),
        elapsed_us: elapsed.as_micros() as u64,
        buffers: readbacks
            .iter()
            .map(|(name, sink)| -> CliResult<OutputBuffer> {
                Ok(OutputBuffer {
                    name: name.clone(),
                    values: sink.to_vec::<f32>()?,
                })
            })
            .collect::<CliResult<_>>()?,
        trace,
    };

    if options.json {
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        print_output(&output);
    }
    Ok(())
}

fn print_output(output: &Output) {
    println!(
        "{} {} on {}",
        "→".bright_cyan(),
        output.entry.bright_white(),
        output.device.bright_yellow()
    );
    println!(
        "  {} grid {:?}, group {:?}, {} µs",
        "•".dimmed(),
        output.grid,
        output.group,
        output.elapsed_us
    );
    if output.buffers.is_empty() {
        println!("  {} kernel has no writable arguments", "•".dimmed());
    }
    for buffer in &output.buffers {
        println!("  {} {} = {:?}", "•".dimmed(), buffer.name.bright_white(), buffer.values);
    }
    if let Some(path) = &output.trace {
        println!(
            "  {} trace written to {}",
            "✓".bright_green(),
            path.display().to_string().bright_yellow()
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arche::{Backend, DeviceKind};

    const DOUBLE_IT: &str = r#"
@group(0) @binding(0) var<storage, read> src: array<f32>;
@group(0) @binding(1) var<storage, read_write> dst: array<f32>;

@compute @workgroup_size(2)
fn double_it(@builtin(global_invocation_id) id: vec3<u32>) {
    if id.x < arrayLength(&dst) {
        dst[id.x] = src[id.x] * 2.0;
    }
}
"#;

    fn host_config() -> DeviceConfig {
        DeviceConfig::new(DeviceKind::Cpu).with_backends(&[Backend::Cpu])
    }

    #[test]
    fn test_covering_grid() {
        assert_eq!(covering_grid(10, Dim3::new(4, 1, 1)), Dim3::new(3, 1, 1));
        assert_eq!(covering_grid(8, Dim3::new(4, 1, 1)), Dim3::new(2, 1, 1));
        assert_eq!(covering_grid(1, Dim3::new(64, 1, 1)), Dim3::new(1, 1, 1));
    }

    #[test]
    fn test_run_with_capture() {
        let dir = tempfile::tempdir().unwrap();
        let kernel = dir.path().join("double.wgsl");
        fs::write(&kernel, DOUBLE_IT).unwrap();
        let trace = dir.path().join("run.json");

        execute(
            RunOptions {
                path: &kernel,
                entry: "double_it",
                input: vec![1.0, 2.0, 3.0],
                grid: None,
                capture: Some(trace.clone()),
                json: true,
            },
            &host_config(),
        )
        .unwrap();

        let text = fs::read_to_string(&trace).unwrap();
        assert!(text.contains("traceEvents"));
    }

    #[test]
    fn test_run_rejects_empty_input() {
        let dir = tempfile::tempdir().unwrap();
        let kernel = dir.path().join("double.wgsl");
        fs::write(&kernel, DOUBLE_IT).unwrap();

        let err = execute(
            RunOptions {
                path: &kernel,
                entry: "double_it",
                input: Vec::new(),
                grid: None,
                capture: None,
                json: false,
            },
            &host_config(),
        )
        .unwrap_err();
        assert!(matches!(err, CliError::InvalidArgument(_)));
    }

    #[test]
    fn test_run_missing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let kernel = dir.path().join("double.wgsl");
        fs::write(&kernel, DOUBLE_IT).unwrap();

        let err = execute(
            RunOptions {
                path: &kernel,
                entry: "triple_it",
                input: vec![1.0],
                grid: None,
                capture: None,
                json: false,
            },
            &host_config(),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            CliError::Arche(arche::ArcheError::EntryNotFound { .. })
        ));
    }
}
