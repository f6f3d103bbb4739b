//! `arche check` command - Validate a WGSL file and build its kernels.

use std::fs;
use std::path::Path;

use colored::Colorize;

use arche::shader::ShaderModule;
use arche::DeviceConfig;

use crate::error::{CliError, CliResult};

/// Library name for a kernel file: its stem.
pub fn lib_name(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "default".to_string())
}

/// Execute the `check` command.
pub fn execute(path: &Path, entry: Option<&str>, config: &DeviceConfig) -> CliResult<()> {
    let source = fs::read_to_string(path)?;
    let lib = lib_name(path);

    println!("{} Checking {}", "→".bright_cyan(), path.display().to_string().bright_yellow());

    let module = ShaderModule::parse(&lib, &source)?;
    let entries = match entry {
        Some(entry) => vec![entry.to_string()],
        None => module.compute_entries(),
    };
    if entries.is_empty() {
        println!("{} No compute entry points", "Warning:".yellow());
        return Ok(());
    }

    let device = arche::create_device_with(config)?;
    println!(
        "  {} Device: {}",
        "•".dimmed(),
        device.info().to_string().bright_yellow()
    );
    println!();

    let mut failures = 0usize;
    for name in &entries {
        let signature = module.reflect(name)?;
        let built = device
            .kernel_builder()
            .lib_name(lib.as_str())
            .entry(name.as_str())
            .source(source.as_str())
            .build();

        let status = match &built {
            Ok(_) => "✓".bright_green(),
            Err(_) => "✗".bright_red(),
        };
        println!(
            "  {} {} {}",
            status,
            name.bright_white(),
            format!("@workgroup_size{}", signature.workgroup_size).dimmed()
        );
        for arg in &signature.arguments {
            println!("      {} {}", "•".dimmed(), arg);
        }
        if let Err(e) = built {
            failures += 1;
            for line in e.to_string().lines() {
                println!("      {}", line.bright_red());
            }
        }
    }

    println!();
    if failures > 0 {
        return Err(CliError::UnsupportedKernel(format!(
            "{} of {} entry point(s) failed to build on {}",
            failures,
            entries.len(),
            device.name()
        )));
    }
    println!(
        "{} {} entry point(s) build on {}",
        "✓".bright_green(),
        entries.len(),
        device.name()
    );
    Ok(())
}
