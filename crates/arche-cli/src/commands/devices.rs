//! `arche devices` command - List compute adapters.

use colored::Colorize;

use arche::DeviceConfig;

use crate::error::CliResult;

/// Execute the `devices` command.
pub fn execute(config: &DeviceConfig, json: bool) -> CliResult<()> {
    let devices = arche::enumerate_devices(config);

    if json {
        println!("{}", serde_json::to_string_pretty(&devices)?);
        return Ok(());
    }

    if devices.is_empty() {
        println!(
            "{} No {} device found among backends [{}]",
            "Warning:".yellow(),
            config.kind,
            config
                .backends
                .iter()
                .map(|b| b.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );
        return Ok(());
    }

    println!("{}:", "Devices".bright_white().underline());
    println!();
    for (rank, info) in devices.iter().enumerate() {
        let marker = if rank == 0 {
            "→".bright_green()
        } else {
            " ".normal()
        };
        println!(
            "  {} {} {}",
            marker,
            info.name.bright_white(),
            format!("({}, {}#{})", info.device_type, info.backend, info.index).dimmed()
        );
        if !info.driver.is_empty() {
            println!("      {} driver: {}", "•".dimmed(), info.driver);
        }
        println!(
            "      {} max buffer: {} MiB, max groups/dim: {}, max invocations/group: {}",
            "•".dimmed(),
            info.limits.max_buffer_size >> 20,
            info.limits.max_workgroups_per_dimension,
            info.limits.max_invocations_per_workgroup
        );
    }
    println!();
    println!(
        "  {} marks the device `arche run` would open",
        "→".bright_green()
    );

    Ok(())
}
