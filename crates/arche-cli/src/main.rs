//! Arche CLI - Device listing, kernel checking and kernel runs.
//!
//! # Commands
//!
//! - `arche devices` - List compute adapters in selection order
//! - `arche check <file>` - Validate a WGSL file and build its compute entries
//! - `arche run <file>` - Run a kernel over f32 data and print the results
//!
//! # Examples
//!
//! ```bash
//! # Show every adapter, GPUs first
//! arche devices
//!
//! # Check that all entry points build on the host interpreter
//! arche check kernels/scale.wgsl --device cpu
//!
//! # Run a kernel and write a Chrome trace of the run
//! arche run kernels/scale.wgsl --entry scale --input 1,2,3,4 --capture scale.trace.json
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::EnvFilter;

mod commands;
mod error;

use commands::{check, devices, run};
use error::CliResult;

/// Arche CLI - explicit GPU compute tooling
#[derive(Parser)]
#[command(name = "arche")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Device kind to open (gpu, cpu, any)
    #[arg(short, long, global = true)]
    device: Option<String>,

    /// Backends to probe, in order (comma-separated: wgpu,cpu, or 'all')
    #[arg(short, long, global = true)]
    backends: Option<String>,

    /// Only use adapters whose name contains this
    #[arg(long, global = true)]
    adapter: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List compute adapters in selection order
    Devices {
        /// Print as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a WGSL file and build its compute entry points
    Check {
        /// WGSL source file
        file: PathBuf,

        /// Only check this entry point
        #[arg(short, long)]
        entry: Option<String>,
    },

    /// Run a compute kernel over f32 data
    Run {
        /// WGSL source file
        file: PathBuf,

        /// Entry point name
        #[arg(short, long, default_value = "main")]
        entry: String,

        /// Initial contents of every argument buffer (comma-separated f32)
        #[arg(short, long)]
        input: String,

        /// Grid of thread groups (x[,y[,z]]); defaults to covering the input
        #[arg(short, long)]
        grid: Option<String>,

        /// Write a Chrome trace of the run to this file
        #[arg(long)]
        capture: Option<PathBuf>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },
}

fn setup_logging(verbose: bool, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .with_writer(std::io::stderr)
        .init();
}

fn dispatch(cli: Cli) -> CliResult<()> {
    let config = commands::device_config(
        cli.device.as_deref(),
        cli.backends.as_deref(),
        cli.adapter.as_deref(),
    )?;

    match cli.command {
        Commands::Devices { json } => devices::execute(&config, json),

        Commands::Check { file, entry } => check::execute(&file, entry.as_deref(), &config),

        Commands::Run {
            file,
            entry,
            input,
            grid,
            capture,
            json,
        } => {
            let grid = grid.as_deref().map(commands::parse_dim3).transpose()?;
            run::execute(
                run::RunOptions {
                    path: &file,
                    entry: &entry,
                    input: commands::parse_values(&input)?,
                    grid,
                    capture,
                    json,
                },
                &config,
            )
        }
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    match dispatch(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{} {}", "Error:".red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
