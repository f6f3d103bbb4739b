//! CLI command implementations.

pub mod check;
pub mod devices;
pub mod run;

use arche::{Backend, DeviceConfig, DeviceKind, Dim3};

use crate::error::{CliError, CliResult};

/// Parse a comma-separated backend list; `all` keeps the default order.
pub fn parse_backends(backends: &str) -> CliResult<Vec<Backend>> {
    if backends.trim() == "all" {
        return Ok(Backend::ALL.to_vec());
    }
    let parsed: Vec<Backend> = backends
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::parse)
        .collect::<Result<_, _>>()?;
    if parsed.is_empty() {
        return Err(CliError::InvalidArgument(
            "backend list is empty".to_string(),
        ));
    }
    Ok(parsed)
}

/// Device config from the common `--device` / `--backends` / `--adapter` flags.
///
/// Starts from the `ARCHE_*` environment; explicit flags win.
pub fn device_config(
    kind: Option<&str>,
    backends: Option<&str>,
    adapter: Option<&str>,
) -> CliResult<DeviceConfig> {
    let mut config = DeviceConfig::from_env();
    if let Some(kind) = kind {
        config.kind = kind.parse::<DeviceKind>()?;
    }
    if let Some(backends) = backends {
        config.backends = parse_backends(backends)?;
    }
    if let Some(adapter) = adapter {
        config.adapter_name = Some(adapter.to_string());
    }
    Ok(config)
}

/// Parse `x`, `x,y` or `x,y,z` into an extent; missing dimensions are 1.
pub fn parse_dim3(text: &str) -> CliResult<Dim3> {
    let parts: Vec<&str> = text.split(',').map(str::trim).collect();
    if parts.is_empty() || parts.len() > 3 {
        return Err(CliError::InvalidArgument(format!(
            "expected 1 to 3 comma-separated dimensions, got '{}'",
            text
        )));
    }
    let mut dims = [1u32; 3];
    for (dim, part) in dims.iter_mut().zip(&parts) {
        *dim = part.parse().map_err(|_| {
            CliError::InvalidArgument(format!("'{}' is not a dimension", part))
        })?;
    }
    Ok(Dim3::from(dims))
}

/// Parse a comma-separated list of f32 values.
pub fn parse_values(text: &str) -> CliResult<Vec<f32>> {
    text.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<f32>()
                .map_err(|_| CliError::InvalidArgument(format!("'{}' is not a number", s)))
        })
        .collect()
}
