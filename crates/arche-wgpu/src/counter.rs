//! Timestamp query sets.

use std::any::Any;

use arche_core::backend::CounterBackend;
use arche_core::counter::Counter;
use arche_core::error::{ArcheError, Result};

use crate::adapter::WgpuShared;

/// Features a device needs for counters.
/// In wgpu 0.19, `CommandEncoder::write_timestamp` needs only `TIMESTAMP_QUERY`.
pub const TIMESTAMP_FEATURES: wgpu::Features = wgpu::Features::TIMESTAMP_QUERY;

/// Bytes written per resolved query.
pub const SAMPLE_SIZE: u64 = wgpu::QUERY_SIZE as u64;

/// A timestamp query set with one query per counter slot.
pub struct WgpuCounter {
    query_set: wgpu::QuerySet,
}

impl WgpuCounter {
    /// Create `sample_count` timestamp queries.
    pub fn new(shared: &WgpuShared, sample_count: u32) -> Result<Self> {
        let (query_set, error) = shared.validated(|| {
            shared.device.create_query_set(&wgpu::QuerySetDescriptor {
                label: Some("Arche Counter"),
                ty: wgpu::QueryType::Timestamp,
                count: sample_count,
            })
        });
        if let Some(error) = error {
            return Err(ArcheError::resource(format!(
                "cannot create {} timestamp queries: {}",
                sample_count, error
            )));
        }
        Ok(Self { query_set })
    }

    /// The query set.
    pub fn query_set(&self) -> &wgpu::QuerySet {
        &self.query_set
    }

    /// Native query set behind `counter`.
    pub fn of(counter: &Counter) -> Result<&WgpuCounter> {
        counter
            .native()
            .as_any()
            .downcast_ref::<WgpuCounter>()
            .ok_or_else(|| {
                ArcheError::argument(format!(
                    "counter {} was not created by the wgpu backend",
                    counter.id()
                ))
            })
    }
}

impl CounterBackend for WgpuCounter {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Nanoseconds from a resolved query, given the queue's tick period.
pub fn ticks_to_nanos(bytes: &[u8], period: f32) -> Option<u64> {
    let raw: [u8; 8] = bytes.get(..8)?.try_into().ok()?;
    Some((u64::from_le_bytes(raw) as f64 * period as f64) as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ticks_to_nanos() {
        assert_eq!(ticks_to_nanos(&1000u64.to_le_bytes(), 1.0), Some(1000));
        assert_eq!(ticks_to_nanos(&1000u64.to_le_bytes(), 2.5), Some(2500));
        assert_eq!(ticks_to_nanos(&[1, 2, 3], 1.0), None);
    }
}
