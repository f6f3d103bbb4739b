//! Chrome Trace export for debug captures.
//!
//! Captures are written in the JSON format understood by `chrome://tracing`
//! and Perfetto (`ui.perfetto.dev`). The process of an event is the device,
//! its thread is the stream.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::types::Dim3;

/// Event categories.
pub mod category {
    /// Host-to-device and device-to-host copies.
    pub const TRANSFER: &str = "transfer";
    /// Device-to-device copies.
    pub const COPY: &str = "copy";
    /// Kernel launches.
    pub const KERNEL: &str = "kernel";
    /// Host waits in `synchronize`.
    pub const SYNC: &str = "sync";
    /// Measured command execution.
    pub const EXECUTE: &str = "execute";
    /// User markers.
    pub const MARKER: &str = "marker";
    /// Counter samples.
    pub const COUNTER: &str = "counter";
}

/// A single event in the Chrome Trace format.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TraceEvent {
    /// Event name.
    pub name: String,
    /// Category.
    pub cat: String,
    /// Phase: "X" (complete), "B" (begin), "E" (end), "i" (instant).
    pub ph: String,
    /// Timestamp in microseconds since capture start.
    pub ts: u64,
    /// Duration in microseconds (for "X" events).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dur: Option<u64>,
    /// Process id (device id).
    pub pid: u64,
    /// Thread id (stream id, 0 for device-wide events).
    pub tid: u64,
    /// Additional arguments.
    #[serde(skip_serializing_if = "TraceArgs::is_empty")]
    pub args: TraceArgs,
}

/// Additional arguments for trace events.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TraceArgs {
    /// Batch sequence number on the stream.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seq: Option<u64>,
    /// Grid dimensions [x, y, z].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub grid: Option<[u32; 3]>,
    /// Group dimensions [x, y, z].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub group: Option<[u32; 3]>,
    /// Bytes moved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size_bytes: Option<u64>,
    /// Transfer direction.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub direction: Option<String>,
    /// Library the kernel came from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lib_name: Option<String>,
    /// Number of bound arguments.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arguments: Option<usize>,
    /// Counter slot written.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sample: Option<u32>,
}

impl TraceArgs {
    /// Check if args are empty (all None).
    pub fn is_empty(&self) -> bool {
        self.seq.is_none()
            && self.grid.is_none()
            && self.group.is_none()
            && self.size_bytes.is_none()
            && self.direction.is_none()
            && self.lib_name.is_none()
            && self.arguments.is_none()
            && self.sample.is_none()
    }

    /// Arguments describing a launch.
    pub fn launch(grid: Dim3, group: Dim3, arguments: usize, lib_name: &str) -> Self {
        Self {
            grid: Some(grid.to_array()),
            group: Some(group.to_array()),
            arguments: Some(arguments),
            lib_name: Some(lib_name.to_string()),
            ..Default::default()
        }
    }

    /// Arguments describing a transfer.
    pub fn transfer(direction: &str, size_bytes: u64) -> Self {
        Self {
            size_bytes: Some(size_bytes),
            direction: Some(direction.to_string()),
            ..Default::default()
        }
    }

    /// Arguments describing a counter sample.
    pub fn sample(index: u32) -> Self {
        Self {
            sample: Some(index),
            ..Default::default()
        }
    }

    /// Attach a batch sequence number.
    pub fn with_seq(mut self, seq: u64) -> Self {
        self.seq = Some(seq);
        self
    }
}

/// The events of one finished capture.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureTrace {
    /// Scope label.
    pub label: String,
    /// Device name.
    pub device_name: String,
    /// Device id used as process id.
    pub device_id: u64,
    /// Stream names by stream id.
    pub streams: BTreeMap<u64, String>,
    /// Recorded events in recording order.
    pub events: Vec<TraceEvent>,
}

impl CaptureTrace {
    /// Events of category `cat`.
    pub fn events_in<'a>(&'a self, cat: &'a str) -> impl Iterator<Item = &'a TraceEvent> + 'a {
        self.events.iter().filter(move |e| e.cat == cat)
    }

    /// Render as Chrome Trace JSON.
    pub fn to_json(&self) -> String {
        let mut trace_events = Vec::with_capacity(self.events.len() + self.streams.len() + 1);

        trace_events.push(serde_json::json!({
            "name": "process_name",
            "ph": "M",
            "pid": self.device_id,
            "args": { "name": self.device_name }
        }));

        for (tid, name) in &self.streams {
            trace_events.push(serde_json::json!({
                "name": "thread_name",
                "ph": "M",
                "pid": self.device_id,
                "tid": tid,
                "args": { "name": name }
            }));
        }

        for event in &self.events {
            trace_events.push(serde_json::to_value(event).unwrap_or_default());
        }

        let trace = serde_json::json!({
            "traceEvents": trace_events,
            "metadata": { "capture": self.label, "device": self.device_name },
            "displayTimeUnit": "ms"
        });

        serde_json::to_string_pretty(&trace).unwrap_or_else(|_| "{}".to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(name: &str, cat: &str, ph: &str) -> TraceEvent {
        TraceEvent {
            name: name.to_string(),
            cat: cat.to_string(),
            ph: ph.to_string(),
            ts: 10,
            dur: None,
            pid: 1,
            tid: 2,
            args: TraceArgs::default(),
        }
    }

    #[test]
    fn test_json_layout() {
        let mut trace = CaptureTrace {
            label: "frame".to_string(),
            device_name: "host".to_string(),
            device_id: 1,
            ..Default::default()
        };
        trace.streams.insert(2, "stream-2".to_string());
        trace.events.push(event("copy_in", category::TRANSFER, "i"));
        let mut launch = event("kernel_main", category::KERNEL, "X");
        launch.dur = Some(5);
        launch.args = TraceArgs::launch(Dim3::new(2, 1, 1), Dim3::new(64, 1, 1), 1, "default");
        trace.events.push(launch);

        let value: serde_json::Value = serde_json::from_str(&trace.to_json()).unwrap();
        let events = value["traceEvents"].as_array().unwrap();
        assert_eq!(events.len(), 4);
        assert_eq!(events[0]["name"], "process_name");
        assert_eq!(events[1]["args"]["name"], "stream-2");
        assert!(events[2].get("args").is_none());
        assert!(events[2].get("dur").is_none());
        assert_eq!(events[3]["args"]["grid"], serde_json::json!([2, 1, 1]));
        assert_eq!(value["metadata"]["capture"], "frame");
    }

    #[test]
    fn test_events_in() {
        let mut trace = CaptureTrace::default();
        trace.events.push(event("a", category::MARKER, "B"));
        trace.events.push(event("b", category::KERNEL, "i"));
        trace.events.push(event("a", category::MARKER, "E"));
        assert_eq!(trace.events_in(category::MARKER).count(), 2);
    }
}
