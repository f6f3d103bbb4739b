//! Debug capture: named windows of recorded device activity.
//!
//! [`Device::debug_capture`](crate::device::Device::debug_capture) returns a
//! [`DebugCapture`] session; it creates [`CaptureScope`]s. A scope moves
//! `Idle -> Capturing -> Idle` through `start_debug_capture` and
//! `stop_debug_capture`. While it captures, stream activity of the device
//! (or of one stream, for a stream scope) is recorded as Chrome Trace
//! events and flushed on stop.
//!
//! Recording is a pure observer: it never changes what runs or in which
//! order.
//!
//! ```ignore
//! let capture = device.debug_capture()?;
//! let scope = capture.create_scope("frame", CaptureOptions::trace_document(None))?;
//! scope.start_debug_capture()?;
//! stream.dispatch([upload, launch, download])?;
//! stream.synchronize()?;
//! let summary = scope.stop_debug_capture()?;
//! println!("wrote {:?}", summary.path);
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::command::{Command, CommandOp};
use crate::device::{next_id, Device, DeviceShared};
use crate::error::{ArcheError, Result};
use crate::stream::Stream;
use crate::trace::{category, CaptureTrace, TraceArgs, TraceEvent};

/// Where a finished capture goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureDestination {
    /// Kept in memory on the scope, see [`CaptureScope::last_trace`].
    DeveloperTools,
    /// Written as a Chrome Trace JSON document.
    ///
    /// Without a path the file is `<label>.trace.json` in the device's
    /// capture directory (or the working directory).
    TraceDocument {
        /// Explicit output path.
        path: Option<PathBuf>,
    },
}

/// When events are recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CaptureTrigger {
    /// Everything between start and stop.
    OnStart,
    /// Only inside `mark_begin` / `mark_end` intervals.
    Markers,
}

/// Configuration of a capture scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureOptions {
    /// Output destination.
    pub destination: CaptureDestination,
    /// Trigger mode.
    pub trigger: CaptureTrigger,
    /// Whether the scope may be started more than once.
    pub reusable: bool,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            destination: CaptureDestination::DeveloperTools,
            trigger: CaptureTrigger::OnStart,
            reusable: true,
        }
    }
}

impl CaptureOptions {
    /// In-memory capture recording everything.
    pub fn developer_tools() -> Self {
        Self::default()
    }

    /// Capture written to a trace document.
    pub fn trace_document(path: Option<PathBuf>) -> Self {
        Self {
            destination: CaptureDestination::TraceDocument { path },
            ..Default::default()
        }
    }

    /// Set the trigger mode.
    pub fn with_trigger(mut self, trigger: CaptureTrigger) -> Self {
        self.trigger = trigger;
        self
    }

    /// Forbid restarting the scope after its first capture.
    pub fn single_use(mut self) -> Self {
        self.reusable = false;
        self
    }
}

/// Result of a finished capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureSummary {
    /// Scope label.
    pub label: String,
    /// Number of recorded events.
    pub events: usize,
    /// Trace document written, if any.
    pub path: Option<PathBuf>,
}

struct ActiveCapture {
    scope_id: u64,
    label: String,
    stream: Option<u64>,
    trigger: CaptureTrigger,
    marker: Option<String>,
    epoch: Instant,
    streams: BTreeMap<u64, String>,
    events: Vec<TraceEvent>,
}

impl ActiveCapture {
    fn accepts(&self, stream_id: u64) -> bool {
        self.stream.map_or(true, |s| s == stream_id)
            && (self.trigger == CaptureTrigger::OnStart || self.marker.is_some())
    }

    fn micros(&self, at: Instant) -> u64 {
        at.saturating_duration_since(self.epoch).as_micros() as u64
    }

    fn note_stream(&mut self, stream_id: u64) {
        self.streams
            .entry(stream_id)
            .or_insert_with(|| format!("stream {}", stream_id));
    }
}

/// Trace event of one dispatched command, described before the batch is
/// handed to the backend.
pub(crate) struct QueuedEvent {
    name: String,
    cat: &'static str,
    args: TraceArgs,
}

impl QueuedEvent {
    pub(crate) fn of(cmd: &Command) -> Self {
        let (cat, args) = match cmd.op() {
            CommandOp::CopyIn { .. } => (
                category::TRANSFER,
                TraceArgs::transfer("host_to_device", cmd.transfer_bytes()),
            ),
            CommandOp::CopyOut { .. } => (
                category::TRANSFER,
                TraceArgs::transfer("device_to_host", cmd.transfer_bytes()),
            ),
            CommandOp::CopyBuffer { .. } => (
                category::COPY,
                TraceArgs::transfer("device_to_device", cmd.transfer_bytes()),
            ),
            CommandOp::Launch(launch) => (
                category::KERNEL,
                TraceArgs::launch(
                    launch.grid,
                    launch.group,
                    launch.args.len(),
                    launch.kernel.lib_name(),
                ),
            ),
            CommandOp::SampleCounter { index, .. } => (category::COUNTER, TraceArgs::sample(*index)),
        };
        Self {
            name: cmd.name().to_string(),
            cat,
            args,
        }
    }
}

/// Device-wide capture recorder.
///
/// At most one scope of a device captures at a time. Streams and backends
/// report activity here; it is dropped unless a capture is active and
/// accepts the stream.
pub struct CaptureHub {
    device_id: u64,
    device_name: String,
    active: Mutex<Option<ActiveCapture>>,
}

impl CaptureHub {
    /// Create an idle recorder.
    pub fn new(device_id: u64, device_name: String) -> Self {
        Self {
            device_id,
            device_name,
            active: Mutex::new(None),
        }
    }

    /// Whether any scope is capturing.
    pub fn is_active(&self) -> bool {
        self.active.lock().is_some()
    }

    /// Whether activity on `stream_id` would be recorded now.
    pub fn is_recording(&self, stream_id: u64) -> bool {
        self.active
            .lock()
            .as_ref()
            .is_some_and(|a| a.accepts(stream_id))
    }

    /// Record a complete event with a measured duration.
    pub fn record_span(
        &self,
        stream_id: u64,
        name: &str,
        cat: &str,
        start: Instant,
        dur: Duration,
        args: TraceArgs,
    ) {
        let mut active = self.active.lock();
        let Some(capture) = active.as_mut().filter(|a| a.accepts(stream_id)) else {
            return;
        };
        capture.note_stream(stream_id);
        let ts = capture.micros(start);
        capture.events.push(TraceEvent {
            name: name.to_string(),
            cat: cat.to_string(),
            ph: "X".to_string(),
            ts,
            dur: Some(dur.as_micros() as u64),
            pid: self.device_id,
            tid: stream_id,
            args,
        });
    }

    /// Record the instant events of a batch queued at `queued_at`.
    pub(crate) fn record_dispatch(
        &self,
        stream_id: u64,
        seq: u64,
        queued_at: Instant,
        events: Vec<QueuedEvent>,
    ) {
        let mut active = self.active.lock();
        let Some(capture) = active.as_mut().filter(|a| a.accepts(stream_id)) else {
            return;
        };
        capture.note_stream(stream_id);
        let ts = capture.micros(queued_at);

        for event in events {
            capture.events.push(TraceEvent {
                name: event.name,
                cat: event.cat.to_string(),
                ph: "i".to_string(),
                ts,
                dur: None,
                pid: self.device_id,
                tid: stream_id,
                args: event.args.with_seq(seq),
            });
        }
    }

    fn activate(
        &self,
        scope_id: u64,
        label: &str,
        stream: Option<u64>,
        trigger: CaptureTrigger,
    ) -> Result<()> {
        let mut active = self.active.lock();
        if let Some(other) = active.as_ref() {
            return Err(ArcheError::state(format!(
                "capture '{}' is already active on device {}",
                other.label, self.device_id
            )));
        }
        *active = Some(ActiveCapture {
            scope_id,
            label: label.to_string(),
            stream,
            trigger,
            marker: None,
            epoch: Instant::now(),
            streams: BTreeMap::new(),
            events: Vec::new(),
        });
        Ok(())
    }

    fn deactivate(&self, scope_id: u64) -> Option<CaptureTrace> {
        let mut active = self.active.lock();
        if active.as_ref().map(|a| a.scope_id) != Some(scope_id) {
            return None;
        }
        let mut capture = active.take()?;

        if let Some(name) = capture.marker.take() {
            let ts = capture.micros(Instant::now());
            capture
                .events
                .push(self.marker_event(&name, "E", ts, capture.stream));
        }

        Some(CaptureTrace {
            label: capture.label,
            device_name: self.device_name.clone(),
            device_id: self.device_id,
            streams: capture.streams,
            events: capture.events,
        })
    }

    fn marker(&self, scope_id: u64, name: Option<&str>) -> Result<()> {
        let mut active = self.active.lock();
        let capture = active
            .as_mut()
            .filter(|a| a.scope_id == scope_id)
            .ok_or_else(|| ArcheError::state("scope is not capturing"))?;
        let ts = capture.micros(Instant::now());

        match (name, capture.marker.take()) {
            (Some(name), None) => {
                capture
                    .events
                    .push(self.marker_event(name, "B", ts, capture.stream));
                capture.marker = Some(name.to_string());
                Ok(())
            }
            (Some(name), Some(open)) => {
                let err = ArcheError::state(format!(
                    "cannot begin marker '{}' while '{}' is open",
                    name, open
                ));
                capture.marker = Some(open);
                Err(err)
            }
            (None, Some(open)) => {
                capture
                    .events
                    .push(self.marker_event(&open, "E", ts, capture.stream));
                Ok(())
            }
            (None, None) => Err(ArcheError::state("no marker interval is open")),
        }
    }

    fn marker_event(&self, name: &str, ph: &str, ts: u64, stream: Option<u64>) -> TraceEvent {
        TraceEvent {
            name: name.to_string(),
            cat: category::MARKER.to_string(),
            ph: ph.to_string(),
            ts,
            dur: None,
            pid: self.device_id,
            tid: stream.unwrap_or(0),
            args: TraceArgs::default(),
        }
    }
}

/// Capture session of one device.
pub struct DebugCapture {
    device: Device,
}

impl DebugCapture {
    pub(crate) fn new(device: Device) -> Self {
        Self { device }
    }

    /// Whether any scope of the device is capturing.
    pub fn is_capturing(&self) -> bool {
        self.device.shared.capture.is_active()
    }

    /// Create a scope recording all streams of the device.
    pub fn create_scope(&self, label: &str, options: CaptureOptions) -> Result<CaptureScope> {
        self.scope(label, options, None)
    }

    /// Create a scope recording only `stream`.
    pub fn create_stream_scope(
        &self,
        stream: &Stream,
        label: &str,
        options: CaptureOptions,
    ) -> Result<CaptureScope> {
        if stream.device_id() != self.device.id() {
            return Err(ArcheError::CrossDeviceReference {
                resource: format!("stream #{}", stream.id()),
                owner: stream.device_id(),
                target: self.device.id(),
            });
        }
        self.scope(label, options, Some(stream.id()))
    }

    fn scope(
        &self,
        label: &str,
        options: CaptureOptions,
        stream: Option<u64>,
    ) -> Result<CaptureScope> {
        self.device.shared.ensure_usable()?;
        let id = next_id();
        debug!(device = %self.device.name(), scope = id, label, "Created capture scope");
        Ok(CaptureScope {
            id,
            label: label.to_string(),
            options,
            stream,
            device: Arc::clone(&self.device.shared),
            state: Mutex::new(ScopeState::default()),
        })
    }
}

#[derive(Default)]
struct ScopeState {
    capturing: bool,
    started: u32,
    markers: u32,
    last: Option<CaptureTrace>,
}

/// A named, start/stop-bracketed capture window.
pub struct CaptureScope {
    id: u64,
    label: String,
    options: CaptureOptions,
    stream: Option<u64>,
    device: Arc<DeviceShared>,
    state: Mutex<ScopeState>,
}

impl CaptureScope {
    /// Scope label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Scope options.
    pub fn options(&self) -> &CaptureOptions {
        &self.options
    }

    /// Stream this scope is limited to, if any.
    pub fn stream_id(&self) -> Option<u64> {
        self.stream
    }

    /// Whether the scope is capturing.
    pub fn is_capturing(&self) -> bool {
        self.state.lock().capturing
    }

    /// Number of completed or running capture cycles.
    pub fn capture_count(&self) -> u32 {
        self.state.lock().started
    }

    /// `Idle -> Capturing`.
    ///
    /// Fails with `InvalidState` if this scope is already capturing, if
    /// another scope of the device is, or if a single-use scope was
    /// already used.
    pub fn start_debug_capture(&self) -> Result<()> {
        self.device.ensure_alive()?;
        let mut state = self.state.lock();
        if state.capturing {
            return Err(ArcheError::state(format!(
                "capture scope '{}' is already capturing",
                self.label
            )));
        }
        if !self.options.reusable && state.started > 0 {
            return Err(ArcheError::state(format!(
                "capture scope '{}' is single-use",
                self.label
            )));
        }
        self.device
            .capture
            .activate(self.id, &self.label, self.stream, self.options.trigger)?;
        state.capturing = true;
        state.started += 1;
        info!(device = %self.device.info.name, label = %self.label, "Debug capture started");
        Ok(())
    }

    /// `Capturing -> Idle`, flushing the recorded trace.
    ///
    /// Fails with `InvalidState` if the scope is not capturing. A trace
    /// document that cannot be written is reported in the log and leaves
    /// `path` empty; the capture still stops.
    pub fn stop_debug_capture(&self) -> Result<CaptureSummary> {
        let mut state = self.state.lock();
        if !state.capturing {
            return Err(ArcheError::state(format!(
                "capture scope '{}' is not capturing",
                self.label
            )));
        }
        state.capturing = false;
        let trace = self.device.capture.deactivate(self.id).unwrap_or_default();

        let path = match &self.options.destination {
            CaptureDestination::DeveloperTools => None,
            CaptureDestination::TraceDocument { path } => {
                let path = path.clone().unwrap_or_else(|| self.default_path());
                match std::fs::write(&path, trace.to_json()) {
                    Ok(()) => Some(path),
                    Err(e) => {
                        warn!("Failed to write trace document {}: {}", path.display(), e);
                        None
                    }
                }
            }
        };

        let summary = CaptureSummary {
            label: self.label.clone(),
            events: trace.events.len(),
            path,
        };
        info!(
            device = %self.device.info.name,
            label = %self.label,
            events = summary.events,
            "Debug capture stopped"
        );
        state.last = Some(trace);
        Ok(summary)
    }

    /// Open a marker interval named after the scope.
    pub fn mark_begin(&self) -> Result<()> {
        let name = {
            let mut state = self.state.lock();
            state.markers += 1;
            format!("{}#{}", self.label, state.markers)
        };
        self.mark_begin_named(&name)
    }

    /// Open a named marker interval; only valid while capturing.
    pub fn mark_begin_named(&self, name: &str) -> Result<()> {
        self.ensure_capturing()?;
        self.device.capture.marker(self.id, Some(name))
    }

    /// Close the open marker interval; only valid while capturing.
    pub fn mark_end(&self) -> Result<()> {
        self.ensure_capturing()?;
        self.device.capture.marker(self.id, None)
    }

    /// Trace of the most recent finished capture.
    pub fn last_trace(&self) -> Option<CaptureTrace> {
        self.state.lock().last.clone()
    }

    fn ensure_capturing(&self) -> Result<()> {
        if !self.state.lock().capturing {
            return Err(ArcheError::state(format!(
                "capture scope '{}' is not capturing",
                self.label
            )));
        }
        Ok(())
    }

    fn default_path(&self) -> PathBuf {
        let stem: String = self
            .label
            .chars()
            .map(|c| {
                if c.is_alphanumeric() || c == '-' || c == '_' || c == '.' {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let file = if stem.is_empty() {
            "capture.trace.json".to_string()
        } else {
            format!("{}.trace.json", stem)
        };
        match &self.device.capture_dir {
            Some(dir) => dir.join(file),
            None => PathBuf::from(file),
        }
    }
}

impl Drop for CaptureScope {
    fn drop(&mut self) {
        if self.state.get_mut().capturing {
            self.device.capture.deactivate(self.id);
            debug!(label = %self.label, "Capture scope dropped while capturing");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hub_single_active_capture() {
        let hub = CaptureHub::new(1, "test".to_string());
        hub.activate(10, "a", None, CaptureTrigger::OnStart).unwrap();
        assert!(matches!(
            hub.activate(11, "b", None, CaptureTrigger::OnStart),
            Err(ArcheError::InvalidState(_))
        ));
        assert!(hub.deactivate(11).is_none());
        assert!(hub.deactivate(10).is_some());
        assert!(!hub.is_active());
    }

    #[test]
    fn test_hub_stream_filter() {
        let hub = CaptureHub::new(1, "test".to_string());
        hub.activate(10, "a", Some(7), CaptureTrigger::OnStart).unwrap();
        assert!(hub.is_recording(7));
        assert!(!hub.is_recording(8));

        let now = Instant::now();
        hub.record_span(8, "ignored", category::EXECUTE, now, Duration::ZERO, TraceArgs::default());
        hub.record_span(7, "kept", category::EXECUTE, now, Duration::from_micros(3), TraceArgs::default());

        let trace = hub.deactivate(10).unwrap();
        assert_eq!(trace.events.len(), 1);
        assert_eq!(trace.events[0].name, "kept");
        assert_eq!(trace.events[0].dur, Some(3));
        assert!(trace.streams.contains_key(&7));
    }

    #[test]
    fn test_hub_marker_trigger() {
        let hub = CaptureHub::new(1, "test".to_string());
        hub.activate(10, "a", None, CaptureTrigger::Markers).unwrap();
        assert!(!hub.is_recording(3));

        hub.marker(10, Some("region")).unwrap();
        assert!(hub.is_recording(3));
        assert!(matches!(
            hub.marker(10, Some("nested")),
            Err(ArcheError::InvalidState(_))
        ));
        hub.marker(10, None).unwrap();
        assert!(matches!(hub.marker(10, None), Err(ArcheError::InvalidState(_))));
        assert!(!hub.is_recording(3));

        let trace = hub.deactivate(10).unwrap();
        let phases: Vec<_> = trace.events.iter().map(|e| e.ph.as_str()).collect();
        assert_eq!(phases, vec!["B", "E"]);
    }

    #[test]
    fn test_hub_closes_open_marker_on_stop() {
        let hub = CaptureHub::new(1, "test".to_string());
        hub.activate(10, "a", None, CaptureTrigger::OnStart).unwrap();
        hub.marker(10, Some("left-open")).unwrap();
        let trace = hub.deactivate(10).unwrap();
        assert_eq!(trace.events.len(), 2);
        assert_eq!(trace.events[1].ph, "E");
        assert_eq!(trace.events[1].name, "left-open");
    }

    #[test]
    fn test_options() {
        let opts = CaptureOptions::trace_document(None)
            .with_trigger(CaptureTrigger::Markers)
            .single_use();
        assert_eq!(opts.destination, CaptureDestination::TraceDocument { path: None });
        assert_eq!(opts.trigger, CaptureTrigger::Markers);
        assert!(!opts.reusable);
        assert!(CaptureOptions::default().reusable);
    }
}
