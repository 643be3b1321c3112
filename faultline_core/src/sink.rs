//! Diagnostic sinks.
//!
//! A sink receives every record whose disposition is not `Delegated` and
//! renders it as plain text lines:
//!
//! ```text
//! [ui_thread_dispatch] handled (recoverable): panic: boom (at src/app.rs:10:5)
//!   raw: invocation of `open_file` failed: panic: boom (at src/app.rs:10:5)
//!   call stack:
//!    0# app::open_file at ./src/app.rs:10
//!    1# faultline_core::invoke::InvocationTable::invoke at ./src/invoke.rs:88
//! ```
//!
//! The `raw:` line only appears when the channel delivered a wrapper. Stacks
//! from channels that cannot fully vouch for them carry a qualifier, as in
//! `call stack (best effort):`. Sinks can be called from inside a signal
//! handler and must not panic; the coordinator still runs every `report`
//! under `catch_unwind`.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::io::{self, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{error, warn};

use crate::channel::OriginChannel;
use crate::error::FaultClass;
use crate::fault::FaultRecord;
use crate::policy::DispositionOutcome;

/// Default number of frames rendered per record.
pub const DEFAULT_MAX_FRAMES: usize = 64;

/// Observation surface for resolved faults.
pub trait DiagnosticSink: Send + Sync {
    /// Render one record. Must not panic.
    fn report(&self, record: FaultRecord);
}

/// Text lines for `record`, header first.
pub fn render(record: &FaultRecord, include_stack: bool, max_frames: usize) -> Vec<String> {
    let disposition = record
        .disposition
        .map_or("undecided", DispositionOutcome::label);
    let class = record.class().map_or("unclassified", |class| class.label());

    let mut lines = Vec::with_capacity(3 + max_frames.min(record.call_stack.len()));
    lines.push(format!(
        "[{}] {} ({}): {}",
        record.origin_channel, disposition, class, record.unwrapped_payload
    ));
    if record.was_wrapped() {
        lines.push(format!("  raw: {}", record.raw_payload));
    }
    if include_stack && !record.call_stack.is_empty() {
        lines.push(match record.stack_validity.qualifier() {
            Some(qualifier) => format!("  call stack ({qualifier}):"),
            None => "  call stack:".to_string(),
        });
        lines.extend(
            record
                .call_stack
                .iter()
                .take(max_frames)
                .map(|frame| format!("  {frame}")),
        );
        let hidden = record.call_stack.len().saturating_sub(max_frames);
        if hidden > 0 {
            lines.push(format!("  ... {hidden} more frames"));
        }
    }
    lines
}

// ─── Tracing ────────────────────────────────────────────────────────

/// Reports through `tracing`: `error!` for terminating records, `warn!`
/// otherwise.
#[derive(Debug, Clone, Copy)]
pub struct TracingSink {
    include_stack: bool,
    max_frames: usize,
}

impl TracingSink {
    /// Sink rendering at most `max_frames` frames when `include_stack` is set.
    pub const fn new(include_stack: bool, max_frames: usize) -> Self {
        Self {
            include_stack,
            max_frames,
        }
    }
}

impl Default for TracingSink {
    fn default() -> Self {
        Self::new(true, DEFAULT_MAX_FRAMES)
    }
}

impl DiagnosticSink for TracingSink {
    fn report(&self, record: FaultRecord) {
        let channel = record.origin_channel;
        let fatal = record.class().is_some_and(FaultClass::is_terminating);
        for line in render(&record, self.include_stack, self.max_frames) {
            if fatal {
                error!(channel = %channel, "{}", line);
            } else {
                warn!(channel = %channel, "{}", line);
            }
        }
    }
}

// ─── Writer ─────────────────────────────────────────────────────────

/// Writes rendered lines to any `Write` target.
///
/// Native records never wait for the writer lock: if another thread holds
/// it, the record is counted in [`dropped`](Self::dropped) instead.
pub struct WriterSink<W> {
    writer: Mutex<W>,
    include_stack: bool,
    max_frames: usize,
    dropped: AtomicUsize,
}

impl<W: Write + Send> WriterSink<W> {
    /// Sink over `writer`.
    pub fn new(writer: W, include_stack: bool, max_frames: usize) -> Self {
        Self {
            writer: Mutex::new(writer),
            include_stack,
            max_frames,
            dropped: AtomicUsize::new(0),
        }
    }

    /// Records that could not be written.
    pub fn dropped(&self) -> usize {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Give the writer back.
    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

impl WriterSink<io::Stderr> {
    /// Sink over the process's standard error.
    pub fn stderr(include_stack: bool, max_frames: usize) -> Self {
        Self::new(io::stderr(), include_stack, max_frames)
    }
}

impl<W: Write + Send> DiagnosticSink for WriterSink<W> {
    fn report(&self, record: FaultRecord) {
        let mut writer = if record.origin_channel == OriginChannel::NativeCorruptedState {
            match self.writer.try_lock() {
                Some(writer) => writer,
                None => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }
        } else {
            self.writer.lock()
        };

        let written = render(&record, self.include_stack, self.max_frames)
            .iter()
            .try_for_each(|line| writeln!(writer, "{line}"))
            .and_then(|()| writer.flush());
        if written.is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

// ─── Memory ─────────────────────────────────────────────────────────

/// Keeps every record; used by tests and by hosts that inspect reports.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<FaultRecord>>,
}

impl MemorySink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of every record received so far.
    pub fn records(&self) -> Vec<FaultRecord> {
        self.records.lock().clone()
    }

    /// Number of records received.
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// True when nothing was reported.
    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Drain the received records.
    pub fn take(&self) -> Vec<FaultRecord> {
        std::mem::take(&mut *self.records.lock())
    }
}

impl DiagnosticSink for MemorySink {
    fn report(&self, record: FaultRecord) {
        self.records.lock().push(record);
    }
}

// ─── Config ─────────────────────────────────────────────────────────

/// Sink implementation selected by `[sink] kind`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    /// [`TracingSink`].
    #[default]
    Tracing,
    /// [`WriterSink`] over stderr.
    Stderr,
}

/// `[sink]` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SinkConfig {
    /// Which sink to build.
    #[serde(default)]
    pub kind: SinkKind,
    /// Render the call stack below the header.
    #[serde(default = "default_include_stack")]
    pub include_stack: bool,
    /// Frames rendered per record.
    #[serde(default = "default_max_frames")]
    pub max_frames: usize,
}

fn default_include_stack() -> bool {
    true
}

fn default_max_frames() -> usize {
    DEFAULT_MAX_FRAMES
}

impl Default for SinkConfig {
    fn default() -> Self {
        Self {
            kind: SinkKind::default(),
            include_stack: default_include_stack(),
            max_frames: default_max_frames(),
        }
    }
}

impl SinkConfig {
    /// Build the configured sink.
    pub fn build(&self) -> Arc<dyn DiagnosticSink> {
        match self.kind {
            SinkKind::Tracing => Arc::new(TracingSink::new(self.include_stack, self.max_frames)),
            SinkKind::Stderr => Arc::new(WriterSink::stderr(self.include_stack, self.max_frames)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::{InvocationFault, PanicFault, Payload};
    use crate::stack::CallStack;

    const STACK: &str = "   0: app::leaf
             at ./src/leaf.rs:3:5
   1: app::trunk
             at ./src/trunk.rs:9:1
   2: app::root
";

    fn handled(raw: Payload, unwrapped: Payload) -> FaultRecord {
        let mut record = FaultRecord::new(
            OriginChannel::UiThreadDispatch,
            raw,
            CallStack::parse(STACK),
            true,
        );
        record.unwrapped_payload = unwrapped;
        record.disposition = Some(DispositionOutcome::Handled);
        record
    }

    #[test]
    fn header_names_channel_disposition_and_payload() {
        let payload: Payload = Arc::new(PanicFault::new("boom", None));
        let lines = render(&handled(payload.clone(), payload), false, 8);
        assert_eq!(lines, vec!["[ui_thread_dispatch] handled (recoverable): panic: boom"]);
    }

    #[test]
    fn wrapped_records_show_the_raw_payload() {
        let inner: Payload = Arc::new(PanicFault::new("boom", None));
        let raw: Payload = Arc::new(InvocationFault::new("open", inner.clone()));
        let lines = render(&handled(raw, inner), false, 8);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1], "  raw: invocation of `open` failed: panic: boom");
    }

    #[test]
    fn stack_is_rendered_one_frame_per_line_and_truncated() {
        let payload: Payload = Arc::new(PanicFault::new("boom", None));
        let lines = render(&handled(payload.clone(), payload), true, 2);
        assert_eq!(lines[1], "  call stack:");
        assert_eq!(lines[2], "   0# app::leaf at ./src/leaf.rs:3");
        assert_eq!(lines[3], "   1# app::trunk at ./src/trunk.rs:9");
        assert_eq!(lines[4], "  ... 1 more frames");
    }

    #[test]
    fn native_stacks_are_marked_best_effort() {
        use crate::channel::StackValidity;
        let payload: Payload = Arc::new(crate::fault::NativeFault::raised(libc::SIGFPE));
        let mut record = handled(payload.clone(), payload);
        record.origin_channel = OriginChannel::NativeCorruptedState;
        record.stack_validity = StackValidity::BestEffort;
        let lines = render(&record, true, 8);
        assert_eq!(lines[1], "  call stack (best effort):");
    }

    #[test]
    fn writer_sink_writes_every_line() {
        let payload: Payload = Arc::new(PanicFault::new("boom", None));
        let sink = WriterSink::new(Vec::new(), true, 8);
        sink.report(handled(payload.clone(), payload));
        assert_eq!(sink.dropped(), 0);
        let text = String::from_utf8(sink.into_inner()).unwrap();
        assert_eq!(text.lines().count(), 5);
    }

    #[test]
    fn native_records_are_dropped_while_the_writer_is_busy() {
        let payload: Payload = Arc::new(PanicFault::new("x", None));
        let sink = WriterSink::new(Vec::new(), false, 8);
        let mut record = handled(payload.clone(), payload);
        record.origin_channel = OriginChannel::NativeCorruptedState;

        let guard = sink.writer.lock();
        sink.report(record);
        drop(guard);
        assert_eq!(sink.dropped(), 1);
    }

    #[test]
    fn memory_sink_drains() {
        let payload: Payload = Arc::new(PanicFault::new("x", None));
        let sink = MemorySink::new();
        sink.report(handled(payload.clone(), payload));
        assert_eq!(sink.len(), 1);
        assert_eq!(sink.take().len(), 1);
        assert!(sink.is_empty());
    }

    #[test]
    fn sink_config_defaults() {
        use faultline_common::config::ConfigLoader;
        let config = SinkConfig::from_toml("kind = \"stderr\"\n").unwrap();
        assert_eq!(config.kind, SinkKind::Stderr);
        assert!(config.include_stack);
        assert_eq!(config.max_frames, DEFAULT_MAX_FRAMES);
        assert!(SinkConfig::from_toml("colour = true\n").is_err());
    }
}
