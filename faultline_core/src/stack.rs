//! Call stack capture.
//!
//! Frames come from `std::backtrace::Backtrace`, forced on regardless of
//! `RUST_BACKTRACE`, and are parsed from its textual form into [`Frame`]s.
//! When the platform cannot produce a backtrace the result is an empty
//! [`CallStack`], never an error.

use std::backtrace::{Backtrace, BacktraceStatus};
use std::fmt;

/// Symbol prefixes belonging to the capture and panic machinery itself.
const CAPTURE_FRAME_PREFIXES: &[&str] = &[
    "std::backtrace",
    "<std::backtrace",
    "faultline_core::stack::",
    "faultline_core::host::panic::",
    "<alloc::boxed::Box<F,A> as core::ops::function::Fn",
    "std::panicking::",
    "std::sys::backtrace::",
    "rust_begin_unwind",
    "__rustc::rust_begin_unwind",
    "core::panicking::",
];

/// One resolved frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Position in the stack, innermost first.
    pub index: usize,
    /// Demangled symbol name.
    pub symbol: String,
    /// Source file, when debug info is available.
    pub file: Option<String>,
    /// Source line, when debug info is available.
    pub line: Option<u32>,
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:>2}# {}", self.index, self.symbol)?;
        match (&self.file, self.line) {
            (Some(file), Some(line)) => write!(f, " at {file}:{line}"),
            (Some(file), None) => write!(f, " at {file}"),
            _ => Ok(()),
        }
    }
}

/// Ordered frames, innermost (most recent call) first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallStack {
    frames: Vec<Frame>,
}

impl CallStack {
    /// Valid stack with no frames.
    pub const fn empty() -> Self {
        Self { frames: Vec::new() }
    }

    /// Stack of the calling thread.
    pub fn capture() -> Self {
        Self::from_backtrace(&Backtrace::force_capture())
    }

    /// Frames of an already captured backtrace.
    pub fn from_backtrace(backtrace: &Backtrace) -> Self {
        if backtrace.status() != BacktraceStatus::Captured {
            return Self::empty();
        }
        Self::parse(&backtrace.to_string())
    }

    /// Parse the textual form produced by `Backtrace`'s `Display`.
    ///
    /// ```text
    ///    0: app::worker::run
    ///              at ./src/worker.rs:42:9
    /// ```
    ///
    /// Leading frames of the capture machinery are dropped and the
    /// remaining frames renumbered from zero.
    pub fn parse(text: &str) -> Self {
        let mut frames: Vec<Frame> = Vec::new();
        for line in text.lines() {
            let trimmed = line.trim_start();
            if let Some(location) = trimmed.strip_prefix("at ") {
                if let Some(frame) = frames.last_mut() {
                    let (file, line) = split_location(location);
                    frame.file = Some(file.to_string());
                    frame.line = line;
                }
                continue;
            }
            if let Some((index, symbol)) = trimmed.split_once(": ") {
                if index.parse::<usize>().is_ok() {
                    frames.push(Frame {
                        index: 0,
                        symbol: symbol.trim().to_string(),
                        file: None,
                        line: None,
                    });
                }
            }
        }

        let skip = frames
            .iter()
            .take_while(|frame| {
                CAPTURE_FRAME_PREFIXES
                    .iter()
                    .any(|prefix| frame.symbol.starts_with(prefix))
            })
            .count();
        let frames = frames
            .into_iter()
            .skip(skip)
            .enumerate()
            .map(|(index, frame)| Frame { index, ..frame })
            .collect();
        Self { frames }
    }

    /// Frames, innermost first.
    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }

    /// Number of frames.
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    /// True when no frames were captured.
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Keep only the innermost `max` frames.
    pub fn truncate(&mut self, max: usize) {
        self.frames.truncate(max);
    }

    /// Iterate frames, innermost first.
    pub fn iter(&self) -> std::slice::Iter<'_, Frame> {
        self.frames.iter()
    }
}

impl fmt::Display for CallStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for frame in &self.frames {
            writeln!(f, "{frame}")?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a CallStack {
    type Item = &'a Frame;
    type IntoIter = std::slice::Iter<'a, Frame>;

    fn into_iter(self) -> Self::IntoIter {
        self.frames.iter()
    }
}

/// Split `path:line:col` into the path and line number.
fn split_location(location: &str) -> (&str, Option<u32>) {
    let numeric = |s: &str| s.parse::<u32>().ok();
    if let Some((head, tail)) = location.rsplit_once(':') {
        if let Some((file, line)) = head.rsplit_once(':') {
            if let (Some(line), Some(_col)) = (numeric(line), numeric(tail)) {
                return (file, Some(line));
            }
        }
        if let Some(line) = numeric(tail) {
            return (head, Some(line));
        }
    }
    (location, None)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "   0: std::backtrace_rs::backtrace::libunwind::trace
             at /rustc/abc/library/std/src/../../backtrace/src/backtrace/libunwind.rs:116:5
   1: std::backtrace::Backtrace::force_capture
             at /rustc/abc/library/std/src/backtrace.rs:312:9
   2: faultline_core::stack::CallStack::capture
             at ./src/stack.rs:57:20
   3: app::worker::run
             at ./src/worker.rs:42:9
   4: std::rt::lang_start_internal
";

    #[test]
    fn parse_skips_capture_frames_and_renumbers() {
        let stack = CallStack::parse(SAMPLE);
        assert_eq!(stack.len(), 2);

        let first = &stack.frames()[0];
        assert_eq!(first.index, 0);
        assert_eq!(first.symbol, "app::worker::run");
        assert_eq!(first.file.as_deref(), Some("./src/worker.rs"));
        assert_eq!(first.line, Some(42));

        let second = &stack.frames()[1];
        assert_eq!(second.index, 1);
        assert_eq!(second.file, None);
    }

    #[test]
    fn frames_render_one_per_line() {
        let stack = CallStack::parse(SAMPLE);
        let rendered = stack.to_string();
        let lines: Vec<&str> = rendered.lines().collect();
        assert_eq!(lines[0], " 0# app::worker::run at ./src/worker.rs:42");
        assert_eq!(lines[1], " 1# std::rt::lang_start_internal");
    }

    #[test]
    fn garbage_input_yields_an_empty_stack() {
        assert!(CallStack::parse("").is_empty());
        assert!(CallStack::parse("disabled backtrace").is_empty());
    }

    #[test]
    fn location_without_column_is_split() {
        assert_eq!(split_location("src/a.rs:10"), ("src/a.rs", Some(10)));
        assert_eq!(split_location("src/a.rs:10:3"), ("src/a.rs", Some(10)));
        assert_eq!(split_location("unknown"), ("unknown", None));
    }

    #[test]
    fn live_capture_never_fails() {
        let stack = CallStack::capture();
        for (i, frame) in stack.iter().enumerate() {
            assert_eq!(frame.index, i);
        }
    }
}
