//! # faultline core
//!
//! Unified fault-dispatch coordinator. Faults observed on a cooperative UI
//! thread, on background threads and inside native calls are funnelled into
//! one pipeline:
//!
//! ```text
//!   UiDispatcher ─────┐
//!   spawn_observed ───┼──► Coordinator::dispatch ──► normalize ──► DispositionRule ──► DiagnosticSink
//!   FaultRelay ───────┘          (OriginChannel)
//! ```
//!
//! ## Modules
//!
//! - [`channel`] - origin channels and their guarantees
//! - [`relay`] - process-wide native fault relay (signal trap + test double)
//!   and recovery points for native calls
//! - [`normalize`] - wrapper stripping
//! - [`policy`] - channel → disposition table
//! - [`sink`] - diagnostic output
//! - [`coordinator`] - the dispatch pipeline
//! - [`host`] - UI dispatcher, observed threads, panic-site capture
//! - [`invoke`] - routines invoked by name
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use faultline_core::prelude::*;
//! use std::sync::Arc;
//!
//! let sink = Arc::new(TracingSink::default());
//! let coordinator = Coordinator::new(DispositionPolicy::default(), sink, Arc::new(SignalRelay::new()));
//! coordinator.initialize()?;
//!
//! let (ui, handle) = UiDispatcher::new(Arc::clone(&coordinator));
//! handle.post(|| panic!("button handler failed"));
//! handle.shutdown();
//! ui.run()?;
//!
//! coordinator.teardown();
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod channel;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod fault;
pub mod host;
pub mod invoke;
pub mod normalize;
pub mod policy;
pub mod relay;
pub mod sink;
pub mod stack;

/// Commonly used types.
pub mod prelude {
    pub use crate::channel::{ChannelRegistry, OriginChannel};
    pub use crate::config::CoordinatorConfig;
    pub use crate::coordinator::{Coordinator, UnhandledFault};
    pub use crate::error::{CoordinatorError, FaultClass};
    pub use crate::fault::{FaultObject, FaultRecord, InvocationFault, NativeFault, PanicFault, Payload};
    pub use crate::host::{FatalFault, UiDispatcher, UiHandle, spawn_observed};
    pub use crate::invoke::{InvocationTable, InvokeError};
    pub use crate::policy::{DispositionOutcome, DispositionPolicy, DispositionRule};
    pub use crate::relay::{FaultRelay, ManualRelay, RelayError, SignalRelay, guarded};
    pub use crate::sink::{DiagnosticSink, MemorySink, TracingSink, WriterSink};
    pub use crate::stack::CallStack;
}
