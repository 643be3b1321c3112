//! Native fault relay.
//!
//! The relay is the process-wide switch that decides whether a fault raised
//! inside a native call is translated into a `NativeCorruptedState` record
//! or left to the platform's default (fatal) handling.
//!
//! # Lifecycle
//!
//! ```text
//!  Uninitialized ──initialize()──► Installed{enabled} ──teardown()──► TornDown
//!                                   ▲   │ enable()/disable()              │
//!                                   └───┘                                 │
//!                                   ◄──────────── initialize() ───────────┘
//! ```
//!
//! - `initialize()` installs the trap and sets `enabled = true`. Calling it
//!   while installed is a no-op.
//! - `enable()` / `disable()` are idempotent inside the installed window and
//!   return [`RelayError::Misuse`] outside it.
//! - `teardown()` uninstalls the trap and resets `enabled = false`. Calling
//!   it outside the installed window is a no-op.
//!
//! Two implementations share [`RelaySwitch`]: [`SignalRelay`] traps real
//! signals, [`ManualRelay`] never touches process signal state and is driven
//! by [`ManualRelay::trigger`].
//!
//! Native calls that should survive a handled hardware fault run under
//! [`guarded`].

mod guard;
mod manual;
mod signal;
mod switch;

pub use guard::guarded;
pub use manual::ManualRelay;
pub use signal::{ALT_STACK_SIZE, OBSERVED_SIGNALS, SignalRelay};
pub use switch::RelaySwitch;

use std::fmt;
use std::sync::Weak;
use thiserror::Error;

use crate::fault::NativeFault;
use crate::policy::DispositionOutcome;
use crate::stack::CallStack;

/// Phase of the relay lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayPhase {
    /// `initialize()` has not run yet.
    Uninitialized,
    /// The trap is installed; `enabled` may be toggled.
    Installed,
    /// `teardown()` ran; native faults take the platform default path.
    TornDown,
}

impl fmt::Display for RelayPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RelayPhase::Uninitialized => "uninitialized",
            RelayPhase::Installed => "installed",
            RelayPhase::TornDown => "torn down",
        })
    }
}

/// Snapshot of the relay state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RelayState {
    /// Lifecycle phase.
    pub phase: RelayPhase,
    /// Whether native faults are currently translated into records.
    pub enabled: bool,
}

/// Relay lifecycle errors.
#[derive(Debug, Error)]
pub enum RelayError {
    /// `enable()`/`disable()` outside the initialize/teardown window.
    #[error("relay {operation}() called while {phase}")]
    Misuse {
        /// Rejected operation.
        operation: &'static str,
        /// Phase at the time of the call.
        phase: RelayPhase,
    },

    /// A signal handler could not be installed.
    #[error("failed to install handler for {signal}: {source}")]
    Install {
        /// Signal name.
        signal: &'static str,
        /// Underlying OS error.
        #[source]
        source: nix::errno::Errno,
    },

    /// The calling thread's alternate signal stack could not be set up.
    #[error("failed to set up the alternate signal stack: {source}")]
    AltStack {
        /// Underlying OS error.
        #[source]
        source: nix::errno::Errno,
    },
}

/// Receiver of native faults that crossed the relay.
pub trait NativeObserver: Send + Sync {
    /// Dispatch a native fault. `None` means the channel stayed silent.
    fn on_native_fault(&self, fault: NativeFault, stack: CallStack) -> Option<DispositionOutcome>;
}

/// Toggleable mechanism that lets native faults be observed.
///
/// All reads and writes of the relay state go through this interface.
pub trait FaultRelay: Send + Sync {
    /// Install the trap and enable the relay. No-op while installed.
    fn initialize(&self) -> Result<(), RelayError>;

    /// Uninstall the trap and reset `enabled` to false. No-op when not installed.
    fn teardown(&self);

    /// Enable translation of native faults.
    fn enable(&self) -> Result<(), RelayError>;

    /// Disable translation; native faults take the platform default path.
    fn disable(&self) -> Result<(), RelayError>;

    /// Current state.
    fn state(&self) -> RelayState;

    /// Register the observer native faults are delivered to, replacing any
    /// earlier one.
    fn attach(&self, observer: Weak<dyn NativeObserver>);

    /// Make the calling thread ready to take native faults. No-op by default.
    fn prepare_thread(&self) -> Result<(), RelayError> {
        Ok(())
    }

    /// `enable()` or `disable()`.
    fn set_enabled(&self, enabled: bool) -> Result<(), RelayError> {
        if enabled { self.enable() } else { self.disable() }
    }

    /// Shorthand for `state().enabled`.
    fn is_enabled(&self) -> bool {
        self.state().enabled
    }
}
