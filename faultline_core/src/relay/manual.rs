//! In-process relay that never touches process signal state.
//!
//! Used by tests and by hosts that detect native faults themselves (for
//! example a sandboxed interpreter reporting a trap). A fault is delivered
//! with [`ManualRelay::trigger`] and follows exactly the same enable rules
//! as [`SignalRelay`](super::SignalRelay).

use parking_lot::{Mutex, RwLock};
use std::sync::Weak;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

use super::{FaultRelay, NativeObserver, RelayError, RelayState, RelaySwitch};
use crate::fault::NativeFault;
use crate::policy::DispositionOutcome;
use crate::stack::CallStack;

/// Relay driven by explicit [`trigger`](Self::trigger) calls.
#[derive(Default)]
pub struct ManualRelay {
    switch: RelaySwitch,
    lifecycle: Mutex<()>,
    observer: RwLock<Option<Weak<dyn NativeObserver>>>,
    installs: AtomicUsize,
}

impl ManualRelay {
    /// Uninitialized relay with no observer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a native fault as the trap would.
    ///
    /// Returns `None` when the relay is not enabled or nothing is attached;
    /// the caller then applies the platform default.
    pub fn trigger(&self, fault: NativeFault) -> Option<DispositionOutcome> {
        if !self.switch.is_enabled() {
            debug!(fault = %fault, "relay disabled; native fault not observed");
            return None;
        }
        let observer = self.observer.read().as_ref().and_then(Weak::upgrade)?;
        observer.on_native_fault(fault, CallStack::capture())
    }

    /// How many times the trap was actually installed.
    pub fn install_count(&self) -> usize {
        self.installs.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for ManualRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ManualRelay")
            .field("state", &self.switch.state())
            .field("installs", &self.install_count())
            .finish()
    }
}

impl FaultRelay for ManualRelay {
    fn initialize(&self) -> Result<(), RelayError> {
        let _lifecycle = self.lifecycle.lock();
        if self.switch.install() {
            self.installs.fetch_add(1, Ordering::Relaxed);
            debug!("manual relay installed");
        }
        Ok(())
    }

    fn teardown(&self) {
        let _lifecycle = self.lifecycle.lock();
        if self.switch.tear_down() {
            debug!("manual relay torn down");
        }
    }

    fn enable(&self) -> Result<(), RelayError> {
        self.switch.set_enabled(true)
    }

    fn disable(&self) -> Result<(), RelayError> {
        self.switch.set_enabled(false)
    }

    fn state(&self) -> RelayState {
        self.switch.state()
    }

    fn attach(&self, observer: Weak<dyn NativeObserver>) {
        *self.observer.write() = Some(observer);
    }

    fn is_enabled(&self) -> bool {
        self.switch.is_enabled()
    }
}
