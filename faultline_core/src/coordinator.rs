//! Fault coordinator.
//!
//! Every channel funnels into [`Coordinator::dispatch`], which runs the same
//! pipeline synchronously on the faulting thread:
//!
//! ```text
//!  channel ──► registry gate ──► reentrancy guard ──► normalize ──► policy ──► sink
//!               (observable,       (per thread,         (strip        (Handled/
//!                relay enabled)     per channel)         wrappers)     Fatal/Delegated)
//! ```
//!
//! # Threading
//!
//! The coordinator holds no mutable state of its own. Dispatch state lives
//! on the stack and in thread-locals, so a fault on one thread never blocks
//! or corrupts dispatch on another. The relay state is the only shared
//! mutable resource and is owned by the [`FaultRelay`].
//!
//! # Native precedence
//!
//! While the relay is enabled, native faults are delivered on
//! `NativeCorruptedState` and never reach `BackgroundThreadUnhandled`, even
//! when they happen on a background thread. While it is disabled they are
//! not observed at all.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use static_assertions::assert_impl_all;
use tracing::{debug, info, warn};

use crate::channel::{ChannelRegistry, ChannelSet, OriginChannel};
use crate::config::CoordinatorConfig;
use crate::error::CoordinatorError;
use crate::fault::{FaultRecord, NativeFault, Payload};
use crate::host::install_panic_capture;
use crate::normalize::{normalize, wrapper_depth};
use crate::policy::{DispositionOutcome, DispositionRule};
use crate::relay::{FaultRelay, NativeObserver, RelayPhase};
use crate::sink::DiagnosticSink;
use crate::stack::CallStack;

thread_local! {
    static ACTIVE_CHANNELS: Cell<ChannelSet> = const { Cell::new(ChannelSet::empty()) };
    static CURRENT_STACK: RefCell<Option<CallStack>> = const { RefCell::new(None) };
}

/// Fault handed over by a host hook.
///
/// `handled` is the out-parameter: the coordinator sets it when the
/// disposition is `Handled`, and the host then suppresses its own default
/// fatal behavior.
#[derive(Debug)]
pub struct UnhandledFault {
    /// Payload as caught by the host.
    pub payload: Payload,
    /// Stack captured at the fault point. Moved into the record on dispatch.
    pub call_stack: CallStack,
    /// Set by [`Coordinator::raise`].
    pub handled: bool,
}

impl UnhandledFault {
    /// Not-yet-handled fault.
    pub fn new(payload: Payload, call_stack: CallStack) -> Self {
        Self {
            payload,
            call_stack,
            handled: false,
        }
    }
}

/// Unified fault-dispatch coordinator.
pub struct Coordinator {
    registry: ChannelRegistry,
    policy: Box<dyn DispositionRule>,
    sink: Arc<dyn DiagnosticSink>,
    relay: Arc<dyn FaultRelay>,
    start_enabled: bool,
}

assert_impl_all!(Coordinator: Send, Sync);

impl Coordinator {
    /// Coordinator using `policy` and `sink`, gated by `relay`.
    pub fn new(
        policy: impl DispositionRule + 'static,
        sink: Arc<dyn DiagnosticSink>,
        relay: Arc<dyn FaultRelay>,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry: ChannelRegistry::new(),
            policy: Box::new(policy),
            sink,
            relay,
            start_enabled: true,
        })
    }

    /// Coordinator built from a loaded configuration file.
    pub fn from_config(config: &CoordinatorConfig, relay: Arc<dyn FaultRelay>) -> Arc<Self> {
        Arc::new(Self {
            registry: ChannelRegistry::new(),
            policy: Box::new(config.policy.to_policy()),
            sink: config.sink.build(),
            relay,
            start_enabled: config.relay.enabled,
        })
    }

    /// Attach to the relay, install it and the panic capture hook.
    ///
    /// The relay delivers native faults to the coordinator that attached
    /// last, so a coordinator initialized on an already installed relay takes
    /// it over. The installed state itself is left unchanged in that case.
    pub fn initialize(self: &Arc<Self>) -> Result<(), CoordinatorError> {
        let observer: Weak<dyn NativeObserver> = Arc::downgrade(self) as Weak<dyn NativeObserver>;
        self.relay.attach(observer);
        if self.relay.state().phase == RelayPhase::Installed {
            self.prepare_thread();
            debug!("relay already installed; coordinator attached");
            return Ok(());
        }
        self.relay.initialize()?;
        if !self.start_enabled {
            self.relay.disable()?;
        }
        install_panic_capture();
        info!(relay_enabled = self.relay.is_enabled(), "fault coordinator initialized");
        Ok(())
    }

    /// Uninstall the relay. Native faults take the platform default path
    /// afterwards.
    pub fn teardown(&self) {
        self.relay.teardown();
        info!("fault coordinator torn down");
    }

    /// Ready the calling thread for native faults.
    ///
    /// Hosts call this at the start of every thread that runs native code.
    pub fn prepare_thread(&self) {
        if let Err(e) = self.relay.prepare_thread() {
            warn!("{}; native faults on this thread may not be reported", e);
        }
    }

    /// Toggle native fault translation.
    pub fn set_relay_enabled(&self, enabled: bool) -> Result<(), CoordinatorError> {
        self.relay.set_enabled(enabled)?;
        info!(enabled, "native fault relay toggled");
        Ok(())
    }

    /// The relay gating `NativeCorruptedState`.
    pub fn relay(&self) -> &Arc<dyn FaultRelay> {
        &self.relay
    }

    /// Channel guarantees.
    pub fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    /// Run one fault through normalizer, policy and sink.
    ///
    /// Returns `None` when the channel is silent: it is never observable, or
    /// it is `NativeCorruptedState` and the relay is not enabled. A fault
    /// raised while this thread is already dispatching on the same channel
    /// is not dispatched again and yields `Delegated`.
    pub fn dispatch(
        &self,
        channel: OriginChannel,
        raw: Payload,
        call_stack: CallStack,
    ) -> Option<DispositionOutcome> {
        let spec = self.registry.spec(channel);
        if !spec.observable {
            debug!(channel = %channel, "fault resolved inside the native region; nothing to dispatch");
            return None;
        }
        if channel == OriginChannel::NativeCorruptedState && !self.relay.is_enabled() {
            debug!(channel = %channel, "relay disabled; native fault left to the platform");
            return None;
        }
        let Some(_guard) = ChannelGuard::enter(channel) else {
            warn!(channel = %channel, "fault raised while dispatching on the same channel; delegating");
            return Some(DispositionOutcome::Delegated);
        };

        let mut record = FaultRecord::new(channel, raw, call_stack, spec.recoverable);
        record.stack_validity = spec.stack_validity;
        let outcome = match normalize(&record.raw_payload) {
            Ok(unwrapped) => {
                record.unwrapped_payload = unwrapped;
                record.recoverable &= record.unwrapped_payload.recoverable();
                self.policy.decide(channel, record.unwrapped_payload.as_ref())
            }
            Err(e) => {
                warn!(channel = %channel, "{}; treating as fatal", e);
                record.malformed = true;
                record.recoverable = false;
                DispositionOutcome::Fatal
            }
        };
        record.disposition = Some(outcome);
        debug!(
            channel = %channel,
            disposition = %outcome,
            wrappers = wrapper_depth(&record.raw_payload),
            frames = record.call_stack.len(),
            "fault dispatched"
        );

        if outcome != DispositionOutcome::Delegated {
            self.report(record);
        }
        Some(outcome)
    }

    /// Host hook entry point: dispatch and set `fault.handled`.
    pub fn raise(
        &self,
        channel: OriginChannel,
        fault: &mut UnhandledFault,
    ) -> Option<DispositionOutcome> {
        let stack = std::mem::take(&mut fault.call_stack);
        let outcome = self.dispatch(channel, Arc::clone(&fault.payload), stack);
        fault.handled = outcome == Some(DispositionOutcome::Handled);
        outcome
    }

    /// Stack of the fault being reported on this thread.
    ///
    /// Empty when no fault is being reported, never an error.
    pub fn capture_call_stack(&self) -> CallStack {
        CURRENT_STACK
            .with(|slot| slot.try_borrow().ok().and_then(|stack| stack.clone()))
            .unwrap_or_default()
    }

    fn report(&self, record: FaultRecord) {
        let stack = record.call_stack.clone();
        let previous = CURRENT_STACK.with(|slot| slot.replace(Some(stack)));
        let sink = &self.sink;
        if panic::catch_unwind(AssertUnwindSafe(|| sink.report(record))).is_err() {
            warn!("diagnostic sink panicked while reporting a fault");
        }
        CURRENT_STACK.with(|slot| {
            slot.replace(previous);
        });
    }
}

impl NativeObserver for Coordinator {
    fn on_native_fault(&self, fault: NativeFault, stack: CallStack) -> Option<DispositionOutcome> {
        self.dispatch(OriginChannel::NativeCorruptedState, Arc::new(fault), stack)
    }
}

impl fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coordinator")
            .field("relay", &self.relay.state())
            .field("start_enabled", &self.start_enabled)
            .finish_non_exhaustive()
    }
}

/// Marks `channel` as dispatching on this thread until dropped.
struct ChannelGuard {
    flag: ChannelSet,
}

impl ChannelGuard {
    fn enter(channel: OriginChannel) -> Option<Self> {
        let flag = channel.flag();
        ACTIVE_CHANNELS.with(|active| {
            let current = active.get();
            if current.contains(flag) {
                return None;
            }
            active.set(current | flag);
            Some(Self { flag })
        })
    }
}

impl Drop for ChannelGuard {
    fn drop(&mut self) {
        ACTIVE_CHANNELS.with(|active| active.set(active.get().difference(self.flag)));
    }
}
