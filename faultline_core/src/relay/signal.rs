//! Signal-backed relay.
//!
//! Installs `SA_SIGINFO | SA_ONSTACK` handlers for the platform fault
//! signals and forwards each fault to the attached observer while the relay
//! is enabled. The previously installed action of every signal is kept and
//! restored on teardown.
//!
//! # Handler outcome
//!
//! | Outcome | Software-sent signal | Hardware fault |
//! |---------|----------------------|----------------|
//! | `Handled` | return, execution resumes | jump to the [`guarded`] point, else default action |
//! | `Fatal` | default action | default action |
//! | `Delegated` / relay disabled | default action | previous handler |
//!
//! A hardware fault re-executes the faulting instruction when the handler
//! returns, so it can only resume at a recovery point armed by [`guarded`].
//!
//! # Handler constraints
//!
//! Inside the handler, state is only read through atomics, const
//! thread-locals and `try_read`; a lock held by the interrupted code makes
//! the fault fall back to the platform path instead of deadlocking. Stack
//! capture and the sink run best-effort.
//!
//! The handler runs on an alternate signal stack of [`ALT_STACK_SIZE`]
//! bytes, installed per thread by [`FaultRelay::prepare_thread`] and by
//! `initialize()` for the calling thread. Threads that were never prepared
//! run the handler on whatever alternate stack the runtime gave them, so
//! no stack is captured there.
//!
//! [`guarded`]: super::guarded

use nix::errno::Errno;
use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use parking_lot::{Mutex, RwLock, const_mutex, const_rwlock};
use std::cell::{Cell, RefCell};
use std::ptr;
use std::sync::Weak;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, info, warn};

use super::guard;
use super::{FaultRelay, NativeObserver, RelayError, RelayState, RelaySwitch};
use crate::fault::NativeFault;
use crate::policy::DispositionOutcome;
use crate::stack::CallStack;

/// Signals trapped while the relay is installed.
pub const OBSERVED_SIGNALS: [Signal; 5] = [
    Signal::SIGSEGV,
    Signal::SIGBUS,
    Signal::SIGILL,
    Signal::SIGFPE,
    Signal::SIGABRT,
];

/// Usable size of the per-thread alternate signal stack. Stack capture,
/// symbolization and sink formatting all run on it.
pub const ALT_STACK_SIZE: usize = 1024 * 1024;

static SWITCH: RelaySwitch = RelaySwitch::new();
static LIFECYCLE: Mutex<()> = const_mutex(());
static OBSERVER: RwLock<Option<Weak<dyn NativeObserver>>> = const_rwlock(None);
static PREVIOUS: RwLock<Vec<(Signal, SigAction)>> = const_rwlock(Vec::new());
static CAPTURE_STACK: AtomicBool = AtomicBool::new(true);

thread_local! {
    static IN_HANDLER: Cell<bool> = const { Cell::new(false) };
    static ALT_STACK_READY: Cell<bool> = const { Cell::new(false) };
    static ALT_STACK: RefCell<Option<AltStack>> = const { RefCell::new(None) };
}

/// Handle to the process-wide signal relay.
///
/// Every handle controls the same singleton state.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalRelay {
    _private: (),
}

impl SignalRelay {
    /// Handle to the process relay.
    pub const fn new() -> Self {
        Self { _private: () }
    }

    /// Capture a call stack inside the handler before dispatch.
    pub fn set_capture_stack(&self, capture: bool) {
        CAPTURE_STACK.store(capture, Ordering::Relaxed);
    }

    /// Whether stacks are captured inside the handler.
    pub fn capture_stack(&self) -> bool {
        CAPTURE_STACK.load(Ordering::Relaxed)
    }
}

impl FaultRelay for SignalRelay {
    fn initialize(&self) -> Result<(), RelayError> {
        if let Err(e) = self.prepare_thread() {
            warn!("{}; native faults on this thread are reported without a stack", e);
        }
        let _lifecycle = LIFECYCLE.lock();
        if SWITCH.is_installed() {
            debug!("native fault relay already installed");
            return Ok(());
        }

        let action = SigAction::new(
            SigHandler::SigAction(on_fault_signal),
            SaFlags::SA_SIGINFO | SaFlags::SA_ONSTACK,
            SigSet::empty(),
        );
        let mut previous = Vec::with_capacity(OBSERVED_SIGNALS.len());
        for sig in OBSERVED_SIGNALS {
            // SAFETY: on_fault_signal honors the constraints in the module docs.
            match unsafe { signal::sigaction(sig, &action) } {
                Ok(old) => previous.push((sig, old)),
                Err(source) => {
                    restore(&previous);
                    return Err(RelayError::Install {
                        signal: sig.as_str(),
                        source,
                    });
                }
            }
        }

        *PREVIOUS.write() = previous;
        SWITCH.install();
        info!(signals = ?OBSERVED_SIGNALS, "native fault relay installed");
        Ok(())
    }

    fn teardown(&self) {
        let _lifecycle = LIFECYCLE.lock();
        if !SWITCH.tear_down() {
            debug!("native fault relay not installed; teardown ignored");
            return;
        }
        let previous = std::mem::take(&mut *PREVIOUS.write());
        restore(&previous);
        info!("native fault relay torn down");
    }

    fn enable(&self) -> Result<(), RelayError> {
        SWITCH.set_enabled(true)?;
        debug!("native fault relay enabled");
        Ok(())
    }

    fn disable(&self) -> Result<(), RelayError> {
        SWITCH.set_enabled(false)?;
        debug!("native fault relay disabled");
        Ok(())
    }

    fn state(&self) -> RelayState {
        SWITCH.state()
    }

    fn attach(&self, observer: Weak<dyn NativeObserver>) {
        *OBSERVER.write() = Some(observer);
    }

    fn is_enabled(&self) -> bool {
        SWITCH.is_enabled()
    }

    fn prepare_thread(&self) -> Result<(), RelayError> {
        if ALT_STACK_READY.with(Cell::get) {
            return Ok(());
        }
        let stack = AltStack::install().map_err(|source| RelayError::AltStack { source })?;
        ALT_STACK.with(|slot| *slot.borrow_mut() = Some(stack));
        ALT_STACK_READY.with(|ready| ready.set(true));
        debug!(size = ALT_STACK_SIZE, "alternate signal stack installed");
        Ok(())
    }
}

/// mmap-backed alternate signal stack with a guard page below it.
struct AltStack {
    mapping: *mut libc::c_void,
    mapping_len: usize,
    stack: *mut libc::c_void,
    previous: libc::stack_t,
}

impl AltStack {
    fn install() -> Result<Self, Errno> {
        // SAFETY: sysconf has no preconditions.
        let page = usize::try_from(unsafe { libc::sysconf(libc::_SC_PAGESIZE) }).unwrap_or(4096);
        let mapping_len = ALT_STACK_SIZE + page;
        // SAFETY: fresh private anonymous mapping, checked for MAP_FAILED.
        let mapping = unsafe {
            libc::mmap(
                ptr::null_mut(),
                mapping_len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANON,
                -1,
                0,
            )
        };
        if mapping == libc::MAP_FAILED {
            return Err(Errno::last());
        }
        let unmap = |err: Errno| {
            // SAFETY: `mapping` was returned by mmap above and is not in use.
            unsafe { libc::munmap(mapping, mapping_len) };
            err
        };

        // SAFETY: the first page lies inside the mapping.
        if unsafe { libc::mprotect(mapping, page, libc::PROT_NONE) } != 0 {
            return Err(unmap(Errno::last()));
        }
        let stack = mapping.cast::<u8>().wrapping_add(page).cast::<libc::c_void>();
        let new = libc::stack_t {
            ss_sp: stack,
            ss_flags: 0,
            ss_size: ALT_STACK_SIZE,
        };
        // SAFETY: stack_t is plain data; all-zero is a valid out value.
        let mut previous: libc::stack_t = unsafe { std::mem::zeroed() };
        // SAFETY: `new` describes memory owned by this mapping.
        if unsafe { libc::sigaltstack(&new, &mut previous) } != 0 {
            return Err(unmap(Errno::last()));
        }
        Ok(Self {
            mapping,
            mapping_len,
            stack,
            previous,
        })
    }
}

impl Drop for AltStack {
    fn drop(&mut self) {
        // SAFETY: stack_t is plain data; all-zero is a valid out value.
        let mut current: libc::stack_t = unsafe { std::mem::zeroed() };
        // SAFETY: query only.
        let queried = unsafe { libc::sigaltstack(ptr::null(), &mut current) } == 0;
        // The runtime may already have disabled it during thread exit.
        if queried && current.ss_flags & libc::SS_DISABLE == 0 && current.ss_sp == self.stack {
            // SAFETY: `previous` is the stack that was active before ours.
            unsafe { libc::sigaltstack(&self.previous, ptr::null_mut()) };
        }
        // SAFETY: the mapping is no longer the active alternate stack.
        unsafe { libc::munmap(self.mapping, self.mapping_len) };
    }
}

fn restore(previous: &[(Signal, SigAction)]) {
    for (sig, action) in previous {
        // SAFETY: reinstalls an action that was installed before ours.
        if let Err(e) = unsafe { signal::sigaction(*sig, action) } {
            warn!("failed to restore previous action for {}: {}", sig, e);
        }
    }
}

extern "C" fn on_fault_signal(
    signum: libc::c_int,
    info: *mut libc::siginfo_t,
    context: *mut libc::c_void,
) {
    // SAFETY: the kernel passes a valid siginfo_t to SA_SIGINFO handlers.
    let si_code = unsafe { (*info).si_code };
    // si_code > 0 means the kernel generated the signal from a CPU fault;
    // SI_USER, SI_TKILL and SI_QUEUE are all <= 0.
    let fault = if si_code > 0 {
        // SAFETY: si_addr is populated for kernel-generated fault signals.
        let address = unsafe { (*info).si_addr() } as usize;
        NativeFault::hardware(signum, (address != 0).then_some(address))
            .with_recovery_point(guard::is_armed())
    } else {
        NativeFault::raised(signum)
    };

    let outcome = if SWITCH.is_enabled() && !IN_HANDLER.with(|flag| flag.replace(true)) {
        let outcome = deliver(fault);
        IN_HANDLER.with(|flag| flag.set(false));
        outcome
    } else {
        None
    };

    match outcome {
        Some(DispositionOutcome::Handled) if fault.continuable => {}
        Some(DispositionOutcome::Handled) if fault.recovery_point => {
            guard::resume(fault);
            restore_default_and_raise(signum);
        }
        Some(DispositionOutcome::Handled) => {
            warn!("{} cannot resume at the faulting instruction; taking default action", fault.name);
            restore_default_and_raise(signum);
        }
        Some(DispositionOutcome::Fatal) => restore_default_and_raise(signum),
        Some(DispositionOutcome::Delegated) | None => fall_back(signum, info, context, fault),
    }
}

fn deliver(fault: NativeFault) -> Option<DispositionOutcome> {
    let observer = {
        let slot = OBSERVER.try_read()?;
        slot.as_ref()?.upgrade()?
    };
    let stack = if CAPTURE_STACK.load(Ordering::Relaxed) && ALT_STACK_READY.with(Cell::get) {
        CallStack::capture()
    } else {
        CallStack::empty()
    };
    observer.on_native_fault(fault, stack)
}

fn fall_back(
    signum: libc::c_int,
    info: *mut libc::siginfo_t,
    context: *mut libc::c_void,
    fault: NativeFault,
) {
    if fault.continuable {
        restore_default_and_raise(signum);
        return;
    }
    let previous = PREVIOUS.try_read().and_then(|list| {
        list.iter()
            .find(|(sig, _)| *sig as libc::c_int == signum)
            .map(|(_, action)| action.handler())
    });
    match previous {
        Some(SigHandler::Handler(handler)) => handler(signum),
        Some(SigHandler::SigAction(handler)) => handler(signum, info, context),
        Some(SigHandler::SigDfl) | Some(SigHandler::SigIgn) | None => {
            restore_default_and_raise(signum)
        }
    }
}

fn restore_default_and_raise(signum: libc::c_int) {
    let Ok(sig) = Signal::try_from(signum) else {
        return;
    };
    let default = SigAction::new(SigHandler::SigDfl, SaFlags::empty(), SigSet::empty());
    // SAFETY: SIG_DFL carries no handler invariants.
    let _ = unsafe { signal::sigaction(sig, &default) };
    // Pending until the handler returns, then delivered with the default action.
    let _ = signal::raise(sig);
}
