//! Panic-site capture.
//!
//! By the time `catch_unwind` returns, the frames that raised a panic are
//! gone. The hook installed here records the call stack while they still
//! exist, but only for panics raised inside an [`observe`] scope; any other
//! panic goes to the previously installed hook unchanged.
//!
//! ```text
//! observe(f) ──► f() ──► panic!() ──► hook: PANIC_SITE = {location, stack}
//!     ▲                                        │
//!     └──────── Err(payload) ◄── unwind ◄──────┘
//! caller: take_panic_site() → FaultRecord.call_stack
//! ```

use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;
use std::thread;

use crate::stack::CallStack;

static INSTALL: Once = Once::new();

thread_local! {
    static OBSERVED_DEPTH: Cell<usize> = const { Cell::new(0) };
    static PANIC_SITE: RefCell<Option<PanicSite>> = const { RefCell::new(None) };
}

/// Where the most recent observed panic on this thread was raised.
#[derive(Debug, Clone, Default)]
pub struct PanicSite {
    /// `file:line:col`, when the runtime reported one.
    pub location: Option<String>,
    /// Frames at the panic point, innermost first.
    pub stack: CallStack,
}

/// Install the capturing panic hook. Later calls are no-ops.
pub fn install_panic_capture() {
    INSTALL.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if OBSERVED_DEPTH.with(Cell::get) == 0 {
                previous(info);
                return;
            }
            let site = PanicSite {
                location: info.location().map(ToString::to_string),
                stack: CallStack::capture(),
            };
            PANIC_SITE.with(|slot| {
                if let Ok(mut slot) = slot.try_borrow_mut() {
                    *slot = Some(site);
                }
            });
        }));
        tracing::debug!("panic capture hook installed");
    });
}

/// Run `f`, catching any panic it raises.
///
/// While the outermost scope is active, panics are recorded by the capture
/// hook instead of being printed.
pub fn observe<F, R>(f: F) -> thread::Result<R>
where
    F: FnOnce() -> R,
{
    let _scope = ObservedScope::enter();
    panic::catch_unwind(AssertUnwindSafe(f))
}

/// Remove and return the recorded panic site of this thread.
pub fn take_panic_site() -> PanicSite {
    PANIC_SITE
        .with(|slot| slot.try_borrow_mut().ok().and_then(|mut slot| slot.take()))
        .unwrap_or_default()
}

/// Location of the recorded panic site, leaving the site in place.
pub fn peek_panic_location() -> Option<String> {
    PANIC_SITE.with(|slot| {
        slot.try_borrow()
            .ok()
            .and_then(|slot| slot.as_ref().and_then(|site| site.location.clone()))
    })
}

struct ObservedScope;

impl ObservedScope {
    fn enter() -> Self {
        OBSERVED_DEPTH.with(|depth| {
            if depth.get() == 0 {
                PANIC_SITE.with(|slot| {
                    if let Ok(mut slot) = slot.try_borrow_mut() {
                        *slot = None;
                    }
                });
            }
            depth.set(depth.get() + 1);
        });
        Self
    }
}

impl Drop for ObservedScope {
    fn drop(&mut self) {
        OBSERVED_DEPTH.with(|depth| depth.set(depth.get().saturating_sub(1)));
    }
}
