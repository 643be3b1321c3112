//! Observed background threads.

use std::io;
use std::panic;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::debug;

use super::panic::{observe, take_panic_site};
use crate::channel::OriginChannel;
use crate::coordinator::{Coordinator, UnhandledFault};
use crate::fault::payload_from_panic;

/// Spawn a named thread whose escaping panic is raised on
/// `BackgroundThreadUnhandled`. The thread is prepared for native faults
/// before `f` runs.
///
/// The join yields `Some(value)` on success and `None` when the fault was
/// handled. Any other disposition resumes the panic, so the joiner sees
/// `Err` as it would for an unobserved thread.
pub fn spawn_observed<F, T>(
    coordinator: &Arc<Coordinator>,
    name: impl Into<String>,
    f: F,
) -> io::Result<JoinHandle<Option<T>>>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    let coordinator = Arc::clone(coordinator);
    thread::Builder::new().name(name.into()).spawn(move || {
        coordinator.prepare_thread();
        let panic = match observe(f) {
            Ok(value) => return Some(value),
            Err(panic) => panic,
        };
        let site = take_panic_site();
        let mut fault = UnhandledFault::new(payload_from_panic(panic, site.location), site.stack);
        coordinator.raise(OriginChannel::BackgroundThreadUnhandled, &mut fault);
        if fault.handled {
            debug!(
                thread = thread::current().name().unwrap_or("<unnamed>"),
                "background fault handled"
            );
            return None;
        }
        panic::resume_unwind(Box::new(fault.payload))
    })
}
