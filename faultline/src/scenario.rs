//! Crash scenarios runnable from the command line.

use clap::ValueEnum;
use faultline_core::prelude::*;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::native;

/// One fault source, run as a UI work item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Scenario {
    /// Panic inside a UI handler.
    Managed,
    /// Panic inside a routine invoked by name.
    ManagedViaInvoke,
    /// Print the live call stack; no fault.
    CallStack,
    /// Invalid memory read in a native routine.
    NativeCrash,
    /// Invalid memory read in a native routine invoked by name.
    NativeViaInvoke,
    /// Native fault resolved by the native routine itself.
    NativeCaught,
    /// Undefined instruction in a native routine.
    NativeJump,
    /// Arithmetic fault raised by a native routine.
    NativeDivide,
    /// Unbounded recursion.
    StackOverflow,
    /// Panic on an observed background thread.
    Background,
    /// Flip the native relay.
    ToggleRelay,
}

/// Queue `scenario` on the UI dispatcher.
pub fn post(
    scenario: Scenario,
    ui: &UiHandle,
    coordinator: &Arc<Coordinator>,
    table: &Arc<InvocationTable>,
) {
    info!(?scenario, "queueing scenario");
    let coordinator = Arc::clone(coordinator);
    let table = Arc::clone(table);
    let posted = match scenario {
        Scenario::Managed => ui.post(|| panic!("managed fault raised from a UI handler")),
        Scenario::ManagedViaInvoke => ui.post(move || invoke(&table, "managed_fault")),
        Scenario::CallStack => ui.post(move || print_call_stack(&coordinator)),
        Scenario::NativeCrash => {
            ui.post(|| native_call("null_dereference", native::null_dereference))
        }
        Scenario::NativeViaInvoke => ui.post(move || {
            native_call("null_dereference", || invoke(&table, "null_dereference"));
        }),
        Scenario::NativeCaught => ui.post(move || {
            invoke(&table, "caught_internally");
            info!("nothing reached the coordinator");
        }),
        Scenario::NativeJump => {
            ui.post(|| native_call("illegal_instruction", native::illegal_instruction))
        }
        Scenario::NativeDivide => ui.post(|| {
            native::raise_divide_fault();
            info!("execution resumed after the native fault");
        }),
        Scenario::StackOverflow => ui.post(|| {
            native_call("exhaust_stack", || {
                native::exhaust_stack(0);
            });
        }),
        Scenario::Background => ui.post(move || run_background(&coordinator)),
        Scenario::ToggleRelay => ui.post(move || toggle_relay(&coordinator)),
    };
    if !posted {
        warn!(?scenario, "ui dispatcher is gone; scenario dropped");
    }
}

/// Run a native routine behind a recovery point, so a handled hardware
/// fault returns here instead of ending the process.
fn native_call(name: &str, routine: impl FnOnce()) {
    // SAFETY: the routines and the table lookup own nothing with a destructor
    // at the point where they fault.
    match unsafe { guarded(routine) } {
        Ok(()) => {}
        Err(fault) => info!(routine = name, %fault, "native fault handled; execution continues"),
    }
}

fn invoke(table: &InvocationTable, name: &str) {
    if let Err(e) = table.invoke(name) {
        error!("{}", e);
    }
}

fn print_call_stack(coordinator: &Coordinator) {
    let stack = CallStack::capture();
    if stack.is_empty() {
        info!("call stack unavailable on this platform");
    }
    for frame in &stack {
        info!("{}", frame);
    }
    info!(
        frames = coordinator.capture_call_stack().len(),
        "no fault is being reported"
    );
}

fn run_background(coordinator: &Arc<Coordinator>) {
    let worker = match spawn_observed(coordinator, "faultline-worker", || -> () {
        panic!("background worker failed")
    }) {
        Ok(worker) => worker,
        Err(e) => {
            error!("failed to spawn background worker: {}", e);
            return;
        }
    };
    match worker.join() {
        Ok(Some(())) => info!("background worker finished"),
        Ok(None) => info!("background fault handled; process continues"),
        Err(_) => warn!("background worker ended with an unhandled fault"),
    }
}

fn toggle_relay(coordinator: &Coordinator) {
    let enabled = !coordinator.relay().is_enabled();
    if let Err(e) = coordinator.set_relay_enabled(enabled) {
        error!("{}", e);
    }
}
