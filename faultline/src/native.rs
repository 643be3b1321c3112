//! Native crash routines.
//!
//! These stand in for the foreign region the coordinator has to survive.
//! Each one faults in a different way:
//!
//! | Routine | Signal | Continuable |
//! |---------|--------|-------------|
//! | [`null_dereference`] | SIGSEGV (hardware) | no |
//! | [`illegal_instruction`] | SIGILL (hardware) | no |
//! | [`raise_divide_fault`] | SIGFPE (raised) | yes |
//! | [`exhaust_stack`] | SIGSEGV on the guard page | no |
//! | [`caught_internally`] | none, resolved in place | - |
//!
//! The scenarios run the hardware-faulting routines under
//! [`guarded`](faultline_core::relay::guarded), so a handled fault returns to
//! the call site.

use faultline_core::invoke::InvocationTable;
use nix::sys::signal::{Signal, raise};
use std::hint::black_box;
use tracing::{info, warn};

/// Read through a pointer into the unmapped first page.
#[inline(never)]
pub fn null_dereference() {
    let address = black_box(0x10_usize) as *const u32;
    // SAFETY: none; this read is meant to fault.
    let value = unsafe { std::ptr::read_volatile(address) };
    black_box(value);
}

/// Execute an undefined instruction.
#[inline(never)]
pub fn illegal_instruction() {
    #[cfg(target_arch = "x86_64")]
    // SAFETY: none; ud2 is meant to fault.
    unsafe {
        std::arch::asm!("ud2", options(nomem, nostack));
    }
    #[cfg(target_arch = "aarch64")]
    // SAFETY: none; udf is meant to fault.
    unsafe {
        std::arch::asm!("udf #0", options(nomem, nostack));
    }
    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    if let Err(e) = raise(Signal::SIGILL) {
        warn!("raise(SIGILL) failed: {}", e);
    }
}

/// Report an arithmetic fault the way a native math library would.
#[inline(never)]
pub fn raise_divide_fault() {
    if let Err(e) = raise(Signal::SIGFPE) {
        warn!("raise(SIGFPE) failed: {}", e);
    }
}

/// Recurse until the stack guard page is hit.
#[inline(never)]
#[allow(unconditional_recursion)]
pub fn exhaust_stack(depth: u64) -> u64 {
    let frame = black_box([depth; 64]);
    exhaust_stack(depth + 1).wrapping_add(frame[0])
}

/// Hit a divide-by-zero and recover from it locally.
#[inline(never)]
pub fn caught_internally() {
    let divisor = black_box(0_u32);
    match 100_u32.checked_div(divisor) {
        Some(quotient) => info!(quotient, "native division succeeded"),
        None => info!("native region caught a divide fault and continued"),
    }
}

/// A routine that panics, invoked by name like any native entry point.
#[inline(never)]
pub fn managed_fault() {
    panic!("managed fault raised inside an invoked routine");
}

/// Routines reachable by name.
pub fn invocation_table() -> InvocationTable {
    let mut table = InvocationTable::new();
    table.register("managed_fault", managed_fault);
    table.register("null_dereference", null_dereference);
    table.register("raise_divide_fault", raise_divide_fault);
    table.register("caught_internally", caught_internally);
    table
}
