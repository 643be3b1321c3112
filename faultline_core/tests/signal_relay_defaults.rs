//! Real signal relay under the shipped configuration: stacks captured inside
//! the handler and records formatted by the tracing sink.
//!
//! Runs in its own test binary because the relay is process-wide.

use faultline_core::prelude::*;
use nix::sys::signal::{Signal, raise};
use std::hint::black_box;
use std::sync::Arc;

#[inline(never)]
fn read_near_null() -> u32 {
    let address = black_box(0x10_usize) as *const u32;
    // SAFETY: none; the read is meant to fault.
    unsafe { std::ptr::read_volatile(address) }
}

#[test]
fn default_config_survives_native_faults() {
    tracing_subscriber::fmt().with_test_writer().init();

    let config = CoordinatorConfig::default();
    assert!(config.relay.enabled);
    assert!(config.relay.capture_native_stack);

    let relay = SignalRelay::new();
    relay.set_capture_stack(config.relay.capture_native_stack);
    let coordinator = Coordinator::from_config(&config, Arc::new(relay));
    coordinator.initialize().unwrap();

    // Software-sent: the handler returns and execution continues here.
    raise(Signal::SIGFPE).unwrap();

    // Hardware: the handler jumps back to the recovery point.
    // SAFETY: read_near_null owns nothing with a destructor.
    let fault = unsafe { guarded(read_near_null) }.unwrap_err();
    assert_eq!(fault.code, libc::SIGSEGV);
    assert!(fault.recovery_point);

    // Observed threads get their own alternate stack.
    let worker = spawn_observed(&coordinator, "native-worker", || {
        raise(Signal::SIGBUS).unwrap();
        // SAFETY: read_near_null owns nothing with a destructor.
        unsafe { guarded(read_near_null) }.is_err()
    })
    .unwrap();
    assert_eq!(worker.join().unwrap(), Some(true));

    coordinator.teardown();
    assert!(!coordinator.relay().is_enabled());
}
