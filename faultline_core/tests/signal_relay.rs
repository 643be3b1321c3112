//! Real signal relay.
//!
//! The relay is process-wide, so the whole lifecycle runs in one test.

use faultline_core::channel::StackValidity;
use faultline_core::fault::NativeFault;
use faultline_core::prelude::*;
use faultline_core::relay::{OBSERVED_SIGNALS, RelayPhase};
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
fn raised_signal_is_dispatched_and_execution_resumes() {
    let sink = Arc::new(MemorySink::new());
    let relay = Arc::new(SignalRelay::new());
    relay.set_capture_stack(true);
    let coordinator = Coordinator::new(DispositionPolicy::default(), sink.clone(), relay.clone());

    coordinator.initialize().unwrap();
    assert_eq!(relay.state().phase, RelayPhase::Installed);
    assert!(relay.is_enabled());
    assert_eq!(OBSERVED_SIGNALS.len(), 5);

    // Software-sent faults are continuable: the handler returns after dispatch.
    raise(Signal::SIGFPE).unwrap();
    raise(Signal::SIGILL).unwrap();

    let records = sink.take();
    assert_eq!(records.len(), 2);
    for (record, name) in records.iter().zip(["SIGFPE", "SIGILL"]) {
        assert_eq!(record.origin_channel, OriginChannel::NativeCorruptedState);
        assert_eq!(record.disposition, Some(DispositionOutcome::Handled));
        let fault = record
            .unwrapped_payload
            .as_any()
            .downcast_ref::<NativeFault>()
            .unwrap();
        assert_eq!(fault.name, name);
        assert!(fault.continuable);
        assert_eq!(fault.fault_address, None);
        assert_eq!(record.stack_validity, StackValidity::BestEffort);
        assert!(!record.call_stack.is_empty());
    }

    // A hardware fault resumes at the recovery point armed around the call.
    // SAFETY: read_near_null owns nothing with a destructor.
    let fault = unsafe { guarded(read_near_null) }.unwrap_err();
    assert_eq!(fault.code, libc::SIGSEGV);
    assert_eq!(fault.fault_address, Some(0x10));
    assert!(!fault.continuable);
    assert!(fault.recovery_point);

    let records = sink.take();
    assert_eq!(records.len(), 1);
    assert!(records[0].recoverable);
    assert_eq!(records[0].class(), Some(FaultClass::Recoverable));
    assert!(!records[0].call_stack.is_empty());

    // Nothing faulted: the value comes back and no record is produced.
    // SAFETY: the closure cannot fault.
    assert_eq!(unsafe { guarded(|| 5) }.ok(), Some(5));
    assert!(sink.is_empty());

    // Initializing again is a no-op.
    coordinator.initialize().unwrap();
    assert!(relay.is_enabled());

    coordinator.teardown();
    assert_eq!(relay.state().phase, RelayPhase::TornDown);
    assert!(matches!(
        coordinator.set_relay_enabled(true),
        Err(CoordinatorError::Relay(RelayError::Misuse {
            phase: RelayPhase::TornDown,
            ..
        }))
    ));

    // A new window can be opened after teardown.
    relay.initialize().unwrap();
    assert!(relay.is_enabled());
    raise(Signal::SIGABRT).unwrap();
    assert_eq!(sink.len(), 1);
    relay.teardown();
    assert!(!relay.is_enabled());
}
