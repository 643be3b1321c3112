//! Recovery points for native calls.
//!
//! A hardware fault re-executes the faulting instruction when the handler
//! returns, so execution can only continue if the handler leaves somewhere
//! else. [`guarded`] records a `sigsetjmp` point before running a native
//! call. When the relay dispositions a hardware fault on the same thread as
//! `Handled`, the handler `siglongjmp`s back to that point and `guarded`
//! returns the fault instead of the call's value.
//!
//! The armed point is kept in a const thread-local holding a raw pointer,
//! which the handler reads without allocating or locking.

use std::cell::Cell;
use std::mem::ManuallyDrop;
use std::ptr;

use crate::fault::NativeFault;

/// `sigjmp_buf`, sized for the largest supported libc layout.
#[repr(C, align(16))]
struct SigJmpBuf([u8; 512]);

unsafe extern "C" {
    // glibc exports sigsetjmp only as a macro over __sigsetjmp.
    #[cfg_attr(all(target_os = "linux", target_env = "gnu"), link_name = "__sigsetjmp")]
    fn sigsetjmp(env: *mut SigJmpBuf, savemask: libc::c_int) -> libc::c_int;
    fn siglongjmp(env: *mut SigJmpBuf, val: libc::c_int) -> !;
}

struct RecoveryPoint {
    env: SigJmpBuf,
    fault: Option<NativeFault>,
}

thread_local! {
    static ARMED: Cell<*mut RecoveryPoint> = const { Cell::new(ptr::null_mut()) };
}

/// Run `f` with a recovery point armed on the calling thread.
///
/// Returns `Err` with the fault when a hardware fault inside `f` was
/// dispositioned `Handled`. Software-sent faults resume inside `f` as they
/// would without a guard. `Fatal`, `Delegated` and unobserved faults take
/// the platform path.
///
/// Guards nest; a fault unwinds to the innermost one.
///
/// # Safety
///
/// A recovered fault abandons every frame between this call and the fault
/// without unwinding. No destructors run and values owned by those frames
/// leak. `f` must not hold locks, `RefCell` borrows or other guards at any
/// point where it can fault.
#[inline(never)]
pub unsafe fn guarded<T, F>(f: F) -> Result<T, NativeFault>
where
    F: FnOnce() -> T,
{
    let mut f = ManuallyDrop::new(f);
    let mut recovery = RecoveryPoint {
        env: SigJmpBuf([0; 512]),
        fault: None,
    };
    let point = &raw mut recovery;
    let outer = ARMED.with(|slot| slot.replace(point));

    // SAFETY: `point` stays valid for every jump to it. The handler only jumps
    // while ARMED holds it, and it is disarmed before this frame returns.
    let code = unsafe { sigsetjmp(&raw mut (*point).env, 1) };
    if code != 0 {
        ARMED.with(|slot| slot.set(outer));
        // SAFETY: written by the handler right before the jump.
        let fault = unsafe { ptr::read_volatile(&raw const (*point).fault) };
        return Err(fault
            .unwrap_or_else(|| NativeFault::hardware(code, None).with_recovery_point(true)));
    }

    // SAFETY: reached once, on the first return of sigsetjmp.
    let f = unsafe { ManuallyDrop::take(&mut f) };
    let value = f();
    ARMED.with(|slot| slot.set(outer));
    Ok(value)
}

/// Whether a recovery point is armed on the calling thread.
pub(super) fn is_armed() -> bool {
    ARMED.with(|slot| !slot.get().is_null())
}

/// Jump to the innermost recovery point with `fault`. Returns only when
/// none is armed.
pub(super) fn resume(fault: NativeFault) {
    let point = ARMED.with(Cell::get);
    if point.is_null() {
        return;
    }
    // SAFETY: an armed point belongs to a live `guarded` frame on this thread.
    unsafe {
        ptr::write_volatile(&raw mut (*point).fault, Some(fault));
        siglongjmp(&raw mut (*point).env, fault.code.max(1));
    }
}
