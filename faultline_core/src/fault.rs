//! Fault payloads and the per-fault record.
//!
//! Payloads are opaque to the coordinator: anything implementing
//! [`FaultObject`] can travel through a channel. Three concrete payloads
//! cover the supported hosts:
//!
//! - [`PanicFault`] - a Rust panic raised on a UI or background thread
//! - [`NativeFault`] - a signal delivered inside a native call
//! - [`InvocationFault`] - a wrapper carrying another fault across an
//!   indirect invocation boundary

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::channel::{OriginChannel, StackValidity};
use crate::error::FaultClass;
use crate::policy::DispositionOutcome;
use crate::stack::CallStack;

/// Shared, immutable fault payload.
pub type Payload = Arc<dyn FaultObject>;

/// An opaque fault object.
pub trait FaultObject: fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// Short payload kind label (`"panic"`, `"native"`, ...).
    fn kind(&self) -> &'static str;

    /// The carried fault, if this object only wraps another one.
    fn inner(&self) -> Option<&Payload> {
        None
    }

    /// Whether execution can resume after this fault.
    fn recoverable(&self) -> bool {
        true
    }

    /// Downcast support.
    fn as_any(&self) -> &dyn Any;
}

// ─── Panic payloads ─────────────────────────────────────────────────

/// A panic that escaped a unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PanicFault {
    /// Panic message, or a placeholder for non-string payloads.
    pub message: String,
    /// `file:line:col` of the panic site, when known.
    pub location: Option<String>,
}

impl PanicFault {
    /// Create a panic payload.
    pub fn new(message: impl Into<String>, location: Option<String>) -> Self {
        Self {
            message: message.into(),
            location,
        }
    }
}

impl fmt::Display for PanicFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "panic: {}", self.message)?;
        if let Some(location) = &self.location {
            write!(f, " (at {location})")?;
        }
        Ok(())
    }
}

impl FaultObject for PanicFault {
    fn kind(&self) -> &'static str {
        "panic"
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Convert a caught panic into a payload.
///
/// Payloads resumed by an earlier dispatch and [`InvocationFault`] wrappers
/// are recovered as-is; string messages become [`PanicFault`].
pub fn payload_from_panic(panic: Box<dyn Any + Send>, location: Option<String>) -> Payload {
    let panic = match panic.downcast::<Payload>() {
        Ok(payload) => return *payload,
        Err(other) => other,
    };
    let panic = match panic.downcast::<InvocationFault>() {
        Ok(wrapper) => return Arc::new(*wrapper),
        Err(other) => other,
    };
    let message = if let Some(s) = panic.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_string()
    };
    Arc::new(PanicFault::new(message, location))
}

// ─── Native payloads ────────────────────────────────────────────────

/// Platform fault codes observed by the native relay, with their names.
pub const PLATFORM_FAULT_CODES: &[(libc::c_int, &str)] = &[
    (libc::SIGABRT, "SIGABRT"),
    (libc::SIGSEGV, "SIGSEGV"),
    (libc::SIGILL, "SIGILL"),
    (libc::SIGFPE, "SIGFPE"),
    (libc::SIGBUS, "SIGBUS"),
];

/// Name reported for codes outside [`PLATFORM_FAULT_CODES`].
pub const UNKNOWN_FAULT_CODE: &str = "Unknown exception code";

/// Symbolic name of a platform fault code.
pub fn fault_code_name(code: libc::c_int) -> &'static str {
    PLATFORM_FAULT_CODES
        .iter()
        .find(|(c, _)| *c == code)
        .map_or(UNKNOWN_FAULT_CODE, |&(_, name)| name)
}

/// Low-level fault delivered inside a native call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NativeFault {
    /// Signal number.
    pub code: libc::c_int,
    /// Symbolic name from [`PLATFORM_FAULT_CODES`].
    pub name: &'static str,
    /// Faulting address for hardware faults.
    pub fault_address: Option<usize>,
    /// True when the fault was sent by software and execution can resume
    /// after the handler returns. Hardware faults re-trigger on return.
    pub continuable: bool,
    /// True when a [`guarded`](crate::relay::guarded) call was active on the
    /// faulting thread, so a handled hardware fault unwinds to it.
    pub recovery_point: bool,
}

impl NativeFault {
    /// Fault sent by software (`raise`, `kill`).
    pub fn raised(code: libc::c_int) -> Self {
        Self {
            code,
            name: fault_code_name(code),
            fault_address: None,
            continuable: true,
            recovery_point: false,
        }
    }

    /// Fault generated by the CPU at `fault_address`.
    pub fn hardware(code: libc::c_int, fault_address: Option<usize>) -> Self {
        Self {
            code,
            name: fault_code_name(code),
            fault_address,
            continuable: false,
            recovery_point: false,
        }
    }

    /// Same fault, marked as raised under an armed recovery point.
    pub fn with_recovery_point(mut self, armed: bool) -> Self {
        self.recovery_point = armed;
        self
    }
}

impl fmt::Display for NativeFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.name, self.code)?;
        if let Some(address) = self.fault_address {
            write!(f, " at address {address:#x}")?;
        }
        if !self.continuable {
            f.write_str(if self.recovery_point {
                ", unwound to recovery point"
            } else {
                ", not continuable"
            })?;
        }
        Ok(())
    }
}

impl FaultObject for NativeFault {
    fn kind(&self) -> &'static str {
        "native"
    }

    fn recoverable(&self) -> bool {
        self.continuable || self.recovery_point
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ─── Wrapper payloads ───────────────────────────────────────────────

/// Wrapper produced when a routine invoked by name fails.
#[derive(Debug, Clone)]
pub struct InvocationFault {
    /// Name the routine was invoked through.
    pub target: String,
    /// The fault raised by the routine itself.
    pub inner: Payload,
}

impl InvocationFault {
    /// Wrap `inner` as raised through `target`.
    pub fn new(target: impl Into<String>, inner: Payload) -> Self {
        Self {
            target: target.into(),
            inner,
        }
    }
}

impl fmt::Display for InvocationFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invocation of `{}` failed: {}", self.target, self.inner)
    }
}

impl FaultObject for InvocationFault {
    fn kind(&self) -> &'static str {
        "invocation"
    }

    fn inner(&self) -> Option<&Payload> {
        Some(&self.inner)
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

// ─── Record ─────────────────────────────────────────────────────────

/// One observed fault, owned by the dispatch that created it.
///
/// Built once per channel invocation and moved through
/// normalizer, policy and sink. `unwrapped_payload` is the innermost
/// non-wrapper payload; for a payload that is not a wrapper it is the same
/// object as `raw_payload`.
#[derive(Debug, Clone)]
pub struct FaultRecord {
    /// Channel that observed the fault.
    pub origin_channel: OriginChannel,
    /// Payload as delivered by the channel.
    pub raw_payload: Payload,
    /// Innermost non-wrapper payload.
    pub unwrapped_payload: Payload,
    /// Stack captured at the fault point. Empty when unavailable.
    pub call_stack: CallStack,
    /// How far `call_stack` can be trusted on the origin channel.
    pub stack_validity: StackValidity,
    /// Whether the process can continue past this fault.
    pub recoverable: bool,
    /// Set by the policy step.
    pub disposition: Option<DispositionOutcome>,
    /// True when the wrapper chain exceeded the normalizer depth limit.
    pub malformed: bool,
}

impl FaultRecord {
    /// Fresh record; `unwrapped_payload` starts as `raw_payload`.
    pub fn new(
        origin_channel: OriginChannel,
        raw_payload: Payload,
        call_stack: CallStack,
        recoverable: bool,
    ) -> Self {
        Self {
            origin_channel,
            unwrapped_payload: Arc::clone(&raw_payload),
            raw_payload,
            call_stack,
            stack_validity: StackValidity::Synchronous,
            recoverable,
            disposition: None,
            malformed: false,
        }
    }

    /// True when the channel delivered a wrapper rather than the fault itself.
    pub fn was_wrapped(&self) -> bool {
        !Arc::ptr_eq(&self.raw_payload, &self.unwrapped_payload)
    }

    /// Runtime classification, once a disposition has been decided.
    ///
    /// A handled fault is only `Recoverable` when execution can resume past
    /// the payload itself; a handled hardware fault with no recovery point
    /// still ends the process.
    pub fn class(&self) -> Option<FaultClass> {
        if self.malformed {
            return Some(FaultClass::MalformedWrapper);
        }
        match self.disposition? {
            DispositionOutcome::Handled if self.unwrapped_payload.recoverable() => {
                Some(FaultClass::Recoverable)
            }
            DispositionOutcome::Handled | DispositionOutcome::Fatal => {
                Some(FaultClass::Terminating)
            }
            DispositionOutcome::Delegated => None,
        }
    }
}
