//! Indirect invocation table.
//!
//! Routines are registered by name and invoked through the table rather than
//! called directly. A panic escaping an invoked routine crosses the
//! invocation boundary wrapped in an [`InvocationFault`], the way a
//! reflective call wraps the callee's exception. The normalizer strips the
//! wrapper again before the policy sees the fault.

use std::collections::HashMap;
use std::panic;
use thiserror::Error;
use tracing::debug;

use crate::fault::{InvocationFault, payload_from_panic};
use crate::host::peek_panic_location;

/// A routine reachable by name.
pub type Routine = fn();

/// Invocation table errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvokeError {
    /// No routine is registered under the name.
    #[error("no routine registered as `{0}`")]
    NotFound(String),
}

/// Routines callable by name.
///
/// Constructed at startup and populated via `register()`.
pub struct InvocationTable {
    routines: HashMap<&'static str, Routine>,
}

impl InvocationTable {
    /// Create an empty table.
    pub fn new() -> Self {
        Self {
            routines: HashMap::new(),
        }
    }

    /// Register a routine.
    ///
    /// # Panics
    /// Panics if a routine with the same name is already registered.
    pub fn register(&mut self, name: &'static str, routine: Routine) {
        if self.routines.contains_key(name) {
            panic!("Routine '{name}' is already registered");
        }
        self.routines.insert(name, routine);
    }

    /// Get a routine by name.
    pub fn get(&self, name: &str) -> Option<Routine> {
        self.routines.get(name).copied()
    }

    /// Call a routine by name.
    ///
    /// A panic raised by the routine is resumed as an [`InvocationFault`]
    /// carrying the original payload. Native faults are not panics and reach
    /// the relay unwrapped.
    ///
    /// # Errors
    /// Returns `InvokeError::NotFound` if no routine with the given name is registered.
    pub fn invoke(&self, name: &str) -> Result<(), InvokeError> {
        let routine = self
            .get(name)
            .ok_or_else(|| InvokeError::NotFound(name.to_string()))?;
        debug!(routine = name, "invoking routine by name");

        if let Err(panic) = panic::catch_unwind(routine) {
            let inner = payload_from_panic(panic, peek_panic_location());
            // resume_unwind skips the panic hook, so the original panic site is kept.
            panic::resume_unwind(Box::new(InvocationFault::new(name, inner)));
        }
        Ok(())
    }

    /// List all registered routine names.
    pub fn list(&self) -> Vec<&'static str> {
        self.routines.keys().copied().collect()
    }
}

impl Default for InvocationTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::Payload;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static CALLS: AtomicUsize = AtomicUsize::new(0);

    fn counted() {
        CALLS.fetch_add(1, Ordering::SeqCst);
    }

    fn failing() {
        panic::panic_any("routine failed");
    }

    #[test]
    fn invoke_calls_the_registered_routine() {
        let mut table = InvocationTable::new();
        table.register("counted", counted);
        let before = CALLS.load(Ordering::SeqCst);
        table.invoke("counted").unwrap();
        assert_eq!(CALLS.load(Ordering::SeqCst), before + 1);
    }

    #[test]
    fn unknown_names_are_reported() {
        let table = InvocationTable::new();
        assert_eq!(
            table.invoke("missing"),
            Err(InvokeError::NotFound("missing".to_string()))
        );
    }

    #[test]
    fn panics_cross_the_boundary_wrapped() {
        let mut table = InvocationTable::new();
        table.register("failing", failing);

        let panic = panic::catch_unwind(|| table.invoke("failing")).unwrap_err();
        let wrapper = panic.downcast::<InvocationFault>().unwrap();
        assert_eq!(wrapper.target, "failing");
        let inner: &Payload = &wrapper.inner;
        assert_eq!(inner.to_string(), "panic: routine failed");
    }

    #[test]
    fn list_returns_every_name() {
        let mut table = InvocationTable::new();
        table.register("alpha", counted);
        table.register("beta", failing);

        let mut names = table.list();
        names.sort();
        assert_eq!(names, vec!["alpha", "beta"]);
    }

    #[test]
    #[should_panic(expected = "already registered")]
    fn duplicate_registration_panics() {
        let mut table = InvocationTable::new();
        table.register("dup", counted);
        table.register("dup", counted);
    }
}
