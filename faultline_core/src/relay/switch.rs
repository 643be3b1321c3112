//! Lock-free relay state shared by every relay implementation.
//!
//! Native calls read the switch on every fault, and the signal handler reads
//! it too, so reads are a single atomic load. Lifecycle transitions are rare
//! and serialized by the owner's lifecycle mutex.

use std::sync::atomic::{AtomicU8, Ordering};

use super::{RelayError, RelayPhase, RelayState};

const UNINITIALIZED: u8 = 0;
const DISABLED: u8 = 1;
const ENABLED: u8 = 2;
const TORN_DOWN: u8 = 3;

/// Atomic encoding of [`RelayState`].
#[derive(Debug)]
pub struct RelaySwitch {
    state: AtomicU8,
}

impl RelaySwitch {
    /// Switch in the `Uninitialized` phase.
    pub const fn new() -> Self {
        Self {
            state: AtomicU8::new(UNINITIALIZED),
        }
    }

    /// Current state.
    pub fn state(&self) -> RelayState {
        decode(self.state.load(Ordering::Acquire))
    }

    /// Whether native faults are translated right now.
    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.state.load(Ordering::Acquire) == ENABLED
    }

    /// Whether the trap is installed.
    pub fn is_installed(&self) -> bool {
        matches!(self.state.load(Ordering::Acquire), DISABLED | ENABLED)
    }

    /// Enter the installed window with `enabled = true`.
    ///
    /// Returns `false` if already installed.
    pub fn install(&self) -> bool {
        let current = self.state.load(Ordering::Acquire);
        if matches!(current, DISABLED | ENABLED) {
            return false;
        }
        self.state.store(ENABLED, Ordering::Release);
        true
    }

    /// Leave the installed window with `enabled = false`.
    ///
    /// Returns `false` if not installed.
    pub fn tear_down(&self) -> bool {
        let current = self.state.load(Ordering::Acquire);
        if !matches!(current, DISABLED | ENABLED) {
            return false;
        }
        self.state.store(TORN_DOWN, Ordering::Release);
        true
    }

    /// Set `enabled` inside the installed window.
    pub fn set_enabled(&self, enabled: bool) -> Result<(), RelayError> {
        let target = if enabled { ENABLED } else { DISABLED };
        let operation = if enabled { "enable" } else { "disable" };
        self.state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                matches!(current, DISABLED | ENABLED).then_some(target)
            })
            .map(|_| ())
            .map_err(|current| RelayError::Misuse {
                operation,
                phase: decode(current).phase,
            })
    }
}

impl Default for RelaySwitch {
    fn default() -> Self {
        Self::new()
    }
}

fn decode(raw: u8) -> RelayState {
    match raw {
        DISABLED => RelayState {
            phase: RelayPhase::Installed,
            enabled: false,
        },
        ENABLED => RelayState {
            phase: RelayPhase::Installed,
            enabled: true,
        },
        TORN_DOWN => RelayState {
            phase: RelayPhase::TornDown,
            enabled: false,
        },
        _ => RelayState {
            phase: RelayPhase::Uninitialized,
            enabled: false,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn toggling_before_install_is_misuse() {
        let switch = RelaySwitch::new();
        let err = switch.set_enabled(true).unwrap_err();
        assert!(matches!(
            err,
            RelayError::Misuse {
                operation: "enable",
                phase: RelayPhase::Uninitialized
            }
        ));
        assert!(!switch.is_enabled());
    }

    #[test]
    fn install_enables_and_is_idempotent() {
        let switch = RelaySwitch::new();
        assert!(switch.install());
        assert!(switch.is_enabled());
        switch.set_enabled(false).unwrap();
        assert!(!switch.install(), "second install must be a no-op");
        assert!(!switch.is_enabled(), "no-op install must not touch enabled");
    }

    #[test]
    fn enable_twice_leaves_state_unchanged() {
        let switch = RelaySwitch::new();
        switch.install();
        let before = switch.state();
        switch.set_enabled(true).unwrap();
        switch.set_enabled(true).unwrap();
        assert_eq!(switch.state(), before);
    }

    #[test]
    fn teardown_resets_to_disabled_and_closes_the_window() {
        let switch = RelaySwitch::new();
        switch.install();
        assert!(switch.tear_down());
        assert!(!switch.tear_down());
        assert_eq!(
            switch.state(),
            RelayState {
                phase: RelayPhase::TornDown,
                enabled: false
            }
        );
        assert!(matches!(
            switch.set_enabled(false),
            Err(RelayError::Misuse {
                phase: RelayPhase::TornDown,
                ..
            })
        ));
    }

    #[test]
    fn reinstall_after_teardown_opens_a_new_window() {
        let switch = RelaySwitch::new();
        switch.install();
        switch.tear_down();
        assert!(switch.install());
        assert!(switch.is_installed());
        assert!(switch.is_enabled());
    }
}
