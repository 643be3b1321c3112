//! Error types and the runtime fault taxonomy.
//!
//! Two families live here. [`CoordinatorError`] is returned to the host for
//! setup and lifecycle failures. [`FaultClass`] classifies faults that were
//! observed and resolved on a channel; those never propagate as `Err`.

use faultline_common::config::ConfigError;
use thiserror::Error;

use crate::relay::RelayError;

/// Host-facing errors from coordinator setup and relay control.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// The relay rejected a lifecycle operation.
    #[error(transparent)]
    Relay(#[from] RelayError),

    /// Configuration could not be loaded or validated.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Runtime classification of a resolved fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FaultClass {
    /// Reported, and the process continues.
    Recoverable,
    /// Reported, then the process is allowed to terminate.
    Terminating,
    /// The wrapper chain exceeded the normalizer depth limit. Treated as
    /// terminating.
    MalformedWrapper,
}

impl FaultClass {
    /// Report label.
    pub const fn label(self) -> &'static str {
        match self {
            FaultClass::Recoverable => "recoverable",
            FaultClass::Terminating => "terminating",
            FaultClass::MalformedWrapper => "malformed wrapper",
        }
    }

    /// Whether the process is expected to end after the report.
    pub const fn is_terminating(self) -> bool {
        !matches!(self, FaultClass::Recoverable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relay::RelayPhase;

    #[test]
    fn malformed_wrappers_terminate() {
        assert!(FaultClass::MalformedWrapper.is_terminating());
        assert!(FaultClass::Terminating.is_terminating());
        assert!(!FaultClass::Recoverable.is_terminating());
    }

    #[test]
    fn relay_errors_convert_transparently() {
        let err: CoordinatorError = RelayError::Misuse {
            operation: "enable",
            phase: RelayPhase::Uninitialized,
        }
        .into();
        assert!(err.to_string().contains("enable"));
    }
}
