//! Disposition policy.
//!
//! Decides, per channel, whether an observed fault is suppressed
//! (`Handled`), left to terminate the process (`Fatal`) or passed to an
//! enclosing handler (`Delegated`).
//!
//! The mapping is configuration, not code: [`PolicyConfig`] is read from the
//! `[policy]` table and any channel it omits keeps the default of
//! [`DispositionPolicy::default`].
//!
//! ```toml
//! [policy]
//! ui_thread_dispatch = "handled"
//! native_corrupted_state = "fatal"
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::channel::OriginChannel;
use crate::fault::FaultObject;

/// What happens to an observed fault.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DispositionOutcome {
    /// Reported; the host's default fatal behavior is suppressed.
    Handled,
    /// Reported; the host is allowed to terminate the process.
    Fatal,
    /// Not reported here; passed to the enclosing handler.
    Delegated,
}

impl DispositionOutcome {
    /// Report label.
    pub const fn label(self) -> &'static str {
        match self {
            DispositionOutcome::Handled => "handled",
            DispositionOutcome::Fatal => "fatal",
            DispositionOutcome::Delegated => "delegated",
        }
    }
}

impl fmt::Display for DispositionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Decision seam used by the coordinator.
///
/// Must be a pure function of its inputs: the same channel and payload
/// always yield the same outcome.
pub trait DispositionRule: Send + Sync {
    /// Outcome for a normalized fault observed on `channel`.
    fn decide(&self, channel: OriginChannel, payload: &dyn FaultObject) -> DispositionOutcome;
}

impl<F> DispositionRule for F
where
    F: Fn(OriginChannel, &dyn FaultObject) -> DispositionOutcome + Send + Sync,
{
    fn decide(&self, channel: OriginChannel, payload: &dyn FaultObject) -> DispositionOutcome {
        self(channel, payload)
    }
}

/// Channel-keyed disposition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispositionPolicy {
    table: [DispositionOutcome; OriginChannel::COUNT],
}

impl DispositionPolicy {
    /// Same outcome for every channel.
    pub const fn uniform(outcome: DispositionOutcome) -> Self {
        Self {
            table: [outcome; OriginChannel::COUNT],
        }
    }

    /// Builder-style override of one row.
    #[must_use]
    pub const fn with(mut self, channel: OriginChannel, outcome: DispositionOutcome) -> Self {
        self.table[channel.index()] = outcome;
        self
    }

    /// Override one row in place.
    pub fn set(&mut self, channel: OriginChannel, outcome: DispositionOutcome) {
        self.table[channel.index()] = outcome;
    }

    /// Outcome configured for `channel`.
    #[inline]
    pub const fn outcome_for(&self, channel: OriginChannel) -> DispositionOutcome {
        self.table[channel.index()]
    }
}

impl Default for DispositionPolicy {
    /// UI, background and native faults are all reported and suppressed so
    /// the interactive session continues. Whether the background host still
    /// terminates afterwards is outside the coordinator's control.
    fn default() -> Self {
        Self::uniform(DispositionOutcome::Handled)
    }
}

impl DispositionRule for DispositionPolicy {
    fn decide(&self, channel: OriginChannel, _payload: &dyn FaultObject) -> DispositionOutcome {
        self.outcome_for(channel)
    }
}

/// `[policy]` table. Keys are the four channel names.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyConfig {
    /// Outcome for `UiThreadDispatch`.
    #[serde(default)]
    pub ui_thread_dispatch: Option<DispositionOutcome>,
    /// Outcome for `BackgroundThreadUnhandled`.
    #[serde(default)]
    pub background_thread_unhandled: Option<DispositionOutcome>,
    /// Outcome for `NativeCorruptedState`.
    #[serde(default)]
    pub native_corrupted_state: Option<DispositionOutcome>,
    /// Outcome for `NativeCaughtInternally`.
    #[serde(default)]
    pub native_caught_internally: Option<DispositionOutcome>,
}

impl PolicyConfig {
    /// Configured entry for `channel`, if any.
    pub fn entry(&self, channel: OriginChannel) -> Option<DispositionOutcome> {
        match channel {
            OriginChannel::UiThreadDispatch => self.ui_thread_dispatch,
            OriginChannel::BackgroundThreadUnhandled => self.background_thread_unhandled,
            OriginChannel::NativeCorruptedState => self.native_corrupted_state,
            OriginChannel::NativeCaughtInternally => self.native_caught_internally,
        }
    }

    /// Default table with the configured rows applied.
    pub fn to_policy(&self) -> DispositionPolicy {
        OriginChannel::ALL
            .into_iter()
            .fold(DispositionPolicy::default(), |policy, channel| {
                match self.entry(channel) {
                    Some(outcome) => policy.with(channel, outcome),
                    None => policy,
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fault::PanicFault;
    use faultline_common::config::ConfigLoader;

    #[test]
    fn default_table_handles_every_channel() {
        let policy = DispositionPolicy::default();
        for channel in OriginChannel::ALL {
            assert_eq!(policy.outcome_for(channel), DispositionOutcome::Handled);
        }
    }

    #[test]
    fn decisions_follow_the_table_exactly() {
        let policy = DispositionPolicy::default()
            .with(OriginChannel::NativeCorruptedState, DispositionOutcome::Fatal)
            .with(OriginChannel::BackgroundThreadUnhandled, DispositionOutcome::Delegated);
        let fault = PanicFault::new("x", None);

        for _ in 0..3 {
            assert_eq!(
                policy.decide(OriginChannel::UiThreadDispatch, &fault),
                DispositionOutcome::Handled
            );
            assert_eq!(
                policy.decide(OriginChannel::NativeCorruptedState, &fault),
                DispositionOutcome::Fatal
            );
            assert_eq!(
                policy.decide(OriginChannel::BackgroundThreadUnhandled, &fault),
                DispositionOutcome::Delegated
            );
        }
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let config =
            PolicyConfig::from_toml("native_corrupted_state = \"fatal\"\n").unwrap();
        let policy = config.to_policy();
        assert_eq!(
            policy.outcome_for(OriginChannel::NativeCorruptedState),
            DispositionOutcome::Fatal
        );
        assert_eq!(
            policy.outcome_for(OriginChannel::UiThreadDispatch),
            DispositionOutcome::Handled
        );
    }

    #[test]
    fn unknown_channel_keys_are_rejected() {
        assert!(PolicyConfig::from_toml("gpu_thread = \"fatal\"\n").is_err());
        assert!(PolicyConfig::from_toml("ui_thread_dispatch = \"ignore\"\n").is_err());
    }

    #[test]
    fn closures_can_stand_in_for_the_table() {
        let rule = |channel: OriginChannel, payload: &dyn FaultObject| {
            if channel == OriginChannel::UiThreadDispatch && payload.kind() == "panic" {
                DispositionOutcome::Fatal
            } else {
                DispositionOutcome::Handled
            }
        };
        let fault = PanicFault::new("x", None);
        assert_eq!(
            rule.decide(OriginChannel::UiThreadDispatch, &fault),
            DispositionOutcome::Fatal
        );
    }
}
