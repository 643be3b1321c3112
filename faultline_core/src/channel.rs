//! Fault origin channels and the registry describing their guarantees.
//!
//! A channel is the point at which a fault is first observed. The set is
//! closed: every dispatch is keyed by [`OriginChannel`] and looked up in the
//! fixed [`ChannelRegistry`] table instead of branching on the fault source.
//!
//! | Channel | Stack validity | Without a coordinator |
//! |---------|----------------|-----------------------|
//! | `UiThreadDispatch` | synchronous | fatal |
//! | `BackgroundThreadUnhandled` | valid, past safe recovery | fatal |
//! | `NativeCorruptedState` | best effort | fatal, unrecoverable |
//! | `NativeCaughtInternally` | n/a | continues silently |
//!
//! The stack validity travels with every record so sinks can qualify the
//! frames they print.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Distinct observation point at which a fault can be intercepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OriginChannel {
    /// Unhandled fault while executing work on the cooperative UI thread.
    UiThreadDispatch,
    /// Unhandled fault on any other thread.
    BackgroundThreadUnhandled,
    /// Hardware or software fault inside a native call, seen through the relay.
    NativeCorruptedState,
    /// Fault the native region resolved itself. Never produces a record.
    NativeCaughtInternally,
}

impl OriginChannel {
    /// Number of channels.
    pub const COUNT: usize = 4;

    /// Every channel, in table order.
    pub const ALL: [OriginChannel; Self::COUNT] = [
        OriginChannel::UiThreadDispatch,
        OriginChannel::BackgroundThreadUnhandled,
        OriginChannel::NativeCorruptedState,
        OriginChannel::NativeCaughtInternally,
    ];

    /// Row of this channel in per-channel tables.
    #[inline]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Config key and report label.
    pub const fn name(self) -> &'static str {
        match self {
            OriginChannel::UiThreadDispatch => "ui_thread_dispatch",
            OriginChannel::BackgroundThreadUnhandled => "background_thread_unhandled",
            OriginChannel::NativeCorruptedState => "native_corrupted_state",
            OriginChannel::NativeCaughtInternally => "native_caught_internally",
        }
    }

    /// Single-bit set for this channel.
    pub const fn flag(self) -> ChannelSet {
        match self {
            OriginChannel::UiThreadDispatch => ChannelSet::UI_THREAD_DISPATCH,
            OriginChannel::BackgroundThreadUnhandled => ChannelSet::BACKGROUND_THREAD_UNHANDLED,
            OriginChannel::NativeCorruptedState => ChannelSet::NATIVE_CORRUPTED_STATE,
            OriginChannel::NativeCaughtInternally => ChannelSet::NATIVE_CAUGHT_INTERNALLY,
        }
    }
}

impl fmt::Display for OriginChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

bitflags! {
    /// Set of channels, used for per-thread reentrancy tracking.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ChannelSet: u8 {
        const UI_THREAD_DISPATCH = 1 << 0;
        const BACKGROUND_THREAD_UNHANDLED = 1 << 1;
        const NATIVE_CORRUPTED_STATE = 1 << 2;
        const NATIVE_CAUGHT_INTERNALLY = 1 << 3;
    }
}

/// How far a call stack captured on a channel can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StackValidity {
    /// Captured synchronously on the faulting thread.
    Synchronous,
    /// Valid at capture, but the thread is already past safe recovery.
    PastSafeRecovery,
    /// Only valid if captured before unwinding; unreliable after stack exhaustion.
    BestEffort,
    /// The channel never produces a record.
    NotApplicable,
}

impl StackValidity {
    /// Qualifier printed next to a stack of this validity, if any.
    pub const fn qualifier(self) -> Option<&'static str> {
        match self {
            StackValidity::Synchronous | StackValidity::NotApplicable => None,
            StackValidity::PastSafeRecovery => Some("past safe recovery"),
            StackValidity::BestEffort => Some("best effort"),
        }
    }
}

/// Static guarantees of one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSpec {
    /// Channel this row describes.
    pub channel: OriginChannel,
    /// Trust level of captured stacks.
    pub stack_validity: StackValidity,
    /// Whether a fault on this channel can ever reach the coordinator.
    pub observable: bool,
    /// Whether the process may keep running after this channel fires.
    pub recoverable: bool,
}

/// Fixed table of channel guarantees, indexed by [`OriginChannel::index`].
#[derive(Debug, Clone)]
pub struct ChannelRegistry {
    specs: [ChannelSpec; OriginChannel::COUNT],
}

impl ChannelRegistry {
    /// Registry with the guarantees of the supported hosts.
    pub const fn new() -> Self {
        Self {
            specs: [
                ChannelSpec {
                    channel: OriginChannel::UiThreadDispatch,
                    stack_validity: StackValidity::Synchronous,
                    observable: true,
                    recoverable: true,
                },
                ChannelSpec {
                    channel: OriginChannel::BackgroundThreadUnhandled,
                    stack_validity: StackValidity::PastSafeRecovery,
                    observable: true,
                    recoverable: false,
                },
                ChannelSpec {
                    channel: OriginChannel::NativeCorruptedState,
                    stack_validity: StackValidity::BestEffort,
                    observable: true,
                    recoverable: true,
                },
                ChannelSpec {
                    channel: OriginChannel::NativeCaughtInternally,
                    stack_validity: StackValidity::NotApplicable,
                    observable: false,
                    recoverable: true,
                },
            ],
        }
    }

    /// Guarantees for `channel`.
    #[inline]
    pub fn spec(&self, channel: OriginChannel) -> &ChannelSpec {
        &self.specs[channel.index()]
    }

    /// Channels that can produce a record.
    pub fn observable(&self) -> ChannelSet {
        self.specs
            .iter()
            .filter(|spec| spec.observable)
            .fold(ChannelSet::empty(), |set, spec| set | spec.channel.flag())
    }

    /// Iterate rows in table order.
    pub fn iter(&self) -> impl Iterator<Item = &ChannelSpec> {
        self.specs.iter()
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_rows_match_their_index() {
        let registry = ChannelRegistry::new();
        for channel in OriginChannel::ALL {
            assert_eq!(registry.spec(channel).channel, channel);
        }
    }

    #[test]
    fn caught_internally_is_never_observable() {
        let registry = ChannelRegistry::new();
        let observable = registry.observable();
        assert!(!observable.contains(ChannelSet::NATIVE_CAUGHT_INTERNALLY));
        assert!(observable.contains(
            ChannelSet::UI_THREAD_DISPATCH
                | ChannelSet::BACKGROUND_THREAD_UNHANDLED
                | ChannelSet::NATIVE_CORRUPTED_STATE
        ));
    }

    #[test]
    fn only_the_ui_channel_has_a_fully_trusted_stack() {
        let registry = ChannelRegistry::new();
        for spec in registry.iter().filter(|s| s.observable) {
            let trusted = spec.stack_validity.qualifier().is_none();
            assert_eq!(trusted, spec.channel == OriginChannel::UiThreadDispatch, "{}", spec.channel);
        }
    }

    #[test]
    fn config_keys_parse_to_channels() {
        use faultline_common::config::ConfigLoader;

        #[derive(Deserialize)]
        struct Wrapper {
            channel: OriginChannel,
        }
        for channel in OriginChannel::ALL {
            let parsed = Wrapper::from_toml(&format!("channel = \"{}\"", channel.name())).unwrap();
            assert_eq!(parsed.channel, channel);
            assert_eq!(channel.to_string(), channel.name());
        }
    }
}
