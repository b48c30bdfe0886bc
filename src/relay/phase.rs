//! Call lifecycle as a pure transition table.
//!
//! The session actor feeds every [`SessionEvent`] through [`transition`] and
//! carries out the returned effects; nothing else mutates the phase.

use std::fmt;

use crate::protocol::Side;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// Waiting for the model endpoint to acknowledge the session configuration.
    Connecting,
    Streaming,
    /// The caller hung up; remaining model audio is still played out.
    Draining,
    Closed,
}

impl Phase {
    /// Whether media read from `source` may be forwarded to its peer.
    #[must_use]
    pub const fn forwards(self, source: Side) -> bool {
        match self {
            Self::Streaming => true,
            Self::Draining => matches!(source, Side::Model),
            Self::Connecting | Self::Closed => false,
        }
    }

    #[must_use]
    pub const fn is_closed(self) -> bool {
        matches!(self, Self::Closed)
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Streaming => "streaming",
            Self::Draining => "draining",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Input to the state machine, raised by the relay loops, timers or the registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    ConfigAck,
    CallStopped,
    Interrupt,
    Mark(String),
    /// The receiving half of a leg reached end of stream.
    SourceClosed(Side),
    TransportError { side: Side, reason: String },
    /// The telephony writer could not deliver queued playback.
    PlaybackFailed { reason: String },
    SetupTimeout,
    DrainTimeout,
    Shutdown,
}

/// Why a session reached [`Phase::Closed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// The call ended after the caller hung up: the model finished its reply,
    /// or the caller leg went away while it was still playing.
    Completed,
    DrainTimeout,
    SetupTimeout,
    /// The caller hung up before the model was ready.
    CallEnded,
    /// A leg closed while the other still expected traffic.
    PeerClosed(Side),
    TransportError { side: Side, reason: String },
    Shutdown,
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => f.write_str("completed"),
            Self::DrainTimeout => f.write_str("drain timeout"),
            Self::SetupTimeout => f.write_str("setup timeout"),
            Self::CallEnded => f.write_str("call ended before setup"),
            Self::PeerClosed(side) => write!(f, "{side} connection closed unexpectedly"),
            Self::TransportError { side, reason } => write!(f, "{side} transport error: {reason}"),
            Self::Shutdown => f.write_str("shutdown"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    ArmDrainTimer,
    /// Drop model audio queued toward telephony and clear the provider buffer.
    DiscardPlayback,
    AcknowledgeMark(String),
    Teardown(CloseReason),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub next: Phase,
    pub effects: Vec<Effect>,
}

impl Transition {
    const fn stay(phase: Phase) -> Self {
        Self {
            next: phase,
            effects: Vec::new(),
        }
    }

    const fn to(next: Phase) -> Self {
        Self {
            next,
            effects: Vec::new(),
        }
    }

    fn with(phase: Phase, effect: Effect) -> Self {
        Self {
            next: phase,
            effects: vec![effect],
        }
    }

    fn close(reason: CloseReason) -> Self {
        Self::with(Phase::Closed, Effect::Teardown(reason))
    }
}

/// Compute the next phase and the effects of applying `event` in `phase`.
///
/// `Closed` absorbs everything. Timer events that no longer apply (a setup
/// timeout after the ack, a drain timeout outside `Draining`) are ignored.
#[must_use]
pub fn transition(phase: Phase, event: &SessionEvent) -> Transition {
    use Phase::{Closed, Connecting, Draining, Streaming};
    use SessionEvent as E;

    match (phase, event) {
        (Closed, _) => Transition::stay(Closed),

        (_, E::Shutdown) => Transition::close(CloseReason::Shutdown),
        (_, E::TransportError { side, reason }) => Transition::close(CloseReason::TransportError {
            side: *side,
            reason: reason.clone(),
        }),

        (Connecting, E::ConfigAck) => Transition::to(Streaming),
        (Connecting, E::SetupTimeout) => Transition::close(CloseReason::SetupTimeout),
        (Connecting, E::CallStopped) => Transition::close(CloseReason::CallEnded),
        (Connecting | Streaming, E::SourceClosed(side)) => {
            Transition::close(CloseReason::PeerClosed(*side))
        }

        (Streaming, E::CallStopped) => Transition::with(Draining, Effect::ArmDrainTimer),
        (Streaming, E::Interrupt) => Transition::with(Streaming, Effect::DiscardPlayback),

        (Draining, E::SourceClosed(Side::Model) | E::PlaybackFailed { .. }) => {
            Transition::close(CloseReason::Completed)
        }
        (Connecting | Streaming, E::PlaybackFailed { reason }) => {
            Transition::close(CloseReason::TransportError {
                side: Side::Telephony,
                reason: reason.clone(),
            })
        }
        (Draining, E::DrainTimeout) => Transition::close(CloseReason::DrainTimeout),

        (Connecting | Streaming | Draining, E::Mark(label)) => {
            Transition::with(phase, Effect::AcknowledgeMark(label.clone()))
        }

        (
            Connecting | Streaming | Draining,
            E::ConfigAck
            | E::CallStopped
            | E::Interrupt
            | E::SourceClosed(Side::Telephony)
            | E::SetupTimeout
            | E::DrainTimeout,
        ) => Transition::stay(phase),
    }
}
