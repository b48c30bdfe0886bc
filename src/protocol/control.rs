use super::frame::Frame;

/// Which leg of the relay a message came from or is headed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Telephony,
    Model,
}

impl Side {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Telephony => "telephony",
            Self::Model => "model",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded control envelope from either leg.
///
/// Each kind has a single source: call lifecycle and marks come from the
/// telephony provider, configuration acks, interrupts, errors and text from the
/// model endpoint. Media frames arrive from both, each in its own encoding.
/// `TransportError` is never parsed; the relay loops raise it locally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlEvent {
    CallStarted {
        stream_sid: String,
        call_sid: String,
    },
    CallStopped,
    MediaFrame(Frame),
    Mark(String),
    InterruptSignal,
    ConfigAck,
    ModelError(String),
    ModelText(String),
    TransportError(String),
    /// A recognized provider event the relay does not act on.
    Other(String),
}

impl ControlEvent {
    /// The leg that is allowed to produce this event, if it is tied to one.
    #[must_use]
    pub const fn source(&self) -> Option<Side> {
        match self {
            Self::CallStarted { .. } | Self::CallStopped | Self::Mark(_) => Some(Side::Telephony),
            Self::InterruptSignal | Self::ConfigAck | Self::ModelError(_) | Self::ModelText(_) => {
                Some(Side::Model)
            }
            Self::MediaFrame(_) | Self::TransportError(_) | Self::Other(_) => None,
        }
    }

    #[must_use]
    pub const fn kind(&self) -> &'static str {
        match self {
            Self::CallStarted { .. } => "call_started",
            Self::CallStopped => "call_stopped",
            Self::MediaFrame(_) => "media_frame",
            Self::Mark(_) => "mark",
            Self::InterruptSignal => "interrupt",
            Self::ConfigAck => "config_ack",
            Self::ModelError(_) => "model_error",
            Self::ModelText(_) => "model_text",
            Self::TransportError(_) => "transport_error",
            Self::Other(_) => "other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::frame::Encoding;

    #[test]
    fn every_control_kind_has_one_source() {
        assert_eq!(ControlEvent::CallStopped.source(), Some(Side::Telephony));
        assert_eq!(ControlEvent::Mark("m".to_string()).source(), Some(Side::Telephony));
        assert_eq!(ControlEvent::ConfigAck.source(), Some(Side::Model));
        assert_eq!(ControlEvent::InterruptSignal.source(), Some(Side::Model));
        assert_eq!(ControlEvent::ModelError("x".to_string()).source(), Some(Side::Model));
        assert_eq!(ControlEvent::TransportError("x".to_string()).source(), None);

        let frame = Frame::new(Encoding::Mulaw, "", 0);
        assert_eq!(ControlEvent::MediaFrame(frame).source(), None);
    }
}
