//! Telephony media-stream envelopes.
//!
//! Inbound messages are tagged by `event`: `connected`, `start`, `media`,
//! `mark`, `stop` (or `close`) and `dtmf`. Outbound the relay emits `media`,
//! `mark` and `clear`, each addressed to the stream id announced in `start`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::control::ControlEvent;
use super::frame::{Encoding, Frame};
use crate::error::ParseError;

const DISCRIMINATOR: &str = "event";
const KNOWN_EVENTS: &[&str] = &["connected", "start", "media", "mark", "stop", "close", "dtmf"];

#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "lowercase")]
enum TelephonyEnvelope {
    Connected,
    Start {
        #[serde(default, rename = "streamSid", alias = "streamId", alias = "stream_id")]
        stream_sid: Option<String>,
        #[serde(default)]
        start: StartMeta,
    },
    Media {
        media: InboundMedia,
    },
    Mark {
        mark: MarkPayload,
    },
    #[serde(alias = "close")]
    Stop,
    Dtmf,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartMeta {
    #[serde(default, alias = "streamId", alias = "stream_id")]
    stream_sid: Option<String>,
    #[serde(default, alias = "call_sid", alias = "callId")]
    call_sid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InboundMedia {
    payload: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MarkPayload {
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OutboundMedia {
    pub payload: String,
}

/// Decode one message received from the telephony provider.
///
/// `seq` is stamped on the frame when the message is a media event.
///
/// # Errors
/// Returns a [`ParseError`] if the message is not JSON, has no `event` field,
/// names an unknown event, or lacks a required field.
pub fn parse_telephony_event(raw: &str, seq: u64) -> Result<ControlEvent, ParseError> {
    let value: Value = serde_json::from_str(raw)?;
    let kind = value
        .get(DISCRIMINATOR)
        .and_then(Value::as_str)
        .ok_or(ParseError::MissingDiscriminator(DISCRIMINATOR))?
        .to_string();
    if !KNOWN_EVENTS.contains(&kind.as_str()) {
        return Err(ParseError::UnknownEvent(kind));
    }

    let envelope: TelephonyEnvelope =
        serde_json::from_value(value).map_err(|err| ParseError::InvalidEnvelope {
            kind: kind.clone(),
            reason: err.to_string(),
        })?;

    let event = match envelope {
        TelephonyEnvelope::Start { stream_sid, start } => {
            let stream_sid = stream_sid.or(start.stream_sid).ok_or_else(|| ParseError::InvalidEnvelope {
                kind: kind.clone(),
                reason: "missing stream id".to_string(),
            })?;
            let call_sid = start.call_sid.unwrap_or_else(|| stream_sid.clone());
            ControlEvent::CallStarted { stream_sid, call_sid }
        }
        TelephonyEnvelope::Media { media } => {
            ControlEvent::MediaFrame(Frame::new(Encoding::Mulaw, media.payload, seq))
        }
        TelephonyEnvelope::Mark { mark } => ControlEvent::Mark(mark.name),
        TelephonyEnvelope::Stop => ControlEvent::CallStopped,
        TelephonyEnvelope::Connected | TelephonyEnvelope::Dtmf => ControlEvent::Other(kind),
    };
    Ok(event)
}

/// A message the relay sends to the telephony provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum TelephonyCommand {
    Media {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        media: OutboundMedia,
    },
    Mark {
        #[serde(rename = "streamSid")]
        stream_sid: String,
        mark: MarkPayload,
    },
    /// Drop any audio the provider has buffered for playback.
    Clear {
        #[serde(rename = "streamSid")]
        stream_sid: String,
    },
}

impl TelephonyCommand {
    /// Wrap a mu-law frame for playback on the call.
    #[must_use]
    pub fn media(stream_sid: impl Into<String>, frame: &Frame) -> Self {
        Self::Media {
            stream_sid: stream_sid.into(),
            media: OutboundMedia {
                payload: frame.payload().to_string(),
            },
        }
    }

    #[must_use]
    pub fn mark(stream_sid: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Mark {
            stream_sid: stream_sid.into(),
            mark: MarkPayload { name: name.into() },
        }
    }

    #[must_use]
    pub fn clear(stream_sid: impl Into<String>) -> Self {
        Self::Clear {
            stream_sid: stream_sid.into(),
        }
    }

    #[must_use]
    pub const fn is_media(&self) -> bool {
        matches!(self, Self::Media { .. })
    }

    /// # Errors
    /// Returns an error if serialization fails.
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
