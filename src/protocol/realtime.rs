//! Realtime model endpoint envelopes.
//!
//! Inbound messages are tagged by `type`. The relay acts on `session.updated`,
//! audio and text deltas, `input_audio_buffer.speech_started` and `error`;
//! the rest of the known event families are passed through as
//! [`ControlEvent::Other`]. Both the GA (`response.output_audio.delta`) and
//! beta (`response.audio.delta`) names are accepted, with the audio delta
//! either a bare base64 string or an object holding it under `audio`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::control::ControlEvent;
use super::frame::{Encoding, Frame};
use crate::config::SessionConfig;
use crate::error::{Error, ParseError};

const DISCRIMINATOR: &str = "type";
const MAX_INPUT_AUDIO_CHUNK_BYTES: usize = 15 * 1024 * 1024;

const ACTED_EVENTS: &[&str] = &[
    "session.updated",
    "response.audio.delta",
    "response.output_audio.delta",
    "response.audio_transcript.delta",
    "response.output_audio_transcript.delta",
    "response.text.delta",
    "response.output_text.delta",
    "input_audio_buffer.speech_started",
    "error",
];

const PASSIVE_FAMILIES: &[&str] = &[
    "session.",
    "response.",
    "conversation.",
    "input_audio_buffer.",
    "output_audio_buffer.",
    "rate_limits.",
    "transcription_session.",
];

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum ModelEnvelope {
    #[serde(rename = "session.updated")]
    SessionUpdated,
    #[serde(rename = "response.audio.delta", alias = "response.output_audio.delta")]
    AudioDelta { delta: AudioChunk },
    #[serde(
        rename = "response.audio_transcript.delta",
        alias = "response.output_audio_transcript.delta",
        alias = "response.text.delta",
        alias = "response.output_text.delta"
    )]
    TextDelta { delta: String },
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted,
    #[serde(rename = "error")]
    Error { error: ErrorBody },
}

/// Audio deltas carry base64 either inline or as `{"audio": ...}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AudioChunk {
    Inline(String),
    Nested { audio: String },
}

impl AudioChunk {
    fn into_payload(self) -> String {
        match self {
            Self::Inline(audio) | Self::Nested { audio } => audio,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ErrorBody {
    #[serde(rename = "type", default)]
    pub error_type: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl ErrorBody {
    fn describe(self) -> String {
        match (self.code, self.message) {
            (Some(code), Some(message)) => format!("{code}: {message}"),
            (None, Some(message)) => message,
            (Some(code), None) => code,
            (None, None) => self.error_type.unwrap_or_else(|| "unspecified error".to_string()),
        }
    }
}

/// Decode one message received from the model endpoint.
///
/// `seq` is stamped on the frame when the message is an audio delta.
///
/// # Errors
/// Returns a [`ParseError`] if the message is not JSON, has no `type` field,
/// names an event outside the known families, or lacks a required field.
pub fn parse_model_event(raw: &str, seq: u64) -> Result<ControlEvent, ParseError> {
    let value: Value = serde_json::from_str(raw)?;
    let kind = value
        .get(DISCRIMINATOR)
        .and_then(Value::as_str)
        .ok_or(ParseError::MissingDiscriminator(DISCRIMINATOR))?
        .to_string();

    if !ACTED_EVENTS.contains(&kind.as_str()) {
        if PASSIVE_FAMILIES.iter().any(|family| kind.starts_with(family)) {
            return Ok(ControlEvent::Other(kind));
        }
        return Err(ParseError::UnknownEvent(kind));
    }

    let envelope: ModelEnvelope =
        serde_json::from_value(value).map_err(|err| ParseError::InvalidEnvelope {
            kind: kind.clone(),
            reason: err.to_string(),
        })?;

    Ok(match envelope {
        ModelEnvelope::SessionUpdated => ControlEvent::ConfigAck,
        ModelEnvelope::AudioDelta { delta } => {
            ControlEvent::MediaFrame(Frame::new(Encoding::Pcm16, delta.into_payload(), seq))
        }
        ModelEnvelope::TextDelta { delta } => ControlEvent::ModelText(delta),
        ModelEnvelope::SpeechStarted => ControlEvent::InterruptSignal,
        ModelEnvelope::Error { error } => ControlEvent::ModelError(error.describe()),
    })
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AudioFormat {
    Pcm16,
    G711Ulaw,
    G711Alaw,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Audio,
    Text,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TurnDetection {
    ServerVad {
        #[serde(skip_serializing_if = "Option::is_none")]
        threshold: Option<f32>,
        #[serde(skip_serializing_if = "Option::is_none")]
        silence_duration_ms: Option<u32>,
    },
}

/// Session configuration sent in `session.update` right after connecting.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionUpdate {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instructions: Option<String>,
    pub voice: String,
    pub modalities: Vec<Modality>,
    pub input_audio_format: AudioFormat,
    pub output_audio_format: AudioFormat,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_detection: Option<TurnDetection>,
}

impl SessionUpdate {
    /// PCM16 both ways with server-side voice activity detection, so the
    /// endpoint reports barge-in through `speech_started`.
    #[must_use]
    pub fn for_relay(config: &SessionConfig) -> Self {
        Self {
            instructions: config.instructions.clone(),
            voice: config.voice.clone(),
            modalities: vec![Modality::Audio, Modality::Text],
            input_audio_format: AudioFormat::Pcm16,
            output_audio_format: AudioFormat::Pcm16,
            turn_detection: Some(TurnDetection::ServerVad {
                threshold: None,
                silence_duration_ms: None,
            }),
        }
    }
}

/// A message the relay sends to the model endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ModelCommand {
    #[serde(rename = "session.update")]
    SessionUpdate {
        #[serde(skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        session: Box<SessionUpdate>,
    },
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        #[serde(skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
        audio: String,
    },
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit {
        #[serde(skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
    },
    #[serde(rename = "response.create")]
    ResponseCreate {
        #[serde(skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
    },
    #[serde(rename = "response.cancel")]
    ResponseCancel {
        #[serde(skip_serializing_if = "Option::is_none")]
        event_id: Option<String>,
    },
}

impl ModelCommand {
    #[must_use]
    pub fn session_update(config: &SessionConfig) -> Self {
        Self::SessionUpdate {
            event_id: None,
            session: Box::new(SessionUpdate::for_relay(config)),
        }
    }

    /// Wrap a PCM16 frame as an input buffer append.
    #[must_use]
    pub fn append(frame: &Frame) -> Self {
        Self::InputAudioBufferAppend {
            event_id: None,
            audio: frame.payload().to_string(),
        }
    }

    /// Validate and serialize the command.
    ///
    /// # Errors
    /// Returns an error if an append carries malformed base64 or more than
    /// 15MB of audio, or if serialization fails.
    #[allow(clippy::result_large_err)]
    pub fn encode(&self) -> Result<String, Error> {
        if let Self::InputAudioBufferAppend { audio, .. } = self {
            let size = estimate_base64_decoded_len(audio)?;
            if size > MAX_INPUT_AUDIO_CHUNK_BYTES {
                return Err(Error::Transport(format!(
                    "input_audio_buffer.append exceeds 15MB ({size} bytes)"
                )));
            }
        }
        Ok(serde_json::to_string(self)?)
    }
}

#[allow(clippy::result_large_err)]
fn estimate_base64_decoded_len(s: &str) -> Result<usize, Error> {
    let bytes = s.as_bytes();
    if bytes.len() % 4 != 0 {
        return Err(Error::Transport(
            "input_audio_buffer.append invalid base64 length".to_string(),
        ));
    }
    let padding = bytes.iter().rev().take_while(|&&b| b == b'=').count();
    if padding > 2 {
        return Err(Error::Transport(
            "input_audio_buffer.append invalid base64 padding length".to_string(),
        ));
    }
    Ok(bytes.len() / 4 * 3 - padding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_updated_is_config_ack() {
        let raw = json!({
            "type": "session.updated",
            "event_id": "evt_1",
            "session": { "voice": "verse", "input_audio_format": "pcm16" }
        })
        .to_string();
        assert_eq!(parse_model_event(&raw, 0).unwrap(), ControlEvent::ConfigAck);
    }

    #[test]
    fn audio_delta_in_both_dialects() {
        for kind in ["response.audio.delta", "response.output_audio.delta"] {
            let raw = json!({
                "type": kind,
                "event_id": "evt_2",
                "response_id": "resp_1",
                "item_id": "item_1",
                "output_index": 0,
                "content_index": 0,
                "delta": "AAABAA=="
            })
            .to_string();
            match parse_model_event(&raw, 5).unwrap() {
                ControlEvent::MediaFrame(frame) => {
                    assert_eq!(frame.encoding(), Encoding::Pcm16);
                    assert_eq!(frame.payload(), "AAABAA==");
                    assert_eq!(frame.seq(), 5);
                }
                other => panic!("unexpected event for {kind}: {other:?}"),
            }
        }
    }

    #[test]
    fn audio_delta_with_nested_payload() {
        let raw = json!({
            "type": "response.output_audio.delta",
            "response_id": "resp_1",
            "delta": { "audio": "AAABAA==" }
        })
        .to_string();
        match parse_model_event(&raw, 2).unwrap() {
            ControlEvent::MediaFrame(frame) => assert_eq!(frame.payload(), "AAABAA=="),
            other => panic!("unexpected event: {other:?}"),
        }

        let raw = json!({ "type": "response.audio.delta", "delta": { "pcm": "AAAA" } }).to_string();
        assert!(matches!(
            parse_model_event(&raw, 0),
            Err(ParseError::InvalidEnvelope { ref kind, .. }) if kind == "response.audio.delta"
        ));
    }

    #[test]
    fn speech_started_is_interrupt() {
        let raw = json!({
            "type": "input_audio_buffer.speech_started",
            "event_id": "evt_3",
            "audio_start_ms": 1200,
            "item_id": "item_2"
        })
        .to_string();
        assert_eq!(parse_model_event(&raw, 0).unwrap(), ControlEvent::InterruptSignal);
    }

    #[test]
    fn error_and_text_delta() {
        let raw = json!({
            "type": "error",
            "event_id": "evt_4",
            "error": { "type": "invalid_request_error", "code": "invalid_value", "message": "bad voice" }
        })
        .to_string();
        assert_eq!(
            parse_model_event(&raw, 0).unwrap(),
            ControlEvent::ModelError("invalid_value: bad voice".to_string())
        );

        let raw = json!({ "type": "response.audio_transcript.delta", "delta": "Hel" }).to_string();
        assert_eq!(
            parse_model_event(&raw, 0).unwrap(),
            ControlEvent::ModelText("Hel".to_string())
        );
    }

    #[test]
    fn passive_families_and_unknown_types() {
        for kind in ["session.created", "response.done", "rate_limits.updated", "conversation.item.created"] {
            let raw = json!({ "type": kind }).to_string();
            assert_eq!(parse_model_event(&raw, 0).unwrap(), ControlEvent::Other(kind.to_string()));
        }

        let raw = json!({ "type": "telepathy.started" }).to_string();
        assert!(matches!(parse_model_event(&raw, 0), Err(ParseError::UnknownEvent(_))));
    }

    #[test]
    fn missing_fields_are_invalid() {
        let raw = json!({ "type": "response.audio.delta" }).to_string();
        assert!(matches!(
            parse_model_event(&raw, 0),
            Err(ParseError::InvalidEnvelope { kind, .. }) if kind == "response.audio.delta"
        ));
        assert!(matches!(
            parse_model_event(r#"{"delta":"AA=="}"#, 0),
            Err(ParseError::MissingDiscriminator("type"))
        ));
        assert!(matches!(parse_model_event("[]", 0), Err(ParseError::MissingDiscriminator(_))));
    }

    #[test]
    fn session_update_wire_shape() {
        let config = SessionConfig {
            instructions: Some("Be brief.".to_string()),
            voice: "verse".to_string(),
            ..SessionConfig::default()
        };
        let value = serde_json::to_value(ModelCommand::session_update(&config)).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "session.update",
                "session": {
                    "instructions": "Be brief.",
                    "voice": "verse",
                    "modalities": ["audio", "text"],
                    "input_audio_format": "pcm16",
                    "output_audio_format": "pcm16",
                    "turn_detection": { "type": "server_vad" }
                }
            })
        );
    }

    #[test]
    fn append_encodes_and_validates_payload() {
        let cmd = ModelCommand::append(&Frame::new(Encoding::Pcm16, "AAAA", 0));
        assert_eq!(
            cmd.encode().unwrap(),
            r#"{"type":"input_audio_buffer.append","audio":"AAAA"}"#
        );

        let bad = ModelCommand::append(&Frame::new(Encoding::Pcm16, "AAA", 0));
        assert!(matches!(bad.encode(), Err(Error::Transport(_))));
    }
}
