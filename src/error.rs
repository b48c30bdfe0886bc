use std::time::Duration;
use thiserror::Error;

/// A media payload that could not be translated between encodings.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("invalid base64 audio payload: {0}")]
    Base64(String),

    #[error("PCM16 payload length {0} is not a multiple of the 2-byte sample width")]
    Unaligned(usize),

    #[error("frame encoding {actual} does not match expected {expected}")]
    EncodingMismatch {
        expected: &'static str,
        actual: &'static str,
    },
}

/// A control envelope that could not be decoded.
#[derive(Error, Debug)]
pub enum ParseError {
    #[error("malformed JSON envelope: {0}")]
    Json(#[from] serde_json::Error),

    #[error("envelope has no `{0}` discriminator")]
    MissingDiscriminator(&'static str),

    #[error("unknown event type `{0}`")]
    UnknownEvent(String),

    #[error("invalid `{kind}` envelope: {reason}")]
    InvalidEnvelope { kind: String, reason: String },

    #[error("binary frame is not UTF-8: {0}")]
    NotUtf8(#[from] std::str::Utf8Error),
}

#[derive(Error, Debug)]
pub enum Error {
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("Failed to parse or serialize JSON: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("Header error: {0}")]
    Header(#[from] tokio_tungstenite::tungstenite::http::header::InvalidHeaderValue),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Model endpoint did not acknowledge the session configuration within {0:?}")]
    SetupTimeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("The connection was closed unexpectedly")]
    ConnectionClosed,

    #[error("A session for call `{0}` is already active")]
    DuplicateCall(String),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
