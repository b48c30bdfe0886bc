use base64::Engine as _;
use base64::engine::general_purpose;
use std::fmt;

use crate::error::CodecError;

/// Sample rate of the telephony leg (G.711 mu-law, mono).
pub const TELEPHONY_SAMPLE_RATE: u32 = 8_000;

/// Sample rate of the model leg (PCM16 little-endian, mono).
pub const MODEL_SAMPLE_RATE: u32 = 24_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    /// 8 kHz G.711 mu-law, one byte per sample.
    Mulaw,
    /// 24 kHz signed 16-bit little-endian PCM.
    Pcm16,
}

impl Encoding {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Mulaw => "audio/x-mulaw",
            Self::Pcm16 => "audio/pcm16",
        }
    }

    #[must_use]
    pub const fn sample_rate(self) -> u32 {
        match self {
            Self::Mulaw => TELEPHONY_SAMPLE_RATE,
            Self::Pcm16 => MODEL_SAMPLE_RATE,
        }
    }

    #[must_use]
    pub const fn sample_width(self) -> usize {
        match self {
            Self::Mulaw => 1,
            Self::Pcm16 => 2,
        }
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One chunk of audio as it travels on the wire.
///
/// The payload is kept in its base64 wire form; decoding happens in the codec
/// so a malformed payload is reported as a [`CodecError`] for that frame only.
/// Frames are immutable once built: translation produces a new frame carrying
/// the same sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    encoding: Encoding,
    payload: String,
    seq: u64,
}

impl Frame {
    #[must_use]
    pub fn new(encoding: Encoding, payload: impl Into<String>, seq: u64) -> Self {
        Self {
            encoding,
            payload: payload.into(),
            seq,
        }
    }

    /// Build a frame from raw audio bytes, base64-wrapping them.
    #[must_use]
    pub fn from_audio(encoding: Encoding, audio: &[u8], seq: u64) -> Self {
        Self::new(encoding, general_purpose::STANDARD.encode(audio), seq)
    }

    #[must_use]
    pub const fn encoding(&self) -> Encoding {
        self.encoding
    }

    #[must_use]
    pub fn payload(&self) -> &str {
        &self.payload
    }

    #[must_use]
    pub const fn seq(&self) -> u64 {
        self.seq
    }

    /// Length of the audio carried by a well-formed payload, without decoding it.
    #[must_use]
    pub fn audio_len(&self) -> usize {
        let bytes = self.payload.as_bytes();
        let padding = bytes.iter().rev().take_while(|&&b| b == b'=').count();
        (bytes.len() / 4 * 3).saturating_sub(padding)
    }

    /// Decode the base64 payload into raw audio bytes.
    ///
    /// # Errors
    /// Returns [`CodecError::Base64`] if the payload is not valid base64.
    pub fn audio(&self) -> Result<Vec<u8>, CodecError> {
        general_purpose::STANDARD
            .decode(self.payload.as_bytes())
            .map_err(|err| CodecError::Base64(err.to_string()))
    }
}
