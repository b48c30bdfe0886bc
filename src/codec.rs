//! Audio frame translation between the telephony and model legs.
//!
//! Telephony audio is 8 kHz G.711 mu-law, model audio is 24 kHz PCM16
//! little-endian, both mono and base64-wrapped on the wire.
//!
//! Telephony to model: each mu-law byte is expanded to a linear sample and the
//! stream is upsampled 1:3 by linear interpolation. Sample `k` produces
//! `x[k]`, `x[k] + (x[k+1] - x[k]) / 3` and `x[k] + 2 * (x[k+1] - x[k]) / 3`
//! (integer division). The final sample of a frame has no successor and is held
//! for all three outputs.
//!
//! Model to telephony: the payload must hold whole 16-bit samples. Sample `3k`
//! of every group of three is kept and compressed to mu-law. A trailing partial
//! group of one or two samples still yields one telephony sample, so `n` PCM
//! samples become `ceil(n / 3)` mu-law bytes.
//!
//! Because upsampling reproduces every original sample at index `3k`, a
//! telephony payload survives a round trip unchanged, except that the mu-law
//! negative-zero code `0x7F` comes back as `0xFF`. Both codes decode to 0.

use crate::error::CodecError;
use crate::protocol::frame::{Encoding, Frame, MODEL_SAMPLE_RATE, TELEPHONY_SAMPLE_RATE};

const MULAW_BIAS: i32 = 0x84;
const MULAW_CLIP: i32 = 32_635;
const RATE_RATIO: usize = (MODEL_SAMPLE_RATE / TELEPHONY_SAMPLE_RATE) as usize;

/// Translate a telephony frame into the model encoding.
///
/// # Errors
/// Returns an error if the frame is not mu-law or its payload is not valid base64.
pub fn to_model_frame(frame: &Frame) -> Result<Frame, CodecError> {
    expect_encoding(frame, Encoding::Mulaw)?;
    let mulaw = frame.audio()?;

    let linear: Vec<i16> = mulaw.iter().copied().map(mulaw_to_linear).collect();
    let upsampled = upsample(&linear);

    let mut pcm = Vec::with_capacity(upsampled.len() * 2);
    for sample in upsampled {
        pcm.extend_from_slice(&sample.to_le_bytes());
    }
    Ok(Frame::from_audio(Encoding::Pcm16, &pcm, frame.seq()))
}

/// Translate a model frame into the telephony encoding.
///
/// # Errors
/// Returns an error if the frame is not PCM16, its payload is not valid base64,
/// or the decoded length is not a whole number of 16-bit samples.
pub fn to_telephony_frame(frame: &Frame) -> Result<Frame, CodecError> {
    expect_encoding(frame, Encoding::Pcm16)?;
    let pcm = frame.audio()?;
    if pcm.len() % Encoding::Pcm16.sample_width() != 0 {
        return Err(CodecError::Unaligned(pcm.len()));
    }

    let mulaw: Vec<u8> = pcm
        .chunks_exact(2)
        .step_by(RATE_RATIO)
        .map(|bytes| linear_to_mulaw(i16::from_le_bytes([bytes[0], bytes[1]])))
        .collect();
    Ok(Frame::from_audio(Encoding::Mulaw, &mulaw, frame.seq()))
}

fn expect_encoding(frame: &Frame, expected: Encoding) -> Result<(), CodecError> {
    let actual = frame.encoding();
    if actual == expected {
        Ok(())
    } else {
        Err(CodecError::EncodingMismatch {
            expected: expected.name(),
            actual: actual.name(),
        })
    }
}

fn upsample(samples: &[i16]) -> Vec<i16> {
    let mut out = Vec::with_capacity(samples.len() * RATE_RATIO);
    for (k, &current) in samples.iter().enumerate() {
        let a = i32::from(current);
        let b = samples.get(k + 1).map_or(a, |&next| i32::from(next));
        let step = b - a;
        out.push(current);
        out.push(clamp_i16(a + step / 3));
        out.push(clamp_i16(a + 2 * step / 3));
    }
    out
}

#[allow(clippy::cast_possible_truncation)]
fn clamp_i16(value: i32) -> i16 {
    value.clamp(i32::from(i16::MIN), i32::from(i16::MAX)) as i16
}

#[allow(clippy::cast_possible_truncation)]
pub(crate) fn mulaw_to_linear(byte: u8) -> i16 {
    let inverted = !byte;
    let exponent = (inverted >> 4) & 0x07;
    let mantissa = i32::from(inverted & 0x0F);
    let magnitude = ((mantissa << 3) + MULAW_BIAS) << exponent;
    let sample = if inverted & 0x80 == 0 {
        magnitude - MULAW_BIAS
    } else {
        MULAW_BIAS - magnitude
    };
    // |sample| never exceeds 32124
    sample as i16
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
pub(crate) fn linear_to_mulaw(sample: i16) -> u8 {
    let value = i32::from(sample);
    let (magnitude, mask) = if value < 0 { (-value, 0x7F) } else { (value, 0xFF) };
    let biased = magnitude.min(MULAW_CLIP) + MULAW_BIAS;

    let exponent = (0..8).find(|&e| biased < 0x100 << e).unwrap_or(7);
    let mantissa = (biased >> (exponent + 3)) & 0x0F;
    (((exponent << 4) | mantissa) as u8) ^ mask
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::Engine as _;
    use base64::engine::general_purpose;

    fn pcm_bytes(samples: &[i16]) -> Vec<u8> {
        samples.iter().flat_map(|s| s.to_le_bytes()).collect()
    }

    fn pcm_samples(frame: &Frame) -> Vec<i16> {
        frame
            .audio()
            .unwrap()
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect()
    }

    #[test]
    fn mulaw_reference_points() {
        assert_eq!(mulaw_to_linear(0xFF), 0);
        assert_eq!(mulaw_to_linear(0x7F), 0);
        assert_eq!(mulaw_to_linear(0x00), -32_124);
        assert_eq!(mulaw_to_linear(0x80), 32_124);
        assert_eq!(mulaw_to_linear(0x7E), -8);
        assert_eq!(mulaw_to_linear(0xFE), 8);

        assert_eq!(linear_to_mulaw(0), 0xFF);
        assert_eq!(linear_to_mulaw(i16::MAX), 0x80);
        assert_eq!(linear_to_mulaw(i16::MIN), 0x00);
        assert_eq!(linear_to_mulaw(-8), 0x7E);
    }

    #[test]
    fn every_mulaw_code_survives_expand_compress() {
        for byte in 0..=u8::MAX {
            let expected = if byte == 0x7F { 0xFF } else { byte };
            assert_eq!(linear_to_mulaw(mulaw_to_linear(byte)), expected, "code {byte:#04x}");
        }
    }

    #[test]
    fn upsample_interpolates_and_holds_last_sample() {
        // 0xFF -> 0, 0x80 -> 32124
        let frame = Frame::from_audio(Encoding::Mulaw, &[0xFF, 0x80], 7);
        let model = to_model_frame(&frame).unwrap();

        assert_eq!(model.encoding(), Encoding::Pcm16);
        assert_eq!(model.seq(), 7);
        assert_eq!(pcm_samples(&model), vec![0, 10_708, 21_416, 32_124, 32_124, 32_124]);
    }

    #[test]
    fn round_trip_is_bit_identical() {
        let audio: Vec<u8> = (0..=u8::MAX).filter(|&b| b != 0x7F).collect();
        let frame = Frame::from_audio(Encoding::Mulaw, &audio, 1);

        let back = to_telephony_frame(&to_model_frame(&frame).unwrap()).unwrap();
        assert_eq!(back.payload(), frame.payload());
        assert_eq!(back.seq(), 1);
    }

    #[test]
    fn round_trip_canonicalizes_negative_zero() {
        let frame = Frame::from_audio(Encoding::Mulaw, &[0x7F, 0x10, 0x7F], 0);
        let back = to_telephony_frame(&to_model_frame(&frame).unwrap()).unwrap();
        assert_eq!(back.audio().unwrap(), vec![0xFF, 0x10, 0xFF]);
    }

    #[test]
    fn partial_trailing_group_keeps_its_first_sample() {
        // 4 samples: one full group plus a partial group of one
        let frame = Frame::from_audio(Encoding::Pcm16, &pcm_bytes(&[8, 100, 200, -8]), 3);
        let tel = to_telephony_frame(&frame).unwrap();
        assert_eq!(tel.audio().unwrap(), vec![0xFE, 0x7E]);

        // 5 samples: one full group plus a partial group of two
        let frame = Frame::from_audio(Encoding::Pcm16, &pcm_bytes(&[8, 1, 1, -8, 500]), 3);
        let tel = to_telephony_frame(&frame).unwrap();
        assert_eq!(tel.audio().unwrap(), vec![0xFE, 0x7E]);

        // 2 samples: a lone partial group
        let frame = Frame::from_audio(Encoding::Pcm16, &pcm_bytes(&[0, 32_000]), 3);
        let tel = to_telephony_frame(&frame).unwrap();
        assert_eq!(tel.audio().unwrap(), vec![0xFF]);
    }

    #[test]
    fn empty_payload_maps_to_empty_payload() {
        let frame = Frame::new(Encoding::Mulaw, "", 0);
        assert_eq!(to_model_frame(&frame).unwrap().payload(), "");
        let frame = Frame::new(Encoding::Pcm16, "", 0);
        assert_eq!(to_telephony_frame(&frame).unwrap().payload(), "");
    }

    #[test]
    fn odd_pcm_length_is_rejected() {
        let frame = Frame::from_audio(Encoding::Pcm16, &[1, 2, 3], 0);
        assert_eq!(to_telephony_frame(&frame), Err(CodecError::Unaligned(3)));
    }

    #[test]
    fn malformed_base64_is_rejected() {
        let frame = Frame::new(Encoding::Mulaw, "not base64!", 0);
        assert!(matches!(to_model_frame(&frame), Err(CodecError::Base64(_))));
        let frame = Frame::new(Encoding::Pcm16, "AAA", 0);
        assert!(matches!(to_telephony_frame(&frame), Err(CodecError::Base64(_))));
    }

    #[test]
    fn wrong_encoding_tag_is_rejected() {
        let frame = Frame::new(Encoding::Pcm16, general_purpose::STANDARD.encode([0, 0]), 0);
        assert_eq!(
            to_model_frame(&frame),
            Err(CodecError::EncodingMismatch {
                expected: "audio/x-mulaw",
                actual: "audio/pcm16",
            })
        );
        let frame = Frame::from_audio(Encoding::Mulaw, &[0xFF], 0);
        assert!(matches!(
            to_telephony_frame(&frame),
            Err(CodecError::EncodingMismatch { .. })
        ));
    }
}
