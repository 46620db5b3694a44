//! PCM16 transport encoding and sample-rate conversion.

use crate::error::DecodeError;
use base64::Engine;
use rubato::{FastFixedIn, PolynomialDegree};

/// Sample rate the remote expects for microphone audio.
pub const INPUT_SAMPLE_RATE: u32 = 16_000;
/// Sample rate the remote uses for spoken responses when none is declared.
pub const OUTPUT_SAMPLE_RATE: u32 = 24_000;

/// Mime type of outbound microphone frames.
pub fn input_mime_type() -> String {
    format!("audio/pcm;rate={INPUT_SAMPLE_RATE}")
}

/// Creates a mono resampler to convert between audio sample rates.
pub fn create_resampler(
    in_sampling_rate: f64,
    out_sampling_rate: f64,
    chunk_size: usize,
) -> anyhow::Result<FastFixedIn<f32>> {
    let resampler = FastFixedIn::<f32>::new(
        out_sampling_rate / in_sampling_rate,
        1.0,
        PolynomialDegree::Cubic,
        chunk_size,
        1,
    )?;
    Ok(resampler)
}

/// Reads the `rate=` parameter of an `audio/pcm` mime type.
pub fn sample_rate_from_mime(mime_type: &str) -> Option<u32> {
    mime_type
        .split(';')
        .filter_map(|param| param.trim().strip_prefix("rate="))
        .find_map(|rate| rate.trim().parse().ok())
}

/// Decodes base64 little-endian PCM16 into normalized f32 samples.
///
/// Unlike a lenient decoder, malformed input is an error: bad base64, an odd
/// byte count, or an empty payload.
pub fn decode_pcm16_base64(data: &str) -> Result<Vec<f32>, DecodeError> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(data)
        .map_err(|e| DecodeError::Base64(e.to_string()))?;
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }
    if bytes.len() % 2 != 0 {
        return Err(DecodeError::OddLength(bytes.len()));
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|chunk| {
            let v = i16::from_le_bytes([chunk[0], chunk[1]]);
            (v as f32 / 32768.0).clamp(-1.0, 1.0)
        })
        .collect())
}

/// Encodes PCM16 samples as base64 little-endian bytes.
pub fn encode_pcm16_base64(pcm16: &[i16]) -> String {
    let bytes: Vec<u8> = pcm16.iter().flat_map(|s| s.to_le_bytes()).collect();
    base64::engine::general_purpose::STANDARD.encode(&bytes)
}

/// Converts normalized f32 samples to PCM16, clamping out-of-range values.
pub fn convert_f32_to_i16(pcm32: &[f32]) -> Vec<i16> {
    pcm32
        .iter()
        .map(|&sample| (sample * i16::MAX as f32).clamp(i16::MIN as f32, i16::MAX as f32) as i16)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_create_resampler() {
        assert!(create_resampler(48000.0, 16000.0, 1536).is_ok());
        assert!(create_resampler(24000.0, 48000.0, 512).is_ok());
    }

    #[test]
    fn test_sample_rate_from_mime() {
        assert_eq!(sample_rate_from_mime("audio/pcm;rate=24000"), Some(24000));
        assert_eq!(sample_rate_from_mime("audio/pcm; rate=16000"), Some(16000));
        assert_eq!(sample_rate_from_mime("audio/pcm"), None);
        assert_eq!(sample_rate_from_mime("audio/pcm;rate=fast"), None);
    }

    #[test]
    fn test_decode_known_values() {
        // [16384, -32768] little endian
        let data = base64::engine::general_purpose::STANDARD.encode([0x00u8, 0x40, 0x00, 0x80]);
        let samples = decode_pcm16_base64(&data).unwrap();
        assert_eq!(samples.len(), 2);
        assert_abs_diff_eq!(samples[0], 0.5, epsilon = 0.0001);
        assert_abs_diff_eq!(samples[1], -1.0, epsilon = 0.0001);
    }

    #[test]
    fn test_decode_rejects_malformed_frames() {
        assert!(matches!(
            decode_pcm16_base64("invalid_base64!"),
            Err(DecodeError::Base64(_))
        ));
        assert!(matches!(decode_pcm16_base64(""), Err(DecodeError::Empty)));
        let odd = base64::engine::general_purpose::STANDARD.encode([0x00u8]);
        assert!(matches!(
            decode_pcm16_base64(&odd),
            Err(DecodeError::OddLength(1))
        ));
    }

    #[test]
    fn test_encode_matches_le_layout() {
        let encoded = encode_pcm16_base64(&[256, -256]);
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(encoded)
            .unwrap();
        assert_eq!(bytes, vec![0x00, 0x01, 0x00, 0xff]);
    }

    #[test]
    fn test_convert_f32_to_i16_clamps() {
        let result = convert_f32_to_i16(&[1.0, -1.0, 0.0, 2.0, -2.0]);
        assert_eq!(result, vec![i16::MAX, -32767, 0, i16::MAX, i16::MIN]);
    }
}
