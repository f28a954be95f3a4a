//! PCM16LE conversion helpers shared by capture and playback.

/// RMS below this reads as silence in the first-frame diagnostic.
pub const SILENCE_RMS: f32 = 1.0e-4;

/// Convert normalized f32 samples to signed 16-bit little-endian bytes.
/// Samples are clamped to [-1.0, 1.0], scaled by 32768 with symmetric
/// normalization, then clamped to the signed-16 range.
pub fn f32_to_pcm16le(samples: &[f32], out: &mut Vec<u8>) {
    out.reserve(samples.len() * 2);
    for &sample in samples {
        let scaled = (sample.clamp(-1.0, 1.0) * 32768.0)
            .clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        out.extend_from_slice(&scaled.to_le_bytes());
    }
}

/// Decode PCM16LE bytes to normalized f32 samples. The byte count must
/// already be even; callers trim odd buffers first.
pub fn pcm16le_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect()
}

pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum: f32 = samples.iter().map(|s| s * s).sum();
    (sum / samples.len() as f32).sqrt()
}

pub fn is_near_silence(rms: f32) -> bool {
    rms < SILENCE_RMS
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(samples: &[f32]) -> Vec<u8> {
        let mut out = Vec::new();
        f32_to_pcm16le(samples, &mut out);
        out
    }

    #[test]
    fn full_scale_maps_to_i16_limits() {
        let bytes = encode(&[1.0, -1.0]);
        assert_eq!(
            bytes,
            [i16::MAX.to_le_bytes(), i16::MIN.to_le_bytes()].concat()
        );
    }

    #[test]
    fn out_of_range_samples_clamp() {
        assert_eq!(encode(&[2.5]), encode(&[1.0]));
        assert_eq!(encode(&[-7.0]), encode(&[-1.0]));
    }

    #[test]
    fn symmetric_scaling() {
        let bytes = encode(&[0.5, -0.5]);
        let samples = pcm16le_to_f32(&bytes);
        assert_eq!(samples[0], 16384.0 / 32768.0);
        assert_eq!(samples[1], -0.5);
    }

    #[test]
    fn round_trip_is_close() {
        let original = [0.0f32, 0.25, -0.25, 0.9, -0.9];
        let decoded = pcm16le_to_f32(&encode(&original));
        for (a, b) in original.iter().zip(decoded.iter()) {
            assert!((a - b).abs() < 1.0 / 32768.0 + f32::EPSILON, "{a} vs {b}");
        }
    }

    #[test]
    fn little_endian_layout() {
        let bytes = encode(&[1.0]);
        // 0x7FFF little-endian.
        assert_eq!(bytes, vec![0xFF, 0x7F]);
    }

    #[test]
    fn rms_of_silence_is_silent() {
        assert!(is_near_silence(rms(&[0.0; 256])));
        assert!(is_near_silence(rms(&[])));
        assert!(!is_near_silence(rms(&[0.5; 256])));
    }
}
