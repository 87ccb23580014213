//! Decoding of delivered byte buffers into samples.
//!
//! Buffers handed to callbacks are raw interleaved frames in native byte
//! order. These helpers turn them into `f32` or `i16` samples for consumers.

use super::SampleFormat;

/// Converts an f32 sample to i16.
///
/// Input should be in the range [-1.0, 1.0]; values outside are clamped.
/// Uses × 32767 for symmetric scaling.
#[inline]
pub fn f32_to_i16(sample: f32) -> i16 {
    (sample * 32767.0).clamp(-32768.0, 32767.0) as i16
}

/// Converts an i16 sample to f32 in [-1.0, 1.0].
#[inline]
pub fn i16_to_f32(sample: i16) -> f32 {
    f32::from(sample) / 32768.0
}

#[inline]
fn int24_from_ne_bytes(bytes: [u8; 3]) -> i32 {
    let widened = if cfg!(target_endian = "little") {
        [bytes[0], bytes[1], bytes[2], 0]
    } else {
        [0, bytes[0], bytes[1], bytes[2]]
    };
    // Shift into the top three bytes and back to sign-extend
    if cfg!(target_endian = "little") {
        i32::from_le_bytes(widened) << 8 >> 8
    } else {
        i32::from_be_bytes(widened) << 8 >> 8
    }
}

/// Decodes `bytes` as samples of `format`, normalized to [-1.0, 1.0].
///
/// Trailing bytes that do not form a whole sample are ignored.
pub fn to_f32(bytes: &[u8], format: SampleFormat) -> Vec<f32> {
    let size = format.sample_size();
    bytes
        .chunks_exact(size)
        .map(|s| match format {
            SampleFormat::Float32 => f32::from_ne_bytes([s[0], s[1], s[2], s[3]]),
            SampleFormat::Int32 => {
                (f64::from(i32::from_ne_bytes([s[0], s[1], s[2], s[3]])) / 2_147_483_648.0) as f32
            }
            SampleFormat::Int24 => int24_from_ne_bytes([s[0], s[1], s[2]]) as f32 / 8_388_608.0,
            SampleFormat::Int16 => i16_to_f32(i16::from_ne_bytes([s[0], s[1]])),
            SampleFormat::Int8 => f32::from(s[0] as i8) / 128.0,
            SampleFormat::UInt8 => (f32::from(s[0]) - 128.0) / 128.0,
        })
        .collect()
}

/// Decodes `bytes` as samples of `format`, converted to 16-bit.
///
/// Wider integer formats keep their top 16 bits; narrower ones are scaled up.
pub fn to_i16(bytes: &[u8], format: SampleFormat) -> Vec<i16> {
    let size = format.sample_size();
    bytes
        .chunks_exact(size)
        .map(|s| match format {
            SampleFormat::Float32 => f32_to_i16(f32::from_ne_bytes([s[0], s[1], s[2], s[3]])),
            SampleFormat::Int32 => (i32::from_ne_bytes([s[0], s[1], s[2], s[3]]) >> 16) as i16,
            SampleFormat::Int24 => (int24_from_ne_bytes([s[0], s[1], s[2]]) >> 8) as i16,
            SampleFormat::Int16 => i16::from_ne_bytes([s[0], s[1]]),
            SampleFormat::Int8 => i16::from(s[0] as i8) << 8,
            SampleFormat::UInt8 => (i16::from(s[0]) - 128) << 8,
        })
        .collect()
}
