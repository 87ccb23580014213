//! Sample format enumeration and frame geometry.

use std::fmt;
use std::str::FromStr;

use crate::DriverError;

/// Sample formats supported by the native driver.
///
/// Samples are interleaved and in native byte order. `Int24` samples are
/// packed into three bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SampleFormat {
    /// 32-bit IEEE float in `[-1.0, 1.0]`.
    Float32,
    /// Signed 32-bit integer.
    Int32,
    /// Signed 24-bit integer, packed.
    Int24,
    /// Signed 16-bit integer.
    Int16,
    /// Signed 8-bit integer.
    Int8,
    /// Unsigned 8-bit integer, silence at 128.
    UInt8,
}

impl SampleFormat {
    /// All formats, in driver order.
    pub const ALL: [SampleFormat; 6] = [
        Self::Float32,
        Self::Int32,
        Self::Int24,
        Self::Int16,
        Self::Int8,
        Self::UInt8,
    ];

    /// Size of one sample in bytes.
    #[must_use]
    pub fn sample_size(self) -> usize {
        match self {
            Self::Float32 | Self::Int32 => 4,
            Self::Int24 => 3,
            Self::Int16 => 2,
            Self::Int8 | Self::UInt8 => 1,
        }
    }

    /// Byte value that encodes silence in this format.
    #[must_use]
    pub fn silence_byte(self) -> u8 {
        match self {
            Self::UInt8 => 0x80,
            _ => 0,
        }
    }

    /// The format's name, e.g. `"int16"`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Float32 => "float32",
            Self::Int32 => "int32",
            Self::Int24 => "int24",
            Self::Int16 => "int16",
            Self::Int8 => "int8",
            Self::UInt8 => "uint8",
        }
    }
}

impl fmt::Display for SampleFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SampleFormat {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|format| format.as_str() == s)
            .ok_or(DriverError::SampleFormatNotSupported)
    }
}

/// Sample and frame size for one stream direction.
///
/// A direction with no channels has both sizes set to zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirectionGeometry {
    /// Number of interleaved channels.
    pub channels: u16,
    /// Bytes per sample.
    pub sample_size: usize,
    /// Bytes per frame (`sample_size * channels`).
    pub frame_size: usize,
}

impl DirectionGeometry {
    /// Computes the geometry for `channels` samples of `format` per frame.
    #[must_use]
    pub fn new(channels: u16, format: SampleFormat) -> Self {
        if channels == 0 {
            return Self::default();
        }
        let sample_size = format.sample_size();
        Self {
            channels,
            sample_size,
            frame_size: sample_size * usize::from(channels),
        }
    }

    /// Returns `true` if this direction carries no audio.
    #[must_use]
    pub fn is_absent(&self) -> bool {
        self.frame_size == 0
    }

    /// Bytes needed to hold `frames` frames.
    #[must_use]
    pub fn bytes_for(&self, frames: usize) -> usize {
        frames * self.frame_size
    }

    /// Whole frames contained in `bytes` bytes.
    #[must_use]
    pub fn frames_in(&self, bytes: usize) -> usize {
        if self.frame_size == 0 {
            return 0;
        }
        bytes / self.frame_size
    }
}

/// Frame geometry of an opened stream, fixed for its whole lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameGeometry {
    /// Sample format shared by both directions.
    pub format: SampleFormat,
    /// Input (capture) side.
    pub input: DirectionGeometry,
    /// Output (playback) side.
    pub output: DirectionGeometry,
}

impl FrameGeometry {
    /// Derives input and output geometry independently.
    #[must_use]
    pub fn new(input_channels: u16, output_channels: u16, format: SampleFormat) -> Self {
        Self {
            format,
            input: DirectionGeometry::new(input_channels, format),
            output: DirectionGeometry::new(output_channels, format),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_sizes() {
        assert_eq!(SampleFormat::Float32.sample_size(), 4);
        assert_eq!(SampleFormat::Int32.sample_size(), 4);
        assert_eq!(SampleFormat::Int24.sample_size(), 3);
        assert_eq!(SampleFormat::Int16.sample_size(), 2);
        assert_eq!(SampleFormat::Int8.sample_size(), 1);
        assert_eq!(SampleFormat::UInt8.sample_size(), 1);
    }

    #[test]
    fn test_format_names_parse_back() {
        for format in SampleFormat::ALL {
            assert_eq!(format.as_str().parse::<SampleFormat>(), Ok(format));
        }
        assert_eq!(
            "float64".parse::<SampleFormat>(),
            Err(DriverError::SampleFormatNotSupported)
        );
    }

    #[test]
    fn test_stereo_int16_geometry() {
        let geometry = FrameGeometry::new(2, 0, SampleFormat::Int16);
        assert_eq!(geometry.input.sample_size, 2);
        assert_eq!(geometry.input.frame_size, 4);
        assert_eq!(geometry.input.bytes_for(128), 512);
        assert!(geometry.output.is_absent());
        assert_eq!(geometry.output.sample_size, 0);
        assert_eq!(geometry.output.frame_size, 0);
    }

    #[test]
    fn test_directions_are_independent() {
        let geometry = FrameGeometry::new(1, 6, SampleFormat::Int24);
        assert_eq!(geometry.input.frame_size, 3);
        assert_eq!(geometry.output.frame_size, 18);
    }

    #[test]
    fn test_frames_in() {
        let geometry = DirectionGeometry::new(2, SampleFormat::Float32);
        assert_eq!(geometry.frames_in(80), 10);
        assert_eq!(geometry.frames_in(83), 10);
        assert_eq!(DirectionGeometry::default().frames_in(80), 0);
    }

    #[test]
    fn test_silence_byte() {
        assert_eq!(SampleFormat::UInt8.silence_byte(), 0x80);
        assert_eq!(SampleFormat::Int16.silence_byte(), 0);
    }
}
