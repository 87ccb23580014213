//! Native stream binding.
//!
//! The poller talks to the audio driver only through [`NativeStream`], a thin
//! synchronous interface over an open stream, and creates streams through a
//! [`Driver`]. Two bindings ship with the crate:
//!
//! - [`CpalDriver`]: default input/output devices via cpal
//! - [`MockDriver`]: a scriptable fake for tests and demos

mod cpal_backend;
pub mod devices;
mod mock;
mod ring;

pub use cpal_backend::{CpalDriver, CpalStream};
pub use mock::{MockDriver, MockStream};

use crate::format::{FrameGeometry, SampleFormat};
use crate::DriverError;

/// An open native audio stream.
///
/// Every method takes `&self`: implementations synchronize internally, and
/// callers guard access with the stream handle's lock. Dropping the value
/// closes the stream and releases its resources.
pub trait NativeStream: Send + Sync + 'static {
    /// Starts the stream.
    fn start(&self) -> Result<(), DriverError>;

    /// Stops the stream, letting pending output drain.
    fn stop(&self) -> Result<(), DriverError>;

    /// Stops the stream immediately, discarding pending buffers.
    fn abort(&self) -> Result<(), DriverError>;

    /// Returns `true` while the stream is started and processing audio.
    fn is_active(&self) -> Result<bool, DriverError>;

    /// Returns `true` once the stream is stopped (or was never started).
    fn is_stopped(&self) -> Result<bool, DriverError>;

    /// Number of input frames that can be read without blocking.
    fn read_available(&self) -> Result<usize, DriverError>;

    /// Reads exactly `frames` frames into `buffer`.
    ///
    /// `buffer` must be `frames * input_frame_size` bytes long. An error
    /// may still leave valid data in `buffer` (e.g. after an input overflow).
    fn read(&self, buffer: &mut [u8], frames: usize) -> Result<(), DriverError>;
}

/// Opens native streams.
pub trait Driver {
    /// The stream type this driver produces.
    type Stream: NativeStream;

    /// Opens a stream with the given parameters, not yet started.
    fn open(&self, params: &StreamParams) -> Result<Self::Stream, DriverError>;
}

/// Validated parameters for opening a stream on the default devices.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamParams {
    input_channels: u16,
    output_channels: u16,
    format: SampleFormat,
    sample_rate: f64,
    frames_per_buffer: u32,
}

impl StreamParams {
    /// Validates raw stream parameters.
    ///
    /// `frames_per_buffer == 0` leaves the buffer size to the driver.
    ///
    /// # Errors
    ///
    /// - `InvalidChannelCount` if a count is negative, too large, or both are zero
    /// - `InvalidSampleRate` if the rate is not a positive finite number
    pub fn new(
        input_channels: i32,
        output_channels: i32,
        format: SampleFormat,
        sample_rate: f64,
        frames_per_buffer: u32,
    ) -> Result<Self, DriverError> {
        let input_channels =
            u16::try_from(input_channels).map_err(|_| DriverError::InvalidChannelCount)?;
        let output_channels =
            u16::try_from(output_channels).map_err(|_| DriverError::InvalidChannelCount)?;
        if input_channels == 0 && output_channels == 0 {
            return Err(DriverError::InvalidChannelCount);
        }
        if !sample_rate.is_finite() || sample_rate <= 0.0 {
            return Err(DriverError::InvalidSampleRate);
        }

        Ok(Self {
            input_channels,
            output_channels,
            format,
            sample_rate,
            frames_per_buffer,
        })
    }

    /// Shorthand for an input-only stream.
    ///
    /// # Errors
    ///
    /// Same as [`StreamParams::new`].
    pub fn input(
        channels: i32,
        format: SampleFormat,
        sample_rate: f64,
        frames_per_buffer: u32,
    ) -> Result<Self, DriverError> {
        Self::new(channels, 0, format, sample_rate, frames_per_buffer)
    }

    /// Number of input channels (0 = no input).
    pub fn input_channels(&self) -> u16 {
        self.input_channels
    }

    /// Number of output channels (0 = no output).
    pub fn output_channels(&self) -> u16 {
        self.output_channels
    }

    /// Sample format for both directions.
    pub fn format(&self) -> SampleFormat {
        self.format
    }

    /// Sample rate in Hz.
    pub fn sample_rate(&self) -> f64 {
        self.sample_rate
    }

    /// Frames per driver buffer, `0` for unspecified.
    pub fn frames_per_buffer(&self) -> u32 {
        self.frames_per_buffer
    }

    /// Geometry derived from these parameters.
    pub fn geometry(&self) -> FrameGeometry {
        FrameGeometry::new(self.input_channels, self.output_channels, self.format)
    }
}
