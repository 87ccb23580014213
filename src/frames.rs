//! Owned frame buffers and channel events.

use std::sync::Arc;

use crate::format::{self, SampleFormat};
use crate::{DriverError, TerminationReason};

/// An owned copy of one delivery from the polling thread.
///
/// Bytes are stored in an `Arc<Vec<u8>>` so clones share the data.
///
/// # Example
///
/// ```
/// use polled_stream::{CapturedFrames, SampleFormat};
///
/// let frames = CapturedFrames::new(Ok(()), vec![0u8; 512], 4, SampleFormat::Int16, 0);
/// assert_eq!(frames.frame_count(), 128);
/// assert_eq!(frames.to_i16().len(), 256);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedFrames {
    /// Driver status of the read that produced these bytes.
    pub status: Result<(), DriverError>,

    /// Interleaved input frames in native byte order.
    pub bytes: Arc<Vec<u8>>,

    /// Bytes per input frame.
    pub frame_size: usize,

    /// Sample format of `bytes`.
    pub format: SampleFormat,

    /// Delivery number, starting at 0.
    pub sequence: u64,
}

impl CapturedFrames {
    /// Creates a captured buffer.
    pub fn new(
        status: Result<(), DriverError>,
        bytes: Vec<u8>,
        frame_size: usize,
        format: SampleFormat,
        sequence: u64,
    ) -> Self {
        Self {
            status,
            bytes: Arc::new(bytes),
            frame_size,
            format,
            sequence,
        }
    }

    /// Returns the number of whole frames.
    pub fn frame_count(&self) -> usize {
        if self.frame_size == 0 {
            return 0;
        }
        self.bytes.len() / self.frame_size
    }

    /// Returns `true` if no bytes were captured.
    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Decodes the samples as `f32` in [-1.0, 1.0].
    pub fn to_f32(&self) -> Vec<f32> {
        format::to_f32(&self.bytes, self.format)
    }

    /// Decodes the samples as `i16`.
    pub fn to_i16(&self) -> Vec<i16> {
        format::to_i16(&self.bytes, self.format)
    }
}

/// An item received from [`frame_channel`](crate::frame_channel).
#[derive(Debug, Clone, PartialEq)]
pub enum FrameEvent {
    /// Frames read by the polling thread.
    Frames(CapturedFrames),
    /// The polling thread ended. Always the last event before the channel closes.
    Terminated(TerminationReason),
}
