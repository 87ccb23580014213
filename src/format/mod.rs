//! Sample formats, frame geometry and sample decoding.
//!
//! - [`SampleFormat`]: the closed set of formats a stream can be opened with
//! - [`FrameGeometry`]: sample and frame sizes derived at open time
//! - [`to_f32`] / [`to_i16`]: decode delivered byte buffers into samples

mod convert;
mod sample;

pub use convert::{f32_to_i16, i16_to_f32, to_f32, to_i16};
pub use sample::{DirectionGeometry, FrameGeometry, SampleFormat};
