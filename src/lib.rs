//! # polled-stream
//!
//! **Note:** This crate is under active development. The API may change before 1.0.
//!
//! Native audio stream handles with a background polling thread.
//!
//! `polled-stream` opens a stream on an audio driver, starts it, and runs one
//! dedicated thread that keeps pulling available input frames and hands them
//! to a registered callback. The driver's own realtime thread never runs
//! consumer code and never blocks.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use polled_stream::{frame_channel, FrameEvent, SampleFormat, StreamHandle};
//!
//! # async fn run() -> Result<(), polled_stream::DriverError> {
//! // 2 input channels, no output, 16-bit, 44.1kHz, 256 frames per buffer
//! let handle = StreamHandle::open_default(2, 0, SampleFormat::Int16, 44100.0, 256)?;
//!
//! let (registration, mut rx) = frame_channel();
//! let running = handle.start(registration)?;
//!
//! while let Some(event) = rx.recv().await {
//!     match event {
//!         FrameEvent::Frames(frames) => {
//!             // Send to a transcriber, a file, a meter...
//!             let _samples = frames.to_i16();
//!         }
//!         FrameEvent::Terminated(reason) => tracing::warn!(%reason, "stream ended"),
//!     }
//! #   break;
//! }
//!
//! running.stop()?;
//! running.wait_for_termination().dealloc();
//! # Ok(())
//! # }
//! ```
//!
//! ## Architecture
//!
//! The crate keeps a strict thread boundary:
//!
//! - **Driver thread**: cpal's audio callback pushes whole frames into a
//!   lock-free ring buffer and never blocks
//! - **Polling thread**: one per started stream; reads what is available and
//!   invokes the callback under the stream's read lock
//! - **Caller threads**: start, stop, abort and status queries, serialized
//!   against the poller by a reader/writer lock
//!
//! Lifecycle is encoded in types: [`StreamHandle`] (opened) →
//! [`RunningStream`] (thread alive) → [`TerminatedStream`] (thread joined).
//! Starting twice or deallocating a running stream does not compile.

#![warn(missing_docs)]
// Audio code requires intentional numeric casts between sample formats
#![allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_possible_wrap,
    clippy::cast_lossless
)]
// unwrap/expect allowed in tests only
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used))]
// These doc lints are too strict for internal implementation details
#![allow(clippy::missing_panics_doc, clippy::missing_errors_doc)]

mod callback;
mod config;
pub mod driver;
mod error;
pub mod format;
mod frames;
mod handle;
mod poller;
mod state;

pub use callback::{frame_channel, CallbackRegistration, InputFrames};
pub use config::{DriverConfig, PollConfig};
pub use driver::{
    CpalDriver, CpalStream, Driver, MockDriver, MockStream, NativeStream, StreamParams,
};
pub use error::{DriverError, StartError};
pub use format::{FrameGeometry, SampleFormat};
pub use frames::{CapturedFrames, FrameEvent};
pub use handle::{RunningStream, StreamHandle, StreamStatus, TerminatedStream};
pub use state::{PollStats, StopMode, StreamState, TerminationReason};
