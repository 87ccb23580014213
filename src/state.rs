//! Stream lifecycle state and poll statistics.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::DriverError;

/// How a halt was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StopMode {
    /// Graceful stop, the driver may drain pending buffers.
    Stop,
    /// Immediate stop, pending buffers are discarded.
    Abort,
}

impl fmt::Display for StopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Stop => f.write_str("stop"),
            Self::Abort => f.write_str("abort"),
        }
    }
}

/// Why the polling thread ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TerminationReason {
    /// A caller asked for the halt.
    Requested(StopMode),
    /// The native stream stopped being active on its own.
    StreamInactive,
    /// The driver could not report how many frames are available.
    ///
    /// The native stream is aborted and the callback is not invoked.
    AvailabilityFailed(DriverError),
    /// A read failed; the callback saw the error as its status.
    ReadFailed(DriverError),
    /// The driver could not report whether the stream is active.
    StatusFailed(DriverError),
    /// The frame callback panicked.
    CallbackPanicked,
}

impl TerminationReason {
    /// Returns `true` unless the termination was requested or the stream
    /// simply finished.
    #[must_use]
    pub fn is_failure(&self) -> bool {
        !matches!(self, Self::Requested(_) | Self::StreamInactive)
    }

    /// The driver error behind a failed termination, if any.
    #[must_use]
    pub fn driver_error(&self) -> Option<DriverError> {
        match self {
            Self::AvailabilityFailed(e) | Self::ReadFailed(e) | Self::StatusFailed(e) => Some(*e),
            _ => None,
        }
    }
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested(mode) => write!(f, "{mode} requested"),
            Self::StreamInactive => f.write_str("stream became inactive"),
            Self::AvailabilityFailed(e) => write!(f, "frame availability query failed: {e}"),
            Self::ReadFailed(e) => write!(f, "read failed: {e}"),
            Self::StatusFailed(e) => write!(f, "status query failed: {e}"),
            Self::CallbackPanicked => f.write_str("callback panicked"),
        }
    }
}

/// Lifecycle of a stream handle.
///
/// `Opened → Running → Stopping → Terminated`, with a direct
/// `Running → Terminated` edge when the driver fails or the stream goes
/// inactive on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    /// Native stream configured, no thread.
    Opened,
    /// Native stream started, polling thread alive.
    Running,
    /// A halt was requested; the thread exits at its next check.
    Stopping(StopMode),
    /// The polling thread has left its loop.
    Terminated(TerminationReason),
}

impl StreamState {
    /// Returns `true` while the polling loop may still deliver frames.
    #[must_use]
    pub fn is_polling(&self) -> bool {
        matches!(self, Self::Running | Self::Stopping(_))
    }

    /// Returns `true` once a halt was requested or the thread has ended.
    #[must_use]
    pub fn is_halting(&self) -> bool {
        matches!(self, Self::Stopping(_) | Self::Terminated(_))
    }

    /// The termination reason, once terminated.
    #[must_use]
    pub fn termination(&self) -> Option<TerminationReason> {
        match self {
            Self::Terminated(reason) => Some(*reason),
            _ => None,
        }
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Opened => f.write_str("opened"),
            Self::Running => f.write_str("running"),
            Self::Stopping(mode) => write!(f, "stopping ({mode})"),
            Self::Terminated(reason) => write!(f, "terminated ({reason})"),
        }
    }
}

/// Snapshot of what the polling thread has done so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PollStats {
    /// Loop iterations run.
    pub iterations: u64,
    /// Iterations that found no frames.
    pub idle_iterations: u64,
    /// Callback invocations.
    pub deliveries: u64,
    /// Frames delivered.
    pub frames: u64,
    /// Bytes delivered.
    pub bytes: u64,
}

/// Counters shared between the polling thread and the handle.
#[derive(Debug, Default)]
pub(crate) struct PollCounters {
    pub iterations: AtomicU64,
    pub idle_iterations: AtomicU64,
    pub deliveries: AtomicU64,
    pub frames: AtomicU64,
    pub bytes: AtomicU64,
}

impl PollCounters {
    pub fn snapshot(&self) -> PollStats {
        PollStats {
            iterations: self.iterations.load(Ordering::SeqCst),
            idle_iterations: self.idle_iterations.load(Ordering::SeqCst),
            deliveries: self.deliveries.load(Ordering::SeqCst),
            frames: self.frames.load(Ordering::SeqCst),
            bytes: self.bytes.load(Ordering::SeqCst),
        }
    }

    /// Records one delivery, returning the number of deliveries before it.
    pub fn record_delivery(&self, frames: usize, bytes: usize) -> u64 {
        self.frames.fetch_add(frames as u64, Ordering::SeqCst);
        self.bytes.fetch_add(bytes as u64, Ordering::SeqCst);
        self.deliveries.fetch_add(1, Ordering::SeqCst)
    }
}
