//! The background polling thread.
//!
//! One poller runs per started stream. Each pass of its loop checks, under
//! the read lock, whether a halt was requested or the native stream went
//! inactive, then runs one poll iteration: query how many input frames are
//! available, read them, and hand them to the frame callback. Availability,
//! read and callback share a single read-lock scope so the callback sees a
//! consistent snapshot and may query the stream without deadlocking.

use std::ops::ControlFlow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use crate::callback::{FrameCallback, InputFrames, TerminateHook};
use crate::driver::NativeStream;
use crate::handle::Shared;
use crate::{StreamState, TerminationReason};

/// Deliveries between two statistics log lines.
const STATS_LOG_INTERVAL: u64 = 500;

/// Whether the `delivered`-th delivery (counted from 1) gets a stats line.
fn is_stats_due(delivered: u64) -> bool {
    delivered % STATS_LOG_INTERVAL == 0
}

pub(crate) struct Poller<S: NativeStream> {
    shared: Arc<Shared<S>>,
    on_frames: FrameCallback,
    on_terminate: Option<TerminateHook>,
    idle_backoff: Duration,
    /// Reused across iterations, grown to the largest read so far.
    scratch: Vec<u8>,
    sequence: u64,
}

impl<S: NativeStream> Poller<S> {
    pub fn new(
        shared: Arc<Shared<S>>,
        on_frames: FrameCallback,
        on_terminate: Option<TerminateHook>,
        idle_backoff: Duration,
    ) -> Self {
        Self {
            shared,
            on_frames,
            on_terminate,
            idle_backoff,
            scratch: Vec::new(),
            sequence: 0,
        }
    }

    /// Runs until the stream halts, then records why.
    pub fn run(mut self) {
        debug_assert!(
            self.shared.inner.read().state.is_polling(),
            "polling thread started on a stream that is not running"
        );
        tracing::debug!(
            frame_size = self.shared.geometry.input.frame_size,
            "polling thread started"
        );

        let reason = panic::catch_unwind(AssertUnwindSafe(|| self.poll_loop())).unwrap_or_else(|_| {
            tracing::warn!("frame callback panicked, terminating stream");
            TerminationReason::CallbackPanicked
        });

        self.finish(reason);
    }

    fn poll_loop(&mut self) -> TerminationReason {
        loop {
            if let Some(reason) = self.exit_condition() {
                return reason;
            }
            if let ControlFlow::Break(reason) = self.poll_once() {
                return reason;
            }
        }
    }

    /// Checks whether the loop must end. The lock covers exactly the check.
    fn exit_condition(&self) -> Option<TerminationReason> {
        let inner = self.shared.inner.read();
        match inner.state {
            StreamState::Stopping(mode) => return Some(TerminationReason::Requested(mode)),
            StreamState::Terminated(reason) => return Some(reason),
            StreamState::Opened | StreamState::Running => {}
        }
        match inner.stream.is_active() {
            Ok(true) => None,
            Ok(false) => Some(TerminationReason::StreamInactive),
            Err(e) => Some(TerminationReason::StatusFailed(e)),
        }
    }

    /// One poll iteration.
    fn poll_once(&mut self) -> ControlFlow<TerminationReason> {
        let counters = &self.shared.counters;
        counters.iterations.fetch_add(1, Ordering::SeqCst);

        let inner = self.shared.inner.read();
        let available = match inner.stream.read_available() {
            Ok(frames) => frames,
            Err(e) => {
                tracing::warn!(error = %e, "failed to query available frames");
                return ControlFlow::Break(TerminationReason::AvailabilityFailed(e));
            }
        };

        if available == 0 {
            drop(inner);
            counters.idle_iterations.fetch_add(1, Ordering::SeqCst);
            self.idle();
            return ControlFlow::Continue(());
        }

        let geometry = self.shared.geometry;
        let len = geometry.input.bytes_for(available);
        if self.scratch.len() < len {
            self.scratch.resize(len, 0);
        }
        let buffer = &mut self.scratch[..len];

        let status = inner.stream.read(buffer, available);
        let sequence = self.sequence;
        self.sequence += 1;

        (self.on_frames)(InputFrames {
            status,
            bytes: buffer,
            frame_count: available,
            frame_size: geometry.input.frame_size,
            format: geometry.format,
            sequence,
        });
        drop(inner);

        let delivered = counters.record_delivery(available, len) + 1;
        if is_stats_due(delivered) {
            tracing::debug!(
                deliveries = delivered,
                frames = counters.frames.load(Ordering::Relaxed),
                idle = counters.idle_iterations.load(Ordering::Relaxed),
                "poll statistics"
            );
        }

        match status {
            Ok(()) => ControlFlow::Continue(()),
            Err(e) => {
                tracing::warn!(error = %e, frames = available, "read failed");
                ControlFlow::Break(TerminationReason::ReadFailed(e))
            }
        }
    }

    fn idle(&self) {
        if self.idle_backoff.is_zero() {
            std::thread::yield_now();
        } else {
            std::thread::sleep(self.idle_backoff);
        }
    }

    /// Stores the terminal state, then runs the termination hook.
    fn finish(mut self, reason: TerminationReason) {
        {
            let mut inner = self.shared.inner.write();
            if reason.is_failure() {
                if let Err(e) = inner.stream.abort() {
                    tracing::warn!(error = %e, "failed to abort stream after {}", reason);
                }
            }
            inner.state = StreamState::Terminated(reason);
        }

        let stats = self.shared.counters.snapshot();
        tracing::info!(
            reason = %reason,
            deliveries = stats.deliveries,
            frames = stats.frames,
            "polling thread terminated"
        );

        if let Some(hook) = self.on_terminate.take() {
            if panic::catch_unwind(AssertUnwindSafe(|| hook(&reason))).is_err() {
                tracing::warn!("termination hook panicked");
            }
        }
    }
}
