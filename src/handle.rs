//! Stream handle lifecycle.
//!
//! A stream moves through three owned types:
//!
//! 1. [`StreamHandle`]: opened, no thread. Can be started or deallocated.
//! 2. [`RunningStream`]: started, polling thread alive. Can be stopped,
//!    aborted and waited on. Dropping it aborts the stream and joins the thread.
//! 3. [`TerminatedStream`]: thread joined. Exposes the termination reason and
//!    can be deallocated.
//!
//! `start` consumes the opened handle, so a handle cannot be started twice,
//! and only types without a live thread offer `dealloc`.

use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use parking_lot::RwLock;

use crate::callback::CallbackRegistration;
use crate::config::PollConfig;
use crate::driver::{CpalDriver, CpalStream, Driver, NativeStream, StreamParams};
use crate::format::{FrameGeometry, SampleFormat};
use crate::poller::Poller;
use crate::state::PollCounters;
use crate::{DriverError, PollStats, StartError, StopMode, StreamState, TerminationReason};

/// State guarded by the handle's lock.
pub(crate) struct Inner<S> {
    pub stream: S,
    pub state: StreamState,
}

/// Everything the handle types and the polling thread share.
pub(crate) struct Shared<S> {
    pub inner: RwLock<Inner<S>>,
    /// Fixed at open, read without the lock.
    pub geometry: FrameGeometry,
    pub counters: PollCounters,
}

impl<S: NativeStream> Shared<S> {
    fn state(&self) -> StreamState {
        self.inner.read().state
    }

    fn is_active(&self) -> Result<bool, DriverError> {
        self.inner.read().stream.is_active()
    }

    fn is_stopped(&self) -> Result<bool, DriverError> {
        self.inner.read().stream.is_stopped()
    }

    /// Undoes a start whose polling thread could not be spawned.
    ///
    /// The native stream is aborted and the state goes back to `Opened`.
    fn roll_back_start(&self, spawn_error: &std::io::Error) -> DriverError {
        tracing::error!("failed to spawn polling thread: {}", spawn_error);
        let mut inner = self.inner.write();
        if let Err(e) = inner.stream.abort() {
            tracing::warn!(error = %e, "failed to abort stream after spawn failure");
        }
        inner.state = StreamState::Opened;
        DriverError::InsufficientMemory
    }

    /// Aborts the native stream unless it already reports itself stopped.
    fn abort_if_running(&self) {
        let inner = self.inner.read();
        if inner.stream.is_stopped() == Ok(true) {
            return;
        }
        match inner.stream.abort() {
            Ok(()) => tracing::debug!("aborted native stream on dealloc"),
            Err(e) => tracing::warn!(error = %e, "defensive abort failed"),
        }
    }
}

/// Releases the native stream: defensive abort, then drop.
fn release<S: NativeStream>(shared: Arc<Shared<S>>) {
    shared.abort_if_running();
    drop(shared);
    tracing::debug!("stream handle deallocated");
}

/// An opened stream with no polling thread.
///
/// # Example
///
/// ```
/// use polled_stream::{CallbackRegistration, MockDriver, SampleFormat, StreamHandle, StreamParams};
///
/// let driver = MockDriver::new().with_available(128);
/// let params = StreamParams::input(2, SampleFormat::Int16, 44100.0, 256)?;
/// let handle = StreamHandle::open(&driver, &params)?;
///
/// let running = handle
///     .start(CallbackRegistration::new(|frames| assert_eq!(frames.bytes.len(), 512)))
///     .map_err(|e| e.error())?;
///
/// running.abort()?;
/// let terminated = running.wait_for_termination();
/// terminated.dealloc();
/// # Ok::<(), polled_stream::DriverError>(())
/// ```
#[must_use = "an opened stream does nothing until started"]
pub struct StreamHandle<S: NativeStream> {
    shared: Arc<Shared<S>>,
    poll_config: PollConfig,
}

impl StreamHandle<CpalStream> {
    /// Opens a stream on the default cpal devices.
    ///
    /// # Errors
    ///
    /// Returns the driver's configuration error, e.g. `InvalidChannelCount`
    /// for a negative channel count or `DeviceUnavailable`.
    pub fn open_default(
        input_channels: i32,
        output_channels: i32,
        format: SampleFormat,
        sample_rate: f64,
        frames_per_buffer: u32,
    ) -> Result<Self, DriverError> {
        let params = StreamParams::new(
            input_channels,
            output_channels,
            format,
            sample_rate,
            frames_per_buffer,
        )?;
        Self::open(&CpalDriver::new(), &params)
    }
}

impl<S: NativeStream> StreamHandle<S> {
    /// Opens a native stream through `driver`.
    ///
    /// # Errors
    ///
    /// Returns whatever the driver reports; nothing is allocated on failure.
    pub fn open<D>(driver: &D, params: &StreamParams) -> Result<Self, DriverError>
    where
        D: Driver<Stream = S>,
    {
        let stream = driver.open(params)?;
        let geometry = params.geometry();

        tracing::info!(
            input_channels = params.input_channels(),
            output_channels = params.output_channels(),
            format = %params.format(),
            sample_rate = params.sample_rate(),
            input_frame_size = geometry.input.frame_size,
            "stream opened"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                inner: RwLock::new(Inner {
                    stream,
                    state: StreamState::Opened,
                }),
                geometry,
                counters: PollCounters::default(),
            }),
            poll_config: PollConfig::default(),
        })
    }

    /// Sets the polling thread configuration.
    pub fn with_poll_config(mut self, config: PollConfig) -> Self {
        self.poll_config = config;
        self
    }

    /// Returns the polling thread configuration.
    pub fn poll_config(&self) -> &PollConfig {
        &self.poll_config
    }

    /// Starts the native stream and spawns the polling thread.
    ///
    /// # Errors
    ///
    /// If the driver refuses to start, no thread is spawned and the handle
    /// comes back inside the [`StartError`], still opened.
    ///
    /// The handle is consumed, so a second start does not compile:
    ///
    /// ```compile_fail
    /// use polled_stream::{CallbackRegistration, MockDriver, SampleFormat, StreamHandle, StreamParams};
    ///
    /// let driver = MockDriver::new();
    /// let params = StreamParams::input(1, SampleFormat::Int16, 44100.0, 0).unwrap();
    /// let handle = StreamHandle::open(&driver, &params).unwrap();
    /// let first = handle.start(CallbackRegistration::new(|_| {}));
    /// let second = handle.start(CallbackRegistration::new(|_| {}));
    /// ```
    pub fn start(self, registration: CallbackRegistration) -> Result<RunningStream<S>, StartError<S>> {
        {
            let mut inner = self.shared.inner.write();
            debug_assert_eq!(inner.state, StreamState::Opened);
            if let Err(error) = inner.stream.start() {
                drop(inner);
                tracing::warn!(error = %error, "native stream refused to start");
                return Err(StartError {
                    handle: self,
                    error,
                });
            }
            inner.state = StreamState::Running;
        }

        let (on_frames, on_terminate) = registration.into_parts();
        let poller = Poller::new(
            Arc::clone(&self.shared),
            on_frames,
            on_terminate,
            self.poll_config.idle_backoff,
        );

        let spawned = std::thread::Builder::new()
            .name(self.poll_config.thread_name.clone())
            .spawn(move || poller.run());

        match spawned {
            Ok(thread) => {
                tracing::info!(thread = %self.poll_config.thread_name, "stream started");
                Ok(RunningStream {
                    shared: self.shared,
                    thread: Some(thread),
                })
            }
            Err(e) => {
                let error = self.shared.roll_back_start(&e);
                Err(StartError {
                    handle: self,
                    error,
                })
            }
        }
    }

    /// Releases the native stream without ever starting it.
    pub fn dealloc(self) {
        release(self.shared);
    }

    /// Frame geometry, fixed since open.
    pub fn geometry(&self) -> FrameGeometry {
        self.shared.geometry
    }

    /// Current lifecycle state (always `Opened` for this type).
    pub fn state(&self) -> StreamState {
        self.shared.state()
    }

    /// Asks the native stream whether it is active.
    pub fn is_active(&self) -> Result<bool, DriverError> {
        self.shared.is_active()
    }

    /// Asks the native stream whether it is stopped.
    pub fn is_stopped(&self) -> Result<bool, DriverError> {
        self.shared.is_stopped()
    }

    /// Poll statistics (all zero before start).
    pub fn stats(&self) -> PollStats {
        self.shared.counters.snapshot()
    }

    /// A status handle that can be moved into the frame callback.
    pub fn status(&self) -> StreamStatus<S> {
        StreamStatus::new(&self.shared)
    }
}

impl<S: NativeStream> std::fmt::Debug for StreamHandle<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamHandle")
            .field("geometry", &self.shared.geometry)
            .field("poll_config", &self.poll_config)
            .finish_non_exhaustive()
    }
}

/// A started stream with a live polling thread.
///
/// Dropping a `RunningStream` aborts the stream and waits for the thread.
/// Prefer [`stop`](Self::stop) or [`abort`](Self::abort) followed by
/// [`wait_for_termination`](Self::wait_for_termination).
///
/// `stop` and `abort` take the write lock, so they must not be called from
/// inside the frame callback.
#[must_use = "dropping a running stream aborts it"]
pub struct RunningStream<S: NativeStream> {
    shared: Arc<Shared<S>>,
    thread: Option<JoinHandle<()>>,
}

impl<S: NativeStream> RunningStream<S> {
    /// Requests a graceful halt.
    ///
    /// Returns once the request is issued; the polling thread exits at its
    /// next check.
    ///
    /// # Errors
    ///
    /// `StreamIsStopped` if a halt was already requested or the thread has
    /// already ended, otherwise the driver's stop error (the halt request
    /// stands either way).
    pub fn stop(&self) -> Result<(), DriverError> {
        self.halt(StopMode::Stop)
    }

    /// Requests an immediate halt, discarding pending buffers.
    ///
    /// # Errors
    ///
    /// Same as [`stop`](Self::stop).
    pub fn abort(&self) -> Result<(), DriverError> {
        self.halt(StopMode::Abort)
    }

    fn halt(&self, mode: StopMode) -> Result<(), DriverError> {
        let mut inner = self.shared.inner.write();
        if inner.state.is_halting() {
            return Err(DriverError::StreamIsStopped);
        }
        inner.state = StreamState::Stopping(mode);

        let result = match mode {
            StopMode::Stop => inner.stream.stop(),
            StopMode::Abort => inner.stream.abort(),
        };
        tracing::debug!(mode = %mode, ?result, "halt requested");
        result
    }

    /// Blocks until the polling thread has exited.
    pub fn wait_for_termination(mut self) -> TerminatedStream<S> {
        self.join();
        let reason = self
            .shared
            .state()
            .termination()
            .unwrap_or(TerminationReason::CallbackPanicked);

        TerminatedStream {
            shared: Arc::clone(&self.shared),
            reason,
        }
    }

    fn join(&mut self) {
        let Some(thread) = self.thread.take() else {
            return;
        };
        if thread.join().is_err() {
            tracing::warn!("polling thread panicked");
        }

        // A thread that died before recording its end still counts as terminated
        let mut inner = self.shared.inner.write();
        if inner.state.termination().is_none() {
            if let Err(e) = inner.stream.abort() {
                tracing::warn!(error = %e, "failed to abort stream after thread panic");
            }
            inner.state = StreamState::Terminated(TerminationReason::CallbackPanicked);
        }
    }

    /// Frame geometry, fixed since open.
    pub fn geometry(&self) -> FrameGeometry {
        self.shared.geometry
    }

    /// Current lifecycle state.
    pub fn state(&self) -> StreamState {
        self.shared.state()
    }

    /// Asks the native stream whether it is active.
    pub fn is_active(&self) -> Result<bool, DriverError> {
        self.shared.is_active()
    }

    /// Asks the native stream whether it is stopped.
    pub fn is_stopped(&self) -> Result<bool, DriverError> {
        self.shared.is_stopped()
    }

    /// Poll statistics so far.
    pub fn stats(&self) -> PollStats {
        self.shared.counters.snapshot()
    }

    /// A status handle for use from other threads or the callback.
    pub fn status(&self) -> StreamStatus<S> {
        StreamStatus::new(&self.shared)
    }
}

impl<S: NativeStream> Drop for RunningStream<S> {
    fn drop(&mut self) {
        if self.thread.is_none() {
            return;
        }
        match self.halt(StopMode::Abort) {
            Ok(()) | Err(DriverError::StreamIsStopped) => {}
            Err(e) => tracing::warn!(error = %e, "abort on drop failed"),
        }
        self.join();
    }
}

impl<S: NativeStream> std::fmt::Debug for RunningStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunningStream")
            .field("state", &self.shared.state())
            .field("geometry", &self.shared.geometry)
            .finish_non_exhaustive()
    }
}

/// A stream whose polling thread has exited.
#[must_use = "call dealloc to release the native stream"]
pub struct TerminatedStream<S: NativeStream> {
    shared: Arc<Shared<S>>,
    reason: TerminationReason,
}

impl<S: NativeStream> TerminatedStream<S> {
    /// Why the polling thread ended.
    pub fn reason(&self) -> TerminationReason {
        self.reason
    }

    /// Aborts the native stream if it is still running, then releases it.
    pub fn dealloc(self) {
        release(self.shared);
    }

    /// Frame geometry, fixed since open.
    pub fn geometry(&self) -> FrameGeometry {
        self.shared.geometry
    }

    /// Lifecycle state (always `Terminated` for this type).
    pub fn state(&self) -> StreamState {
        self.shared.state()
    }

    /// Asks the native stream whether it is active.
    pub fn is_active(&self) -> Result<bool, DriverError> {
        self.shared.is_active()
    }

    /// Asks the native stream whether it is stopped.
    pub fn is_stopped(&self) -> Result<bool, DriverError> {
        self.shared.is_stopped()
    }

    /// Final poll statistics.
    pub fn stats(&self) -> PollStats {
        self.shared.counters.snapshot()
    }

    /// A status handle for use from other threads.
    pub fn status(&self) -> StreamStatus<S> {
        StreamStatus::new(&self.shared)
    }
}

impl<S: NativeStream> std::fmt::Debug for TerminatedStream<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TerminatedStream")
            .field("reason", &self.reason)
            .field("geometry", &self.shared.geometry)
            .finish_non_exhaustive()
    }
}

/// Read-only view of a stream, safe to use from inside the frame callback.
///
/// Holds a weak reference: once the stream is deallocated every query
/// returns `BadStreamPtr` or `None`. Queries use recursive read locking, so
/// they do not deadlock against the polling thread's own read lock even
/// while a writer is waiting.
pub struct StreamStatus<S: NativeStream> {
    shared: Weak<Shared<S>>,
}

impl<S: NativeStream> StreamStatus<S> {
    fn new(shared: &Arc<Shared<S>>) -> Self {
        Self {
            shared: Arc::downgrade(shared),
        }
    }

    fn upgrade(&self) -> Result<Arc<Shared<S>>, DriverError> {
        self.shared.upgrade().ok_or(DriverError::BadStreamPtr)
    }

    /// Current lifecycle state, `None` once deallocated.
    pub fn state(&self) -> Option<StreamState> {
        let shared = self.shared.upgrade()?;
        let state = shared.inner.read_recursive().state;
        Some(state)
    }

    /// Asks the native stream whether it is active.
    ///
    /// # Errors
    ///
    /// `BadStreamPtr` once deallocated, otherwise the driver's error.
    pub fn is_active(&self) -> Result<bool, DriverError> {
        let shared = self.upgrade()?;
        let active = shared.inner.read_recursive().stream.is_active();
        active
    }

    /// Asks the native stream whether it is stopped.
    ///
    /// # Errors
    ///
    /// `BadStreamPtr` once deallocated, otherwise the driver's error.
    pub fn is_stopped(&self) -> Result<bool, DriverError> {
        let shared = self.upgrade()?;
        let stopped = shared.inner.read_recursive().stream.is_stopped();
        stopped
    }

    /// Poll statistics, `None` once deallocated.
    pub fn stats(&self) -> Option<PollStats> {
        self.shared
            .upgrade()
            .map(|shared| shared.counters.snapshot())
    }

    /// Frame geometry, `None` once deallocated.
    pub fn geometry(&self) -> Option<FrameGeometry> {
        self.shared.upgrade().map(|shared| shared.geometry)
    }
}

impl<S: NativeStream> Clone for StreamStatus<S> {
    fn clone(&self) -> Self {
        Self {
            shared: Weak::clone(&self.shared),
        }
    }
}

impl<S: NativeStream> std::fmt::Debug for StreamStatus<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamStatus")
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::{MockDriver, MockStream};

    fn open(driver: &MockDriver) -> StreamHandle<MockStream> {
        let params = StreamParams::input(2, SampleFormat::Int16, 44100.0, 256).unwrap();
        StreamHandle::open(driver, &params).unwrap()
    }

    fn ignore_frames() -> CallbackRegistration {
        CallbackRegistration::new(|_| {})
    }

    #[test]
    fn test_open_computes_geometry() {
        let driver = MockDriver::new();
        let handle = open(&driver);
        assert_eq!(handle.geometry().input.frame_size, 4);
        assert!(handle.geometry().output.is_absent());
        assert_eq!(handle.state(), StreamState::Opened);
        assert_eq!(handle.is_stopped(), Ok(true));
    }

    #[test]
    fn test_open_failure_allocates_nothing() {
        let driver = MockDriver::new().fail_open(DriverError::DeviceUnavailable);
        let params = StreamParams::input(1, SampleFormat::Int16, 44100.0, 0).unwrap();
        let result = StreamHandle::open(&driver, &params);
        assert_eq!(result.err(), Some(DriverError::DeviceUnavailable));
        assert_eq!(driver.opened(), 0);
    }

    #[test]
    fn test_start_failure_returns_handle() {
        let driver = MockDriver::new().fail_start(DriverError::DeviceUnavailable);
        let handle = open(&driver);

        let err = handle.start(ignore_frames()).unwrap_err();
        assert_eq!(err.error(), DriverError::DeviceUnavailable);

        let handle = err.into_handle();
        assert_eq!(handle.state(), StreamState::Opened);
        assert_eq!(driver.starts(), 0);

        // Retry once the device is back
        driver.clear_start_failure();
        let running = handle.start(ignore_frames()).unwrap();
        running.stop().unwrap();
        running.wait_for_termination().dealloc();
        assert!(driver.all_closed());
    }

    #[test]
    fn test_spawn_failure_rolls_back_to_opened() {
        let driver = MockDriver::new();
        let handle = open(&driver);
        {
            let mut inner = handle.shared.inner.write();
            inner.stream.start().unwrap();
            inner.state = StreamState::Running;
        }

        let spawn_error = std::io::Error::new(std::io::ErrorKind::OutOfMemory, "no threads left");
        let error = handle.shared.roll_back_start(&spawn_error);
        assert_eq!(error, DriverError::InsufficientMemory);
        assert_eq!(handle.state(), StreamState::Opened);
        assert_eq!(driver.aborts(), 1);
        assert_eq!(handle.is_stopped(), Ok(true));

        // The rolled-back handle starts normally
        let running = handle.start(ignore_frames()).unwrap();
        running.stop().unwrap();
        running.wait_for_termination().dealloc();
        assert!(driver.all_closed());
    }

    #[test]
    fn test_spawn_rollback_survives_abort_failure() {
        let driver = MockDriver::new();
        let handle = open(&driver);
        handle.shared.inner.write().state = StreamState::Running;
        driver.fail_abort(DriverError::InternalError);

        let spawn_error = std::io::Error::new(std::io::ErrorKind::OutOfMemory, "no threads left");
        assert_eq!(
            handle.shared.roll_back_start(&spawn_error),
            DriverError::InsufficientMemory
        );
        assert_eq!(handle.state(), StreamState::Opened);
        handle.dealloc();
        assert!(driver.all_closed());
    }

    #[test]
    fn test_second_halt_is_rejected() {
        let driver = MockDriver::new();
        let running = open(&driver).start(ignore_frames()).unwrap();

        running.stop().unwrap();
        assert_eq!(running.abort(), Err(DriverError::StreamIsStopped));
        assert_eq!(running.stop(), Err(DriverError::StreamIsStopped));
        assert_eq!(driver.stops(), 1);
        assert_eq!(driver.aborts(), 0);

        let terminated = running.wait_for_termination();
        assert_eq!(
            terminated.reason(),
            TerminationReason::Requested(StopMode::Stop)
        );
        terminated.dealloc();
    }

    #[test]
    fn test_drop_aborts_and_joins() {
        let driver = MockDriver::new().with_available(16);
        let running = open(&driver).start(ignore_frames()).unwrap();
        let status = running.status();

        drop(running);
        assert_eq!(driver.aborts(), 1);
        assert!(!driver.is_active());
        // Stream is released with the last strong reference
        assert_eq!(status.state(), None);
        assert_eq!(status.is_active(), Err(DriverError::BadStreamPtr));
        assert!(driver.all_closed());
    }

    #[test]
    fn test_dealloc_never_started() {
        let driver = MockDriver::new();
        let handle = open(&driver);
        handle.dealloc();
        assert_eq!(driver.aborts(), 0);
        assert!(driver.all_closed());
    }

    #[test]
    fn test_status_after_dealloc() {
        let driver = MockDriver::new();
        let handle = open(&driver);
        let status = handle.status();
        assert_eq!(status.state(), Some(StreamState::Opened));
        assert_eq!(status.geometry().map(|g| g.input.frame_size), Some(4));

        handle.dealloc();
        assert_eq!(status.stats(), None);
        assert_eq!(status.is_stopped(), Err(DriverError::BadStreamPtr));
    }
}
