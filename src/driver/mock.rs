//! Mock driver for testing without hardware.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use super::{Driver, NativeStream, StreamParams};
use crate::format::FrameGeometry;
use crate::DriverError;

/// What the mock reports and how it fails.
#[derive(Debug, Default)]
struct Script {
    availability: VecDeque<Result<usize, DriverError>>,
    default_available: usize,
    fail_open: Option<DriverError>,
    fail_start: Option<DriverError>,
    fail_read: Option<DriverError>,
    fail_status: Option<DriverError>,
    fail_stop: Option<DriverError>,
    fail_abort: Option<DriverError>,
    deactivate_after_reads: Option<u64>,
}

#[derive(Debug, Default)]
struct MockShared {
    script: Mutex<Script>,
    active: AtomicBool,
    opened: AtomicU64,
    closed: AtomicU64,
    starts: AtomicU64,
    stops: AtomicU64,
    aborts: AtomicU64,
    availability_queries: AtomicU64,
    reads: AtomicU64,
}

/// A scriptable native driver that produces synthetic input.
///
/// Every stream opened from a `MockDriver` (or any of its clones) shares the
/// driver's script and counters, so a test can keep a clone and inspect what
/// the stream handle did after handing the driver over.
///
/// Availability is served from a script queue first and falls back to a
/// constant once the queue is empty. Read data is a deterministic byte
/// pattern: byte `i` of the `n`-th frame read is `(n + i) as u8`.
///
/// # Example
///
/// ```
/// use polled_stream::{Driver, DriverError, MockDriver, NativeStream, SampleFormat, StreamParams};
///
/// let driver = MockDriver::new()
///     .with_available(128)
///     .script_available([Ok(64), Err(DriverError::InternalError)]);
///
/// let params = StreamParams::input(2, SampleFormat::Int16, 44100.0, 256)?;
/// let stream = driver.open(&params)?;
/// stream.start()?;
///
/// assert_eq!(stream.read_available(), Ok(64));
/// assert_eq!(stream.read_available(), Err(DriverError::InternalError));
/// assert_eq!(stream.read_available(), Ok(128));
/// # Ok::<(), DriverError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct MockDriver {
    shared: Arc<MockShared>,
}

impl MockDriver {
    /// Creates a mock driver that never reports available frames.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reports `frames` available whenever the script queue is empty.
    #[must_use]
    pub fn with_available(self, frames: usize) -> Self {
        self.shared.script.lock().default_available = frames;
        self
    }

    /// Appends availability results to the script queue.
    #[must_use]
    pub fn script_available(
        self,
        results: impl IntoIterator<Item = Result<usize, DriverError>>,
    ) -> Self {
        self.shared.script.lock().availability.extend(results);
        self
    }

    /// Makes every `open` fail with `err`.
    #[must_use]
    pub fn fail_open(self, err: DriverError) -> Self {
        self.shared.script.lock().fail_open = Some(err);
        self
    }

    /// Makes every `start` fail with `err`.
    #[must_use]
    pub fn fail_start(self, err: DriverError) -> Self {
        self.shared.script.lock().fail_start = Some(err);
        self
    }

    /// Makes the stream report itself inactive after `reads` reads.
    #[must_use]
    pub fn deactivate_after_reads(self, reads: u64) -> Self {
        self.shared.script.lock().deactivate_after_reads = Some(reads);
        self
    }

    /// Queues an availability result at runtime.
    pub fn push_available(&self, result: Result<usize, DriverError>) {
        self.shared.script.lock().availability.push_back(result);
    }

    /// Changes the constant availability at runtime.
    pub fn set_available(&self, frames: usize) {
        self.shared.script.lock().default_available = frames;
    }

    /// Makes the next `read` fail with `err`, after filling the buffer.
    pub fn fail_next_read(&self, err: DriverError) {
        self.shared.script.lock().fail_read = Some(err);
    }

    /// Makes `is_active` and `is_stopped` fail with `err` until cleared.
    pub fn fail_status(&self, err: DriverError) {
        self.shared.script.lock().fail_status = Some(err);
    }

    /// Makes status queries succeed again.
    pub fn clear_status_failure(&self) {
        self.shared.script.lock().fail_status = None;
    }

    /// Makes every `stop` fail with `err`. The stream keeps running.
    pub fn fail_stop(&self, err: DriverError) {
        self.shared.script.lock().fail_stop = Some(err);
    }

    /// Makes every `abort` fail with `err`. The stream keeps running.
    pub fn fail_abort(&self, err: DriverError) {
        self.shared.script.lock().fail_abort = Some(err);
    }

    /// Makes `start` succeed again.
    pub fn clear_start_failure(&self) {
        self.shared.script.lock().fail_start = None;
    }

    /// Number of streams successfully opened.
    pub fn opened(&self) -> u64 {
        self.shared.opened.load(Ordering::SeqCst)
    }

    /// Number of streams closed (dropped).
    pub fn closed(&self) -> u64 {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Number of successful `start` calls.
    pub fn starts(&self) -> u64 {
        self.shared.starts.load(Ordering::SeqCst)
    }

    /// Number of `stop` calls.
    pub fn stops(&self) -> u64 {
        self.shared.stops.load(Ordering::SeqCst)
    }

    /// Number of `abort` calls.
    pub fn aborts(&self) -> u64 {
        self.shared.aborts.load(Ordering::SeqCst)
    }

    /// Number of `read_available` calls.
    pub fn availability_queries(&self) -> u64 {
        self.shared.availability_queries.load(Ordering::SeqCst)
    }

    /// Number of `read` calls.
    pub fn reads(&self) -> u64 {
        self.shared.reads.load(Ordering::SeqCst)
    }

    /// Whether the last opened stream is started.
    pub fn is_active(&self) -> bool {
        self.shared.active.load(Ordering::SeqCst)
    }

    /// Whether every opened stream has been closed.
    pub fn all_closed(&self) -> bool {
        self.opened() == self.closed()
    }
}

impl Driver for MockDriver {
    type Stream = MockStream;

    fn open(&self, params: &StreamParams) -> Result<MockStream, DriverError> {
        if let Some(err) = self.shared.script.lock().fail_open {
            return Err(err);
        }
        self.shared.opened.fetch_add(1, Ordering::SeqCst);
        self.shared.active.store(false, Ordering::SeqCst);

        Ok(MockStream {
            shared: Arc::clone(&self.shared),
            geometry: params.geometry(),
            frames_read: AtomicU64::new(0),
        })
    }
}

/// A stream opened by [`MockDriver`].
#[derive(Debug)]
pub struct MockStream {
    shared: Arc<MockShared>,
    geometry: FrameGeometry,
    frames_read: AtomicU64,
}

impl MockStream {
    fn check_status(&self) -> Result<(), DriverError> {
        match self.shared.script.lock().fail_status {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn fill(&self, buffer: &mut [u8], frames: usize) {
        let frame_size = self.geometry.input.frame_size;
        let first = self.frames_read.fetch_add(frames as u64, Ordering::SeqCst);

        for (n, frame) in buffer.chunks_exact_mut(frame_size).enumerate() {
            let seed = first.wrapping_add(n as u64);
            for (i, byte) in frame.iter_mut().enumerate() {
                *byte = seed.wrapping_add(i as u64) as u8;
            }
        }
    }
}

impl NativeStream for MockStream {
    fn start(&self) -> Result<(), DriverError> {
        if let Some(err) = self.shared.script.lock().fail_start {
            return Err(err);
        }
        self.shared.starts.fetch_add(1, Ordering::SeqCst);
        self.shared.active.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn stop(&self) -> Result<(), DriverError> {
        self.shared.stops.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.shared.script.lock().fail_stop {
            return Err(err);
        }
        self.shared.active.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn abort(&self) -> Result<(), DriverError> {
        self.shared.aborts.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.shared.script.lock().fail_abort {
            return Err(err);
        }
        self.shared.active.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_active(&self) -> Result<bool, DriverError> {
        self.check_status()?;
        Ok(self.shared.active.load(Ordering::SeqCst))
    }

    fn is_stopped(&self) -> Result<bool, DriverError> {
        self.check_status()?;
        Ok(!self.shared.active.load(Ordering::SeqCst))
    }

    fn read_available(&self) -> Result<usize, DriverError> {
        if self.geometry.input.is_absent() {
            return Err(DriverError::CanNotReadFromAnOutputOnlyStream);
        }
        self.shared
            .availability_queries
            .fetch_add(1, Ordering::SeqCst);

        let mut script = self.shared.script.lock();
        script
            .availability
            .pop_front()
            .unwrap_or(Ok(script.default_available))
    }

    fn read(&self, buffer: &mut [u8], frames: usize) -> Result<(), DriverError> {
        if self.geometry.input.is_absent() {
            return Err(DriverError::CanNotReadFromAnOutputOnlyStream);
        }
        if buffer.len() != self.geometry.input.bytes_for(frames) {
            return Err(DriverError::BadBufferPtr);
        }

        self.fill(buffer, frames);
        let reads = self.shared.reads.fetch_add(1, Ordering::SeqCst) + 1;

        let mut script = self.shared.script.lock();
        if script.deactivate_after_reads.is_some_and(|limit| reads >= limit) {
            self.shared.active.store(false, Ordering::SeqCst);
        }
        match script.fail_read.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl Drop for MockStream {
    fn drop(&mut self) {
        self.shared.active.store(false, Ordering::SeqCst);
        self.shared.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::SampleFormat;

    fn stereo_int16() -> StreamParams {
        StreamParams::input(2, SampleFormat::Int16, 44100.0, 256).unwrap()
    }

    #[test]
    fn test_open_and_close_counts() {
        let driver = MockDriver::new();
        let stream = driver.open(&stereo_int16()).unwrap();
        assert_eq!(driver.opened(), 1);
        assert_eq!(driver.closed(), 0);

        drop(stream);
        assert_eq!(driver.closed(), 1);
        assert!(driver.all_closed());
    }

    #[test]
    fn test_fail_open() {
        let driver = MockDriver::new().fail_open(DriverError::DeviceUnavailable);
        let result = driver.open(&stereo_int16());
        assert_eq!(result.err(), Some(DriverError::DeviceUnavailable));
        assert_eq!(driver.opened(), 0);
    }

    #[test]
    fn test_start_stop_abort() {
        let driver = MockDriver::new();
        let stream = driver.open(&stereo_int16()).unwrap();
        assert_eq!(stream.is_stopped(), Ok(true));

        stream.start().unwrap();
        assert_eq!(stream.is_active(), Ok(true));
        assert!(driver.is_active());

        stream.stop().unwrap();
        assert_eq!(stream.is_stopped(), Ok(true));
        stream.abort().unwrap();
        assert_eq!((driver.stops(), driver.aborts()), (1, 1));
    }

    #[test]
    fn test_fail_start() {
        let driver = MockDriver::new().fail_start(DriverError::DeviceUnavailable);
        let stream = driver.open(&stereo_int16()).unwrap();
        assert_eq!(stream.start(), Err(DriverError::DeviceUnavailable));
        assert_eq!(stream.is_active(), Ok(false));

        driver.clear_start_failure();
        assert_eq!(stream.start(), Ok(()));
    }

    #[test]
    fn test_status_and_halt_failures() {
        let driver = MockDriver::new();
        let stream = driver.open(&stereo_int16()).unwrap();
        stream.start().unwrap();

        driver.fail_status(DriverError::DeviceUnavailable);
        assert_eq!(stream.is_active(), Err(DriverError::DeviceUnavailable));
        assert_eq!(stream.is_stopped(), Err(DriverError::DeviceUnavailable));
        driver.clear_status_failure();
        assert_eq!(stream.is_active(), Ok(true));

        driver.fail_stop(DriverError::InternalError);
        driver.fail_abort(DriverError::TimedOut);
        assert_eq!(stream.stop(), Err(DriverError::InternalError));
        assert_eq!(stream.abort(), Err(DriverError::TimedOut));
        // Failed halts are still counted and leave the stream running
        assert_eq!((driver.stops(), driver.aborts()), (1, 1));
        assert!(driver.is_active());
    }

    #[test]
    fn test_scripted_availability_then_default() {
        let driver = MockDriver::new()
            .with_available(10)
            .script_available([Ok(1), Err(DriverError::InternalError)]);
        let stream = driver.open(&stereo_int16()).unwrap();

        assert_eq!(stream.read_available(), Ok(1));
        assert_eq!(stream.read_available(), Err(DriverError::InternalError));
        assert_eq!(stream.read_available(), Ok(10));
        assert_eq!(driver.availability_queries(), 3);
    }

    #[test]
    fn test_read_pattern() {
        let driver = MockDriver::new();
        let stream = driver.open(&stereo_int16()).unwrap();

        let mut buffer = vec![0u8; 8];
        stream.read(&mut buffer, 2).unwrap();
        assert_eq!(buffer, vec![0, 1, 2, 3, 1, 2, 3, 4]);

        stream.read(&mut buffer[..4], 1).unwrap();
        assert_eq!(&buffer[..4], &[2, 3, 4, 5]);
    }

    #[test]
    fn test_read_wrong_length() {
        let driver = MockDriver::new();
        let stream = driver.open(&stereo_int16()).unwrap();
        let mut buffer = vec![0u8; 7];
        assert_eq!(stream.read(&mut buffer, 2), Err(DriverError::BadBufferPtr));
    }

    #[test]
    fn test_one_shot_read_error() {
        let driver = MockDriver::new();
        let stream = driver.open(&stereo_int16()).unwrap();
        driver.fail_next_read(DriverError::InputOverflowed);

        let mut buffer = vec![0u8; 4];
        assert_eq!(stream.read(&mut buffer, 1), Err(DriverError::InputOverflowed));
        assert_eq!(stream.read(&mut buffer, 1), Ok(()));
    }

    #[test]
    fn test_deactivate_after_reads() {
        let driver = MockDriver::new().deactivate_after_reads(2);
        let stream = driver.open(&stereo_int16()).unwrap();
        stream.start().unwrap();

        let mut buffer = vec![0u8; 4];
        stream.read(&mut buffer, 1).unwrap();
        assert_eq!(stream.is_active(), Ok(true));
        stream.read(&mut buffer, 1).unwrap();
        assert_eq!(stream.is_active(), Ok(false));
    }

    #[test]
    fn test_output_only_cannot_read() {
        let driver = MockDriver::new();
        let params = StreamParams::new(0, 2, SampleFormat::Float32, 48000.0, 0).unwrap();
        let stream = driver.open(&params).unwrap();
        assert_eq!(
            stream.read_available(),
            Err(DriverError::CanNotReadFromAnOutputOnlyStream)
        );
    }
}
