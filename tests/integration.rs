//! Integration tests for polled-stream.
//!
//! Everything here runs against `MockDriver`. Tests that require actual audio
//! hardware are marked with `#[ignore]` and should be run manually.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use polled_stream::{
    frame_channel, CallbackRegistration, DriverError, FrameEvent, MockDriver, MockStream,
    PollConfig, SampleFormat, StopMode, StreamHandle, StreamParams, StreamState,
    TerminationReason,
};

const TIMEOUT: Duration = Duration::from_secs(5);

fn open(driver: &MockDriver, channels: i32, format: SampleFormat) -> StreamHandle<MockStream> {
    let params = StreamParams::input(channels, format, 44100.0, 256).unwrap();
    StreamHandle::open(driver, &params).unwrap()
}

fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + TIMEOUT;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(1));
    }
    condition()
}

/// Counts callback invocations.
fn counting_registration() -> (CallbackRegistration, Arc<AtomicU64>) {
    let count = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&count);
    let registration = CallbackRegistration::new(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });
    (registration, count)
}

// Scenario A: 128 frames of stereo int16 arrive as one 512-byte buffer
#[test]
fn test_delivers_stereo_int16_buffer() {
    let driver = MockDriver::new().with_available(128);
    let handle = open(&driver, 2, SampleFormat::Int16);

    let (tx, rx) = crossbeam_channel::unbounded();
    let running = handle
        .start(CallbackRegistration::new(move |frames| {
            let _ = tx.send((frames.bytes.len(), frames.frame_count, frames.status));
        }))
        .unwrap();

    let (len, frame_count, status) = rx.recv_timeout(TIMEOUT).unwrap();
    assert_eq!(len, 128 * 2 * 2);
    assert_eq!(frame_count, 128);
    assert_eq!(status, Ok(()));

    running.stop().unwrap();
    running.wait_for_termination().dealloc();
    assert!(driver.all_closed());
}

// Scenario B: a negative channel count is rejected before the driver is touched
#[test]
fn test_negative_channel_count_is_rejected() {
    let driver = MockDriver::new();
    let result = StreamParams::new(-1, 0, SampleFormat::Int16, 44100.0, 256);
    assert_eq!(result, Err(DriverError::InvalidChannelCount));
    assert_eq!(driver.opened(), 0);

    let result = StreamHandle::open_default(-1, 0, SampleFormat::Int16, 44100.0, 256);
    assert_eq!(result.err(), Some(DriverError::InvalidChannelCount));
}

// Scenario C: abort right after start, then nothing more is delivered
#[test]
fn test_abort_immediately() {
    let driver = MockDriver::new().with_available(4);
    let (registration, count) = counting_registration();
    let running = open(&driver, 1, SampleFormat::Float32)
        .start(registration)
        .unwrap();

    running.abort().unwrap();
    let terminated = running.wait_for_termination();

    assert_eq!(terminated.reason(), TerminationReason::Requested(StopMode::Abort));
    assert_eq!(terminated.is_stopped(), Ok(true));
    assert_eq!(driver.aborts(), 1);

    let delivered = count.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(count.load(Ordering::SeqCst), delivered);
    assert_eq!(terminated.stats().deliveries, delivered);

    terminated.dealloc();
    assert!(driver.all_closed());
}

// Scenario D: failed availability on the second poll ends the stream
#[test]
fn test_availability_failure_terminates() {
    let driver = MockDriver::new()
        .with_available(16)
        .script_available([Ok(128), Err(DriverError::InternalError)]);
    let (registration, count) = counting_registration();
    let running = open(&driver, 2, SampleFormat::Int16)
        .start(registration)
        .unwrap();

    assert!(wait_until(|| running.state().termination().is_some()));
    let terminated = running.wait_for_termination();

    assert_eq!(
        terminated.reason(),
        TerminationReason::AvailabilityFailed(DriverError::InternalError)
    );
    assert_eq!(count.load(Ordering::SeqCst), 1);
    assert_eq!(terminated.is_active(), Ok(false));
    // Explicitly aborted by the poller
    assert_eq!(driver.aborts(), 1);

    terminated.dealloc();
    assert!(driver.all_closed());
}

// Property: at most one polling thread per handle
#[test]
fn test_single_polling_thread() {
    let driver = MockDriver::new().with_available(8);
    let threads = Arc::new(Mutex::new(HashSet::new()));
    let seen = Arc::clone(&threads);

    let running = open(&driver, 1, SampleFormat::Int16)
        .start(CallbackRegistration::new(move |_| {
            seen.lock().insert(std::thread::current().id());
        }))
        .unwrap();

    assert!(wait_until(|| running.stats().deliveries >= 50));
    running.stop().unwrap();
    running.wait_for_termination().dealloc();

    assert_eq!(threads.lock().len(), 1);
    assert_eq!(driver.starts(), 1);
}

// Property: the loop exits within one iteration of a stop request
#[test]
fn test_stop_is_observed_promptly() {
    let driver = MockDriver::new();
    let running = open(&driver, 2, SampleFormat::Int16)
        .start(CallbackRegistration::new(|_| panic!("no frames were ever available")))
        .unwrap();

    assert!(wait_until(|| running.stats().iterations >= 100));

    running.stop().unwrap();
    let at_stop = running.stats().iterations;
    let started = Instant::now();
    let terminated = running.wait_for_termination();

    assert!(started.elapsed() < TIMEOUT);
    assert!(terminated.stats().iterations - at_stop <= 1);
    assert_eq!(terminated.stats().deliveries, 0);
    assert_eq!(terminated.reason(), TerminationReason::Requested(StopMode::Stop));
    terminated.dealloc();
}

// Property: the frame callback never runs once the stream is terminated
#[test]
fn test_no_delivery_after_termination() {
    let driver = MockDriver::new().with_available(8);
    let handle = open(&driver, 2, SampleFormat::Int16);
    let status = handle.status();

    let late = Arc::new(AtomicBool::new(false));
    let late_flag = Arc::clone(&late);
    let count = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&count);
    let at_hook = Arc::new(AtomicU64::new(u64::MAX));
    let hook_count = Arc::clone(&count);
    let hook_seen = Arc::clone(&at_hook);

    let registration = CallbackRegistration::new(move |_| {
        if matches!(status.state(), Some(StreamState::Terminated(_))) {
            late_flag.store(true, Ordering::SeqCst);
        }
        counter.fetch_add(1, Ordering::SeqCst);
    })
    .on_terminate(move |_| {
        hook_seen.store(hook_count.load(Ordering::SeqCst), Ordering::SeqCst);
    });

    let running = handle.start(registration).unwrap();
    assert!(wait_until(|| count.load(Ordering::SeqCst) >= 20));

    let stopper = std::thread::spawn(move || {
        running.abort().unwrap();
        running
    });
    let terminated = stopper.join().unwrap().wait_for_termination();

    let final_count = count.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(count.load(Ordering::SeqCst), final_count);
    assert_eq!(at_hook.load(Ordering::SeqCst), final_count);
    assert!(!late.load(Ordering::SeqCst));
    terminated.dealloc();
}

// Property: every buffer is a whole number of frames
#[test]
fn test_buffers_are_frame_aligned() {
    for (channels, format) in [
        (2, SampleFormat::Int16),
        (3, SampleFormat::Int24),
        (1, SampleFormat::UInt8),
        (6, SampleFormat::Float32),
    ] {
        let driver = MockDriver::new()
            .script_available([Ok(1), Ok(7), Ok(0), Ok(13), Ok(128)])
            .deactivate_after_reads(4);
        let handle = open(&driver, channels, format);
        let frame_size = handle.geometry().input.frame_size;
        assert_eq!(frame_size, channels as usize * format.sample_size());

        let lengths = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&lengths);
        let running = handle
            .start(CallbackRegistration::new(move |frames| {
                seen.lock()
                    .push((frames.bytes.len(), frames.frame_count, frames.frame_size));
            }))
            .unwrap();

        let terminated = running.wait_for_termination();
        assert_eq!(terminated.reason(), TerminationReason::StreamInactive);

        let lengths = lengths.lock();
        assert_eq!(lengths.len(), 4);
        for &(len, frame_count, size) in lengths.iter() {
            assert_eq!(size, frame_size);
            assert_eq!(len % frame_size, 0);
            assert_eq!(len, frame_count * frame_size);
        }
        terminated.dealloc();
    }
}

// Property: dealloc releases the native stream exactly once
#[test]
fn test_dealloc_releases_stream() {
    let driver = MockDriver::new().with_available(2);

    // Never started
    open(&driver, 1, SampleFormat::Int16).dealloc();
    assert_eq!((driver.opened(), driver.closed()), (1, 1));

    // Started, stopped, joined
    let running = open(&driver, 1, SampleFormat::Int16)
        .start(CallbackRegistration::new(|_| {}))
        .unwrap();
    running.stop().unwrap();
    running.wait_for_termination().dealloc();
    assert_eq!((driver.opened(), driver.closed()), (2, 2));
    assert!(!driver.is_active());

    // Open failure leaves nothing behind
    let failing = MockDriver::new().fail_open(DriverError::DeviceUnavailable);
    let params = StreamParams::input(1, SampleFormat::Int16, 44100.0, 0).unwrap();
    assert!(StreamHandle::open(&failing, &params).is_err());
    assert_eq!((failing.opened(), failing.closed()), (0, 0));
}

#[test]
fn test_read_error_is_delivered_then_terminates() {
    let driver = MockDriver::new().with_available(4);
    driver.fail_next_read(DriverError::InputOverflowed);

    let statuses = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&statuses);
    let running = open(&driver, 1, SampleFormat::Int16)
        .start(CallbackRegistration::new(move |frames| {
            seen.lock().push(frames.status);
        }))
        .unwrap();

    let terminated = running.wait_for_termination();
    assert_eq!(
        terminated.reason(),
        TerminationReason::ReadFailed(DriverError::InputOverflowed)
    );
    // The failing read is still delivered
    assert_eq!(*statuses.lock(), vec![Err(DriverError::InputOverflowed)]);
    assert_eq!(terminated.is_stopped(), Ok(true));

    terminated.dealloc();
    assert!(driver.all_closed());
}

#[test]
fn test_start_failure_spawns_nothing() {
    let driver = MockDriver::new().fail_start(DriverError::DeviceUnavailable);
    let (registration, count) = counting_registration();

    let err = open(&driver, 2, SampleFormat::Int16)
        .start(registration)
        .unwrap_err();
    assert_eq!(err.error(), DriverError::DeviceUnavailable);

    let (handle, error) = err.into_parts();
    assert_eq!(error, DriverError::DeviceUnavailable);
    assert_eq!(handle.state(), StreamState::Opened);
    assert_eq!(handle.stats().iterations, 0);
    assert_eq!(count.load(Ordering::SeqCst), 0);
    handle.dealloc();
    assert!(driver.all_closed());
}

#[test]
fn test_status_failure_terminates_and_aborts() {
    let driver = MockDriver::new().with_available(4);
    let handle = open(&driver, 1, SampleFormat::Int16);

    // Status errors surface from the opened handle too
    driver.fail_status(DriverError::DeviceUnavailable);
    assert_eq!(handle.is_stopped(), Err(DriverError::DeviceUnavailable));
    assert_eq!(handle.is_active(), Err(DriverError::DeviceUnavailable));
    driver.clear_status_failure();

    let (registration, count) = counting_registration();
    let running = handle.start(registration).unwrap();
    assert!(wait_until(|| count.load(Ordering::SeqCst) >= 3));

    driver.fail_status(DriverError::DeviceUnavailable);
    assert_eq!(running.is_stopped(), Err(DriverError::DeviceUnavailable));

    let terminated = running.wait_for_termination();
    assert_eq!(
        terminated.reason(),
        TerminationReason::StatusFailed(DriverError::DeviceUnavailable)
    );
    // The poller aborted the stream it could no longer query
    assert_eq!(driver.aborts(), 1);
    assert!(!driver.is_active());
    assert_eq!(terminated.is_stopped(), Err(DriverError::DeviceUnavailable));

    // Still unconfirmed as stopped, so dealloc aborts again
    terminated.dealloc();
    assert_eq!(driver.aborts(), 2);
    assert!(driver.all_closed());
}

#[test]
fn test_failed_driver_stop_still_halts() {
    let driver = MockDriver::new().with_available(4);
    driver.fail_stop(DriverError::InternalError);
    let running = open(&driver, 1, SampleFormat::Int16)
        .start(CallbackRegistration::new(|_| {}))
        .unwrap();

    assert_eq!(running.stop(), Err(DriverError::InternalError));
    assert!(matches!(
        running.state(),
        StreamState::Stopping(StopMode::Stop)
            | StreamState::Terminated(TerminationReason::Requested(StopMode::Stop))
    ));
    assert_eq!(running.abort(), Err(DriverError::StreamIsStopped));

    let terminated = running.wait_for_termination();
    assert_eq!(
        terminated.reason(),
        TerminationReason::Requested(StopMode::Stop)
    );
    assert_eq!(driver.stops(), 1);
    assert_eq!(driver.aborts(), 0);

    // The driver never stopped, so dealloc aborts it
    assert_eq!(terminated.is_stopped(), Ok(false));
    terminated.dealloc();
    assert_eq!(driver.aborts(), 1);
    assert!(driver.all_closed());
}

#[test]
fn test_dealloc_releases_stream_when_abort_fails() {
    let driver = MockDriver::new().with_available(4);
    driver.fail_abort(DriverError::TimedOut);
    let running = open(&driver, 1, SampleFormat::Int16)
        .start(CallbackRegistration::new(|_| {}))
        .unwrap();

    assert_eq!(running.abort(), Err(DriverError::TimedOut));
    let terminated = running.wait_for_termination();
    assert_eq!(
        terminated.reason(),
        TerminationReason::Requested(StopMode::Abort)
    );
    assert!(driver.is_active());

    terminated.dealloc();
    assert_eq!(driver.aborts(), 2);
    assert!(driver.all_closed());
}

#[test]
fn test_callback_panic_terminates_stream() {
    let driver = MockDriver::new().with_available(4);
    let running = open(&driver, 1, SampleFormat::Int16)
        .start(CallbackRegistration::new(|_| panic!("consumer bug")))
        .unwrap();

    let terminated = running.wait_for_termination();
    assert_eq!(terminated.reason(), TerminationReason::CallbackPanicked);
    assert_eq!(terminated.is_active(), Ok(false));
    assert_eq!(driver.aborts(), 1);
    terminated.dealloc();
}

#[test]
fn test_output_only_stream_ends_on_first_poll() {
    let driver = MockDriver::new();
    let params = StreamParams::new(0, 2, SampleFormat::Float32, 48000.0, 0).unwrap();
    let handle = StreamHandle::open(&driver, &params).unwrap();
    assert!(handle.geometry().input.is_absent());

    let terminated = handle
        .start(CallbackRegistration::new(|_| {}))
        .unwrap()
        .wait_for_termination();
    assert_eq!(
        terminated.reason(),
        TerminationReason::AvailabilityFailed(DriverError::CanNotReadFromAnOutputOnlyStream)
    );
    terminated.dealloc();
}

#[test]
fn test_status_queries_from_callback_while_stopping() {
    let driver = MockDriver::new().with_available(1);
    let handle = open(&driver, 1, SampleFormat::Int16);
    let status = handle.status();

    let running = handle
        .start(CallbackRegistration::new(move |_| {
            // A writer may be queued behind our read lock here
            std::thread::sleep(Duration::from_millis(1));
            let _ = status.is_active();
            let _ = status.is_stopped();
        }))
        .unwrap();

    assert!(wait_until(|| running.stats().deliveries >= 5));
    running.stop().unwrap();
    let terminated = running.wait_for_termination();
    assert_eq!(terminated.reason(), TerminationReason::Requested(StopMode::Stop));
    terminated.dealloc();
}

#[test]
fn test_custom_poll_config() {
    let driver = MockDriver::new().with_available(2).deactivate_after_reads(3);
    let names = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&names);

    let config = PollConfig {
        idle_backoff: Duration::from_millis(1),
        thread_name: "test-poller".to_string(),
    };
    let running = open(&driver, 1, SampleFormat::Int8)
        .with_poll_config(config)
        .start(CallbackRegistration::new(move |_| {
            seen.lock()
                .push(std::thread::current().name().map(str::to_string));
        }))
        .unwrap();

    running.wait_for_termination().dealloc();
    let names = names.lock();
    assert_eq!(names.len(), 3);
    assert!(names.iter().all(|n| n.as_deref() == Some("test-poller")));
}

#[test]
fn test_drop_running_stream_joins_thread() {
    let driver = MockDriver::new().with_available(8);
    let (registration, count) = counting_registration();
    let running = open(&driver, 2, SampleFormat::Int16)
        .start(registration)
        .unwrap();
    assert!(wait_until(|| count.load(Ordering::SeqCst) > 0));

    drop(running);
    let after_drop = count.load(Ordering::SeqCst);
    std::thread::sleep(Duration::from_millis(20));
    assert_eq!(count.load(Ordering::SeqCst), after_drop);
    assert!(driver.all_closed());
}

#[tokio::test]
async fn test_frame_channel_delivers_then_closes() {
    let driver = MockDriver::new().with_available(32).deactivate_after_reads(5);
    let handle = open(&driver, 2, SampleFormat::Int16);

    let (registration, mut rx) = frame_channel();
    let running = handle.start(registration).unwrap();

    let mut sequences = Vec::new();
    let mut terminated_with = None;
    while let Some(event) = tokio::time::timeout(TIMEOUT, rx.recv()).await.unwrap() {
        match event {
            FrameEvent::Frames(frames) => {
                assert_eq!(frames.bytes.len(), 32 * 4);
                assert_eq!(frames.frame_count(), 32);
                assert_eq!(frames.to_i16().len(), 64);
                sequences.push(frames.sequence);
            }
            FrameEvent::Terminated(reason) => terminated_with = Some(reason),
        }
    }

    assert_eq!(sequences, vec![0, 1, 2, 3, 4]);
    assert_eq!(terminated_with, Some(TerminationReason::StreamInactive));

    let terminated = running.wait_for_termination();
    assert_eq!(terminated.stats().deliveries, 5);
    assert_eq!(terminated.stats().bytes, 5 * 32 * 4);
    terminated.dealloc();
}

/// This test requires actual audio hardware and should be run manually.
#[tokio::test]
#[ignore = "requires audio hardware"]
async fn test_real_capture() {
    let handle = StreamHandle::open_default(1, 0, SampleFormat::Int16, 48000.0, 256)
        .expect("Failed to open default input");

    let (registration, mut rx) = frame_channel();
    let running = handle.start(registration).expect("Failed to start capture");

    // Capture for 1 second
    let timeout = tokio::time::timeout(Duration::from_secs(1), async {
        let mut total_frames = 0;
        while let Some(event) = rx.recv().await {
            if let FrameEvent::Frames(frames) = event {
                total_frames += frames.frame_count();
                if total_frames > 48000 {
                    break;
                }
            }
        }
        total_frames
    })
    .await;

    running.stop().expect("Failed to stop capture");
    running.wait_for_termination().dealloc();

    if let Ok(frames) = timeout {
        println!("Captured {} frames", frames);
        assert!(frames > 0, "Should have captured some audio");
    }
}
