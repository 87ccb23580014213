//! Mock driver example.
//!
//! Runs the full open/start/stop lifecycle against `MockDriver`, so it works
//! without any audio hardware.
//!
//! Run with: cargo run --example mock_capture

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use polled_stream::{
    CallbackRegistration, DriverError, MockDriver, PollConfig, SampleFormat, StreamHandle,
    StreamParams,
};

fn main() -> Result<(), DriverError> {
    tracing_subscriber::fmt::init();

    // 16 frames, an idle poll and 32 frames, then 64 frames per poll
    let driver = MockDriver::new()
        .with_available(64)
        .script_available([Ok(16), Ok(0), Ok(32)]);
    let params = StreamParams::input(2, SampleFormat::Int16, 44100.0, 256)?;

    let handle = StreamHandle::open(&driver, &params)?.with_poll_config(PollConfig {
        idle_backoff: Duration::from_millis(1),
        ..Default::default()
    });
    let status = handle.status();

    let bytes = Arc::new(AtomicU64::new(0));
    let counter = Arc::clone(&bytes);
    let registration = CallbackRegistration::new(move |frames| {
        counter.fetch_add(frames.bytes.len() as u64, Ordering::Relaxed);
        if frames.sequence < 3 {
            println!(
                "#{} {} frames ({} bytes), status {:?}, state {:?}",
                frames.sequence,
                frames.frame_count,
                frames.bytes.len(),
                frames.status,
                status.state(),
            );
        }
    })
    .on_terminate(|reason| println!("Polling thread ended: {reason}"));

    let running = handle.start(registration)?;
    std::thread::sleep(Duration::from_millis(50));

    // Simulate the device going away: the next availability query fails
    driver.push_available(Err(DriverError::DeviceUnavailable));
    std::thread::sleep(Duration::from_millis(50));

    if let Err(e) = running.stop() {
        println!("Stop after failure: {e} ({})", e.as_str());
    }
    let terminated = running.wait_for_termination();

    println!("Reason: {}", terminated.reason());
    println!("Delivered {} bytes", bytes.load(Ordering::Relaxed));
    println!("Stats: {:?}", terminated.stats());
    terminated.dealloc();

    println!(
        "Driver: opened {}, closed {}, aborts {}",
        driver.opened(),
        driver.closed(),
        driver.aborts()
    );
    Ok(())
}
