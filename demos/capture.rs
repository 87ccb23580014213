//! Default-device capture example.
//!
//! Opens the default input device, prints a level meter line per second for
//! five seconds, then stops the stream.
//!
//! Run with: cargo run --example capture

use std::time::{Duration, Instant};

use polled_stream::driver::devices;
use polled_stream::{frame_channel, FrameEvent, SampleFormat, StreamHandle};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing for debug output
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    println!("Host API: {}", devices::default_host_api());
    for device in devices::list_devices()? {
        println!(
            "  {}{} (in: {}, out: {}, rate: {:?})",
            device.name,
            if device.is_default_input { " [default input]" } else { "" },
            device.max_input_channels,
            device.max_output_channels,
            device.default_sample_rate,
        );
    }

    // Mono 16-bit at 48kHz, driver-chosen buffer size
    let handle = StreamHandle::open_default(1, 0, SampleFormat::Int16, 48000.0, 0)?;
    let (registration, mut rx) = frame_channel();
    let running = handle.start(registration)?;

    println!("Capturing for 5 seconds...");
    let started = Instant::now();
    let mut peak = 0i16;
    let mut last_report = Instant::now();

    while started.elapsed() < Duration::from_secs(5) {
        match tokio::time::timeout(Duration::from_millis(200), rx.recv()).await {
            Ok(Some(FrameEvent::Frames(frames))) => {
                let frame_peak = frames
                    .to_i16()
                    .iter()
                    .map(|s| s.saturating_abs())
                    .max()
                    .unwrap_or(0);
                peak = peak.max(frame_peak);
            }
            Ok(Some(FrameEvent::Terminated(reason))) => {
                println!("Stream ended early: {reason}");
                break;
            }
            Ok(None) => break,
            Err(_) => {}
        }

        if last_report.elapsed() >= Duration::from_secs(1) {
            println!("peak: {:>5} {}", peak, "#".repeat(usize::from(peak.unsigned_abs() / 1024)));
            peak = 0;
            last_report = Instant::now();
        }
    }

    // A stream that already ended reports StreamIsStopped here
    let _ = running.stop();
    let terminated = running.wait_for_termination();
    println!("Terminated: {}", terminated.reason());
    println!("Stats: {:?}", terminated.stats());
    terminated.dealloc();

    Ok(())
}
