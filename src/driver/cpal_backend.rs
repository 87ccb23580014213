//! Native stream binding on top of cpal.
//!
//! cpal streams cannot leave the thread that built them, so every
//! [`CpalStream`] owns a small thread that builds the device streams, runs
//! play/pause commands and drops them on close. Captured input is pushed
//! frame by frame into a ring buffer that the poller drains through
//! [`NativeStream::read`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{BufferSize, Device, SampleRate, Stream, StreamConfig as CpalStreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;

use super::devices::{check_direction, Direction};
use super::ring::{create_capture_ring, CaptureBuffer, CaptureProducer};
use super::{Driver, NativeStream, StreamParams};
use crate::config::DriverConfig;
use crate::format::SampleFormat;
use crate::DriverError;

/// Maps a sample format onto cpal's.
///
/// cpal has no packed 24-bit format.
pub(super) fn cpal_sample_format(format: SampleFormat) -> Result<cpal::SampleFormat, DriverError> {
    match format {
        SampleFormat::Float32 => Ok(cpal::SampleFormat::F32),
        SampleFormat::Int32 => Ok(cpal::SampleFormat::I32),
        SampleFormat::Int16 => Ok(cpal::SampleFormat::I16),
        SampleFormat::Int8 => Ok(cpal::SampleFormat::I8),
        SampleFormat::UInt8 => Ok(cpal::SampleFormat::U8),
        SampleFormat::Int24 => Err(DriverError::SampleFormatNotSupported),
    }
}

/// cpal only takes whole-Hz rates.
#[allow(clippy::float_cmp)]
pub(super) fn cpal_sample_rate(rate: f64) -> Result<SampleRate, DriverError> {
    if rate.fract() != 0.0 || rate < 1.0 || rate > f64::from(u32::MAX) {
        return Err(DriverError::InvalidSampleRate);
    }
    Ok(SampleRate(rate as u32))
}

fn build_error(err: cpal::BuildStreamError) -> DriverError {
    match err {
        cpal::BuildStreamError::DeviceNotAvailable => DriverError::DeviceUnavailable,
        cpal::BuildStreamError::StreamConfigNotSupported => DriverError::InvalidSampleRate,
        cpal::BuildStreamError::StreamIdOverflow => DriverError::InsufficientMemory,
        cpal::BuildStreamError::InvalidArgument => DriverError::InternalError,
        cpal::BuildStreamError::BackendSpecific { err } => {
            tracing::error!("cpal backend error while building stream: {}", err);
            DriverError::UnanticipatedHostError
        }
    }
}

fn play_error(err: cpal::PlayStreamError) -> DriverError {
    match err {
        cpal::PlayStreamError::DeviceNotAvailable => DriverError::DeviceUnavailable,
        cpal::PlayStreamError::BackendSpecific { err } => {
            tracing::error!("cpal backend error while starting stream: {}", err);
            DriverError::UnanticipatedHostError
        }
    }
}

fn pause_error(err: cpal::PauseStreamError) -> DriverError {
    match err {
        cpal::PauseStreamError::DeviceNotAvailable => DriverError::DeviceUnavailable,
        cpal::PauseStreamError::BackendSpecific { err } => {
            tracing::error!("cpal backend error while pausing stream: {}", err);
            DriverError::UnanticipatedHostError
        }
    }
}

/// Opens streams on the default cpal host's default devices.
///
/// # Example
///
/// ```no_run
/// use polled_stream::{CpalDriver, Driver, SampleFormat, StreamParams};
///
/// let params = StreamParams::input(1, SampleFormat::Int16, 48000.0, 256)?;
/// let stream = CpalDriver::new().open(&params)?;
/// # Ok::<(), polled_stream::DriverError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct CpalDriver {
    config: DriverConfig,
}

impl CpalDriver {
    /// Creates a driver with the default configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a driver with a custom configuration.
    pub fn with_config(config: DriverConfig) -> Self {
        Self { config }
    }

    /// Returns the current configuration.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }
}

impl Driver for CpalDriver {
    type Stream = CpalStream;

    fn open(&self, params: &StreamParams) -> Result<CpalStream, DriverError> {
        let format = cpal_sample_format(params.format())?;
        let sample_rate = cpal_sample_rate(params.sample_rate())?;
        let geometry = params.geometry();

        let (producer, buffer) = if geometry.input.is_absent() {
            (None, None)
        } else {
            let capacity = self
                .config
                .ring_capacity(params.sample_rate(), geometry.input.frame_size)
                / geometry.input.frame_size;
            let (producer, buffer) = create_capture_ring(capacity, geometry.input.frame_size);
            (Some(producer), Some(Mutex::new(buffer)))
        };

        let state = Arc::new(CaptureState::default());
        let plan = StreamPlan {
            params: *params,
            format,
            sample_rate,
            producer,
        };

        let (command_tx, command_rx) = crossbeam_channel::unbounded();
        let (ready_tx, ready_rx) = bounded(1);
        let owner_state = Arc::clone(&state);

        let owner = std::thread::Builder::new()
            .name("polled-stream-cpal".to_string())
            .spawn(move || run_owner(plan, &owner_state, &ready_tx, &command_rx))
            .map_err(|e| {
                tracing::error!("failed to spawn cpal owner thread: {}", e);
                DriverError::InsufficientMemory
            })?;

        // Owner thread exits on its own if building failed
        match ready_rx.recv() {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                let _ = owner.join();
                return Err(e);
            }
            Err(_) => {
                let _ = owner.join();
                return Err(DriverError::InternalError);
            }
        }

        tracing::debug!(
            input_channels = params.input_channels(),
            output_channels = params.output_channels(),
            format = %params.format(),
            sample_rate = params.sample_rate(),
            "opened cpal stream"
        );

        Ok(CpalStream {
            commands: command_tx,
            buffer,
            state,
            owner: Mutex::new(Some(owner)),
        })
    }
}

/// Flags shared between cpal's callbacks and the stream.
#[derive(Default)]
struct CaptureState {
    active: AtomicBool,
    fault: Mutex<Option<DriverError>>,
}

impl CaptureState {
    fn fault(&self) -> Option<DriverError> {
        *self.fault.lock()
    }

    fn record_fault(&self, err: &cpal::StreamError) {
        tracing::error!("Audio stream error: {}", err);
        let mapped = match err {
            cpal::StreamError::DeviceNotAvailable => DriverError::DeviceUnavailable,
            cpal::StreamError::BackendSpecific { .. } => DriverError::UnanticipatedHostError,
        };
        self.fault.lock().get_or_insert(mapped);
        self.active.store(false, Ordering::Release);
    }
}

/// Everything the owner thread needs to build the device streams.
struct StreamPlan {
    params: StreamParams,
    format: cpal::SampleFormat,
    sample_rate: SampleRate,
    producer: Option<CaptureProducer>,
}

impl StreamPlan {
    fn cpal_config(&self, channels: u16) -> CpalStreamConfig {
        let buffer_size = match self.params.frames_per_buffer() {
            0 => BufferSize::Default,
            frames => BufferSize::Fixed(frames),
        };
        CpalStreamConfig {
            channels,
            sample_rate: self.sample_rate,
            buffer_size,
        }
    }
}

enum Command {
    Play(Sender<Result<(), DriverError>>),
    Pause(Sender<Result<(), DriverError>>),
    Close,
}

fn run_owner(
    plan: StreamPlan,
    state: &Arc<CaptureState>,
    ready: &Sender<Result<(), DriverError>>,
    commands: &Receiver<Command>,
) {
    let streams = match build_streams(plan, state) {
        Ok(streams) => {
            let _ = ready.send(Ok(()));
            streams
        }
        Err(e) => {
            let _ = ready.send(Err(e));
            return;
        }
    };

    // Runs until Close or until the stream is dropped
    while let Ok(command) = commands.recv() {
        match command {
            Command::Play(reply) => {
                let result = streams.iter().try_for_each(|s| s.play().map_err(play_error));
                let _ = reply.send(result);
            }
            Command::Pause(reply) => {
                let result = streams
                    .iter()
                    .try_for_each(|s| s.pause().map_err(pause_error));
                let _ = reply.send(result);
            }
            Command::Close => break,
        }
    }

    drop(streams);
    tracing::debug!("cpal stream closed");
}

fn build_streams(
    mut plan: StreamPlan,
    state: &Arc<CaptureState>,
) -> Result<Vec<Stream>, DriverError> {
    let host = cpal::default_host();
    let mut streams = Vec::with_capacity(2);
    let input_channels = plan.params.input_channels();
    let output_channels = plan.params.output_channels();

    if let Some(producer) = plan.producer.take() {
        let device = host
            .default_input_device()
            .ok_or(DriverError::InvalidDevice)?;
        check_direction(
            &device,
            Direction::Input,
            input_channels,
            plan.params.format(),
            plan.params.sample_rate(),
        )?;
        let config = plan.cpal_config(input_channels);
        streams.push(build_input(&device, &config, plan.format, producer, state)?);
    }

    if output_channels > 0 {
        let device = host
            .default_output_device()
            .ok_or(DriverError::InvalidDevice)?;
        check_direction(
            &device,
            Direction::Output,
            output_channels,
            plan.params.format(),
            plan.params.sample_rate(),
        )?;
        let config = plan.cpal_config(output_channels);
        streams.push(build_output(&device, &config, &plan, state)?);
    }

    Ok(streams)
}

fn build_input(
    device: &Device,
    config: &CpalStreamConfig,
    format: cpal::SampleFormat,
    mut producer: CaptureProducer,
    state: &Arc<CaptureState>,
) -> Result<Stream, DriverError> {
    let error_state = Arc::clone(state);

    let stream = device
        .build_input_stream_raw(
            config,
            format,
            move |data: &cpal::Data, _: &cpal::InputCallbackInfo| {
                // Non-blocking push, excess frames are flagged as overflow
                producer.push_frames(data.bytes());
            },
            move |err| error_state.record_fault(&err),
            None,
        )
        .map_err(build_error)?;

    // cpal may start some backends immediately
    stream.pause().map_err(pause_error)?;
    Ok(stream)
}

fn build_output(
    device: &Device,
    config: &CpalStreamConfig,
    plan: &StreamPlan,
    state: &Arc<CaptureState>,
) -> Result<Stream, DriverError> {
    let silence = plan.params.format().silence_byte();
    let error_state = Arc::clone(state);

    let stream = device
        .build_output_stream_raw(
            config,
            plan.format,
            move |data: &mut cpal::Data, _: &cpal::OutputCallbackInfo| {
                data.bytes_mut().fill(silence);
            },
            move |err| error_state.record_fault(&err),
            None,
        )
        .map_err(build_error)?;

    stream.pause().map_err(pause_error)?;
    Ok(stream)
}

/// An open cpal stream on the default devices.
///
/// Created by [`CpalDriver::open`]. Dropping it closes the device streams and
/// joins their owner thread.
pub struct CpalStream {
    commands: Sender<Command>,
    buffer: Option<Mutex<CaptureBuffer>>,
    state: Arc<CaptureState>,
    owner: Mutex<Option<JoinHandle<()>>>,
}

impl CpalStream {
    fn request(
        &self,
        command: impl FnOnce(Sender<Result<(), DriverError>>) -> Command,
    ) -> Result<(), DriverError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.commands
            .send(command(reply_tx))
            .map_err(|_| DriverError::BadStreamPtr)?;
        reply_rx.recv().map_err(|_| DriverError::BadStreamPtr)?
    }

    fn pause(&self) -> Result<(), DriverError> {
        let result = self.request(Command::Pause);
        self.state.active.store(false, Ordering::Release);
        result
    }
}

impl NativeStream for CpalStream {
    fn start(&self) -> Result<(), DriverError> {
        if let Some(fault) = self.state.fault() {
            return Err(fault);
        }
        if let Some(buffer) = &self.buffer {
            buffer.lock().take_overflow();
        }
        self.request(Command::Play)?;
        self.state.active.store(true, Ordering::Release);
        Ok(())
    }

    fn stop(&self) -> Result<(), DriverError> {
        // cpal has no drain; pausing keeps what is already buffered
        self.pause()
    }

    fn abort(&self) -> Result<(), DriverError> {
        let result = self.pause();
        if let Some(buffer) = &self.buffer {
            let dropped = buffer.lock().discard();
            tracing::trace!(dropped, "discarded buffered input on abort");
        }
        result
    }

    fn is_active(&self) -> Result<bool, DriverError> {
        match self.state.fault() {
            Some(fault) => Err(fault),
            None => Ok(self.state.active.load(Ordering::Acquire)),
        }
    }

    fn is_stopped(&self) -> Result<bool, DriverError> {
        Ok(!self.state.active.load(Ordering::Acquire))
    }

    fn read_available(&self) -> Result<usize, DriverError> {
        let buffer = self
            .buffer
            .as_ref()
            .ok_or(DriverError::CanNotReadFromAnOutputOnlyStream)?;
        if let Some(fault) = self.state.fault() {
            return Err(fault);
        }
        Ok(buffer.lock().available_frames())
    }

    fn read(&self, out: &mut [u8], frames: usize) -> Result<(), DriverError> {
        let buffer = self
            .buffer
            .as_ref()
            .ok_or(DriverError::CanNotReadFromAnOutputOnlyStream)?;
        let mut buffer = buffer.lock();
        buffer.read_frames(out, frames)?;
        if buffer.take_overflow() {
            return Err(DriverError::InputOverflowed);
        }
        Ok(())
    }
}

impl Drop for CpalStream {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Close);
        if let Some(owner) = self.owner.lock().take() {
            if owner.join().is_err() {
                tracing::warn!("cpal owner thread panicked");
            }
        }
    }
}

impl std::fmt::Debug for CpalStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CpalStream")
            .field("has_input", &self.buffer.is_some())
            .field("active", &self.state.active.load(Ordering::Relaxed))
            .field("fault", &self.state.fault())
            .finish_non_exhaustive()
    }
}
