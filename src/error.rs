//! Error types for polled-stream.
//!
//! Errors fall into three groups:
//! - **Configuration errors** ([`DriverError`] from `open`/`start`): no thread is spawned
//! - **Runtime I/O errors**: observed by the polling thread, surfaced through the
//!   callback status and the stream's [`TerminationReason`](crate::TerminationReason)
//! - **Contract violations**: unrepresentable, `start` consumes the handle

use crate::driver::NativeStream;
use crate::handle::StreamHandle;

/// Failure categories reported by the native audio driver.
///
/// The variants mirror the driver's closed set of error codes, so consumers
/// match on the category instead of raw numbers. [`DriverError::code`] and
/// [`DriverError::from_code`] convert to and from the native numbering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum DriverError {
    /// The driver library has not been initialized.
    #[error("driver not initialized")]
    NotInitialized,

    /// The host API reported an error the driver did not anticipate.
    #[error("unanticipated host error")]
    UnanticipatedHostError,

    /// Channel count is negative, zero on both sides, or above the device maximum.
    #[error("invalid channel count")]
    InvalidChannelCount,

    /// The sample rate is not supported by the device.
    #[error("invalid sample rate")]
    InvalidSampleRate,

    /// The device index or device is not valid.
    #[error("invalid device")]
    InvalidDevice,

    /// An invalid stream flag was supplied.
    #[error("invalid flag")]
    InvalidFlag,

    /// The sample format is not supported by the device or backend.
    #[error("sample format not supported")]
    SampleFormatNotSupported,

    /// Input and output devices cannot be combined in one stream.
    #[error("bad input/output device combination")]
    BadIoDeviceCombination,

    /// The driver could not allocate memory (or a thread) for the stream.
    #[error("insufficient memory")]
    InsufficientMemory,

    /// The requested buffer is too large.
    #[error("buffer too big")]
    BufferTooBig,

    /// The requested buffer is too small.
    #[error("buffer too small")]
    BufferTooSmall,

    /// No callback was supplied where one was required.
    #[error("no callback supplied")]
    NullCallback,

    /// The stream handle no longer refers to a live stream.
    #[error("bad stream pointer")]
    BadStreamPtr,

    /// A driver operation timed out.
    #[error("timed out")]
    TimedOut,

    /// Internal driver failure.
    #[error("internal driver error")]
    InternalError,

    /// The device is unavailable (disconnected or in exclusive use).
    #[error("device unavailable")]
    DeviceUnavailable,

    /// Host-API specific stream info does not match the device.
    #[error("incompatible host-API specific stream info")]
    IncompatibleHostApiSpecificStreamInfo,

    /// The stream is already stopped.
    #[error("stream is stopped")]
    StreamIsStopped,

    /// The stream is still running.
    #[error("stream is not stopped")]
    StreamIsNotStopped,

    /// Input data was discarded because it was not read in time.
    #[error("input overflowed")]
    InputOverflowed,

    /// Output data was not supplied in time.
    #[error("output underflowed")]
    OutputUnderflowed,

    /// The requested host API is not available.
    #[error("host API not found")]
    HostApiNotFound,

    /// The host API index is not valid.
    #[error("invalid host API")]
    InvalidHostApi,

    /// Blocking reads are not allowed on a callback stream.
    #[error("cannot read from a callback stream")]
    CanNotReadFromACallbackStream,

    /// Blocking writes are not allowed on a callback stream.
    #[error("cannot write to a callback stream")]
    CanNotWriteToACallbackStream,

    /// The stream has no input side.
    #[error("cannot read from an output-only stream")]
    CanNotReadFromAnOutputOnlyStream,

    /// The stream has no output side.
    #[error("cannot write to an input-only stream")]
    CanNotWriteToAnInputOnlyStream,

    /// The stream belongs to a different host API.
    #[error("incompatible stream host API")]
    IncompatibleStreamHostApi,

    /// A buffer pointer was invalid.
    #[error("bad buffer pointer")]
    BadBufferPtr,

    /// A code outside the known categories.
    #[error("unknown driver error ({0})")]
    Unknown(i32),
}

/// `(error, native code, name)` for every known category.
const ERROR_TABLE: &[(DriverError, i32, &str)] = &[
    (DriverError::NotInitialized, -10000, "not_initialized"),
    (DriverError::UnanticipatedHostError, -9999, "unanticipated_host_error"),
    (DriverError::InvalidChannelCount, -9998, "invalid_channel_count"),
    (DriverError::InvalidSampleRate, -9997, "invalid_sample_rate"),
    (DriverError::InvalidDevice, -9996, "invalid_device"),
    (DriverError::InvalidFlag, -9995, "invalid_flag"),
    (DriverError::SampleFormatNotSupported, -9994, "sample_format_unsupported"),
    (DriverError::BadIoDeviceCombination, -9993, "bad_device_combo"),
    (DriverError::InsufficientMemory, -9992, "insufficient_memory"),
    (DriverError::BufferTooBig, -9991, "buffer_too_big"),
    (DriverError::BufferTooSmall, -9990, "buffer_too_small"),
    (DriverError::NullCallback, -9989, "no_callback"),
    (DriverError::BadStreamPtr, -9988, "bad_callback"),
    (DriverError::TimedOut, -9987, "timeout"),
    (DriverError::InternalError, -9986, "internal_error"),
    (DriverError::DeviceUnavailable, -9985, "device_unavailable"),
    (
        DriverError::IncompatibleHostApiSpecificStreamInfo,
        -9984,
        "incompatible_host_stream_info",
    ),
    (DriverError::StreamIsStopped, -9983, "stream_stopped"),
    (DriverError::StreamIsNotStopped, -9982, "stream_not_stopped"),
    (DriverError::InputOverflowed, -9981, "input_overflowed"),
    (DriverError::OutputUnderflowed, -9980, "output_underflowed"),
    (DriverError::HostApiNotFound, -9979, "no_host_api"),
    (DriverError::InvalidHostApi, -9978, "invalid_host_api"),
    (DriverError::CanNotReadFromACallbackStream, -9977, "no_read_callback"),
    (DriverError::CanNotWriteToACallbackStream, -9976, "no_write_callback"),
    (DriverError::CanNotReadFromAnOutputOnlyStream, -9975, "output_only_stream"),
    (DriverError::CanNotWriteToAnInputOnlyStream, -9974, "input_only_stream"),
    (DriverError::IncompatibleStreamHostApi, -9973, "incompatible_host_api"),
    (DriverError::BadBufferPtr, -9972, "bad_buffer"),
];

impl DriverError {
    /// Returns the native numeric code for this error.
    #[must_use]
    pub fn code(self) -> i32 {
        if let Self::Unknown(code) = self {
            return code;
        }
        ERROR_TABLE
            .iter()
            .find(|(err, _, _)| *err == self)
            .map_or(0, |(_, code, _)| *code)
    }

    /// Maps a native status code to an error.
    ///
    /// Returns `None` for non-negative codes, which the driver uses for "no error".
    #[must_use]
    pub fn from_code(code: i32) -> Option<Self> {
        if code >= 0 {
            return None;
        }
        let known = ERROR_TABLE
            .iter()
            .find(|(_, c, _)| *c == code)
            .map(|(err, _, _)| *err);
        Some(known.unwrap_or(Self::Unknown(code)))
    }

    /// Stable snake_case name of the category, e.g. `"invalid_channel_count"`.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        ERROR_TABLE
            .iter()
            .find(|(err, _, _)| *err == self)
            .map_or("unknown_error", |(_, _, name)| name)
    }

    /// Returns `true` for errors that describe a rejected stream configuration.
    #[must_use]
    pub fn is_configuration_error(self) -> bool {
        matches!(
            self,
            Self::InvalidChannelCount
                | Self::InvalidSampleRate
                | Self::InvalidDevice
                | Self::InvalidFlag
                | Self::SampleFormatNotSupported
                | Self::BadIoDeviceCombination
                | Self::BufferTooBig
                | Self::BufferTooSmall
                | Self::DeviceUnavailable
                | Self::IncompatibleHostApiSpecificStreamInfo
        )
    }
}

/// Returned by [`StreamHandle::start`] when the native stream refuses to start.
///
/// The handle is handed back untouched (still opened, no thread spawned) so it
/// can be retried or deallocated.
#[derive(thiserror::Error)]
#[error("failed to start stream: {error}")]
pub struct StartError<S: NativeStream> {
    pub(crate) handle: StreamHandle<S>,
    pub(crate) error: DriverError,
}

impl<S: NativeStream> StartError<S> {
    /// The driver error that prevented the start.
    pub fn error(&self) -> DriverError {
        self.error
    }

    /// Recovers the opened handle.
    pub fn into_handle(self) -> StreamHandle<S> {
        self.handle
    }

    /// Splits into the opened handle and the driver error.
    pub fn into_parts(self) -> (StreamHandle<S>, DriverError) {
        (self.handle, self.error)
    }
}

impl<S: NativeStream> std::fmt::Debug for StartError<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StartError")
            .field("error", &self.error)
            .finish_non_exhaustive()
    }
}

impl<S: NativeStream> From<StartError<S>> for DriverError {
    fn from(err: StartError<S>) -> Self {
        err.error
    }
}
