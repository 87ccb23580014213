//! Callback registration for delivered input frames.

use std::fmt;

use tokio::sync::mpsc;

use crate::format::SampleFormat;
use crate::frames::{CapturedFrames, FrameEvent};
use crate::{DriverError, TerminationReason};

/// One delivery of input frames, borrowed from the polling thread.
///
/// The bytes are only valid for the duration of the callback; copy them
/// (e.g. with [`InputFrames::to_captured`]) to keep them.
#[derive(Debug, Clone, Copy)]
pub struct InputFrames<'a> {
    /// Status of the read. An error may still come with valid data.
    pub status: Result<(), DriverError>,
    /// Interleaved frames in native byte order, `frame_count * frame_size` long.
    pub bytes: &'a [u8],
    /// Number of frames in `bytes`.
    pub frame_count: usize,
    /// Bytes per input frame.
    pub frame_size: usize,
    /// Sample format of `bytes`.
    pub format: SampleFormat,
    /// Delivery number, starting at 0.
    pub sequence: u64,
}

impl InputFrames<'_> {
    /// Copies the delivery into an owned buffer.
    pub fn to_captured(&self) -> CapturedFrames {
        CapturedFrames::new(
            self.status,
            self.bytes.to_vec(),
            self.frame_size,
            self.format,
            self.sequence,
        )
    }
}

pub(crate) type FrameCallback = Box<dyn FnMut(InputFrames<'_>) + Send + 'static>;
pub(crate) type TerminateHook = Box<dyn FnOnce(&TerminationReason) + Send + 'static>;

/// The consumer side of a running stream.
///
/// The frame callback runs on the polling thread once per iteration that
/// found frames, while the handle's read lock is held. It may query the
/// stream through a [`StreamStatus`](crate::StreamStatus) but must not block
/// for long: the next poll waits for it.
///
/// The optional termination hook runs once, after the stream has reached
/// its terminated state. The frame callback is never called after that.
///
/// # Example
///
/// ```
/// use polled_stream::CallbackRegistration;
///
/// let registration = CallbackRegistration::new(|frames| {
///     println!("{} frames, status {:?}", frames.frame_count, frames.status);
/// })
/// .on_terminate(|reason| println!("stream ended: {reason}"));
/// ```
pub struct CallbackRegistration {
    on_frames: FrameCallback,
    on_terminate: Option<TerminateHook>,
}

impl CallbackRegistration {
    /// Registers a frame callback.
    pub fn new<F>(on_frames: F) -> Self
    where
        F: FnMut(InputFrames<'_>) + Send + 'static,
    {
        Self {
            on_frames: Box::new(on_frames),
            on_terminate: None,
        }
    }

    /// Adds a hook that runs once the polling thread has ended.
    #[must_use]
    pub fn on_terminate<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(&TerminationReason) + Send + 'static,
    {
        self.on_terminate = Some(Box::new(hook));
        self
    }

    pub(crate) fn into_parts(self) -> (FrameCallback, Option<TerminateHook>) {
        (self.on_frames, self.on_terminate)
    }
}

impl fmt::Debug for CallbackRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackRegistration")
            .field("on_terminate", &self.on_terminate.is_some())
            .finish_non_exhaustive()
    }
}

/// Creates a registration that forwards every delivery into a channel.
///
/// Each delivery arrives as [`FrameEvent::Frames`]; when the polling thread
/// ends, a final [`FrameEvent::Terminated`] carries the reason and the
/// channel closes. The channel is unbounded so the polling thread never
/// waits on a slow consumer.
///
/// # Example
///
/// ```no_run
/// use polled_stream::{frame_channel, FrameEvent};
///
/// # async fn consume() {
/// let (registration, mut rx) = frame_channel();
/// // let running = handle.start(registration)?;
/// # drop(registration);
/// while let Some(event) = rx.recv().await {
///     match event {
///         FrameEvent::Frames(frames) => println!("{} bytes", frames.bytes.len()),
///         FrameEvent::Terminated(reason) => println!("ended: {reason}"),
///     }
/// }
/// # }
/// ```
pub fn frame_channel() -> (CallbackRegistration, mpsc::UnboundedReceiver<FrameEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let terminate_tx = tx.clone();

    let registration = CallbackRegistration::new(move |frames: InputFrames<'_>| {
        // Receiver dropped: nothing left to deliver to
        let _ = tx.send(FrameEvent::Frames(frames.to_captured()));
    })
    .on_terminate(move |reason| {
        let _ = terminate_tx.send(FrameEvent::Terminated(*reason));
    });

    (registration, rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn frames(bytes: &[u8], sequence: u64) -> InputFrames<'_> {
        InputFrames {
            status: Ok(()),
            bytes,
            frame_count: bytes.len() / 2,
            frame_size: 2,
            format: SampleFormat::Int16,
            sequence,
        }
    }

    #[test]
    fn test_registration_parts() {
        let count = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&count);

        let registration = CallbackRegistration::new(move |f| {
            counter.fetch_add(f.frame_count, Ordering::SeqCst);
        });
        let (mut on_frames, on_terminate) = registration.into_parts();
        assert!(on_terminate.is_none());

        on_frames(frames(&[0; 8], 0));
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_to_captured_copies() {
        let bytes = [1u8, 2, 3, 4];
        let captured = frames(&bytes, 7).to_captured();
        assert_eq!(captured.bytes.as_slice(), &bytes);
        assert_eq!(captured.frame_count(), 2);
        assert_eq!(captured.sequence, 7);
    }

    #[tokio::test]
    async fn test_frame_channel_forwards_then_closes() {
        let (registration, mut rx) = frame_channel();
        let (mut on_frames, on_terminate) = registration.into_parts();

        on_frames(frames(&[9; 4], 0));
        if let Some(hook) = on_terminate {
            hook(&TerminationReason::StreamInactive);
        }
        drop(on_frames);

        match rx.recv().await {
            Some(FrameEvent::Frames(f)) => assert_eq!(f.bytes.as_slice(), &[9; 4]),
            other => panic!("expected frames, got {other:?}"),
        }
        assert_eq!(
            rx.recv().await,
            Some(FrameEvent::Terminated(TerminationReason::StreamInactive))
        );
        assert_eq!(rx.recv().await, None);
    }
}
