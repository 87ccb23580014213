//! Frame-granular byte ring buffer between the driver callback and the poller.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use ringbuf::traits::{Consumer, Observer, Producer, Split};
use ringbuf::HeapRb;

use crate::DriverError;

/// Producer half, owned by the driver's audio callback.
///
/// Only whole frames are ever pushed, so the consumer side always stays
/// frame-aligned. Pushing never blocks; frames that do not fit are dropped
/// and remembered as an overflow.
pub(crate) struct CaptureProducer {
    producer: ringbuf::HeapProd<u8>,
    frame_size: usize,
    overflowed: Arc<AtomicBool>,
}

impl CaptureProducer {
    /// Pushes as many whole frames from `bytes` as fit.
    ///
    /// Returns the number of bytes accepted.
    pub fn push_frames(&mut self, bytes: &[u8]) -> usize {
        let whole = bytes.len() - bytes.len() % self.frame_size;
        let room = self.producer.vacant_len() - self.producer.vacant_len() % self.frame_size;
        let accepted = whole.min(room);

        if accepted < bytes.len() {
            self.overflowed.store(true, Ordering::Release);
        }
        if accepted == 0 {
            return 0;
        }
        self.producer.push_slice(&bytes[..accepted])
    }
}

/// Consumer half, read by the native stream's `read_available`/`read`.
pub(crate) struct CaptureBuffer {
    consumer: ringbuf::HeapCons<u8>,
    frame_size: usize,
    overflowed: Arc<AtomicBool>,
}

impl CaptureBuffer {
    /// Whole frames currently buffered.
    pub fn available_frames(&self) -> usize {
        self.consumer.occupied_len() / self.frame_size
    }

    /// Reads exactly `frames` frames into `buffer`.
    ///
    /// # Errors
    ///
    /// - `BadBufferPtr` if `buffer` is not exactly `frames` frames long
    /// - `InternalError` if fewer frames were buffered than requested
    pub fn read_frames(&mut self, buffer: &mut [u8], frames: usize) -> Result<(), DriverError> {
        let wanted = frames * self.frame_size;
        if buffer.len() != wanted {
            return Err(DriverError::BadBufferPtr);
        }
        if self.consumer.occupied_len() < wanted {
            return Err(DriverError::InternalError);
        }
        let read = self.consumer.pop_slice(buffer);
        if read == wanted {
            Ok(())
        } else {
            Err(DriverError::InternalError)
        }
    }

    /// Clears the overflow marker, returning whether input was dropped since
    /// the last call.
    pub fn take_overflow(&self) -> bool {
        self.overflowed.swap(false, Ordering::AcqRel)
    }

    /// Discards everything buffered, returning the number of bytes dropped.
    pub fn discard(&mut self) -> usize {
        self.consumer.clear()
    }
}

/// Creates a ring buffer pair holding `capacity_frames` frames of `frame_size` bytes.
pub(crate) fn create_capture_ring(
    capacity_frames: usize,
    frame_size: usize,
) -> (CaptureProducer, CaptureBuffer) {
    let frame_size = frame_size.max(1);
    let ring_buffer = HeapRb::<u8>::new(capacity_frames.max(1) * frame_size);
    let (producer, consumer) = ring_buffer.split();
    let overflowed = Arc::new(AtomicBool::new(false));

    (
        CaptureProducer {
            producer,
            frame_size,
            overflowed: Arc::clone(&overflowed),
        },
        CaptureBuffer {
            consumer,
            frame_size,
            overflowed,
        },
    )
}
