//! Configuration types for the poller and the cpal driver.

use std::time::Duration;

/// Configuration for the background polling thread.
///
/// Use [`PollConfig::default()`] for the standard spin-poll behavior, or
/// customize as needed.
///
/// # Example
///
/// ```
/// use polled_stream::PollConfig;
/// use std::time::Duration;
///
/// let config = PollConfig {
///     idle_backoff: Duration::from_millis(1),
///     ..Default::default()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct PollConfig {
    /// Pause between polls that found no input frames.
    ///
    /// Zero yields the thread instead of sleeping, which keeps latency at a
    /// minimum at the cost of a busy core.
    /// Default: zero
    pub idle_backoff: Duration,

    /// Name given to the polling thread.
    ///
    /// Default: `"polled-stream-poller"`
    pub thread_name: String,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            idle_backoff: Duration::ZERO,
            thread_name: "polled-stream-poller".to_string(),
        }
    }
}

/// Configuration for the cpal-backed driver.
#[derive(Debug, Clone)]
pub struct DriverConfig {
    /// Amount of input audio the capture ring buffer can hold.
    ///
    /// If the poller falls behind by more than this, input is dropped and the
    /// next read reports [`DriverError::InputOverflowed`].
    /// Default: 2 seconds
    ///
    /// [`DriverError::InputOverflowed`]: crate::DriverError::InputOverflowed
    pub ring_buffer_duration: Duration,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            ring_buffer_duration: Duration::from_secs(2),
        }
    }
}

impl DriverConfig {
    /// Ring buffer capacity in bytes for the given rate and frame size.
    ///
    /// Always holds at least one frame.
    #[must_use]
    pub fn ring_capacity(&self, sample_rate: f64, frame_size: usize) -> usize {
        let frames = (sample_rate * self.ring_buffer_duration.as_secs_f64()).ceil() as usize;
        frames.max(1) * frame_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poll_config_defaults() {
        let config = PollConfig::default();
        assert_eq!(config.idle_backoff, Duration::ZERO);
        assert_eq!(config.thread_name, "polled-stream-poller");
    }

    #[test]
    fn test_driver_config_defaults() {
        let config = DriverConfig::default();
        assert_eq!(config.ring_buffer_duration, Duration::from_secs(2));
    }

    #[test]
    fn test_ring_capacity() {
        let config = DriverConfig::default();
        // 2s at 48kHz, stereo int16
        assert_eq!(config.ring_capacity(48000.0, 4), 96000 * 4);

        let tiny = DriverConfig {
            ring_buffer_duration: Duration::ZERO,
        };
        assert_eq!(tiny.ring_capacity(48000.0, 4), 4);
    }
}
