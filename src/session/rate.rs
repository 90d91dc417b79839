//! Reception rate measurement
//!
//! Counts accepted frames and turns the count into a rate each time the
//! measurement interval elapses.

use crate::protocol::PAYLOAD_SIZE;

/// Default measurement interval in seconds
pub const DEFAULT_INTERVAL_SECONDS: u8 = 4;

/// Throughput over one closed window
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateSample {
    /// Frames accepted during the window
    pub frames: u32,
    pub interval_seconds: u8,
    pub frames_per_sec: u32,
    pub bytes_per_sec: u32,
}

impl std::fmt::Display for RateSample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Received {} pkts in {} seconds - {} pkts/sec - {} bytes/sec",
            self.frames, self.interval_seconds, self.frames_per_sec, self.bytes_per_sec
        )
    }
}

/// Accepted-frame counter with fixed windows
#[derive(Debug, Clone)]
pub struct RateMonitor {
    interval_seconds: u8,
    frame_payload: u32,
    received_count_at_window_start: u32,
    received_count_now: u32,
}

impl RateMonitor {
    /// Create a monitor. An interval of zero is treated as one second.
    pub fn new(interval_seconds: u8) -> Self {
        Self {
            interval_seconds: interval_seconds.max(1),
            frame_payload: PAYLOAD_SIZE as u32,
            received_count_at_window_start: 0,
            received_count_now: 0,
        }
    }

    /// Bytes each accepted frame counts for in `bytes_per_sec`
    pub fn with_frame_payload(mut self, bytes: usize) -> Self {
        self.frame_payload = u32::try_from(bytes).unwrap_or(u32::MAX);
        self
    }

    pub fn interval_seconds(&self) -> u8 {
        self.interval_seconds
    }

    /// Count one frame that passed checksum validation
    pub fn on_frame_accepted(&mut self) {
        self.received_count_now = self.received_count_now.wrapping_add(1);
    }

    pub fn received_count(&self) -> u32 {
        self.received_count_now
    }

    /// Close the current window and start the next one
    pub fn close_window(&mut self) -> RateSample {
        let frames = self
            .received_count_now
            .wrapping_sub(self.received_count_at_window_start);
        let frames_per_sec = frames / u32::from(self.interval_seconds);
        self.received_count_at_window_start = self.received_count_now;

        RateSample {
            frames,
            interval_seconds: self.interval_seconds,
            frames_per_sec,
            bytes_per_sec: frames_per_sec.saturating_mul(self.frame_payload),
        }
    }
}

impl Default for RateMonitor {
    fn default() -> Self {
        Self::new(DEFAULT_INTERVAL_SECONDS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::SAMPLE_SIZE;

    #[test]
    fn test_exact_rate() {
        for rate in [0u32, 1, 7, 250] {
            let mut monitor = RateMonitor::new(4);
            for _ in 0..4 * rate {
                monitor.on_frame_accepted();
            }
            let sample = monitor.close_window();
            assert_eq!(sample.frames, 4 * rate);
            assert_eq!(sample.frames_per_sec, rate);
            assert_eq!(sample.bytes_per_sec, rate * PAYLOAD_SIZE as u32);
        }
    }

    #[test]
    fn test_windows_are_independent() {
        let mut monitor = RateMonitor::new(2);
        for _ in 0..10 {
            monitor.on_frame_accepted();
        }
        assert_eq!(monitor.close_window().frames_per_sec, 5);

        for _ in 0..4 {
            monitor.on_frame_accepted();
        }
        let second = monitor.close_window();
        assert_eq!(second.frames, 4);
        assert_eq!(second.frames_per_sec, 2);
        assert_eq!(monitor.received_count(), 14);

        assert_eq!(monitor.close_window().frames, 0);
    }

    #[test]
    fn test_partial_rate_truncates() {
        let mut monitor = RateMonitor::new(4);
        for _ in 0..7 {
            monitor.on_frame_accepted();
        }
        assert_eq!(monitor.close_window().frames_per_sec, 1);
    }

    #[test]
    fn test_zero_interval_clamped() {
        let monitor = RateMonitor::new(0);
        assert_eq!(monitor.interval_seconds(), 1);
        assert_eq!(RateMonitor::default().interval_seconds(), DEFAULT_INTERVAL_SECONDS);
    }

    #[test]
    fn test_bytes_follow_frame_payload() {
        let mut monitor = RateMonitor::new(2).with_frame_payload(SAMPLE_SIZE);
        for _ in 0..10 {
            monitor.on_frame_accepted();
        }
        let sample = monitor.close_window();
        assert_eq!(sample.frames_per_sec, 5);
        assert_eq!(sample.bytes_per_sec, 30);
    }

    #[test]
    fn test_display() {
        let mut monitor = RateMonitor::new(4);
        for _ in 0..8 {
            monitor.on_frame_accepted();
        }
        assert_eq!(
            monitor.close_window().to_string(),
            "Received 8 pkts in 4 seconds - 2 pkts/sec - 52 bytes/sec"
        );
    }
}
