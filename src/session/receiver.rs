//! Receiver session
//!
//! Waits for the handshake frame, then validates every frame that arrives
//! and appends the good ones to the sink. The stream has no end marker: the
//! session runs until the cancellation token is set.

use std::time::Duration;

use super::{
    CancelReason, CancellationToken, RateMonitor, RateSample, SessionResult, SessionState,
    TimerTick,
};
use crate::protocol::{is_handshake, FrameCodec, HandshakeDetector, RawFrame, TransferMode};
use crate::radio::{PipeAddresses, Radio};
use crate::stream::FrameSink;

/// Receiver statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReceiveStats {
    /// Frames dropped while waiting for the handshake
    pub frames_before_handshake: u64,
    /// Frames read from the radio after the handshake
    pub frames_received: u64,
    /// Frames that passed checksum validation
    pub frames_accepted: u64,
    /// Frames dropped on checksum mismatch
    pub frames_rejected: u64,
    /// Repeated handshake frames seen while active
    pub handshakes_ignored: u64,
    /// Bytes appended to the sink
    pub bytes_written: u64,
}

/// How a receiver session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// Torn down by the surrounding program
    Complete(ReceiveStats),
    /// Cancelled by the user; output holds what arrived so far
    Truncated(ReceiveStats),
    /// Cancelled before the handshake arrived
    HandshakeCancelled,
}

struct RateMeasurement {
    monitor: RateMonitor,
    tick: TimerTick,
    last: Option<RateSample>,
}

/// Drives the receive loop
pub struct ReceiverSession<R, K> {
    radio: R,
    sink: K,
    codec: FrameCodec,
    cancel: CancellationToken,
    detector: HandshakeDetector,
    rate: Option<RateMeasurement>,
    poll_idle: Duration,
    state: SessionState,
    stats: ReceiveStats,
}

impl<R: Radio, K: FrameSink> ReceiverSession<R, K> {
    /// Open the radio pipes and prepare a session
    pub fn new(
        mut radio: R,
        pipes: PipeAddresses,
        mode: TransferMode,
        sink: K,
        cancel: CancellationToken,
    ) -> SessionResult<Self> {
        radio.open(pipes)?;

        Ok(Self {
            radio,
            sink,
            codec: FrameCodec::new(mode),
            cancel,
            detector: HandshakeDetector::new(),
            rate: None,
            poll_idle: Duration::ZERO,
            state: SessionState::Idle,
            stats: ReceiveStats::default(),
        })
    }

    /// Measure reception rate; `tick` must fire every monitor interval
    pub fn with_rate_monitor(mut self, monitor: RateMonitor, tick: TimerTick) -> Self {
        let payload = self.codec.mode().frame_payload_size();
        self.rate = Some(RateMeasurement {
            monitor: monitor.with_frame_payload(payload),
            tick,
            last: None,
        });
        self
    }

    /// Pause after a poll that found nothing
    pub fn with_poll_idle(mut self, idle: Duration) -> Self {
        self.poll_idle = idle;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> &ReceiveStats {
        &self.stats
    }

    pub fn rate_monitor(&self) -> Option<&RateMonitor> {
        self.rate.as_ref().map(|rate| &rate.monitor)
    }

    /// Most recent closed measurement window
    pub fn last_rate(&self) -> Option<RateSample> {
        self.rate.as_ref().and_then(|rate| rate.last)
    }

    /// Step until the session ends
    pub fn run(&mut self) -> SessionResult<ReceiveOutcome> {
        loop {
            if let Some(outcome) = self.step()? {
                return Ok(outcome);
            }
        }
    }

    /// One loop iteration. Returns the outcome once the session has ended.
    pub fn step(&mut self) -> SessionResult<Option<ReceiveOutcome>> {
        match self.state {
            SessionState::Idle => {
                tracing::info!("Waiting for transmission...");
                self.state = SessionState::AwaitingHandshake;
                Ok(self.handshake_step())
            }
            SessionState::AwaitingHandshake => Ok(self.handshake_step()),
            SessionState::Active => self.data_step(),
            SessionState::Complete | SessionState::Cancelled => Ok(Some(self.outcome())),
        }
    }

    fn handshake_step(&mut self) -> Option<ReceiveOutcome> {
        if let Some(reason) = self.cancel.reason() {
            match reason {
                CancelReason::User => tracing::warn!("Data transfer canceled by the user"),
                CancelReason::Teardown => {
                    tracing::info!("Receiver closed before the transfer began")
                }
            }
            self.state = SessionState::Cancelled;
            return Some(ReceiveOutcome::HandshakeCancelled);
        }

        let raw = self.poll_frame()?;
        if self.detector.observe(&raw) {
            self.state = SessionState::Active;
            if let Some(rate) = &mut self.rate {
                // Start the first window at the handshake
                rate.tick.take();
            }
            tracing::info!("Data transfer beginning!");
        } else {
            self.stats.frames_before_handshake = self.detector.discarded();
            tracing::debug!("Discarded frame while waiting for handshake");
        }
        None
    }

    fn data_step(&mut self) -> SessionResult<Option<ReceiveOutcome>> {
        if let Some(reason) = self.cancel.reason() {
            return self.finish(reason).map(Some);
        }

        self.report_rate();

        let Some(raw) = self.poll_frame() else {
            return Ok(None);
        };
        self.stats.frames_received += 1;

        if is_handshake(&raw) {
            self.stats.handshakes_ignored += 1;
            tracing::debug!("Ignoring repeated handshake");
            return Ok(None);
        }

        let decoded = self.codec.decode(&raw);
        if !decoded.valid {
            self.stats.frames_rejected += 1;
            tracing::debug!(
                "Checksum mismatch on frame second={} ctr={}",
                decoded.frame.sequence_second,
                decoded.frame.counter
            );
            return Ok(None);
        }

        let written = self.sink.accept(&decoded.frame)?;
        self.stats.frames_accepted += 1;
        self.stats.bytes_written += written as u64;
        if let Some(rate) = &mut self.rate {
            rate.monitor.on_frame_accepted();
        }
        tracing::debug!(
            "Accepted frame second={} ctr={} len={}",
            decoded.frame.sequence_second,
            decoded.frame.counter,
            decoded.frame.payload_len
        );

        Ok(None)
    }

    fn poll_frame(&mut self) -> Option<RawFrame> {
        if self.radio.poll() {
            if let Some(raw) = self.radio.receive() {
                return Some(raw);
            }
        }
        if !self.poll_idle.is_zero() {
            std::thread::sleep(self.poll_idle);
        }
        None
    }

    fn report_rate(&mut self) {
        if let Some(rate) = &mut self.rate {
            if rate.tick.take() {
                let sample = rate.monitor.close_window();
                tracing::info!("{}", sample);
                rate.last = Some(sample);
            }
        }
    }

    fn finish(&mut self, reason: CancelReason) -> SessionResult<ReceiveOutcome> {
        self.sink.finish()?;
        self.state = match reason {
            CancelReason::User => {
                tracing::warn!(
                    "Transfer truncated by user: {} frames, {} bytes written",
                    self.stats.frames_accepted,
                    self.stats.bytes_written
                );
                SessionState::Cancelled
            }
            CancelReason::Teardown => {
                tracing::info!(
                    "Receiver closed: {} frames accepted, {} rejected, {} bytes written",
                    self.stats.frames_accepted,
                    self.stats.frames_rejected,
                    self.stats.bytes_written
                );
                SessionState::Complete
            }
        };
        Ok(self.outcome())
    }

    fn outcome(&self) -> ReceiveOutcome {
        match self.state {
            SessionState::Complete => ReceiveOutcome::Complete(self.stats),
            _ if self.detector.is_complete() => ReceiveOutcome::Truncated(self.stats),
            _ => ReceiveOutcome::HandshakeCancelled,
        }
    }
}
