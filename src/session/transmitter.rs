//! Transmitter session
//!
//! Opens the session with the handshake frame, then turns every unit the
//! data source yields into one frame until the source runs dry or the
//! cancellation token is set.

use std::time::Duration;

use super::{CancellationToken, SessionResult, SessionState, TimerTick};
use crate::protocol::{FrameCodec, RawFrame, HANDSHAKE_FRAME};
use crate::radio::{PipeAddresses, Radio};
use crate::stream::DataSource;

/// Retry policy for data frames whose send was not confirmed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub max_retries: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl RetryPolicy {
    /// Immediate retries, no sleeping
    pub fn immediate(max_retries: u32) -> Self {
        Self {
            max_retries,
            initial_backoff: Duration::ZERO,
            max_backoff: Duration::ZERO,
        }
    }

    /// Delay before retry number `attempt` (0-based), doubling each time
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(50),
        }
    }
}

/// Transmitter statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransmitStats {
    /// Handshake sends attempted
    pub handshake_attempts: u64,
    /// Data frames confirmed by the radio
    pub frames_sent: u64,
    /// Sends the radio reported as failed
    pub send_failures: u64,
    /// Repeated sends of a data frame
    pub retries: u64,
    /// Data frames given up on after all retries
    pub frames_dropped: u64,
    /// Payload bytes in confirmed frames
    pub bytes_sent: u64,
}

/// How a transmitter session ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitOutcome {
    /// The source was exhausted
    Complete(TransmitStats),
    /// Cancelled after the handshake
    Cancelled(TransmitStats),
    /// Cancelled before the receiver was reached
    HandshakeCancelled,
}

enum SendResult {
    Sent,
    Dropped,
    Cancelled,
}

/// Drives frame construction and transmission
pub struct TransmitterSession<R, S> {
    radio: R,
    source: S,
    codec: FrameCodec,
    cancel: CancellationToken,
    second_tick: TimerTick,
    retry: RetryPolicy,
    handshake_idle: Duration,
    state: SessionState,
    handshake_done: bool,
    sequence_second: u16,
    counter: u16,
    stats: TransmitStats,
}

impl<R: Radio, S: DataSource> TransmitterSession<R, S> {
    /// Open the radio pipes and prepare a session.
    ///
    /// `second_tick` must be fired once per elapsed wall-clock second.
    pub fn new(
        mut radio: R,
        pipes: PipeAddresses,
        source: S,
        cancel: CancellationToken,
        second_tick: TimerTick,
    ) -> SessionResult<Self> {
        radio.open(pipes)?;
        let codec = FrameCodec::new(source.mode());

        Ok(Self {
            radio,
            source,
            codec,
            cancel,
            second_tick,
            retry: RetryPolicy::default(),
            handshake_idle: Duration::ZERO,
            state: SessionState::Idle,
            handshake_done: false,
            sequence_second: 0,
            counter: 0,
            stats: TransmitStats::default(),
        })
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Pause between failed handshake sends
    pub fn with_handshake_idle(mut self, idle: Duration) -> Self {
        self.handshake_idle = idle;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn stats(&self) -> &TransmitStats {
        &self.stats
    }

    /// Step until the session ends
    pub fn run(&mut self) -> SessionResult<TransmitOutcome> {
        tracing::info!("Attempting to establish connection...");
        loop {
            if let Some(outcome) = self.step()? {
                return Ok(outcome);
            }
        }
    }

    /// One loop iteration. Returns the outcome once the session has ended.
    pub fn step(&mut self) -> SessionResult<Option<TransmitOutcome>> {
        match self.state {
            SessionState::Idle | SessionState::AwaitingHandshake => Ok(self.handshake_step()),
            SessionState::Active => self.data_step(),
            SessionState::Complete | SessionState::Cancelled => Ok(Some(self.outcome())),
        }
    }

    fn handshake_step(&mut self) -> Option<TransmitOutcome> {
        if self.cancel.is_cancelled() {
            tracing::warn!("Attempt to establish a connection was canceled by the user");
            return Some(self.finish(SessionState::Cancelled));
        }

        self.stats.handshake_attempts += 1;
        if self.radio.send(&HANDSHAKE_FRAME) {
            self.handshake_done = true;
            self.state = SessionState::Active;
            // Ticks that fired while connecting belong to no frame
            self.second_tick.take();
            tracing::info!(
                "Connection established after {} attempt(s)",
                self.stats.handshake_attempts
            );
        } else {
            tracing::debug!("Sending first packet failed");
            if !self.handshake_idle.is_zero() {
                std::thread::sleep(self.handshake_idle);
            }
        }
        None
    }

    fn data_step(&mut self) -> SessionResult<Option<TransmitOutcome>> {
        if self.cancel.is_cancelled() {
            return Ok(Some(self.cancelled()));
        }

        if self.second_tick.take() {
            self.sequence_second = self.sequence_second.wrapping_add(1);
            self.counter = 0;
        }

        let frame = match self.source.next_body()? {
            Some(body) => self.codec.encode(self.sequence_second, self.counter, body)?,
            None => {
                tracing::info!(
                    "Transfer complete: {} frames, {} bytes sent, {} dropped",
                    self.stats.frames_sent,
                    self.stats.bytes_sent,
                    self.stats.frames_dropped
                );
                return Ok(Some(self.finish(SessionState::Complete)));
            }
        };
        self.counter = self.counter.wrapping_add(1);

        // A frame prepared while the token was set is discarded
        if self.cancel.is_cancelled() {
            return Ok(Some(self.cancelled()));
        }

        let raw = self.codec.serialize(&frame);
        match self.send_with_retry(&raw) {
            SendResult::Sent => {
                self.stats.frames_sent += 1;
                self.stats.bytes_sent += u64::from(frame.payload_len);
                tracing::debug!(
                    "Sent frame second={} ctr={} len={} chk={:#04x}",
                    frame.sequence_second,
                    frame.counter,
                    frame.payload_len,
                    frame.checksum
                );
            }
            SendResult::Dropped => {
                self.stats.frames_dropped += 1;
                tracing::warn!(
                    "Dropped frame second={} ctr={} after {} retries",
                    frame.sequence_second,
                    frame.counter,
                    self.retry.max_retries
                );
            }
            SendResult::Cancelled => return Ok(Some(self.cancelled())),
        }

        Ok(None)
    }

    fn send_with_retry(&mut self, raw: &RawFrame) -> SendResult {
        if self.radio.send(raw) {
            return SendResult::Sent;
        }
        self.stats.send_failures += 1;

        for attempt in 0..self.retry.max_retries {
            if self.cancel.is_cancelled() {
                return SendResult::Cancelled;
            }
            let delay = self.retry.backoff(attempt);
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }

            self.stats.retries += 1;
            if self.radio.send(raw) {
                return SendResult::Sent;
            }
            self.stats.send_failures += 1;
        }
        SendResult::Dropped
    }

    fn cancelled(&mut self) -> TransmitOutcome {
        tracing::warn!(
            "Transmission canceled by user after {} frames",
            self.stats.frames_sent
        );
        self.finish(SessionState::Cancelled)
    }

    fn finish(&mut self, state: SessionState) -> TransmitOutcome {
        self.state = state;
        self.outcome()
    }

    fn outcome(&self) -> TransmitOutcome {
        match self.state {
            SessionState::Complete => TransmitOutcome::Complete(self.stats),
            _ if self.handshake_done => TransmitOutcome::Cancelled(self.stats),
            _ => TransmitOutcome::HandshakeCancelled,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Body, FrameCodec, Sample, TransferMode};
    use crate::session::testing::ScriptedRadio;
    use crate::session::{CancelReason, Role};
    use crate::stream::{FileSource, SensorDriver, SensorSource};

    struct Fixed(Sample);

    impl SensorDriver for Fixed {
        fn sample(&mut self) -> Sample {
            self.0
        }
    }

    fn sensor_session(
        radio: ScriptedRadio,
        samples: u64,
        cancel: CancellationToken,
        tick: TimerTick,
    ) -> TransmitterSession<ScriptedRadio, SensorSource<Fixed>> {
        TransmitterSession::new(
            radio,
            PipeAddresses::default_for(Role::Transmitter),
            SensorSource::new(Fixed(Sample::new(100, -50, 0)), Some(samples)),
            cancel,
            tick,
        )
        .unwrap()
        .with_retry(RetryPolicy::immediate(2))
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_millis(1));
        assert_eq!(policy.backoff(1), Duration::from_millis(2));
        assert_eq!(policy.backoff(3), Duration::from_millis(8));
        assert_eq!(policy.backoff(10), Duration::from_millis(50));
        assert_eq!(policy.backoff(40), Duration::from_millis(50));
        assert_eq!(RetryPolicy::immediate(5).backoff(4), Duration::ZERO);
    }

    #[test]
    fn test_handshake_then_frames() {
        let cancel = CancellationToken::new();
        let mut session =
            sensor_session(ScriptedRadio::default(), 3, cancel, TimerTick::new());
        assert_eq!(session.state(), SessionState::Idle);

        let outcome = session.run().unwrap();
        assert_eq!(session.state(), SessionState::Complete);
        let TransmitOutcome::Complete(stats) = outcome else {
            panic!("unexpected outcome {:?}", outcome);
        };
        assert_eq!(stats.frames_sent, 3);
        assert_eq!(stats.bytes_sent, 18);

        let sent = &session.radio.sent;
        assert_eq!(sent.len(), 4);
        assert_eq!(sent[0], HANDSHAKE_FRAME);

        let codec = FrameCodec::new(TransferMode::Sensor);
        for (ctr, raw) in sent[1..].iter().enumerate() {
            let expected = codec
                .encode(0, ctr as u16, Body::Sample(Sample::new(100, -50, 0)))
                .unwrap();
            assert_eq!(raw, &codec.serialize(&expected));
        }
        assert!(session.radio.pipes.is_some());
    }

    #[test]
    fn test_handshake_retried_until_success() {
        let radio = ScriptedRadio {
            send_results: [false, false, false].into(),
            ..Default::default()
        };
        let mut session = sensor_session(radio, 0, CancellationToken::new(), TimerTick::new());

        assert_eq!(session.step().unwrap(), None);
        assert_eq!(session.step().unwrap(), None);
        assert_eq!(session.step().unwrap(), None);
        assert_eq!(session.state(), SessionState::Idle);
        assert_eq!(session.step().unwrap(), None);
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(session.stats().handshake_attempts, 4);

        assert!(matches!(
            session.step().unwrap(),
            Some(TransmitOutcome::Complete(_))
        ));
    }

    #[test]
    fn test_cancel_before_handshake() {
        let cancel = CancellationToken::new();
        let radio = ScriptedRadio {
            send_results: std::iter::repeat(false).take(10).collect(),
            cancel_after: Some((5, cancel.clone())),
            ..Default::default()
        };
        let mut session = sensor_session(radio, 10, cancel, TimerTick::new());

        assert_eq!(session.run().unwrap(), TransmitOutcome::HandshakeCancelled);
        assert_eq!(session.state(), SessionState::Cancelled);
        assert_eq!(session.radio.send_attempts, 5);
        assert!(session.radio.sent.is_empty());
        assert!(!session.handshake_done);
    }

    #[test]
    fn test_cancel_stops_sending_immediately() {
        let cancel = CancellationToken::new();
        let radio = ScriptedRadio {
            // handshake plus two data frames, then the token is set
            cancel_after: Some((3, cancel.clone())),
            ..Default::default()
        };
        let mut session = sensor_session(radio, 100, cancel, TimerTick::new());

        let outcome = session.run().unwrap();
        assert!(matches!(outcome, TransmitOutcome::Cancelled(s) if s.frames_sent == 2));
        assert_eq!(session.radio.send_attempts, 3);

        // Further steps do nothing
        assert_eq!(session.step().unwrap(), Some(outcome));
        assert_eq!(session.radio.send_attempts, 3);
    }

    #[test]
    fn test_second_tick_resets_counter() {
        let tick = TimerTick::new();
        let mut session =
            sensor_session(ScriptedRadio::default(), 5, CancellationToken::new(), tick.clone());

        // handshake, then two frames in second 0
        for _ in 0..3 {
            session.step().unwrap();
        }
        tick.fire();
        for _ in 0..3 {
            session.step().unwrap();
        }

        let codec = FrameCodec::new(TransferMode::Sensor);
        let headers: Vec<(u16, u16)> = session.radio.sent[1..]
            .iter()
            .map(|raw| {
                let frame = codec.decode(raw).frame;
                (frame.sequence_second, frame.counter)
            })
            .collect();
        assert_eq!(headers, vec![(0, 0), (0, 1), (1, 0), (1, 1), (1, 2)]);
    }

    #[test]
    fn test_failed_frame_retried_then_dropped() {
        let radio = ScriptedRadio {
            // handshake ok, frame 0 fails once, frame 1 fails all three attempts
            send_results: [true, false, true, false, false, false].into(),
            ..Default::default()
        };
        let mut session = sensor_session(radio, 3, CancellationToken::new(), TimerTick::new());

        let TransmitOutcome::Complete(stats) = session.run().unwrap() else {
            panic!("expected completion");
        };
        assert_eq!(stats.frames_sent, 2);
        assert_eq!(stats.frames_dropped, 1);
        assert_eq!(stats.send_failures, 4);
        assert_eq!(stats.retries, 3);

        let codec = FrameCodec::new(TransferMode::Sensor);
        let counters: Vec<u16> = session.radio.sent[1..]
            .iter()
            .map(|raw| codec.decode(raw).frame.counter)
            .collect();
        assert_eq!(counters, vec![0, 2]);
    }

    #[test]
    fn test_file_source_frames() {
        let data: Vec<u8> = (0..40).collect();
        let mut session = TransmitterSession::new(
            ScriptedRadio::default(),
            PipeAddresses::default_for(Role::Transmitter),
            FileSource::new(&data[..]),
            CancellationToken::new(),
            TimerTick::new(),
        )
        .unwrap();

        assert!(matches!(
            session.run().unwrap(),
            TransmitOutcome::Complete(s) if s.bytes_sent == 40 && s.frames_sent == 2
        ));

        let codec = FrameCodec::new(TransferMode::File);
        let mut received = Vec::new();
        for raw in &session.radio.sent[1..] {
            let decoded = codec.decode(raw);
            assert!(decoded.valid);
            received.extend_from_slice(decoded.frame.data());
        }
        assert_eq!(received, data);
    }

    #[test]
    fn test_teardown_cancels_transmitter() {
        let cancel = CancellationToken::new();
        let mut session =
            sensor_session(ScriptedRadio::default(), 5, cancel.clone(), TimerTick::new());
        session.step().unwrap();
        cancel.cancel(CancelReason::Teardown);
        assert!(matches!(
            session.step().unwrap(),
            Some(TransmitOutcome::Cancelled(_))
        ));
    }
}
