//! Session module - The transmitter and receiver state machines
//!
//! Provides:
//! - Cooperative polling loops for both ends of a transfer
//! - The cancellation token and timer ticks they observe
//! - Reception rate measurement

mod cancel;
mod rate;
mod receiver;
mod transmitter;

pub use cancel::*;
pub use rate::*;
pub use receiver::*;
pub use transmitter::*;

use thiserror::Error;

use crate::protocol::CodecError;
use crate::radio::RadioError;

/// Session errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("Radio error: {0}")]
    Radio(#[from] RadioError),
}

pub type SessionResult<T> = Result<T, SessionError>;

/// Which end of the link a process is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Transmitter,
    Receiver,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Transmitter => write!(f, "transmitter"),
            Role::Receiver => write!(f, "receiver"),
        }
    }
}

/// Lifecycle of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, nothing sent or received yet
    Idle,
    /// Receiver waiting for the handshake frame
    AwaitingHandshake,
    /// Moving data frames
    Active,
    /// Stopped by the cancellation token
    Cancelled,
    /// Source exhausted, or receiver torn down
    Complete,
}

#[cfg(test)]
pub(crate) mod testing {
    //! Scripted radio for driving the state machines in tests

    use std::collections::VecDeque;

    use super::{CancelReason, CancellationToken};
    use crate::protocol::RawFrame;
    use crate::radio::{PipeAddresses, Radio, RadioResult};

    #[derive(Default)]
    pub struct ScriptedRadio {
        pub pipes: Option<PipeAddresses>,
        pub inbox: VecDeque<RawFrame>,
        pub sent: Vec<RawFrame>,
        /// Results for upcoming sends; true once exhausted
        pub send_results: VecDeque<bool>,
        pub send_attempts: usize,
        /// Cancel this token once this many sends have been attempted
        pub cancel_after: Option<(usize, CancellationToken)>,
    }

    impl ScriptedRadio {
        pub fn with_inbox(frames: impl IntoIterator<Item = RawFrame>) -> Self {
            Self {
                inbox: frames.into_iter().collect(),
                ..Default::default()
            }
        }
    }

    impl Radio for ScriptedRadio {
        fn open(&mut self, pipes: PipeAddresses) -> RadioResult<()> {
            self.pipes = Some(pipes);
            Ok(())
        }

        fn send(&mut self, frame: &RawFrame) -> bool {
            self.send_attempts += 1;
            let ok = self.send_results.pop_front().unwrap_or(true);
            if ok {
                self.sent.push(*frame);
            }
            if let Some((after, token)) = &self.cancel_after {
                if self.send_attempts >= *after {
                    token.cancel(CancelReason::User);
                }
            }
            ok
        }

        fn poll(&mut self) -> bool {
            !self.inbox.is_empty()
        }

        fn receive(&mut self) -> Option<RawFrame> {
            self.inbox.pop_front()
        }
    }
}
