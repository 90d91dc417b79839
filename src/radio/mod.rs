//! Radio module - The transceiver boundary
//!
//! Provides:
//! - The `Radio` trait the sessions drive
//! - Pipe addressing for the two directions of a link
//! - A UDP-backed radio and an in-process simulated link

mod sim;
mod udp;

pub use sim::*;
pub use udp::*;

use thiserror::Error;

use crate::protocol::{RawFrame, DEFAULT_PIPE_ADDRESSES};
use crate::session::Role;

/// Largest value a 40-bit pipe address can take
pub const MAX_PIPE_ADDRESS: u64 = (1 << 40) - 1;

/// Radio errors
#[derive(Error, Debug)]
pub enum RadioError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid pipe address {0:#x}: must fit in 40 bits")]
    InvalidPipeAddress(u64),

    #[error("Pipe address {0:#x} used for both directions")]
    SamePipes(u64),
}

pub type RadioResult<T> = Result<T, RadioError>;

/// Writing and reading pipe of one endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipeAddresses {
    pub writing: u64,
    pub reading: u64,
}

impl PipeAddresses {
    /// Pipes for `role` given the link's A and B addresses.
    ///
    /// The transmitter writes to B and reads from A; the receiver the reverse.
    pub fn for_role(role: Role, a: u64, b: u64) -> RadioResult<Self> {
        for address in [a, b] {
            if address > MAX_PIPE_ADDRESS {
                return Err(RadioError::InvalidPipeAddress(address));
            }
        }
        if a == b {
            return Err(RadioError::SamePipes(a));
        }

        Ok(match role {
            Role::Transmitter => Self { writing: b, reading: a },
            Role::Receiver => Self { writing: a, reading: b },
        })
    }

    /// Pipes for `role` on the default addresses
    pub fn default_for(role: Role) -> Self {
        let [a, b] = DEFAULT_PIPE_ADDRESSES;
        match role {
            Role::Transmitter => Self { writing: b, reading: a },
            Role::Receiver => Self { writing: a, reading: b },
        }
    }
}

/// Trait for the radio transceiver driven by a session loop.
///
/// `poll` and `receive` return promptly; the sessions poll. `send` may wait
/// a bounded time for the delivery confirmation.
pub trait Radio {
    /// Configure the writing and reading pipes
    fn open(&mut self, pipes: PipeAddresses) -> RadioResult<()>;

    /// Transmit one frame. Returns false if delivery was not confirmed.
    fn send(&mut self, frame: &RawFrame) -> bool;

    /// Whether a received frame is waiting
    fn poll(&mut self) -> bool;

    /// Take the waiting frame, if any
    fn receive(&mut self) -> Option<RawFrame>;
}
