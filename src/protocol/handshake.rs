//! Session opener
//!
//! The transmitter sends one sentinel frame before any data. The receiver
//! ignores everything until it sees it.

use super::{RawFrame, FRAME_SIZE};

/// Reserved marker at the start of the handshake frame
pub const HANDSHAKE_MARKER: [u8; 2] = [0x00, b'1'];

/// The handshake frame: marker followed by zeros, no checksum
pub const HANDSHAKE_FRAME: RawFrame = {
    let mut frame = [0u8; FRAME_SIZE];
    frame[0] = HANDSHAKE_MARKER[0];
    frame[1] = HANDSHAKE_MARKER[1];
    frame
};

/// Check whether raw bytes are exactly the handshake frame
pub fn is_handshake(raw: &RawFrame) -> bool {
    *raw == HANDSHAKE_FRAME
}

/// Receiver-side handshake tracking
#[derive(Debug, Default)]
pub struct HandshakeDetector {
    discarded: u64,
    complete: bool,
}

impl HandshakeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect one received frame. Returns true once the marker is seen.
    pub fn observe(&mut self, raw: &RawFrame) -> bool {
        if self.complete {
            return true;
        }
        if is_handshake(raw) {
            self.complete = true;
        } else {
            self.discarded += 1;
        }
        self.complete
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// Frames dropped while waiting for the marker
    pub fn discarded(&self) -> u64 {
        self.discarded
    }
}
