//! Protocol module - Defines the 32-byte radio frame and session opener
//!
//! Every frame has the same fixed layout (little-endian integers):
//! - 2 bytes second index within the session
//! - 2 bytes counter within that second
//! - 6 bytes payload head (or x, y, z samples)
//! - 1 byte Fletcher-8 checksum
//! - 20 bytes payload tail
//! - 1 byte payload length (file mode only)

mod checksum;
mod codec;
mod handshake;

pub use checksum::*;
pub use codec::*;
pub use handshake::*;

/// Size of every frame on the wire
pub const FRAME_SIZE: usize = 32;

/// Usable payload bytes per frame
pub const PAYLOAD_SIZE: usize = 26;

/// Bytes taken by one (x, y, z) sample
pub const SAMPLE_SIZE: usize = 6;

/// Offset of the checksum byte
pub const CHECKSUM_OFFSET: usize = 10;

/// Offset of the payload length byte (file mode)
pub const LENGTH_OFFSET: usize = 31;

/// Default pipe addresses, A then B
pub const DEFAULT_PIPE_ADDRESSES: [u64; 2] = [0xABCD_ABCD_71, 0x54_4D52_687C];

/// Default radio channel
pub const DEFAULT_CHANNEL: u8 = 110;

/// A frame as it travels over the radio
pub type RawFrame = [u8; FRAME_SIZE];
