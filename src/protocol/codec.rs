//! Frame codec for encoding/decoding radio frames
//!
//! Serializes frames into the fixed 32-byte layout and validates the
//! checksum on the way back in.

use bytes::{Buf, BufMut};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::{
    frame_checksum, Coverage, RawFrame, CHECKSUM_OFFSET, FRAME_SIZE, LENGTH_OFFSET, PAYLOAD_SIZE,
    SAMPLE_SIZE,
};

/// Payload bytes carried before the checksum byte
const HEAD_SIZE: usize = SAMPLE_SIZE;

/// Codec errors
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CodecError {
    #[error("Payload too large: {0} bytes (max: {1})")]
    PayloadTooLarge(usize, usize),

    #[error("{body} body cannot be sent in {mode} mode")]
    ModeMismatch {
        body: &'static str,
        mode: TransferMode,
    },
}

pub type CodecResult<T> = Result<T, CodecError>;

/// What the frames of a session carry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferMode {
    /// Raw file bytes, up to 26 per frame
    #[default]
    File,
    /// One accelerometer sample per frame
    Sensor,
}

impl TransferMode {
    /// Checksum coverage used by both ends in this mode
    pub fn coverage(self) -> Coverage {
        match self {
            TransferMode::File => Coverage::Full,
            TransferMode::Sensor => Coverage::Header,
        }
    }

    /// Meaningful payload bytes in a full frame
    pub fn frame_payload_size(self) -> usize {
        match self {
            TransferMode::File => PAYLOAD_SIZE,
            TransferMode::Sensor => SAMPLE_SIZE,
        }
    }
}

impl std::fmt::Display for TransferMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransferMode::File => write!(f, "file"),
            TransferMode::Sensor => write!(f, "sensor"),
        }
    }
}

/// One accelerometer reading
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Sample {
    pub x: i16,
    pub y: i16,
    pub z: i16,
}

impl Sample {
    pub fn new(x: i16, y: i16, z: i16) -> Self {
        Self { x, y, z }
    }
}

/// Data handed to the codec for one frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Body<'a> {
    Sample(Sample),
    Bytes(&'a [u8]),
}

impl Body<'_> {
    fn kind(&self) -> &'static str {
        match self {
            Body::Sample(_) => "sample",
            Body::Bytes(_) => "bytes",
        }
    }
}

/// A decoded radio frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Second index within the session
    pub sequence_second: u16,
    /// Frame index within that second
    pub counter: u16,
    /// Payload bytes, zero-filled past `payload_len`
    pub payload: [u8; PAYLOAD_SIZE],
    /// Number of meaningful payload bytes
    pub payload_len: u8,
    /// Checksum byte as carried on the wire
    pub checksum: u8,
}

impl Frame {
    /// The meaningful payload bytes
    pub fn data(&self) -> &[u8] {
        &self.payload[..self.payload_len as usize]
    }

    /// Interpret the payload head as a sample
    pub fn sample(&self) -> Sample {
        let mut head = &self.payload[..SAMPLE_SIZE];
        Sample {
            x: head.get_i16_le(),
            y: head.get_i16_le(),
            z: head.get_i16_le(),
        }
    }
}

/// Result of decoding raw bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub frame: Frame,
    /// Whether the recomputed checksum matched the carried one
    pub valid: bool,
}

/// Encodes and decodes frames for one transfer mode
#[derive(Debug, Clone, Copy, Default)]
pub struct FrameCodec {
    mode: TransferMode,
}

impl FrameCodec {
    pub fn new(mode: TransferMode) -> Self {
        Self { mode }
    }

    pub fn mode(&self) -> TransferMode {
        self.mode
    }

    /// Build a frame, computing its checksum over the serialized bytes
    pub fn encode(&self, sequence_second: u16, counter: u16, body: Body<'_>) -> CodecResult<Frame> {
        let mut payload = [0u8; PAYLOAD_SIZE];
        let payload_len = match (self.mode, body) {
            (TransferMode::Sensor, Body::Sample(sample)) => {
                let mut head = &mut payload[..SAMPLE_SIZE];
                head.put_i16_le(sample.x);
                head.put_i16_le(sample.y);
                head.put_i16_le(sample.z);
                SAMPLE_SIZE
            }
            (TransferMode::File, Body::Bytes(data)) => {
                if data.len() > PAYLOAD_SIZE {
                    return Err(CodecError::PayloadTooLarge(data.len(), PAYLOAD_SIZE));
                }
                payload[..data.len()].copy_from_slice(data);
                data.len()
            }
            (mode, body) => {
                return Err(CodecError::ModeMismatch {
                    body: body.kind(),
                    mode,
                })
            }
        };

        let mut frame = Frame {
            sequence_second,
            counter,
            payload,
            payload_len: payload_len as u8,
            checksum: 0,
        };
        let raw = self.serialize(&frame);
        frame.checksum = frame_checksum(&raw, self.mode.coverage());
        Ok(frame)
    }

    /// Lay a frame out on the wire, carrying its checksum byte as-is
    pub fn serialize(&self, frame: &Frame) -> RawFrame {
        let mut raw = [0u8; FRAME_SIZE];
        {
            let mut buf = &mut raw[..];
            buf.put_u16_le(frame.sequence_second);
            buf.put_u16_le(frame.counter);
            buf.put_slice(&frame.payload[..HEAD_SIZE]);
            buf.put_u8(frame.checksum);
            buf.put_slice(&frame.payload[HEAD_SIZE..]);
        }
        raw[LENGTH_OFFSET] = match self.mode {
            TransferMode::File => frame.payload_len,
            TransferMode::Sensor => 0,
        };
        raw
    }

    /// Parse raw bytes and check the checksum over the covered range.
    ///
    /// Callers must discard frames reported invalid.
    pub fn decode(&self, raw: &RawFrame) -> Decoded {
        let mut buf = &raw[..];
        let sequence_second = buf.get_u16_le();
        let counter = buf.get_u16_le();

        let mut payload = [0u8; PAYLOAD_SIZE];
        buf.copy_to_slice(&mut payload[..HEAD_SIZE]);
        let checksum = buf.get_u8();
        buf.copy_to_slice(&mut payload[HEAD_SIZE..]);

        let (payload_len, length_ok) = match self.mode {
            TransferMode::Sensor => (SAMPLE_SIZE as u8, true),
            TransferMode::File => {
                let len = raw[LENGTH_OFFSET];
                (len.min(PAYLOAD_SIZE as u8), len as usize <= PAYLOAD_SIZE)
            }
        };

        let valid = length_ok && frame_checksum(raw, self.mode.coverage()) == checksum;

        Decoded {
            frame: Frame {
                sequence_second,
                counter,
                payload,
                payload_len,
                checksum,
            },
            valid,
        }
    }
}
