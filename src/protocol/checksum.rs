//! Fletcher-8 frame checksum
//!
//! Two 8-bit running sums packed into one byte. Catches most single-byte
//! corruption and many transpositions. It is not a cryptographic check.

use super::{RawFrame, CHECKSUM_OFFSET, FRAME_SIZE};

/// Which bytes of a frame the checksum covers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Coverage {
    /// Offsets 0..=9: header and the three sample fields
    Header,
    /// Every byte except the checksum itself: 0..=9 then 11..=31
    Full,
}

/// Fletcher-8 over `data`
pub fn fletcher8(data: &[u8]) -> u8 {
    let (sum1, sum2) = accumulate(0, 0, data);
    pack(sum1, sum2)
}

/// Fletcher-8 over the covered bytes of a serialized frame
pub fn frame_checksum(raw: &RawFrame, coverage: Coverage) -> u8 {
    let (mut sum1, mut sum2) = accumulate(0, 0, &raw[..CHECKSUM_OFFSET]);
    if coverage == Coverage::Full {
        (sum1, sum2) = accumulate(sum1, sum2, &raw[CHECKSUM_OFFSET + 1..FRAME_SIZE]);
    }
    pack(sum1, sum2)
}

fn accumulate(mut sum1: u8, mut sum2: u8, data: &[u8]) -> (u8, u8) {
    for &byte in data {
        sum1 = sum1.wrapping_add(byte);
        sum2 = sum2.wrapping_add(sum1);
    }
    (sum1, sum2)
}

fn pack(sum1: u8, sum2: u8) -> u8 {
    (sum1 & 0x0F) | (sum2 << 4)
}
