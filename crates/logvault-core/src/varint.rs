//! Variable-length Integer Encoding (Varint)
//!
//! This module provides variable-length encoding for integers using two
//! techniques:
//!
//! ## Varint Encoding
//! Instead of always using 8 bytes for a u64, varints use only as many bytes
//! as needed:
//! - Small numbers (0-127) use just 1 byte
//! - Larger numbers use 2-10 bytes depending on magnitude
//! - Each byte uses 7 bits for data and 1 bit as a "continuation" flag
//!
//! ## ZigZag Encoding (for signed integers)
//! Maps signed integers to unsigned so small negative numbers are also
//! efficient:
//! - 0 → 0, -1 → 1, 1 → 2, -2 → 3, 2 → 4, etc.
//! - This means -1 encodes to 1 byte instead of 8 bytes
//!
//! ## Why This Matters for LogVault
//! Every column in an encoded file is a varint stream:
//! - Dictionary ids are small because templates repeat, so most ids fit 1 byte
//! - Timestamps are delta-encoded and deltas between consecutive log lines
//!   are tiny, often 0
//! - Integer variables in log text (pids, counters, sizes) are usually small
//!
//! Decoding returns `Result` rather than panicking because the decode path
//! runs over data read back from disk, which may be truncated or corrupt.

use crate::error::{Error, Result};
use bytes::{Buf, BufMut};

/// Encode a signed integer as a varint (ZigZag encoding)
pub fn encode_varint(buf: &mut impl BufMut, value: i64) {
    // ZigZag encoding: maps signed integers to unsigned
    // 0 => 0, -1 => 1, 1 => 2, -2 => 3, 2 => 4, etc.
    let unsigned = ((value << 1) ^ (value >> 63)) as u64;

    encode_varint_u64(buf, unsigned);
}

/// Encode an unsigned integer as a varint
pub fn encode_varint_u64(buf: &mut impl BufMut, mut value: u64) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;

        if value != 0 {
            byte |= 0x80; // Set continuation bit
        }

        buf.put_u8(byte);

        if value == 0 {
            break;
        }
    }
}

/// Decode a varint to a signed integer
pub fn decode_varint(buf: &mut impl Buf) -> Result<i64> {
    let unsigned = decode_varint_u64(buf)?;

    // ZigZag decoding
    let value = (unsigned >> 1) as i64;
    if (unsigned & 1) != 0 {
        Ok(!value)
    } else {
        Ok(value)
    }
}

/// Decode a varint to an unsigned integer
pub fn decode_varint_u64(buf: &mut impl Buf) -> Result<u64> {
    let mut value: u64 = 0;
    let mut shift = 0;

    loop {
        if !buf.has_remaining() {
            return Err(Error::Corrupt("truncated varint".to_string()));
        }

        let byte = buf.get_u8();
        value |= ((byte & 0x7F) as u64) << shift;

        if (byte & 0x80) == 0 {
            break;
        }

        shift += 7;

        if shift >= 64 {
            return Err(Error::VarintOverflow);
        }
    }

    Ok(value)
}
