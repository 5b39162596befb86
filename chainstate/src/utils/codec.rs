//! Encoding and decoding utilities for binary data.
//!
//! Little-endian helpers are used for counts and handles written into
//! persisted streams and node payloads. The big-endian helpers serve the
//! packed UTXO key, where byte order must follow numeric order.

use byteorder::{BigEndian, ByteOrder, LittleEndian};

/// Decodes an unsigned 32-bit integer from a little-endian byte slice.
///
/// # Panics
/// If the input slice is less than 4 bytes long
pub fn decode_le_u32(v: &[u8]) -> u32 {
    LittleEndian::read_u32(&v[0..4])
}

/// Decodes an unsigned 64-bit integer from a little-endian byte slice.
///
/// # Arguments
/// * `v` - Byte slice containing at least 8 bytes
///
/// # Returns
/// The decoded u64 value
///
/// # Panics
/// If the input slice is less than 8 bytes long
pub fn decode_le_u64(v: &[u8]) -> u64 {
    LittleEndian::read_u64(&v[0..8])
}

/// Writes `n` as 8 little-endian bytes at the start of `v`.
pub fn write_le_u64(v: &mut [u8], n: u64) {
    LittleEndian::write_u64(&mut v[0..8], n);
}

/// Encodes an unsigned 64-bit integer as a little-endian byte vector.
pub fn encode_le_u64(n: u64) -> Vec<u8> {
    n.to_le_bytes().to_vec()
}

/// Decodes an unsigned 64-bit integer from a big-endian byte slice.
///
/// # Panics
/// If the input slice is less than 8 bytes long
pub fn decode_be_u64(v: &[u8]) -> u64 {
    BigEndian::read_u64(&v[0..8])
}

/// Writes `n` as 8 big-endian bytes at the start of `v`.
pub fn write_be_u64(v: &mut [u8], n: u64) {
    BigEndian::write_u64(&mut v[0..8], n);
}
