//! Hashing utilities shared by the UTXO tree and the mountain ranges.
//!
//! This module provides the SHA-256 based digest service:
//! - Single values
//! - Pairs of digests (the Merkle `Combine`)
//! - Concatenations of several byte slices

use sha2::{Digest, Sha256};

/// Type alias for a 32-byte hash value.
/// Used throughout the crate for cryptographic hashes.
pub type Hash32 = [u8; 32];

/// A constant representing a hash of all zeros.
/// It is the root of an empty tree or an empty mountain range.
pub const ZERO_HASH32: Hash32 = [0u8; 32];

/// Computes the SHA-256 hash of a single value.
///
/// # Arguments
/// * `a` - Value to hash
///
/// # Returns
/// The 32-byte hash of the input
pub fn hash<T: AsRef<[u8]>>(a: T) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(a);
    hasher.finalize().into()
}

/// Combines two child hashes into their parent hash.
///
/// The order matters: `hash2(a, b) != hash2(b, a)` in general.
///
/// # Arguments
/// * `a` - Left child
/// * `b` - Right child
///
/// # Returns
/// The 32-byte hash of `a || b`
pub fn hash2<T: AsRef<[u8]>>(a: T, b: T) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(a);
    hasher.update(b);
    hasher.finalize().into()
}

/// Combines two hashes with optional order swapping.
///
/// # Arguments
/// * `a` - First value to hash
/// * `b` - Second value to hash
/// * `exchange_ab` - Whether to swap the order of a and b
pub fn hash2x<T: AsRef<[u8]>>(a: T, b: T, exchange_ab: bool) -> Hash32 {
    if exchange_ab {
        hash2(b, a)
    } else {
        hash2(a, b)
    }
}

/// Computes the SHA-256 hash of the concatenation of `parts`.
pub fn hash_concat(parts: &[&[u8]]) -> Hash32 {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// Hex form of a hash, for logs and error messages.
pub fn to_hex(h: &Hash32) -> String {
    hex::encode(h)
}
