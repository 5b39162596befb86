//! Core definitions and constants for the chain state crate.
//!
//! The constants are organized into several categories:
//!
//! ## UTXO key layout
//! - Commitment, maturity and flag sizes
//! - Offsets of each field inside the packed key
//!
//! ## Navigator storage
//! - Region image magic and version
//! - Default region capacity
//! - Per-tag bookkeeping cost charged against the region

/// Size of a digest in bytes.
pub const HASH_SIZE: usize = 32;

/// Size of the x-coordinate of a compressed commitment point.
pub const COMMITMENT_X_SIZE: usize = 32;

/// Size of a packed UTXO key.
/// Layout:
/// +----------------------+------------+------------------------+-----------+
/// | commitment x (32B)   | y flag (1B)| maturity, BE (8B)      | flags (1B)|
/// +----------------------+------------+------------------------+-----------+
pub const KEY_SIZE: usize = COMMITMENT_X_SIZE + 1 + 8 + 1;

/// Number of addressable bits in a packed UTXO key.
pub const KEY_BITS: usize = KEY_SIZE * 8;

/// Offset of the commitment y flag inside a packed key.
pub const KEY_Y_POS: usize = COMMITMENT_X_SIZE;

/// Offset of the big-endian maturity height inside a packed key.
pub const KEY_MATURITY_POS: usize = KEY_Y_POS + 1;

/// Offset of the flags byte inside a packed key.
pub const KEY_FLAGS_POS: usize = KEY_MATURITY_POS + 8;

/// Flag bit marking a confidential output.
pub const FLAG_CONFIDENTIAL: u8 = 1;

/// Flag bit marking a coinbase output.
pub const FLAG_COINBASE: u8 = 2;

/// Size of one serialized (key, value) record in a UTXO tree stream.
pub const UTXO_RECORD_SIZE: usize = KEY_SIZE + 4;

/// Magic number at the head of every navigator region image ("CHAINNAV").
pub const MAPPING_MAGIC: u64 = 0x5641_4e4e_4941_4843;

/// Version of the region image layout.
pub const MAPPING_VERSION: u32 = 1;

/// Number of alternating image slots kept on disk.
pub const MAPPING_SLOTS: u64 = 2;

/// Default byte budget of a navigator region (64MB).
pub const DEFAULT_REGION_CAPACITY: usize = 64 * 1024 * 1024;

/// Bytes charged against the region for every tag record.
pub const TAG_RECORD_SIZE: usize = 96;

/// Size of one link in a node-referenced MMR payload.
pub const NODE_LINK_SIZE: usize = 8;
