//! Merkelized set of unspent outputs.
//!
//! - [`key`]: packing of output identities into ordered fixed-width keys
//! - [`tree`]: the crit-bit tree with lazily refreshed hashes and proofs
//! - [`check`]: whole-tree consistency checks used by tests

pub mod check;
pub mod key;
pub mod tree;

pub use key::{Commitment, Key, UtxoId};
pub use tree::{Cursor, UtxoLeaf, UtxoTree, UtxoValue};
