//! Verifiable, forkable chain state.
//!
//! # Overview
//! This crate provides the state-storage core of a chain client:
//! - A branch navigator that moves one fixed header through a tree of
//!   branches made of reversible patches
//! - A merkelized UTXO set with order-independent root hash and inclusion
//!   proofs
//! - Merkle mountain ranges, append-only accumulators in several storage
//!   flavours that agree on roots and proofs
//!
//! # Architecture
//!
//! ## Core Components
//! - [`ChainNavigator`]: branch tree over a persisted storage region
//!   - Patches are interpreted by a host-supplied [`PatchHost`]
//!   - Moving the cursor applies or reverts patches on the header
//!   - The region image survives restarts
//!
//! - [`UtxoTree`]: crit-bit tree keyed by packed output identities
//!   - Hashes are refreshed lazily on demand
//!   - Proofs fold back to the root through [`merkle::proof::interpret`]
//!   - Ordered range traversal and stream save/load
//!
//! - [`merkle::mmr`]: the [`Mmr`] contract and its implementations
//!   - [`ArrayMmr`] keeps every node
//!   - [`DistributedMmr`] keeps nodes in host storage behind opaque keys
//!   - [`CompactMmr`] keeps only the peaks
//!
//! ## Supporting Components
//! - [`utils`]: digest service and byte codecs
//! - [`config`]: navigator store configuration
//! - [`def`]: layout constants
//!
//! # Example Usage
//! ```no_run
//! use chainstate::{ArrayMmr, Mmr, UtxoTree};
//! use chainstate::utxotree::{Cursor, Key};
//! use chainstate::utils::hasher;
//!
//! let mut mmr = ArrayMmr::new();
//! let leaf = hasher::hash("block 0");
//! let predicted = mmr.get_predicted_hash(&leaf);
//! mmr.append(&leaf);
//! assert_eq!(predicted, mmr.get_hash());
//!
//! let mut tree = UtxoTree::new();
//! let mut cu = Cursor::new();
//! let (value, created) = tree.find_or_create(&mut cu, &Key::MIN);
//! assert!(created);
//! value.count = 1;
//! let root = tree.get_hash();
//! ```
//!
//! # Concurrency
//! Nothing here locks. Every instance must be used by one accessor at a time.

pub mod config;
pub mod def;
pub mod merkle;
pub mod navigator;
pub mod test_helper;
pub mod utils;
pub mod utxotree;

pub use merkle::mmr::{ArrayMmr, CompactMmr, DistributedMmr, FlyMmr, Mmr};
pub use merkle::proof::{Proof, ProofNode};
pub use navigator::{ChainNavigator, NavigatorError, PatchHost};
pub use utxotree::UtxoTree;
