//! Merkle proofs and their interpretation.
//!
//! A proof is the ordered list of peer hashes met while walking from a leaf
//! up to a root, each tagged with the side the peer sits on. Interpreting a
//! proof folds it over the leaf hash; comparing the result with a trusted root
//! is the caller's business. A mismatch is never an error of the structure
//! that produced the proof.
//!
//! Wire format:
//! +------------------+-----------------------------------------------+
//! | step count (4B)  | steps: peer-at-right flag (1B) + peer (32B)   |
//! +------------------+-----------------------------------------------+

use thiserror::Error;

use crate::def::HASH_SIZE;
use crate::utils::codec;
use crate::utils::hasher::{self, Hash32};

/// One step of a Merkle proof.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ProofNode {
    /// Hash of the sibling at this level
    pub peer_hash: Hash32,
    /// Whether the sibling is the right-hand operand of the combine
    pub peer_at_right: bool,
}

/// Errors that can occur while decoding a proof
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ProofError {
    #[error("Proof bytes too short: {0}")]
    Truncated(usize),

    #[error("Proof length mismatch: expected {expected} bytes, got {actual}")]
    LengthMismatch { expected: usize, actual: usize },

    #[error("Invalid side flag {0}")]
    InvalidFlag(u8),
}

/// An ordered sequence of proof steps, leaf level first.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Proof(pub Vec<ProofNode>);

impl Proof {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn with_capacity(n: usize) -> Self {
        Self(Vec::with_capacity(n))
    }

    pub fn push(&mut self, peer_hash: Hash32, peer_at_right: bool) {
        self.0.push(ProofNode {
            peer_hash,
            peer_at_right,
        });
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ProofNode> {
        self.0.iter()
    }

    /// Folds the proof over `leaf` and returns the implied root.
    pub fn interpret(&self, leaf: &Hash32) -> Hash32 {
        interpret(leaf, self)
    }

    /// Serializes the proof into its wire format.
    pub fn to_bytes(&self) -> Vec<u8> {
        let stride = 1 + HASH_SIZE;
        let mut res = vec![0u8; 4 + self.0.len() * stride];
        res[..4].copy_from_slice(&(self.0.len() as u32).to_le_bytes());
        for (i, node) in self.0.iter().enumerate() {
            let start = 4 + i * stride;
            res[start] = node.peer_at_right as u8;
            res[start + 1..start + stride].copy_from_slice(&node.peer_hash);
        }
        res
    }

    /// Deserializes a proof from its wire format.
    ///
    /// # Errors
    /// Returns a `ProofError` if the byte slice is truncated, has trailing
    /// bytes or carries a side flag other than 0 or 1.
    pub fn from_bytes(bz: &[u8]) -> Result<Self, ProofError> {
        if bz.len() < 4 {
            return Err(ProofError::Truncated(bz.len()));
        }
        let stride = 1 + HASH_SIZE;
        let n = codec::decode_le_u32(bz) as usize;
        let expected = 4 + n * stride;
        if bz.len() != expected {
            return Err(ProofError::LengthMismatch {
                expected,
                actual: bz.len(),
            });
        }
        let mut res = Self::with_capacity(n);
        for i in 0..n {
            let start = 4 + i * stride;
            let peer_at_right = match bz[start] {
                0 => false,
                1 => true,
                flag => return Err(ProofError::InvalidFlag(flag)),
            };
            let mut peer_hash = [0u8; HASH_SIZE];
            peer_hash.copy_from_slice(&bz[start + 1..start + stride]);
            res.push(peer_hash, peer_at_right);
        }
        Ok(res)
    }
}

impl<'a> IntoIterator for &'a Proof {
    type Item = &'a ProofNode;
    type IntoIter = std::slice::Iter<'a, ProofNode>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Performs a single fold step.
///
/// # Arguments
/// * `acc` - The running hash
/// * `peer` - The sibling hash
/// * `peer_at_right` - Whether `peer` is the right-hand operand
pub fn interpret_step(acc: &Hash32, peer: &Hash32, peer_at_right: bool) -> Hash32 {
    hasher::hash2x(acc, peer, !peer_at_right)
}

/// Folds `proof` over `leaf` and returns the implied root.
pub fn interpret(leaf: &Hash32, proof: &Proof) -> Hash32 {
    proof.iter().fold(*leaf, |acc, node| {
        interpret_step(&acc, &node.peer_hash, node.peer_at_right)
    })
}
