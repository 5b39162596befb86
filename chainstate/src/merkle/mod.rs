//! Merkle commitments: proofs and the mountain range accumulators.

pub mod mmr;
pub mod proof;

pub use mmr::Mmr;
pub use proof::{interpret, Proof, ProofNode};
