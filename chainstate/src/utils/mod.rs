//! Utility functions for the chain state crate.
//!
//! This module provides:
//! - Hashing functions (the digest service)
//! - Data encoding/decoding

pub mod codec;
pub mod hasher;
