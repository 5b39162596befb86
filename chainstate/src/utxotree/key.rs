//! Packed UTXO keys.
//!
//! A [`UtxoId`] is packed into a fixed-width [`Key`] whose byte order is the
//! tree order. The commitment comes first and the maturity is big-endian, so
//! all outputs of one commitment are contiguous and sorted by maturity.

use std::fmt;

use crate::def::{
    COMMITMENT_X_SIZE, FLAG_COINBASE, FLAG_CONFIDENTIAL, KEY_BITS, KEY_FLAGS_POS,
    KEY_MATURITY_POS, KEY_SIZE, KEY_Y_POS,
};
use crate::utils::codec;

/// Compressed elliptic-curve point: x-coordinate plus the parity of y.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Commitment {
    pub x: [u8; COMMITMENT_X_SIZE],
    pub y: bool,
}

/// Identity of an unspent output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct UtxoId {
    pub commitment: Commitment,
    /// Height from which the output may be spent
    pub maturity: u64,
    pub confidential: bool,
    pub coinbase: bool,
}

#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Key(pub [u8; KEY_SIZE]);

impl Key {
    pub const MIN: Key = Key([0u8; KEY_SIZE]);
    pub const MAX: Key = Key([0xffu8; KEY_SIZE]);

    /// Builds a key from its packed form.
    ///
    /// # Returns
    /// `None` if `bz` is not exactly `KEY_SIZE` bytes long
    pub fn from_bytes(bz: &[u8]) -> Option<Self> {
        let arr: [u8; KEY_SIZE] = bz.try_into().ok()?;
        Some(Key(arr))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Bit `i` of the key, most significant bit of the first byte first.
    pub fn bit(&self, i: usize) -> usize {
        ((self.0[i / 8] >> (7 - (i % 8))) & 1) as usize
    }

    /// Index of the first bit in which the keys differ, `None` if equal.
    pub fn crit_bit(&self, other: &Key) -> Option<usize> {
        self.0
            .iter()
            .zip(other.0.iter())
            .position(|(a, b)| a != b)
            .map(|i| i * 8 + (self.0[i] ^ other.0[i]).leading_zeros() as usize)
    }

    /// Keeps the first `nbits` bits and sets all others to `fill`.
    ///
    /// Over the keys sharing those first bits, `masked(n, false)` is the
    /// lower bound and `masked(n, true)` the upper bound.
    pub fn masked(&self, nbits: usize, fill: bool) -> Key {
        assert!(nbits <= KEY_BITS);
        let pad = if fill { 0xffu8 } else { 0 };
        let mut res = Key([pad; KEY_SIZE]);
        let full = nbits / 8;
        res.0[..full].copy_from_slice(&self.0[..full]);
        let rem = nbits % 8;
        if rem != 0 {
            let keep = 0xffu8 << (8 - rem);
            res.0[full] = (self.0[full] & keep) | (pad & !keep);
        }
        res
    }

    pub fn maturity(&self) -> u64 {
        codec::decode_be_u64(&self.0[KEY_MATURITY_POS..])
    }

    pub fn to_id(&self) -> UtxoId {
        let mut x = [0u8; COMMITMENT_X_SIZE];
        x.copy_from_slice(&self.0[..COMMITMENT_X_SIZE]);
        let flags = self.0[KEY_FLAGS_POS];
        UtxoId {
            commitment: Commitment {
                x,
                y: self.0[KEY_Y_POS] != 0,
            },
            maturity: self.maturity(),
            confidential: flags & FLAG_CONFIDENTIAL != 0,
            coinbase: flags & FLAG_COINBASE != 0,
        }
    }

    /// Bounds covering every output of `commitment` maturing in
    /// `min_maturity..=max_maturity`, whatever its flags.
    pub fn commitment_range(
        commitment: &Commitment,
        min_maturity: u64,
        max_maturity: u64,
    ) -> (Key, Key) {
        let mut lo = Key::from(&UtxoId {
            commitment: *commitment,
            maturity: min_maturity,
            ..Default::default()
        });
        let mut hi = Key::from(&UtxoId {
            commitment: *commitment,
            maturity: max_maturity,
            ..Default::default()
        });
        lo.0[KEY_FLAGS_POS] = 0;
        hi.0[KEY_FLAGS_POS] = 0xff;
        (lo, hi)
    }
}

impl From<&UtxoId> for Key {
    fn from(id: &UtxoId) -> Self {
        let mut bz = [0u8; KEY_SIZE];
        bz[..COMMITMENT_X_SIZE].copy_from_slice(&id.commitment.x);
        bz[KEY_Y_POS] = id.commitment.y as u8;
        codec::write_be_u64(&mut bz[KEY_MATURITY_POS..], id.maturity);
        let mut flags = 0u8;
        if id.confidential {
            flags |= FLAG_CONFIDENTIAL;
        }
        if id.coinbase {
            flags |= FLAG_COINBASE;
        }
        bz[KEY_FLAGS_POS] = flags;
        Key(bz)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({})", self)
    }
}
