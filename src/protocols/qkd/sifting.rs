//! Basis sifting in 16-bit blocks.
//!
//! The peer's mask marks, per position, whether both parties used the same
//! basis. Positions with a 0 are dropped outright; survivors keep their
//! relative order inside each block and blocks are concatenated in order.

use crate::core::errors::{MaskParseError, ReconciliationError};
use crate::core::utils::{from_hex, to_hex};

/// Bits carried per control-channel packet.
pub const BLOCK_BITS: usize = 16;

/// Keep/drop mask; `true` means the bases agreed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReconciliationMask {
    bits: Vec<bool>,
}

impl ReconciliationMask {
    /// Wraps a mask received from the peer. Its length must be whole blocks.
    pub fn new(bits: Vec<bool>) -> Result<Self, ReconciliationError> {
        if bits.len() % BLOCK_BITS != 0 {
            return Err(ReconciliationError::MaskLengthMismatch {
                key: bits.len().next_multiple_of(BLOCK_BITS),
                mask: bits.len(),
            });
        }
        Ok(Self { bits })
    }

    /// Parses a hex mask, 4 bits per digit.
    pub fn from_hex(text: &str) -> Result<Self, MaskParseError> {
        let bits = from_hex(text.trim())?;
        Ok(Self::new(bits)?)
    }

    /// Mask the sender computes: 1 wherever both parties chose the same basis.
    pub fn from_bases(own: &[bool], peer: &[bool]) -> Result<Self, ReconciliationError> {
        if own.len() != peer.len() {
            return Err(ReconciliationError::MaskLengthMismatch {
                key: own.len(),
                mask: peer.len(),
            });
        }
        Self::new(own.iter().zip(peer).map(|(a, b)| a == b).collect())
    }

    /// An all-ones mask of any length. Sifting with it is the identity.
    pub fn keep_all(len: usize) -> Self {
        Self {
            bits: vec![true; len],
        }
    }

    pub fn bits(&self) -> &[bool] {
        &self.bits
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    /// Positions that survive sifting.
    pub fn kept(&self) -> usize {
        self.bits.iter().filter(|&&b| b).count()
    }

    pub fn to_hex(&self) -> String {
        to_hex(&self.bits, self.bits.len().div_ceil(4))
    }
}

/// Keeps the bits of `key` whose mask position is set.
pub fn sift(key: &[bool], mask: &ReconciliationMask) -> Result<Vec<bool>, ReconciliationError> {
    if key.len() != mask.len() {
        return Err(ReconciliationError::MaskLengthMismatch {
            key: key.len(),
            mask: mask.len(),
        });
    }

    let mut sifted = Vec::with_capacity(mask.kept());
    for (key_block, mask_block) in key.chunks(BLOCK_BITS).zip(mask.bits.chunks(BLOCK_BITS)) {
        sifted.extend(
            key_block
                .iter()
                .zip(mask_block)
                .filter(|&(_, &keep)| keep)
                .map(|(&bit, _)| bit),
        );
    }
    Ok(sifted)
}
