// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Attendance masks.
//!
//! A [`Mask`] records, for every roster position, whether that node's key
//! share is represented in an aggregate. A **set bit means the node is
//! absent**; a zero bit means it participated. This polarity lets masks from
//! disjoint subtrees be combined with a plain OR as they propagate toward
//! the root, and it is the polarity the verification equation expects.
//!
//! On the wire a mask is a big-endian bitstring of ⌈N/8⌉ bytes: roster
//! position 0 is the most significant bit of byte 0.

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::errors::{Error, Result};

/// Bit-set with one bit per roster position, marking non-participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mask {
    bit_len: usize,
    bits: Vec<u8>,
}

impl Mask {
    /// Create a mask of `bit_len` positions, all marked present.
    pub fn new(bit_len: usize) -> Self {
        Self {
            bit_len,
            bits: vec![0u8; bit_len.div_ceil(8)],
        }
    }

    /// Number of roster positions this mask covers.
    pub fn len(&self) -> usize {
        self.bit_len
    }

    /// True iff the mask covers no positions.
    pub fn is_empty(&self) -> bool {
        self.bit_len == 0
    }

    /// Mark a roster position as absent.
    ///
    /// Callers must pass an index inside the roster; indices come from the
    /// signing tree, which is validated against the roster at construction.
    pub fn set_absent(&mut self, index: usize) {
        assert!(index < self.bit_len, "mask index out of range");
        self.bits[index / 8] |= 1 << (7 - (index % 8));
    }

    /// True iff the given roster position is marked absent.
    pub fn is_absent(&self, index: usize) -> bool {
        assert!(index < self.bit_len, "mask index out of range");
        self.bits[index / 8] & (1 << (7 - (index % 8))) != 0
    }

    /// Merge another mask's absences into this one.
    ///
    /// This is the propagation operator: a parent ORs together the masks
    /// reported by its children, each authoritative for its own subtree.
    pub fn or_assign(&mut self, other: &Mask) -> Result<()> {
        if other.bit_len != self.bit_len {
            error!(
                "Cannot merge masks of different lengths ({} vs {})",
                self.bit_len, other.bit_len
            );
            return Err(Error::Protocol(format!(
                "mask covers {} positions, expected {}",
                other.bit_len, self.bit_len
            )));
        }
        for (byte, other_byte) in self.bits.iter_mut().zip(&other.bits) {
            *byte |= other_byte;
        }
        Ok(())
    }

    /// Number of positions marked present (zero bits).
    pub fn count_present(&self) -> usize {
        self.bit_len - self.count_absent()
    }

    /// Number of positions marked absent (set bits).
    pub fn count_absent(&self) -> usize {
        self.bits.iter().map(|b| b.count_ones() as usize).sum()
    }

    /// The big-endian bitstring encoding.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bits
    }

    /// The big-endian bitstring encoding, by value.
    pub fn to_bytes(&self) -> Vec<u8> {
        self.bits.clone()
    }

    /// Reconstruct a mask covering `bit_len` positions from its bitstring.
    pub fn from_bytes(bit_len: usize, bytes: &[u8]) -> Result<Self> {
        if bytes.len() != bit_len.div_ceil(8) {
            error!(
                "Mask bitstring has {} bytes, expected {} for {} positions",
                bytes.len(),
                bit_len.div_ceil(8),
                bit_len
            );
            return Err(Error::Protocol("mask bitstring has wrong length".into()));
        }
        let mask = Self {
            bit_len,
            bits: bytes.to_vec(),
        };
        // Bits past the roster length must be zero padding.
        for index in bit_len..bytes.len() * 8 {
            if mask.bits[index / 8] & (1 << (7 - (index % 8))) != 0 {
                error!("Mask bitstring has non-zero padding bits");
                return Err(Error::Protocol("mask bitstring has non-zero padding".into()));
            }
        }
        Ok(mask)
    }

    /// Check that this mask's length matches the roster it travels with.
    pub(crate) fn check_len(&self, expected: usize) -> Result<()> {
        if self.bit_len != expected {
            error!(
                "Received mask covers {} positions, roster has {}",
                self.bit_len, expected
            );
            return Err(Error::Protocol(format!(
                "mask covers {} positions, expected {}",
                self.bit_len, expected
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_mask_marks_everyone_present() {
        let mask = Mask::new(10);
        assert_eq!(mask.count_present(), 10);
        assert_eq!(mask.count_absent(), 0);
        assert!((0..10).all(|i| !mask.is_absent(i)));
    }

    #[test]
    fn set_absent_flips_exactly_one_position() {
        let mut mask = Mask::new(10);
        mask.set_absent(3);
        assert!(mask.is_absent(3));
        assert_eq!(mask.count_present(), 9);
        assert_eq!(mask.count_absent(), 1);

        // Setting twice is idempotent.
        mask.set_absent(3);
        assert_eq!(mask.count_absent(), 1);
    }

    #[test]
    fn encoding_is_big_endian() {
        let mut mask = Mask::new(10);
        mask.set_absent(0);
        mask.set_absent(9);
        // Position 0 is the MSB of byte 0; position 9 is bit 6 of byte 1.
        assert_eq!(mask.as_bytes(), &[0b1000_0000, 0b0100_0000]);
    }

    #[test]
    fn or_merges_disjoint_absences() {
        let mut left = Mask::new(7);
        left.set_absent(1);
        let mut right = Mask::new(7);
        right.set_absent(5);

        left.or_assign(&right).unwrap();
        assert!(left.is_absent(1));
        assert!(left.is_absent(5));
        assert_eq!(left.count_present(), 5);
    }

    #[test]
    fn or_rejects_length_mismatch() {
        let mut left = Mask::new(7);
        let right = Mask::new(8);
        assert!(left.or_assign(&right).is_err());
    }

    #[test]
    fn byte_roundtrip() {
        let mut mask = Mask::new(13);
        mask.set_absent(2);
        mask.set_absent(12);
        let bytes = mask.to_bytes();
        assert_eq!(bytes.len(), 2);
        let reconstructed = Mask::from_bytes(13, &bytes).unwrap();
        assert_eq!(mask, reconstructed);
    }

    #[test]
    fn from_bytes_rejects_bad_padding() {
        // 13 positions leave 3 padding bits in byte 1; set one of them.
        let bytes = [0u8, 0b0000_0100];
        assert!(Mask::from_bytes(13, &bytes).is_err());
    }

    #[test]
    fn from_bytes_rejects_wrong_length() {
        assert!(Mask::from_bytes(13, &[0u8; 3]).is_err());
    }
}
