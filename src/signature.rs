// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! The collective signature and its third-party verification.

use serde::{Deserialize, Serialize};
use tracing::error;

use crate::{
    curve::{CurveTrait, ScalarTrait},
    errors::{ConfigError, Error, Result},
    mask::Mask,
    utils::ParseBytes,
};

/// How many signers a verifier demands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Policy {
    /// Every roster position must have participated.
    Complete,
    /// At least this many roster positions must have participated.
    Threshold(usize),
}

/// A collective Schnorr signature: the aggregate commitment `C`, the
/// aggregate response `s`, and the attendance mask `M`.
///
/// Anyone holding the roster can verify it: recompute
/// `e = H(C ‖ M ‖ msg)` and check `s·G == C + e·Σ pub_i` over the positions
/// `M` marks present.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct CollectiveSignature<C: CurveTrait> {
    commitment: C,
    response: C::Scalar,
    mask: Mask,
}

impl<C: CurveTrait> CollectiveSignature<C> {
    pub(crate) fn new(commitment: C, response: C::Scalar, mask: Mask) -> Self {
        Self {
            commitment,
            response,
            mask,
        }
    }

    /// The aggregate commitment `C`.
    pub fn commitment(&self) -> &C {
        &self.commitment
    }

    /// The aggregate response `s`.
    pub fn response(&self) -> &C::Scalar {
        &self.response
    }

    /// The attendance mask `M`.
    pub fn mask(&self) -> &Mask {
        &self.mask
    }

    /// Verify this signature over `message` against the roster.
    ///
    /// `publics` must be the roster the signature was produced over, in the
    /// same order. The policy bounds how many absences the verifier will
    /// tolerate; too many fail with [`Error::Quorum`].
    pub fn verify(&self, publics: &[C], message: &[u8], policy: Policy) -> Result<()> {
        if publics.is_empty() {
            Err(ConfigError::EmptyRoster)?
        }
        self.mask.check_len(publics.len())?;

        let present = self.mask.count_present();
        let required = match policy {
            Policy::Complete => publics.len(),
            Policy::Threshold(threshold) => threshold,
        };
        if present < required {
            return Err(Error::Quorum { present, required });
        }

        let challenge = C::challenge(&self.commitment, &self.mask, message);
        let mut aggregate_key = C::IDENTITY;
        for (index, public) in publics.iter().enumerate() {
            if !self.mask.is_absent(index) {
                aggregate_key = aggregate_key + *public;
            }
        }

        let lhs = C::GENERATOR.mul(&self.response);
        let rhs = self.commitment + aggregate_key.mul(&challenge);
        if lhs != rhs {
            error!("Collective signature failed verification");
            return Err(Error::InvalidSignature);
        }
        Ok(())
    }

    /// Encode as `C ‖ s ‖ M`: the affine point encoding, the scalar
    /// encoding, and the big-endian mask bitstring.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = self.commitment.to_bytes();
        bytes.extend(self.response.to_bytes());
        bytes.extend(self.mask.as_bytes());
        bytes
    }

    /// Decode a `C ‖ s ‖ M` byte string for a roster of `roster_len` keys.
    pub fn from_bytes(roster_len: usize, bytes: &[u8]) -> Result<Self> {
        let mut parser = ParseBytes::new(bytes.to_vec());
        let commitment = C::try_from_bytes(parser.take_bytes(C::ENCODED_LENGTH)?)?;
        let response = C::Scalar::from_bytes(parser.take_bytes(C::Scalar::ENCODED_LENGTH)?)?
            .ok_or(ConfigError::DeserializationFailed)?;
        let mask = Mask::from_bytes(roster_len, parser.take_rest()?)?;
        Ok(Self {
            commitment,
            response,
            mask,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        curve::TestCurve,
        keys::SecretKey,
        utils::testing::init_testing,
    };

    type Scalar = <TestCurve as CurveTrait>::Scalar;

    /// Assemble a signature by hand: every present node contributes a nonce
    /// commitment and the matching response share.
    fn collectively_sign(
        keys: &[SecretKey<TestCurve>],
        absent: &[usize],
        message: &[u8],
    ) -> CollectiveSignature<TestCurve> {
        let mut mask = Mask::new(keys.len());
        for &index in absent {
            mask.set_absent(index);
        }

        let nonces: Vec<Scalar> = keys.iter().map(|_| Scalar::random()).collect();
        let mut commitment = TestCurve::IDENTITY;
        for (index, nonce) in nonces.iter().enumerate() {
            if !mask.is_absent(index) {
                commitment = commitment + TestCurve::GENERATOR.mul(nonce);
            }
        }

        let challenge = TestCurve::challenge(&commitment, &mask, message);
        let mut response = Scalar::zero();
        for (index, key) in keys.iter().enumerate() {
            if !mask.is_absent(index) {
                response = response.add(&key.respond(&nonces[index], &challenge));
            }
        }

        CollectiveSignature::new(commitment, response, mask)
    }

    fn keys(count: usize) -> Vec<SecretKey<TestCurve>> {
        (0..count).map(|_| SecretKey::random()).collect()
    }

    fn publics(keys: &[SecretKey<TestCurve>]) -> Vec<TestCurve> {
        keys.iter().map(|key| key.public()).collect()
    }

    #[test]
    fn full_attendance_verifies_under_any_policy() {
        let _rng = init_testing();
        let keys = keys(4);
        let signature = collectively_sign(&keys, &[], b"hello");

        let publics = publics(&keys);
        assert!(signature.verify(&publics, b"hello", Policy::Complete).is_ok());
        assert!(signature
            .verify(&publics, b"hello", Policy::Threshold(4))
            .is_ok());
        assert!(signature
            .verify(&publics, b"hello", Policy::Threshold(1))
            .is_ok());
    }

    #[test]
    fn absences_verify_only_within_policy() {
        let _rng = init_testing();
        let keys = keys(4);
        let signature = collectively_sign(&keys, &[1], b"hello");

        let publics = publics(&keys);
        assert!(signature
            .verify(&publics, b"hello", Policy::Threshold(3))
            .is_ok());
        assert_eq!(
            signature.verify(&publics, b"hello", Policy::Complete),
            Err(Error::Quorum {
                present: 3,
                required: 4
            })
        );
    }

    #[test]
    fn wrong_message_is_rejected() {
        let _rng = init_testing();
        let keys = keys(3);
        let signature = collectively_sign(&keys, &[], b"hello");

        assert_eq!(
            signature.verify(&publics(&keys), b"goodbye", Policy::Complete),
            Err(Error::InvalidSignature)
        );
    }

    #[test]
    fn tampered_mask_is_rejected() {
        let _rng = init_testing();
        let keys = keys(3);
        let mut signature = collectively_sign(&keys, &[], b"hello");

        // Claiming a signer was absent breaks both the challenge and the
        // aggregate key.
        signature.mask.set_absent(2);
        assert!(signature
            .verify(&publics(&keys), b"hello", Policy::Threshold(1))
            .is_err());
    }

    #[test]
    fn byte_roundtrip() {
        let _rng = init_testing();
        let keys = keys(5);
        let signature = collectively_sign(&keys, &[2], b"hello");

        let bytes = signature.to_bytes();
        let reconstructed = CollectiveSignature::<TestCurve>::from_bytes(5, &bytes).unwrap();
        assert_eq!(signature, reconstructed);
        assert!(reconstructed
            .verify(&publics(&keys), b"hello", Policy::Threshold(4))
            .is_ok());
    }

    #[test]
    fn truncated_bytes_are_rejected() {
        let _rng = init_testing();
        let keys = keys(3);
        let signature = collectively_sign(&keys, &[], b"hello");

        let bytes = signature.to_bytes();
        assert!(CollectiveSignature::<TestCurve>::from_bytes(3, &bytes[..bytes.len() - 1]).is_err());
    }
}
