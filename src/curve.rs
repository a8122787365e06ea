// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Elliptic curve abstraction.
//!
//! Collective signing needs a narrow capability surface from its
//! cryptographic backend: scalar and point arithmetic, a fresh random
//! scalar per run, and a deterministic challenge digest binding the
//! aggregate commitment, the attendance mask, and the message. Everything
//! else stays behind these traits.

use crate::{errors::Result, k256::K256, mask::Mask, p256::P256};
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};
use std::{fmt::Debug, ops::Add};
use zeroize::Zeroize;

/// Generic elliptic curve point.
pub trait CurveTrait:
    'static
    + Clone
    + Copy
    + Debug
    + Send
    + Sync
    + Eq
    + PartialEq
    + Serialize
    + for<'de> Deserialize<'de>
    + Add<Output = Self>
    + Zeroize
    + AsRef<Self>
{
    /// A generator point.
    const GENERATOR: Self;

    /// The identity point, used to initialize the aggregation of
    /// commitments and public keys.
    const IDENTITY: Self;

    /// Length in bytes of the affine point encoding.
    const ENCODED_LENGTH: usize;

    /// The type of scalars.
    type Scalar: ScalarTrait;

    /// Multiply `self` by a [`Self::Scalar`].
    fn mul(&self, scalar: &Self::Scalar) -> Self;

    /// Serialize the point as an affine-encoded byte array.
    fn to_bytes(self) -> Vec<u8>;

    /// Deserialize a point from an affine-encoded byte array.
    fn try_from_bytes(bytes: &[u8]) -> Result<Self>;

    /// Random point.
    fn random() -> Self;

    /// The Fiat–Shamir challenge for one signing run.
    ///
    /// Binds the aggregate commitment, the attendance mask, and the message,
    /// so a signature only verifies against the exact participant set it was
    /// produced with. Deterministic: third-party verifiers recompute it from
    /// the signature alone.
    fn challenge(commitment: &Self, mask: &Mask, message: &[u8]) -> Self::Scalar {
        let digest = Keccak256::new()
            .chain_update(commitment.to_bytes())
            .chain_update(mask.to_bytes())
            .chain_update(message)
            .finalize();
        Self::Scalar::from_digest(digest.into())
    }
}

/// Scalar trait.
pub trait ScalarTrait:
    Sync
    + Send
    + Clone
    + Copy
    + Debug
    + PartialEq
    + Eq
    + Zeroize
    + Serialize
    + for<'de> Deserialize<'de>
    + Add<Output = Self>
    + AsRef<Self>
{
    /// Length in bytes of the scalar encoding.
    const ENCODED_LENGTH: usize;

    /// Return the zero scalar.
    fn zero() -> Self;

    /// Add two scalars.
    fn add(&self, other: &Self) -> Self;

    /// Addition operator such that we can use += syntax.
    fn add_assign(&mut self, other: Self) {
        *self = self.add(other);
    }

    /// Multiply two scalars.
    fn mul(&self, other: &Self) -> Self;

    /// Random scalar.
    fn random() -> Self;

    /// Convert to bytes.
    fn to_bytes(&self) -> Vec<u8>;

    /// Convert from bytes.
    fn from_bytes(bytes: &[u8]) -> Result<Option<Self>>;

    /// Interpret a 32-byte digest as a scalar, reduced mod the curve order.
    fn from_digest(digest: [u8; 32]) -> Self;
}

/// Default curve type.
pub type TestCurve = K256;
//pub type TestCurve = P256;

/// Default scalar type.
pub type TestScalar = k256::Scalar;
//pub type TestScalar = p256::Scalar;

/// K256 curve type.
pub type Secp256k1 = K256;

/// P256 curve type.
pub type Secp256r1 = P256;
