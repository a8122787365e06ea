// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Long-term signing key shares.

use std::fmt::Debug;

use zeroize::Zeroizing;

use crate::curve::{CurveTrait, ScalarTrait};

/// A node's long-term secret key share.
///
/// The share never leaves the node: it only ever enters the protocol through
/// the response `s = v + e·x`. It is zeroized on drop.
#[derive(Clone)]
pub struct SecretKey<C: CurveTrait>(Zeroizing<C::Scalar>);

impl<C: CurveTrait> SecretKey<C> {
    /// Sample a fresh secret key share.
    pub fn random() -> Self {
        Self(Zeroizing::new(C::Scalar::random()))
    }

    /// The public key corresponding to this share.
    pub fn public(&self) -> C {
        C::GENERATOR.mul(&self.0)
    }

    /// Compute this node's response to a challenge, consuming the per-run
    /// nonce `v`: `s = v + e·x`.
    pub(crate) fn respond(&self, nonce: &C::Scalar, challenge: &C::Scalar) -> C::Scalar {
        nonce.add(&challenge.mul(&self.0))
    }
}

impl<C: CurveTrait> Debug for SecretKey<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SecretKey([redacted])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{curve::TestCurve, utils::testing::init_testing};

    #[test]
    fn public_key_is_generator_times_share() {
        let _rng = init_testing();
        let key = SecretKey::<TestCurve>::random();
        let public = key.public();
        assert_eq!(public, TestCurve::GENERATOR.mul(&key.0));
    }

    #[test]
    fn response_follows_schnorr_equation() {
        let _rng = init_testing();
        let key = SecretKey::<TestCurve>::random();
        let nonce = <TestCurve as CurveTrait>::Scalar::random();
        let challenge = <TestCurve as CurveTrait>::Scalar::random();

        let response = key.respond(&nonce, &challenge);

        // s·G == v·G + e·(x·G)
        let lhs = TestCurve::GENERATOR.mul(&response);
        let rhs = TestCurve::GENERATOR.mul(&nonce) + key.public().mul(&challenge);
        assert_eq!(lhs, rhs);
    }
}
