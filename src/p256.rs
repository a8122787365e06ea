//! P256 functions

use crate::{
    curve::{CurveTrait, ScalarTrait},
    errors::{ConfigError, Result},
};
use generic_array::GenericArray;
use p256::{
    elliptic_curve::{group::GroupEncoding, ops::Reduce, AffinePoint, Field, Group, PrimeField},
    FieldBytes, NistP256, ProjectivePoint, Scalar as P256_Scalar, U256,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::error;
use zeroize::Zeroize;

/// Wrapper around p256::ProjectivePoint so that we can define our own
/// serialization/deserialization for it
///
/// Note that this type derives [`Debug`]; if a [`P256`] is used in a
/// private type, `Debug` should be manually implemented with the field of this
/// type explicitly redacted!
#[derive(Eq, PartialEq, Debug, Clone, Copy, Zeroize)]
pub struct P256(pub p256::ProjectivePoint);

impl AsRef<P256> for P256 {
    fn as_ref(&self) -> &P256 {
        self
    }
}

impl P256 {
    pub(crate) const GENERATOR: Self = P256(p256::ProjectivePoint::GENERATOR);
    /// The identity point, used to initialize the aggregation of commitments
    /// and public keys.
    pub const IDENTITY: Self = P256(p256::ProjectivePoint::IDENTITY);

    pub(crate) fn multiply_by_scalar(&self, point: &P256_Scalar) -> Self {
        Self(self.0 * point)
    }

    /// Serialize the `CurvePoint` as an affine-encoded secp256r1 byte array.
    pub(crate) fn to_bytes(self) -> Vec<u8> {
        let mut generic_array = AffinePoint::<NistP256>::from(self.0).to_bytes();
        let bytes = generic_array.to_vec();
        generic_array.zeroize();
        bytes
    }

    pub(crate) fn try_from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut fixed_len_bytes: [u8; 33] = bytes.try_into().map_err(|_| {
            error!("Failed to encode bytes as a curve point");
            ConfigError::DeserializationFailed
        })?;

        let point: Option<AffinePoint<NistP256>> =
            AffinePoint::<NistP256>::from_bytes(&fixed_len_bytes.into()).into();
        fixed_len_bytes.zeroize();

        match point {
            Some(point) => Ok(Self(point.into())),
            None => {
                error!("Failed to encode bytes as a curve point");
                Err(ConfigError::DeserializationFailed)?
            }
        }
    }
}

impl std::ops::Add for P256 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl From<p256::ProjectivePoint> for P256 {
    fn from(p: p256::ProjectivePoint) -> Self {
        Self(p)
    }
}

impl Serialize for P256 {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let afp = AffinePoint::<NistP256>::from(self.0);
        afp.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for P256 {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let p = AffinePoint::<NistP256>::deserialize(deserializer)?;
        Ok(Self(p.into()))
    }
}

impl CurveTrait for P256 {
    const GENERATOR: Self = P256::GENERATOR;
    const IDENTITY: Self = P256::IDENTITY;
    const ENCODED_LENGTH: usize = 33;
    type Scalar = P256_Scalar;

    fn mul(&self, scalar: &Self::Scalar) -> Self {
        self.multiply_by_scalar(scalar)
    }

    fn to_bytes(self) -> Vec<u8> {
        P256::to_bytes(self)
    }

    fn try_from_bytes(bytes: &[u8]) -> Result<Self> {
        P256::try_from_bytes(bytes)
    }

    // Random point.
    fn random() -> Self {
        let mut rng = rand::thread_rng();
        let random_point = ProjectivePoint::random(&mut rng);
        P256(random_point)
    }
}

impl ScalarTrait for P256_Scalar {
    const ENCODED_LENGTH: usize = 32;

    fn zero() -> Self {
        P256_Scalar::ZERO
    }

    fn add(&self, other: &Self) -> Self {
        p256::Scalar::add(self, other)
    }

    fn mul(&self, other: &Self) -> Self {
        <P256_Scalar as std::ops::Mul>::mul(*self, *other)
    }

    fn random() -> Self {
        let rng = rand::thread_rng();
        <P256_Scalar as Field>::random(rng)
    }

    fn to_bytes(&self) -> Vec<u8> {
        P256_Scalar::to_bytes(self).to_vec()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Option<Self>> {
        if bytes.len() != Self::ENCODED_LENGTH {
            error!("Failed to encode bytes as a scalar: wrong length");
            Err(ConfigError::DeserializationFailed)?
        }
        Ok(<P256_Scalar as PrimeField>::from_repr(GenericArray::clone_from_slice(bytes)).into())
    }

    fn from_digest(digest: [u8; 32]) -> Self {
        <P256_Scalar as Reduce<U256>>::reduce_bytes(&FieldBytes::from(digest))
    }
}

#[cfg(test)]
mod curve_point_tests {
    use crate::{p256::P256, utils::testing::init_testing};
    use p256::elliptic_curve::Group;

    #[test]
    fn curve_point_byte_conversion_works() {
        let rng = &mut init_testing();
        let point = P256(p256::ProjectivePoint::random(rng));
        let bytes = point.to_bytes();
        let reconstructed = P256::try_from_bytes(&bytes).unwrap();
        assert_eq!(point, reconstructed);
    }
}
