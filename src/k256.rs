//! K256 functions

use crate::{
    curve::{CurveTrait, ScalarTrait},
    errors::{ConfigError, Result},
};
use generic_array::GenericArray;
use k256::{
    elliptic_curve::{group::GroupEncoding, ops::Reduce, AffinePoint, Field, Group, PrimeField},
    FieldBytes, ProjectivePoint, Scalar as K256_Scalar, U256,
};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tracing::error;
use zeroize::Zeroize;

/// Wrapper around k256::ProjectivePoint so that we can define our own
/// serialization/deserialization for it
///
/// Note that this type derives [`Debug`]; if a [`K256`] is used in a
/// private type, `Debug` should be manually implemented with the field of this
/// type explicitly redacted!
#[derive(Eq, PartialEq, Debug, Clone, Copy, Zeroize)]
pub struct K256(pub k256::ProjectivePoint);

impl AsRef<K256> for K256 {
    fn as_ref(&self) -> &K256 {
        self
    }
}

impl K256 {
    pub(crate) const GENERATOR: Self = K256(k256::ProjectivePoint::GENERATOR);
    /// The identity point, used to initialize the aggregation of commitments
    /// and public keys.
    pub const IDENTITY: Self = K256(k256::ProjectivePoint::IDENTITY);

    pub(crate) fn multiply_by_scalar(&self, point: &K256_Scalar) -> Self {
        Self(self.0 * point)
    }

    /// Serialize the `CurvePoint` as an affine-encoded secp256k1 byte array.
    pub(crate) fn to_bytes(self) -> Vec<u8> {
        let mut generic_array = AffinePoint::<k256::Secp256k1>::from(self.0).to_bytes();
        let bytes = generic_array.to_vec();
        generic_array.zeroize();
        bytes
    }

    pub(crate) fn try_from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut fixed_len_bytes: [u8; 33] = bytes.try_into().map_err(|_| {
            error!("Failed to encode bytes as a curve point");
            ConfigError::DeserializationFailed
        })?;

        let point: Option<AffinePoint<k256::Secp256k1>> =
            AffinePoint::<k256::Secp256k1>::from_bytes(&fixed_len_bytes.into()).into();
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

impl std::ops::Add for K256 {
    type Output = Self;

    fn add(self, rhs: Self) -> Self::Output {
        Self(self.0 + rhs.0)
    }
}

impl From<k256::ProjectivePoint> for K256 {
    fn from(p: k256::ProjectivePoint) -> Self {
        Self(p)
    }
}

impl Serialize for K256 {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let afp = AffinePoint::<k256::Secp256k1>::from(self.0);
        afp.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for K256 {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let p = AffinePoint::<k256::Secp256k1>::deserialize(deserializer)?;
        Ok(Self(p.into()))
    }
}

impl CurveTrait for K256 {
    const GENERATOR: Self = K256::GENERATOR;
    const IDENTITY: Self = K256::IDENTITY;
    const ENCODED_LENGTH: usize = 33;
    type Scalar = K256_Scalar;

    fn mul(&self, scalar: &Self::Scalar) -> Self {
        self.multiply_by_scalar(scalar)
    }

    fn to_bytes(self) -> Vec<u8> {
        K256::to_bytes(self)
    }

    fn try_from_bytes(bytes: &[u8]) -> Result<Self> {
        K256::try_from_bytes(bytes)
    }

    // Random point.
    fn random() -> Self {
        let mut rng = rand::thread_rng();
        let random_point = ProjectivePoint::random(&mut rng);
        K256(random_point)
    }
}

impl ScalarTrait for K256_Scalar {
    const ENCODED_LENGTH: usize = 32;

    fn zero() -> Self {
        K256_Scalar::ZERO
    }

    fn add(&self, other: &Self) -> Self {
        k256::Scalar::add(self, other)
    }

    fn mul(&self, other: &Self) -> Self {
        k256::Scalar::mul(self, other)
    }

    fn random() -> Self {
        let rng = rand::thread_rng();
        <K256_Scalar as Field>::random(rng)
    }

    fn to_bytes(&self) -> Vec<u8> {
        K256_Scalar::to_bytes(self).to_vec()
    }

    fn from_bytes(bytes: &[u8]) -> Result<Option<Self>> {
        if bytes.len() != Self::ENCODED_LENGTH {
            error!("Failed to encode bytes as a scalar: wrong length");
            Err(ConfigError::DeserializationFailed)?
        }
        Ok(<K256_Scalar as PrimeField>::from_repr(GenericArray::clone_from_slice(bytes)).into())
    }

    fn from_digest(digest: [u8; 32]) -> Self {
        <K256_Scalar as Reduce<U256>>::reduce_bytes(&FieldBytes::from(digest))
    }
}

#[cfg(test)]
mod curve_point_tests {
    use crate::{
        curve::{CurveTrait, ScalarTrait},
        k256::K256,
        utils::testing::init_testing,
    };
    use k256::elliptic_curve::Group;

    #[test]
    fn curve_point_byte_conversion_works() {
        let rng = &mut init_testing();
        let point = K256(k256::ProjectivePoint::random(rng));
        let bytes = point.to_bytes();
        let reconstructed = K256::try_from_bytes(&bytes).unwrap();
        assert_eq!(point, reconstructed);
    }

    #[test]
    fn scalar_byte_conversion_works() {
        let _rng = init_testing();
        let scalar = <K256 as CurveTrait>::Scalar::random();
        let bytes = scalar.to_bytes();
        let reconstructed = <K256 as CurveTrait>::Scalar::from_bytes(&bytes)
            .unwrap()
            .unwrap();
        assert_eq!(scalar, reconstructed);
    }
}
