// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Per-node aggregation of commitments and responses.
//!
//! Both aggregates must cover exactly the same set of positions as the mask
//! they travel with: a commitment summed here without a matching response
//! later (or vice versa) breaks the verification equation.

use zeroize::Zeroizing;

use crate::{
    curve::{CurveTrait, ScalarTrait},
    errors::Result,
    mask::Mask,
    messages::Received,
    tree::NodeIndex,
};

use super::messages::{Commitment, Response};

/// Generate this node's nonce and fold it, the children's aggregates, and
/// the absences observed this round into one upward commitment.
///
/// Returns the nonce (kept local for the response phase, zeroized on drop)
/// and the commitment to send to the parent. The node's own mask bit stays
/// present; each child's reported mask is ORed in; children in `absent`
/// missed the window and are marked together with their whole subtrees.
pub(crate) fn aggregate_commitments<C: CurveTrait>(
    roster_len: usize,
    committed: &[Received<Commitment<C>>],
    absent: impl IntoIterator<Item = NodeIndex>,
) -> Result<(Zeroizing<C::Scalar>, Commitment<C>)> {
    let nonce = Zeroizing::new(C::Scalar::random());
    let mut aggregate = C::GENERATOR.mul(&nonce);
    let mut mask = Mask::new(roster_len);

    for received in committed {
        received.payload.mask.check_len(roster_len)?;
        aggregate = aggregate + received.payload.commitment;
        mask.or_assign(&received.payload.mask)?;
    }
    for index in absent {
        mask.set_absent(index.as_usize());
    }

    Ok((
        nonce,
        Commitment {
            commitment: aggregate,
            mask,
        },
    ))
}

/// Sum this node's response with its committed children's aggregates.
pub(crate) fn aggregate_responses<C: CurveTrait>(
    own: C::Scalar,
    children: &[Received<Response<C>>],
) -> Response<C> {
    let mut response = own;
    for received in children {
        response.add_assign(received.payload.response);
    }
    Response { response }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{curve::TestCurve, utils::testing::init_testing};

    type Scalar = <TestCurve as CurveTrait>::Scalar;

    fn child_commitment(from: usize, roster_len: usize) -> (Scalar, Received<Commitment<TestCurve>>) {
        let nonce = Scalar::random();
        (
            nonce,
            Received {
                from: NodeIndex::from(from),
                payload: Commitment {
                    commitment: TestCurve::GENERATOR.mul(&nonce),
                    mask: Mask::new(roster_len),
                },
            },
        )
    }

    #[test]
    fn commitment_covers_self_and_children() {
        let _rng = init_testing();
        let (nonce_a, child_a) = child_commitment(2, 7);
        let (nonce_b, child_b) = child_commitment(3, 7);

        let (own_nonce, commitment) =
            aggregate_commitments(7, &[child_a, child_b], std::iter::empty()).unwrap();

        let expected_scalar = own_nonce.add(&nonce_a).add(&nonce_b);
        assert_eq!(
            commitment.commitment,
            TestCurve::GENERATOR.mul(&expected_scalar)
        );
        assert_eq!(commitment.mask.count_present(), 7);
    }

    #[test]
    fn absent_children_and_their_subtrees_are_masked() {
        let _rng = init_testing();
        let (_, child) = child_commitment(2, 7);

        let absent = [NodeIndex::from(3), NodeIndex::from(5)];
        let (_, commitment) = aggregate_commitments(7, &[child], absent).unwrap();

        assert!(commitment.mask.is_absent(3));
        assert!(commitment.mask.is_absent(5));
        assert_eq!(commitment.mask.count_present(), 5);
    }

    #[test]
    fn child_absences_propagate_through_or() {
        let _rng = init_testing();
        let (_, mut child) = child_commitment(2, 7);
        child.payload.mask.set_absent(6);

        let (_, commitment) =
            aggregate_commitments(7, &[child], std::iter::empty()).unwrap();
        assert!(commitment.mask.is_absent(6));
    }

    #[test]
    fn mismatched_child_mask_is_rejected() {
        let _rng = init_testing();
        let (_, child) = child_commitment(2, 5);
        assert!(aggregate_commitments(7, &[child], std::iter::empty()).is_err());
    }

    #[test]
    fn responses_sum() {
        let _rng = init_testing();
        let own = Scalar::random();
        let other = Scalar::random();
        let children = [Received {
            from: NodeIndex::from(2),
            payload: Response::<TestCurve> { response: other },
        }];

        let total = aggregate_responses::<TestCurve>(own, &children);
        assert_eq!(total.response, own.add(&other));
    }
}
