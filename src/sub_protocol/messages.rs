// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Wire payloads for the four protocol phases.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{
    curve::CurveTrait,
    errors::{Error, Result},
    mask::Mask,
    messages::{deserialize, Message, MessageType},
};

/// The proposal, distributed down the tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Announcement<C: CurveTrait> {
    /// The byte string being signed. May be empty.
    pub message: Vec<u8>,
    /// Auxiliary bytes handed to the verification predicate. May be empty.
    pub data: Vec<u8>,
    /// The full roster of public keys, in mask order.
    pub publics: Vec<C>,
    /// The sub-protocol's commitment budget.
    pub timeout: Duration,
}

impl<C: CurveTrait> TryFrom<&Message> for Announcement<C> {
    type Error = Error;

    fn try_from(message: &Message) -> Result<Self> {
        message.check_type(MessageType::Announcement)?;
        deserialize!(&message.unverified_bytes)
    }
}

/// A subtree's aggregate Schnorr nonce commitment, sent upward.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Commitment<C: CurveTrait> {
    /// Sum of the commitments of every node represented in `mask`.
    pub commitment: C,
    /// Attendance over the full roster; authoritative for the sender's
    /// subtree only.
    pub mask: Mask,
}

impl<C: CurveTrait> TryFrom<&Message> for Commitment<C> {
    type Error = Error;

    fn try_from(message: &Message) -> Result<Self> {
        message.check_type(MessageType::Commitment)?;
        deserialize!(&message.unverified_bytes)
    }
}

/// The Fiat–Shamir challenge, distributed to committed children.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Challenge<C: CurveTrait> {
    /// `e = H(C ‖ M ‖ msg)`, computed once at the overall root.
    pub challenge: C::Scalar,
}

impl<C: CurveTrait> TryFrom<&Message> for Challenge<C> {
    type Error = Error;

    fn try_from(message: &Message) -> Result<Self> {
        message.check_type(MessageType::Challenge)?;
        deserialize!(&message.unverified_bytes)
    }
}

/// A subtree's aggregate signature share, sent upward.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(bound = "")]
pub struct Response<C: CurveTrait> {
    /// Sum of `v + e·x` over every node represented in the subtree's
    /// commitment mask.
    pub response: C::Scalar,
}

impl<C: CurveTrait> TryFrom<&Message> for Response<C> {
    type Error = Error;

    fn try_from(message: &Message) -> Result<Self> {
        message.check_type(MessageType::Response)?;
        deserialize!(&message.unverified_bytes)
    }
}

/// Broadcast teardown marker. Carries no payload.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Stop;
