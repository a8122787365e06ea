// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Message envelopes passed along the signing tree.
//!
//! Every message carries its phase, the run [`Identifier`], and the sender
//! and recipient roster positions. Payload bytes stay unparsed inside the
//! envelope until the receiving node checks the phase and deserializes them
//! into the concrete payload type.

use rand::{CryptoRng, Rng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter};
use tracing::error;

use crate::{
    errors::{Error, Result},
    tree::NodeIndex,
};

/// Serialize a payload into envelope bytes.
macro_rules! serialize {
    ($x:expr) => {{
        bincode::serialize($x).map_err(|_| $crate::errors::Error::SerializationFailed)
    }};
}

/// Deserialize envelope bytes into a payload type.
macro_rules! deserialize {
    ($x:expr) => {{
        bincode::deserialize($x).map_err(|_| {
            $crate::errors::Error::Config($crate::errors::ConfigError::DeserializationFailed)
        })
    }};
}

pub(crate) use deserialize;
pub(crate) use serialize;

/// Identifies a single protocol run.
///
/// Freshly sampled for every run (and for every retried sub-protocol), so
/// stray messages from an abandoned run can never be routed into a live one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier(u128);

impl Identifier {
    /// Sample a fresh run identifier.
    pub fn random<R: RngCore + CryptoRng>(rng: &mut R) -> Self {
        Self(rng.gen())
    }
}

impl Display for Identifier {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:#034x}", self.0)
    }
}

/// The protocol phase a message belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Downward proposal distribution.
    Announcement,
    /// Upward Schnorr nonce commitments with attendance masks.
    Commitment,
    /// Downward Fiat–Shamir challenge.
    Challenge,
    /// Upward Schnorr signature shares.
    Response,
    /// Broadcast teardown.
    Stop,
}

/// An envelope addressed to one node of the signing tree.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    message_type: MessageType,
    sid: Identifier,
    from: NodeIndex,
    to: NodeIndex,
    /// Payload bytes; not validated until the recipient parses them against
    /// the phase it expects.
    pub(crate) unverified_bytes: Vec<u8>,
}

impl Message {
    /// Pack a payload into an envelope.
    pub(crate) fn new(
        message_type: MessageType,
        sid: Identifier,
        from: NodeIndex,
        to: NodeIndex,
        payload: &impl Serialize,
    ) -> Result<Self> {
        Ok(Self {
            message_type,
            sid,
            from,
            to,
            unverified_bytes: serialize!(payload)?,
        })
    }

    /// The phase this message belongs to.
    pub fn message_type(&self) -> MessageType {
        self.message_type
    }

    /// The run this message belongs to.
    pub fn sid(&self) -> Identifier {
        self.sid
    }

    /// Roster position of the sender.
    pub fn from(&self) -> NodeIndex {
        self.from
    }

    /// Roster position of the recipient.
    pub fn to(&self) -> NodeIndex {
        self.to
    }

    /// Fail if the message does not belong to the expected phase.
    pub(crate) fn check_type(&self, expected: MessageType) -> Result<()> {
        if self.message_type != expected {
            error!(
                "A message was misrouted: expected {:?}, got {:?}",
                expected, self.message_type
            );
            return Err(Error::Protocol(format!(
                "expected a {expected:?} message, got {:?}",
                self.message_type
            )));
        }
        Ok(())
    }
}

/// Reliable per-link delivery of envelopes along the signing tree.
///
/// Implementations route by the envelope's run identifier and recipient, and
/// must preserve FIFO order per sender/recipient pair. Delivering to a
/// recipient that has already shut down is not an error; the envelope is
/// dropped. A [`MessageType::Stop`] envelope closes the recipient's inbound
/// channels.
pub trait Overlay: Send + Sync {
    /// Deliver one envelope.
    fn deliver(&self, message: Message) -> Result<()>;
}

/// A parsed payload together with the roster position it came from.
///
/// Phase channels carry these so the state machine can validate the sender
/// against the tree before using the payload.
#[derive(Debug, Clone)]
pub(crate) struct Received<T> {
    pub(crate) from: NodeIndex,
    pub(crate) payload: T,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::testing::init_testing;

    #[test]
    fn check_type_rejects_other_phases() {
        let mut rng = init_testing();
        let sid = Identifier::random(&mut rng);
        let message = Message::new(
            MessageType::Challenge,
            sid,
            NodeIndex::from(0),
            NodeIndex::from(1),
            &42u8,
        )
        .unwrap();

        assert!(message.check_type(MessageType::Challenge).is_ok());
        assert!(message.check_type(MessageType::Response).is_err());
    }

    #[test]
    fn identifiers_are_distinct_across_runs() {
        let mut rng = init_testing();
        let a = Identifier::random(&mut rng);
        let b = Identifier::random(&mut rng);
        assert_ne!(a, b);
    }
}
