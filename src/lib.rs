// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Tree-structured collective Schnorr signing (CoSi).
//!
//! This crate produces a single compact signature attesting that a quorum of
//! nodes in a committee jointly endorsed a message. A signature is the
//! triple `(C, s, M)`: the aggregate Schnorr commitment, the aggregate
//! response, and an attendance mask recording which roster positions did
//! *not* participate. Anyone holding the roster can verify it offline.
//!
//! # High-level protocol description
//! The committee is spanned by a two-level tree: the node at roster
//! position 0 is the root, its children are *sub-leaders*, and the remaining
//! nodes are partitioned among the sub-leaders. Signing runs the classic
//! four-phase CoSi pattern over each subtree in parallel:
//! - The root's **announcement** of the proposal travels down the tree;
//!   every node starts verifying the proposal in the background.
//! - Schnorr nonce **commitments** travel back up, aggregated at each level
//!   together with an attendance mask. Nodes that are slow, crashed, or
//!   reject the proposal are recorded absent and the run continues.
//! - The root computes the Fiat–Shamir **challenge** binding the aggregate
//!   commitment, the mask, and the message, and sends it down to exactly
//!   the nodes that committed.
//! - Signature-share **responses** travel back up and are summed into `s`.
//!
//! A sub-leader that fails silently is handled specially: the root re-issues
//! its subtree's run once under a replacement sub-leader, so a single
//! failure near the top of the tree costs one node, not a whole branch. The
//! finished signature is emitted only if the number of participants meets
//! the configured threshold.
//!
//! The cryptographic backend is generic over [`CurveTrait`], with secp256k1
//! ([`k256`](crate::k256)) and secp256r1 ([`p256`](crate::p256))
//! instantiations provided.
//!
//! # Example
//! Run a whole committee in-process and verify the result:
//!
//! ```no_run
//! use tss_cosi::{
//!     sub_protocol::accept_all_verifier, Coordinator, LocalCommittee, NodeIndex, Policy,
//!     SigningConfig, TestCurve,
//! };
//!
//! # fn main() -> tss_cosi::Result<()> {
//! let committee = LocalCommittee::<TestCurve>::new(7);
//! let publics = committee.publics();
//! let root_key = committee
//!     .key_share(NodeIndex::ROOT)
//!     .expect("root is in the roster");
//!
//! let coordinator = Coordinator::new(
//!     publics.clone(),
//!     root_key,
//!     SigningConfig::new(7),
//!     accept_all_verifier(),
//!     b"hello".to_vec(),
//!     Vec::new(),
//! )?;
//! let signature = coordinator.run(&mut rand::thread_rng(), &committee)?;
//! signature.verify(&publics, b"hello", Policy::Threshold(5))?;
//! # Ok(())
//! # }
//! ```
//!
//! # 🔒 Secret hygiene
//! Per-run nonces are generated fresh for every run, never serialized or
//! logged, and zeroized on every exit path. Long-term key shares only enter
//! the protocol through the response `s = v + e·x`.

#![warn(missing_docs)]

use std::time::Duration;

mod coordinator;
pub mod curve;
mod errors;
pub mod k256;
mod keys;
mod local;
mod mask;
mod messages;
pub mod p256;
mod signature;
pub mod sub_protocol;
mod tree;
mod utils;

pub use coordinator::{Coordinator, SigningConfig};
pub use curve::{CurveTrait, ScalarTrait, Secp256k1, Secp256r1, TestCurve, TestScalar};
pub use errors::{ConfigError, Error, Result};
pub use keys::SecretKey;
pub use local::LocalCommittee;
pub use mask::Mask;
pub use messages::{Identifier, Message, MessageType, Overlay};
pub use signature::{CollectiveSignature, Policy};
pub use tree::{NodeIndex, SigningTree, SubTree, TreePosition};

/// The smallest timeout a run will accept. Anything shorter cannot cover
/// even a single commitment window and is treated as a configuration error.
pub const MIN_TIMEOUT: Duration = Duration::from_millis(10);
