// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! One four-phase signing pass over a single subtree.
//!
//! A sub-protocol runs the Announcement → Commitment → Challenge → Response
//! pattern over one subtree: the overall root acts as the sub-protocol root,
//! its only child is the subtree's sub-leader, and the sub-leader fans out
//! to its leaves. Every node runs the same dispatch state machine,
//! parameterized by its position:
//!
//! - The **Announcement** travels down; each node records the proposal and
//!   starts verifying it in the background while commitments are gathered.
//! - **Commitments** travel up within a bounded window: the sub-protocol
//!   root waits the full sub-protocol timeout, interior nodes wait half of
//!   it so they are guaranteed to finish before their parent gives up.
//!   Children that miss the window are recorded absent in the attendance
//!   mask and the pass continues without them.
//! - The **Challenge** computed by the main protocol travels down, but only
//!   to children that actually committed.
//! - **Responses** travel up and are summed; a committed child that fails
//!   to respond is a protocol violation, not a timeout.
//!
//! The sub-protocol root reports to the main protocol through three
//! single-value outputs: the subtree's aggregate commitment, its aggregate
//! response, and a sub-leader-failure signal that lets the main protocol
//! re-issue the pass with a replacement sub-leader.

mod aggregate;
mod handle;
mod messages;
mod node;

pub use handle::{SubProtocolHandle, SubProtocolLauncher, SubProtocolParams};
pub use messages::{Announcement, Challenge, Commitment, Response, Stop};
pub use node::{accept_all_verifier, VerificationFn};

pub(crate) use handle::RootOutputs;
pub(crate) use node::{inbound_channels, InboundSenders, SubProtocolNode};
