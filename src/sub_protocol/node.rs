// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! The per-node dispatch state machine.
//!
//! One dispatch task runs per node per sub-protocol instance. It blocks on
//! the phase channels strictly in protocol order, so out-of-phase traffic
//! can never advance the state machine. A channel whose senders have been
//! dropped (shutdown, or a `Stop` handled by the overlay) unblocks the task
//! and terminates it cleanly from any suspension point.

use std::{
    sync::{
        mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError},
        Arc,
    },
    thread,
    time::Instant,
};

use serde::Serialize;
use tracing::{debug, error, info};
use zeroize::Zeroizing;

use crate::{
    curve::CurveTrait,
    errors::{ConfigError, Error, Result},
    keys::SecretKey,
    messages::{Message, MessageType, Overlay, Received},
    tree::{NodeIndex, TreePosition},
    Identifier,
};

use super::{
    aggregate::{aggregate_commitments, aggregate_responses},
    handle::RootOutputs,
    messages::{Announcement, Challenge, Commitment, Response},
};

/// The proposal verification predicate: `verify(msg, data) → bool`.
///
/// May be arbitrarily expensive; each node runs it on a background thread so
/// its latency overlaps with the commitment window.
pub type VerificationFn = Arc<dyn Fn(&[u8], &[u8]) -> bool + Send + Sync>;

/// A verification predicate that accepts every proposal.
pub fn accept_all_verifier() -> VerificationFn {
    Arc::new(|_, _| true)
}

/// Inbound phase channels, receiver side. Owned by the dispatch task.
pub(crate) struct Inbound<C: CurveTrait> {
    pub(crate) announcement: Receiver<Received<Announcement<C>>>,
    pub(crate) commitment: Receiver<Received<Commitment<C>>>,
    pub(crate) challenge: Receiver<Received<Challenge<C>>>,
    pub(crate) response: Receiver<Received<Response<C>>>,
}

/// Inbound phase channels, sender side. Held by the overlay; dropping them
/// closes the node's inbox and unblocks its dispatch task.
#[derive(Clone)]
pub(crate) struct InboundSenders<C: CurveTrait> {
    pub(crate) announcement: Sender<Received<Announcement<C>>>,
    pub(crate) commitment: Sender<Received<Commitment<C>>>,
    pub(crate) challenge: Sender<Received<Challenge<C>>>,
    pub(crate) response: Sender<Received<Response<C>>>,
}

/// Create one node's inbox.
pub(crate) fn inbound_channels<C: CurveTrait>() -> (InboundSenders<C>, Inbound<C>) {
    let (announcement_tx, announcement_rx) = mpsc::channel();
    let (commitment_tx, commitment_rx) = mpsc::channel();
    let (challenge_tx, challenge_rx) = mpsc::channel();
    let (response_tx, response_rx) = mpsc::channel();
    (
        InboundSenders {
            announcement: announcement_tx,
            commitment: commitment_tx,
            challenge: challenge_tx,
            response: response_tx,
        },
        Inbound {
            announcement: announcement_rx,
            commitment: commitment_rx,
            challenge: challenge_rx,
            response: response_rx,
        },
    )
}

/// One node's instance of a sub-protocol run.
pub(crate) struct SubProtocolNode<C: CurveTrait> {
    pub(crate) sid: Identifier,
    pub(crate) position: TreePosition,
    pub(crate) overlay: Arc<dyn Overlay>,
    pub(crate) inbound: Inbound<C>,
    /// Present only at the sub-protocol root.
    pub(crate) outputs: Option<RootOutputs<C>>,
    /// Absent at the sub-protocol root, which contributes its share through
    /// the main protocol instead.
    pub(crate) secret_key: Option<SecretKey<C>>,
    pub(crate) verify: VerificationFn,
}

impl<C: CurveTrait> SubProtocolNode<C> {
    /// Run the four-phase state machine to completion.
    ///
    /// Returns `Ok(())` on success and on every absorbed outcome (shutdown,
    /// timeout-elected abandonment, own verification failure); returns an
    /// error only on a protocol violation, which is fatal to this
    /// sub-protocol.
    pub(crate) fn dispatch(self) -> Result<()> {
        // ----- Announcement -----
        let announcement = match self.inbound.announcement.recv() {
            Ok(received) => received,
            // Shut down before the run started.
            Err(_) => return Ok(()),
        };
        debug!("{} received announcement", self.position.me);
        let proposal = announcement.payload;
        if proposal.publics.is_empty() {
            error!("Announcement carried an empty roster");
            return Err(ConfigError::EmptyRoster.into());
        }
        let roster_len = proposal.publics.len();

        // Start verification in the background. The sub-protocol root skips
        // it: the main protocol verifies the proposal itself.
        let (verify_tx, verify_rx) = mpsc::channel();
        if !self.position.is_root() {
            let verify = self.verify.clone();
            let message = proposal.message.clone();
            let data = proposal.data.clone();
            thread::spawn(move || {
                let _ = verify_tx.send(verify(&message, &data));
            });
        }

        self.send_to_children(MessageType::Announcement, &proposal)?;

        // ----- Commitment -----
        let mut received_commitments: Vec<Received<Commitment<C>>> = Vec::new();
        if self.position.is_root() {
            // One commitment expected, from the sub-leader. The full
            // sub-protocol budget applies here; interior nodes use half of
            // it so they finish before this window closes.
            match self.inbound.commitment.recv_timeout(proposal.timeout) {
                Ok(received) => received_commitments.push(received),
                Err(RecvTimeoutError::Timeout) => {
                    info!(
                        "Sub-leader delivered no commitment within {:?}",
                        proposal.timeout
                    );
                    if let Some(outputs) = self.outputs.as_ref() {
                        let _ = outputs.subleader_not_responding.send(true);
                    }
                    return Ok(());
                }
                Err(RecvTimeoutError::Disconnected) => return Ok(()),
            }
            match self.inbound.commitment.try_recv() {
                Ok(extra) => {
                    error!("Sub-protocol root received a second commitment");
                    return Err(Error::Protocol(format!(
                        "expected exactly one commitment at the sub-protocol root, \
                         got another from {}",
                        extra.from
                    )));
                }
                Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => {}
            }
        } else {
            let deadline = Instant::now() + proposal.timeout / 2;
            for _ in 0..self.position.children.len() {
                match recv_deadline(&self.inbound.commitment, deadline) {
                    Ok(received) => received_commitments.push(received),
                    Err(RecvTimeoutError::Timeout) => break,
                    Err(RecvTimeoutError::Disconnected) => return Ok(()),
                }
            }
        }

        // Every commitment must come from a distinct direct child.
        let mut committed_children: Vec<NodeIndex> = Vec::new();
        for received in &received_commitments {
            if self.position.child(received.from).is_none() {
                error!("{} received a commitment from a non-child", self.position.me);
                return Err(Error::Protocol(format!(
                    "received a commitment from {}, which is not a child",
                    received.from
                )));
            }
            if committed_children.contains(&received.from) {
                error!("{} received a duplicate commitment", self.position.me);
                return Err(Error::Protocol(format!(
                    "received a duplicate commitment from {}",
                    received.from
                )));
            }
            committed_children.push(received.from);
        }
        debug!(
            "{} finished receiving commitments, {} commitment(s) received",
            self.position.me,
            received_commitments.len()
        );

        let mut nonce: Option<Zeroizing<C::Scalar>> = None;
        if self.position.is_root() {
            // Hand the subtree's aggregate to the main protocol.
            let received = received_commitments.pop().ok_or_else(|| {
                Error::Protocol("expected exactly one commitment at the sub-protocol root".into())
            })?;
            let Some(outputs) = self.outputs.as_ref() else {
                error!("Sub-protocol root is missing its output channels");
                return Err(Error::Protocol(
                    "sub-protocol root has no output channels".into(),
                ));
            };
            let _ = outputs.sub_commitment.send(received.payload);
        } else {
            // Do not commit if the proposal fails verification: silence
            // here makes the parent record this whole branch absent.
            let verdict = verify_rx.recv().unwrap_or(false);
            if !verdict {
                info!("{} rejected the proposal, terminating", self.position.me);
                return Ok(());
            }

            let absent = self
                .position
                .children
                .iter()
                .filter(|child| !committed_children.contains(&child.index))
                .flat_map(|child| child.covered());
            let (generated, commitment) =
                aggregate_commitments(roster_len, &received_commitments, absent)?;
            nonce = Some(generated);
            self.send_to_parent(MessageType::Commitment, &commitment)?;
        }

        // ----- Challenge -----
        let challenge = match self.inbound.challenge.recv() {
            Ok(received) => received,
            Err(_) => return Ok(()),
        };
        debug!("{} received challenge", self.position.me);
        for &child in &committed_children {
            self.send_to(child, MessageType::Challenge, &challenge.payload)?;
        }

        // ----- Response -----
        // No timeout here: anyone who committed has pledged to respond.
        let mut responses: Vec<Received<Response<C>>> = Vec::new();
        for _ in 0..committed_children.len() {
            let received = match self.inbound.response.recv() {
                Ok(received) => received,
                Err(_) => return Ok(()),
            };
            if !committed_children.contains(&received.from) {
                error!("{} received a response from a non-committed node", self.position.me);
                return Err(Error::Protocol(format!(
                    "received a response from {}, which did not commit",
                    received.from
                )));
            }
            if responses.iter().any(|r| r.from == received.from) {
                error!("{} received a duplicate response", self.position.me);
                return Err(Error::Protocol(format!(
                    "received a duplicate response from {}",
                    received.from
                )));
            }
            responses.push(received);
        }
        debug!(
            "{} received all {} response(s)",
            self.position.me,
            responses.len()
        );

        if self.position.is_root() {
            let received = responses.pop().ok_or_else(|| {
                Error::Protocol("expected exactly one response at the sub-protocol root".into())
            })?;
            let Some(outputs) = self.outputs.as_ref() else {
                return Err(Error::Protocol(
                    "sub-protocol root has no output channels".into(),
                ));
            };
            let _ = outputs.sub_response.send(received.payload);
        } else {
            let nonce = nonce.ok_or_else(|| {
                Error::Protocol("no nonce was generated before the response phase".into())
            })?;
            let Some(secret_key) = self.secret_key.as_ref() else {
                error!("{} has no secret key share", self.position.me);
                return Err(Error::Protocol("node has no secret key share".into()));
            };
            let own = secret_key.respond(&nonce, &challenge.payload.challenge);
            // The nonce is spent; it zeroizes as it drops here.
            drop(nonce);
            let response = aggregate_responses::<C>(own, &responses);
            self.send_to_parent(MessageType::Response, &response)?;
        }

        Ok(())
    }

    fn send_to(
        &self,
        to: NodeIndex,
        message_type: MessageType,
        payload: &impl Serialize,
    ) -> Result<()> {
        let message = Message::new(message_type, self.sid, self.position.me, to, payload)?;
        self.overlay.deliver(message)
    }

    fn send_to_children(&self, message_type: MessageType, payload: &impl Serialize) -> Result<()> {
        for child in &self.position.children {
            self.send_to(child.index, message_type, payload)?;
        }
        Ok(())
    }

    fn send_to_parent(&self, message_type: MessageType, payload: &impl Serialize) -> Result<()> {
        let parent = self.position.parent.ok_or_else(|| {
            Error::Protocol("the sub-protocol root has no parent to report to".into())
        })?;
        self.send_to(parent, message_type, payload)
    }
}

/// Like `recv_timeout`, but against a fixed deadline, so a sequence of
/// receives shares one window.
fn recv_deadline<T>(
    receiver: &Receiver<T>,
    deadline: Instant,
) -> std::result::Result<T, RecvTimeoutError> {
    receiver.recv_timeout(deadline.saturating_duration_since(Instant::now()))
}
