// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! The root-side handle of one sub-protocol instance.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        mpsc::{Receiver, Sender},
        Arc, Mutex, MutexGuard,
    },
    time::Duration,
};

use tracing::{debug, error};

use crate::{
    curve::CurveTrait,
    errors::{ConfigError, Error, Result},
    messages::{Message, MessageType, Overlay, Received},
    tree::SubTree,
    Identifier, MIN_TIMEOUT,
};

use super::{
    messages::{Announcement, Challenge, Commitment, Response, Stop},
    node::InboundSenders,
};

/// Inputs shared by every node of one sub-protocol run.
#[derive(Debug, Clone)]
pub struct SubProtocolParams<C: CurveTrait> {
    /// Fresh identifier for this run.
    pub sid: Identifier,
    /// The byte string being signed. May be empty.
    pub message: Vec<u8>,
    /// Auxiliary bytes for the verification predicate. May be empty.
    pub data: Vec<u8>,
    /// The full roster of public keys, in mask order.
    pub publics: Vec<C>,
    /// The sub-protocol's commitment budget.
    pub timeout: Duration,
}

/// Sender side of the root's three single-value outputs, owned by the
/// sub-protocol root's dispatch task.
pub(crate) struct RootOutputs<C: CurveTrait> {
    pub(crate) subleader_not_responding: Sender<bool>,
    pub(crate) sub_commitment: Sender<Commitment<C>>,
    pub(crate) sub_response: Sender<Response<C>>,
}

/// Instantiates sub-protocols over subtrees.
///
/// This is the overlay seam: an implementation creates the per-node dispatch
/// tasks for every member of `tree`, wires their inbound channels to its
/// transport, and returns the root-side handle. Delivery must be reliable
/// and FIFO per link; link failures surface as commitment-window timeouts.
pub trait SubProtocolLauncher<C: CurveTrait> {
    /// Start the dispatch tasks for one pass over `tree` and hand back the
    /// root's handle. The pass stays idle until [`SubProtocolHandle::start`].
    fn launch(&self, tree: &SubTree, params: SubProtocolParams<C>) -> Result<SubProtocolHandle<C>>;
}

/// The main protocol's interface to one running sub-protocol.
///
/// The three output channels each deliver at most one value per run:
/// the subtree's aggregate commitment, its aggregate response, and the
/// sub-leader-failure signal. Shutdown is idempotent and is also triggered
/// by dropping the handle.
pub struct SubProtocolHandle<C: CurveTrait> {
    sid: Identifier,
    tree: SubTree,
    params: SubProtocolParams<C>,
    /// `None` once shut down: dropping the senders closes the root's inbox.
    root_inbox: Mutex<Option<InboundSenders<C>>>,
    subleader_not_responding: Receiver<bool>,
    sub_commitment: Receiver<Commitment<C>>,
    sub_response: Receiver<Response<C>>,
    overlay: Arc<dyn Overlay>,
    stopped: AtomicBool,
}

impl<C: CurveTrait> SubProtocolHandle<C> {
    pub(crate) fn new(
        tree: SubTree,
        params: SubProtocolParams<C>,
        root_inbox: InboundSenders<C>,
        subleader_not_responding: Receiver<bool>,
        sub_commitment: Receiver<Commitment<C>>,
        sub_response: Receiver<Response<C>>,
        overlay: Arc<dyn Overlay>,
    ) -> Self {
        Self {
            sid: params.sid,
            tree,
            params,
            root_inbox: Mutex::new(Some(root_inbox)),
            subleader_not_responding,
            sub_commitment,
            sub_response,
            overlay,
            stopped: AtomicBool::new(false),
        }
    }

    /// The run this handle controls.
    pub fn sid(&self) -> Identifier {
        self.sid
    }

    /// The subtree this run spans.
    pub fn tree(&self) -> &SubTree {
        &self.tree
    }

    /// Kick off the run by placing the announcement on the sub-protocol
    /// root's inbound channel.
    ///
    /// Valid only at the sub-protocol root (which is where handles exist).
    /// Fails with a [`ConfigError`] if the roster is empty or the timeout is
    /// below [`MIN_TIMEOUT`].
    pub fn start(&self) -> Result<()> {
        if self.params.publics.is_empty() {
            error!("Cannot start a sub-protocol with an empty roster");
            Err(ConfigError::EmptyRoster)?
        }
        if self.params.timeout < MIN_TIMEOUT {
            error!(
                "Cannot start a sub-protocol with an unrealistic timeout ({:?})",
                self.params.timeout
            );
            Err(ConfigError::UnrealisticTimeout {
                requested: self.params.timeout,
                minimum: MIN_TIMEOUT,
            })?
        }

        let payload = Announcement {
            message: self.params.message.clone(),
            data: self.params.data.clone(),
            publics: self.params.publics.clone(),
            timeout: self.params.timeout,
        };
        let inbox = self.inbox_guard();
        let inbox = inbox
            .as_ref()
            .ok_or_else(|| Error::Protocol("sub-protocol has been shut down".into()))?;
        inbox
            .announcement
            .send(Received {
                from: self.tree.root(),
                payload,
            })
            .map_err(|_| Error::Protocol("sub-protocol was shut down before it started".into()))
    }

    /// Deliver the root-computed challenge into this run.
    pub fn send_challenge(&self, challenge: C::Scalar) -> Result<()> {
        let inbox = self.inbox_guard();
        let inbox = inbox
            .as_ref()
            .ok_or_else(|| Error::Protocol("sub-protocol has been shut down".into()))?;
        inbox
            .challenge
            .send(Received {
                from: self.tree.root(),
                payload: Challenge { challenge },
            })
            .map_err(|_| Error::Protocol("sub-protocol was shut down before the challenge".into()))
    }

    /// The subtree's aggregate commitment. Delivers at most one value; the
    /// channel disconnects when the run ends without one.
    pub fn sub_commitment(&self) -> &Receiver<Commitment<C>> {
        &self.sub_commitment
    }

    /// The subtree's aggregate response. Delivers at most one value.
    pub fn sub_response(&self) -> &Receiver<Response<C>> {
        &self.sub_response
    }

    /// Signaled `true` iff the sub-leader delivered no commitment within the
    /// sub-protocol timeout.
    pub fn subleader_not_responding(&self) -> &Receiver<bool> {
        &self.subleader_not_responding
    }

    /// Stop the run: broadcast `Stop` so every member's inbound channels
    /// close, unblocking and terminating their dispatch tasks. Idempotent.
    pub fn shutdown(&self) {
        if self.stopped.swap(true, Ordering::SeqCst) {
            return;
        }
        debug!("Shutting down sub-protocol {}", self.sid);
        let root = self.tree.root();
        for member in self.tree.members().chain(std::iter::once(root)) {
            match Message::new(MessageType::Stop, self.sid, root, member, &Stop) {
                Ok(message) => {
                    let _ = self.overlay.deliver(message);
                }
                Err(_) => debug!("Could not encode a stop message for {member}"),
            }
        }
        // Release our own copies of the root's inbound senders; together
        // with the overlay's, this closes the inbox for good.
        let _ = self.inbox_guard().take();
    }

    fn inbox_guard(&self) -> MutexGuard<'_, Option<InboundSenders<C>>> {
        match self.root_inbox.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<C: CurveTrait> Drop for SubProtocolHandle<C> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
