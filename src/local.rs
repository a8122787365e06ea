// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! An in-process committee.
//!
//! [`LocalCommittee`] runs every roster member inside the current process:
//! one dispatch thread per member per sub-protocol, with envelopes routed
//! between them by run identifier and recipient. It is the crate's reference
//! overlay, used by the tests and by deployments that co-locate a whole
//! committee; networked deployments implement [`SubProtocolLauncher`] over
//! their own transport instead.
//!
//! Members can be muted (they receive nothing and send nothing, simulating
//! a crashed node) or given a custom verification predicate, which is how
//! the fault-injection tests drive the protocol's partial-failure paths.

use std::{
    collections::HashMap,
    sync::{mpsc, Arc, Mutex, MutexGuard},
    thread,
};

use tracing::{debug, error};

use crate::{
    curve::CurveTrait,
    errors::{Error, Result},
    keys::SecretKey,
    messages::{Message, MessageType, Overlay, Received},
    sub_protocol::{
        accept_all_verifier, inbound_channels, Announcement, Challenge, Commitment,
        InboundSenders, Response, RootOutputs, SubProtocolHandle, SubProtocolLauncher,
        SubProtocolNode, SubProtocolParams, VerificationFn,
    },
    tree::{NodeIndex, SubTree},
    Identifier,
};

struct Member<C: CurveTrait> {
    secret_key: SecretKey<C>,
    verify: VerificationFn,
    muted: bool,
}

/// A whole signing committee hosted in one process.
pub struct LocalCommittee<C: CurveTrait> {
    members: Vec<Member<C>>,
    router: Arc<Router<C>>,
}

impl<C: CurveTrait> LocalCommittee<C> {
    /// Create a committee of `size` members with fresh key shares and
    /// always-accepting verification.
    pub fn new(size: usize) -> Self {
        let members = (0..size)
            .map(|_| Member {
                secret_key: SecretKey::random(),
                verify: accept_all_verifier(),
                muted: false,
            })
            .collect();
        Self {
            members,
            router: Arc::new(Router {
                inboxes: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The members' public keys, in roster order.
    pub fn publics(&self) -> Vec<C> {
        self.members
            .iter()
            .map(|member| member.secret_key.public())
            .collect()
    }

    /// A member's long-term key share, or `None` outside the roster.
    pub fn key_share(&self, node: NodeIndex) -> Option<SecretKey<C>> {
        self.members
            .get(node.as_usize())
            .map(|member| member.secret_key.clone())
    }

    /// Replace a member's verification predicate.
    pub fn set_verifier(&mut self, node: NodeIndex, verify: VerificationFn) {
        if let Some(member) = self.members.get_mut(node.as_usize()) {
            member.verify = verify;
        }
    }

    /// Silence a member entirely: it neither receives nor sends anything,
    /// as if its process had crashed before the run.
    pub fn mute(&mut self, node: NodeIndex) {
        if let Some(member) = self.members.get_mut(node.as_usize()) {
            member.muted = true;
        }
    }
}

impl<C: CurveTrait> SubProtocolLauncher<C> for LocalCommittee<C> {
    fn launch(&self, tree: &SubTree, params: SubProtocolParams<C>) -> Result<SubProtocolHandle<C>> {
        let (not_responding_tx, not_responding_rx) = mpsc::channel();
        let (sub_commitment_tx, sub_commitment_rx) = mpsc::channel();
        let (sub_response_tx, sub_response_rx) = mpsc::channel();

        let root = tree.root();
        let mut root_inbox = None;
        for node in tree.members().chain(std::iter::once(root)) {
            let member = self.members.get(node.as_usize()).ok_or_else(|| {
                error!("{node} is outside this committee");
                Error::Protocol(format!("{node} is outside this committee"))
            })?;
            let is_root = node == root;
            if member.muted && !is_root {
                continue;
            }

            let (senders, inbound) = inbound_channels::<C>();
            self.router.register(params.sid, node, senders.clone());
            let position = tree.position(node).ok_or_else(|| {
                Error::Protocol(format!("{node} has no position in the subtree"))
            })?;
            let overlay: Arc<dyn Overlay> = self.router.clone();
            let instance = SubProtocolNode {
                sid: params.sid,
                position,
                overlay,
                inbound,
                outputs: if is_root {
                    Some(RootOutputs {
                        subleader_not_responding: not_responding_tx.clone(),
                        sub_commitment: sub_commitment_tx.clone(),
                        sub_response: sub_response_tx.clone(),
                    })
                } else {
                    None
                },
                secret_key: if is_root {
                    None
                } else {
                    Some(member.secret_key.clone())
                },
                verify: member.verify.clone(),
            };
            if is_root {
                root_inbox = Some(senders);
            }
            thread::spawn(move || {
                if let Err(error) = instance.dispatch() {
                    error!("Sub-protocol dispatch failed: {error}");
                }
            });
        }

        let root_inbox = root_inbox.ok_or_else(|| {
            Error::Protocol("the sub-protocol root was not instantiated".into())
        })?;
        let overlay: Arc<dyn Overlay> = self.router.clone();
        Ok(SubProtocolHandle::new(
            tree.clone(),
            params,
            root_inbox,
            not_responding_rx,
            sub_commitment_rx,
            sub_response_rx,
            overlay,
        ))
    }
}

/// Routes envelopes to per-(run, node) inboxes.
struct Router<C: CurveTrait> {
    inboxes: Mutex<HashMap<(Identifier, NodeIndex), InboundSenders<C>>>,
}

impl<C: CurveTrait> Router<C> {
    fn register(&self, sid: Identifier, node: NodeIndex, senders: InboundSenders<C>) {
        let _ = self.lock().insert((sid, node), senders);
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<(Identifier, NodeIndex), InboundSenders<C>>> {
        // A poisoning panic in another routing call doesn't invalidate the
        // inbox map itself.
        match self.inboxes.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl<C: CurveTrait> Overlay for Router<C> {
    fn deliver(&self, message: Message) -> Result<()> {
        let key = (message.sid(), message.to());

        if message.message_type() == MessageType::Stop {
            // Dropping the senders closes the recipient's inbox, which
            // unblocks and terminates its dispatch task.
            let _ = self.lock().remove(&key);
            return Ok(());
        }

        let inboxes = self.lock();
        let Some(inbox) = inboxes.get(&key) else {
            debug!(
                "Dropping a {:?} message for {}: no inbox",
                message.message_type(),
                message.to()
            );
            return Ok(());
        };

        // Send failures mean the recipient's dispatch has already finished;
        // like a message to a stopped node, the envelope is dropped.
        let from = message.from();
        match message.message_type() {
            MessageType::Announcement => {
                let payload = Announcement::try_from(&message)?;
                let _ = inbox.announcement.send(Received { from, payload });
            }
            MessageType::Commitment => {
                let payload = Commitment::try_from(&message)?;
                let _ = inbox.commitment.send(Received { from, payload });
            }
            MessageType::Challenge => {
                let payload = Challenge::try_from(&message)?;
                let _ = inbox.challenge.send(Received { from, payload });
            }
            MessageType::Response => {
                let payload = Response::try_from(&message)?;
                let _ = inbox.response.send(Received { from, payload });
            }
            MessageType::Stop => {}
        }
        Ok(())
    }
}
