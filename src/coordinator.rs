// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! The main protocol, run at the overall root.
//!
//! The [`Coordinator`] partitions the roster into subtrees, launches one
//! sub-protocol per subtree, and interacts with each only through its three
//! output channels, so the sub-protocols never observe each other's state.
//! Sub-leader failures are absorbed by a bounded retry and by mask
//! accounting; everything else that goes wrong is fatal to the run.

use std::{
    sync::mpsc::{self, RecvTimeoutError},
    thread,
    time::{Duration, Instant},
};

use rand::{CryptoRng, RngCore};
use tracing::{debug, error, info, instrument, warn};
use zeroize::Zeroizing;

use crate::{
    curve::{CurveTrait, ScalarTrait},
    errors::{ConfigError, Error, Result},
    keys::SecretKey,
    mask::Mask,
    signature::{CollectiveSignature, Policy},
    sub_protocol::{
        Commitment, SubProtocolHandle, SubProtocolLauncher, SubProtocolParams, VerificationFn,
    },
    tree::{NodeIndex, SigningTree, SubTree},
    Identifier, MIN_TIMEOUT,
};

/// Configuration for one collective signing run.
#[derive(Debug, Clone)]
pub struct SigningConfig {
    /// Minimum number of present roster positions for a valid signature.
    pub threshold: usize,
    /// The whole run's time budget.
    pub timeout: Duration,
    /// Each sub-protocol's commitment budget. Defaults to `timeout / 2`, so
    /// a sub-leader failure is detected with enough budget left to retry.
    pub sub_timeout: Option<Duration>,
    /// Whether to re-issue a sub-protocol once, under a replacement
    /// sub-leader, when its sub-leader delivers no commitment.
    pub retry_subtree_once: bool,
    /// Number of sub-leaders. Defaults to ⌈√(N−1)⌉.
    pub subtrees: Option<usize>,
}

impl SigningConfig {
    /// The default configuration for a roster of `roster_len` keys: a
    /// two-thirds threshold, a ten-second budget, and one retry.
    pub fn new(roster_len: usize) -> Self {
        Self {
            threshold: (2 * roster_len).div_ceil(3),
            timeout: Duration::from_secs(10),
            sub_timeout: None,
            retry_subtree_once: true,
            subtrees: None,
        }
    }

    pub(crate) fn sub_timeout(&self) -> Duration {
        self.sub_timeout.unwrap_or(self.timeout / 2)
    }

    pub(crate) fn subtree_count(&self, roster_len: usize) -> usize {
        self.subtrees
            .unwrap_or_else(|| SigningTree::default_subtree_count(roster_len))
    }

    fn validate(&self, roster_len: usize) -> std::result::Result<(), ConfigError> {
        if roster_len == 0 {
            return Err(ConfigError::EmptyRoster);
        }
        if self.threshold < 1 || self.threshold > roster_len {
            return Err(ConfigError::InvalidThreshold {
                threshold: self.threshold,
                roster_len,
            });
        }
        if self.timeout < MIN_TIMEOUT {
            return Err(ConfigError::UnrealisticTimeout {
                requested: self.timeout,
                minimum: MIN_TIMEOUT,
            });
        }
        Ok(())
    }
}

/// The root of a collective signing run.
///
/// Consumes itself on [`run`](Self::run) and produces the signature triple
/// `(C, s, M)`, or the first fatal error.
pub struct Coordinator<C: CurveTrait> {
    publics: Vec<C>,
    secret_key: SecretKey<C>,
    config: SigningConfig,
    verify: VerificationFn,
    message: Vec<u8>,
    data: Vec<u8>,
}

impl<C: CurveTrait> Coordinator<C> {
    /// Set up a run over `publics` with the root's own key share.
    ///
    /// The message may be empty; `data` is handed to every node's
    /// verification predicate alongside it. Fails with a [`ConfigError`] on
    /// an empty roster, an out-of-range threshold, an unrealistic timeout,
    /// or a key share that doesn't match roster position 0.
    pub fn new(
        publics: Vec<C>,
        secret_key: SecretKey<C>,
        config: SigningConfig,
        verify: VerificationFn,
        message: Vec<u8>,
        data: Vec<u8>,
    ) -> Result<Self> {
        config.validate(publics.len())?;
        if publics.first() != Some(&secret_key.public()) {
            error!("The root's key share does not match roster position 0");
            Err(ConfigError::RootKeyMismatch)?
        }
        Ok(Self {
            publics,
            secret_key,
            config,
            verify,
            message,
            data,
        })
    }

    /// Run the collective signing protocol to completion.
    ///
    /// Launches one sub-protocol per subtree through `launcher`, verifies
    /// the proposal locally while their commitments are gathered, and
    /// assembles, quorum-checks, and self-verifies the final signature.
    #[instrument(skip_all, fields(roster_len = self.publics.len()))]
    pub fn run<R, L>(self, rng: &mut R, launcher: &L) -> Result<CollectiveSignature<C>>
    where
        R: RngCore + CryptoRng,
        L: SubProtocolLauncher<C>,
    {
        let roster_len = self.publics.len();
        let deadline = Instant::now() + self.config.timeout;
        let tree = SigningTree::partition(roster_len, self.config.subtree_count(roster_len))?;

        // The root's own verification overlaps with the commitment phase.
        let (verify_tx, verify_rx) = mpsc::channel();
        {
            let verify = self.verify.clone();
            let message = self.message.clone();
            let data = self.data.clone();
            thread::spawn(move || {
                let _ = verify_tx.send(verify(&message, &data));
            });
        }

        let sub_timeout = self.config.sub_timeout();
        let mut pending = Vec::with_capacity(tree.subtrees().len());
        for subtree in tree.subtrees() {
            let handle = self.launch(rng, launcher, subtree, sub_timeout)?;
            pending.push((subtree.clone(), handle));
        }

        // Collect one commitment per subtree, retrying a silent sub-leader
        // at most once. A subtree that stays silent is recorded absent in
        // full; the run continues without it.
        let mut live: Vec<(SubProtocolHandle<C>, Commitment<C>)> = Vec::new();
        let mut failed: Vec<NodeIndex> = Vec::new();
        for (subtree, handle) in pending {
            match self.await_commitment(&handle, deadline)? {
                Some(commitment) => live.push((handle, commitment)),
                None => {
                    handle.shutdown();
                    let replacement = self
                        .config
                        .retry_subtree_once
                        .then(|| subtree.with_replacement_subleader())
                        .flatten();
                    match replacement {
                        Some(replacement) => {
                            info!(
                                "Sub-leader {} delivered no commitment; retrying under {}",
                                subtree.subleader(),
                                replacement.subleader()
                            );
                            let handle = self.launch(rng, launcher, &replacement, sub_timeout)?;
                            match self.await_commitment(&handle, deadline)? {
                                Some(commitment) => live.push((handle, commitment)),
                                None => {
                                    warn!(
                                        "Replacement sub-leader {} also delivered no commitment",
                                        replacement.subleader()
                                    );
                                    handle.shutdown();
                                    failed.extend(subtree.members());
                                }
                            }
                        }
                        None => {
                            info!(
                                "Dropping the subtree under {}: no commitment and no retry",
                                subtree.subleader()
                            );
                            failed.extend(subtree.members());
                        }
                    }
                }
            }
        }

        // The proposal must pass the root's own verification before any
        // challenge leaves this node.
        match verify_rx.recv_timeout(remaining(deadline)) {
            Ok(true) => {}
            Ok(false) | Err(RecvTimeoutError::Disconnected) => {
                info!("Root verification rejected the proposal; aborting the run");
                return Err(Error::VerificationFailed);
            }
            Err(RecvTimeoutError::Timeout) => return Err(Error::Timeout(self.config.timeout)),
        }

        // Aggregate: the root contributes its own nonce commitment, every
        // live subtree contributes its aggregate, and failed subtrees are
        // folded in as absences.
        let nonce = Zeroizing::new(C::Scalar::random());
        let mut commitment = C::GENERATOR.mul(&nonce);
        let mut mask = Mask::new(roster_len);
        for (_, sub) in &live {
            sub.mask.check_len(roster_len)?;
            commitment = commitment + sub.commitment;
            mask.or_assign(&sub.mask)?;
        }
        for member in &failed {
            mask.set_absent(member.as_usize());
        }

        let challenge = C::challenge(&commitment, &mask, &self.message);
        debug!(
            "Challenge computed over a mask with {} of {} present",
            mask.count_present(),
            roster_len
        );
        for (handle, _) in &live {
            handle.send_challenge(challenge)?;
        }

        // Responses carry no timeout of their own: everyone represented in
        // the mask has pledged to respond, so only the run budget bounds the
        // wait and a missing response is a protocol violation.
        let mut response = self.secret_key.respond(&nonce, &challenge);
        drop(nonce);
        for (handle, _) in &live {
            match handle.sub_response().recv_timeout(remaining(deadline)) {
                Ok(sub) => response.add_assign(sub.response),
                Err(_) => {
                    error!("A committed subtree failed to deliver its response");
                    return Err(Error::Protocol(
                        "a committed subtree failed to deliver its response".into(),
                    ));
                }
            }
        }

        let present = mask.count_present();
        if present < self.config.threshold {
            info!(
                "Only {present} of the required {} nodes participated",
                self.config.threshold
            );
            return Err(Error::Quorum {
                present,
                required: self.config.threshold,
            });
        }

        let signature = CollectiveSignature::new(commitment, response, mask);
        signature
            .verify(
                &self.publics,
                &self.message,
                Policy::Threshold(self.config.threshold),
            )
            .map_err(|_| {
                error!("Assembled signature failed self-verification");
                Error::InvalidSignature
            })?;
        Ok(signature)
    }

    fn launch<R, L>(
        &self,
        rng: &mut R,
        launcher: &L,
        subtree: &SubTree,
        timeout: Duration,
    ) -> Result<SubProtocolHandle<C>>
    where
        R: RngCore + CryptoRng,
        L: SubProtocolLauncher<C>,
    {
        let params = SubProtocolParams {
            sid: Identifier::random(rng),
            message: self.message.clone(),
            data: self.data.clone(),
            publics: self.publics.clone(),
            timeout,
        };
        let handle = launcher.launch(subtree, params)?;
        handle.start()?;
        Ok(handle)
    }

    /// Wait for a subtree's commitment: `Ok(Some(_))` on delivery,
    /// `Ok(None)` when the sub-leader went silent (recoverable), an error
    /// when the run budget is exhausted or the sub-protocol died.
    fn await_commitment(
        &self,
        handle: &SubProtocolHandle<C>,
        deadline: Instant,
    ) -> Result<Option<Commitment<C>>> {
        match handle.sub_commitment().recv_timeout(remaining(deadline)) {
            Ok(commitment) => Ok(Some(commitment)),
            Err(RecvTimeoutError::Timeout) => {
                error!("Run budget exhausted while waiting for a commitment");
                Err(Error::Timeout(self.config.timeout))
            }
            Err(RecvTimeoutError::Disconnected) => {
                // The dispatch ended without producing a commitment. The
                // sub-leader-failure signal distinguishes a silent
                // sub-leader from a run that died on a violation.
                match handle.subleader_not_responding().try_recv() {
                    Ok(_) => Ok(None),
                    Err(_) => Err(Error::Protocol(
                        "a sub-protocol ended without delivering a commitment".into(),
                    )),
                }
            }
        }
    }
}

fn remaining(deadline: Instant) -> Duration {
    deadline.saturating_duration_since(Instant::now())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        curve::{Secp256r1, TestCurve},
        local::LocalCommittee,
        sub_protocol::accept_all_verifier,
        utils::testing::init_testing,
    };
    use std::sync::Arc;

    const MSG: &[u8] = b"hello";

    /// Roster of 7: root 0, sub-leaders {1, 4}, subtree members {1, 2, 3}
    /// and {4, 5, 6}.
    fn scenario_config() -> SigningConfig {
        SigningConfig {
            threshold: 5,
            timeout: Duration::from_millis(2_000),
            sub_timeout: Some(Duration::from_millis(300)),
            retry_subtree_once: false,
            subtrees: Some(2),
        }
    }

    fn run_with_verifier(
        committee: &LocalCommittee<TestCurve>,
        config: SigningConfig,
        verify: VerificationFn,
    ) -> Result<CollectiveSignature<TestCurve>> {
        let mut rng = init_testing();
        let coordinator = Coordinator::new(
            committee.publics(),
            committee.key_share(NodeIndex::ROOT).unwrap(),
            config,
            verify,
            MSG.to_vec(),
            Vec::new(),
        )?;
        coordinator.run(&mut rng, committee)
    }

    fn run(
        committee: &LocalCommittee<TestCurve>,
        config: SigningConfig,
    ) -> Result<CollectiveSignature<TestCurve>> {
        run_with_verifier(committee, config, accept_all_verifier())
    }

    #[test]
    fn happy_path_signs_with_full_attendance() {
        let committee = LocalCommittee::new(7);
        let signature = run(&committee, scenario_config()).unwrap();

        assert_eq!(signature.mask().count_present(), 7);
        assert!(signature
            .verify(&committee.publics(), MSG, Policy::Complete)
            .is_ok());

        // The wire encoding round-trips and still verifies.
        let restored =
            CollectiveSignature::<TestCurve>::from_bytes(7, &signature.to_bytes()).unwrap();
        assert!(restored
            .verify(&committee.publics(), MSG, Policy::Threshold(5))
            .is_ok());
    }

    #[test]
    fn silent_leaf_is_absorbed_into_the_mask() {
        let mut committee = LocalCommittee::new(7);
        committee.mute(NodeIndex::from(3));

        let signature = run(&committee, scenario_config()).unwrap();

        assert!(signature.mask().is_absent(3));
        assert_eq!(signature.mask().count_present(), 6);
        assert!(signature
            .verify(&committee.publics(), MSG, Policy::Threshold(5))
            .is_ok());
    }

    #[test]
    fn silent_subleader_without_retry_fails_quorum() {
        let mut committee = LocalCommittee::new(7);
        committee.mute(NodeIndex::from(1));

        let result = run(&committee, scenario_config());

        assert_eq!(
            result.unwrap_err(),
            Error::Quorum {
                present: 4,
                required: 5
            }
        );
    }

    #[test]
    fn silent_subleader_with_retry_loses_only_itself() {
        let mut committee = LocalCommittee::new(7);
        committee.mute(NodeIndex::from(1));

        let config = SigningConfig {
            retry_subtree_once: true,
            ..scenario_config()
        };
        let signature = run(&committee, config).unwrap();

        assert!(signature.mask().is_absent(1));
        assert_eq!(signature.mask().count_present(), 6);
        assert!(signature
            .verify(&committee.publics(), MSG, Policy::Threshold(5))
            .is_ok());
    }

    #[test]
    fn rejecting_leaf_is_marked_absent() {
        let mut committee = LocalCommittee::new(7);
        committee.set_verifier(NodeIndex::from(5), Arc::new(|_, _| false));

        let signature = run(&committee, scenario_config()).unwrap();

        assert!(signature.mask().is_absent(5));
        assert_eq!(signature.mask().count_present(), 6);
        assert!(signature
            .verify(&committee.publics(), MSG, Policy::Threshold(5))
            .is_ok());
    }

    #[test]
    fn root_rejection_aborts_the_run() {
        let committee = LocalCommittee::new(7);
        let result =
            run_with_verifier(&committee, scenario_config(), Arc::new(|_, _| false));
        assert_eq!(result.unwrap_err(), Error::VerificationFailed);
    }

    #[test]
    fn empty_message_is_signable() {
        let mut rng = init_testing();
        let committee = LocalCommittee::<TestCurve>::new(7);
        let coordinator = Coordinator::new(
            committee.publics(),
            committee.key_share(NodeIndex::ROOT).unwrap(),
            scenario_config(),
            accept_all_verifier(),
            Vec::new(),
            Vec::new(),
        )
        .unwrap();

        let signature = coordinator.run(&mut rng, &committee).unwrap();
        assert!(signature
            .verify(&committee.publics(), b"", Policy::Complete)
            .is_ok());
    }

    #[test]
    fn root_can_sign_alone() {
        let committee = LocalCommittee::new(1);
        let config = SigningConfig {
            threshold: 1,
            subtrees: None,
            ..scenario_config()
        };
        let signature = run(&committee, config).unwrap();
        assert_eq!(signature.mask().count_present(), 1);
        assert!(signature
            .verify(&committee.publics(), MSG, Policy::Complete)
            .is_ok());
    }

    #[test]
    fn unrealistic_timeout_is_a_config_error() {
        let committee = LocalCommittee::<TestCurve>::new(7);
        let config = SigningConfig {
            timeout: Duration::from_millis(2),
            ..scenario_config()
        };
        let result = Coordinator::new(
            committee.publics(),
            committee.key_share(NodeIndex::ROOT).unwrap(),
            config,
            accept_all_verifier(),
            MSG.to_vec(),
            Vec::new(),
        );
        assert!(matches!(
            result,
            Err(Error::Config(ConfigError::UnrealisticTimeout { .. }))
        ));
    }

    #[test]
    fn unrealistic_sub_timeout_fails_at_start() {
        let committee = LocalCommittee::new(7);
        let config = SigningConfig {
            sub_timeout: Some(Duration::from_millis(2)),
            ..scenario_config()
        };
        let result = run(&committee, config);
        assert!(matches!(
            result,
            Err(Error::Config(ConfigError::UnrealisticTimeout { .. }))
        ));
    }

    #[test]
    fn empty_roster_is_a_config_error() {
        let result = Coordinator::<TestCurve>::new(
            Vec::new(),
            SecretKey::random(),
            SigningConfig::new(0),
            accept_all_verifier(),
            MSG.to_vec(),
            Vec::new(),
        );
        assert!(matches!(
            result,
            Err(Error::Config(ConfigError::EmptyRoster))
        ));
    }

    #[test]
    fn out_of_range_threshold_is_a_config_error() {
        let committee = LocalCommittee::<TestCurve>::new(7);
        let config = SigningConfig {
            threshold: 8,
            ..scenario_config()
        };
        let result = Coordinator::new(
            committee.publics(),
            committee.key_share(NodeIndex::ROOT).unwrap(),
            config,
            accept_all_verifier(),
            MSG.to_vec(),
            Vec::new(),
        );
        assert!(matches!(
            result,
            Err(Error::Config(ConfigError::InvalidThreshold { .. }))
        ));
    }

    #[test]
    fn mismatched_root_key_is_a_config_error() {
        let committee = LocalCommittee::<TestCurve>::new(7);
        let result = Coordinator::new(
            committee.publics(),
            SecretKey::random(),
            scenario_config(),
            accept_all_verifier(),
            MSG.to_vec(),
            Vec::new(),
        );
        assert!(matches!(
            result,
            Err(Error::Config(ConfigError::RootKeyMismatch))
        ));
    }

    #[test]
    fn default_config_signs_a_larger_roster() {
        let committee = LocalCommittee::new(10);
        let signature = run(&committee, SigningConfig::new(10)).unwrap();
        assert_eq!(signature.mask().count_present(), 10);
        assert!(signature
            .verify(&committee.publics(), MSG, Policy::Threshold(7))
            .is_ok());
    }

    #[test]
    fn runs_over_p256() {
        let mut rng = init_testing();
        let committee = LocalCommittee::<Secp256r1>::new(5);
        let config = SigningConfig {
            threshold: 4,
            subtrees: Some(2),
            ..SigningConfig::new(5)
        };
        let coordinator = Coordinator::new(
            committee.publics(),
            committee.key_share(NodeIndex::ROOT).unwrap(),
            config,
            accept_all_verifier(),
            MSG.to_vec(),
            Vec::new(),
        )
        .unwrap();

        let signature = coordinator.run(&mut rng, &committee).unwrap();
        assert!(signature
            .verify(&committee.publics(), MSG, Policy::Complete)
            .is_ok());
    }

    #[test]
    fn shutdown_is_idempotent() {
        let mut rng = init_testing();
        let committee = LocalCommittee::<TestCurve>::new(7);
        let tree = SigningTree::partition(7, 2).unwrap();
        let params = SubProtocolParams {
            sid: Identifier::random(&mut rng),
            message: MSG.to_vec(),
            data: Vec::new(),
            publics: committee.publics(),
            timeout: Duration::from_millis(100),
        };

        let handle = committee.launch(&tree.subtrees()[0], params).unwrap();
        handle.shutdown();
        handle.shutdown();

        // Once shut down, the run cannot be started.
        assert!(handle.start().is_err());
    }
}
