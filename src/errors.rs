// Copyright (c) 2023 Bolt Labs Holdings, Inc
//
// This source code is licensed under both the MIT license found in the
// LICENSE-MIT file in the root directory of this source tree and the Apache
// License, Version 2.0 found in the LICENSE-APACHE file in the root directory
// of this source tree.

//! Error types for collective signing runs.
//!
//! [`ConfigError`] covers mistakes made by the calling application when
//! setting up a run; everything in [`Error`] is fatal to the run it occurs
//! in. Child-level failures (a slow leaf, a rejecting verifier) are not
//! errors at all; they are absorbed into the attendance mask.

use std::time::Duration;

use thiserror::Error;

/// The calling application provided invalid inputs when configuring a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The roster of public keys was empty.
    #[error("roster of public keys is empty")]
    EmptyRoster,

    /// The requested timeout is below [`MIN_TIMEOUT`](crate::MIN_TIMEOUT).
    #[error("unrealistic timeout: {requested:?} is below the {minimum:?} minimum")]
    UnrealisticTimeout {
        /// The timeout the caller asked for.
        requested: Duration,
        /// The smallest timeout the protocol accepts.
        minimum: Duration,
    },

    /// The quorum threshold is outside `[1, N]` for a roster of size `N`.
    #[error("threshold {threshold} is invalid for a roster of {roster_len} keys")]
    InvalidThreshold {
        /// The configured threshold.
        threshold: usize,
        /// The roster size it was checked against.
        roster_len: usize,
    },

    /// The requested number of subtrees cannot be carved out of the roster.
    #[error("cannot split {roster_len} nodes (minus the root) into {subtrees} subtrees")]
    InvalidSubtreeCount {
        /// The configured subtree count.
        subtrees: usize,
        /// The roster size it was checked against.
        roster_len: usize,
    },

    /// The root's secret key share does not match roster position 0.
    #[error("the root's key share does not match roster position 0")]
    RootKeyMismatch,

    /// A received byte string could not be decoded into the expected type.
    #[error("could not deserialize message contents")]
    DeserializationFailed,
}

/// Ways a collective signing run can fail.
///
/// Any of these ends the current run; none of them are recoverable short of
/// starting a fresh run.
#[derive(Debug, Error)]
pub enum Error {
    /// The run was misconfigured by the caller.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    /// A node violated the protocol: an out-of-phase or duplicated message,
    /// a message from an unexpected sender, a malformed mask, or a missing
    /// response after a successful commitment.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The root's own verification predicate rejected the proposal.
    #[error("proposal rejected by local verification")]
    VerificationFailed,

    /// Fewer nodes participated than the configured threshold requires.
    #[error("only {present} of the required {required} nodes participated")]
    Quorum {
        /// Number of roster positions marked present in the final mask.
        present: usize,
        /// The configured threshold.
        required: usize,
    },

    /// The run as a whole did not complete within the main timeout budget.
    #[error("collective signing did not complete within {0:?}")]
    Timeout(Duration),

    /// A message payload could not be serialized.
    #[error("could not serialize message contents")]
    SerializationFailed,

    /// The assembled signature failed to verify against the roster. This
    /// indicates an aggregation bug or corrupted contributions and should
    /// never happen in a correct deployment.
    #[error("assembled signature failed self-verification")]
    InvalidSignature,
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        use Error::*;
        match (self, other) {
            (Config(a), Config(b)) => a == b,
            (Protocol(a), Protocol(b)) => a == b,
            (VerificationFailed, VerificationFailed) => true,
            (
                Quorum {
                    present: p1,
                    required: r1,
                },
                Quorum {
                    present: p2,
                    required: r2,
                },
            ) => p1 == p2 && r1 == r2,
            (Timeout(a), Timeout(b)) => a == b,
            (SerializationFailed, SerializationFailed) => true,
            (InvalidSignature, InvalidSignature) => true,
            _ => false,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
