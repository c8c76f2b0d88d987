// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Error taxonomy for the session channel client.
//!
//! Transport failures during a connection episode are handled internally by
//! the channel's backoff loop and never surface here; callers only observe
//! [`Error::ReconnectExhausted`] once an episode is abandoned. Handler
//! failures are likewise caught and logged at the dispatch site.

use thiserror::Error;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors surfaced by the quizwire client API.
#[derive(Debug, Error)]
pub enum Error {
    /// A reconnection episode ran out of attempts.
    #[error("reconnect abandoned after {attempts} attempts")]
    ReconnectExhausted { attempts: u32 },

    /// An inbound frame that could not be decoded. Logged and dropped by the
    /// channel; surfaced only to direct [`crate::wire::decode_inbound`] callers.
    #[error("malformed frame: {reason}")]
    Protocol { reason: String },

    /// The channel or session actor is gone (already torn down).
    #[error("session channel is closed")]
    ChannelGone,

    /// No resolvable identity (missing or undecodable token).
    #[error("no authenticated identity")]
    Auth,

    /// The operation is reserved for the session host.
    #[error("operation requires the session host")]
    NotHost,

    /// An answer was submitted while no question is active.
    #[error("no question is active")]
    NoActiveQuestion,

    /// The current question was already answered; the submission is refused.
    #[error("question {question_id} already answered")]
    AlreadyAnswered { question_id: u64 },

    /// The quiz definition could not be loaded at session entry.
    #[error("failed to load quiz: {0}")]
    SessionLoad(#[source] ApiError),

    /// The scoring call failed; the question stays unanswered locally.
    #[error("failed to submit answer: {0}")]
    AnswerSubmission(#[source] ApiError),

    /// Any other REST API failure.
    #[error(transparent)]
    Api(#[from] ApiError),

    /// Token store I/O failure.
    #[error("token store: {0}")]
    Io(#[from] std::io::Error),

    /// Persisted token file did not parse.
    #[error("invalid persisted token: {0}")]
    TokenFormat(#[from] serde_json::Error),
}

/// Failures from the REST API client, split into transport-level failures and
/// non-success status codes.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("{endpoint}: status {status}")]
    Status { endpoint: &'static str, status: u16 },
}
