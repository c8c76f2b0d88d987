// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Channel wire format: `{"type": <string>, "data": <object>}` in both
//! directions. Inbound frames are decoded once at the boundary into a closed
//! [`Inbound`] enum (unrecognized types land in `Unknown`); outbound frames
//! serialize from [`Outbound`]. Inbound payload fields are snake_case,
//! outbound payload fields camelCase; both follow the server contract.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::identity::Identity;
use crate::model::{Participant, Question, ScoreEntry};

// -- Frame envelope -----------------------------------------------------------

/// The raw envelope shared by every frame on the channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFrame {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Routing key for dispatcher subscriptions, one per known inbound type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrameKind {
    Question,
    QuizStart,
    ParticipantUpdate,
    ParticipantList,
    LeaderboardUpdate,
    FinalLeaderboard,
    QuizEndWait,
    Error,
    Unknown,
}

impl FrameKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Question => "question",
            Self::QuizStart => "quiz_start",
            Self::ParticipantUpdate => "participant_update",
            Self::ParticipantList => "participant_list",
            Self::LeaderboardUpdate => "leaderboard_update",
            Self::FinalLeaderboard => "final_leaderboard",
            Self::QuizEndWait => "quiz_end_wait",
            Self::Error => "error",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for FrameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// -- Inbound frames -----------------------------------------------------------

/// Everything the server pushes over the channel.
#[derive(Debug, Clone)]
pub enum Inbound {
    /// A question delivery; `index` is the zero-based position in the quiz.
    Question { question: Question, index: usize },
    /// The host started the session.
    QuizStart,
    /// Roster headcount changed.
    ParticipantUpdate { count: usize },
    /// Full roster replacement.
    ParticipantList { participants: Vec<Participant>, count: usize },
    /// Live scoreboard push; replaces any previously shown rows wholesale.
    LeaderboardUpdate { rows: Vec<ScoreEntry> },
    /// Terminal scoreboard; the session is over.
    FinalLeaderboard { rows: Vec<ScoreEntry> },
    /// Interstitial message shown while waiting for final scoring.
    QuizEndWait { message: String },
    /// Server-side error report.
    Error { message: String },
    /// Anything this client does not understand; kept for logging.
    Unknown { tag: String, data: serde_json::Value },
}

impl Inbound {
    pub fn kind(&self) -> FrameKind {
        match self {
            Self::Question { .. } => FrameKind::Question,
            Self::QuizStart => FrameKind::QuizStart,
            Self::ParticipantUpdate { .. } => FrameKind::ParticipantUpdate,
            Self::ParticipantList { .. } => FrameKind::ParticipantList,
            Self::LeaderboardUpdate { .. } => FrameKind::LeaderboardUpdate,
            Self::FinalLeaderboard { .. } => FrameKind::FinalLeaderboard,
            Self::QuizEndWait { .. } => FrameKind::QuizEndWait,
            Self::Error { .. } => FrameKind::Error,
            Self::Unknown { .. } => FrameKind::Unknown,
        }
    }
}

/// Decode one inbound frame.
///
/// Required objects (the question itself, leaderboard arrays, roster entries)
/// fail the frame as [`Error::Protocol`]; optional scalars fall back to
/// defaults. A frame with an unrecognized `type` decodes to
/// [`Inbound::Unknown`] rather than failing.
pub fn decode_inbound(text: &str) -> Result<Inbound, Error> {
    let frame: RawFrame = serde_json::from_str(text)
        .map_err(|e| Error::Protocol { reason: format!("invalid frame json: {e}") })?;
    let data = frame.data;

    let inbound = match frame.kind.as_str() {
        "question" => {
            let value = data
                .get("question")
                .cloned()
                .ok_or_else(|| Error::Protocol { reason: "question frame without question".into() })?;
            let question: Question = serde_json::from_value(value)
                .map_err(|e| Error::Protocol { reason: format!("bad question object: {e}") })?;
            let index = data.get("index").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
            Inbound::Question { question, index }
        }
        "quiz_start" => Inbound::QuizStart,
        "participant_update" => {
            let count = data.get("count").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
            Inbound::ParticipantUpdate { count }
        }
        "participant_list" => {
            let participants: Vec<Participant> = match data.get("participants") {
                Some(v) => serde_json::from_value(v.clone())
                    .map_err(|e| Error::Protocol { reason: format!("bad participant list: {e}") })?,
                None => Vec::new(),
            };
            let count = data
                .get("count")
                .and_then(|v| v.as_u64())
                .map(|c| c as usize)
                .unwrap_or(participants.len());
            Inbound::ParticipantList { participants, count }
        }
        "leaderboard_update" => Inbound::LeaderboardUpdate { rows: decode_rows(&data)? },
        "final_leaderboard" => Inbound::FinalLeaderboard { rows: decode_rows(&data)? },
        "quiz_end_wait" => Inbound::QuizEndWait { message: string_field(&data, "message") },
        "error" => Inbound::Error { message: string_field(&data, "message") },
        _ => Inbound::Unknown { tag: frame.kind, data },
    };
    Ok(inbound)
}

fn decode_rows(data: &serde_json::Value) -> Result<Vec<ScoreEntry>, Error> {
    match data.get("leaderboard") {
        Some(v) => serde_json::from_value(v.clone())
            .map_err(|e| Error::Protocol { reason: format!("bad leaderboard: {e}") }),
        None => Ok(Vec::new()),
    }
}

fn string_field(data: &serde_json::Value, field: &str) -> String {
    data.get(field).and_then(|v| v.as_str()).unwrap_or_default().to_owned()
}

// -- Outbound frames ----------------------------------------------------------

/// Everything this client emits over the channel.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum Outbound {
    JoinQuiz(JoinPayload),
    StartQuiz(StartPayload),
    NextQuestion(AdvancePayload),
    AnswerSubmitted(AnswerPayload),
}

impl Outbound {
    /// Wire tag, for logging.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::JoinQuiz(_) => "join_quiz",
            Self::StartQuiz(_) => "start_quiz",
            Self::NextQuestion(_) => "next_question",
            Self::AnswerSubmitted(_) => "answer_submitted",
        }
    }
}

/// Join handshake sent shortly after every physical open.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinPayload {
    pub session_code: String,
    pub user: JoinUser,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinUser {
    pub user_id: u64,
    pub username: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl From<Identity> for JoinUser {
    fn from(identity: Identity) -> Self {
        Self { user_id: identity.user_id, username: identity.username, email: identity.email }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StartPayload {
    pub session_code: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvancePayload {
    pub session_code: String,
    pub current_index: u64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnswerPayload {
    pub session_code: String,
    pub question_id: u64,
    pub answer: String,
    pub user_id: u64,
}

#[cfg(test)]
#[path = "wire_tests.rs"]
mod tests;
