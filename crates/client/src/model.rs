// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Data model for quizzes, questions, rosters, and scoring.
//!
//! REST bodies use snake_case field names end to end; the channel's outbound
//! payloads (camelCase) live in [`crate::wire`].

use serde::{Deserialize, Serialize};

/// Fallback per-question time limit when the server omits or zeroes it.
pub const DEFAULT_QUESTION_SECS: u32 = 30;

/// A quiz definition as served by the API. The `quiz_code` is server-assigned
/// and immutable; `is_active` flips true once the host starts the session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quiz {
    pub id: u64,
    #[serde(default)]
    pub quiz_code: String,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub questions: Vec<Question>,
    #[serde(default)]
    pub is_active: bool,
    pub creator_id: u64,
}

/// A single question. Immutable once delivered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub id: u64,
    pub text: String,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    /// Host-only knowledge; absent in participant-facing payloads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correct_answer: Option<String>,
    #[serde(default)]
    pub time_limit: u32,
}

impl Question {
    /// Effective countdown seconds, falling back to [`DEFAULT_QUESTION_SECS`].
    pub fn countdown_secs(&self) -> u32 {
        if self.time_limit > 0 {
            self.time_limit
        } else {
            DEFAULT_QUESTION_SECS
        }
    }
}

/// One answer choice. Answer matching compares option *text*, so text must be
/// unique within a question; that uniqueness is an authoring requirement, not
/// something this client enforces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionOption {
    pub id: u64,
    pub text: String,
}

/// A joined participant as pushed in roster updates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    pub user_id: u64,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
}

/// One leaderboard line as transmitted: rank and self-marking are derived
/// client-side, never sent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScoreEntry {
    pub username: String,
    #[serde(default)]
    pub score: u32,
}

/// Authentication response carrying the bearer token to persist.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub token: String,
}

/// Quiz creation request; the server assigns ids and the join code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuizDefinition {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub questions: Vec<QuestionDefinition>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuestionDefinition {
    pub text: String,
    pub options: Vec<String>,
    pub correct_answer: String,
    #[serde(default = "default_time_limit")]
    pub time_limit: u32,
}

fn default_time_limit() -> u32 {
    DEFAULT_QUESTION_SECS
}

/// Answer scoring request.
#[derive(Debug, Clone, Serialize)]
pub struct AnswerRequest {
    pub quiz_id: u64,
    pub question_id: u64,
    pub answer: String,
    pub time_spent: u32,
}

/// Answer scoring response; `score` is the delta awarded for this answer.
#[derive(Debug, Clone, Deserialize)]
pub struct AnswerResult {
    #[serde(default)]
    pub score: u32,
}
