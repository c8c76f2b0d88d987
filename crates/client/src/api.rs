// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! HTTP client for the quiz REST API.

use std::sync::Arc;

use reqwest::Client;

use crate::config::ClientConfig;
use crate::error::{ApiError, Error, Result};
use crate::identity::{Identity, IdentityStore};
use crate::model::{AnswerRequest, AnswerResult, AuthResponse, Quiz, QuizDefinition, ScoreEntry};

/// HTTP client wrapper for the quiz service.
pub struct ApiClient {
    base_url: String,
    store: Arc<IdentityStore>,
    client: Client,
}

impl ApiClient {
    pub fn new(config: &ClientConfig, store: Arc<IdentityStore>) -> Self {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { base_url: config.api_url.trim_end_matches('/').to_owned(), store, client }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn apply_auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match self.store.token() {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    /// Identity claims decoded from the stored token, if any.
    pub fn identity(&self) -> Option<Identity> {
        self.store.current()
    }

    pub fn store(&self) -> &Arc<IdentityStore> {
        &self.store
    }

    // -- auth ----------------------------------------------------------------

    /// Log in and persist the returned token.
    pub async fn login(&self, username: &str, password: &str) -> Result<Identity> {
        let body = serde_json::json!({ "username": username, "password": password });
        let resp = self
            .client
            .post(self.url("/auth/login"))
            .json(&body)
            .send()
            .await
            .map_err(ApiError::from)?;
        let auth: AuthResponse =
            check("/auth/login", resp)?.json().await.map_err(ApiError::from)?;
        self.store.set_token(&auth.token)?;
        self.store.current().ok_or(Error::Auth)
    }

    /// Register a new account and persist the returned token.
    pub async fn register(&self, username: &str, email: &str, password: &str) -> Result<Identity> {
        let body = serde_json::json!({
            "username": username,
            "email": email,
            "password": password,
        });
        let resp = self
            .client
            .post(self.url("/auth/register"))
            .json(&body)
            .send()
            .await
            .map_err(ApiError::from)?;
        let auth: AuthResponse =
            check("/auth/register", resp)?.json().await.map_err(ApiError::from)?;
        self.store.set_token(&auth.token)?;
        self.store.current().ok_or(Error::Auth)
    }

    /// Drop the persisted token.
    pub fn logout(&self) -> Result<()> {
        self.store.clear()?;
        Ok(())
    }

    // -- quizzes -------------------------------------------------------------

    /// List quizzes created by the current user.
    pub async fn my_quizzes(&self) -> Result<Vec<Quiz>, ApiError> {
        let req = self.client.get(self.url("/quiz/my-quizzes"));
        let resp = self.apply_auth(req).send().await?;
        let quizzes = check("/quiz/my-quizzes", resp)?.json().await?;
        Ok(quizzes)
    }

    /// Fetch one quiz by its join code.
    pub async fn fetch_quiz(&self, code: &str) -> Result<Quiz, ApiError> {
        let req = self.client.get(self.url(&format!("/quiz/{code}")));
        let resp = self.apply_auth(req).send().await?;
        let quiz = check("/quiz/{code}", resp)?.json().await?;
        Ok(quiz)
    }

    /// Create a new quiz. Returns the stored quiz with its join code assigned.
    pub async fn create_quiz(&self, definition: &QuizDefinition) -> Result<Quiz, ApiError> {
        let req = self.client.post(self.url("/quiz")).json(definition);
        let resp = self.apply_auth(req).send().await?;
        let quiz = check("/quiz", resp)?.json().await?;
        Ok(quiz)
    }

    /// Record attendance before opening the session channel.
    pub async fn join_quiz(&self, code: &str) -> Result<(), ApiError> {
        let req = self.client.post(self.url(&format!("/quiz/{code}/join")));
        let resp = self.apply_auth(req).send().await?;
        check("/quiz/{code}/join", resp)?;
        Ok(())
    }

    /// Mark a quiz as started. Host only; the server enforces ownership.
    pub async fn start_quiz(&self, code: &str) -> Result<(), ApiError> {
        let req = self.client.post(self.url(&format!("/quiz/{code}/start")));
        let resp = self.apply_auth(req).send().await?;
        check("/quiz/{code}/start", resp)?;
        Ok(())
    }

    /// Submit an answer for scoring. Returns the points awarded.
    pub async fn submit_answer(&self, answer: &AnswerRequest) -> Result<AnswerResult, ApiError> {
        let req = self.client.post(self.url("/quiz/answer")).json(answer);
        let resp = self.apply_auth(req).send().await?;
        let result = check("/quiz/answer", resp)?.json().await?;
        Ok(result)
    }

    /// Fetch the current standings for a quiz.
    pub async fn leaderboard(&self, code: &str) -> Result<Vec<ScoreEntry>, ApiError> {
        let req = self.client.get(self.url(&format!("/quiz/{code}/leaderboard")));
        let resp = self.apply_auth(req).send().await?;
        let entries = check("/quiz/{code}/leaderboard", resp)?.json().await?;
        Ok(entries)
    }
}

fn check(endpoint: &'static str, resp: reqwest::Response) -> Result<reqwest::Response, ApiError> {
    let status = resp.status();
    if status.is_success() {
        Ok(resp)
    } else {
        Err(ApiError::Status { endpoint, status: status.as_u16() })
    }
}
