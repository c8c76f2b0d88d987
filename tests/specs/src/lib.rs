// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Test harness for end-to-end session tests.
//!
//! Runs an in-process quiz service speaking the same REST and WebSocket
//! surface as the real backend, with hooks for seeding data, pushing
//! channel frames, and observing what clients sent.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::path::{Path as FsPath, PathBuf};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{Path, State, WebSocketUpgrade};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{broadcast, Mutex};

use quizwire::api::ApiClient;
use quizwire::config::ClientConfig;
use quizwire::identity::{decode_token, Identity, IdentityStore};
use quizwire::model::{Question, QuestionOption, Quiz, QuizDefinition, ScoreEntry};

const WAIT: Duration = Duration::from_secs(5);
const POLL: Duration = Duration::from_millis(10);

static CRYPTO_INIT: Once = Once::new();

/// Install the ring crypto provider for reqwest/rustls.
/// Safe to call multiple times — only the first call has effect.
pub fn ensure_crypto() {
    CRYPTO_INIT.call_once(|| {
        let _ = rustls::crypto::ring::default_provider().install_default();
    });
}

/// Mint an unsigned bearer token whose claims decode to an [`Identity`].
pub fn mint_token(user_id: u64, username: &str, email: Option<&str>) -> String {
    let claims = json!({
        "user_id": user_id,
        "username": username,
        "email": email,
    });
    format!("e30.{}.unsigned", URL_SAFE_NO_PAD.encode(claims.to_string()))
}

/// A two-question quiz with the shape most tests want.
pub fn sample_quiz(code: &str, creator_id: u64) -> Quiz {
    Quiz {
        id: 41,
        quiz_code: code.to_owned(),
        title: "Capitals and Planets".to_owned(),
        description: "warm-up round".to_owned(),
        questions: vec![
            Question {
                id: 901,
                text: "What is the capital of France?".to_owned(),
                options: vec![
                    QuestionOption { id: 1, text: "Paris".to_owned() },
                    QuestionOption { id: 2, text: "Rome".to_owned() },
                    QuestionOption { id: 3, text: "Madrid".to_owned() },
                ],
                correct_answer: Some("Paris".to_owned()),
                time_limit: 30,
            },
            Question {
                id: 902,
                text: "Which planet is closest to the sun?".to_owned(),
                options: vec![
                    QuestionOption { id: 1, text: "Mercury".to_owned() },
                    QuestionOption { id: 2, text: "Venus".to_owned() },
                ],
                correct_answer: Some("Mercury".to_owned()),
                time_limit: 30,
            },
        ],
        is_active: false,
        creator_id,
    }
}

/// Channel frame delivering `question` at `index`, with the answer key
/// stripped the way the real service strips it.
pub fn question_frame(question: &Question, index: usize) -> Value {
    json!({
        "type": "question",
        "data": {
            "question": {
                "id": question.id,
                "text": question.text,
                "options": question.options,
                "time_limit": question.time_limit,
            },
            "index": index,
        }
    })
}

fn rows_value(rows: &[(&str, u32)]) -> Value {
    let rows: Vec<Value> =
        rows.iter().map(|(name, score)| json!({ "username": name, "score": score })).collect();
    Value::Array(rows)
}

/// Live standings push.
pub fn leaderboard_frame(rows: &[(&str, u32)]) -> Value {
    json!({ "type": "leaderboard_update", "data": { "leaderboard": rows_value(rows) } })
}

/// Terminal standings push.
pub fn final_frame(rows: &[(&str, u32)]) -> Value {
    json!({ "type": "final_leaderboard", "data": { "leaderboard": rows_value(rows) } })
}

// -- mock service -------------------------------------------------------------

struct UserRecord {
    user_id: u64,
    email: Option<String>,
}

struct ServiceState {
    users: Mutex<HashMap<String, UserRecord>>,
    quizzes: Mutex<HashMap<String, Quiz>>,
    rooms: Mutex<HashMap<String, Arc<Room>>>,
    answers: Mutex<Vec<Value>>,
    joins: Mutex<Vec<(String, u64)>>,
    standings: Mutex<HashMap<String, Vec<ScoreEntry>>>,
    next_user_id: AtomicU64,
    next_quiz_id: AtomicU64,
    next_question_id: AtomicU64,
}

impl ServiceState {
    fn new() -> Self {
        Self {
            users: Mutex::new(HashMap::new()),
            quizzes: Mutex::new(HashMap::new()),
            rooms: Mutex::new(HashMap::new()),
            answers: Mutex::new(Vec::new()),
            joins: Mutex::new(Vec::new()),
            standings: Mutex::new(HashMap::new()),
            next_user_id: AtomicU64::new(1000),
            next_quiz_id: AtomicU64::new(500),
            next_question_id: AtomicU64::new(5000),
        }
    }

    async fn room(&self, code: &str) -> Arc<Room> {
        let mut rooms = self.rooms.lock().await;
        Arc::clone(rooms.entry(code.to_owned()).or_insert_with(Room::new))
    }
}

/// An in-process quiz service bound to an ephemeral port.
///
/// The server task is aborted on drop.
pub struct MockQuizService {
    addr: SocketAddr,
    state: Arc<ServiceState>,
    task: tokio::task::JoinHandle<()>,
}

impl MockQuizService {
    pub async fn start() -> anyhow::Result<Self> {
        ensure_crypto();
        let state = Arc::new(ServiceState::new());
        let router = build_router(Arc::clone(&state));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let task = tokio::spawn(async move {
            let _ = axum::serve(listener, router).await;
        });
        Ok(Self { addr, state, task })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// REST base URL, mirroring production's `/api` prefix.
    pub fn api_url(&self) -> String {
        format!("http://{}/api", self.addr)
    }

    /// Client configuration targeting this service, tuned for fast tests.
    /// The channel URL is left to be derived from the API URL.
    pub fn client_config(&self, token_file: impl Into<PathBuf>) -> ClientConfig {
        ClientConfig {
            api_url: self.api_url(),
            ws_url: None,
            token_file: token_file.into(),
            reconnect_base_ms: 50,
            reconnect_max_attempts: 4,
            join_grace_ms: 10,
        }
    }

    /// Log `username` in through the real REST flow, persisting the token
    /// under `dir`. Returns the configured client pair most tests start from.
    pub async fn login_as(
        &self,
        dir: &FsPath,
        username: &str,
    ) -> anyhow::Result<(ClientConfig, Arc<ApiClient>)> {
        let config = self.client_config(dir.join(format!("{username}-token.json")));
        let store = Arc::new(IdentityStore::open(&config.token_file));
        let api = Arc::new(ApiClient::new(&config, store));
        api.login(username, "secret").await?;
        Ok((config, api))
    }

    /// Pre-register a user so logins resolve to a fixed id.
    pub async fn add_user(&self, username: &str, user_id: u64) {
        self.state
            .users
            .lock()
            .await
            .insert(username.to_owned(), UserRecord { user_id, email: None });
    }

    pub async fn seed_quiz(&self, quiz: Quiz) {
        self.state.quizzes.lock().await.insert(quiz.quiz_code.clone(), quiz);
    }

    pub async fn quiz(&self, code: &str) -> Option<Quiz> {
        self.state.quizzes.lock().await.get(code).cloned()
    }

    /// The channel room for `code`, created on first use.
    pub async fn room(&self, code: &str) -> Arc<Room> {
        self.state.room(code).await
    }

    /// Every scoring call received, in arrival order.
    pub async fn answer_calls(&self) -> Vec<Value> {
        self.state.answers.lock().await.clone()
    }

    /// Attendance registrations received, as `(code, user_id)` pairs.
    pub async fn joins(&self) -> Vec<(String, u64)> {
        self.state.joins.lock().await.clone()
    }

    /// Fix the standings served by the leaderboard endpoint for `code`,
    /// overriding the totals folded from scoring calls.
    pub async fn set_standings(&self, code: &str, rows: &[(&str, u32)]) {
        let rows = rows
            .iter()
            .map(|(name, score)| ScoreEntry { username: (*name).to_owned(), score: *score })
            .collect();
        self.state.standings.lock().await.insert(code.to_owned(), rows);
    }
}

impl Drop for MockQuizService {
    fn drop(&mut self) {
        self.task.abort();
    }
}

// -- rooms --------------------------------------------------------------------

/// One session's channel: a fan-out of pushed frames to every connected
/// client, plus a record of everything clients sent.
pub struct Room {
    push_tx: broadcast::Sender<String>,
    kick_tx: broadcast::Sender<()>,
    received: Mutex<Vec<Value>>,
    accepted: AtomicU32,
}

impl Room {
    fn new() -> Arc<Self> {
        let (push_tx, _) = broadcast::channel(64);
        let (kick_tx, _) = broadcast::channel(4);
        Arc::new(Self {
            push_tx,
            kick_tx,
            received: Mutex::new(Vec::new()),
            accepted: AtomicU32::new(0),
        })
    }

    /// Push a frame to every client connected right now. Frames pushed while
    /// nobody is connected are lost; await the join handshake first.
    pub fn push(&self, frame: Value) {
        let _ = self.push_tx.send(frame.to_string());
    }

    /// Sever every open connection without a close handshake.
    pub fn kick(&self) {
        let _ = self.kick_tx.send(());
    }

    /// Total connections accepted since the room was created.
    pub fn accepted(&self) -> u32 {
        self.accepted.load(Ordering::SeqCst)
    }

    pub async fn frames(&self) -> Vec<Value> {
        self.received.lock().await.clone()
    }

    /// Recorded client frames with the given `type` tag.
    pub async fn frames_of(&self, kind: &str) -> Vec<Value> {
        self.received.lock().await.iter().filter(|f| f["type"] == kind).cloned().collect()
    }

    /// Wait for the first client frame of `kind` and return it.
    pub async fn await_frame(&self, kind: &str) -> anyhow::Result<Value> {
        self.await_frame_count(kind, 1).await?;
        self.frames_of(kind)
            .await
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("{kind} frame vanished"))
    }

    /// Wait until at least `count` client frames of `kind` have arrived.
    pub async fn await_frame_count(&self, kind: &str, count: usize) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            if self.frames_of(kind).await.len() >= count {
                return Ok(());
            }
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("fewer than {count} {kind} frames arrived within {WAIT:?}");
            }
            tokio::time::sleep(POLL).await;
        }
    }

    /// Wait until at least `count` connections have been accepted.
    pub async fn await_connections(&self, count: u32) -> anyhow::Result<()> {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            if self.accepted() >= count {
                return Ok(());
            }
            if tokio::time::Instant::now() > deadline {
                anyhow::bail!("fewer than {count} connections within {WAIT:?}");
            }
            tokio::time::sleep(POLL).await;
        }
    }
}

// -- routes -------------------------------------------------------------------

fn build_router(state: Arc<ServiceState>) -> Router {
    Router::new()
        .route("/api/auth/login", post(login))
        .route("/api/auth/register", post(register))
        .route("/api/quiz", post(create_quiz))
        .route("/api/quiz/my-quizzes", get(my_quizzes))
        .route("/api/quiz/answer", post(submit_answer))
        .route("/api/quiz/{code}", get(fetch_quiz))
        .route("/api/quiz/{code}/join", post(join_quiz))
        .route("/api/quiz/{code}/start", post(start_quiz))
        .route("/api/quiz/{code}/leaderboard", get(leaderboard))
        .route("/ws/{code}", get(ws_handler))
        .with_state(state)
}

fn bearer_identity(headers: &HeaderMap) -> Option<Identity> {
    let value = headers.get(axum::http::header::AUTHORIZATION)?.to_str().ok()?;
    let token = value.strip_prefix("Bearer ")?;
    decode_token(token)
}

async fn login(State(state): State<Arc<ServiceState>>, Json(body): Json<Value>) -> Response {
    let Some(username) = body["username"].as_str() else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let mut users = state.users.lock().await;
    let record = users.entry(username.to_owned()).or_insert_with(|| UserRecord {
        user_id: state.next_user_id.fetch_add(1, Ordering::SeqCst),
        email: None,
    });
    let token = mint_token(record.user_id, username, record.email.as_deref());
    Json(json!({ "token": token })).into_response()
}

async fn register(State(state): State<Arc<ServiceState>>, Json(body): Json<Value>) -> Response {
    let Some(username) = body["username"].as_str() else {
        return StatusCode::BAD_REQUEST.into_response();
    };
    let email = body["email"].as_str().map(str::to_owned);
    let mut users = state.users.lock().await;
    let record = users.entry(username.to_owned()).or_insert_with(|| UserRecord {
        user_id: state.next_user_id.fetch_add(1, Ordering::SeqCst),
        email: None,
    });
    record.email = email;
    let token = mint_token(record.user_id, username, record.email.as_deref());
    Json(json!({ "token": token })).into_response()
}

async fn my_quizzes(State(state): State<Arc<ServiceState>>, headers: HeaderMap) -> Response {
    let Some(identity) = bearer_identity(&headers) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let quizzes: Vec<Quiz> = state
        .quizzes
        .lock()
        .await
        .values()
        .filter(|q| q.creator_id == identity.user_id)
        .cloned()
        .collect();
    Json(quizzes).into_response()
}

async fn fetch_quiz(State(state): State<Arc<ServiceState>>, Path(code): Path<String>) -> Response {
    match state.quizzes.lock().await.get(&code) {
        Some(quiz) => Json(quiz.clone()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

async fn create_quiz(
    State(state): State<Arc<ServiceState>>,
    headers: HeaderMap,
    Json(definition): Json<QuizDefinition>,
) -> Response {
    let Some(identity) = bearer_identity(&headers) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let id = state.next_quiz_id.fetch_add(1, Ordering::SeqCst);
    let questions = definition
        .questions
        .into_iter()
        .map(|q| Question {
            id: state.next_question_id.fetch_add(1, Ordering::SeqCst),
            text: q.text,
            options: q
                .options
                .into_iter()
                .enumerate()
                .map(|(i, text)| QuestionOption { id: i as u64 + 1, text })
                .collect(),
            correct_answer: Some(q.correct_answer),
            time_limit: q.time_limit,
        })
        .collect();
    let quiz = Quiz {
        id,
        quiz_code: format!("QZ{id}"),
        title: definition.title,
        description: definition.description,
        questions,
        is_active: false,
        creator_id: identity.user_id,
    };
    state.quizzes.lock().await.insert(quiz.quiz_code.clone(), quiz.clone());
    Json(quiz).into_response()
}

async fn join_quiz(
    State(state): State<Arc<ServiceState>>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Response {
    let Some(identity) = bearer_identity(&headers) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    if !state.quizzes.lock().await.contains_key(&code) {
        return StatusCode::NOT_FOUND.into_response();
    }
    state.joins.lock().await.push((code, identity.user_id));
    StatusCode::OK.into_response()
}

async fn start_quiz(
    State(state): State<Arc<ServiceState>>,
    Path(code): Path<String>,
    headers: HeaderMap,
) -> Response {
    let Some(identity) = bearer_identity(&headers) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let mut quizzes = state.quizzes.lock().await;
    let Some(quiz) = quizzes.get_mut(&code) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    if quiz.creator_id != identity.user_id {
        return StatusCode::FORBIDDEN.into_response();
    }
    quiz.is_active = true;
    StatusCode::OK.into_response()
}

async fn submit_answer(
    State(state): State<Arc<ServiceState>>,
    headers: HeaderMap,
    Json(body): Json<Value>,
) -> Response {
    let Some(identity) = bearer_identity(&headers) else {
        return StatusCode::UNAUTHORIZED.into_response();
    };
    let quiz_id = body["quiz_id"].as_u64().unwrap_or(0);
    let question_id = body["question_id"].as_u64().unwrap_or(0);
    let answer = body["answer"].as_str().unwrap_or_default();

    let quizzes = state.quizzes.lock().await;
    let Some(question) = quizzes
        .values()
        .find(|q| q.id == quiz_id)
        .and_then(|q| q.questions.iter().find(|qq| qq.id == question_id))
    else {
        return StatusCode::NOT_FOUND.into_response();
    };
    let correct = question.correct_answer.as_deref() == Some(answer);
    drop(quizzes);

    let score = if correct { 100 } else { 0 };
    state.answers.lock().await.push(json!({
        "user": identity.username,
        "quiz_id": quiz_id,
        "question_id": question_id,
        "answer": answer,
        "time_spent": body["time_spent"].as_u64().unwrap_or(0),
        "score": score,
    }));
    Json(json!({ "score": score })).into_response()
}

async fn leaderboard(
    State(state): State<Arc<ServiceState>>,
    Path(code): Path<String>,
) -> Response {
    if let Some(rows) = state.standings.lock().await.get(&code) {
        return Json(rows.clone()).into_response();
    }
    let Some(quiz_id) = state.quizzes.lock().await.get(&code).map(|q| q.id) else {
        return StatusCode::NOT_FOUND.into_response();
    };
    // Fold totals from recorded scoring calls, best first.
    let mut totals: HashMap<String, u32> = HashMap::new();
    for call in state.answers.lock().await.iter() {
        if call["quiz_id"].as_u64() == Some(quiz_id) {
            if let Some(user) = call["user"].as_str() {
                *totals.entry(user.to_owned()).or_default() +=
                    call["score"].as_u64().unwrap_or(0) as u32;
            }
        }
    }
    let mut rows: Vec<ScoreEntry> =
        totals.into_iter().map(|(username, score)| ScoreEntry { username, score }).collect();
    rows.sort_by(|a, b| b.score.cmp(&a.score).then_with(|| a.username.cmp(&b.username)));
    Json(rows).into_response()
}

// -- websocket ----------------------------------------------------------------

/// Channel upgrade for one session room, mounted at `GET /ws/{code}`.
async fn ws_handler(
    State(state): State<Arc<ServiceState>>,
    Path(code): Path<String>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let room = state.room(&code).await;
    ws.on_upgrade(move |socket| serve_room(socket, room))
}

async fn serve_room(socket: WebSocket, room: Arc<Room>) {
    room.accepted.fetch_add(1, Ordering::SeqCst);
    let mut push_rx = room.push_tx.subscribe();
    let mut kick_rx = room.kick_tx.subscribe();
    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            push = push_rx.recv() => match push {
                Ok(text) => {
                    if ws_tx.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::debug!(lagged = n, "room push lagged");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },

            _ = kick_rx.recv() => break,

            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<Value>(text.as_str()) {
                        Ok(frame) => room.received.lock().await.push(frame),
                        Err(_) => tracing::debug!("ignoring non-json client frame"),
                    }
                }
                Some(Ok(Message::Close(_))) | None => break,
                Some(Err(_)) => break,
                _ => {}
            },
        }
    }
}
