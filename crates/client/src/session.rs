// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session state machine for one live quiz run.
//!
//! [`SessionHandle::enter`] loads the quiz, decides the caller's role, opens
//! the session channel, and spawns an actor that folds channel frames and
//! caller commands into a [`SessionView`] published over a watch. Hosts drive
//! start and advance; participants answer. Both sides follow the same
//! question lifecycle.

use std::collections::HashSet;
use std::sync::Arc;

use indexmap::IndexMap;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::ApiClient;
use crate::channel::SessionChannel;
use crate::config::ClientConfig;
use crate::countdown::Countdown;
use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::leaderboard::{rank_entries, LeaderboardRow};
use crate::model::{AnswerRequest, Participant, Question, Quiz};
use crate::wire::{AdvancePayload, AnswerPayload, FrameKind, Inbound, Outbound, StartPayload};

/// Where the session currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// Still loading the quiz and opening the channel.
    Loading,
    /// Joined; waiting for the host to start.
    Idle,
    /// A question is on screen with its countdown running.
    InQuestion,
    /// Between questions.
    WaitingForNext,
    /// Final standings received, or the host finished the last question.
    Finished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Host,
    Participant,
}

/// Renderable snapshot of one session, republished after every change.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub code: String,
    pub quiz_title: String,
    pub role: Role,
    pub phase: Phase,
    pub active: bool,
    pub question: Option<Question>,
    pub question_index: usize,
    pub total_questions: usize,
    pub time_left: u32,
    pub score: u32,
    pub answered: HashSet<u64>,
    pub participants: Vec<Participant>,
    pub participant_count: usize,
    pub waiting_message: Option<String>,
    pub final_rows: Vec<LeaderboardRow>,
}

impl SessionView {
    fn new(code: &str, quiz: &Quiz, role: Role) -> Self {
        Self {
            code: code.to_owned(),
            quiz_title: quiz.title.clone(),
            role,
            phase: Phase::Loading,
            active: quiz.is_active,
            question: None,
            question_index: 0,
            total_questions: quiz.questions.len(),
            time_left: 0,
            score: 0,
            answered: HashSet::new(),
            participants: Vec::new(),
            participant_count: 0,
            waiting_message: None,
            final_rows: Vec::new(),
        }
    }
}

enum SessionCmd {
    Start { ack: oneshot::Sender<Result<()>> },
    Advance { ack: oneshot::Sender<Result<()>> },
    Submit { answer: String, ack: oneshot::Sender<Result<u32>> },
    Tick { question_id: u64, left: u32 },
    TimeExpired { question_id: u64 },
    Leave { ack: oneshot::Sender<()> },
}

// -- state --------------------------------------------------------------------

struct SessionState {
    quiz: Quiz,
    identity: Identity,
    view: SessionView,
    countdown: Option<Countdown>,
    current_limit: u32,
    cmd_tx: mpsc::UnboundedSender<SessionCmd>,
}

impl SessionState {
    fn apply_inbound(&mut self, frame: &Inbound) {
        match frame {
            Inbound::Question { question, index } => self.begin_question(question.clone(), *index),
            Inbound::QuizStart => {
                self.view.active = true;
                if self.view.phase == Phase::Idle {
                    self.view.phase = Phase::WaitingForNext;
                }
            }
            Inbound::ParticipantUpdate { count } => {
                self.view.participant_count = *count;
            }
            Inbound::ParticipantList { participants, count } => {
                let mut roster: IndexMap<u64, Participant> =
                    IndexMap::with_capacity(participants.len());
                for participant in participants {
                    roster.insert(participant.user_id, participant.clone());
                }
                self.view.participants = roster.into_values().collect();
                self.view.participant_count = *count;
            }
            Inbound::FinalLeaderboard { rows } => {
                self.view.final_rows = rank_entries(rows, &self.identity.username);
                self.view.phase = Phase::Finished;
                self.view.time_left = 0;
                self.view.waiting_message = None;
                self.stop_countdown();
            }
            Inbound::QuizEndWait { message } => {
                self.view.waiting_message = Some(message.clone());
                if self.view.phase != Phase::Finished {
                    self.view.phase = Phase::WaitingForNext;
                }
            }
            Inbound::Error { message } => {
                warn!(code = %self.view.code, message = %message, "server reported an error");
            }
            Inbound::LeaderboardUpdate { .. } | Inbound::Unknown { .. } => {}
        }
    }

    /// Show a question and wind up its countdown. Replacing the countdown
    /// silences the previous question's clock.
    fn begin_question(&mut self, question: Question, index: usize) {
        let limit = question.countdown_secs();
        let question_id = question.id;
        self.view.question_index = index;
        self.view.time_left = limit;
        self.view.waiting_message = None;
        self.view.active = true;
        self.view.phase = Phase::InQuestion;
        self.view.question = Some(question);
        self.current_limit = limit;

        let ticks = self.cmd_tx.clone();
        let expiry = self.cmd_tx.clone();
        self.countdown = Some(Countdown::start(
            limit,
            move |left| {
                let _ = ticks.send(SessionCmd::Tick { question_id, left });
            },
            move || {
                let _ = expiry.send(SessionCmd::TimeExpired { question_id });
            },
        ));
        info!(code = %self.view.code, index, question_id, limit, "question begins");
    }

    fn submit_guard(&self) -> Result<&Question> {
        let question = match (self.view.phase, self.view.question.as_ref()) {
            (Phase::InQuestion, Some(question)) => question,
            _ => return Err(Error::NoActiveQuestion),
        };
        if self.view.answered.contains(&question.id) {
            return Err(Error::AlreadyAnswered { question_id: question.id });
        }
        Ok(question)
    }

    /// A clock event only counts while its question is still the live one.
    fn expiry_is_current(&self, question_id: u64) -> bool {
        self.view.phase == Phase::InQuestion
            && self.view.question.as_ref().is_some_and(|q| q.id == question_id)
    }

    fn on_last_question(&self) -> bool {
        self.view.question_index + 1 >= self.view.total_questions
    }

    fn finish_locally(&mut self) {
        self.stop_countdown();
        self.view.phase = Phase::Finished;
        self.view.time_left = 0;
    }

    fn stop_countdown(&mut self) {
        if let Some(countdown) = self.countdown.take() {
            countdown.stop();
        }
    }
}

// -- actor --------------------------------------------------------------------

struct SessionActor {
    state: SessionState,
    api: Arc<ApiClient>,
    channel: Arc<SessionChannel>,
    view_tx: watch::Sender<SessionView>,
    evt_rx: mpsc::UnboundedReceiver<Inbound>,
    cmd_rx: mpsc::UnboundedReceiver<SessionCmd>,
    cancel: CancellationToken,
}

impl SessionActor {
    async fn run(mut self) {
        self.state.view.phase = Phase::Idle;
        self.publish();
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                frame = self.evt_rx.recv() => match frame {
                    Some(frame) => {
                        self.state.apply_inbound(&frame);
                        self.publish();
                    }
                    None => return,
                },
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(cmd) => {
                        let leave = self.apply_cmd(cmd).await;
                        self.publish();
                        if leave {
                            return;
                        }
                    }
                    None => return,
                },
            }
        }
    }

    async fn apply_cmd(&mut self, cmd: SessionCmd) -> bool {
        match cmd {
            SessionCmd::Start { ack } => {
                let _ = ack.send(self.start().await);
            }
            SessionCmd::Advance { ack } => {
                let _ = ack.send(self.advance());
            }
            SessionCmd::Submit { answer, ack } => {
                let _ = ack.send(self.submit(&answer).await);
            }
            SessionCmd::Tick { question_id, left } => {
                if self.state.expiry_is_current(question_id) {
                    self.state.view.time_left = left;
                }
            }
            SessionCmd::TimeExpired { question_id } => self.expire(question_id).await,
            SessionCmd::Leave { ack } => {
                self.state.stop_countdown();
                self.channel.disconnect().await;
                let _ = ack.send(());
                return true;
            }
        }
        false
    }

    /// Host only: flip the quiz live over REST, then announce the start on
    /// the channel.
    async fn start(&mut self) -> Result<()> {
        if self.state.view.role != Role::Host {
            return Err(Error::NotHost);
        }
        self.api.start_quiz(&self.state.view.code).await?;
        self.channel.send(Outbound::StartQuiz(StartPayload {
            session_code: self.state.view.code.clone(),
            status: "started".into(),
        }));
        self.state.view.active = true;
        Ok(())
    }

    /// Host only: request the next question, or finish after the last one.
    fn advance(&mut self) -> Result<()> {
        if self.state.view.role != Role::Host {
            return Err(Error::NotHost);
        }
        if self.state.view.question.is_none() {
            return Err(Error::NoActiveQuestion);
        }
        if self.state.on_last_question() {
            self.state.finish_locally();
            return Ok(());
        }
        self.channel.send(Outbound::NextQuestion(AdvancePayload {
            session_code: self.state.view.code.clone(),
            current_index: self.state.view.question_index as u64,
        }));
        Ok(())
    }

    /// Score one answer: the REST call decides the points, then the channel
    /// echo informs the room. A question scores at most once; duplicates are
    /// rejected before any scoring call.
    async fn submit(&mut self, answer: &str) -> Result<u32> {
        let (question_id, limit) = {
            let question = self.state.submit_guard()?;
            (question.id, self.state.current_limit)
        };
        let request = AnswerRequest {
            quiz_id: self.state.quiz.id,
            question_id,
            answer: answer.to_owned(),
            time_spent: limit.saturating_sub(self.state.view.time_left),
        };
        let result = self.api.submit_answer(&request).await.map_err(Error::AnswerSubmission)?;
        self.state.view.answered.insert(question_id);
        self.state.view.score += result.score;
        self.channel.send(Outbound::AnswerSubmitted(AnswerPayload {
            session_code: self.state.view.code.clone(),
            question_id,
            answer: answer.to_owned(),
            user_id: self.state.identity.user_id,
        }));
        debug!(code = %self.state.view.code, question_id, awarded = result.score, "answer scored");
        Ok(result.score)
    }

    /// Countdown expiry: an unanswered question gets a blank submission, then
    /// the host advances on the room's behalf while participants wait.
    async fn expire(&mut self, question_id: u64) {
        if !self.state.expiry_is_current(question_id) {
            return;
        }
        self.state.view.time_left = 0;
        if !self.state.view.answered.contains(&question_id) {
            if let Err(e) = self.submit("").await {
                warn!(
                    code = %self.state.view.code,
                    question_id,
                    err = %e,
                    "blank auto-submit failed"
                );
            }
        }
        match self.state.view.role {
            Role::Host => {
                if let Err(e) = self.advance() {
                    warn!(code = %self.state.view.code, err = %e, "auto-advance failed");
                }
            }
            Role::Participant => {
                self.state.view.phase = Phase::WaitingForNext;
            }
        }
    }

    fn publish(&self) {
        self.view_tx.send_replace(self.state.view.clone());
    }
}

// -- handle -------------------------------------------------------------------

/// Handle to a running session actor.
pub struct SessionHandle {
    cmd_tx: mpsc::UnboundedSender<SessionCmd>,
    view_rx: watch::Receiver<SessionView>,
    channel: Arc<SessionChannel>,
    cancel: CancellationToken,
}

impl SessionHandle {
    /// Load the quiz behind `code`, open its channel, and start the session
    /// actor. The caller hosts when they own the quiz, otherwise participates.
    pub async fn enter(config: &ClientConfig, api: Arc<ApiClient>, code: &str) -> Result<Self> {
        let identity = api.identity().ok_or(Error::Auth)?;
        let quiz = api.fetch_quiz(code).await.map_err(Error::SessionLoad)?;
        let role =
            if quiz.creator_id == identity.user_id { Role::Host } else { Role::Participant };
        if role == Role::Participant {
            // Attendance registration is best-effort; the join handshake on
            // the channel is what puts us in the room.
            if let Err(e) = api.join_quiz(code).await {
                warn!(code, err = %e, "join registration failed");
            }
        }
        info!(code, role = ?role, quiz_id = quiz.id, "entering session");

        let channel = SessionChannel::new(config, code, Some(identity.clone()));
        let (evt_tx, evt_rx) = mpsc::unbounded_channel();
        install_handlers(channel.dispatcher(), &evt_tx);

        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let view = SessionView::new(code, &quiz, role);
        let (view_tx, view_rx) = watch::channel(view.clone());
        let cancel = CancellationToken::new();

        let actor = SessionActor {
            state: SessionState {
                quiz,
                identity,
                view,
                countdown: None,
                current_limit: 0,
                cmd_tx: cmd_tx.clone(),
            },
            api,
            channel: Arc::clone(&channel),
            view_tx,
            evt_rx,
            cmd_rx,
            cancel: cancel.clone(),
        };
        tokio::spawn(actor.run());

        let dial = Arc::clone(&channel);
        tokio::spawn(async move {
            if let Err(e) = dial.connect().await {
                warn!(code = dial.code(), err = %e, "session channel connect failed");
            }
        });

        Ok(Self { cmd_tx, view_rx, channel, cancel })
    }

    /// Watch receiver for view snapshots.
    pub fn view(&self) -> watch::Receiver<SessionView> {
        self.view_rx.clone()
    }

    /// Latest published snapshot.
    pub fn snapshot(&self) -> SessionView {
        self.view_rx.borrow().clone()
    }

    pub fn channel(&self) -> &Arc<SessionChannel> {
        &self.channel
    }

    pub async fn start(&self) -> Result<()> {
        self.request(|ack| SessionCmd::Start { ack }).await
    }

    pub async fn advance(&self) -> Result<()> {
        self.request(|ack| SessionCmd::Advance { ack }).await
    }

    /// Submit an answer for the open question. Returns the points awarded.
    pub async fn submit(&self, answer: &str) -> Result<u32> {
        let answer = answer.to_owned();
        self.request(move |ack| SessionCmd::Submit { answer, ack }).await
    }

    /// Stop the countdown, close the channel, end the actor.
    pub async fn leave(&self) {
        let (ack, done) = oneshot::channel();
        if self.cmd_tx.send(SessionCmd::Leave { ack }).is_err() {
            return;
        }
        let _ = done.await;
    }

    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T>>) -> SessionCmd,
    ) -> Result<T> {
        let (ack, done) = oneshot::channel();
        self.cmd_tx.send(make(ack)).map_err(|_| Error::ChannelGone)?;
        done.await.map_err(|_| Error::ChannelGone)?
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Forward the session's frame kinds into the actor's event queue. Clears
/// any prior registrations first so the canonical set is the only one live.
fn install_handlers(dispatcher: &Arc<Dispatcher>, evt_tx: &mpsc::UnboundedSender<Inbound>) {
    dispatcher.clear();
    const KINDS: [FrameKind; 7] = [
        FrameKind::Question,
        FrameKind::QuizStart,
        FrameKind::ParticipantUpdate,
        FrameKind::ParticipantList,
        FrameKind::FinalLeaderboard,
        FrameKind::QuizEndWait,
        FrameKind::Error,
    ];
    for kind in KINDS {
        let tx = evt_tx.clone();
        dispatcher.on(kind, move |frame| {
            tx.send(frame.clone()).map_err(|_| anyhow::anyhow!("session event loop stopped"))?;
            Ok(())
        });
    }
}

#[cfg(test)]
#[path = "session_tests.rs"]
mod tests;
