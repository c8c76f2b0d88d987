// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! CLI entry points: account commands, quiz management, and the interactive
//! `play` loop.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::api::ApiClient;
use crate::config::ClientConfig;
use crate::identity::IdentityStore;
use crate::leaderboard::{LeaderboardRow, LeaderboardView};
use crate::model::{Question, QuizDefinition};
use crate::session::{Phase, Role, SessionHandle, SessionView};

/// Live quiz session client.
#[derive(Debug, Parser)]
#[command(name = "quizwire", version, about = "Live quiz session client")]
pub struct Cli {
    #[command(flatten)]
    pub config: ClientConfig,

    /// Log level filter (e.g. "info", "quizwire=debug").
    #[arg(long, default_value = "info", env = "QUIZWIRE_LOG")]
    pub log_level: String,

    /// Log output format: "text" or "json".
    #[arg(long, default_value = "text", env = "QUIZWIRE_LOG_FORMAT")]
    pub log_format: String,

    #[command(subcommand)]
    pub command: CliCommand,
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Log in and store the session token.
    Login {
        username: String,
        #[arg(long, env = "QUIZWIRE_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Create an account and store the session token.
    Register {
        username: String,
        email: String,
        #[arg(long, env = "QUIZWIRE_PASSWORD", hide_env_values = true)]
        password: Option<String>,
    },
    /// Drop the stored session token.
    Logout,
    /// List quizzes you created.
    Quizzes,
    /// Create a quiz from a JSON definition file.
    Create { file: PathBuf },
    /// Show a quiz by its join code.
    Show { code: String },
    /// Print the current standings for a session.
    Leaderboard { code: String },
    /// Join a session and play it interactively.
    Play { code: String },
}

/// Dispatch one parsed invocation.
pub async fn run(cli: Cli) -> anyhow::Result<()> {
    let store = Arc::new(IdentityStore::open(&cli.config.token_file));
    let api = Arc::new(ApiClient::new(&cli.config, store));

    match cli.command {
        CliCommand::Login { username, password } => login(&api, &username, password).await,
        CliCommand::Register { username, email, password } => {
            register(&api, &username, &email, password).await
        }
        CliCommand::Logout => {
            api.logout()?;
            println!("logged out");
            Ok(())
        }
        CliCommand::Quizzes => quizzes(&api).await,
        CliCommand::Create { file } => create(&api, &file).await,
        CliCommand::Show { code } => show(&api, &code).await,
        CliCommand::Leaderboard { code } => leaderboard(&api, &code).await,
        CliCommand::Play { code } => play(&cli.config, api, &code).await,
    }
}

// -- account and quiz commands ------------------------------------------------

async fn login(api: &ApiClient, username: &str, password: Option<String>) -> anyhow::Result<()> {
    let password = require_password(password)?;
    let identity = api.login(username, &password).await?;
    println!("logged in as {} (user {})", identity.username, identity.user_id);
    Ok(())
}

async fn register(
    api: &ApiClient,
    username: &str,
    email: &str,
    password: Option<String>,
) -> anyhow::Result<()> {
    let password = require_password(password)?;
    let identity = api.register(username, email, &password).await?;
    println!("registered as {} (user {})", identity.username, identity.user_id);
    Ok(())
}

fn require_password(password: Option<String>) -> anyhow::Result<String> {
    password
        .ok_or_else(|| anyhow::anyhow!("password required (use --password or QUIZWIRE_PASSWORD)"))
}

async fn quizzes(api: &ApiClient) -> anyhow::Result<()> {
    let quizzes = api.my_quizzes().await?;
    if quizzes.is_empty() {
        println!("no quizzes yet");
        return Ok(());
    }
    println!("{:<8} {:<32} {:<10} {}", "CODE", "TITLE", "QUESTIONS", "ACTIVE");
    for quiz in &quizzes {
        println!(
            "{:<8} {:<32} {:<10} {}",
            quiz.quiz_code,
            quiz.title,
            quiz.questions.len(),
            if quiz.is_active { "yes" } else { "no" },
        );
    }
    Ok(())
}

async fn create(api: &ApiClient, file: &Path) -> anyhow::Result<()> {
    let contents = tokio::fs::read_to_string(file).await?;
    let definition: QuizDefinition = serde_json::from_str(&contents)?;
    let quiz = api.create_quiz(&definition).await?;
    println!("created \"{}\" with code {}", quiz.title, quiz.quiz_code);
    Ok(())
}

async fn show(api: &ApiClient, code: &str) -> anyhow::Result<()> {
    let quiz = api.fetch_quiz(code).await?;
    println!("{} ({})", quiz.title, quiz.quiz_code);
    if !quiz.description.is_empty() {
        println!("{}", quiz.description);
    }
    println!("{} question(s), active: {}", quiz.questions.len(), quiz.is_active);
    for (i, question) in quiz.questions.iter().enumerate() {
        println!("  {}. {} [{}s]", i + 1, question.text, question.countdown_secs());
    }
    Ok(())
}

async fn leaderboard(api: &ApiClient, code: &str) -> anyhow::Result<()> {
    let viewer = api.identity().map(|identity| identity.username).unwrap_or_default();
    let rows = LeaderboardView::pull(api, code, &viewer).await?;
    print_rows(&rows);
    Ok(())
}

// -- play ---------------------------------------------------------------------

async fn play(config: &ClientConfig, api: Arc<ApiClient>, code: &str) -> anyhow::Result<()> {
    let session = SessionHandle::enter(config, api, code).await?;
    print_help(session.snapshot().role);

    let mut view_rx = session.view();
    let mut renderer = Renderer::new();
    renderer.show(&view_rx.borrow().clone());

    let stdin = BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();

    loop {
        tokio::select! {
            changed = view_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let view = view_rx.borrow_and_update().clone();
                renderer.show(&view);
            }
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let input = line.trim();
                if input.is_empty() {
                    continue;
                }
                match input {
                    "quit" | "q" => break,
                    "start" => match session.start().await {
                        Ok(()) => println!("quiz started"),
                        Err(e) => eprintln!("start failed: {e}"),
                    },
                    "next" | "n" => {
                        if let Err(e) = session.advance().await {
                            eprintln!("advance failed: {e}");
                        }
                    }
                    answer => {
                        let snapshot = view_rx.borrow().clone();
                        let text = resolve_answer(snapshot.question.as_ref(), answer);
                        match session.submit(&text).await {
                            Ok(points) => println!("answered ({points} points)"),
                            Err(e) => eprintln!("answer rejected: {e}"),
                        }
                    }
                }
            }
        }
    }
    session.leave().await;
    Ok(())
}

fn print_help(role: Role) {
    match role {
        Role::Host => println!("commands: start, next, <answer>, quit"),
        Role::Participant => println!("commands: <option number or text>, quit"),
    }
}

/// A bare number picks the option at that 1-based position; anything else is
/// submitted verbatim.
fn resolve_answer(question: Option<&Question>, input: &str) -> String {
    if let (Ok(pick), Some(question)) = (input.parse::<usize>(), question) {
        if pick >= 1 && pick <= question.options.len() {
            return question.options[pick - 1].text.clone();
        }
    }
    input.to_owned()
}

/// Prints only what changed between view snapshots, so countdown ticks do not
/// reprint the whole question.
struct Renderer {
    phase: Option<Phase>,
    question_id: Option<u64>,
    participant_count: usize,
    time_left: u32,
    finals_shown: bool,
}

impl Renderer {
    fn new() -> Self {
        Self {
            phase: None,
            question_id: None,
            participant_count: 0,
            time_left: 0,
            finals_shown: false,
        }
    }

    fn show(&mut self, view: &SessionView) {
        let phase_changed = self.phase != Some(view.phase);
        match view.phase {
            Phase::Loading => {
                if phase_changed {
                    println!("loading session {}...", view.code);
                }
            }
            Phase::Idle => {
                if phase_changed {
                    println!("{} ({}): waiting for the host to start", view.quiz_title, view.code);
                }
                if view.participant_count != self.participant_count {
                    println!("{} in the room", view.participant_count);
                }
            }
            Phase::InQuestion => {
                let id = view.question.as_ref().map(|q| q.id);
                if phase_changed || id != self.question_id {
                    print_question(view);
                } else if view.time_left != self.time_left
                    && view.time_left > 0
                    && view.time_left % 10 == 0
                {
                    println!("  {}s left", view.time_left);
                }
            }
            Phase::WaitingForNext => {
                if phase_changed {
                    match &view.waiting_message {
                        Some(message) => println!("{message}"),
                        None => println!("waiting for the next question (score {})", view.score),
                    }
                }
            }
            Phase::Finished => {
                if phase_changed {
                    println!("session over, final score {}", view.score);
                }
                if !view.final_rows.is_empty() && !self.finals_shown {
                    self.finals_shown = true;
                    print_rows(&view.final_rows);
                    println!("(q to exit)");
                }
            }
        }
        self.phase = Some(view.phase);
        self.question_id = view.question.as_ref().map(|q| q.id);
        self.participant_count = view.participant_count;
        self.time_left = view.time_left;
    }
}

fn print_question(view: &SessionView) {
    let Some(question) = &view.question else {
        return;
    };
    println!();
    println!(
        "Q{}/{}: {} [{}s]",
        view.question_index + 1,
        view.total_questions,
        question.text,
        view.time_left,
    );
    for (i, option) in question.options.iter().enumerate() {
        println!("  {}. {}", i + 1, option.text);
    }
}

fn print_rows(rows: &[LeaderboardRow]) {
    if rows.is_empty() {
        println!("no standings yet");
        return;
    }
    println!("{:<6} {:<24} {}", "RANK", "PLAYER", "SCORE");
    for row in rows {
        let marker = if row.is_self { " *" } else { "" };
        println!("{:<6} {:<24} {}{marker}", row.rank, row.username, row.score);
    }
}

#[cfg(test)]
#[path = "cli_tests.rs"]
mod tests;
