// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Quizwire: client library for live quiz sessions.
//!
//! The pieces line up in layers: [`api`] speaks the REST surface, [`channel`]
//! keeps the session WebSocket alive across drops, [`dispatch`] fans inbound
//! frames out to subscribers, and [`session`] folds both into a renderable
//! state machine. [`cli`] wraps the lot for the terminal.

pub mod api;
pub mod channel;
pub mod cli;
pub mod config;
pub mod countdown;
pub mod dispatch;
pub mod error;
pub mod identity;
pub mod leaderboard;
pub mod model;
pub mod session;
pub mod wire;
