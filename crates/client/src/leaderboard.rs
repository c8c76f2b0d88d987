// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Leaderboard views: ranked standings pulled over REST or kept live from
//! channel pushes.

use std::sync::Arc;

use tokio::sync::watch;

use crate::api::ApiClient;
use crate::channel::SessionChannel;
use crate::dispatch::Subscription;
use crate::error::Result;
use crate::model::ScoreEntry;
use crate::wire::{FrameKind, Inbound};

/// One display row. Rank is the 1-based position; `is_self` marks the viewer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeaderboardRow {
    pub username: String,
    pub score: u32,
    pub rank: usize,
    pub is_self: bool,
}

/// Rank server-ordered standings for display. The server decides the order;
/// this only numbers it and tags the viewer's row by exact username match.
pub fn rank_entries(entries: &[ScoreEntry], viewer: &str) -> Vec<LeaderboardRow> {
    entries
        .iter()
        .enumerate()
        .map(|(i, entry)| LeaderboardRow {
            username: entry.username.clone(),
            score: entry.score,
            rank: i + 1,
            is_self: entry.username == viewer,
        })
        .collect()
}

/// Standings for one session.
///
/// A live view replaces its rows wholesale on every channel push and stops
/// updating when dropped; a fixed view never changes after construction.
pub struct LeaderboardView {
    rows_rx: watch::Receiver<Vec<LeaderboardRow>>,
    _live: Option<Subscription>,
}

impl LeaderboardView {
    /// One-shot standings over REST.
    pub async fn pull(api: &ApiClient, code: &str, viewer: &str) -> Result<Vec<LeaderboardRow>> {
        let entries = api.leaderboard(code).await?;
        Ok(rank_entries(&entries, viewer))
    }

    /// Standings that track channel pushes, seeded by one REST pull.
    pub async fn open_live(
        api: &ApiClient,
        channel: &Arc<SessionChannel>,
        viewer: &str,
    ) -> Result<Self> {
        let initial = Self::pull(api, channel.code(), viewer).await?;
        let (rows_tx, rows_rx) = watch::channel(initial);
        let viewer = viewer.to_owned();
        let live = channel.dispatcher().subscribe(FrameKind::LeaderboardUpdate, move |frame| {
            if let Inbound::LeaderboardUpdate { rows } = frame {
                rows_tx.send_replace(rank_entries(rows, &viewer));
            }
            Ok(())
        });
        Ok(Self { rows_rx, _live: Some(live) })
    }

    /// Fixed standings, for terminal results.
    pub fn fixed(rows: Vec<LeaderboardRow>) -> Self {
        let (_tx, rows_rx) = watch::channel(rows);
        Self { rows_rx, _live: None }
    }

    pub fn rows(&self) -> Vec<LeaderboardRow> {
        self.rows_rx.borrow().clone()
    }

    /// Watch receiver for row changes.
    pub fn watch(&self) -> watch::Receiver<Vec<LeaderboardRow>> {
        self.rows_rx.clone()
    }
}

#[cfg(test)]
#[path = "leaderboard_tests.rs"]
mod tests;
