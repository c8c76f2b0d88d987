// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Per-question countdown clock.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::time::{interval_at, Duration, Instant};
use tokio_util::sync::CancellationToken;

/// One-second countdown driven by a background task.
///
/// Each tick decrements the remaining seconds and reports the new value; at
/// zero the expiry callback fires exactly once and the task exits. Stopping
/// or dropping the countdown silences it without firing expiry.
pub struct Countdown {
    remaining: Arc<AtomicU32>,
    cancel: CancellationToken,
}

impl Countdown {
    /// Start a countdown from `initial` seconds. An `initial` of zero expires
    /// immediately without ticking.
    pub fn start<T, E>(initial: u32, on_tick: T, on_expire: E) -> Self
    where
        T: Fn(u32) + Send + 'static,
        E: FnOnce() + Send + 'static,
    {
        let remaining = Arc::new(AtomicU32::new(initial));
        let cancel = CancellationToken::new();
        let task_remaining = Arc::clone(&remaining);
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            run(initial, task_remaining, task_cancel, on_tick, on_expire).await;
        });
        Self { remaining, cancel }
    }

    /// Seconds left on the clock.
    pub fn remaining(&self) -> u32 {
        self.remaining.load(Ordering::Relaxed)
    }

    /// Stop ticking without firing expiry.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Countdown {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

async fn run<T, E>(
    initial: u32,
    remaining: Arc<AtomicU32>,
    cancel: CancellationToken,
    on_tick: T,
    on_expire: E,
) where
    T: Fn(u32),
    E: FnOnce(),
{
    if initial == 0 {
        on_expire();
        return;
    }
    let mut on_expire = Some(on_expire);
    let mut ticks = interval_at(Instant::now() + Duration::from_secs(1), Duration::from_secs(1));
    loop {
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = ticks.tick() => {
                let next = remaining.load(Ordering::Relaxed).saturating_sub(1);
                remaining.store(next, Ordering::Relaxed);
                on_tick(next);
                if next == 0 {
                    if let Some(expire) = on_expire.take() {
                        expire();
                    }
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
#[path = "countdown_tests.rs"]
mod tests;
