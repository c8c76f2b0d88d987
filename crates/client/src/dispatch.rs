// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Fan-out of inbound frames to registered handlers, keyed by frame kind.
//!
//! Registration hands back a [`HandlerId`] so callers can unregister exactly
//! what they registered; [`Dispatcher::subscribe`] wraps that in an RAII guard.
//! Handlers for one kind run in registration order, and a failing handler
//! never stops the rest.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tracing::{debug, warn};

use crate::wire::{FrameKind, Inbound};

/// Callback invoked for every inbound frame of a subscribed kind.
pub type Handler = dyn Fn(&Inbound) -> anyhow::Result<()> + Send + Sync;

/// Opaque registration handle; the only way to unregister a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

#[derive(Default)]
struct Registry {
    next_id: u64,
    handlers: HashMap<FrameKind, Vec<(HandlerId, Arc<Handler>)>>,
}

/// Per-channel dispatcher mapping frame kinds to handler lists.
#[derive(Default)]
pub struct Dispatcher {
    inner: Mutex<Registry>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one frame kind.
    pub fn on<F>(&self, kind: FrameKind, handler: F) -> HandlerId
    where
        F: Fn(&Inbound) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut reg = self.locked();
        reg.next_id += 1;
        let id = HandlerId(reg.next_id);
        reg.handlers.entry(kind).or_default().push((id, Arc::new(handler)));
        id
    }

    /// Register a handler tied to the returned guard's lifetime.
    pub fn subscribe<F>(self: &Arc<Self>, kind: FrameKind, handler: F) -> Subscription
    where
        F: Fn(&Inbound) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let id = self.on(kind, handler);
        Subscription { dispatcher: Arc::clone(self), kind, id }
    }

    /// Unregister one handler. Returns false when the id is not registered
    /// under that kind.
    pub fn off(&self, kind: FrameKind, id: HandlerId) -> bool {
        let mut reg = self.locked();
        let Some(list) = reg.handlers.get_mut(&kind) else {
            return false;
        };
        let before = list.len();
        list.retain(|(registered, _)| *registered != id);
        list.len() != before
    }

    /// Drop every registered handler.
    pub fn clear(&self) {
        self.locked().handlers.clear();
    }

    /// Number of handlers currently registered for a kind.
    pub fn handler_count(&self, kind: FrameKind) -> usize {
        self.locked().handlers.get(&kind).map_or(0, Vec::len)
    }

    /// Run every handler registered for the frame's kind, in registration
    /// order. Handler errors are logged and skipped.
    pub fn dispatch(&self, frame: &Inbound) {
        let kind = frame.kind();
        let handlers: Vec<Arc<Handler>> = {
            let reg = self.locked();
            match reg.handlers.get(&kind) {
                Some(list) => list.iter().map(|(_, h)| Arc::clone(h)).collect(),
                None => Vec::new(),
            }
        };
        if handlers.is_empty() {
            debug!(kind = %kind, "no handler registered, dropping frame");
            return;
        }
        for handler in &handlers {
            if let Err(e) = handler(frame) {
                warn!(kind = %kind, error = %e, "frame handler failed");
            }
        }
    }

    fn locked(&self) -> MutexGuard<'_, Registry> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// RAII registration guard; unregisters its handler on drop.
pub struct Subscription {
    dispatcher: Arc<Dispatcher>,
    kind: FrameKind,
    id: HandlerId,
}

impl Subscription {
    pub fn kind(&self) -> FrameKind {
        self.kind
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.dispatcher.off(self.kind, self.id);
    }
}

#[cfg(test)]
#[path = "dispatch_tests.rs"]
mod tests;
