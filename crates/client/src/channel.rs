// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session channel: the WebSocket connection for one quiz session.
//!
//! A background actor owns the socket. It dials on demand, sends the join
//! handshake shortly after every physical open, decodes inbound frames into
//! the channel's dispatcher, and redials with exponential backoff after any
//! remote close until the attempt budget is spent. A deliberate disconnect
//! resets the reconnect machinery instead of triggering it.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ClientConfig;
use crate::dispatch::Dispatcher;
use crate::error::{Error, Result};
use crate::identity::Identity;
use crate::wire::{decode_inbound, JoinPayload, Outbound};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type Writer = SplitSink<WsStream, Message>;
type ConnectAck = oneshot::Sender<Result<()>>;

/// Channel health, published over a watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelStatus {
    /// No connection and no attempt in flight.
    Disconnected,
    /// Dialing; attempt 0 is the caller's dial, attempt n the nth redial.
    Connecting { attempt: u32 },
    /// Socket open and frames flowing.
    Open,
    /// Every redial failed; stays failed until the next connect().
    Failed { attempts: u32 },
}

enum Command {
    Connect { ack: ConnectAck },
    Send { frame: Outbound },
    Disconnect { ack: oneshot::Sender<()> },
}

/// Handle to the channel actor for one session.
///
/// Cloned freely behind an [`Arc`]; dropping the last handle cancels the
/// actor and tears the socket down.
pub struct SessionChannel {
    code: String,
    cmd_tx: mpsc::UnboundedSender<Command>,
    status_rx: watch::Receiver<ChannelStatus>,
    dispatcher: Arc<Dispatcher>,
    cancel: CancellationToken,
}

impl SessionChannel {
    /// Create the channel actor for one session code. The socket is not
    /// dialed until [`connect`](Self::connect).
    pub fn new(config: &ClientConfig, code: &str, identity: Option<Identity>) -> Arc<Self> {
        let dispatcher = Arc::new(Dispatcher::new());
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ChannelStatus::Disconnected);
        let cancel = CancellationToken::new();

        let actor = ChannelActor {
            url: config.session_ws_url(code),
            code: code.to_owned(),
            identity,
            base_delay: config.reconnect_base(),
            max_attempts: config.reconnect_max_attempts,
            join_grace: config.join_grace(),
            dispatcher: Arc::clone(&dispatcher),
            status_tx,
            cmd_rx,
            cancel: cancel.clone(),
        };
        tokio::spawn(actor.run());

        Arc::new(Self { code: code.to_owned(), cmd_tx, status_rx, dispatcher, cancel })
    }

    /// Open the channel. Calls made while a connection or attempt is already
    /// in flight share that attempt's outcome instead of dialing again.
    pub async fn connect(&self) -> Result<()> {
        let (ack, done) = oneshot::channel();
        self.cmd_tx.send(Command::Connect { ack }).map_err(|_| Error::ChannelGone)?;
        done.await.map_err(|_| Error::ChannelGone)?
    }

    /// Hand one frame to the open socket. Fails soft: without an open socket
    /// the frame is dropped with a log line, never buffered, and any redial
    /// already in progress keeps running.
    pub fn send(&self, frame: Outbound) {
        let tag = frame.tag();
        if self.cmd_tx.send(Command::Send { frame }).is_err() {
            warn!(tag, "channel actor gone, dropping outbound frame");
        }
    }

    /// Deliberate close: clears registered handlers, sends a normal closure,
    /// and resets the reconnect state. Safe to call repeatedly.
    pub async fn disconnect(&self) {
        let (ack, done) = oneshot::channel();
        if self.cmd_tx.send(Command::Disconnect { ack }).is_err() {
            return;
        }
        let _ = done.await;
    }

    pub fn is_connected(&self) -> bool {
        matches!(*self.status_rx.borrow(), ChannelStatus::Open)
    }

    /// Watch receiver tracking [`ChannelStatus`] transitions.
    pub fn status(&self) -> watch::Receiver<ChannelStatus> {
        self.status_rx.clone()
    }

    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    pub fn code(&self) -> &str {
        &self.code
    }
}

impl Drop for SessionChannel {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// -- actor --------------------------------------------------------------------

/// Why an open connection ended.
enum Closed {
    /// Server close, read error, or write failure. Schedules a redial.
    Remote,
    /// disconnect() was called. Back to idle without redialing.
    Local(oneshot::Sender<()>),
    /// Handle dropped or command stream ended. Actor exits.
    Teardown,
}

enum Dialed {
    Connected(WsStream),
    Failed,
    Local(oneshot::Sender<()>),
    Teardown,
}

enum Waited {
    Elapsed,
    Local(oneshot::Sender<()>),
    Teardown,
}

struct ChannelActor {
    url: String,
    code: String,
    identity: Option<Identity>,
    base_delay: Duration,
    max_attempts: u32,
    join_grace: Duration,
    dispatcher: Arc<Dispatcher>,
    status_tx: watch::Sender<ChannelStatus>,
    cmd_rx: mpsc::UnboundedReceiver<Command>,
    cancel: CancellationToken,
}

impl ChannelActor {
    async fn run(mut self) {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return,
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Connect { ack }) => {
                        if !self.episode(ack).await {
                            return;
                        }
                    }
                    Some(Command::Send { frame }) => {
                        warn!(tag = frame.tag(), "channel disconnected, dropping outbound frame");
                    }
                    Some(Command::Disconnect { ack }) => {
                        // Already idle; still honor the handler reset.
                        self.dispatcher.clear();
                        let _ = ack.send(());
                    }
                    None => return,
                },
            }
        }
    }

    /// One connect episode: dial, run the open socket, and redial with
    /// backoff until the attempt budget is spent or the caller disconnects.
    /// Returns false when the actor should exit.
    async fn episode(&mut self, ack: ConnectAck) -> bool {
        let mut waiters = vec![ack];
        let mut attempt: u32 = 0;

        loop {
            self.set_status(ChannelStatus::Connecting { attempt });
            match self.dial(&mut waiters).await {
                Dialed::Connected(stream) => {
                    attempt = 0;
                    self.set_status(ChannelStatus::Open);
                    for waiter in waiters.drain(..) {
                        let _ = waiter.send(Ok(()));
                    }
                    match self.drive_open(stream).await {
                        Closed::Remote => {}
                        Closed::Local(done) => {
                            self.reset_after_disconnect(done, &mut waiters);
                            return true;
                        }
                        Closed::Teardown => return false,
                    }
                }
                Dialed::Failed => {}
                Dialed::Local(done) => {
                    self.reset_after_disconnect(done, &mut waiters);
                    return true;
                }
                Dialed::Teardown => return false,
            }

            attempt += 1;
            if attempt > self.max_attempts {
                warn!(
                    code = %self.code,
                    attempts = self.max_attempts,
                    "reconnect attempts exhausted"
                );
                self.set_status(ChannelStatus::Failed { attempts: self.max_attempts });
                for waiter in waiters.drain(..) {
                    let _ =
                        waiter.send(Err(Error::ReconnectExhausted { attempts: self.max_attempts }));
                }
                return true;
            }
            let delay = backoff_delay(self.base_delay, attempt);
            debug!(
                code = %self.code,
                attempt,
                delay_ms = delay.as_millis() as u64,
                "scheduling reconnect"
            );
            match self.back_off(delay, &mut waiters).await {
                Waited::Elapsed => {}
                Waited::Local(done) => {
                    self.reset_after_disconnect(done, &mut waiters);
                    return true;
                }
                Waited::Teardown => return false,
            }
        }
    }

    async fn dial(&mut self, waiters: &mut Vec<ConnectAck>) -> Dialed {
        debug!(code = %self.code, url = %self.url, "dialing session channel");
        let connect = tokio_tungstenite::connect_async(self.url.clone());
        tokio::pin!(connect);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Dialed::Teardown,
                result = &mut connect => match result {
                    Ok((stream, _)) => return Dialed::Connected(stream),
                    Err(e) => {
                        debug!(code = %self.code, err = %e, "channel dial failed");
                        return Dialed::Failed;
                    }
                },
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Connect { ack }) => waiters.push(ack),
                    Some(Command::Send { frame }) => {
                        warn!(tag = frame.tag(), "channel not open, dropping outbound frame");
                    }
                    Some(Command::Disconnect { ack }) => return Dialed::Local(ack),
                    None => return Dialed::Teardown,
                },
            }
        }
    }

    async fn drive_open(&mut self, stream: WsStream) -> Closed {
        info!(code = %self.code, "session channel open");
        let (mut write, mut read) = stream.split();

        let join_at = tokio::time::Instant::now() + self.join_grace;
        let mut join_sent = false;

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    let _ = write.send(close_frame()).await;
                    return Closed::Teardown;
                }
                _ = tokio::time::sleep_until(join_at), if !join_sent => {
                    join_sent = true;
                    if !self.send_join(&mut write).await {
                        return Closed::Remote;
                    }
                }
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Connect { ack }) => {
                        // Already open; share the live connection.
                        let _ = ack.send(Ok(()));
                    }
                    Some(Command::Send { frame }) => {
                        if !self.write_frame(&mut write, &frame).await {
                            return Closed::Remote;
                        }
                    }
                    Some(Command::Disconnect { ack }) => {
                        let _ = write.send(close_frame()).await;
                        return Closed::Local(ack);
                    }
                    None => {
                        let _ = write.send(close_frame()).await;
                        return Closed::Teardown;
                    }
                },
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => self.route_inbound(text.as_str()),
                    Some(Ok(Message::Close(_))) | None => {
                        debug!(code = %self.code, "session channel closed by server");
                        return Closed::Remote;
                    }
                    Some(Err(e)) => {
                        debug!(code = %self.code, err = %e, "session channel read error");
                        return Closed::Remote;
                    }
                    _ => {} // ping/pong/binary ignored
                },
            }
        }
    }

    async fn back_off(&mut self, delay: Duration, waiters: &mut Vec<ConnectAck>) -> Waited {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Waited::Teardown,
                _ = &mut sleep => return Waited::Elapsed,
                cmd = self.cmd_rx.recv() => match cmd {
                    Some(Command::Connect { ack }) => waiters.push(ack),
                    Some(Command::Send { frame }) => {
                        warn!(tag = frame.tag(), "channel not open, dropping outbound frame");
                    }
                    Some(Command::Disconnect { ack }) => return Waited::Local(ack),
                    None => return Waited::Teardown,
                },
            }
        }
    }

    /// Join handshake, sent once per physical open after the grace delay.
    async fn send_join(&self, write: &mut Writer) -> bool {
        let Some(identity) = self.identity.clone() else {
            warn!(code = %self.code, "no identity claims, skipping join handshake");
            return true;
        };
        let frame = Outbound::JoinQuiz(JoinPayload {
            session_code: self.code.clone(),
            user: identity.into(),
        });
        self.write_frame(write, &frame).await
    }

    /// Serialize and send one frame. Returns false when the socket write
    /// fails, which ends the connection and schedules a redial.
    async fn write_frame(&self, write: &mut Writer, frame: &Outbound) -> bool {
        let json = match serde_json::to_string(frame) {
            Ok(json) => json,
            Err(e) => {
                warn!(tag = frame.tag(), err = %e, "failed to encode outbound frame");
                return true;
            }
        };
        debug!(code = %self.code, tag = frame.tag(), "sending frame");
        match write.send(Message::Text(json.into())).await {
            Ok(()) => true,
            Err(e) => {
                warn!(code = %self.code, tag = frame.tag(), err = %e, "channel write failed");
                false
            }
        }
    }

    fn route_inbound(&self, text: &str) {
        match decode_inbound(text) {
            Ok(frame) => self.dispatcher.dispatch(&frame),
            Err(e) => warn!(code = %self.code, err = %e, "dropping undecodable frame"),
        }
    }

    /// Deliberate close: pending connect waiters are dropped, handlers
    /// cleared, status reset.
    fn reset_after_disconnect(&self, done: oneshot::Sender<()>, waiters: &mut Vec<ConnectAck>) {
        waiters.clear();
        self.dispatcher.clear();
        self.set_status(ChannelStatus::Disconnected);
        let _ = done.send(());
    }

    fn set_status(&self, status: ChannelStatus) {
        self.status_tx.send_replace(status);
    }
}

fn close_frame() -> Message {
    Message::Close(Some(CloseFrame {
        code: CloseCode::Normal,
        reason: "client disconnecting".into(),
    }))
}

/// Delay before redial `attempt` (1-based): base doubled per attempt.
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    base.saturating_mul(1u32 << exp)
}

#[cfg(test)]
#[path = "channel_tests.rs"]
mod tests;
