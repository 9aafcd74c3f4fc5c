//! Supervised websocket with a perpetual, single-flight reconnect loop.
//!
//! Callers never see the raw stream: outbound text goes through a
//! [`SocketHandle`] (dropped while disconnected, never queued) and inbound text
//! arrives on an unbounded channel in receive order.

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SocketConfig;
use crate::error::{RelayError, RelayResult};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Reconnect bookkeeping for one connection: at most one attempt may be
/// pending, and nothing is scheduled once the socket was closed on purpose.
#[derive(Debug, Default, Clone)]
pub struct ReconnectSchedule {
    pending: bool,
    intentional_close: bool,
    scheduled: u64,
}

impl ReconnectSchedule {
    /// Records a close. Returns true when a new attempt was scheduled.
    pub fn on_close(&mut self) -> bool {
        if self.intentional_close || self.pending {
            return false;
        }
        self.pending = true;
        self.scheduled += 1;
        true
    }

    /// The reconnect timer fired. Returns true when the attempt should run.
    pub fn on_fire(&mut self) -> bool {
        let run = self.pending && !self.intentional_close;
        self.pending = false;
        run
    }

    pub fn close_intentionally(&mut self) {
        self.intentional_close = true;
        self.pending = false;
    }

    pub fn is_pending(&self) -> bool {
        self.pending
    }

    pub fn is_closed(&self) -> bool {
        self.intentional_close
    }

    /// Total attempts ever scheduled.
    pub fn scheduled(&self) -> u64 {
        self.scheduled
    }
}

/// Cloneable sender side of a [`RelaySocket`].
#[derive(Debug, Clone)]
pub struct SocketHandle {
    label: &'static str,
    outbound: mpsc::UnboundedSender<String>,
    connected: watch::Receiver<bool>,
    cancel: CancellationToken,
}

impl SocketHandle {
    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.borrow()
    }

    pub fn connected_watch(&self) -> watch::Receiver<bool> {
        self.connected.clone()
    }

    /// Fire-and-forget send. Fails with [`RelayError::NotConnected`] instead of
    /// buffering when the socket is down.
    pub fn send_text(&self, text: String) -> RelayResult<()> {
        if !self.is_connected() {
            return Err(RelayError::NotConnected);
        }
        self.outbound
            .send(text)
            .map_err(|_| RelayError::NotConnected)
    }

    pub fn send_json<T: Serialize>(&self, value: &T) -> RelayResult<()> {
        if !self.is_connected() {
            return Err(RelayError::NotConnected);
        }
        let text = serde_json::to_string(value)?;
        self.send_text(text)
    }

    /// Deliberate shutdown: sends a close frame and stops reconnecting.
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

pub struct RelaySocket {
    pub handle: SocketHandle,
    pub inbound: mpsc::UnboundedReceiver<String>,
    pub task: JoinHandle<()>,
}

impl RelaySocket {
    /// Starts the supervisor. The socket stops when `cancel` (or a parent of it)
    /// is cancelled or when [`SocketHandle::close`] is called.
    pub fn spawn(config: SocketConfig, cancel: &CancellationToken) -> Self {
        let cancel = cancel.child_token();
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (inbound_tx, inbound_rx) = mpsc::unbounded_channel();
        let (connected_tx, connected_rx) = watch::channel(false);

        let handle = SocketHandle {
            label: config.label,
            outbound: outbound_tx,
            connected: connected_rx,
            cancel: cancel.clone(),
        };
        let task = tokio::spawn(supervise(
            config,
            outbound_rx,
            inbound_tx,
            connected_tx,
            cancel,
        ));

        Self {
            handle,
            inbound: inbound_rx,
            task,
        }
    }
}

enum PumpExit {
    Remote,
    Shutdown,
}

async fn supervise(
    config: SocketConfig,
    mut outbound_rx: mpsc::UnboundedReceiver<String>,
    inbound_tx: mpsc::UnboundedSender<String>,
    connected_tx: watch::Sender<bool>,
    cancel: CancellationToken,
) {
    let label = config.label;
    let mut schedule = ReconnectSchedule::default();
    let mut failures: u32 = 0;

    loop {
        let attempt = tokio::select! {
            _ = cancel.cancelled() => break,
            attempt = connect_async(config.url.as_str()) => attempt,
        };

        match attempt {
            Ok((stream, _)) => {
                failures = 0;
                info!(socket = label, url = %config.url, "socket connected");
                // Anything produced before this connection existed is stale.
                while outbound_rx.try_recv().is_ok() {}
                connected_tx.send_replace(true);
                let exit = pump(label, stream, &mut outbound_rx, &inbound_tx, &cancel).await;
                connected_tx.send_replace(false);
                match exit {
                    PumpExit::Shutdown => break,
                    PumpExit::Remote => info!(socket = label, "socket disconnected"),
                }
            }
            Err(err) => {
                failures += 1;
                let err = RelayError::from(err);
                if failures == 1 {
                    warn!(socket = label, url = %config.url, error = %err, "socket connect failed");
                } else {
                    debug!(socket = label, failures, error = %err, "socket connect failed");
                }
            }
        }

        if cancel.is_cancelled() {
            schedule.close_intentionally();
        }
        if !schedule.on_close() {
            break;
        }
        debug!(
            socket = label,
            delay_ms = config.reconnect_delay.as_millis() as u64,
            attempt = schedule.scheduled(),
            "reconnect scheduled"
        );
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(config.reconnect_delay) => {}
        }
        if !schedule.on_fire() {
            break;
        }
    }

    schedule.close_intentionally();
    connected_tx.send_replace(false);
    debug!(socket = label, "socket supervisor stopped");
}

async fn pump(
    label: &'static str,
    stream: WsStream,
    outbound_rx: &mut mpsc::UnboundedReceiver<String>,
    inbound_tx: &mpsc::UnboundedSender<String>,
    cancel: &CancellationToken,
) -> PumpExit {
    let (mut sink, mut source) = stream.split();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = sink.send(Message::Close(None)).await;
                return PumpExit::Shutdown;
            }
            outbound = outbound_rx.recv() => match outbound {
                Some(text) => {
                    if let Err(err) = sink.send(Message::Text(text.into())).await {
                        warn!(socket = label, error = %err, "socket send failed");
                        return PumpExit::Remote;
                    }
                }
                // Every handle is gone; nobody can use this socket anymore.
                None => {
                    let _ = sink.send(Message::Close(None)).await;
                    return PumpExit::Shutdown;
                }
            },
            incoming = source.next() => match incoming {
                Some(Ok(Message::Text(text))) => {
                    let _ = inbound_tx.send(text.as_str().to_owned());
                }
                Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                    Ok(text) => {
                        let _ = inbound_tx.send(text);
                    }
                    Err(_) => debug!(socket = label, "dropping non-utf8 binary frame"),
                },
                Some(Ok(Message::Close(_))) | None => return PumpExit::Remote,
                Some(Ok(_)) => {}
                Some(Err(err)) => {
                    warn!(socket = label, error = %err, "socket read failed");
                    return PumpExit::Remote;
                }
            },
        }
    }
}
