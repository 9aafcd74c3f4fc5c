use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::control::{ControlFlag, ControlState, EdgeOutcome};
use crate::error::RelayError;
use crate::session::SessionSignal;
use crate::socket::{RelaySocket, SocketHandle};

/// Owns the session's single [`ControlState`] and pushes full snapshots to the
/// control socket.
pub struct InputRelay {
    state: ControlState,
    socket: SocketHandle,
    sent: u64,
}

impl InputRelay {
    pub fn new(socket: SocketHandle) -> Self {
        Self {
            state: ControlState::default(),
            socket,
            sent: 0,
        }
    }

    /// Applies one physical transition and sends the snapshot when the edge
    /// calls for it.
    pub fn apply_edge(&mut self, flag: ControlFlag, pressed: bool) -> EdgeOutcome {
        let outcome = self.state.apply_edge(flag, pressed);
        if outcome.should_send() {
            self.publish();
        } else {
            trace!(?flag, "repeated press ignored");
        }
        outcome
    }

    /// Releases every pressed control, sending a single snapshot if any was held.
    pub fn release_all(&mut self) -> bool {
        if !self.state.any_pressed() {
            return false;
        }
        self.state = ControlState::default();
        self.publish();
        true
    }

    pub fn state(&self) -> ControlState {
        self.state
    }

    pub fn connected(&self) -> bool {
        self.socket.is_connected()
    }

    /// Snapshots handed to the socket while it was open.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    fn publish(&mut self) {
        match self.socket.send_json(&self.state) {
            Ok(()) => {
                self.sent += 1;
                debug!(state = ?self.state, "control state sent");
            }
            Err(RelayError::NotConnected) => {
                debug!(state = ?self.state, "control socket closed; update dropped");
            }
            Err(err) => debug!(error = %err, "control state not sent"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputEvent {
    Edge { flag: ControlFlag, pressed: bool },
    Session(SessionSignal),
}

/// Enqueues events for the relay task; events are applied in send order.
#[derive(Debug, Clone)]
pub struct InputRelayHandle {
    events: mpsc::UnboundedSender<InputEvent>,
    socket: SocketHandle,
}

impl InputRelayHandle {
    pub fn edge(&self, flag: ControlFlag, pressed: bool) {
        let _ = self.events.send(InputEvent::Edge { flag, pressed });
    }

    pub fn press(&self, flag: ControlFlag) {
        self.edge(flag, true);
    }

    pub fn release(&self, flag: ControlFlag) {
        self.edge(flag, false);
    }

    pub fn connected(&self) -> bool {
        self.socket.is_connected()
    }

    pub fn close(&self) {
        self.socket.close();
    }
}

/// Runs the relay as its own task over `socket`. Session end releases held
/// controls; session start needs no action here.
pub fn spawn_input_relay(
    socket: RelaySocket,
    mut signals: broadcast::Receiver<SessionSignal>,
    cancel: CancellationToken,
) -> (InputRelayHandle, JoinHandle<()>) {
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let RelaySocket {
        handle,
        mut inbound,
        task: socket_task,
    } = socket;
    let relay_handle = InputRelayHandle {
        events: events_tx,
        socket: handle.clone(),
    };

    let task = tokio::spawn(async move {
        let mut relay = InputRelay::new(handle);
        let mut signals_open = true;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                event = events_rx.recv() => match event {
                    Some(event) => apply(&mut relay, event),
                    None => break,
                },
                message = inbound.recv() => match message {
                    Some(text) => debug!(target: "relay.control", %text, "control socket message"),
                    None => break,
                },
                signal = signals.recv(), if signals_open => match signal {
                    Ok(signal) => apply(&mut relay, InputEvent::Session(signal)),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "input relay lagged behind session signals");
                    }
                    Err(broadcast::error::RecvError::Closed) => signals_open = false,
                },
            }
        }
        relay.socket.close();
        let _ = socket_task.await;
    });

    (relay_handle, task)
}

fn apply(relay: &mut InputRelay, event: InputEvent) {
    match event {
        InputEvent::Edge { flag, pressed } => {
            relay.apply_edge(flag, pressed);
        }
        InputEvent::Session(SessionSignal::End) => {
            if relay.release_all() {
                debug!("session ended; released held controls");
            }
        }
        InputEvent::Session(SessionSignal::Start) => {}
    }
}
