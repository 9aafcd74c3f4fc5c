use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Emitted by the page classifier on entering or leaving the active phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionSignal {
    Start,
    End,
}

/// One-directional fan-out from the classifier to the other relays.
#[derive(Debug, Clone)]
pub struct SessionBus {
    tx: broadcast::Sender<SessionSignal>,
}

impl SessionBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(16);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionSignal> {
        self.tx.subscribe()
    }

    /// Returns the number of subscribers reached; zero is not an error.
    pub fn publish(&self, signal: SessionSignal) -> usize {
        self.tx.send(signal).unwrap_or(0)
    }
}

impl Default for SessionBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::tokio_timeout_test(5)]
    async fn fans_out_to_every_subscriber() {
        let bus = SessionBus::new();
        let mut telemetry = bus.subscribe();
        let mut input = bus.subscribe();
        assert_eq!(bus.publish(SessionSignal::Start), 2);
        assert_eq!(telemetry.recv().await.unwrap(), SessionSignal::Start);
        assert_eq!(input.recv().await.unwrap(), SessionSignal::Start);
    }

    #[test_timeout::timeout]
    fn publishing_without_subscribers_is_harmless() {
        let bus = SessionBus::new();
        assert_eq!(bus.publish(SessionSignal::End), 0);
    }
}
