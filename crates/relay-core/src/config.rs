use std::time::Duration;

use crate::classifier::PhaseMarkers;
use crate::page::SelectorKind;

pub const DEFAULT_CONTROL_URL: &str = "ws://localhost:8082";
pub const DEFAULT_TELEMETRY_URL: &str = "ws://localhost:8081";
pub const DEFAULT_QUEUE_URL: &str = "http://localhost:3001";

/// Endpoint and retry cadence for one supervised websocket.
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Short name used in log fields.
    pub label: &'static str,
    pub url: String,
    pub reconnect_delay: Duration,
}

impl SocketConfig {
    pub fn new(label: &'static str, url: impl Into<String>) -> Self {
        Self {
            label,
            url: url.into(),
            reconnect_delay: Duration::from_secs(3),
        }
    }

    pub fn with_reconnect_delay(mut self, delay: Duration) -> Self {
        self.reconnect_delay = delay;
        self
    }
}

#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub speed_history_capacity: usize,
    pub distance_history_capacity: usize,
    /// Minimum wall-clock spacing between distance history entries.
    pub distance_sample_interval: Duration,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            speed_history_capacity: 60,
            distance_history_capacity: 20,
            distance_sample_interval: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ClassifierConfig {
    pub poll_interval: Duration,
    pub markers: PhaseMarkers,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            markers: PhaseMarkers::default(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub poll_interval: Duration,
    /// Pause between populating the target and the submission attempts.
    pub settle_delay: Duration,
    /// Grace period between submission and the completion report.
    pub confirm_delay: Duration,
    /// Target discovery order; the first kind yielding a usable candidate wins.
    pub selector_priority: Vec<SelectorKind>,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            settle_delay: Duration::from_millis(100),
            confirm_delay: Duration::from_millis(500),
            selector_priority: SelectorKind::TEXT_TARGETS.to_vec(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub control: SocketConfig,
    pub telemetry_socket: SocketConfig,
    pub queue_url: String,
    pub telemetry: TelemetryConfig,
    pub classifier: ClassifierConfig,
    pub bridge: BridgeConfig,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            control: SocketConfig::new("control", DEFAULT_CONTROL_URL),
            telemetry_socket: SocketConfig::new("telemetry", DEFAULT_TELEMETRY_URL),
            queue_url: DEFAULT_QUEUE_URL.to_string(),
            telemetry: TelemetryConfig::default(),
            classifier: ClassifierConfig::default(),
            bridge: BridgeConfig::default(),
        }
    }
}
