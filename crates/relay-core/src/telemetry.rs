//! Speed telemetry ingestion.
//!
//! Samples arrive as `{"speed": <km/h>}` on a dedicated socket. Each one updates
//! the instantaneous speed, may open a motion session, and extends the session
//! distance by trapezoidal integration over the wall-clock gap since the
//! previous sample.

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::TelemetryConfig;
use crate::error::{RelayError, RelayResult};
use crate::history::RingBuffer;
use crate::session::SessionSignal;
use crate::socket::RelaySocket;

const SECS_PER_HOUR: f64 = 3600.0;

#[derive(Debug, Deserialize)]
struct SamplePayload {
    speed: f64,
}

/// Parses one telemetry frame. Unknown fields are ignored; non-finite or
/// negative speeds are rejected.
pub fn parse_sample(text: &str) -> RelayResult<f64> {
    let payload: SamplePayload = serde_json::from_str(text)?;
    if !payload.speed.is_finite() || payload.speed < 0.0 {
        return Err(RelayError::InvalidSample(format!(
            "speed out of range: {}",
            payload.speed
        )));
    }
    Ok(payload.speed)
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DistanceState {
    pub cumulative_km: f64,
    pub last_sample_speed: Option<f64>,
    pub last_integration_at: Option<Instant>,
}

impl DistanceState {
    /// Adds the trapezoid between the previous sample and this one.
    fn integrate(&mut self, speed: f64, at: Instant) -> f64 {
        let increment = match (self.last_sample_speed, self.last_integration_at) {
            (Some(prev), Some(prev_at)) => {
                let hours = at.saturating_duration_since(prev_at).as_secs_f64() / SECS_PER_HOUR;
                (prev + speed) / 2.0 * hours
            }
            _ => 0.0,
        };
        self.cumulative_km += increment;
        self.last_sample_speed = Some(speed);
        self.last_integration_at = Some(at);
        increment
    }
}

/// Display-facing copy of the ingestor state.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetrySnapshot {
    pub connected: bool,
    pub speed: f64,
    pub distance: f64,
    pub elapsed: Duration,
    pub session_active: bool,
    pub speed_history: Vec<f64>,
    pub distance_history: Vec<f64>,
}

#[derive(Debug, Clone)]
pub struct TelemetryState {
    config: TelemetryConfig,
    connected: bool,
    speed: f64,
    speed_history: RingBuffer<f64>,
    distance: DistanceState,
    distance_history: RingBuffer<f64>,
    session_active: bool,
    elapsed_since: Option<Instant>,
    last_distance_sample_at: Option<Instant>,
    discarded: u64,
}

impl TelemetryState {
    pub fn new(config: TelemetryConfig) -> Self {
        Self {
            speed_history: RingBuffer::new(config.speed_history_capacity),
            distance_history: RingBuffer::new(config.distance_history_capacity),
            config,
            connected: false,
            speed: 0.0,
            distance: DistanceState::default(),
            session_active: false,
            elapsed_since: None,
            last_distance_sample_at: None,
            discarded: 0,
        }
    }

    /// Applies one raw frame received at `at`. Malformed frames are counted and
    /// dropped; returns whether the state changed.
    pub fn ingest_frame(&mut self, text: &str, at: Instant) -> bool {
        match parse_sample(text) {
            Ok(speed) => {
                self.ingest(speed, at);
                true
            }
            Err(err) => {
                self.discarded += 1;
                debug!(error = %err, "discarding telemetry frame");
                false
            }
        }
    }

    pub fn ingest(&mut self, speed: f64, at: Instant) {
        self.speed = speed;
        self.speed_history.push(speed);

        if speed > 0.0 && !self.session_active {
            self.start_session(at);
        }

        if self.session_active {
            self.distance.integrate(speed, at);
            let due = self.last_distance_sample_at.map_or(true, |last| {
                at.saturating_duration_since(last) >= self.config.distance_sample_interval
            });
            if due {
                self.distance_history.push(self.distance.cumulative_km);
                self.last_distance_sample_at = Some(at);
            }
        }
    }

    fn start_session(&mut self, at: Instant) {
        info!(speed = self.speed, "motion session started");
        self.session_active = true;
        self.elapsed_since = Some(at);
        self.distance = DistanceState::default();
        self.distance_history.clear();
        self.last_distance_sample_at = None;
    }

    pub fn on_session_signal(&mut self, signal: SessionSignal, at: Instant) {
        match signal {
            SessionSignal::Start => self.elapsed_since = Some(at),
            SessionSignal::End => {
                if self.session_active {
                    info!(distance_km = self.distance.cumulative_km, "motion session ended");
                }
                self.session_active = false;
            }
        }
    }

    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    pub fn connected(&self) -> bool {
        self.connected
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn distance(&self) -> &DistanceState {
        &self.distance
    }

    pub fn session_active(&self) -> bool {
        self.session_active
    }

    pub fn elapsed(&self, now: Instant) -> Duration {
        self.elapsed_since
            .map(|since| now.saturating_duration_since(since))
            .unwrap_or_default()
    }

    pub fn speed_history(&self) -> &RingBuffer<f64> {
        &self.speed_history
    }

    pub fn distance_history(&self) -> &RingBuffer<f64> {
        &self.distance_history
    }

    pub fn discarded(&self) -> u64 {
        self.discarded
    }

    pub fn snapshot(&self, now: Instant) -> TelemetrySnapshot {
        TelemetrySnapshot {
            connected: self.connected,
            speed: self.speed,
            distance: self.distance.cumulative_km,
            elapsed: self.elapsed(now),
            session_active: self.session_active,
            speed_history: self.speed_history.to_vec(),
            distance_history: self.distance_history.to_vec(),
        }
    }
}

pub struct TelemetryHandle {
    pub snapshot: watch::Receiver<TelemetrySnapshot>,
    pub task: JoinHandle<()>,
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

/// Runs the ingestor over its own socket; every state change republishes the
/// snapshot.
pub fn spawn_telemetry_ingestor(
    socket: RelaySocket,
    config: TelemetryConfig,
    mut signals: broadcast::Receiver<SessionSignal>,
    cancel: CancellationToken,
) -> TelemetryHandle {
    let mut state = TelemetryState::new(config);
    let (snapshot_tx, snapshot_rx) = watch::channel(state.snapshot(now()));

    let task = tokio::spawn(async move {
        let RelaySocket {
            handle,
            mut inbound,
            task: socket_task,
        } = socket;
        let mut connected = handle.connected_watch();
        let mut signals_open = true;

        loop {
            let changed = tokio::select! {
                _ = cancel.cancelled() => break,
                frame = inbound.recv() => match frame {
                    Some(text) => state.ingest_frame(&text, now()),
                    None => break,
                },
                result = connected.changed() => {
                    if result.is_err() {
                        break;
                    }
                    let up = *connected.borrow_and_update();
                    state.set_connected(up);
                    true
                }
                signal = signals.recv(), if signals_open => match signal {
                    Ok(signal) => {
                        state.on_session_signal(signal, now());
                        true
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "telemetry lagged behind session signals");
                        false
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        signals_open = false;
                        false
                    }
                },
            };
            if changed {
                snapshot_tx.send_replace(state.snapshot(now()));
            }
        }

        handle.close();
        let _ = socket_task.await;
    });

    TelemetryHandle {
        snapshot: snapshot_rx,
        task,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state() -> TelemetryState {
        TelemetryState::new(TelemetryConfig::default())
    }

    #[test_timeout::timeout]
    fn trapezoid_over_one_hour() {
        let mut telemetry = state();
        let t0 = Instant::now();
        telemetry.ingest(10.0, t0);
        telemetry.ingest(20.0, t0 + Duration::from_millis(3_600_000));
        assert!((telemetry.distance().cumulative_km - 15.0).abs() < 1e-9);
    }

    #[test_timeout::timeout]
    fn first_positive_sample_opens_session_without_distance() {
        let mut telemetry = state();
        let t0 = Instant::now();
        telemetry.ingest(0.0, t0);
        assert!(!telemetry.session_active());
        telemetry.ingest(12.0, t0 + Duration::from_secs(1));
        assert!(telemetry.session_active());
        assert_eq!(telemetry.distance().cumulative_km, 0.0);
        assert_eq!(telemetry.distance().last_sample_speed, Some(12.0));
    }

    #[test_timeout::timeout]
    fn distance_never_decreases_within_session() {
        let mut telemetry = state();
        let t0 = Instant::now();
        let speeds = [5.0, 0.0, 7.5, 30.0, 0.0, 0.0, 12.25, 3.0];
        let mut previous = 0.0;
        for (i, speed) in speeds.into_iter().enumerate() {
            telemetry.ingest(speed, t0 + Duration::from_millis(700 * i as u64 + 13 * (i * i) as u64));
            let current = telemetry.distance().cumulative_km;
            assert!(current >= previous, "distance went from {previous} to {current}");
            previous = current;
        }
        assert!(previous > 0.0);
    }

    #[test_timeout::timeout]
    fn new_session_resets_distance_to_zero() {
        let mut telemetry = state();
        let t0 = Instant::now();
        telemetry.ingest(20.0, t0);
        telemetry.ingest(20.0, t0 + Duration::from_secs(1800));
        assert!(telemetry.distance().cumulative_km > 9.0);

        telemetry.on_session_signal(SessionSignal::End, t0 + Duration::from_secs(1801));
        telemetry.ingest(0.0, t0 + Duration::from_secs(1802));
        telemetry.ingest(8.0, t0 + Duration::from_secs(1803));
        assert!(telemetry.session_active());
        assert_eq!(telemetry.distance().cumulative_km, 0.0);
        assert_eq!(telemetry.distance_history().to_vec(), vec![0.0]);
    }

    #[test_timeout::timeout]
    fn distance_history_samples_every_interval() {
        let mut telemetry = state();
        let t0 = Instant::now();
        for second in 0..=95u64 {
            telemetry.ingest(36.0, t0 + Duration::from_secs(second));
        }
        // Session start at 0s, then 30s, 60s and 90s.
        let history = telemetry.distance_history().to_vec();
        assert_eq!(history.len(), 4);
        assert_eq!(history[0], 0.0);
        assert!((history[1] - 0.3).abs() < 1e-9);
        assert!((history[3] - 0.9).abs() < 1e-9);
    }

    #[test_timeout::timeout]
    fn histories_respect_capacity() {
        let mut telemetry = state();
        let t0 = Instant::now();
        for minute in 0..120u64 {
            telemetry.ingest(15.0, t0 + Duration::from_secs(minute * 60));
        }
        assert_eq!(telemetry.speed_history().len(), 60);
        assert_eq!(telemetry.distance_history().len(), 20);
        assert_eq!(telemetry.distance_history().latest().copied(), Some(telemetry.distance().cumulative_km));
    }

    #[test_timeout::timeout]
    fn malformed_frames_are_discarded() {
        let mut telemetry = state();
        let t0 = Instant::now();
        assert!(!telemetry.ingest_frame("not json", t0));
        assert!(!telemetry.ingest_frame(r#"{"rpm": 80}"#, t0));
        assert!(!telemetry.ingest_frame(r#"{"speed": "fast"}"#, t0));
        assert!(!telemetry.ingest_frame(r#"{"speed": -4}"#, t0));
        assert_eq!(telemetry.discarded(), 4);
        assert!(telemetry.speed_history().is_empty());

        assert!(telemetry.ingest_frame(r#"{"speed": 11.5, "cadence": 90}"#, t0));
        assert_eq!(telemetry.speed(), 11.5);
    }

    #[test_timeout::timeout]
    fn session_start_signal_rearms_elapsed_timer() {
        let mut telemetry = state();
        let t0 = Instant::now();
        telemetry.ingest(10.0, t0);
        assert_eq!(telemetry.elapsed(t0 + Duration::from_secs(40)), Duration::from_secs(40));
        telemetry.on_session_signal(SessionSignal::Start, t0 + Duration::from_secs(40));
        assert_eq!(telemetry.elapsed(t0 + Duration::from_secs(45)), Duration::from_secs(5));
    }
}
