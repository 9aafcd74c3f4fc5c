mod keyboard;
mod page_file;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{ensure, Result};
use clap::Parser;
use relay_core::config::{DEFAULT_CONTROL_URL, DEFAULT_QUEUE_URL, DEFAULT_TELEMETRY_URL};
use relay_core::{
    spawn_input_relay, spawn_telemetry_ingestor, HttpInstructionQueue, InputRelayHandle,
    PageClassifier, PromptBridge, RelayConfig, RelaySocket, SessionBus, SocketConfig,
    TelemetrySnapshot,
};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::keyboard::{KeyInput, KeyboardGuard};
use crate::page_file::FilePage;

#[derive(Parser, Debug)]
#[command(
    name = "relay-shell",
    version,
    about = "Relays keyboard controls, telemetry and queued prompts for a remote experience"
)]
struct Cli {
    /// Control socket endpoint.
    #[arg(long, env = "RELAY_SHELL_CONTROL_URL", default_value = DEFAULT_CONTROL_URL)]
    control_url: String,

    /// Telemetry socket endpoint.
    #[arg(long, env = "RELAY_SHELL_TELEMETRY_URL", default_value = DEFAULT_TELEMETRY_URL)]
    telemetry_url: String,

    /// Base URL of the instruction queue store.
    #[arg(long, env = "RELAY_SHELL_QUEUE_URL", default_value = DEFAULT_QUEUE_URL)]
    queue_url: String,

    /// Delay before reconnecting a dropped socket.
    #[arg(long, env = "RELAY_SHELL_RECONNECT_MS", default_value_t = 3000)]
    reconnect_ms: u64,

    /// Speed history length.
    #[arg(long, env = "RELAY_SHELL_SPEED_HISTORY", default_value_t = 60)]
    speed_history: usize,

    /// Page classification interval.
    #[arg(long, env = "RELAY_SHELL_CLASSIFIER_POLL_MS", default_value_t = 2000)]
    classifier_poll_ms: u64,

    /// Instruction poll interval.
    #[arg(long, env = "RELAY_SHELL_BRIDGE_POLL_MS", default_value_t = 1000)]
    bridge_poll_ms: u64,

    /// JSON page snapshot standing in for the embedded page. Enables the page
    /// classifier and the prompt bridge.
    #[arg(long, env = "RELAY_SHELL_PAGE_SNAPSHOT")]
    page_snapshot: Option<PathBuf>,

    /// Do not read the terminal keyboard.
    #[arg(long, env = "RELAY_SHELL_NO_KEYBOARD", default_value_t = false)]
    no_keyboard: bool,
}

#[derive(Debug, Clone)]
struct ShellConfig {
    relay: RelayConfig,
    page_snapshot: Option<PathBuf>,
    keyboard: bool,
}

fn has_scheme(url: &str, schemes: &[&str]) -> bool {
    schemes
        .iter()
        .any(|scheme| url.starts_with(&format!("{scheme}://")))
}

impl TryFrom<Cli> for ShellConfig {
    type Error = anyhow::Error;

    fn try_from(cli: Cli) -> Result<Self, Self::Error> {
        for url in [&cli.control_url, &cli.telemetry_url] {
            // The socket client is built without TLS.
            ensure!(
                has_scheme(url, &["ws"]),
                "socket url must use ws://: {url}"
            );
        }
        ensure!(
            has_scheme(&cli.queue_url, &["http", "https"]),
            "queue url must use http:// or https://: {}",
            cli.queue_url
        );
        ensure!(cli.reconnect_ms > 0, "reconnect delay must be positive");
        ensure!(cli.speed_history > 0, "speed history must hold at least one sample");
        ensure!(
            cli.classifier_poll_ms > 0 && cli.bridge_poll_ms > 0,
            "poll intervals must be positive"
        );

        let reconnect = Duration::from_millis(cli.reconnect_ms);
        let mut relay = RelayConfig {
            control: SocketConfig::new("control", cli.control_url).with_reconnect_delay(reconnect),
            telemetry_socket: SocketConfig::new("telemetry", cli.telemetry_url)
                .with_reconnect_delay(reconnect),
            queue_url: cli.queue_url,
            ..RelayConfig::default()
        };
        relay.telemetry.speed_history_capacity = cli.speed_history;
        relay.classifier.poll_interval = Duration::from_millis(cli.classifier_poll_ms);
        relay.bridge.poll_interval = Duration::from_millis(cli.bridge_poll_ms);

        Ok(Self {
            relay,
            page_snapshot: cli.page_snapshot,
            keyboard: !cli.no_keyboard,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = ShellConfig::try_from(Cli::parse())?;
    info!(
        control = %config.relay.control.url,
        telemetry = %config.relay.telemetry_socket.url,
        queue = %config.relay.queue_url,
        "starting relay shell"
    );
    run(config).await
}

fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init();
}

async fn run(config: ShellConfig) -> Result<()> {
    let cancel = CancellationToken::new();
    let bus = SessionBus::new();
    let relay = config.relay;
    let mut tasks: Vec<JoinHandle<()>> = Vec::new();

    let control = RelaySocket::spawn(relay.control.clone(), &cancel);
    let (input, input_task) = spawn_input_relay(control, bus.subscribe(), cancel.clone());
    tasks.push(input_task);

    let telemetry_socket = RelaySocket::spawn(relay.telemetry_socket.clone(), &cancel);
    let telemetry = spawn_telemetry_ingestor(
        telemetry_socket,
        relay.telemetry.clone(),
        bus.subscribe(),
        cancel.clone(),
    );
    tasks.push(telemetry.task);
    tasks.push(tokio::spawn(log_telemetry(telemetry.snapshot, cancel.clone())));

    match config.page_snapshot {
        Some(path) => {
            info!(path = %path.display(), "page snapshot host enabled");
            let page = Arc::new(FilePage::new(path));
            let (mut phase, classifier_task) =
                PageClassifier::new(page.clone(), relay.classifier.clone(), bus.clone())
                    .spawn(cancel.clone());
            tasks.push(classifier_task);

            let queue = HttpInstructionQueue::new(relay.queue_url.clone());
            let (bridge, bridge_task) =
                PromptBridge::new(queue, page, relay.bridge.clone()).spawn(cancel.clone());
            tasks.push(bridge_task);

            // A phase change means new page content; treat it like a page load.
            let phase_cancel = cancel.clone();
            tasks.push(tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = phase_cancel.cancelled() => break,
                        changed = phase.changed() => {
                            if changed.is_err() {
                                break;
                            }
                            if !bridge.poke() {
                                debug!("bridge busy; page load poke dropped");
                            }
                        }
                    }
                }
            }));
        }
        None => info!("no page snapshot configured; page classifier and prompt bridge disabled"),
    }

    if config.keyboard {
        drive_keyboard(&input, &cancel).await?;
    } else {
        wait_for_ctrl_c(&cancel).await;
    }

    info!("shutting down");
    cancel.cancel();
    for task in tasks {
        let _ = task.await;
    }
    Ok(())
}

async fn drive_keyboard(input: &InputRelayHandle, cancel: &CancellationToken) -> Result<()> {
    let guard = KeyboardGuard::enable()?;
    let (mut keys, reader) = keyboard::spawn_reader(!guard.reports_releases(), cancel.clone());
    info!("keyboard active: WASD/arrows to move, space to jump, Esc to quit");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            key = keys.recv() => match key {
                Some(KeyInput::Edge { flag, pressed }) => input.edge(flag, pressed),
                Some(KeyInput::Quit) | None => break,
            },
        }
    }

    cancel.cancel();
    let _ = reader.await;
    drop(guard);
    Ok(())
}

async fn wait_for_ctrl_c(cancel: &CancellationToken) {
    tokio::select! {
        _ = cancel.cancelled() => {}
        result = tokio::signal::ctrl_c() => {
            if let Err(err) = result {
                debug!(error = %err, "ctrl-c handler unavailable");
                cancel.cancelled().await;
            }
        }
    }
}

async fn log_telemetry(mut snapshot: watch::Receiver<TelemetrySnapshot>, cancel: CancellationToken) {
    let mut connected = snapshot.borrow().connected;
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            changed = snapshot.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = snapshot.borrow_and_update().clone();
                if current.connected != connected {
                    connected = current.connected;
                    info!(connected, "telemetry connection changed");
                }
                debug!(
                    speed = current.speed,
                    distance_km = current.distance,
                    elapsed_secs = current.elapsed.as_secs(),
                    session_active = current.session_active,
                    "telemetry"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Result<ShellConfig> {
        let mut argv = vec!["relay-shell"];
        argv.extend_from_slice(args);
        ShellConfig::try_from(Cli::try_parse_from(argv)?)
    }

    #[test_timeout::timeout]
    fn defaults_match_relay_config() {
        let config = parse(&[]).unwrap();
        let defaults = RelayConfig::default();
        assert_eq!(config.relay.control.url, defaults.control.url);
        assert_eq!(config.relay.telemetry_socket.url, defaults.telemetry_socket.url);
        assert_eq!(config.relay.queue_url, defaults.queue_url);
        assert_eq!(config.relay.control.reconnect_delay, Duration::from_secs(3));
        assert_eq!(config.relay.classifier.poll_interval, Duration::from_secs(2));
        assert_eq!(config.relay.bridge.poll_interval, Duration::from_secs(1));
        assert!(config.keyboard);
        assert!(config.page_snapshot.is_none());
    }

    #[test_timeout::timeout]
    fn overrides_flow_into_relay_config() {
        let config = parse(&[
            "--control-url",
            "ws://ride.example:8082/control",
            "--reconnect-ms",
            "500",
            "--speed-history",
            "10",
            "--page-snapshot",
            "page.json",
            "--no-keyboard",
        ])
        .unwrap();
        assert_eq!(config.relay.control.url, "ws://ride.example:8082/control");
        assert_eq!(
            config.relay.telemetry_socket.reconnect_delay,
            Duration::from_millis(500)
        );
        assert_eq!(config.relay.telemetry.speed_history_capacity, 10);
        assert_eq!(config.page_snapshot, Some(PathBuf::from("page.json")));
        assert!(!config.keyboard);
    }

    #[test_timeout::timeout]
    fn rejects_bad_schemes_and_zero_intervals() {
        assert!(parse(&["--control-url", "http://localhost:8082"]).is_err());
        assert!(parse(&["--telemetry-url", "wss://ride.example/telemetry"]).is_err());
        assert!(parse(&["--queue-url", "ws://localhost:3001"]).is_err());
        assert!(parse(&["--reconnect-ms", "0"]).is_err());
        assert!(parse(&["--bridge-poll-ms", "0"]).is_err());
    }
}
