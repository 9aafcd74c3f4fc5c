//! Terminal keyboard input for the control relay.
//!
//! Key releases are only reported by terminals that support the keyboard
//! enhancement protocol. Elsewhere every press is delivered as a tap (press
//! immediately followed by release).

use std::io;
use std::time::Duration;

use anyhow::{Context, Result};
use crossterm::event::{
    self, Event, KeyCode, KeyEvent, KeyEventKind, KeyModifiers, KeyboardEnhancementFlags,
    PopKeyboardEnhancementFlags, PushKeyboardEnhancementFlags,
};
use crossterm::execute;
use crossterm::terminal::{disable_raw_mode, enable_raw_mode, supports_keyboard_enhancement};
use relay_core::ControlFlag;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

const POLL_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyInput {
    Edge { flag: ControlFlag, pressed: bool },
    Quit,
}

/// DOM-style physical code for a terminal key.
fn dom_code(code: KeyCode) -> Option<&'static str> {
    match code {
        KeyCode::Up => Some("ArrowUp"),
        KeyCode::Down => Some("ArrowDown"),
        KeyCode::Left => Some("ArrowLeft"),
        KeyCode::Right => Some("ArrowRight"),
        KeyCode::Char(' ') => Some("Space"),
        KeyCode::Char(c) => match c.to_ascii_lowercase() {
            'w' => Some("KeyW"),
            'a' => Some("KeyA"),
            's' => Some("KeyS"),
            'd' => Some("KeyD"),
            _ => None,
        },
        _ => None,
    }
}

/// Translates one terminal key event. `tap` expands presses into a press and a
/// release for terminals that never report releases.
pub fn translate(key: &KeyEvent, tap: bool) -> Vec<KeyInput> {
    let is_quit = key.code == KeyCode::Esc
        || (key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL));
    if is_quit {
        return if key.kind == KeyEventKind::Release {
            Vec::new()
        } else {
            vec![KeyInput::Quit]
        };
    }

    let Some(flag) = dom_code(key.code).and_then(ControlFlag::from_key_code) else {
        return Vec::new();
    };
    match key.kind {
        KeyEventKind::Press | KeyEventKind::Repeat if tap => vec![
            KeyInput::Edge {
                flag,
                pressed: true,
            },
            KeyInput::Edge {
                flag,
                pressed: false,
            },
        ],
        KeyEventKind::Press | KeyEventKind::Repeat => vec![KeyInput::Edge {
            flag,
            pressed: true,
        }],
        KeyEventKind::Release => vec![KeyInput::Edge {
            flag,
            pressed: false,
        }],
    }
}

/// Raw mode plus release reporting, undone on drop.
pub struct KeyboardGuard {
    enhanced: bool,
}

impl KeyboardGuard {
    pub fn enable() -> Result<Self> {
        enable_raw_mode().context("failed to enable raw mode")?;
        let enhanced = supports_keyboard_enhancement().unwrap_or(false);
        if enhanced {
            execute!(
                io::stdout(),
                PushKeyboardEnhancementFlags(
                    KeyboardEnhancementFlags::DISAMBIGUATE_ESCAPE_CODES
                        | KeyboardEnhancementFlags::REPORT_EVENT_TYPES
                )
            )
            .context("failed to enable key release reporting")?;
        } else {
            warn!("terminal does not report key releases; keys act as taps");
        }
        Ok(Self { enhanced })
    }

    pub fn reports_releases(&self) -> bool {
        self.enhanced
    }
}

impl Drop for KeyboardGuard {
    fn drop(&mut self) {
        if self.enhanced {
            let _ = execute!(io::stdout(), PopKeyboardEnhancementFlags);
        }
        let _ = disable_raw_mode();
    }
}

/// Reads terminal events on a blocking thread until `cancel` fires or the
/// receiver goes away.
pub fn spawn_reader(
    tap: bool,
    cancel: CancellationToken,
) -> (mpsc::UnboundedReceiver<KeyInput>, JoinHandle<()>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let task = tokio::task::spawn_blocking(move || {
        while !cancel.is_cancelled() {
            match event::poll(POLL_INTERVAL) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(err) => {
                    warn!(error = %err, "keyboard poll failed");
                    break;
                }
            }
            match event::read() {
                Ok(Event::Key(key)) => {
                    for input in translate(&key, tap) {
                        if tx.send(input).is_err() {
                            return;
                        }
                    }
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(error = %err, "keyboard read failed");
                    break;
                }
            }
        }
        debug!("keyboard reader stopped");
    });
    (rx, task)
}
