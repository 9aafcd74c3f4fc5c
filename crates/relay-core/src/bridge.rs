//! Delivers the pending instruction from the queue store into the embedded
//! page.
//!
//! One pass walks `Idle -> Detected -> Injecting -> Confirming -> Idle`. The
//! bridge polls on a fixed interval and can be poked by the host (for example
//! on page load); a poke that arrives while a pass is running is dropped.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::config::BridgeConfig;
use crate::gate::TickGate;
use crate::inject::{discover_target, populate, submit};
use crate::page::PageHost;
use crate::queue::InstructionQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BridgePhase {
    #[default]
    Idle,
    Detected,
    Injecting,
    Confirming,
}

/// Result of one bridge pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeOutcome {
    NoInstruction,
    AlreadyConsumed,
    /// Same text as the last instruction this bridge started delivering.
    Duplicate,
    /// Nothing on the page can take the text; the instruction stays pending.
    NoTarget,
    /// Injection was attempted. `completed` says whether the store confirmed
    /// the removal.
    Delivered { completed: bool },
    FetchFailed,
}

pub struct PromptBridge<Q, P> {
    queue: Q,
    page: P,
    config: BridgeConfig,
    phase: BridgePhase,
    last_text: Option<String>,
    delivered: u64,
}

impl<Q, P> PromptBridge<Q, P>
where
    Q: InstructionQueue,
    P: PageHost,
{
    pub fn new(queue: Q, page: P, config: BridgeConfig) -> Self {
        Self {
            queue,
            page,
            config,
            phase: BridgePhase::Idle,
            last_text: None,
            delivered: 0,
        }
    }

    pub fn phase(&self) -> BridgePhase {
        self.phase
    }

    pub fn last_text(&self) -> Option<&str> {
        self.last_text.as_deref()
    }

    pub fn delivered(&self) -> u64 {
        self.delivered
    }

    fn enter(&mut self, phase: BridgePhase) {
        trace!(from = ?self.phase, to = ?phase, "bridge phase");
        self.phase = phase;
    }

    pub async fn poll_once(&mut self) -> BridgeOutcome {
        let outcome = self.run_pass().await;
        self.enter(BridgePhase::Idle);
        outcome
    }

    async fn run_pass(&mut self) -> BridgeOutcome {
        let instruction = match self.queue.fetch().await {
            Ok(Some(instruction)) => instruction,
            Ok(None) => return BridgeOutcome::NoInstruction,
            Err(err) => {
                debug!(error = %err, "instruction fetch failed");
                return BridgeOutcome::FetchFailed;
            }
        };
        if instruction.consumed {
            return BridgeOutcome::AlreadyConsumed;
        }
        if instruction.text.trim().is_empty() {
            return BridgeOutcome::NoInstruction;
        }
        if self.last_text.as_deref() == Some(instruction.text.as_str()) {
            return BridgeOutcome::Duplicate;
        }
        self.enter(BridgePhase::Detected);
        debug!(issued_at = instruction.issued_at, "new instruction detected");

        self.enter(BridgePhase::Injecting);
        let target = match discover_target(&self.page, &self.config.selector_priority).await {
            Ok(Some(target)) => target,
            Ok(None) => {
                debug!("no injection target on page; will retry");
                return BridgeOutcome::NoTarget;
            }
            Err(err) => {
                debug!(error = %err, "target discovery failed; will retry");
                return BridgeOutcome::NoTarget;
            }
        };
        self.last_text = Some(instruction.text.clone());

        if let Err(err) = populate(&self.page, &target, &instruction.text).await {
            warn!(target = ?target.id, error = %err, "populating target failed");
        }
        tokio::time::sleep(self.config.settle_delay).await;
        let report = submit(&self.page, &target).await;
        debug!(?report, "submission dispatched");

        self.enter(BridgePhase::Confirming);
        tokio::time::sleep(self.config.confirm_delay).await;
        let completed = match self.queue.complete(instruction.issued_at).await {
            Ok(true) => true,
            Ok(false) => {
                debug!(issued_at = instruction.issued_at, "instruction already replaced or removed");
                false
            }
            Err(err) => {
                warn!(issued_at = instruction.issued_at, error = %err, "completion report failed");
                false
            }
        };
        self.delivered += 1;
        info!(issued_at = instruction.issued_at, completed, "instruction delivered");
        BridgeOutcome::Delivered { completed }
    }
}

impl<Q, P> PromptBridge<Q, P>
where
    Q: InstructionQueue + 'static,
    P: PageHost + 'static,
{
    /// Runs the bridge on its poll interval until cancelled.
    pub fn spawn(mut self, cancel: CancellationToken) -> (BridgeHandle, JoinHandle<()>) {
        let gate = TickGate::new();
        let (poke_tx, mut poke_rx) = mpsc::channel(1);
        let handle = BridgeHandle {
            pokes: poke_tx,
            gate: gate.clone(),
        };

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            let mut pokes_open = true;
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {}
                    poke = poke_rx.recv(), if pokes_open => {
                        if poke.is_none() {
                            pokes_open = false;
                            continue;
                        }
                    }
                }
                let Some(_permit) = gate.try_enter() else {
                    continue;
                };
                let outcome = tokio::select! {
                    _ = cancel.cancelled() => break,
                    outcome = self.poll_once() => outcome,
                };
                trace!(?outcome, "bridge pass finished");
            }
        });

        (handle, task)
    }
}

/// Host-side handle to a running bridge.
#[derive(Debug, Clone)]
pub struct BridgeHandle {
    pokes: mpsc::Sender<()>,
    gate: TickGate,
}

impl BridgeHandle {
    /// Requests an immediate pass. Returns false when the request was dropped
    /// because a pass is already running or one is already requested.
    pub fn poke(&self) -> bool {
        if self.gate.is_busy() {
            return false;
        }
        self.pokes.try_send(()).is_ok()
    }

    pub fn is_busy(&self) -> bool {
        self.gate.is_busy()
    }
}
