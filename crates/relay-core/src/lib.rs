//! Relay runtime shared by the control shell.
//!
//! Responsibilities:
//! - forwarding edge-triggered control input to the remote control socket
//! - integrating speed telemetry into a per-session distance series
//! - classifying the embedded page's lifecycle phase from its content
//! - delivering the single pending instruction into the embedded page
//!
//! Every relay owns its state and connection; the only cross-relay channel is
//! the one-directional [`SessionSignal`] broadcast from the page classifier.

pub mod bridge;
pub mod classifier;
pub mod config;
pub mod control;
pub mod error;
pub mod gate;
pub mod history;
pub mod inject;
pub mod input_relay;
pub mod page;
pub mod queue;
pub mod session;
pub mod socket;
pub mod telemetry;

pub use bridge::{BridgeHandle, BridgeOutcome, BridgePhase, PromptBridge};
pub use classifier::{
    classify, PageClassifier, PagePhase, PhaseMarkers, PhaseTracker, PhaseTransition,
};
pub use config::{BridgeConfig, ClassifierConfig, RelayConfig, SocketConfig, TelemetryConfig};
pub use control::{ControlFlag, ControlState, EdgeOutcome};
pub use error::{RelayError, RelayResult};
pub use inject::{Capability, SubmitReport};
pub use input_relay::{spawn_input_relay, InputEvent, InputRelay, InputRelayHandle};
pub use page::{
    Candidate, ContentMode, ElementId, ElementSpec, MemoryPage, PageError, PageHost,
    PageSnapshot, SelectorKind, SyntheticEvent,
};
pub use queue::{
    CompleteInstruction, HttpInstructionQueue, InstructionQueue, InstructionSlot,
    PendingInstruction, PutInstruction, PutReceipt, QueueError,
};
pub use session::{SessionBus, SessionSignal};
pub use socket::{ReconnectSchedule, RelaySocket, SocketHandle};
pub use telemetry::{spawn_telemetry_ingestor, TelemetryHandle, TelemetrySnapshot, TelemetryState};
