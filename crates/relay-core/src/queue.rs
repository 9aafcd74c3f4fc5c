//! The single-slot instruction queue: wire types, the HTTP client used by the
//! prompt bridge, and the in-process slot the store is built on.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingInstruction {
    pub text: String,
    /// Milliseconds since the Unix epoch; identifies this instruction.
    #[serde(alias = "timestamp")]
    pub issued_at: u64,
    #[serde(default, alias = "processed")]
    pub consumed: bool,
}

/// Body of a put request. `text` is optional so that a missing field can be
/// reported the same way as an empty one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PutInstruction {
    #[serde(default)]
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutReceipt {
    pub success: bool,
    pub text: String,
    pub issued_at: u64,
}

/// Body of a completion (delete) request. Without a timestamp the pending
/// instruction is removed unconditionally.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompleteInstruction {
    #[serde(default, alias = "issuedAt")]
    pub timestamp: Option<u64>,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status: {status} body={body}")]
    UnexpectedStatus { status: StatusCode, body: String },
    #[error("instruction text is empty")]
    EmptyText,
}

/// Consumer view of the queue used by the prompt bridge.
#[async_trait]
pub trait InstructionQueue: Send + Sync {
    /// The pending instruction, if any.
    async fn fetch(&self) -> Result<Option<PendingInstruction>, QueueError>;

    /// Deletes the instruction issued at `issued_at`. Returns false when it was
    /// no longer pending.
    async fn complete(&self, issued_at: u64) -> Result<bool, QueueError>;
}

#[derive(Clone)]
pub struct HttpInstructionQueue {
    http: Client,
    base_url: String,
}

impl HttpInstructionQueue {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        let base_url: String = base_url.into();
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn instruction_url(&self) -> String {
        format!("{}/instruction", self.base_url)
    }

    /// Posts a new instruction, replacing whatever was pending.
    pub async fn put(&self, text: impl Into<String>) -> Result<PutReceipt, QueueError> {
        let body = PutInstruction {
            text: Some(text.into()),
        };
        let res = self
            .http
            .put(self.instruction_url())
            .json(&body)
            .send()
            .await?;
        if res.status().is_success() {
            Ok(res.json::<PutReceipt>().await?)
        } else {
            Err(unexpected(res).await)
        }
    }
}

async fn unexpected(res: reqwest::Response) -> QueueError {
    let status = res.status();
    let body = res.text().await.unwrap_or_default();
    QueueError::UnexpectedStatus { status, body }
}

#[async_trait]
impl InstructionQueue for HttpInstructionQueue {
    async fn fetch(&self) -> Result<Option<PendingInstruction>, QueueError> {
        let res = self.http.get(self.instruction_url()).send().await?;
        match res.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(res.json::<PendingInstruction>().await?)),
            _ => Err(unexpected(res).await),
        }
    }

    async fn complete(&self, issued_at: u64) -> Result<bool, QueueError> {
        let body = CompleteInstruction {
            timestamp: Some(issued_at),
        };
        let res = self
            .http
            .delete(self.instruction_url())
            .json(&body)
            .send()
            .await?;
        match res.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            _ => Err(unexpected(res).await),
        }
    }
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

#[derive(Debug, Default)]
struct SlotState {
    pending: Option<PendingInstruction>,
    last_issued_at: u64,
}

/// Holds at most one instruction. A put overwrites the previous one and
/// always gets a strictly larger `issued_at`.
#[derive(Debug, Default)]
pub struct InstructionSlot {
    state: Mutex<SlotState>,
}

impl InstructionSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&self, text: impl Into<String>) -> Result<PendingInstruction, QueueError> {
        let text = text.into();
        if text.trim().is_empty() {
            return Err(QueueError::EmptyText);
        }
        let mut state = self.state.lock();
        let issued_at = epoch_millis().max(state.last_issued_at + 1);
        state.last_issued_at = issued_at;
        let instruction = PendingInstruction {
            text,
            issued_at,
            consumed: false,
        };
        state.pending = Some(instruction.clone());
        Ok(instruction)
    }

    /// Reinstates a previously persisted instruction.
    pub fn restore(&self, instruction: PendingInstruction) {
        let mut state = self.state.lock();
        state.last_issued_at = state.last_issued_at.max(instruction.issued_at);
        state.pending = Some(instruction);
    }

    pub fn current(&self) -> Option<PendingInstruction> {
        self.state.lock().pending.clone()
    }

    /// Removes the pending instruction if `issued_at` names it, or
    /// unconditionally when `issued_at` is `None`.
    pub fn take_matching(&self, issued_at: Option<u64>) -> Option<PendingInstruction> {
        let mut state = self.state.lock();
        let matches = match (&state.pending, issued_at) {
            (Some(_), None) => true,
            (Some(pending), Some(issued_at)) => pending.issued_at == issued_at,
            (None, _) => false,
        };
        if matches {
            state.pending.take()
        } else {
            None
        }
    }
}

#[async_trait]
impl InstructionQueue for InstructionSlot {
    async fn fetch(&self) -> Result<Option<PendingInstruction>, QueueError> {
        Ok(self.current())
    }

    async fn complete(&self, issued_at: u64) -> Result<bool, QueueError> {
        Ok(self.take_matching(Some(issued_at)).is_some())
    }
}

#[async_trait]
impl<Q: InstructionQueue + ?Sized> InstructionQueue for std::sync::Arc<Q> {
    async fn fetch(&self) -> Result<Option<PendingInstruction>, QueueError> {
        (**self).fetch().await
    }

    async fn complete(&self, issued_at: u64) -> Result<bool, QueueError> {
        (**self).complete(issued_at).await
    }
}
