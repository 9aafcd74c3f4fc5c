use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use relay_core::{InstructionSlot, PendingInstruction};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("instruction text is required")]
    EmptyText,
    #[error("failed to persist instruction: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to encode instruction: {0}")]
    Encode(#[from] serde_json::Error),
}

/// The in-memory slot plus an optional JSON file mirroring it.
///
/// Mutations hold `write_lock` across the slot update and the file write so the
/// file always matches the slot once a call returns.
#[derive(Debug, Default)]
pub struct Storage {
    slot: InstructionSlot,
    persist_path: Option<PathBuf>,
    write_lock: Mutex<()>,
}

impl Storage {
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Opens the store, restoring a previously persisted instruction when the
    /// file exists. An unreadable file is logged and ignored.
    pub async fn open(persist_path: Option<PathBuf>) -> Self {
        let storage = Self {
            slot: InstructionSlot::new(),
            persist_path,
            write_lock: Mutex::new(()),
        };
        let Some(path) = &storage.persist_path else {
            return storage;
        };
        match tokio::fs::read(path).await {
            Ok(bytes) => match serde_json::from_slice::<PendingInstruction>(&bytes) {
                Ok(instruction) => {
                    info!(path = %path.display(), issued_at = instruction.issued_at, "restored pending instruction");
                    storage.slot.restore(instruction);
                }
                Err(err) => warn!(path = %path.display(), error = %err, "ignoring unreadable instruction file"),
            },
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => warn!(path = %path.display(), error = %err, "failed to read instruction file"),
        }
        storage
    }

    /// Replaces the pending instruction. When the file write fails the
    /// instruction it displaced is put back.
    pub async fn put(&self, text: String) -> Result<PendingInstruction, StorageError> {
        let _guard = self.write_lock.lock().await;
        let previous = self.slot.current();
        // The slot only refuses blank text.
        let instruction = self.slot.put(text).map_err(|_| StorageError::EmptyText)?;
        if let Some(path) = &self.persist_path {
            if let Err(err) = write_instruction(path, &instruction).await {
                match previous {
                    Some(previous) => self.slot.restore(previous),
                    None => {
                        self.slot.take_matching(Some(instruction.issued_at));
                    }
                }
                return Err(err);
            }
        }
        debug!(issued_at = instruction.issued_at, "instruction stored");
        Ok(instruction)
    }

    pub fn current(&self) -> Option<PendingInstruction> {
        self.slot.current()
    }

    /// Removes the pending instruction; see [`InstructionSlot::take_matching`].
    pub async fn complete(&self, issued_at: Option<u64>) -> Option<PendingInstruction> {
        let _guard = self.write_lock.lock().await;
        let removed = self.slot.take_matching(issued_at)?;
        if let Some(path) = &self.persist_path {
            match tokio::fs::remove_file(path).await {
                Ok(()) => {}
                Err(err) if err.kind() == ErrorKind::NotFound => {}
                Err(err) => warn!(path = %path.display(), error = %err, "failed to remove instruction file"),
            }
        }
        debug!(issued_at = removed.issued_at, "instruction completed");
        Some(removed)
    }
}

async fn write_instruction(
    path: &Path,
    instruction: &PendingInstruction,
) -> Result<(), StorageError> {
    let encoded = serde_json::to_vec_pretty(instruction)?;
    tokio::fs::write(path, encoded).await?;
    Ok(())
}
