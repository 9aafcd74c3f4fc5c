use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// In-flight guard for polling loops: a tick that arrives while the previous
/// tick's work is still running is skipped rather than queued.
#[derive(Debug, Clone, Default)]
pub struct TickGate {
    busy: Arc<AtomicBool>,
}

/// Held for the duration of one tick; releases the gate on drop.
#[derive(Debug)]
pub struct TickPermit {
    busy: Arc<AtomicBool>,
}

impl TickGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_enter(&self) -> Option<TickPermit> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| TickPermit {
                busy: self.busy.clone(),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

impl Drop for TickPermit {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::timeout]
    fn second_entry_is_refused_until_release() {
        let gate = TickGate::new();
        let permit = gate.try_enter().expect("first entry");
        assert!(gate.is_busy());
        assert!(gate.clone().try_enter().is_none());
        drop(permit);
        assert!(!gate.is_busy());
        assert!(gate.try_enter().is_some());
    }
}
