//! Page lifecycle classification.
//!
//! The classifier polls the embedded page's visible text, maps it onto a
//! [`PagePhase`] and turns phase changes into [`SessionSignal`]s for the other
//! relays.

use serde::{Deserialize, Serialize};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::ClassifierConfig;
use crate::page::{PageHost, SelectorKind};
use crate::session::{SessionBus, SessionSignal};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PagePhase {
    Queued,
    ReadyPrompt,
    Active,
    #[default]
    Unknown,
}

/// Text markers recognised in the page content. Matching ignores case and
/// requires a word boundary on both sides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseMarkers {
    pub in_queue: String,
    pub eta: String,
    pub your_turn: String,
    pub time_remaining: String,
}

impl Default for PhaseMarkers {
    fn default() -> Self {
        Self {
            in_queue: "in queue".into(),
            eta: "eta".into(),
            your_turn: "your turn".into(),
            time_remaining: "time remaining".into(),
        }
    }
}

fn is_word_char(c: Option<char>) -> bool {
    c.is_some_and(|c| c.is_alphanumeric() || c == '_')
}

/// Case-insensitive whole-word search. `haystack` must already be lowercase.
fn contains_word(haystack: &str, marker: &str) -> bool {
    let needle = marker.trim().to_lowercase();
    if needle.is_empty() {
        return false;
    }
    let mut from = 0;
    while let Some(offset) = haystack[from..].find(&needle) {
        let start = from + offset;
        let end = start + needle.len();
        let before = haystack[..start].chars().next_back();
        let after = haystack[end..].chars().next();
        if !is_word_char(before) && !is_word_char(after) {
            return true;
        }
        // Advance by one character, not one byte.
        from = start + haystack[start..].chars().next().map_or(1, char::len_utf8);
    }
    false
}

/// Maps page text onto a phase. Checks run in priority order: queue, prompt,
/// then active.
pub fn classify(text: &str, has_controls: bool, markers: &PhaseMarkers) -> PagePhase {
    let text = text.to_lowercase();
    if contains_word(&text, &markers.in_queue) && contains_word(&text, &markers.eta) {
        PagePhase::Queued
    } else if contains_word(&text, &markers.your_turn) {
        PagePhase::ReadyPrompt
    } else if has_controls || contains_word(&text, &markers.time_remaining) {
        PagePhase::Active
    } else {
        PagePhase::Unknown
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PhaseTransition {
    pub from: PagePhase,
    pub to: PagePhase,
    pub signal: Option<SessionSignal>,
}

/// Remembers the last observed phase and reports only changes.
#[derive(Debug, Clone, Default)]
pub struct PhaseTracker {
    current: PagePhase,
}

impl PhaseTracker {
    pub fn current(&self) -> PagePhase {
        self.current
    }

    pub fn observe(&mut self, phase: PagePhase) -> Option<PhaseTransition> {
        if phase == self.current {
            return None;
        }
        let from = std::mem::replace(&mut self.current, phase);
        let signal = match (from, phase) {
            (_, PagePhase::Active) => Some(SessionSignal::Start),
            (PagePhase::Active, PagePhase::Queued | PagePhase::ReadyPrompt) => {
                Some(SessionSignal::End)
            }
            _ => None,
        };
        Some(PhaseTransition {
            from,
            to: phase,
            signal,
        })
    }
}

pub struct PageClassifier<P> {
    page: P,
    config: ClassifierConfig,
    tracker: PhaseTracker,
    bus: SessionBus,
}

impl<P: PageHost> PageClassifier<P> {
    pub fn new(page: P, config: ClassifierConfig, bus: SessionBus) -> Self {
        Self {
            page,
            config,
            tracker: PhaseTracker::default(),
            bus,
        }
    }

    pub fn phase(&self) -> PagePhase {
        self.tracker.current()
    }

    /// One classification pass. Unreadable pages leave the phase untouched.
    pub async fn poll_once(&mut self) -> Option<PhaseTransition> {
        let text = match self.page.visible_text().await {
            Ok(text) => text,
            Err(err) => {
                debug!(error = %err, "page text unavailable");
                return None;
            }
        };
        let has_controls = match self.page.query_candidates(SelectorKind::ActionControl).await {
            Ok(candidates) => candidates.iter().any(|candidate| candidate.is_visible()),
            Err(err) => {
                debug!(error = %err, "action control query failed");
                false
            }
        };

        let phase = classify(&text, has_controls, &self.config.markers);
        let transition = self.tracker.observe(phase)?;
        info!(from = ?transition.from, to = ?transition.to, "page phase changed");
        if let Some(signal) = transition.signal {
            let reached = self.bus.publish(signal);
            debug!(?signal, reached, "session signal published");
        }
        Some(transition)
    }

    /// Polls on the configured interval until cancelled. The returned watch
    /// carries the latest phase.
    pub fn spawn(
        mut self,
        cancel: CancellationToken,
    ) -> (watch::Receiver<PagePhase>, JoinHandle<()>)
    where
        P: 'static,
    {
        let (phase_tx, phase_rx) = watch::channel(self.phase());
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.poll_interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = ticker.tick() => {
                        if let Some(transition) = self.poll_once().await {
                            phase_tx.send_replace(transition.to);
                        }
                    }
                }
            }
        });
        (phase_rx, task)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::page::{ElementSpec, MemoryPage};

    fn markers() -> PhaseMarkers {
        PhaseMarkers::default()
    }

    #[test_timeout::timeout]
    fn queue_needs_both_markers() {
        assert_eq!(
            classify("You are In Queue. ETA: 4 minutes", false, &markers()),
            PagePhase::Queued
        );
        assert_eq!(
            classify("You are in queue", false, &markers()),
            PagePhase::Unknown
        );
    }

    #[test_timeout::timeout]
    fn prompt_and_active_markers() {
        assert_eq!(
            classify("It's your turn!", false, &markers()),
            PagePhase::ReadyPrompt
        );
        assert_eq!(
            classify("Time remaining: 02:31", false, &markers()),
            PagePhase::Active
        );
        assert_eq!(classify("Welcome", true, &markers()), PagePhase::Active);
        assert_eq!(classify("Welcome", false, &markers()), PagePhase::Unknown);
    }

    #[test_timeout::timeout]
    fn queue_wins_over_prompt() {
        assert_eq!(
            classify("In queue, ETA 1 min. Your turn is next", true, &markers()),
            PagePhase::Queued
        );
    }

    #[test_timeout::timeout]
    fn markers_respect_word_boundaries() {
        assert_eq!(
            classify("in queue for the beta", false, &markers()),
            PagePhase::Unknown
        );
        assert!(contains_word("eta: soon", "ETA"));
        assert!(!contains_word("metadata", "eta"));
        assert!(contains_word("über eta", "eta"));
    }

    #[test_timeout::timeout]
    fn custom_markers_are_honoured() {
        let markers = PhaseMarkers {
            your_turn: "du bist dran".into(),
            ..PhaseMarkers::default()
        };
        assert_eq!(
            classify("Du bist dran!", false, &markers),
            PagePhase::ReadyPrompt
        );
    }

    #[test_timeout::timeout]
    fn signals_follow_transitions() {
        let mut tracker = PhaseTracker::default();
        assert_eq!(tracker.current(), PagePhase::Unknown);
        assert!(tracker.observe(PagePhase::Unknown).is_none());

        let queued = tracker.observe(PagePhase::Queued).unwrap();
        assert_eq!(queued.signal, None);
        let start = tracker.observe(PagePhase::Active).unwrap();
        assert_eq!(start.signal, Some(SessionSignal::Start));
        assert!(tracker.observe(PagePhase::Active).is_none());
        let end = tracker.observe(PagePhase::ReadyPrompt).unwrap();
        assert_eq!(end.signal, Some(SessionSignal::End));

        tracker.observe(PagePhase::Active);
        let drop_out = tracker.observe(PagePhase::Unknown).unwrap();
        assert_eq!(drop_out.signal, None);
    }

    #[test_timeout::tokio_timeout_test(5)]
    async fn entering_active_publishes_one_start() {
        let page = Arc::new(MemoryPage::loaded("It's your turn!"));
        let bus = SessionBus::new();
        let mut signals = bus.subscribe();
        let mut classifier = PageClassifier::new(page.clone(), ClassifierConfig::default(), bus);

        assert_eq!(classifier.poll_once().await.unwrap().to, PagePhase::ReadyPrompt);
        page.set_text(Some("Time remaining 05:00"));
        classifier.poll_once().await.unwrap();
        assert!(classifier.poll_once().await.is_none());

        assert_eq!(signals.recv().await.unwrap(), SessionSignal::Start);
        assert!(signals.try_recv().is_err());
    }

    #[test_timeout::tokio_timeout_test(5)]
    async fn hidden_controls_do_not_count() {
        let page = Arc::new(MemoryPage::loaded("Welcome"));
        page.add_element(ElementSpec::new(SelectorKind::ActionControl).hidden());
        let mut classifier =
            PageClassifier::new(page.clone(), ClassifierConfig::default(), SessionBus::new());
        assert!(classifier.poll_once().await.is_none());

        page.add_element(ElementSpec::new(SelectorKind::ActionControl));
        assert_eq!(classifier.poll_once().await.unwrap().to, PagePhase::Active);
    }

    #[test_timeout::tokio_timeout_test(5)]
    async fn unreadable_page_keeps_last_phase() {
        let page = Arc::new(MemoryPage::loaded("Time remaining 01:00"));
        let mut classifier =
            PageClassifier::new(page.clone(), ClassifierConfig::default(), SessionBus::new());
        classifier.poll_once().await;
        page.set_text(None);
        assert!(classifier.poll_once().await.is_none());
        assert_eq!(classifier.phase(), PagePhase::Active);
    }

    #[test_timeout::tokio_timeout_test(10, paused)]
    async fn spawned_classifier_polls_on_interval() {
        let page = Arc::new(MemoryPage::loaded("In queue, ETA 3 min"));
        let bus = SessionBus::new();
        let mut signals = bus.subscribe();
        let cancel = CancellationToken::new();
        let (mut phase, task) =
            PageClassifier::new(page.clone(), ClassifierConfig::default(), bus).spawn(cancel.clone());

        phase.changed().await.unwrap();
        assert_eq!(*phase.borrow_and_update(), PagePhase::Queued);

        page.set_text(Some("Time remaining 04:59"));
        tokio::time::sleep(Duration::from_secs(2)).await;
        phase.changed().await.unwrap();
        assert_eq!(*phase.borrow_and_update(), PagePhase::Active);
        assert_eq!(signals.recv().await.unwrap(), SessionSignal::Start);

        cancel.cancel();
        task.await.unwrap();
    }
}
