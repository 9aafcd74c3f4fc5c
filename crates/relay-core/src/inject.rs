//! Target discovery and text injection against a [`PageHost`].

use tracing::{debug, warn};

use crate::page::{Candidate, ElementId, PageError, PageHost, SelectorKind, SyntheticEvent};

/// A property a candidate must have to receive injected text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Capability {
    /// Non-zero width and height.
    Visible,
    Enabled,
    Writable,
}

impl Capability {
    pub const REQUIRED: [Capability; 3] =
        [Capability::Visible, Capability::Enabled, Capability::Writable];

    pub fn holds(self, candidate: &Candidate) -> bool {
        match self {
            Capability::Visible => candidate.is_visible(),
            Capability::Enabled => !candidate.disabled,
            Capability::Writable => !candidate.read_only,
        }
    }
}

pub fn is_usable(candidate: &Candidate) -> bool {
    Capability::REQUIRED
        .iter()
        .all(|capability| capability.holds(candidate))
}

/// Walks `priority` in order and returns the first candidate that passes every
/// capability check.
pub async fn discover_target<P: PageHost + ?Sized>(
    page: &P,
    priority: &[SelectorKind],
) -> Result<Option<Candidate>, PageError> {
    for &kind in priority {
        let candidates = page.query_candidates(kind).await?;
        if let Some(candidate) = candidates.into_iter().find(is_usable) {
            debug!(?kind, target = ?candidate.id, "injection target found");
            return Ok(Some(candidate));
        }
    }
    Ok(None)
}

/// Focuses the target, assigns `text` and fires the events a user edit would.
pub async fn populate<P: PageHost + ?Sized>(
    page: &P,
    target: &Candidate,
    text: &str,
) -> Result<(), PageError> {
    page.dispatch_synthetic_event(target.id, SyntheticEvent::Focus)
        .await?;
    page.dispatch_synthetic_event(target.id, SyntheticEvent::Click)
        .await?;
    page.set_content(target.id, text, target.content_mode()).await?;
    page.dispatch_synthetic_event(target.id, SyntheticEvent::Input)
        .await?;
    page.dispatch_synthetic_event(target.id, SyntheticEvent::Change)
        .await?;
    clipboard_fallback(page, target.id, text).await;
    Ok(())
}

/// Replaces the target's content through the clipboard as well, for pages that
/// ignore programmatic assignment. Never fails.
async fn clipboard_fallback<P: PageHost + ?Sized>(page: &P, target: ElementId, text: &str) {
    if let Err(err) = page.write_clipboard(text).await {
        debug!(error = %err, "clipboard fallback skipped");
        return;
    }
    for event in [
        SyntheticEvent::SelectAll,
        SyntheticEvent::DeleteSelection,
        SyntheticEvent::Paste,
    ] {
        if let Err(err) = page.dispatch_synthetic_event(target, event).await {
            debug!(?event, error = %err, "clipboard fallback step failed");
            return;
        }
    }
}

/// Which submission methods were dispatched successfully.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubmitReport {
    pub enter_key: bool,
    pub action_control: Option<ElementId>,
    pub form: Option<ElementId>,
}

impl SubmitReport {
    pub fn any(&self) -> bool {
        self.enter_key || self.action_control.is_some() || self.form.is_some()
    }
}

/// Tries every submission method: Enter on the target, a click on the first
/// visible action control, and submitting the enclosing form.
pub async fn submit<P: PageHost + ?Sized>(page: &P, target: &Candidate) -> SubmitReport {
    let mut report = SubmitReport::default();

    match page
        .dispatch_synthetic_event(target.id, SyntheticEvent::EnterKey)
        .await
    {
        Ok(()) => report.enter_key = true,
        Err(err) => debug!(error = %err, "enter key not delivered"),
    }

    match page.query_candidates(SelectorKind::ActionControl).await {
        Ok(controls) => {
            if let Some(control) = controls.iter().find(|control| control.is_visible()) {
                match page
                    .dispatch_synthetic_event(control.id, SyntheticEvent::Click)
                    .await
                {
                    Ok(()) => report.action_control = Some(control.id),
                    Err(err) => debug!(error = %err, "action control click failed"),
                }
            }
        }
        Err(err) => debug!(error = %err, "action control query failed"),
    }

    match page.enclosing_form(target.id).await {
        Ok(Some(form)) => match page
            .dispatch_synthetic_event(form, SyntheticEvent::Submit)
            .await
        {
            Ok(()) => report.form = Some(form),
            Err(err) => debug!(error = %err, "form submit failed"),
        },
        Ok(None) => {}
        Err(err) => debug!(error = %err, "enclosing form lookup failed"),
    }

    if !report.any() {
        warn!(target = ?target.id, "no submission method succeeded");
    }
    report
}
