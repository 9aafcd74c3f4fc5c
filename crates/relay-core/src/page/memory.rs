use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{Candidate, ContentMode, ElementId, PageError, PageHost, SelectorKind, SyntheticEvent};

fn default_width() -> f64 {
    120.0
}

fn default_height() -> f64 {
    24.0
}

/// One element of a [`PageSnapshot`]. Its id is its index in the snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ElementSpec {
    #[serde(default)]
    pub kinds: Vec<SelectorKind>,
    #[serde(default = "default_width")]
    pub width: f64,
    #[serde(default = "default_height")]
    pub height: f64,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub read_only: bool,
    #[serde(default)]
    pub editable_region: bool,
    /// Index of the enclosing form element.
    #[serde(default)]
    pub form: Option<u64>,
    #[serde(default)]
    pub content: String,
}

impl ElementSpec {
    pub fn new(kind: SelectorKind) -> Self {
        Self {
            kinds: vec![kind],
            width: default_width(),
            height: default_height(),
            disabled: false,
            read_only: false,
            editable_region: kind == SelectorKind::EditableRegion,
            form: None,
            content: String::new(),
        }
    }

    /// A form container; not returned for any selector kind.
    pub fn form() -> Self {
        Self {
            kinds: Vec::new(),
            ..Self::new(SelectorKind::GenericInput)
        }
    }

    pub fn hidden(mut self) -> Self {
        self.width = 0.0;
        self.height = 0.0;
        self
    }

    pub fn disabled(mut self) -> Self {
        self.disabled = true;
        self
    }

    pub fn read_only(mut self) -> Self {
        self.read_only = true;
        self
    }

    pub fn also(mut self, kind: SelectorKind) -> Self {
        self.kinds.push(kind);
        self
    }

    pub fn in_form(mut self, form: ElementId) -> Self {
        self.form = Some(form.0);
        self
    }
}

/// Serializable description of a page: its visible text (absent while the page
/// is still loading) and its elements.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PageSnapshot {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub elements: Vec<ElementSpec>,
    #[serde(default)]
    pub clipboard: bool,
}

#[derive(Debug, Default)]
struct PageState {
    snapshot: PageSnapshot,
    events: Vec<(ElementId, SyntheticEvent)>,
    clipboard: Option<String>,
}

impl PageState {
    fn element_mut(&mut self, id: ElementId) -> Result<&mut ElementSpec, PageError> {
        self.snapshot
            .elements
            .get_mut(id.0 as usize)
            .ok_or(PageError::ElementGone(id))
    }
}

/// In-memory [`PageHost`] for tests and for driving the relays from a snapshot
/// file during development. Records every synthetic event it receives.
#[derive(Debug, Default)]
pub struct MemoryPage {
    state: Mutex<PageState>,
}

impl MemoryPage {
    /// A page that has not finished loading.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn loaded(text: impl Into<String>) -> Self {
        Self::from_snapshot(PageSnapshot {
            text: Some(text.into()),
            ..PageSnapshot::default()
        })
    }

    pub fn from_snapshot(snapshot: PageSnapshot) -> Self {
        Self {
            state: Mutex::new(PageState {
                snapshot,
                ..PageState::default()
            }),
        }
    }

    /// Swaps in new page content. Recorded events and clipboard are kept.
    pub fn replace(&self, snapshot: PageSnapshot) {
        self.state.lock().snapshot = snapshot;
    }

    pub fn set_text(&self, text: Option<&str>) {
        self.state.lock().snapshot.text = text.map(str::to_owned);
    }

    pub fn enable_clipboard(&self) {
        self.state.lock().snapshot.clipboard = true;
    }

    pub fn add_element(&self, spec: ElementSpec) -> ElementId {
        let mut state = self.state.lock();
        state.snapshot.elements.push(spec);
        ElementId(state.snapshot.elements.len() as u64 - 1)
    }

    pub fn content(&self, id: ElementId) -> Option<String> {
        self.state
            .lock()
            .snapshot
            .elements
            .get(id.0 as usize)
            .map(|element| element.content.clone())
    }

    pub fn events(&self) -> Vec<(ElementId, SyntheticEvent)> {
        self.state.lock().events.clone()
    }

    pub fn events_for(&self, id: ElementId) -> Vec<SyntheticEvent> {
        self.state
            .lock()
            .events
            .iter()
            .filter(|(target, _)| *target == id)
            .map(|(_, event)| *event)
            .collect()
    }

    pub fn clipboard(&self) -> Option<String> {
        self.state.lock().clipboard.clone()
    }
}

#[async_trait]
impl PageHost for MemoryPage {
    async fn visible_text(&self) -> Result<String, PageError> {
        self.state
            .lock()
            .snapshot
            .text
            .clone()
            .ok_or(PageError::NotReady)
    }

    async fn query_candidates(&self, kind: SelectorKind) -> Result<Vec<Candidate>, PageError> {
        let state = self.state.lock();
        if state.snapshot.text.is_none() {
            return Err(PageError::NotReady);
        }
        Ok(state
            .snapshot
            .elements
            .iter()
            .enumerate()
            .filter(|(_, element)| element.kinds.contains(&kind))
            .map(|(index, element)| Candidate {
                id: ElementId(index as u64),
                width: element.width,
                height: element.height,
                disabled: element.disabled,
                read_only: element.read_only,
                editable_region: element.editable_region,
            })
            .collect())
    }

    async fn set_content(
        &self,
        target: ElementId,
        text: &str,
        _mode: ContentMode,
    ) -> Result<(), PageError> {
        let mut state = self.state.lock();
        state.element_mut(target)?.content = text.to_owned();
        Ok(())
    }

    async fn dispatch_synthetic_event(
        &self,
        target: ElementId,
        event: SyntheticEvent,
    ) -> Result<(), PageError> {
        let mut state = self.state.lock();
        let clipboard = state.clipboard.clone();
        let element = state.element_mut(target)?;
        match event {
            SyntheticEvent::DeleteSelection => element.content.clear(),
            SyntheticEvent::Paste => {
                if let Some(text) = clipboard {
                    element.content = text;
                }
            }
            _ => {}
        }
        state.events.push((target, event));
        Ok(())
    }

    async fn enclosing_form(&self, target: ElementId) -> Result<Option<ElementId>, PageError> {
        let mut state = self.state.lock();
        Ok(state.element_mut(target)?.form.map(ElementId))
    }

    async fn write_clipboard(&self, text: &str) -> Result<(), PageError> {
        let mut state = self.state.lock();
        if !state.snapshot.clipboard {
            return Err(PageError::Unsupported("clipboard"));
        }
        state.clipboard = Some(text.to_owned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_timeout::tokio_timeout_test(5)]
    async fn unloaded_page_reports_not_ready() {
        let page = MemoryPage::new();
        assert!(matches!(page.visible_text().await, Err(PageError::NotReady)));
        assert!(matches!(
            page.query_candidates(SelectorKind::TextInput).await,
            Err(PageError::NotReady)
        ));
    }

    #[test_timeout::tokio_timeout_test(5)]
    async fn queries_by_kind_in_document_order() {
        let page = MemoryPage::loaded("hello");
        let a = page.add_element(ElementSpec::new(SelectorKind::TextArea));
        page.add_element(ElementSpec::new(SelectorKind::ActionControl));
        let c = page.add_element(ElementSpec::new(SelectorKind::TextArea).disabled());
        let found = page.query_candidates(SelectorKind::TextArea).await.unwrap();
        assert_eq!(found.iter().map(|c| c.id).collect::<Vec<_>>(), vec![a, c]);
        assert!(found[1].disabled);
    }

    #[test_timeout::tokio_timeout_test(5)]
    async fn paste_uses_clipboard_contents() {
        let page = MemoryPage::loaded("hello");
        page.enable_clipboard();
        let input = page.add_element(ElementSpec::new(SelectorKind::TextInput));
        page.set_content(input, "draft", ContentMode::Value).await.unwrap();
        page.write_clipboard("final").await.unwrap();
        page.dispatch_synthetic_event(input, SyntheticEvent::DeleteSelection)
            .await
            .unwrap();
        assert_eq!(page.content(input).as_deref(), Some(""));
        page.dispatch_synthetic_event(input, SyntheticEvent::Paste)
            .await
            .unwrap();
        assert_eq!(page.content(input).as_deref(), Some("final"));
    }

    #[test_timeout::timeout]
    fn snapshot_parses_with_defaults() {
        let snapshot: PageSnapshot = serde_json::from_str(
            r#"{
                "text": "Time remaining 04:12",
                "elements": [
                    {"kinds": ["text_area"], "form": 1},
                    {"kinds": []},
                    {"kinds": ["action_control"], "width": 0, "height": 0}
                ]
            }"#,
        )
        .unwrap();
        assert_eq!(snapshot.elements.len(), 3);
        assert_eq!(snapshot.elements[0].width, 120.0);
        assert_eq!(snapshot.elements[0].form, Some(1));
        assert!(!snapshot.clipboard);
    }
}
