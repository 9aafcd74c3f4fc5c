//! The embedded page as seen by the relays.
//!
//! The hosting shell owns the real page; relays only ever talk to it through
//! [`PageHost`], which exposes content extraction, candidate queries by
//! element kind, content assignment and synthetic events.

mod memory;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use memory::{ElementSpec, MemoryPage, PageSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ElementId(pub u64);

/// Element kinds the host knows how to query. The host maps each to whatever
/// concrete selector its page technology uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectorKind {
    TextInput,
    SearchInput,
    /// Any input that is not hidden, submit or button.
    GenericInput,
    TextArea,
    EditableRegion,
    TextboxRole,
    /// Buttons and button-like controls.
    ActionControl,
}

impl SelectorKind {
    /// Default discovery order for text targets.
    pub const TEXT_TARGETS: [SelectorKind; 6] = [
        SelectorKind::TextInput,
        SelectorKind::SearchInput,
        SelectorKind::GenericInput,
        SelectorKind::TextArea,
        SelectorKind::EditableRegion,
        SelectorKind::TextboxRole,
    ];
}

/// Element metadata returned by [`PageHost::query_candidates`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub id: ElementId,
    pub width: f64,
    pub height: f64,
    #[serde(default)]
    pub disabled: bool,
    #[serde(default)]
    pub read_only: bool,
    /// Content is assigned as editable text rather than as a form value.
    #[serde(default)]
    pub editable_region: bool,
}

impl Candidate {
    pub fn is_visible(&self) -> bool {
        self.width > 0.0 && self.height > 0.0
    }

    pub fn content_mode(&self) -> ContentMode {
        if self.editable_region {
            ContentMode::EditableText
        } else {
            ContentMode::Value
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentMode {
    Value,
    EditableText,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyntheticEvent {
    Focus,
    Click,
    Input,
    Change,
    SelectAll,
    DeleteSelection,
    Paste,
    EnterKey,
    Submit,
}

#[derive(Debug, Error)]
pub enum PageError {
    #[error("page not ready")]
    NotReady,
    #[error("element {0:?} no longer exists")]
    ElementGone(ElementId),
    #[error("{0} not supported by this host")]
    Unsupported(&'static str),
    #[error("page host error: {0}")]
    Host(String),
}

#[async_trait]
pub trait PageHost: Send + Sync {
    async fn visible_text(&self) -> Result<String, PageError>;

    async fn query_candidates(&self, kind: SelectorKind) -> Result<Vec<Candidate>, PageError>;

    async fn set_content(
        &self,
        target: ElementId,
        text: &str,
        mode: ContentMode,
    ) -> Result<(), PageError>;

    async fn dispatch_synthetic_event(
        &self,
        target: ElementId,
        event: SyntheticEvent,
    ) -> Result<(), PageError>;

    /// Nearest form element enclosing `target`, if any.
    async fn enclosing_form(&self, target: ElementId) -> Result<Option<ElementId>, PageError>;

    async fn write_clipboard(&self, _text: &str) -> Result<(), PageError> {
        Err(PageError::Unsupported("clipboard"))
    }
}

#[async_trait]
impl<P: PageHost + ?Sized> PageHost for std::sync::Arc<P> {
    async fn visible_text(&self) -> Result<String, PageError> {
        (**self).visible_text().await
    }

    async fn query_candidates(&self, kind: SelectorKind) -> Result<Vec<Candidate>, PageError> {
        (**self).query_candidates(kind).await
    }

    async fn set_content(
        &self,
        target: ElementId,
        text: &str,
        mode: ContentMode,
    ) -> Result<(), PageError> {
        (**self).set_content(target, text, mode).await
    }

    async fn dispatch_synthetic_event(
        &self,
        target: ElementId,
        event: SyntheticEvent,
    ) -> Result<(), PageError> {
        (**self).dispatch_synthetic_event(target, event).await
    }

    async fn enclosing_form(&self, target: ElementId) -> Result<Option<ElementId>, PageError> {
        (**self).enclosing_form(target).await
    }

    async fn write_clipboard(&self, text: &str) -> Result<(), PageError> {
        (**self).write_clipboard(text).await
    }
}
