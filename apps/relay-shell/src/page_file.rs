use std::io::ErrorKind;
use std::path::PathBuf;

use async_trait::async_trait;
use relay_core::{
    Candidate, ContentMode, ElementId, MemoryPage, PageError, PageHost, PageSnapshot,
    SelectorKind, SyntheticEvent,
};
use tracing::info;

/// Page host backed by a JSON [`PageSnapshot`] on disk. The file is re-read on
/// every content access so it can be edited while the shell runs; a missing
/// file reads as a page that has not loaded yet.
pub struct FilePage {
    path: PathBuf,
    page: MemoryPage,
}

impl FilePage {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            page: MemoryPage::new(),
        }
    }

    async fn reload(&self) -> Result<(), PageError> {
        let bytes = match tokio::fs::read(&self.path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                self.page.replace(PageSnapshot::default());
                return Err(PageError::NotReady);
            }
            Err(err) => return Err(PageError::Host(err.to_string())),
        };
        let snapshot: PageSnapshot = serde_json::from_slice(&bytes)
            .map_err(|err| PageError::Host(format!("{}: {err}", self.path.display())))?;
        self.page.replace(snapshot);
        Ok(())
    }
}

#[async_trait]
impl PageHost for FilePage {
    async fn visible_text(&self) -> Result<String, PageError> {
        self.reload().await?;
        self.page.visible_text().await
    }

    async fn query_candidates(&self, kind: SelectorKind) -> Result<Vec<Candidate>, PageError> {
        self.reload().await?;
        self.page.query_candidates(kind).await
    }

    async fn set_content(
        &self,
        target: ElementId,
        text: &str,
        mode: ContentMode,
    ) -> Result<(), PageError> {
        self.page.set_content(target, text, mode).await?;
        info!(?target, ?mode, %text, "page content set");
        Ok(())
    }

    async fn dispatch_synthetic_event(
        &self,
        target: ElementId,
        event: SyntheticEvent,
    ) -> Result<(), PageError> {
        self.page.dispatch_synthetic_event(target, event).await?;
        info!(?target, ?event, "synthetic event dispatched");
        Ok(())
    }

    async fn enclosing_form(&self, target: ElementId) -> Result<Option<ElementId>, PageError> {
        self.page.enclosing_form(target).await
    }

    async fn write_clipboard(&self, text: &str) -> Result<(), PageError> {
        self.page.write_clipboard(text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_file(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "relay-shell-{}-{}.json",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        path
    }

    #[test_timeout::timeout]
    fn demo_snapshot_parses() {
        let snapshot: PageSnapshot =
            serde_json::from_str(include_str!("../demos/page.json")).unwrap();
        assert_eq!(snapshot.elements.len(), 3);
        assert_eq!(snapshot.elements[1].form, Some(0));
    }

    #[test_timeout::tokio_timeout_test(5)]
    async fn missing_file_is_not_ready() {
        let page = FilePage::new(scratch_file("missing"));
        assert!(matches!(page.visible_text().await, Err(PageError::NotReady)));
    }

    #[test_timeout::tokio_timeout_test(5)]
    async fn edits_are_picked_up_between_reads() {
        let path = scratch_file("edits");
        std::fs::write(&path, r#"{"text":"In queue. ETA 2 min"}"#).unwrap();
        let page = FilePage::new(path.clone());
        assert_eq!(page.visible_text().await.unwrap(), "In queue. ETA 2 min");

        std::fs::write(
            &path,
            r#"{"text":"Your turn","elements":[{"kinds":["text_area"]}]}"#,
        )
        .unwrap();
        let found = page.query_candidates(SelectorKind::TextArea).await.unwrap();
        assert_eq!(found.len(), 1);
        page.set_content(found[0].id, "hello", ContentMode::Value)
            .await
            .unwrap();

        std::fs::write(&path, "{ broken").unwrap();
        assert!(matches!(page.visible_text().await, Err(PageError::Host(_))));
        let _ = std::fs::remove_file(&path);
    }
}
