//! Recorded sessions for `widget-restore replay`.
//!
//! ```json
//! {
//!   "widgets": [
//!     {"id": "w1", "state": {"_model_name": "IntSliderModel", "...": "..."}},
//!     {"id": "img", "state": {"value": null}, "buffer_paths": [["value"]],
//!      "buffers": ["iVBORw0KGgo="], "behavior": {"kind": "delayed", "delay_ms": 50}}
//!   ],
//!   "document": {"tag": "body", "children": ["..."]}
//! }
//! ```

use std::path::{Path, PathBuf};

use bytes::Bytes;
use serde::Deserialize;
use serde_json::{Map, Value};
use uuid::Uuid;
use widget_wire::{put_buffers, state_from_json, BufferPath, BufferPathError};

use crate::document::{DocumentSpec, MemoryDocument};
use crate::memory::{CommBehavior, MemoryKernel};
use crate::{WidgetId, WIDGET_COMM_TARGET};

#[derive(Debug, thiserror::Error)]
pub enum FixtureError {
    #[error("Failed to read fixture {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid fixture: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Widget #{index} has bad buffers: {source}")]
    Buffers {
        index: usize,
        #[source]
        source: BufferPathError,
    },
}

#[derive(Debug, Deserialize)]
pub struct FixtureWidget {
    /// Comm id; a fresh one is generated when absent
    #[serde(default)]
    pub id: Option<WidgetId>,
    #[serde(default)]
    pub target: Option<String>,
    pub state: Map<String, Value>,
    #[serde(default)]
    pub buffer_paths: Vec<BufferPath>,
    #[serde(default, with = "widget_wire::codec::buffers")]
    pub buffers: Vec<Bytes>,
    #[serde(default)]
    pub behavior: CommBehavior,
}

#[derive(Debug, Deserialize)]
pub struct ReplayFixture {
    #[serde(default)]
    pub widgets: Vec<FixtureWidget>,
    pub document: DocumentSpec,
}

impl ReplayFixture {
    pub fn from_path(path: &Path) -> Result<Self, FixtureError> {
        let contents = std::fs::read_to_string(path).map_err(|source| FixtureError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, FixtureError> {
        Ok(serde_json::from_str(contents)?)
    }

    /// A kernel holding every recorded widget, with its scripted behavior.
    pub fn kernel(&self) -> Result<MemoryKernel, FixtureError> {
        let kernel = MemoryKernel::new();
        for (index, widget) in self.widgets.iter().enumerate() {
            let mut state = state_from_json(widget.state.clone());
            if !widget.buffer_paths.is_empty() {
                put_buffers(&mut state, &widget.buffer_paths, &widget.buffers)
                    .map_err(|source| FixtureError::Buffers { index, source })?;
            }
            let target = widget.target.as_deref().unwrap_or(WIDGET_COMM_TARGET);
            let id = widget
                .id
                .clone()
                .unwrap_or_else(|| WidgetId::new(Uuid::new_v4().simple().to_string()));
            kernel.insert_widget_on(target, id.clone(), state);
            kernel.set_behavior(&id, widget.behavior.clone());
        }
        Ok(kernel)
    }

    pub fn document(&self) -> MemoryDocument {
        MemoryDocument::from_spec(&self.document)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::comm_client::fetch_state;
    use crate::document::DocumentHandle;
    use crate::transport::CommTransport;

    #[tokio::test]
    async fn test_fixture_builds_kernel_and_document() {
        let fixture = ReplayFixture::parse(
            r#"{
                "widgets": [
                    {"id": "w1", "state": {"value": 1}, "behavior": {"kind": "silent"}},
                    {"id": "img", "state": {"value": null},
                     "buffer_paths": [["value"]], "buffers": ["AQID"]},
                    {"state": {"value": 3}, "target": "other.target"}
                ],
                "document": {"tag": "body", "children": ["hello"]}
            }"#,
        )
        .unwrap();

        let kernel = fixture.kernel().unwrap();
        let ids = kernel.list_open_channels(WIDGET_COMM_TARGET).await.unwrap();
        assert_eq!(
            ids.into_iter().collect::<Vec<_>>(),
            vec![WidgetId::from("img"), WidgetId::from("w1")]
        );
        assert_eq!(kernel.list_open_channels("other.target").await.unwrap().len(), 1);

        let fetched = fetch_state(&kernel, WIDGET_COMM_TARGET, &"img".into())
            .await
            .unwrap();
        assert_eq!(
            fetched.state["value"].as_buffer(),
            Some(&Bytes::from_static(&[1, 2, 3]))
        );

        let doc = fixture.document();
        assert_eq!(doc.text_content(doc.root()).as_deref(), Some("hello"));
    }

    #[test]
    fn test_mismatched_buffers_are_rejected() {
        let fixture = ReplayFixture::parse(
            r#"{
                "widgets": [{"id": "w", "state": {"a": null}, "buffer_paths": [["a"]]}],
                "document": {"tag": "body"}
            }"#,
        )
        .unwrap();
        assert!(matches!(
            fixture.kernel(),
            Err(FixtureError::Buffers { index: 0, .. })
        ));
    }
}
