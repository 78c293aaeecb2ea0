//! Views bound to placeholders.
//!
//! A [`ViewFactory`] turns a model into a [`WidgetView`]; the view renders
//! into a host element and exposes a [`LayoutTarget`] that layout messages
//! (resize notifications from the page) are posted to.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Arc, Mutex};

use serde::Serialize;

use crate::document::{DocumentError, DocumentHandle, NodeId};
use crate::model::WidgetModel;
use crate::WidgetId;

#[derive(Debug, thiserror::Error)]
pub enum ViewError {
    #[error("Model {model_id} ({model_name}) has no view")]
    NoView {
        model_id: WidgetId,
        model_name: String,
    },

    #[error("Failed to render view: {0}")]
    Render(#[from] DocumentError),

    #[error("Failed to create view for {model_id}: {reason}")]
    Create { model_id: WidgetId, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ResizeHint {
    /// The container changed size and the new size is not known.
    UnknownSize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LayoutMessage {
    Resize(ResizeHint),
}

/// Receives layout messages for one view.
pub trait LayoutTarget: Send + Sync {
    fn post(&self, message: LayoutMessage);
}

/// Layout target that just records what it is sent.
#[derive(Debug, Default)]
pub struct LayoutQueue {
    messages: Mutex<Vec<LayoutMessage>>,
}

impl LayoutQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<LayoutMessage> {
        self.messages
            .lock()
            .map(|m| m.clone())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.messages.lock().map(|m| m.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl LayoutTarget for LayoutQueue {
    fn post(&self, message: LayoutMessage) {
        if let Ok(mut messages) = self.messages.lock() {
            messages.push(message);
        }
    }
}

/// A view of one widget model.
pub trait WidgetView: Send + Sync {
    /// Render into `host`, which is already attached to the document.
    fn render(&self, doc: &mut dyn DocumentHandle, host: NodeId) -> Result<(), ViewError>;

    fn layout_target(&self) -> Arc<dyn LayoutTarget>;
}

/// Creates views for models.
pub trait ViewFactory: Send + Sync {
    fn create_view(
        &self,
        model: Arc<WidgetModel>,
    ) -> impl Future<Output = Result<Box<dyn WidgetView>, ViewError>> + Send;
}

/// Renders each widget as a line of text naming its view and value.
///
/// Models without a `_view_name` (layouts, styles, links) cannot be shown
/// and fail view creation.
#[derive(Debug, Default)]
pub struct SummaryViewFactory {
    queues: Mutex<BTreeMap<WidgetId, Arc<LayoutQueue>>>,
}

impl SummaryViewFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Layout queue of the most recent view created for `id`.
    pub fn layout_queue(&self, id: &WidgetId) -> Option<Arc<LayoutQueue>> {
        self.queues.lock().ok()?.get(id).cloned()
    }
}

impl ViewFactory for SummaryViewFactory {
    async fn create_view(&self, model: Arc<WidgetModel>) -> Result<Box<dyn WidgetView>, ViewError> {
        let Some(view_name) = model.spec().view_name.clone() else {
            return Err(ViewError::NoView {
                model_id: model.model_id().clone(),
                model_name: model.model_name().to_string(),
            });
        };
        let layout = Arc::new(LayoutQueue::new());
        if let Ok(mut queues) = self.queues.lock() {
            queues.insert(model.model_id().clone(), layout.clone());
        }
        Ok(Box::new(SummaryView {
            model,
            view_name,
            layout,
        }))
    }
}

struct SummaryView {
    model: Arc<WidgetModel>,
    view_name: String,
    layout: Arc<LayoutQueue>,
}

impl SummaryView {
    fn summary(&self) -> String {
        let mut line = format!("{} {}", self.view_name, self.model.model_id());
        if let Some(description) = self.model.get("description").and_then(|d| d.as_str()) {
            if !description.is_empty() {
                line.push_str(&format!(" \"{}\"", description));
            }
        }
        if let Some(value) = self.model.get("value") {
            if let Ok(rendered) = serde_json::to_string(value) {
                line.push_str(&format!(" = {}", rendered));
            }
        }
        line
    }
}

impl WidgetView for SummaryView {
    fn render(&self, doc: &mut dyn DocumentHandle, host: NodeId) -> Result<(), ViewError> {
        doc.set_attribute(host, "class", "widget-summary")?;
        let text = doc.create_text(&self.summary());
        doc.append_child(host, text)?;
        Ok(())
    }

    fn layout_target(&self) -> Arc<dyn LayoutTarget> {
        self.layout.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::MemoryDocument;
    use crate::registry::default_registry;
    use serde_json::json;
    use widget_wire::state_from_json;

    fn model(value: serde_json::Value) -> Arc<WidgetModel> {
        let state = state_from_json(value.as_object().unwrap().clone());
        Arc::new(default_registry().construct("w1".into(), state).unwrap())
    }

    #[tokio::test]
    async fn test_summary_view_renders_value() {
        let factory = SummaryViewFactory::new();
        let view = factory
            .create_view(model(json!({
                "_model_name": "IntSliderModel",
                "_model_module": "@jupyter-widgets/controls",
                "_model_module_version": "2.0.0",
                "_view_name": "IntSliderView",
                "description": "n",
                "value": 42
            })))
            .await
            .unwrap();

        let mut doc = MemoryDocument::new();
        let root = doc.root();
        let host = doc.element(root, "div", &[]);
        view.render(&mut doc, host).unwrap();

        assert_eq!(
            doc.text_content(host).as_deref(),
            Some("IntSliderView w1 \"n\" = 42")
        );
        assert_eq!(doc.get_attribute(host, "class").as_deref(), Some("widget-summary"));
    }

    #[tokio::test]
    async fn test_models_without_views_fail() {
        let factory = SummaryViewFactory::new();
        let err = factory
            .create_view(model(json!({
                "_model_name": "LayoutModel",
                "_model_module": "@jupyter-widgets/base",
                "_model_module_version": "2.0.0"
            })))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ViewError::NoView { .. }));
    }

    #[tokio::test]
    async fn test_layout_target_records_messages() {
        let factory = SummaryViewFactory::new();
        let view = factory
            .create_view(model(json!({
                "_model_name": "ButtonModel",
                "_model_module": "@jupyter-widgets/controls",
                "_model_module_version": "2.0.0",
                "_view_name": "ButtonView"
            })))
            .await
            .unwrap();

        view.layout_target()
            .post(LayoutMessage::Resize(ResizeHint::UnknownSize));
        let queue = factory.layout_queue(&"w1".into()).unwrap();
        assert_eq!(
            queue.messages(),
            vec![LayoutMessage::Resize(ResizeHint::UnknownSize)]
        );
    }
}
