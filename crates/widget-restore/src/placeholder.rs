//! Binding views to the widget placeholders of a rendered page.
//!
//! Each widget output becomes a marker element whose text is a small JSON
//! payload naming the model:
//!
//! ```json
//! {"version_major": 2, "version_minor": 0, "model_id": "2f1c..."}
//! ```
//!
//! For every marker whose model was rebuilt, a view host is inserted right
//! before the marker and the view renders into it. Markers with unknown ids
//! or unreadable payloads stay as they are; a view that fails to render has
//! its host removed again.

use std::collections::BTreeMap;
use std::sync::Arc;

use futures::future::join_all;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::document::{DocumentHandle, NodeId};
use crate::model::WidgetModel;
use crate::views::{LayoutMessage, ResizeHint, ViewError, ViewFactory, WidgetView};
use crate::{WidgetId, WIDGET_VIEW_MIMETYPE};

/// Set on markers whose view has been attached.
pub const BOUND_ATTRIBUTE: &str = "data-widget-bound";

/// Set on view hosts, naming the model shown.
pub const HOST_ATTRIBUTE: &str = "data-jupyter-widget";

/// Event the page fires on a host when its container resizes.
pub const RESIZE_EVENT: &str = "jupyterWidgetResize";

#[derive(Debug, Deserialize)]
struct MarkerPayload {
    model_id: WidgetId,
}

#[derive(Debug, Clone, Serialize)]
pub struct BoundView {
    pub model_id: WidgetId,
    pub marker: NodeId,
    pub host: NodeId,
}

#[derive(Debug, Clone, Serialize)]
pub struct ViewFailure {
    pub model_id: WidgetId,
    pub reason: String,
}

/// What one attach pass did with each marker.
#[derive(Debug, Default, Serialize)]
pub struct AttachReport {
    pub bound: Vec<BoundView>,
    /// Markers naming a model that was not rebuilt.
    pub missing: Vec<WidgetId>,
    /// Markers bound by an earlier pass.
    pub already_bound: usize,
    /// Markers whose payload could not be read.
    pub malformed: usize,
    pub failed: Vec<ViewFailure>,
}

/// Attach views to the standard widget view markers in `doc`.
pub async fn attach_views<V: ViewFactory>(
    doc: &mut dyn DocumentHandle,
    models: &BTreeMap<WidgetId, Arc<WidgetModel>>,
    views: &V,
) -> AttachReport {
    attach_views_for(doc, WIDGET_VIEW_MIMETYPE, models, views).await
}

/// [`attach_views`] for markers of `mime_type`.
pub async fn attach_views_for<V: ViewFactory>(
    doc: &mut dyn DocumentHandle,
    mime_type: &str,
    models: &BTreeMap<WidgetId, Arc<WidgetModel>>,
    views: &V,
) -> AttachReport {
    let mut report = AttachReport::default();
    let mut matched: Vec<(NodeId, Arc<WidgetModel>)> = Vec::new();

    for marker in doc.query_markers(mime_type) {
        if doc.get_attribute(marker, BOUND_ATTRIBUTE).is_some() {
            report.already_bound += 1;
            continue;
        }
        let text = doc.text_content(marker).unwrap_or_default();
        let payload = match serde_json::from_str::<MarkerPayload>(&text) {
            Ok(payload) => payload,
            Err(err) => {
                warn!("[placeholder] Ignoring unreadable marker {}: {}", marker, err);
                report.malformed += 1;
                continue;
            }
        };
        match models.get(&payload.model_id) {
            Some(model) => matched.push((marker, model.clone())),
            None => {
                warn!(
                    "[placeholder] No model for widget {}, leaving its marker",
                    payload.model_id
                );
                report.missing.push(payload.model_id);
            }
        }
    }

    // All views are created before the document changes
    let created = join_all(
        matched
            .iter()
            .map(|(_, model)| views.create_view(model.clone())),
    )
    .await;

    for ((marker, model), view) in matched.into_iter().zip(created) {
        let model_id = model.model_id().clone();
        let outcome = match view {
            Ok(view) => bind(doc, marker, &model_id, view.as_ref()),
            Err(err) => Err(err),
        };
        match outcome {
            Ok(host) => {
                debug!("[placeholder] Bound widget {} at {}", model_id, host);
                report.bound.push(BoundView {
                    model_id,
                    marker,
                    host,
                });
            }
            Err(err) => {
                warn!("[placeholder] Could not show widget {}: {}", model_id, err);
                report.failed.push(ViewFailure {
                    model_id,
                    reason: err.to_string(),
                });
            }
        }
    }

    info!(
        "[placeholder] Bound {} views ({} missing, {} failed, {} already bound)",
        report.bound.len(),
        report.missing.len(),
        report.failed.len(),
        report.already_bound
    );
    report
}

fn bind(
    doc: &mut dyn DocumentHandle,
    marker: NodeId,
    model_id: &WidgetId,
    view: &dyn WidgetView,
) -> Result<NodeId, ViewError> {
    let parent = doc.parent(marker).ok_or_else(|| ViewError::Create {
        model_id: model_id.clone(),
        reason: "marker is not attached".to_string(),
    })?;

    let host = doc.create_element("div");
    doc.set_attribute(host, HOST_ATTRIBUTE, model_id.as_str())?;
    doc.insert_before(parent, host, marker)?;
    if let Err(err) = view.render(doc, host) {
        doc.remove(host)?;
        return Err(err);
    }
    doc.set_attribute(marker, BOUND_ATTRIBUTE, "")?;

    let target = view.layout_target();
    doc.add_event_listener(
        host,
        RESIZE_EVENT,
        Box::new(move || target.post(LayoutMessage::Resize(ResizeHint::UnknownSize))),
    )?;
    Ok(host)
}
