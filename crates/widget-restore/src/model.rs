//! Reconstructed widget models.

use serde::Serialize;
use widget_wire::{StateValue, WidgetState};

use crate::WidgetId;

/// Error type for model construction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    #[error("State has no {0}")]
    MissingField(&'static str),

    #[error("{0} must be a string")]
    NotAString(&'static str),

    #[error("Unknown widget type {name} from {module}@{version}")]
    UnknownType {
        module: String,
        name: String,
        version: String,
    },

    #[error("Invalid state for {model_name}: {reason}")]
    InvalidState { model_name: String, reason: String },
}

/// The type selector carried in a widget's reserved state keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelSpec {
    pub model_name: String,
    pub model_module: String,
    pub model_module_version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_module: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view_module_version: Option<String>,
}

fn required(state: &WidgetState, key: &'static str) -> Result<String, ModelError> {
    match state.get(key) {
        None | Some(StateValue::Null) => Err(ModelError::MissingField(key)),
        Some(StateValue::String(s)) => Ok(s.clone()),
        Some(_) => Err(ModelError::NotAString(key)),
    }
}

fn optional(state: &WidgetState, key: &'static str) -> Result<Option<String>, ModelError> {
    match state.get(key) {
        None | Some(StateValue::Null) => Ok(None),
        Some(StateValue::String(s)) => Ok(Some(s.clone())),
        Some(_) => Err(ModelError::NotAString(key)),
    }
}

impl ModelSpec {
    /// Read `_model_name`, `_model_module`, `_model_module_version` (required)
    /// and the `_view_*` counterparts (optional) from `state`.
    pub fn from_state(state: &WidgetState) -> Result<Self, ModelError> {
        Ok(Self {
            model_name: required(state, "_model_name")?,
            model_module: required(state, "_model_module")?,
            model_module_version: required(state, "_model_module_version")?,
            view_name: optional(state, "_view_name")?,
            view_module: optional(state, "_view_module")?,
            view_module_version: optional(state, "_view_module_version")?,
        })
    }
}

/// A widget model rebuilt from kernel state.
///
/// Never mutated after construction; the state keeps the reserved `_model_*`
/// keys alongside the widget attributes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WidgetModel {
    model_id: WidgetId,
    #[serde(flatten)]
    spec: ModelSpec,
    state: WidgetState,
}

impl WidgetModel {
    pub fn new(model_id: WidgetId, spec: ModelSpec, state: WidgetState) -> Self {
        Self {
            model_id,
            spec,
            state,
        }
    }

    pub fn model_id(&self) -> &WidgetId {
        &self.model_id
    }

    pub fn model_name(&self) -> &str {
        &self.spec.model_name
    }

    pub fn model_module(&self) -> &str {
        &self.spec.model_module
    }

    pub fn model_module_version(&self) -> &str {
        &self.spec.model_module_version
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    pub fn state(&self) -> &WidgetState {
        &self.state
    }

    pub fn get(&self, key: &str) -> Option<&StateValue> {
        self.state.get(key)
    }
}
