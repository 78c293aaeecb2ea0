//! widget-restore - Rebuilds live Jupyter widgets into a static document.
//!
//! A rendered notebook page carries view placeholders for every widget
//! output, but no widget models. Given a kernel connection, this crate
//! rediscovers the widgets the kernel still holds, pulls each one's state
//! over its comm channel (throttled, because the transport drops messages
//! instead of pushing back), rebuilds typed models from that state, and binds
//! a view to every placeholder it can.
//!
//! One broken widget never stops the rest: failures are isolated per widget
//! id and reported, and the matching placeholders are left as they were.

use std::fmt;

use serde::{Deserialize, Serialize};

pub mod batch;
pub mod comm_client;
pub mod config;
pub mod document;
pub mod fixture;
pub mod host;
pub mod kernel;
pub mod memory;
pub mod model;
pub mod model_builder;
pub mod placeholder;
pub mod registry;
pub mod session;
pub mod tasks;
pub mod transport;
pub mod views;

pub use widget_wire::{StateValue, WidgetState};

/// Comm target name used by ipywidgets.
pub const WIDGET_COMM_TARGET: &str = "jupyter.widget";

/// Mime type of widget view placeholders in rendered documents.
pub const WIDGET_VIEW_MIMETYPE: &str = "application/vnd.jupyter.widget-view+json";

/// Id of the page element holding the embedded page configuration.
pub const CONFIG_ELEMENT_ID: &str = "jupyter-config-data";

/// Identifies one live widget (its comm id) inside a kernel session.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WidgetId(String);

impl WidgetId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WidgetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for WidgetId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for WidgetId {
    fn from(id: String) -> Self {
        Self(id)
    }
}
