//! Finding and stopping the kernel behind a rendered page.
//!
//! A rendered page embeds its server configuration as JSON in an element
//! with id `jupyter-config-data`; the page's kernel is its `kernelId`. When
//! a preview frame is closed or reloaded, that kernel is shut down through
//! a [`KernelManager`].

pub mod rest;

use std::future::Future;
use std::sync::Arc;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::DocumentHandle;
use crate::tasks::TaskSet;
use crate::CONFIG_ELEMENT_ID;

/// A kernel as the Jupyter server describes it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KernelModel {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connections: Option<u64>,
}

#[derive(Debug, thiserror::Error)]
pub enum KernelError {
    #[error("Kernel {0} not found")]
    NotFound(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Kernel manager unavailable: {0}")]
    Unavailable(String),
}

/// Server-side kernel lifecycle operations.
pub trait KernelManager: Send + Sync + 'static {
    fn shutdown_kernel(&self, kernel_id: &str)
        -> impl Future<Output = Result<(), KernelError>> + Send;

    fn get_kernel_model(
        &self,
        kernel_id: &str,
    ) -> impl Future<Output = Result<Option<KernelModel>, KernelError>> + Send;
}

/// Result of [`shutdown_kernel_for`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", content = "kernel_id", rename_all = "snake_case")]
pub enum ShutdownOutcome {
    /// The frame has no kernel id; nothing was sent.
    NoKernel,
    /// A shutdown for this kernel was started.
    Requested(String),
}

/// Kernel id from the frame's `jupyter-config-data` element.
pub fn frame_kernel_id(frame: &dyn DocumentHandle) -> Option<String> {
    frame_kernel_id_in(frame, CONFIG_ELEMENT_ID)
}

/// Kernel id from the config element `element_id` of `frame`.
pub fn frame_kernel_id_in(frame: &dyn DocumentHandle, element_id: &str) -> Option<String> {
    let Some(element) = frame.get_element_by_id(element_id) else {
        debug!("[kernel] Frame has no #{} element", element_id);
        return None;
    };
    let text = frame.text_content(element).unwrap_or_default();
    let config: Value = match serde_json::from_str(&text) {
        Ok(config) => config,
        Err(err) => {
            debug!("[kernel] Unreadable page config: {}", err);
            return None;
        }
    };
    match config.get("kernelId").and_then(Value::as_str) {
        Some(id) if !id.is_empty() => Some(id.to_string()),
        Some(_) => {
            debug!("[kernel] Page config has an empty kernelId, treating the page as kernel-less");
            None
        }
        _ => {
            debug!("[kernel] Page config has no kernelId");
            None
        }
    }
}

/// Start shutting down the frame's kernel, if it names one.
///
/// The request runs on `tasks`; its failure is logged and goes no further.
pub fn shutdown_kernel_for<K: KernelManager>(
    frame: &dyn DocumentHandle,
    manager: Arc<K>,
    tasks: &mut TaskSet,
) -> ShutdownOutcome {
    shutdown_kernel_in(frame, CONFIG_ELEMENT_ID, manager, tasks)
}

/// [`shutdown_kernel_for`] reading the config element `element_id`.
pub fn shutdown_kernel_in<K: KernelManager>(
    frame: &dyn DocumentHandle,
    element_id: &str,
    manager: Arc<K>,
    tasks: &mut TaskSet,
) -> ShutdownOutcome {
    let Some(kernel_id) = frame_kernel_id_in(frame, element_id) else {
        return ShutdownOutcome::NoKernel;
    };

    info!("[kernel] Shutting down kernel {}", kernel_id);
    let id = kernel_id.clone();
    tasks.spawn(format!("shutdown kernel {}", kernel_id), async move {
        if let Err(err) = manager.shutdown_kernel(&id).await {
            warn!("[kernel] Failed to shut down kernel {}: {}", id, err);
        }
    });
    ShutdownOutcome::Requested(kernel_id)
}

/// Look up the frame's kernel. Lookup failures are logged and read as `None`.
pub async fn discover_kernel<K: KernelManager>(
    frame: &dyn DocumentHandle,
    manager: &K,
) -> Option<KernelModel> {
    discover_kernel_in(frame, CONFIG_ELEMENT_ID, manager).await
}

/// [`discover_kernel`] reading the config element `element_id`.
pub async fn discover_kernel_in<K: KernelManager>(
    frame: &dyn DocumentHandle,
    element_id: &str,
    manager: &K,
) -> Option<KernelModel> {
    let kernel_id = frame_kernel_id_in(frame, element_id)?;
    match manager.get_kernel_model(&kernel_id).await {
        Ok(model) => model,
        Err(err) => {
            warn!("[kernel] Failed to look up kernel {}: {}", kernel_id, err);
            None
        }
    }
}
