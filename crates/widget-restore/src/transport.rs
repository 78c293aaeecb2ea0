//! Comm transport seams.
//!
//! The engine never talks to a kernel directly. It opens one channel per
//! widget through a [`CommTransport`], exchanges a request and a reply, and
//! lets the channel go. [`crate::memory::MemoryKernel`] is the in-process
//! implementation used for replays and tests.

use std::collections::BTreeSet;
use std::future::Future;

use jupyter_protocol::JupyterMessage;

use crate::WidgetId;

/// Error type for transport operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TransportError {
    #[error("Failed to open comm {comm_id}: {reason}")]
    OpenFailed { comm_id: String, reason: String },

    #[error("Failed to send on comm {comm_id}: {reason}")]
    SendFailed { comm_id: String, reason: String },

    #[error("Comm {0} is closed")]
    Closed(String),

    #[error("Failed to list open comms: {0}")]
    ListFailed(String),
}

/// One open comm channel, bound to a single widget.
///
/// Dropping the channel releases it.
pub trait CommChannel: Send {
    fn comm_id(&self) -> &WidgetId;

    /// Send a message (normally a `comm_msg`) to the kernel side.
    fn send(
        &mut self,
        message: JupyterMessage,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Next inbound message, or `None` once the channel has closed.
    fn recv(&mut self) -> impl Future<Output = Option<JupyterMessage>> + Send;
}

/// Opens comm channels and enumerates the ones a kernel holds.
pub trait CommTransport: Send + Sync {
    type Channel: CommChannel;

    fn open_channel(
        &self,
        target_name: &str,
        comm_id: &WidgetId,
    ) -> impl Future<Output = Result<Self::Channel, TransportError>> + Send;

    /// Ids of every open comm registered under `target_name`, as a
    /// `comm_info_request` would report them.
    fn list_open_channels(
        &self,
        target_name: &str,
    ) -> impl Future<Output = Result<BTreeSet<WidgetId>, TransportError>> + Send;
}
