//! State requests over a single widget comm.
//!
//! One exchange per widget: open a channel, send `{"method": "request_state"}`,
//! wait for the first `update`, rejoin its buffers with the state. Messages
//! with any other method are skipped.

use std::time::Duration;

use log::trace;
use widget_wire::{CommMessage, WidgetState, WireError};

use crate::transport::{CommChannel, CommTransport, TransportError};
use crate::WidgetId;

/// Error type for a single state fetch.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("Comm {0} closed before sending its state")]
    ChannelClosed(WidgetId),

    #[error("No state from comm {id} within {timeout:?}")]
    NoResponse { id: WidgetId, timeout: Duration },

    #[error("Malformed state from comm {id}: {source}")]
    Malformed {
        id: WidgetId,
        #[source]
        source: WireError,
    },
}

/// A widget's state together with the channel it arrived on.
pub struct FetchedState<C> {
    pub channel: C,
    pub state: WidgetState,
}

/// Request the full state of widget `id`.
///
/// There is no timeout here: a comm that never answers keeps this future
/// pending. Use [`fetch_state_with_deadline`] to bound the wait.
pub async fn fetch_state<T: CommTransport>(
    transport: &T,
    target_name: &str,
    id: &WidgetId,
) -> Result<FetchedState<T::Channel>, FetchError> {
    let mut channel = transport.open_channel(target_name, id).await?;
    let request = CommMessage::request_state(id.as_str());
    channel.send(request.into()).await?;

    while let Some(message) = channel.recv().await {
        let message = match CommMessage::try_from(message) {
            Ok(message) => message,
            Err(err) => {
                trace!("[comm-client] Skipping message on comm {}: {}", id, err);
                continue;
            }
        };
        if !message.is_update() {
            trace!(
                "[comm-client] Skipping {:?} message on comm {}",
                message.method(),
                id
            );
            continue;
        }
        let state = message.into_state().map_err(|source| FetchError::Malformed {
            id: id.clone(),
            source,
        })?;
        return Ok(FetchedState { channel, state });
    }
    Err(FetchError::ChannelClosed(id.clone()))
}

/// [`fetch_state`], failing with [`FetchError::NoResponse`] after `deadline`.
///
/// `None` waits indefinitely. The channel is dropped when the deadline hits.
pub async fn fetch_state_with_deadline<T: CommTransport>(
    transport: &T,
    target_name: &str,
    id: &WidgetId,
    deadline: Option<Duration>,
) -> Result<FetchedState<T::Channel>, FetchError> {
    let Some(timeout) = deadline else {
        return fetch_state(transport, target_name, id).await;
    };
    tokio::time::timeout(timeout, fetch_state(transport, target_name, id))
        .await
        .map_err(|_| FetchError::NoResponse {
            id: id.clone(),
            timeout,
        })?
}
