//! Comm messages used by the widget state exchange.
//!
//! The envelope types come from `jupyter_protocol`: a widget's traffic is
//! `comm_msg` content ([`CommMsg`]) with raw buffers riding on the
//! [`JupyterMessage`]. [`CommMessage`] pairs the two so the state exchange can
//! work on one value.

use std::collections::BTreeSet;

use bytes::Bytes;
use jupyter_protocol::{
    CommId, CommInfoReply, CommInfoRequest, CommMsg, JupyterMessage, JupyterMessageContent,
};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Map, Value};

use crate::buffers::{put_buffers, remove_buffers, BufferPath, BufferPathError};
use crate::state::{state_from_json, WidgetState};

/// `method` of the state-carrying comm message.
pub const METHOD_UPDATE: &str = "update";

/// `method` of the request that asks a widget to send its full state.
pub const METHOD_REQUEST_STATE: &str = "request_state";

/// Error type for decoding comm payloads.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("Malformed comm payload: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Expected a comm_msg, got {0}")]
    NotComm(String),

    #[error("Expected an update message, got method {0:?}")]
    NotUpdate(Option<String>),

    #[error("Buffer reinsertion failed: {0}")]
    BufferPath(#[from] BufferPathError),
}

/// Data of the outbound state request: exactly `{"method": "request_state"}`.
pub fn request_state() -> Map<String, Value> {
    let mut data = Map::new();
    data.insert("method".into(), Value::from(METHOD_REQUEST_STATE));
    data
}

/// `comm_info_request` content asking for the comms open on `target_name`.
pub fn comm_info_request(target_name: &str) -> Result<CommInfoRequest, WireError> {
    Ok(serde_json::from_value(json!({ "target_name": target_name }))?)
}

/// Target a `comm_info_request` asks about, if it names one.
pub fn requested_target(request: &CommInfoRequest) -> Option<String> {
    serde_json::to_value(request)
        .ok()?
        .get("target_name")
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// `comm_info_reply` content listing `(comm_id, target_name)` pairs.
pub fn comm_info_reply<'a, I>(comms: I) -> Result<CommInfoReply, WireError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let comms: Map<String, Value> = comms
        .into_iter()
        .map(|(id, target)| (id.to_string(), json!({ "target_name": target })))
        .collect();
    Ok(serde_json::from_value(json!({ "status": "ok", "comms": comms }))?)
}

/// Ids in `reply` registered under `target_name`.
pub fn comm_ids_for(reply: &CommInfoReply, target_name: &str) -> BTreeSet<String> {
    reply
        .comms
        .iter()
        .filter(|(_, info)| info.target_name == target_name)
        .map(|(id, _)| id.0.clone())
        .collect()
}

/// A `comm_msg` together with the buffers that travelled with it.
///
/// JSON-encoded as `{"content": {"comm_id", "data"}, "buffers": [...]}` with
/// buffers as base64 strings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommMessage {
    pub content: CommMsg,

    #[serde(default, with = "crate::codec::buffers")]
    pub buffers: Vec<Bytes>,
}

/// Body of an `update` message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdatePayload {
    pub method: String,

    pub state: Map<String, Value>,

    #[serde(
        default,
        deserialize_with = "null_as_empty",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub buffer_paths: Vec<BufferPath>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<BufferPath>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<BufferPath>>::deserialize(deserializer)?.unwrap_or_default())
}

impl CommMessage {
    pub fn new(comm_id: impl Into<String>, data: Map<String, Value>, buffers: Vec<Bytes>) -> Self {
        Self {
            content: CommMsg {
                comm_id: CommId(comm_id.into()),
                data,
            },
            buffers,
        }
    }

    /// The state request for `comm_id`, with no buffers.
    pub fn request_state(comm_id: impl Into<String>) -> Self {
        Self::new(comm_id, request_state(), Vec::new())
    }

    /// Build an `update` carrying `state`, with buffers split out.
    pub fn update(comm_id: impl Into<String>, state: &WidgetState) -> Self {
        let (json_state, buffer_paths, buffers) = remove_buffers(state);
        let mut data = Map::new();
        data.insert("method".into(), Value::from(METHOD_UPDATE));
        data.insert("state".into(), Value::Object(json_state));
        if !buffer_paths.is_empty() {
            data.insert("buffer_paths".into(), json!(buffer_paths));
        }
        Self::new(comm_id, data, buffers)
    }

    pub fn comm_id(&self) -> &str {
        &self.content.comm_id.0
    }

    pub fn data(&self) -> &Map<String, Value> {
        &self.content.data
    }

    /// `data.method`, if present.
    pub fn method(&self) -> Option<&str> {
        self.content.data.get("method").and_then(Value::as_str)
    }

    pub fn is_update(&self) -> bool {
        self.method() == Some(METHOD_UPDATE)
    }

    /// Decode an `update` message into hydrated state.
    ///
    /// Buffers are reinserted only when the message declares buffer paths;
    /// when it does, the path and buffer counts must match.
    pub fn into_state(self) -> Result<WidgetState, WireError> {
        if !self.is_update() {
            return Err(WireError::NotUpdate(self.method().map(str::to_string)));
        }
        let payload: UpdatePayload = serde_json::from_value(Value::Object(self.content.data))?;
        let mut state = state_from_json(payload.state);
        if !payload.buffer_paths.is_empty() {
            put_buffers(&mut state, &payload.buffer_paths, &self.buffers)?;
        }
        Ok(state)
    }
}

impl TryFrom<JupyterMessage> for CommMessage {
    type Error = WireError;

    fn try_from(message: JupyterMessage) -> Result<Self, Self::Error> {
        match message.content {
            JupyterMessageContent::CommMsg(content) => Ok(Self {
                content,
                buffers: message.buffers,
            }),
            _ => Err(WireError::NotComm(message.header.msg_type)),
        }
    }
}

impl From<CommMessage> for JupyterMessage {
    fn from(message: CommMessage) -> Self {
        let mut jupyter: JupyterMessage = message.content.into();
        jupyter.metadata = json!({});
        jupyter.buffers = message.buffers;
        jupyter
    }
}
