//! Wire types for restoring Jupyter widget state over comm channels.
//!
//! Widget state travels as a JSON envelope with raw binary payloads split
//! out into a side list of buffers. This crate holds the pieces both ends of
//! that exchange agree on:
//!
//! - [`CommMessage`]: a `jupyter_protocol` comm message paired with its
//!   buffers, carried as base64 strings (or byte arrays) when JSON-encoded
//! - `comm_info` helpers for enumerating open comms by target
//! - [`StateValue`] / [`WidgetState`]: a JSON tree that can also hold raw
//!   [`bytes::Bytes`] at the positions named by buffer paths
//! - [`put_buffers`] / [`remove_buffers`]: rejoin and split buffers

mod buffers;
pub mod codec;
mod message;
mod state;

pub use buffers::{put_buffers, remove_buffers, BufferPath, BufferPathError, PathSegment};
pub use message::{
    comm_ids_for, comm_info_reply, comm_info_request, request_state, requested_target,
    CommMessage, UpdatePayload, WireError, METHOD_REQUEST_STATE, METHOD_UPDATE,
};
pub use state::{state_from_json, StateValue, WidgetState};
