//! Hydrated widget state.

use std::collections::BTreeMap;

use bytes::Bytes;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use serde_json::{Map, Number, Value};

use crate::codec::encode_buffer;

/// A widget state value: JSON plus raw binary buffers.
///
/// Buffers only appear after [`crate::put_buffers`] has rejoined them with the
/// JSON-safe part of the state.
#[derive(Debug, Clone, PartialEq)]
pub enum StateValue {
    Null,
    Bool(bool),
    Number(Number),
    String(String),
    Array(Vec<StateValue>),
    Object(BTreeMap<String, StateValue>),
    Buffer(Bytes),
}

/// Full widget state keyed by attribute name.
pub type WidgetState = BTreeMap<String, StateValue>;

/// Convert the JSON-safe half of a state payload.
pub fn state_from_json(map: Map<String, Value>) -> WidgetState {
    map.into_iter().map(|(k, v)| (k, v.into())).collect()
}

impl StateValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            StateValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_buffer(&self) -> Option<&Bytes> {
        match self {
            StateValue::Buffer(b) => Some(b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&BTreeMap<String, StateValue>> {
        match self {
            StateValue::Object(map) => Some(map),
            _ => None,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, StateValue::Null)
    }

    /// Member lookup for object values; `None` for everything else.
    pub fn get(&self, key: &str) -> Option<&StateValue> {
        self.as_object().and_then(|map| map.get(key))
    }
}

impl From<Value> for StateValue {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => StateValue::Null,
            Value::Bool(b) => StateValue::Bool(b),
            Value::Number(n) => StateValue::Number(n),
            Value::String(s) => StateValue::String(s),
            Value::Array(items) => StateValue::Array(items.into_iter().map(Into::into).collect()),
            Value::Object(map) => StateValue::Object(state_from_json(map)),
        }
    }
}

impl From<Bytes> for StateValue {
    fn from(buffer: Bytes) -> Self {
        StateValue::Buffer(buffer)
    }
}

impl From<&str> for StateValue {
    fn from(s: &str) -> Self {
        StateValue::String(s.to_string())
    }
}

/// Buffers serialize as base64 strings, so a hydrated state can still be
/// printed or logged as JSON.
impl Serialize for StateValue {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match self {
            StateValue::Null => serializer.serialize_unit(),
            StateValue::Bool(b) => serializer.serialize_bool(*b),
            StateValue::Number(n) => n.serialize(serializer),
            StateValue::String(s) => serializer.serialize_str(s),
            StateValue::Array(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            StateValue::Object(map) => {
                let mut out = serializer.serialize_map(Some(map.len()))?;
                for (k, v) in map {
                    out.serialize_entry(k, v)?;
                }
                out.end()
            }
            StateValue::Buffer(b) => serializer.serialize_str(&encode_buffer(b)),
        }
    }
}
