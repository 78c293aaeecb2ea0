//! Splitting binary buffers out of widget state and putting them back.
//!
//! Senders keep the JSON envelope small by pulling raw buffers out of the
//! state tree. Each removed buffer leaves a path (object keys and array
//! indices from the state root) so the receiver can reinsert it.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::state::{StateValue, WidgetState};

/// One step of a buffer path.
///
/// JSON numbers index into arrays, strings name object members.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Index(usize),
    Key(String),
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        PathSegment::Key(key.to_string())
    }
}

impl From<usize> for PathSegment {
    fn from(index: usize) -> Self {
        PathSegment::Index(index)
    }
}

pub type BufferPath = Vec<PathSegment>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BufferPathError {
    #[error("{paths} buffer paths declared but {buffers} buffers attached")]
    LengthMismatch { paths: usize, buffers: usize },

    #[error("buffer path #{index} is empty")]
    EmptyPath { index: usize },

    #[error("buffer path #{index} does not resolve at segment {segment}")]
    Unresolved { index: usize, segment: usize },
}

/// Reinsert `buffers` into `state` at the matching `paths`.
///
/// Every segment but the last must already exist. The last segment creates
/// or replaces an object member, or replaces an existing array element.
pub fn put_buffers(
    state: &mut WidgetState,
    paths: &[BufferPath],
    buffers: &[Bytes],
) -> Result<(), BufferPathError> {
    if paths.len() != buffers.len() {
        return Err(BufferPathError::LengthMismatch {
            paths: paths.len(),
            buffers: buffers.len(),
        });
    }
    for (index, (path, buffer)) in paths.iter().zip(buffers).enumerate() {
        put_buffer(state, path, buffer.clone(), index)?;
    }
    Ok(())
}

fn put_buffer(
    state: &mut WidgetState,
    path: &[PathSegment],
    buffer: Bytes,
    index: usize,
) -> Result<(), BufferPathError> {
    let unresolved = |segment| BufferPathError::Unresolved { index, segment };

    let Some((last, parents)) = path.split_last() else {
        return Err(BufferPathError::EmptyPath { index });
    };

    let Some((first, rest)) = parents.split_first() else {
        // Top-level attribute
        let PathSegment::Key(key) = last else {
            return Err(unresolved(0));
        };
        state.insert(key.clone(), StateValue::Buffer(buffer));
        return Ok(());
    };

    let PathSegment::Key(first) = first else {
        return Err(unresolved(0));
    };
    let mut node = state.get_mut(first).ok_or_else(|| unresolved(0))?;

    for (offset, segment) in rest.iter().enumerate() {
        node = match (node, segment) {
            (StateValue::Object(map), PathSegment::Key(key)) => map.get_mut(key),
            (StateValue::Array(items), PathSegment::Index(i)) => items.get_mut(*i),
            _ => None,
        }
        .ok_or_else(|| unresolved(offset + 1))?;
    }

    match (node, last) {
        (StateValue::Object(map), PathSegment::Key(key)) => {
            map.insert(key.clone(), StateValue::Buffer(buffer));
        }
        (StateValue::Array(items), PathSegment::Index(i)) if *i < items.len() => {
            items[*i] = StateValue::Buffer(buffer);
        }
        _ => return Err(unresolved(parents.len())),
    }
    Ok(())
}

/// Split every buffer out of `state`.
///
/// Buffers held by objects are removed from the object; buffers held by
/// arrays are replaced by `null` so indices stay stable. Paths come out in
/// depth-first order and line up with the returned buffers.
pub fn remove_buffers(state: &WidgetState) -> (Map<String, Value>, Vec<BufferPath>, Vec<Bytes>) {
    let mut split = Split::default();
    let mut path = Vec::new();
    let json = split.object(state, &mut path);
    (json, split.paths, split.buffers)
}

#[derive(Default)]
struct Split {
    paths: Vec<BufferPath>,
    buffers: Vec<Bytes>,
}

impl Split {
    fn object(
        &mut self,
        map: &std::collections::BTreeMap<String, StateValue>,
        path: &mut BufferPath,
    ) -> Map<String, Value> {
        let mut out = Map::new();
        for (key, value) in map {
            path.push(PathSegment::Key(key.clone()));
            if let Some(json) = self.value(value, path) {
                out.insert(key.clone(), json);
            }
            path.pop();
        }
        out
    }

    /// `None` means the value was a buffer and has been moved out.
    fn value(&mut self, value: &StateValue, path: &mut BufferPath) -> Option<Value> {
        let json = match value {
            StateValue::Buffer(buffer) => {
                self.paths.push(path.clone());
                self.buffers.push(buffer.clone());
                return None;
            }
            StateValue::Null => Value::Null,
            StateValue::Bool(b) => Value::Bool(*b),
            StateValue::Number(n) => Value::Number(n.clone()),
            StateValue::String(s) => Value::String(s.clone()),
            StateValue::Object(map) => Value::Object(self.object(map, path)),
            StateValue::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    path.push(PathSegment::Index(i));
                    out.push(self.value(item, path).unwrap_or(Value::Null));
                    path.pop();
                }
                Value::Array(out)
            }
        };
        Some(json)
    }
}
