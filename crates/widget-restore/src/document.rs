//! The rendered page, as far as widget restoration needs to see it.
//!
//! [`DocumentHandle`] is the narrow slice of a DOM the engine touches:
//! finding widget markers and the page config element, reading their text,
//! inserting view hosts, and wiring event listeners. [`MemoryDocument`] is
//! an arena-backed tree implementing it, loadable from a [`DocumentSpec`].

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Handle to a node inside one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NodeId(usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Callback registered for a named event.
pub type Listener = Box<dyn Fn() + Send + Sync>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DocumentError {
    #[error("Unknown node {0}")]
    UnknownNode(NodeId),

    #[error("Node {0} is not an element")]
    NotAnElement(NodeId),

    #[error("Node {reference} is not a child of {parent}")]
    NotAChild { parent: NodeId, reference: NodeId },

    #[error("Inserting {node} under {parent} would create a cycle")]
    Cycle { parent: NodeId, node: NodeId },
}

/// Document operations used during restoration.
pub trait DocumentHandle: Send {
    /// `<script type=mime_type>` elements, in document order.
    fn query_markers(&self, mime_type: &str) -> Vec<NodeId>;

    /// Concatenated text of `node` and its descendants.
    fn text_content(&self, node: NodeId) -> Option<String>;

    fn get_element_by_id(&self, id: &str) -> Option<NodeId>;

    fn parent(&self, node: NodeId) -> Option<NodeId>;

    /// Create a detached element.
    fn create_element(&mut self, tag: &str) -> NodeId;

    /// Create a detached text node.
    fn create_text(&mut self, text: &str) -> NodeId;

    /// Insert `node` into `parent` right before `reference`, moving it if it
    /// is already attached elsewhere.
    fn insert_before(
        &mut self,
        parent: NodeId,
        node: NodeId,
        reference: NodeId,
    ) -> Result<(), DocumentError>;

    fn append_child(&mut self, parent: NodeId, node: NodeId) -> Result<(), DocumentError>;

    /// Detach `node` (and its subtree) from its parent. Detached nodes are a no-op.
    fn remove(&mut self, node: NodeId) -> Result<(), DocumentError>;

    fn get_attribute(&self, node: NodeId, name: &str) -> Option<String>;

    fn set_attribute(&mut self, node: NodeId, name: &str, value: &str)
        -> Result<(), DocumentError>;

    fn add_event_listener(
        &mut self,
        node: NodeId,
        event: &str,
        listener: Listener,
    ) -> Result<(), DocumentError>;

    /// Run the listeners registered on `node` for `event`. Returns how many ran.
    fn dispatch_event(&self, node: NodeId, event: &str) -> usize;
}

/// Serializable document tree, used for fixtures and reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DocumentSpec {
    Text(String),
    Element {
        tag: String,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        attributes: BTreeMap<String, String>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        children: Vec<DocumentSpec>,
    },
}

enum NodeKind {
    Element {
        tag: String,
        attributes: BTreeMap<String, String>,
    },
    Text(String),
}

struct Node {
    kind: NodeKind,
    parent: Option<NodeId>,
    children: Vec<NodeId>,
    listeners: Vec<(String, Listener)>,
}

/// In-memory document tree.
pub struct MemoryDocument {
    nodes: Vec<Node>,
    root: NodeId,
}

impl Default for MemoryDocument {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MemoryDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryDocument")
            .field("nodes", &self.nodes.len())
            .field("tree", &self.to_spec())
            .finish()
    }
}

impl MemoryDocument {
    /// An empty document with a `body` root.
    pub fn new() -> Self {
        Self::with_root("body")
    }

    fn with_root(tag: &str) -> Self {
        let mut doc = Self {
            nodes: Vec::new(),
            root: NodeId(0),
        };
        doc.root = doc.push(NodeKind::Element {
            tag: tag.to_string(),
            attributes: BTreeMap::new(),
        });
        doc
    }

    pub fn from_spec(spec: &DocumentSpec) -> Self {
        match spec {
            DocumentSpec::Element {
                tag,
                attributes,
                children,
            } => {
                let mut doc = Self::with_root(tag);
                let root = doc.root;
                if let Some(attrs) = doc.element_mut(root) {
                    *attrs = attributes.clone();
                }
                for child in children {
                    doc.append_spec(root, child);
                }
                doc
            }
            DocumentSpec::Text(_) => {
                let mut doc = Self::new();
                let root = doc.root;
                doc.append_spec(root, spec);
                doc
            }
        }
    }

    fn append_spec(&mut self, parent: NodeId, spec: &DocumentSpec) {
        match spec {
            DocumentSpec::Text(text) => {
                self.text(parent, text);
            }
            DocumentSpec::Element {
                tag,
                attributes,
                children,
            } => {
                let attrs: Vec<(&str, &str)> = attributes
                    .iter()
                    .map(|(k, v)| (k.as_str(), v.as_str()))
                    .collect();
                let node = self.element(parent, tag, &attrs);
                for child in children {
                    self.append_spec(node, child);
                }
            }
        }
    }

    /// The attached tree below the root, without listeners.
    pub fn to_spec(&self) -> DocumentSpec {
        self.spec_of(self.root)
    }

    fn spec_of(&self, id: NodeId) -> DocumentSpec {
        let node = &self.nodes[id.0];
        match &node.kind {
            NodeKind::Text(text) => DocumentSpec::Text(text.clone()),
            NodeKind::Element { tag, attributes } => DocumentSpec::Element {
                tag: tag.clone(),
                attributes: attributes.clone(),
                children: node.children.iter().map(|c| self.spec_of(*c)).collect(),
            },
        }
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    /// Append a new `tag` element with `attributes` under `parent`.
    pub fn element(&mut self, parent: NodeId, tag: &str, attributes: &[(&str, &str)]) -> NodeId {
        let node = self.push(NodeKind::Element {
            tag: tag.to_string(),
            attributes: attributes
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        });
        self.attach_last(parent, node);
        node
    }

    /// Append a text node under `parent`.
    pub fn text(&mut self, parent: NodeId, text: &str) -> NodeId {
        let node = self.push(NodeKind::Text(text.to_string()));
        self.attach_last(parent, node);
        node
    }

    /// Append `<script type=mime_type>body</script>` under `parent`.
    pub fn script(&mut self, parent: NodeId, mime_type: &str, body: &str) -> NodeId {
        let node = self.element(parent, "script", &[("type", mime_type)]);
        self.text(node, body);
        node
    }

    pub fn tag(&self, node: NodeId) -> Option<&str> {
        match &self.nodes.get(node.0)?.kind {
            NodeKind::Element { tag, .. } => Some(tag),
            NodeKind::Text(_) => None,
        }
    }

    pub fn children(&self, node: NodeId) -> &[NodeId] {
        self.nodes
            .get(node.0)
            .map(|n| n.children.as_slice())
            .unwrap_or_default()
    }

    /// Attached nodes in document order.
    fn preorder(&self) -> Vec<NodeId> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            order.push(id);
            stack.extend(self.nodes[id.0].children.iter().rev().copied());
        }
        order
    }

    fn push(&mut self, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.nodes.push(Node {
            kind,
            parent: None,
            children: Vec::new(),
            listeners: Vec::new(),
        });
        id
    }

    // Only called with nodes this document just created
    fn attach_last(&mut self, parent: NodeId, node: NodeId) {
        self.nodes[node.0].parent = Some(parent);
        self.nodes[parent.0].children.push(node);
    }

    fn check(&self, node: NodeId) -> Result<(), DocumentError> {
        if node.0 < self.nodes.len() {
            Ok(())
        } else {
            Err(DocumentError::UnknownNode(node))
        }
    }

    fn element_mut(&mut self, node: NodeId) -> Option<&mut BTreeMap<String, String>> {
        match &mut self.nodes.get_mut(node.0)?.kind {
            NodeKind::Element { attributes, .. } => Some(attributes),
            NodeKind::Text(_) => None,
        }
    }

    fn is_ancestor_or_self(&self, candidate: NodeId, of: NodeId) -> bool {
        let mut current = Some(of);
        while let Some(id) = current {
            if id == candidate {
                return true;
            }
            current = self.nodes[id.0].parent;
        }
        false
    }

    fn prepare_insert(&mut self, parent: NodeId, node: NodeId) -> Result<(), DocumentError> {
        self.check(parent)?;
        self.check(node)?;
        if self.tag(parent).is_none() {
            return Err(DocumentError::NotAnElement(parent));
        }
        if self.is_ancestor_or_self(node, parent) {
            return Err(DocumentError::Cycle { parent, node });
        }
        if let Some(old_parent) = self.nodes[node.0].parent.take() {
            self.nodes[old_parent.0].children.retain(|c| *c != node);
        }
        Ok(())
    }
}

impl DocumentHandle for MemoryDocument {
    fn query_markers(&self, mime_type: &str) -> Vec<NodeId> {
        self.preorder()
            .into_iter()
            .filter(|id| {
                self.tag(*id) == Some("script")
                    && self.get_attribute(*id, "type").as_deref() == Some(mime_type)
            })
            .collect()
    }

    fn text_content(&self, node: NodeId) -> Option<String> {
        let n = self.nodes.get(node.0)?;
        match &n.kind {
            NodeKind::Text(text) => Some(text.clone()),
            NodeKind::Element { .. } => Some(
                n.children
                    .iter()
                    .filter_map(|c| self.text_content(*c))
                    .collect(),
            ),
        }
    }

    fn get_element_by_id(&self, id: &str) -> Option<NodeId> {
        self.preorder()
            .into_iter()
            .find(|node| self.get_attribute(*node, "id").as_deref() == Some(id))
    }

    fn parent(&self, node: NodeId) -> Option<NodeId> {
        self.nodes.get(node.0)?.parent
    }

    fn create_element(&mut self, tag: &str) -> NodeId {
        self.push(NodeKind::Element {
            tag: tag.to_string(),
            attributes: BTreeMap::new(),
        })
    }

    fn create_text(&mut self, text: &str) -> NodeId {
        self.push(NodeKind::Text(text.to_string()))
    }

    fn insert_before(
        &mut self,
        parent: NodeId,
        node: NodeId,
        reference: NodeId,
    ) -> Result<(), DocumentError> {
        self.check(reference)?;
        if node == reference || self.nodes[reference.0].parent != Some(parent) {
            return Err(DocumentError::NotAChild { parent, reference });
        }
        self.prepare_insert(parent, node)?;
        let children = &mut self.nodes[parent.0].children;
        let position = children
            .iter()
            .position(|c| *c == reference)
            .ok_or(DocumentError::NotAChild { parent, reference })?;
        children.insert(position, node);
        self.nodes[node.0].parent = Some(parent);
        Ok(())
    }

    fn append_child(&mut self, parent: NodeId, node: NodeId) -> Result<(), DocumentError> {
        self.prepare_insert(parent, node)?;
        self.attach_last(parent, node);
        Ok(())
    }

    fn remove(&mut self, node: NodeId) -> Result<(), DocumentError> {
        self.check(node)?;
        if let Some(parent) = self.nodes[node.0].parent.take() {
            self.nodes[parent.0].children.retain(|c| *c != node);
        }
        Ok(())
    }

    fn get_attribute(&self, node: NodeId, name: &str) -> Option<String> {
        match &self.nodes.get(node.0)?.kind {
            NodeKind::Element { attributes, .. } => attributes.get(name).cloned(),
            NodeKind::Text(_) => None,
        }
    }

    fn set_attribute(
        &mut self,
        node: NodeId,
        name: &str,
        value: &str,
    ) -> Result<(), DocumentError> {
        self.check(node)?;
        let attributes = self
            .element_mut(node)
            .ok_or(DocumentError::NotAnElement(node))?;
        attributes.insert(name.to_string(), value.to_string());
        Ok(())
    }

    fn add_event_listener(
        &mut self,
        node: NodeId,
        event: &str,
        listener: Listener,
    ) -> Result<(), DocumentError> {
        self.check(node)?;
        self.nodes[node.0]
            .listeners
            .push((event.to_string(), listener));
        Ok(())
    }

    fn dispatch_event(&self, node: NodeId, event: &str) -> usize {
        let Some(n) = self.nodes.get(node.0) else {
            return 0;
        };
        let mut invoked = 0;
        for (name, listener) in &n.listeners {
            if name == event {
                listener();
                invoked += 1;
            }
        }
        invoked
    }
}
