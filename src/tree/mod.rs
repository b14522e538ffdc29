//! Addressable document tree.
//!
//! Nodes live in an arena owned by [`SyncTree`] and are addressed by their
//! [`NodeId`]. Each node records its parent id so its path from the root can
//! be computed; the parent link is read-only ancestry and never appears in a
//! [`Snapshot`].
//!
//! Paths into the tree alternate `"children"` and an index, e.g.
//! `["children", 0, "children", 2]`. Appending `"data"` moves from the node to
//! its payload, and any further steps address into the payload itself.

use crate::operation::{Operation, OperationRange, OperationType};
use crate::path::{ObjectPath, PathError, PathStep};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::mpsc::Receiver;
use uuid::Uuid;

pub mod stream;

pub use stream::PayloadStream;

pub type NodeId = Uuid;

pub const CHILDREN_KEY: &str = "children";
pub const DATA_KEY: &str = "data";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TreeError {
    #[error("node {0} is not part of this tree")]
    UnknownNode(NodeId),
    #[error("node id {0} appears more than once")]
    DuplicateNode(NodeId),
    #[error("the root node cannot be removed")]
    RootRemoval,
}

/// Acyclic, serializable form of a (sub)tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    pub node_id: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default)]
    pub children: Vec<Snapshot>,
}

#[derive(Debug)]
pub struct Node {
    id: NodeId,
    parent: Option<NodeId>,
    data: Option<Value>,
    children: Vec<NodeId>,
    stream: PayloadStream,
}

impl Node {
    fn new(id: NodeId, parent: Option<NodeId>, data: Option<Value>) -> Self {
        Self {
            id,
            parent,
            data,
            children: Vec::new(),
            stream: PayloadStream::new(),
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }
}

/// Splits `path` at its first `"data"` step into the structural prefix and,
/// when present, the steps addressing into the payload.
pub fn split_at_data(path: &[PathStep]) -> (&[PathStep], Option<&[PathStep]>) {
    match path.iter().position(|step| step.is_key(DATA_KEY)) {
        Some(index) => (&path[..index], Some(&path[index + 1..])),
        None => (path, None),
    }
}

#[derive(Debug)]
pub struct SyncTree {
    root: NodeId,
    nodes: BTreeMap<NodeId, Node>,
}

impl Default for SyncTree {
    fn default() -> Self {
        Self::root(None)
    }
}

impl SyncTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a tree holding a single parentless node with a fresh identity.
    pub fn root(data: impl Into<Option<Value>>) -> Self {
        let id = Uuid::new_v4();
        let mut nodes = BTreeMap::new();
        nodes.insert(id, Node::new(id, None, data.into()));
        Self { root: id, nodes }
    }

    /// Rebuilds a tree from `snapshot`, keeping every node id and recomputing
    /// parent links.
    pub fn from_snapshot(snapshot: &Snapshot) -> Result<Self, TreeError> {
        let mut tree = Self {
            root: snapshot.node_id,
            nodes: BTreeMap::new(),
        };
        tree.load(snapshot, None)?;
        Ok(tree)
    }

    fn load(&mut self, snapshot: &Snapshot, parent: Option<NodeId>) -> Result<(), TreeError> {
        let id = snapshot.node_id;
        if self.nodes.contains_key(&id) {
            return Err(TreeError::DuplicateNode(id));
        }
        let mut node = Node::new(id, parent, snapshot.data.clone());
        node.children = snapshot.children.iter().map(|child| child.node_id).collect();
        self.nodes.insert(id, node);
        for child in &snapshot.children {
            self.load(child, Some(id))?;
        }
        Ok(())
    }

    /// Snapshot of the whole tree. Fails only when a child link points at a
    /// node missing from the arena.
    pub fn to_snapshot(&self) -> Result<Snapshot, TreeError> {
        self.subtree_snapshot(self.root)
    }

    pub fn subtree_snapshot(&self, id: NodeId) -> Result<Snapshot, TreeError> {
        let node = self.node(id)?;
        let children = node
            .children
            .iter()
            .map(|child| self.subtree_snapshot(*child))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Snapshot {
            node_id: node.id,
            data: node.data.clone(),
            children,
        })
    }

    pub fn root_id(&self) -> NodeId {
        self.root
    }

    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(&id)
    }

    pub fn node(&self, id: NodeId) -> Result<&Node, TreeError> {
        self.nodes.get(&id).ok_or(TreeError::UnknownNode(id))
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, TreeError> {
        self.nodes.get_mut(&id).ok_or(TreeError::UnknownNode(id))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn payload(&self, id: NodeId) -> Result<Option<&Value>, TreeError> {
        Ok(self.node(id)?.data.as_ref())
    }

    pub(crate) fn payload_mut(&mut self, id: NodeId) -> Result<&mut Option<Value>, TreeError> {
        Ok(&mut self.node_mut(id)?.data)
    }

    /// Appends a new child with a fresh identity to `parent`.
    pub fn add_child(
        &mut self,
        parent: NodeId,
        data: impl Into<Option<Value>>,
    ) -> Result<NodeId, TreeError> {
        let id = Uuid::new_v4();
        self.node_mut(parent)?.children.push(id);
        self.nodes.insert(id, Node::new(id, Some(parent), data.into()));
        Ok(id)
    }

    /// Detaches `id` from its parent and drops it together with its
    /// descendants. Later siblings shift down by one index.
    pub fn remove_subtree(&mut self, id: NodeId) -> Result<usize, TreeError> {
        let parent = self.node(id)?.parent.ok_or(TreeError::RootRemoval)?;
        self.node_mut(parent)?.children.retain(|child| *child != id);

        let mut removed = 0;
        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            if let Some(node) = self.nodes.remove(&next) {
                pending.extend(node.children);
                removed += 1;
            }
        }
        Ok(removed)
    }

    /// Index of `id` among its siblings; `None` for the root.
    pub fn position_in_parent(&self, id: NodeId) -> Result<Option<usize>, TreeError> {
        let Some(parent) = self.node(id)?.parent else {
            return Ok(None);
        };
        Ok(self
            .node(parent)?
            .children
            .iter()
            .position(|child| *child == id))
    }

    /// `["children", i, "children", j, ...]` from the root down to `id`.
    pub fn path_from_root(&self, id: NodeId) -> Result<ObjectPath, TreeError> {
        let mut reversed = Vec::new();
        let mut current = self.node(id)?;
        while let Some(parent) = current.parent {
            let index = self
                .position_in_parent(current.id)?
                .ok_or(TreeError::UnknownNode(current.id))?;
            reversed.push(PathStep::Index(index));
            reversed.push(PathStep::from(CHILDREN_KEY));
            current = self.node(parent)?;
        }
        reversed.reverse();
        Ok(reversed)
    }

    /// Path to the payload of `id`, extended by `extra` steps into it.
    pub fn data_path_from_root(
        &self,
        id: NodeId,
        extra: &[PathStep],
    ) -> Result<ObjectPath, TreeError> {
        let mut path = self.path_from_root(id)?;
        path.push(PathStep::from(DATA_KEY));
        path.extend_from_slice(extra);
        Ok(path)
    }

    /// Resolves the node a path structurally points at.
    ///
    /// Everything from the first `"data"` step on is ignored, so a path deep
    /// into a payload resolves to the node owning that payload. Returns
    /// `Ok(None)` when a child index is out of range, which is what a path
    /// into a since-removed node looks like.
    pub fn find_node(&self, path: &[PathStep]) -> Result<Option<NodeId>, PathError> {
        let (structural, _) = split_at_data(path);
        let mut current = self.root;
        for (pair_index, pair) in structural.chunks(2).enumerate() {
            let depth = pair_index * 2;
            let [key, index] = pair else {
                return Err(PathError::NotTraversable { depth: depth + 1 });
            };
            if !key.is_key(CHILDREN_KEY) {
                return Err(PathError::NotTraversable { depth });
            }
            let index = index
                .as_index()
                .ok_or(PathError::NotTraversable { depth: depth + 1 })?;
            let Some(node) = self.nodes.get(&current) else {
                return Ok(None);
            };
            match node.children.get(index) {
                Some(child) => current = *child,
                None => return Ok(None),
            }
        }
        Ok(Some(current))
    }

    /// Republishes the payload of `id` to its subscribers.
    pub fn emit_update(&mut self, id: NodeId) -> Result<usize, TreeError> {
        let node = self.node_mut(id)?;
        Ok(node.stream.emit(&node.data))
    }

    pub fn subscribe(&mut self, id: NodeId) -> Result<Receiver<Option<Value>>, TreeError> {
        let node = self.node_mut(id)?;
        Ok(node.stream.subscribe(&node.data))
    }

    pub fn create_insertion(
        &self,
        id: NodeId,
        index: usize,
        text: impl Into<String>,
    ) -> Result<Operation, TreeError> {
        let start = i64::try_from(index).unwrap_or(i64::MAX);
        Ok(
            Operation::new(OperationType::Insert, self.data_path_from_root(id, &[])?, id)
                .with_range(OperationRange::starting_at(start))
                .with_data(Value::String(text.into())),
        )
    }

    pub fn create_node_deletion(&self, id: NodeId) -> Result<Operation, TreeError> {
        Ok(Operation::new(
            OperationType::Delete,
            self.path_from_root(id)?,
            id,
        ))
    }

    pub fn create_node_data_deletion(&self, id: NodeId) -> Result<Operation, TreeError> {
        Ok(Operation::new(
            OperationType::Delete,
            self.data_path_from_root(id, &[])?,
            id,
        ))
    }

    pub fn create_replacement(&self, id: NodeId, data: Value) -> Result<Operation, TreeError> {
        Ok(
            Operation::new(
                OperationType::FullReplacement,
                self.data_path_from_root(id, &[])?,
                id,
            )
            .with_data(data),
        )
    }

    pub fn create_child_append(
        &self,
        id: NodeId,
        data: impl Into<Option<Value>>,
    ) -> Result<Operation, TreeError> {
        let operation = Operation::new(OperationType::ChildAppend, self.path_from_root(id)?, id);
        Ok(match data.into() {
            Some(data) => operation.with_data(data),
            None => operation,
        })
    }
}
