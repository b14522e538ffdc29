//! Operation application.
//!
//! [`Transformer::transform`] applies one [`Operation`] to a [`SyncTree`]:
//! it resolves the node the path structurally targets, checks that node's
//! identity against the operation's `node_id`, then mutates either the tree
//! structure or the node's payload.
//!
//! Operations are applied strictly in the order they are handed in. The engine
//! does no reordering or conflict resolution, so every participant must be fed
//! the same sequence (typically by relaying through a single server) to end up
//! with the same tree. `transform` takes the tree by `&mut`; callers that fan
//! operations out across threads must serialize access themselves.

use crate::operation::{Operation, OperationType};
use crate::path::{self, PathError, PathStep};
use crate::tree::{NodeId, SyncTree, TreeError, split_at_data};
use serde_json::Value;
use tracing::{debug, trace};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error("the passed operation has no valid type: {0:?}")]
    InvalidOperationType(String),
    #[error("INIT replaces the whole tree and must be handled before dispatch")]
    UnexpectedInit,
    #[error("operation path has {actual} steps, the limit is {limit}")]
    PathTooLong { limit: usize, actual: usize },
}

/// What happened to an operation that did not fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Applied,
    /// The path no longer leads to the node the sender targeted; nothing was
    /// changed.
    Stale,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformConfig {
    /// Skip operations whose path resolves to a node other than `node_id`.
    pub identity_guard: bool,
    pub max_path_len: usize,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            identity_guard: true,
            max_path_len: 1024,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Transformer {
    config: TransformConfig,
}

/// Applies `operation` with the default configuration.
pub fn transform(tree: &mut SyncTree, operation: &Operation) -> Result<Applied, TransformError> {
    Transformer::default().transform(tree, operation)
}

impl Transformer {
    pub fn new(config: TransformConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TransformConfig {
        &self.config
    }

    pub fn transform(
        &self,
        tree: &mut SyncTree,
        operation: &Operation,
    ) -> Result<Applied, TransformError> {
        match &operation.op_type {
            OperationType::Init => return Err(TransformError::UnexpectedInit),
            OperationType::Unknown(name) => {
                return Err(TransformError::InvalidOperationType(name.clone()));
            }
            _ => {}
        }

        let path = operation.object_path.as_slice();
        if path.len() > self.config.max_path_len {
            return Err(TransformError::PathTooLong {
                limit: self.config.max_path_len,
                actual: path.len(),
            });
        }

        let Some(target) = tree.find_node(path)? else {
            debug!(node = %operation.node_id, "target node is gone, skipping operation");
            return Ok(Applied::Stale);
        };
        if self.config.identity_guard && target != operation.node_id {
            debug!(
                expected = %operation.node_id,
                found = %target,
                "path resolves to a different node, skipping operation"
            );
            return Ok(Applied::Stale);
        }

        let (structural, payload_path) = split_at_data(path);
        // Depth of the first step inside the payload, for error reporting.
        let offset = structural.len() + 1;
        let payload_changed = match (&operation.op_type, payload_path) {
            (OperationType::Insert, Some(rest)) => {
                insert(tree, target, rest, operation).map_err(|err| err.offset_path(offset))?;
                true
            }
            (OperationType::FullReplacement, Some(rest)) => {
                replace(tree, target, rest, operation).map_err(|err| err.offset_path(offset))?;
                true
            }
            (OperationType::Delete, Some(rest)) => {
                delete_payload(tree, target, rest).map_err(|err| err.offset_path(offset))?;
                true
            }
            (OperationType::Delete, None) => {
                tree.remove_subtree(target)?;
                false
            }
            (OperationType::ChildAppend, _) => {
                tree.add_child(target, operation.data.clone())?;
                false
            }
            // INSERT and FULL_REPLACEMENT only write payloads; the tree
            // structure itself is not a writable value.
            (_, None) => {
                return Err(PathError::NotTraversable {
                    depth: structural.len(),
                }
                .into());
            }
            (OperationType::Init | OperationType::Unknown(_), Some(_)) => {
                return Err(TransformError::InvalidOperationType(
                    operation.op_type.as_str().to_string(),
                ));
            }
        };

        if payload_changed {
            tree.emit_update(target)?;
        }
        trace!(
            op = operation.op_type.as_str(),
            node = %target,
            "applied operation"
        );
        Ok(Applied::Applied)
    }
}

impl TransformError {
    fn offset_path(self, steps: usize) -> Self {
        match self {
            TransformError::Path(err) => TransformError::Path(err.offset(steps)),
            other => other,
        }
    }
}

/// String form used by INSERT: strings as-is, null or absent as empty, any
/// other value as its JSON text.
fn coerce_to_string(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(text)) => text.clone(),
        Some(other) => other.to_string(),
    }
}

/// Inserts `fragment` at UTF-16 code unit offset `start`, clamped into
/// `0..=len`. An offset that falls inside a surrogate pair moves to the end
/// of that character.
fn splice(value: &str, start: i64, fragment: &str) -> String {
    let target = usize::try_from(start.max(0)).unwrap_or(usize::MAX);
    let mut units = 0;
    let mut byte = value.len();
    for (index, ch) in value.char_indices() {
        if units >= target {
            byte = index;
            break;
        }
        units += ch.len_utf16();
    }

    let mut updated = String::with_capacity(value.len() + fragment.len());
    updated.push_str(&value[..byte]);
    updated.push_str(fragment);
    updated.push_str(&value[byte..]);
    updated
}

fn insert(
    tree: &mut SyncTree,
    target: NodeId,
    rest: &[PathStep],
    operation: &Operation,
) -> Result<(), TransformError> {
    let fragment = coerce_to_string(operation.data.as_ref());
    let start = operation.range_start();
    let payload = tree.payload_mut(target)?;

    if rest.is_empty() {
        let updated = splice(&coerce_to_string(payload.as_ref()), start, &fragment);
        *payload = Some(Value::String(updated));
        return Ok(());
    }

    let container = payload.as_mut().ok_or(PathError::NotTraversable { depth: 0 })?;
    let updated = {
        let current = path::find_value(container, rest)?;
        splice(&coerce_to_string(current), start, &fragment)
    };
    path::apply_value(container, rest, Value::String(updated))?;
    Ok(())
}

fn replace(
    tree: &mut SyncTree,
    target: NodeId,
    rest: &[PathStep],
    operation: &Operation,
) -> Result<(), TransformError> {
    let payload = tree.payload_mut(target)?;
    if rest.is_empty() {
        *payload = operation.data.clone();
        return Ok(());
    }

    let container = payload.as_mut().ok_or(PathError::NotTraversable { depth: 0 })?;
    let value = operation.data.clone().unwrap_or(Value::Null);
    path::apply_value(container, rest, value)?;
    Ok(())
}

fn delete_payload(
    tree: &mut SyncTree,
    target: NodeId,
    rest: &[PathStep],
) -> Result<(), TransformError> {
    let payload = tree.payload_mut(target)?;
    if rest.is_empty() {
        *payload = None;
        return Ok(());
    }

    let container = payload.as_mut().ok_or(PathError::NotTraversable { depth: 0 })?;
    path::remove_value(container, rest)?;
    Ok(())
}
