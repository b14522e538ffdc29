//! The operation wire contract.
//!
//! ```json
//! { "objectPath": ["children", 0, "data"], "type": "INSERT",
//!   "range": { "start": 1 }, "data": "X", "nodeId": "…" }
//! ```

use crate::path::ObjectPath;
use crate::tree::{NodeId, Snapshot};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("invalid operation json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("operation carries no snapshot data")]
    MissingData,
}

/// Kind of an [`Operation`].
///
/// Type names that are not recognised still decode, as `Unknown`, so that
/// the engine rather than the codec reports them.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum OperationType {
    Insert,
    Delete,
    FullReplacement,
    ChildAppend,
    Init,
    Unknown(String),
}

impl OperationType {
    pub fn as_str(&self) -> &str {
        match self {
            OperationType::Insert => "INSERT",
            OperationType::Delete => "DELETE",
            OperationType::FullReplacement => "FULL_REPLACEMENT",
            OperationType::ChildAppend => "CHILD_APPEND",
            OperationType::Init => "INIT",
            OperationType::Unknown(name) => name,
        }
    }
}

impl From<&str> for OperationType {
    fn from(name: &str) -> Self {
        match name {
            "INSERT" => OperationType::Insert,
            "DELETE" => OperationType::Delete,
            "FULL_REPLACEMENT" => OperationType::FullReplacement,
            "CHILD_APPEND" => OperationType::ChildAppend,
            "INIT" => OperationType::Init,
            other => OperationType::Unknown(other.to_string()),
        }
    }
}

impl Serialize for OperationType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for OperationType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // A null type decodes as an unknown, empty type name.
        let name = Option::<String>::deserialize(deserializer)?;
        Ok(OperationType::from(name.as_deref().unwrap_or_default()))
    }
}

/// Character range of an INSERT. Only `start` is read; `end` is carried for
/// wire compatibility.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationRange {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<i64>,
}

impl OperationRange {
    pub fn starting_at(start: i64) -> Self {
        Self {
            start: Some(start),
            end: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Operation {
    pub object_path: ObjectPath,
    #[serde(rename = "type")]
    pub op_type: OperationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<OperationRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Identity of the node the sender meant to target.
    pub node_id: NodeId,
}

impl Operation {
    pub fn new(op_type: OperationType, object_path: ObjectPath, node_id: NodeId) -> Self {
        Self {
            object_path,
            op_type,
            range: None,
            data: None,
            node_id,
        }
    }

    pub fn with_range(mut self, range: OperationRange) -> Self {
        self.range = Some(range);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// An INIT carrying the whole tree in `snapshot`.
    pub fn init(snapshot: &Snapshot) -> Result<Self, CodecError> {
        Ok(Operation::new(OperationType::Init, ObjectPath::new(), snapshot.node_id)
            .with_data(serde_json::to_value(snapshot)?))
    }

    /// Decodes the snapshot an INIT carries.
    pub fn snapshot(&self) -> Result<Snapshot, CodecError> {
        let data = self.data.as_ref().ok_or(CodecError::MissingData)?;
        Ok(Snapshot::deserialize(data)?)
    }

    /// Insertion offset, defaulting to the start of the value.
    pub fn range_start(&self) -> i64 {
        self.range.and_then(|range| range.start).unwrap_or(0)
    }

    pub fn from_json(text: &str) -> Result<Self, CodecError> {
        Ok(serde_json::from_str(text)?)
    }

    pub fn to_json(&self) -> Result<String, CodecError> {
        Ok(serde_json::to_string(self)?)
    }
}
