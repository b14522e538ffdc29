//! treesync: path-addressed operation sync for shared hierarchical documents.
//!
//! Participants keep a copy of the same tree and exchange small mutation
//! commands instead of full snapshots. This crate provides:
//!
//! - **Path addressing** - field/index paths resolved inside JSON payloads
//! - **Tree model** - identity-carrying nodes, snapshots and payload streams
//! - **Operations** - the INSERT / DELETE / FULL_REPLACEMENT / CHILD_APPEND /
//!   INIT wire contract
//! - **Engine** - applies operations with a staleness guard on node identity
//! - **Resource** - INIT handshake and ordered apply on top of a transport
//! - **Storage layer** - checksummed snapshot persistence (optional)
//!
//! # Quick Start
//!
//! ```rust
//! use serde_json::json;
//! use treesync::{Applied, SyncTree, transform};
//!
//! let mut tree = SyncTree::root(json!("Test"));
//! let child = tree.add_child(tree.root_id(), json!("first_child")).unwrap();
//!
//! let insertion = tree.create_insertion(child, 1, "X").unwrap();
//! assert_eq!(transform(&mut tree, &insertion).unwrap(), Applied::Applied);
//! assert_eq!(tree.payload(child).unwrap(), Some(&json!("fXirst_child")));
//! ```
//!
//! # Features
//!
//! - `storage` - Enables crash-safe snapshot persistence
//! - `cli` - Builds the `treesync` command-line tool (requires `storage`)

// Path addressing inside payloads
pub mod path;

// Tree model and change streams
pub mod tree;

// Wire contract
pub mod operation;

// Operation application
pub mod engine;

// Transport boundary
pub mod resource;

// Optional: Persistent storage layer
#[cfg(feature = "storage")]
pub mod storage;

pub use path::{ObjectPath, PathError, PathStep};

pub use tree::{
    CHILDREN_KEY, DATA_KEY, Node, NodeId, PayloadStream, Snapshot, SyncTree, TreeError,
};

pub use operation::{CodecError, Operation, OperationRange, OperationType};

pub use engine::{Applied, TransformConfig, TransformError, Transformer, transform};

pub use resource::{
    LocalRelay, PumpError, PumpReport, ResourceError, SyncHandler, SyncableResource,
};

// Re-export storage types (feature-gated)
#[cfg(feature = "storage")]
pub use storage::{SnapshotStore, StorageError};
