//! The boundary between a transport and the engine.
//!
//! A [`SyncHandler`] delivers one ordered stream of inbound operations and
//! accepts outbound ones. [`SyncableResource`] owns the synchronized tree,
//! performs the INIT handshake and feeds everything else through the engine.

use crate::engine::{Applied, TransformConfig, TransformError, Transformer};
use crate::operation::{CodecError, Operation, OperationType};
use crate::tree::{NodeId, SyncTree, TreeError};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::mpsc::Receiver;
use tracing::{debug, warn};

pub trait SyncHandler {
    /// Sends a local operation towards the other participants.
    fn queue_operation(&mut self, operation: Operation);

    /// Next inbound operation in reception order, if one is waiting.
    fn next_operation(&mut self) -> Option<Operation>;
}

/// Loopback handler for the ordering authority: queued operations come
/// straight back, in order.
#[derive(Debug, Default)]
pub struct LocalRelay {
    queue: VecDeque<Operation>,
}

impl LocalRelay {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }
}

impl SyncHandler for LocalRelay {
    fn queue_operation(&mut self, operation: Operation) {
        self.queue.push_back(operation);
    }

    fn next_operation(&mut self) -> Option<Operation> {
        self.queue.pop_front()
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResourceError {
    #[error(transparent)]
    Transform(#[from] TransformError),
    #[error(transparent)]
    Tree(#[from] TreeError),
    #[error(transparent)]
    Codec(#[from] CodecError),
    #[error("no tree yet, waiting for INIT")]
    NotSynced,
}

/// Counters for one [`SyncableResource::pump`] call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PumpReport {
    pub applied: usize,
    pub stale: usize,
    pub inits: usize,
    /// Operations dropped because they arrived before the first INIT.
    pub dropped: usize,
}

/// A [`SyncableResource::pump`] call that stopped on an error, with the
/// counters for the operations it handled before that.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct PumpError {
    pub report: PumpReport,
    #[source]
    pub error: ResourceError,
}

#[derive(Debug)]
pub struct SyncableResource<H> {
    handler: H,
    transformer: Transformer,
    tree: Option<SyncTree>,
}

impl<H: SyncHandler> SyncableResource<H> {
    /// Starts from a fresh root holding `payload`.
    pub fn seeded(handler: H, payload: impl Into<Option<Value>>) -> Self {
        Self {
            handler,
            transformer: Transformer::default(),
            tree: Some(SyncTree::root(payload)),
        }
    }

    /// Starts without a tree; the first INIT received provides it.
    pub fn awaiting_init(handler: H) -> Self {
        Self {
            handler,
            transformer: Transformer::default(),
            tree: None,
        }
    }

    pub fn with_config(mut self, config: TransformConfig) -> Self {
        self.transformer = Transformer::new(config);
        self
    }

    pub fn is_synced(&self) -> bool {
        self.tree.is_some()
    }

    pub fn tree(&self) -> Option<&SyncTree> {
        self.tree.as_ref()
    }

    pub fn tree_mut(&mut self) -> Option<&mut SyncTree> {
        self.tree.as_mut()
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn queue_operation(&mut self, operation: Operation) {
        self.handler.queue_operation(operation);
    }

    /// Subscribes to the payload of `id`. An INIT arriving later replaces the
    /// tree and disconnects the receiver.
    pub fn subscribe(&mut self, id: NodeId) -> Result<Receiver<Option<Value>>, ResourceError> {
        let tree = self.tree.as_mut().ok_or(ResourceError::NotSynced)?;
        Ok(tree.subscribe(id)?)
    }

    /// Builds an INIT carrying the current tree, for a joining participant.
    pub fn init_operation(&self) -> Result<Operation, ResourceError> {
        let tree = self.tree.as_ref().ok_or(ResourceError::NotSynced)?;
        Ok(Operation::init(&tree.to_snapshot()?)?)
    }

    /// Applies every operation the handler has waiting, in order.
    ///
    /// Stops at the first failing operation; that operation is consumed, the
    /// ones behind it stay queued. The error carries the counts gathered so
    /// far.
    pub fn pump(&mut self) -> Result<PumpReport, PumpError> {
        let mut report = PumpReport::default();
        while let Some(operation) = self.handler.next_operation() {
            if let Err(error) = self.handle(&operation, &mut report) {
                return Err(PumpError { report, error });
            }
        }
        Ok(report)
    }

    fn handle(
        &mut self,
        operation: &Operation,
        report: &mut PumpReport,
    ) -> Result<(), ResourceError> {
        if operation.op_type == OperationType::Init {
            self.apply_init(operation)?;
            report.inits += 1;
            return Ok(());
        }
        let Some(tree) = self.tree.as_mut() else {
            debug!(op = operation.op_type.as_str(), "dropping operation received before INIT");
            report.dropped += 1;
            return Ok(());
        };
        match self.transformer.transform(tree, operation)? {
            Applied::Applied => report.applied += 1,
            Applied::Stale => report.stale += 1,
        }
        Ok(())
    }

    fn apply_init(&mut self, operation: &Operation) -> Result<(), ResourceError> {
        let tree = SyncTree::from_snapshot(&operation.snapshot()?)?;
        if self.tree.replace(tree).is_some() {
            warn!("INIT received mid-stream, local tree discarded");
        }
        Ok(())
    }
}
