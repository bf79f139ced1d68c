use crossbeam_channel::Receiver;

use crate::{MoveDestination, Node, NodeId, NodeStore, StoreError, StoreEvent};

/// `NodeStore` that fails every call with `StoreError::Unavailable`.
///
/// Useful for exercising error-classification paths without standing up a
/// real backend.
pub struct NoopStore {
    // Kept alive so the receiver blocks forever instead of disconnecting.
    _event_sender: crossbeam_channel::Sender<StoreEvent>,
    event_receiver: Receiver<StoreEvent>,
}

impl NoopStore {
    pub fn new() -> Self {
        let (_event_sender, event_receiver) = crossbeam_channel::unbounded();
        Self {
            _event_sender,
            event_receiver,
        }
    }
}

impl Default for NoopStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeStore for NoopStore {
    fn get_children(&self, _container: &NodeId) -> Result<Vec<Node>, StoreError> {
        Err(StoreError::Unavailable)
    }

    fn get_tree(&self) -> Result<Vec<Node>, StoreError> {
        Err(StoreError::Unavailable)
    }

    fn move_node(&self, _id: &NodeId, _dest: MoveDestination) -> Result<Node, StoreError> {
        Err(StoreError::Unavailable)
    }

    fn event_receiver(&self) -> Receiver<StoreEvent> {
        self.event_receiver.clone()
    }
}
