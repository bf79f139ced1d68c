/*!
Abstraction over an externally-owned hierarchical node store with
configurable backends.

nodestore is currently an unstable minimum viable library. Its primary
consumer is reshelf, a reorder coordination engine for tree-shaped stores.

## Current Features
* `NodeStore` trait modeling the read/move surface of a backend tree
* Change notifications over a crossbeam channel
* Configurable backends
    * `InMemoryStore`, a reference backend with exact remove-then-insert
      move semantics, useful for testing and embedding
    * `NoopStore`, which always fails
*/

mod in_memory_store;
mod noop_store;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use in_memory_store::InMemoryStore;
pub use noop_store::NoopStore;

/// A stable, backend-issued, opaque node identifier.
///
/// Identifiers are never minted by consumers of this crate; they only ever
/// echo back values previously returned by a backend read.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(Arc<str>);

impl NodeId {
    #[inline]
    pub fn new(id: impl Into<String>) -> Self {
        Self(Arc::from(id.into()))
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl From<&str> for NodeId {
    fn from(value: &str) -> Self {
        NodeId::new(value)
    }
}

/// A backend-owned tree entry. Nodes are created and destroyed exclusively
/// by the backend; consumers of this crate only reposition them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Node {
    pub id: NodeId,

    /// `None` only for the root of the tree.
    pub parent_id: Option<NodeId>,

    /// Display title. Used by consumers for fuzzy correlation only, never
    /// as identity.
    pub title: String,

    /// Position among siblings as last reported by the backend.
    pub index: usize,

    /// Whether this node can hold children of its own.
    pub is_container: bool,
}

/// Destination of a `move_node` call.
///
/// `container: None` keeps the node in its current container. `index: None`
/// appends at the end of the destination's child list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MoveDestination {
    pub container: Option<NodeId>,
    pub index: Option<usize>,
}

impl MoveDestination {
    /// Reorder within the current container to the given index.
    pub fn at_index(index: usize) -> Self {
        Self {
            container: None,
            index: Some(index),
        }
    }

    /// Move into another container at the given index, or append when
    /// `index` is `None`.
    pub fn in_container(container: NodeId, index: Option<usize>) -> Self {
        Self {
            container: Some(container),
            index,
        }
    }
}

/// Represents a change the backend can report that consumers might need to
/// handle. Backends raise these for *all* mutations they observe, including
/// ones caused by other sessions or by the platform's own UI.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StoreEvent {
    /// A single node moved to a (possibly new) container.
    NodeMoved { id: NodeId, container: NodeId },

    /// A container's children were reordered in bulk by means outside the
    /// consumer's own calls.
    ChildrenReordered { container: NodeId },
}

/// Errors surfaced by `NodeStore` backends.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("node {id} does not exist")]
    NotFound { id: NodeId },

    #[error("backend refused to mutate node {id}: {reason}")]
    Rejected { id: NodeId, reason: String },

    #[error("backend is unavailable")]
    Unavailable,

    #[error("backend call timed out")]
    Timeout,
}

/// The read/move surface of a backend tree.
///
/// Unlike filesystem-style abstractions, this trait is intentionally left
/// open for downstream implementation: production consumers implement it
/// against whatever platform actually owns the tree, while tests use
/// [`InMemoryStore`].
pub trait NodeStore: Send + Sync {
    /// Returns the ordered children of a container.
    fn get_children(&self, container: &NodeId) -> Result<Vec<Node>, StoreError>;

    /// Returns the full hierarchy, flattened with parents before children
    /// and each child list in backend order.
    fn get_tree(&self) -> Result<Vec<Node>, StoreError>;

    /// Repositions a node. The backend removes the node from its current
    /// position *before* inserting it at `dest.index`, which shifts the
    /// indices of all later siblings down by one.
    ///
    /// Returns the node with its backend-confirmed final index.
    fn move_node(&self, id: &NodeId, dest: MoveDestination) -> Result<Node, StoreError>;

    /// Retrieve a handle to the change-notification receiver for this store.
    fn event_receiver(&self) -> crossbeam_channel::Receiver<StoreEvent>;
}

// Stores are commonly shared between an engine and its embedder.
impl<S: NodeStore + ?Sized> NodeStore for Arc<S> {
    fn get_children(&self, container: &NodeId) -> Result<Vec<Node>, StoreError> {
        (**self).get_children(container)
    }

    fn get_tree(&self) -> Result<Vec<Node>, StoreError> {
        (**self).get_tree()
    }

    fn move_node(&self, id: &NodeId, dest: MoveDestination) -> Result<Node, StoreError> {
        (**self).move_node(id, dest)
    }

    fn event_receiver(&self) -> crossbeam_channel::Receiver<StoreEvent> {
        (**self).event_receiver()
    }
}
