//! Correlates the rendering layer's displayed order with the backend's
//! ground truth, producing the visual-index-to-node-id mapping every move
//! is resolved through.
//!
//! The mapping is a snapshot: it is valid only until the next mutation or
//! backend push notification, and it is always rebuilt from a fresh backend
//! read, never patched in place.

use std::collections::HashMap;

use nodestore::{Node, NodeId};
use serde::{Deserialize, Serialize};

use crate::error::MoveError;

/// Cached view of the backend tree: ordered children per container, exactly
/// as last fetched. Invalidation drops the whole snapshot.
#[derive(Debug, Clone, Default)]
pub struct TreeSnapshot {
    children: HashMap<NodeId, Vec<Node>>,

    /// Containers in backend discovery order, so notifications list them
    /// deterministically.
    container_order: Vec<NodeId>,

    root: Option<NodeId>,
}

impl TreeSnapshot {
    /// Builds a snapshot from a flattened hierarchy (parents before
    /// children, each child list in backend order), the shape returned by
    /// `NodeStore::get_tree`.
    pub fn from_flattened(nodes: Vec<Node>) -> Self {
        let mut snapshot = TreeSnapshot::default();

        for node in nodes {
            if node.parent_id.is_none() {
                snapshot.root = Some(node.id.clone());
            }
            if node.is_container {
                snapshot.container_order.push(node.id.clone());
                snapshot.children.entry(node.id.clone()).or_default();
            }
            if let Some(parent) = &node.parent_id {
                snapshot
                    .children
                    .entry(parent.clone())
                    .or_default()
                    .push(node);
            }
        }

        snapshot
    }

    pub fn root(&self) -> Option<&NodeId> {
        self.root.as_ref()
    }

    pub fn children_of(&self, container: &NodeId) -> Option<&[Node]> {
        self.children.get(container).map(Vec::as_slice)
    }

    pub fn containers(&self) -> impl Iterator<Item = &NodeId> {
        self.container_order.iter()
    }

    /// All nodes whose parent is the tree root.
    pub fn root_level_nodes(&self) -> &[Node] {
        self.root
            .as_ref()
            .and_then(|root| self.children_of(root))
            .unwrap_or(&[])
    }

    /// Position of a node among its container's children, as last fetched.
    pub fn index_of(&self, container: &NodeId, id: &NodeId) -> Option<usize> {
        self.children_of(container)?
            .iter()
            .position(|node| &node.id == id)
    }

    pub fn title_of(&self, id: &NodeId) -> Option<&str> {
        self.children
            .values()
            .flatten()
            .find(|node| &node.id == id)
            .map(|node| node.title.as_str())
    }
}

/// One entry of the rendering layer's currently displayed order. The id is
/// present when the renderer kept it from a previous `StateReady`; freshly
/// rendered rows may only carry a label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderedEntry {
    pub node_id: Option<NodeId>,
    pub label: String,
}

impl RenderedEntry {
    pub fn with_id(node_id: NodeId, label: impl Into<String>) -> Self {
        Self {
            node_id: Some(node_id),
            label: label.into(),
        }
    }

    pub fn label_only(label: impl Into<String>) -> Self {
        Self {
            node_id: None,
            label: label.into(),
        }
    }
}

/// Outcome of correlating one rendered position against the snapshot.
///
/// `Unresolved` is a hard error at use time: a move involving an unresolved
/// slot fails instead of defaulting to an arbitrary id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Resolution {
    Resolved(NodeId),
    Unresolved,
}

/// Ordered mapping from visual index to node id for one rendered container.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct IdentityMap {
    slots: Vec<Resolution>,
}

impl IdentityMap {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn get(&self, visual_index: usize) -> Option<&Resolution> {
        self.slots.get(visual_index)
    }

    /// Resolves a visual index to a real node id, or fails with
    /// `UnresolvedNode`.
    pub fn resolve(&self, visual_index: usize) -> Result<&NodeId, MoveError> {
        match self.slots.get(visual_index) {
            Some(Resolution::Resolved(id)) => Ok(id),
            Some(Resolution::Unresolved) | None => {
                Err(MoveError::UnresolvedNode { visual_index })
            }
        }
    }
}

/// Builds the identity map for one container.
///
/// When the rendering layer has not published an order, the backend's own
/// child order is the visual order and every slot resolves trivially.
/// Otherwise each rendered entry is correlated primarily by stable id, and
/// by a uniqueness-assuming exact label match when no id is available.
/// Ambiguity on either side (duplicate label among the children, or the
/// same label rendered twice) yields `Unresolved` rather than a guess.
pub fn build_identity_map(
    children: &[Node],
    rendered: Option<&[RenderedEntry]>,
) -> IdentityMap {
    let rendered = match rendered {
        Some(rendered) => rendered,
        None => {
            return IdentityMap {
                slots: children
                    .iter()
                    .map(|node| Resolution::Resolved(node.id.clone()))
                    .collect(),
            };
        }
    };

    let mut title_counts: HashMap<&str, usize> = HashMap::new();
    for node in children {
        *title_counts.entry(node.title.as_str()).or_default() += 1;
    }
    let mut label_counts: HashMap<&str, usize> = HashMap::new();
    for entry in rendered {
        *label_counts.entry(entry.label.as_str()).or_default() += 1;
    }

    let slots = rendered
        .iter()
        .map(|entry| {
            if let Some(id) = &entry.node_id {
                if children.iter().any(|node| &node.id == id) {
                    return Resolution::Resolved(id.clone());
                }
                // The renderer's remembered id is no longer a child here;
                // fall through to the label in case the row is stale.
            }

            let label_unique = label_counts.get(entry.label.as_str()) == Some(&1);
            let title_unique = title_counts.get(entry.label.as_str()) == Some(&1);
            if label_unique && title_unique {
                let matched = children
                    .iter()
                    .find(|node| node.title == entry.label)
                    .expect("title_counts said the label is present exactly once");
                Resolution::Resolved(matched.id.clone())
            } else {
                Resolution::Unresolved
            }
        })
        .collect();

    IdentityMap { slots }
}
