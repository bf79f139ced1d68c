use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;

use crossbeam_channel::{Receiver, Sender};

use crate::{MoveDestination, Node, NodeId, NodeStore, StoreError, StoreEvent};

/// One entry in the store's mutation audit log: the exact arguments of a
/// `move_node` call, before any clamping the store performs internally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveRecord {
    pub id: NodeId,
    pub container: NodeId,
    pub index: Option<usize>,
}

#[derive(Debug)]
struct NodeRecord {
    parent: Option<NodeId>,
    title: String,
    is_container: bool,
}

#[derive(Debug)]
struct StoreInner {
    nodes: HashMap<NodeId, NodeRecord>,
    children: HashMap<NodeId, Vec<NodeId>>,
    next_id: u64,
}

/// Reference `NodeStore` backend held entirely in memory.
///
/// Implements the same remove-then-insert move semantics as real tree
/// backends: the node leaves its current slot before the destination index
/// is interpreted. Every `move_node` call is recorded in an audit log so
/// tests can assert the exact index a caller computed.
pub struct InMemoryStore {
    inner: Mutex<StoreInner>,
    event_sender: Sender<StoreEvent>,
    event_receiver: Receiver<StoreEvent>,
    move_log: Mutex<Vec<MoveRecord>>,
    offline: AtomicBool,
    fail_next: Mutex<Option<StoreError>>,
    rejected: Mutex<Vec<NodeId>>,
}

pub const ROOT_ID: &str = "0";

impl InMemoryStore {
    /// Creates a store containing only the root container, id `"0"`.
    pub fn new() -> Self {
        let root = NodeId::new(ROOT_ID);

        let mut nodes = HashMap::new();
        nodes.insert(
            root.clone(),
            NodeRecord {
                parent: None,
                title: String::new(),
                is_container: true,
            },
        );

        let mut children = HashMap::new();
        children.insert(root, Vec::new());

        let (event_sender, event_receiver) = crossbeam_channel::unbounded();

        Self {
            inner: Mutex::new(StoreInner {
                nodes,
                children,
                next_id: 1,
            }),
            event_sender,
            event_receiver,
            move_log: Mutex::new(Vec::new()),
            offline: AtomicBool::new(false),
            fail_next: Mutex::new(None),
            rejected: Mutex::new(Vec::new()),
        }
    }

    pub fn root_id(&self) -> NodeId {
        NodeId::new(ROOT_ID)
    }

    /// Creates a container node appended to the given parent's children.
    pub fn insert_container(&self, parent: &NodeId, title: &str) -> NodeId {
        self.insert(parent, title, true)
    }

    /// Creates a leaf node appended to the given parent's children.
    pub fn insert_leaf(&self, parent: &NodeId, title: &str) -> NodeId {
        self.insert(parent, title, false)
    }

    fn insert(&self, parent: &NodeId, title: &str, is_container: bool) -> NodeId {
        let mut inner = self.inner.lock().unwrap();
        assert!(
            inner.nodes.contains_key(parent),
            "parent {parent} does not exist"
        );

        let id = NodeId::new(inner.next_id.to_string());
        inner.next_id += 1;

        inner.nodes.insert(
            id.clone(),
            NodeRecord {
                parent: Some(parent.clone()),
                title: title.to_owned(),
                is_container,
            },
        );
        if is_container {
            inner.children.insert(id.clone(), Vec::new());
        }
        inner
            .children
            .get_mut(parent)
            .expect("containers always have a child list")
            .push(id.clone());

        id
    }

    /// Reorders a container's children out-of-band, as the platform's own
    /// UI or another session would, and raises `ChildrenReordered`.
    ///
    /// `new_order` must be a permutation of the container's current children.
    pub fn external_reorder(&self, container: &NodeId, new_order: Vec<NodeId>) {
        {
            let mut inner = self.inner.lock().unwrap();
            let current = inner
                .children
                .get_mut(container)
                .unwrap_or_else(|| panic!("container {container} does not exist"));
            assert_eq!(
                current.len(),
                new_order.len(),
                "new_order must be a permutation of the current children"
            );
            for id in &new_order {
                assert!(current.contains(id), "{id} is not a child of {container}");
            }
            *current = new_order;
        }

        let _ = self.event_sender.send(StoreEvent::ChildrenReordered {
            container: container.clone(),
        });
    }

    /// Makes every subsequent call fail with `StoreError::Unavailable` until
    /// switched back.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Makes the next `move_node` call fail with the given error. Reads are
    /// unaffected.
    pub fn fail_next_move(&self, error: StoreError) {
        *self.fail_next.lock().unwrap() = Some(error);
    }

    /// Marks a node as structurally immutable: the store will refuse to
    /// move it, as real backends do for their fixed top-level containers.
    pub fn mark_immovable(&self, id: &NodeId) {
        self.rejected.lock().unwrap().push(id.clone());
    }

    /// All `move_node` calls issued so far, in order.
    pub fn move_log(&self) -> Vec<MoveRecord> {
        self.move_log.lock().unwrap().clone()
    }

    pub fn move_call_count(&self) -> usize {
        self.move_log.lock().unwrap().len()
    }

    /// The titles of a container's children in current store order. Test
    /// convenience.
    pub fn titles_of(&self, container: &NodeId) -> Vec<String> {
        let inner = self.inner.lock().unwrap();
        inner
            .children
            .get(container)
            .map(|ids| {
                ids.iter()
                    .map(|id| inner.nodes[id].title.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    fn check_availability(&self) -> Result<(), StoreError> {
        if self.offline.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable)
        } else {
            Ok(())
        }
    }

    fn node_view(inner: &StoreInner, id: &NodeId) -> Option<Node> {
        let record = inner.nodes.get(id)?;
        let index = match &record.parent {
            Some(parent) => inner
                .children
                .get(parent)
                .and_then(|sibs| sibs.iter().position(|sib| sib == id))
                .unwrap_or(0),
            None => 0,
        };

        Some(Node {
            id: id.clone(),
            parent_id: record.parent.clone(),
            title: record.title.clone(),
            index,
            is_container: record.is_container,
        })
    }

    fn is_descendant(inner: &StoreInner, candidate: &NodeId, ancestor: &NodeId) -> bool {
        let mut cursor = candidate.clone();
        while let Some(record) = inner.nodes.get(&cursor) {
            match &record.parent {
                Some(parent) if parent == ancestor => return true,
                Some(parent) => cursor = parent.clone(),
                None => return false,
            }
        }
        false
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeStore for InMemoryStore {
    fn get_children(&self, container: &NodeId) -> Result<Vec<Node>, StoreError> {
        self.check_availability()?;

        let inner = self.inner.lock().unwrap();
        let child_ids = inner
            .children
            .get(container)
            .ok_or_else(|| StoreError::NotFound {
                id: container.clone(),
            })?;

        Ok(child_ids
            .iter()
            .map(|id| Self::node_view(&inner, id).expect("child lists only hold live nodes"))
            .collect())
    }

    fn get_tree(&self) -> Result<Vec<Node>, StoreError> {
        self.check_availability()?;

        let inner = self.inner.lock().unwrap();
        let root = NodeId::new(ROOT_ID);

        let mut flattened = Vec::with_capacity(inner.nodes.len());
        let mut queue = std::collections::VecDeque::new();
        queue.push_back(root);

        while let Some(id) = queue.pop_front() {
            flattened.push(Self::node_view(&inner, &id).expect("queued nodes are live"));
            if let Some(child_ids) = inner.children.get(&id) {
                queue.extend(child_ids.iter().cloned());
            }
        }

        Ok(flattened)
    }

    fn move_node(&self, id: &NodeId, dest: MoveDestination) -> Result<Node, StoreError> {
        self.check_availability()?;
        if let Some(error) = self.fail_next.lock().unwrap().take() {
            return Err(error);
        }

        let moved = {
            let mut inner = self.inner.lock().unwrap();

            let record = inner.nodes.get(id).ok_or_else(|| StoreError::NotFound {
                id: id.clone(),
            })?;
            let old_parent = record.parent.clone().ok_or_else(|| StoreError::Rejected {
                id: id.clone(),
                reason: "the root cannot be moved".to_owned(),
            })?;

            if self.rejected.lock().unwrap().contains(id) {
                return Err(StoreError::Rejected {
                    id: id.clone(),
                    reason: "node is immutable".to_owned(),
                });
            }

            let container = dest.container.clone().unwrap_or_else(|| old_parent.clone());
            match inner.nodes.get(&container) {
                Some(target) if target.is_container => {}
                Some(_) => {
                    return Err(StoreError::Rejected {
                        id: id.clone(),
                        reason: format!("{container} is not a container"),
                    })
                }
                None => {
                    return Err(StoreError::NotFound { id: container });
                }
            }
            if container == *id || Self::is_descendant(&inner, &container, id) {
                return Err(StoreError::Rejected {
                    id: id.clone(),
                    reason: "cannot move a container into itself".to_owned(),
                });
            }

            self.move_log.lock().unwrap().push(MoveRecord {
                id: id.clone(),
                container: container.clone(),
                index: dest.index,
            });

            // Remove first, then insert: the destination index is
            // interpreted against the child list *without* the node.
            let old_siblings = inner
                .children
                .get_mut(&old_parent)
                .expect("parents always have a child list");
            old_siblings.retain(|sib| sib != id);

            let siblings = inner
                .children
                .get_mut(&container)
                .expect("destination checked to be a container");
            let index = dest
                .index
                .map(|requested| requested.min(siblings.len()))
                .unwrap_or(siblings.len());
            siblings.insert(index, id.clone());

            inner.nodes.get_mut(id).expect("node checked above").parent =
                Some(container.clone());

            let moved = Self::node_view(&inner, id).expect("node checked above");
            log::debug!(
                "moved {} into {} at index {} (requested {:?})",
                id,
                container,
                index,
                dest.index
            );
            moved
        };

        let _ = self.event_sender.send(StoreEvent::NodeMoved {
            id: id.clone(),
            container: moved
                .parent_id
                .clone()
                .expect("moved nodes always have a parent"),
        });

        Ok(moved)
    }

    fn event_receiver(&self) -> Receiver<StoreEvent> {
        self.event_receiver.clone()
    }
}
