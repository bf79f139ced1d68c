//! Detection of backend-reserved nodes that must never be moved or used as
//! a mutation target.
//!
//! Protection is inferred from identifier and title evidence that may not
//! be re-observable on every pass, so it is sticky: once an id has been
//! flagged it stays flagged for the rest of the session, even if its title
//! superficially changes.

use std::collections::HashMap;

use nodestore::NodeId;

use crate::identity::TreeSnapshot;

/// Root identifiers the backend reserves for the tree root and its fixed
/// top-level shelves. Exact match, as issued by the backend.
pub const RESERVED_ROOT_IDS: &[&str] = &["0", "1", "2"];

/// Container titles the backend reserves for its fixed root-level shelves.
/// Exact, case-sensitive match against the backend's own naming.
pub const RESERVED_TITLES: &[&str] = &["Bookmarks bar", "Other bookmarks", "Mobile bookmarks"];

/// The set of node ids known to be immutable.
///
/// Rebuilt alongside the identity maps on every resync; rebuilds only ever
/// add entries. The stored title is whatever was observed when the id was
/// flagged, kept for error reporting.
#[derive(Debug, Clone, Default)]
pub struct ProtectedSet {
    flagged: HashMap<NodeId, String>,
}

impl ProtectedSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.flagged.contains_key(id)
    }

    pub fn title_of(&self, id: &NodeId) -> Option<&str> {
        self.flagged.get(id).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.flagged.len()
    }

    pub fn is_empty(&self) -> bool {
        self.flagged.is_empty()
    }

    /// Flags an id as protected. Used both by snapshot scans and
    /// retroactively when the backend authoritatively rejects a mutation.
    pub fn flag(&mut self, id: NodeId, title: impl Into<String>) {
        if self.flagged.contains_key(&id) {
            // Already flagged; keep the originally observed title.
            return;
        }
        let title = title.into();
        log::debug!("flagged {id} (\"{title}\") as protected");
        self.flagged.insert(id, title);
    }

    /// Scans a fresh snapshot for reserved nodes. The root itself, any node
    /// with a reserved id, and any root-level container carrying a reserved
    /// title are flagged. Existing flags are never cleared.
    pub fn observe_snapshot(&mut self, snapshot: &TreeSnapshot) {
        if let Some(root) = snapshot.root() {
            self.flag(root.clone(), snapshot.title_of(root).unwrap_or("").to_owned());
        }

        for node in snapshot.root_level_nodes() {
            let reserved_id = RESERVED_ROOT_IDS.contains(&node.id.as_str());
            let reserved_title =
                node.is_container && RESERVED_TITLES.contains(&node.title.as_str());

            if reserved_id || reserved_title {
                self.flag(node.id.clone(), node.title.clone());
            }
        }
    }
}
