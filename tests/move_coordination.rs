//! End-to-end coverage of the move coordination path against the in-memory
//! store: index adjustment, protection gating, cancellation, and the
//! error/recovery policy.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use pretty_assertions::assert_eq;
use serde_json::json;

use nodestore::{InMemoryStore, Node, NodeId, NodeStore, StoreError, StoreEvent};
use reshelf::{MoveRequest, RenderedEntry, ReorderSession};

struct Fixture {
    session: ReorderSession,
    store: Arc<InMemoryStore>,
    /// "Bookmarks bar", reserved root container (id "1").
    bar: NodeId,
    /// "Other bookmarks", reserved root container (id "2").
    other: NodeId,
    /// A user folder inside the bar holding `leaves`.
    shelf: NodeId,
    /// Leaves titled "a".."e", in order.
    leaves: Vec<NodeId>,
}

fn fixture() -> Fixture {
    let store = Arc::new(InMemoryStore::new());
    let root = store.root_id();
    let bar = store.insert_container(&root, "Bookmarks bar");
    let other = store.insert_container(&root, "Other bookmarks");
    let shelf = store.insert_container(&bar, "Reading");
    let leaves = ["a", "b", "c", "d", "e"]
        .iter()
        .map(|title| store.insert_leaf(&shelf, title))
        .collect();

    let session = ReorderSession::new(Arc::clone(&store)).expect("initial fetch succeeds");

    Fixture {
        session,
        store,
        bar,
        other,
        shelf,
        leaves,
    }
}

#[test]
fn forward_move_adjusts_for_self_removal() {
    let f = fixture();

    // Moving "a" (index 0) to visual slot 3 must call the backend with
    // index 2, producing [b, c, a, d, e].
    let outcome = f
        .session
        .request_move(MoveRequest::within(f.shelf.clone(), 0, 3))
        .wait();

    assert!(outcome.success);
    assert_eq!(outcome.final_visual_index, Some(2));

    let log = f.store.move_log();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].index, Some(2));
    assert_eq!(f.store.titles_of(&f.shelf), ["b", "c", "a", "d", "e"]);
}

#[test]
fn backward_move_is_unadjusted() {
    let f = fixture();

    // Moving "d" (index 3) to visual slot 1 calls index 1 exactly,
    // producing [a, d, b, c, e].
    let outcome = f
        .session
        .request_move(MoveRequest::within(f.shelf.clone(), 3, 1))
        .wait();

    assert!(outcome.success);
    assert_eq!(outcome.final_visual_index, Some(1));
    assert_eq!(f.store.move_log()[0].index, Some(1));
    assert_eq!(f.store.titles_of(&f.shelf), ["a", "d", "b", "c", "e"]);
}

#[test]
fn drop_at_the_very_end_clamps() {
    let f = fixture();

    // Visual slot 5 is the gap after the last of 5 siblings; post-removal
    // the last valid insertion index is 4.
    let outcome = f
        .session
        .request_move(MoveRequest::within(f.shelf.clone(), 1, 5))
        .wait();

    assert!(outcome.success);
    assert_eq!(f.store.move_log()[0].index, Some(4));
    assert_eq!(f.store.titles_of(&f.shelf), ["a", "c", "d", "e", "b"]);
}

#[test]
fn dropping_on_the_origin_slot_is_a_no_op() {
    let f = fixture();
    let notifications = f.session.subscribe();

    let outcome = f
        .session
        .request_move(MoveRequest::within(f.shelf.clone(), 2, 2))
        .wait();

    assert!(outcome.success);
    assert_eq!(outcome.final_visual_index, Some(2));
    assert_eq!(f.store.move_call_count(), 0, "no backend call for a no-op");
    assert_eq!(f.store.titles_of(&f.shelf), ["a", "b", "c", "d", "e"]);

    // Nothing changed, so nothing is invalidated and no fresh view fires.
    assert!(notifications
        .recv_timeout(Duration::from_millis(300))
        .is_err());
}

#[test]
fn moves_serialize_in_submission_order() {
    let f = fixture();

    // Submit both before waiting: the second move's index math must run
    // against the state the first one produced.
    let first = f
        .session
        .request_move(MoveRequest::within(f.shelf.clone(), 0, 3));
    let second = f
        .session
        .request_move(MoveRequest::within(f.shelf.clone(), 0, 3));

    assert!(first.wait().success);
    assert!(second.wait().success);

    // [a,b,c,d,e] -> [b,c,a,d,e] -> [c,a,b,d,e]
    assert_eq!(f.store.titles_of(&f.shelf), ["c", "a", "b", "d", "e"]);
    let log = f.store.move_log();
    assert_eq!(log[0].index, Some(2));
    assert_eq!(log[1].index, Some(2));
}

#[test]
fn cross_container_move_uses_raw_index() {
    let f = fixture();

    let outcome = f
        .session
        .request_move(MoveRequest::across(
            f.shelf.clone(),
            0,
            f.other.clone(),
            0,
        ))
        .wait();

    assert!(outcome.success);
    assert_eq!(outcome.final_visual_index, Some(0));

    let log = f.store.move_log();
    assert_eq!(log[0].container, f.other);
    assert_eq!(log[0].index, Some(0));
    assert_eq!(f.store.titles_of(&f.shelf), ["b", "c", "d", "e"]);
    assert_eq!(f.store.titles_of(&f.other), ["a"]);
}

#[test]
fn cross_container_drop_past_the_end_appends() {
    let f = fixture();
    f.store.insert_leaf(&f.other, "existing");
    // The insert above is invisible to the engine until a resync; queue one
    // ahead of the move so the index math sees it.
    f.session.resync();

    let outcome = f
        .session
        .request_move(MoveRequest::across(
            f.shelf.clone(),
            4,
            f.other.clone(),
            99,
        ))
        .wait();

    assert!(outcome.success);
    assert_eq!(outcome.final_visual_index, Some(1));
    assert_eq!(f.store.move_log()[0].index, None, "past-the-end is an append");
    assert_eq!(f.store.titles_of(&f.other), ["existing", "e"]);
}

#[test]
fn cross_container_drop_at_the_end_gap_uses_explicit_index() {
    let f = fixture();
    f.store.insert_leaf(&f.other, "existing");
    f.session.resync();

    // Slot 1 is the gap after the single existing child: at the end, not
    // past it, so it is issued as a real index rather than an append.
    let outcome = f
        .session
        .request_move(MoveRequest::across(
            f.shelf.clone(),
            4,
            f.other.clone(),
            1,
        ))
        .wait();

    assert!(outcome.success);
    assert_eq!(outcome.final_visual_index, Some(1));
    assert_eq!(f.store.move_log()[0].index, Some(1));
    assert_eq!(f.store.titles_of(&f.other), ["existing", "e"]);
}

#[test]
fn moves_dropped_onto_placeholder_slots_fail() {
    let f = fixture();

    // Slot 1 renders a row the backend doesn't have.
    f.session.publish_rendered_order(
        f.shelf.clone(),
        vec![
            RenderedEntry::label_only("a"),
            RenderedEntry::label_only("ghost"),
            RenderedEntry::label_only("b"),
            RenderedEntry::label_only("c"),
            RenderedEntry::label_only("d"),
            RenderedEntry::label_only("e"),
        ],
    );

    // The source resolves fine; the destination must not.
    let outcome = f
        .session
        .request_move(MoveRequest::within(f.shelf.clone(), 0, 1))
        .wait();

    assert_eq!(outcome.error_kind.as_deref(), Some("UnresolvedNodeError"));
    assert_eq!(f.store.move_call_count(), 0);
    assert_eq!(f.store.titles_of(&f.shelf), ["a", "b", "c", "d", "e"]);
}

#[test]
fn cross_container_request_resolving_to_source_container_readjusts() {
    let f = fixture();

    // The "different" destination turns out to be the source container;
    // the defensive re-check applies the same-container rule.
    let outcome = f
        .session
        .request_move(MoveRequest::across(
            f.shelf.clone(),
            0,
            f.shelf.clone(),
            3,
        ))
        .wait();

    assert!(outcome.success);
    assert_eq!(f.store.move_log()[0].index, Some(2));
    assert_eq!(f.store.titles_of(&f.shelf), ["b", "c", "a", "d", "e"]);
}

#[test]
fn reserved_root_containers_cannot_be_moved() {
    let f = fixture();

    // Reorder "Bookmarks bar" among the root's children.
    let outcome = f
        .session
        .request_move(MoveRequest::within(f.store.root_id(), 0, 2))
        .wait();

    assert!(!outcome.success);
    assert_eq!(outcome.error_kind.as_deref(), Some("ProtectedNodeError"));
    assert_eq!(outcome.final_visual_index, None);
    assert_eq!(f.store.move_call_count(), 0, "protected moves never reach the backend");
}

#[test]
fn reserved_titles_protect_later_root_containers() {
    let store = Arc::new(InMemoryStore::new());
    let root = store.root_id();
    store.insert_container(&root, "Bookmarks bar");
    store.insert_container(&root, "Other bookmarks");
    let mobile = store.insert_container(&root, "Mobile bookmarks");

    let session = ReorderSession::new(Arc::clone(&store)).unwrap();

    assert!(session.is_protected(&mobile));

    let outcome = session
        .request_move(MoveRequest::within(root, 2, 0))
        .wait();

    assert_eq!(outcome.error_kind.as_deref(), Some("ProtectedNodeError"));
    assert_eq!(store.move_call_count(), 0);
}

#[test]
fn is_protected_is_advisory_and_read_only() {
    let f = fixture();

    assert!(f.session.is_protected(&f.bar));
    assert!(f.session.is_protected(&f.other));
    assert!(!f.session.is_protected(&f.shelf));
    assert!(!f.session.is_protected(&f.leaves[0]));
}

#[test]
fn unresolved_slots_fail_instead_of_guessing() {
    let f = fixture();

    // The renderer claims a row the backend doesn't have.
    f.session.publish_rendered_order(
        f.shelf.clone(),
        vec![
            RenderedEntry::label_only("a"),
            RenderedEntry::label_only("ghost"),
            RenderedEntry::label_only("b"),
        ],
    );

    let outcome = f
        .session
        .request_move(MoveRequest::within(f.shelf.clone(), 1, 0))
        .wait();

    assert_eq!(outcome.error_kind.as_deref(), Some("UnresolvedNodeError"));
    assert_eq!(f.store.move_call_count(), 0);

    // Positions that did resolve keep working once the renderer republishes
    // an order that correlates.
    f.session.publish_rendered_order(
        f.shelf.clone(),
        vec![
            RenderedEntry::label_only("a"),
            RenderedEntry::label_only("b"),
            RenderedEntry::label_only("c"),
            RenderedEntry::label_only("d"),
            RenderedEntry::label_only("e"),
        ],
    );
    let outcome = f
        .session
        .request_move(MoveRequest::within(f.shelf.clone(), 0, 3))
        .wait();
    assert!(outcome.success);
    assert_eq!(f.store.titles_of(&f.shelf), ["b", "c", "a", "d", "e"]);
}

#[test]
fn backend_rejection_is_authoritative_and_sticky() {
    let f = fixture();
    f.store.mark_immovable(&f.leaves[0]);

    let outcome = f
        .session
        .request_move(MoveRequest::within(f.shelf.clone(), 0, 3))
        .wait();

    assert_eq!(outcome.error_kind.as_deref(), Some("BackendRejectedError"));
    assert!(
        f.session.is_protected(&f.leaves[0]),
        "a rejected node is retroactively protected"
    );

    // The second attempt short-circuits locally.
    let outcome = f
        .session
        .request_move(MoveRequest::within(f.shelf.clone(), 0, 3))
        .wait();
    assert_eq!(outcome.error_kind.as_deref(), Some("ProtectedNodeError"));
    assert_eq!(
        f.store.move_call_count(),
        0,
        "rejection happened before the store applied anything, and the \
         retry never reached it"
    );
}

#[test]
fn inconclusive_failures_resync_and_recover() {
    let f = fixture();

    f.store.fail_next_move(StoreError::Timeout);
    let outcome = f
        .session
        .request_move(MoveRequest::within(f.shelf.clone(), 0, 3))
        .wait();
    assert_eq!(outcome.error_kind.as_deref(), Some("TimeoutError"));

    // A caller-initiated retry runs the full path against fresh state and
    // lands exactly where it should.
    let outcome = f
        .session
        .request_move(MoveRequest::within(f.shelf.clone(), 0, 3))
        .wait();
    assert!(outcome.success);
    assert_eq!(f.store.titles_of(&f.shelf), ["b", "c", "a", "d", "e"]);
}

#[test]
fn offline_backend_fails_moves_until_it_returns() {
    let f = fixture();

    f.store.set_offline(true);
    let outcome = f
        .session
        .request_move(MoveRequest::within(f.shelf.clone(), 0, 3))
        .wait();
    assert_eq!(
        outcome.error_kind.as_deref(),
        Some("BackendUnavailableError")
    );
    assert_eq!(f.store.titles_of(&f.shelf), ["a", "b", "c", "d", "e"]);

    f.store.set_offline(false);
    let outcome = f
        .session
        .request_move(MoveRequest::within(f.shelf.clone(), 0, 3))
        .wait();
    assert!(outcome.success);
    assert_eq!(f.store.titles_of(&f.shelf), ["b", "c", "a", "d", "e"]);
}

#[test]
fn outcome_wire_shape_is_camel_case() {
    let f = fixture();

    let failed = f
        .session
        .request_move(MoveRequest::within(f.store.root_id(), 0, 2))
        .wait();
    assert_eq!(
        serde_json::to_value(&failed).unwrap(),
        json!({ "success": false, "errorKind": "ProtectedNodeError" })
    );

    let confirmed = f
        .session
        .request_move(MoveRequest::within(f.shelf.clone(), 0, 3))
        .wait();
    assert_eq!(
        serde_json::to_value(&confirmed).unwrap(),
        json!({ "success": true, "finalVisualIndex": 2 })
    );
}

#[test]
fn construction_fails_when_the_backend_is_unreachable() {
    // The initial snapshot is fetched synchronously; a dead backend fails
    // the session up front instead of at the first move.
    let result = ReorderSession::new(nodestore::NoopStore::new());
    assert!(result.is_err());
}

#[test]
fn operation_record_tracks_outcomes() {
    let f = fixture();

    f.session
        .request_move(MoveRequest::within(f.shelf.clone(), 0, 3))
        .wait();
    f.session
        .request_move(MoveRequest::within(f.store.root_id(), 0, 2))
        .wait();

    let report = f.session.stats();
    assert_eq!(report.attempted, 2);
    assert_eq!(report.confirmed, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(report.failures_by_kind["ProtectedNodeError"], 1);
}

/// Wraps an `InMemoryStore` and parks `get_tree` on a one-shot gate, so
/// tests can hold the coordinator thread mid-resync at a deterministic
/// point.
struct GatedStore {
    inner: Arc<InMemoryStore>,
    gate: Arc<Mutex<Option<crossbeam_channel::Receiver<()>>>>,
}

impl NodeStore for GatedStore {
    fn get_children(&self, container: &NodeId) -> Result<Vec<Node>, StoreError> {
        self.inner.get_children(container)
    }

    fn get_tree(&self) -> Result<Vec<Node>, StoreError> {
        let gate = self.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            let _ = gate.recv();
        }
        self.inner.get_tree()
    }

    fn move_node(
        &self,
        id: &NodeId,
        dest: nodestore::MoveDestination,
    ) -> Result<Node, StoreError> {
        self.inner.move_node(id, dest)
    }

    fn event_receiver(&self) -> crossbeam_channel::Receiver<StoreEvent> {
        self.inner.event_receiver()
    }
}

#[test]
fn intents_can_be_withdrawn_before_the_backend_call() {
    let store = Arc::new(InMemoryStore::new());
    let root = store.root_id();
    let bar = store.insert_container(&root, "Bookmarks bar");
    store.insert_container(&root, "Other bookmarks");
    let shelf = store.insert_container(&bar, "Reading");
    for title in ["a", "b", "c"] {
        store.insert_leaf(&shelf, title);
    }

    let gate = Arc::new(Mutex::new(None));
    let gated = GatedStore {
        inner: Arc::clone(&store),
        gate: Arc::clone(&gate),
    };
    // The gate is still empty here, so the initial fetch goes straight
    // through.
    let session = ReorderSession::new(gated).unwrap();

    // Park the coordinator inside a forced resync, queue a move behind it,
    // and withdraw the move before releasing the gate. Requests are
    // processed strictly in order, so the flag is always observed first.
    let (release, parked) = crossbeam_channel::unbounded::<()>();
    *gate.lock().unwrap() = Some(parked);
    session.resync();

    let pending = session.request_move(MoveRequest::within(shelf.clone(), 0, 2));
    pending.cancel();
    release.send(()).unwrap();

    let outcome = pending.wait();
    assert!(!outcome.success);
    assert_eq!(outcome.error_kind.as_deref(), Some("Cancelled"));
    assert_eq!(store.move_call_count(), 0);
    assert_eq!(store.titles_of(&shelf), ["a", "b", "c"]);
}
