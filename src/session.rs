//! `ReorderSession`, the surface the rendering layer talks to.
//!
//! A session owns the coordinator thread, the cached engine state, and the
//! notification queue. Nothing here is specific to any particular rendering
//! layer; the session is roughly the right interface to expose over any
//! embedding (channels, FFI, an HTTP shim) a product needs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use crossbeam_channel::{Receiver, Sender};
use nodestore::{NodeId, NodeStore};
use serde::{Deserialize, Serialize};

use crate::{
    coordinator::{rebuild_state, EngineRequest, MoveCoordinator, MoveTicket},
    error::{MoveError, SessionError},
    identity::{IdentityMap, RenderedEntry, TreeSnapshot},
    message_queue::MessageQueue,
    protect::ProtectedSet,
    stats::{OperationRecord, OperationReport},
};

/// A requested reorder: where the node currently sits in the rendered list
/// and which visual slot it was dropped on.
///
/// `destination_container: None` means "within the source container".
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveRequest {
    pub source_container: NodeId,
    pub source_visual_index: usize,
    pub destination_visual_index: usize,
    pub destination_container: Option<NodeId>,
}

impl MoveRequest {
    /// Reorder within a single container.
    pub fn within(
        container: NodeId,
        source_visual_index: usize,
        destination_visual_index: usize,
    ) -> Self {
        Self {
            source_container: container,
            source_visual_index,
            destination_visual_index,
            destination_container: None,
        }
    }

    /// Move from one container into another.
    pub fn across(
        source_container: NodeId,
        source_visual_index: usize,
        destination_container: NodeId,
        destination_visual_index: usize,
    ) -> Self {
        Self {
            source_container,
            source_visual_index,
            destination_visual_index,
            destination_container: Some(destination_container),
        }
    }
}

/// Resolution of one `request_move` call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MoveOutcome {
    pub success: bool,

    /// Stable error kind string when `success` is false; sufficient for the
    /// rendering layer to pick a user-facing message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,

    /// The backend-confirmed final position of the node when `success` is
    /// true.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub final_visual_index: Option<usize>,
}

impl MoveOutcome {
    pub(crate) fn confirmed(final_visual_index: usize) -> Self {
        Self {
            success: true,
            error_kind: None,
            final_visual_index: Some(final_visual_index),
        }
    }

    pub(crate) fn failed(error: &MoveError) -> Self {
        Self {
            success: false,
            error_kind: Some(error.kind().to_owned()),
            final_visual_index: None,
        }
    }
}

/// One row of a resynced container view.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateEntry {
    pub position: usize,
    pub node_id: NodeId,
    pub title: String,
}

/// The fresh ordered view of one container after a resync.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerView {
    pub container_id: NodeId,
    pub entries: Vec<StateEntry>,
}

/// Notification emitted after every resync: ground truth for every
/// container, in backend discovery order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateReady {
    pub containers: Vec<ContainerView>,
}

/// The engine's cached view of the world. The coordinator thread is the
/// only writer; the session reads it for advisory queries.
#[derive(Default)]
pub(crate) struct EngineState {
    /// Ground truth as last fetched. `None` after invalidation, forcing the
    /// next operation to re-read before any index math.
    pub snapshot: Option<TreeSnapshot>,

    /// Visual-index-to-id mapping per container, rebuilt with the snapshot.
    pub identity: HashMap<NodeId, IdentityMap>,

    /// The rendering layer's most recently published displayed orders.
    /// Input for correlation, not a cache of backend state, so it survives
    /// invalidation.
    pub rendered: HashMap<NodeId, Vec<RenderedEntry>>,

    /// Sticky set of ids observed immutable this session.
    pub protected: ProtectedSet,
}

impl EngineState {
    /// Unconditional full drop of position data. Never a partial patch: the
    /// next read must re-fetch ground truth.
    pub fn invalidate(&mut self) {
        self.snapshot = None;
        self.identity.clear();
    }
}

/// Handle to a move intent accepted by the engine.
///
/// The intent may be withdrawn with [`cancel`](PendingMove::cancel) until
/// the backend mutation is issued; after that the engine waits for the
/// outcome and resyncs regardless.
pub struct PendingMove {
    outcome_receiver: Receiver<MoveOutcome>,
    cancelled: Arc<AtomicBool>,
}

impl PendingMove {
    /// Blocks until the engine resolves this move.
    pub fn wait(self) -> MoveOutcome {
        match self.outcome_receiver.recv() {
            Ok(outcome) => outcome,
            // The session shut down before the intent was processed.
            Err(_) => MoveOutcome::failed(&MoveError::Cancelled),
        }
    }

    /// Requests withdrawal. Effective only while the move has not yet
    /// reached the backend call; a confirmed or failed outcome is reported
    /// through [`wait`](PendingMove::wait) either way.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }
}

/// Contains all of the state for one reorder coordination session against
/// one backend store.
pub struct ReorderSession {
    /// The object responsible for serializing move intents, applying them
    /// against the store, and routing fresh views through the session's
    /// message queue.
    ///
    /// SHOULD BE DROPPED FIRST! ReorderSession and MoveCoordinator
    /// communicate via channels; the coordinator's Drop signals its thread
    /// to spin down before the channels are hung up.
    ///
    /// Allowed to be unused because it has side effects when dropped.
    #[allow(unused)]
    coordinator: MoveCoordinator,

    state: Arc<Mutex<EngineState>>,

    /// A queue of `StateReady` views pushed after every resync. The
    /// rendering layer subscribes to this queue and is only ever a reader.
    message_queue: Arc<MessageQueue<StateReady>>,

    stats: Arc<OperationRecord>,

    request_sender: Sender<EngineRequest>,
}

impl ReorderSession {
    /// Starts a session over the given store, fetching the initial snapshot
    /// synchronously. No `StateReady` is emitted for the initial fetch;
    /// subscribers attach afterwards and can force one with
    /// [`resync`](ReorderSession::resync).
    pub fn new<S: NodeStore + 'static>(store: S) -> Result<Self, SessionError> {
        let store: Arc<dyn NodeStore> = Arc::new(store);

        log::trace!("Starting new ReorderSession");
        let mut initial_state = EngineState::default();
        rebuild_state(store.as_ref(), &mut initial_state)?;

        let state = Arc::new(Mutex::new(initial_state));
        let message_queue = Arc::new(MessageQueue::new());
        let stats = Arc::new(OperationRecord::new());
        let (request_sender, request_receiver) = crossbeam_channel::unbounded();

        log::trace!("Starting MoveCoordinator");
        let coordinator = MoveCoordinator::start(
            Arc::clone(&store),
            Arc::clone(&state),
            Arc::clone(&message_queue),
            Arc::clone(&stats),
            request_receiver,
        );

        Ok(Self {
            coordinator,
            state,
            message_queue,
            stats,
            request_sender,
        })
    }

    /// Submits a move intent. Intents for the same session are processed
    /// strictly in submission order; each one's index math runs against the
    /// state produced by the previous one.
    pub fn request_move(&self, request: MoveRequest) -> PendingMove {
        let (outcome_sender, outcome_receiver) = crossbeam_channel::bounded(1);
        let cancelled = Arc::new(AtomicBool::new(false));

        let ticket = MoveTicket {
            request,
            cancelled: Arc::clone(&cancelled),
            outcome_sender,
        };

        if self.request_sender.send(EngineRequest::Move(ticket)).is_err() {
            // The coordinator is gone; wait() will report the withdrawal.
            log::error!("move intent submitted after coordinator shutdown");
        }

        PendingMove {
            outcome_receiver,
            cancelled,
        }
    }

    /// Publishes the rendering layer's currently displayed order for one
    /// container, used to correlate visual indices with node ids when the
    /// display diverges from backend order.
    pub fn publish_rendered_order(&self, container: NodeId, entries: Vec<RenderedEntry>) {
        let _ = self
            .request_sender
            .send(EngineRequest::PublishRendered { container, entries });
    }

    /// Subscribes to `StateReady` notifications, fired after every resync.
    pub fn subscribe(&self) -> Receiver<StateReady> {
        self.message_queue.subscribe()
    }

    /// Forces an invalidate-and-resync pass. Redundant passes are safe.
    pub fn resync(&self) {
        let _ = self.request_sender.send(EngineRequest::Resync);
    }

    /// Advisory protection query for suppressing drag affordances. The
    /// engine enforces protection independently of this answer.
    pub fn is_protected(&self, id: &NodeId) -> bool {
        self.state.lock().unwrap().protected.contains(id)
    }

    /// Counters of attempted/confirmed/failed operations. Diagnostic only.
    pub fn stats(&self) -> OperationReport {
        self.stats.report()
    }
}
