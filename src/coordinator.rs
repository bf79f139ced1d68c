//! The coordinator job thread: translates move intents into correct backend
//! mutations, serializes them, and converges cached state back to ground
//! truth after every mutation or backend push notification.
//!
//! There is exactly one code path for "the world changed": confirmed moves,
//! inconclusive failures, and backend-originated change notifications all
//! funnel into the same invalidate-then-resync transition.

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, MutexGuard};

use crossbeam_channel::{select, Receiver, RecvError, Sender};
use jod_thread::JoinHandle;
use nodestore::{MoveDestination, NodeId, NodeStore, StoreError, StoreEvent};

use crate::{
    error::MoveError,
    identity::{build_identity_map, Resolution, TreeSnapshot},
    message_queue::MessageQueue,
    session::{ContainerView, EngineState, MoveOutcome, MoveRequest, StateEntry, StateReady},
    stats::OperationRecord,
};

/// A move intent in flight between the session and the coordinator thread.
pub(crate) struct MoveTicket {
    pub request: MoveRequest,
    pub cancelled: Arc<std::sync::atomic::AtomicBool>,
    pub outcome_sender: Sender<MoveOutcome>,
}

/// Work accepted by the coordinator thread, processed strictly in order.
pub(crate) enum EngineRequest {
    Move(MoveTicket),

    /// Force an invalidate-and-resync pass.
    Resync,

    /// The rendering layer's currently displayed order for one container.
    /// Routed through the coordinator so it stays the only writer of the
    /// identity maps.
    PublishRendered {
        container: NodeId,
        entries: Vec<crate::identity::RenderedEntry>,
    },
}

/// Successful resolution of one move intent.
enum Applied {
    /// The backend confirmed a mutation; carries the final index.
    Mutated(usize),

    /// The request expressed no change and nothing was issued.
    NoOp(usize),
}

/// Processes move intents and backend change notifications, updates the
/// shared engine state, and pushes `StateReady` notifications through the
/// session's message queue.
///
/// MoveCoordinator expects to be the only writer to the `EngineState`
/// passed to it. Consumers, like ReorderSession, communicate with it via
/// channels.
pub(crate) struct MoveCoordinator {
    /// Signaled before dropping MoveCoordinator or we'll hang forever
    /// waiting for the processing loop to terminate.
    shutdown_sender: Sender<()>,

    /// A handle to the processing thread. When dropped, we'll block until
    /// it's done.
    ///
    /// Allowed to be unused because dropping this value has side effects.
    #[allow(unused)]
    job_thread: JoinHandle<Result<(), RecvError>>,
}

impl MoveCoordinator {
    pub fn start(
        store: Arc<dyn NodeStore>,
        state: Arc<Mutex<EngineState>>,
        message_queue: Arc<MessageQueue<StateReady>>,
        stats: Arc<OperationRecord>,
        request_receiver: Receiver<EngineRequest>,
    ) -> Self {
        let (shutdown_sender, shutdown_receiver) = crossbeam_channel::bounded(1);
        let store_events = store.event_receiver();
        let task = JobThreadContext {
            store,
            state,
            message_queue,
            stats,
        };

        let job_thread = jod_thread::Builder::new()
            .name("MoveCoordinator thread".to_owned())
            .spawn(move || {
                log::trace!("MoveCoordinator thread started");

                loop {
                    select! {
                        recv(request_receiver) -> request => {
                            task.handle_request(request?);
                        },
                        recv(store_events) -> event => {
                            task.handle_store_event(event?);
                        },
                        recv(shutdown_receiver) -> _ => {
                            log::trace!("MoveCoordinator shutdown signal received...");
                            return Ok(());
                        },
                    }
                }
            })
            .expect("Could not start MoveCoordinator thread");

        Self {
            shutdown_sender,
            job_thread,
        }
    }
}

impl Drop for MoveCoordinator {
    fn drop(&mut self) {
        // Signal the job thread to start spinning down. Without this we'll
        // hang forever waiting for the thread to finish its infinite loop.
        let _ = self.shutdown_sender.send(());
    }
}

/// Contains all of the state needed to process intents on the job thread.
struct JobThreadContext {
    store: Arc<dyn NodeStore>,

    /// The cached snapshot, identity maps, and protected set. The job
    /// thread is the only writer.
    state: Arc<Mutex<EngineState>>,

    /// Whenever the engine resyncs, the fresh view is pushed into this
    /// queue to inform the rendering layer.
    message_queue: Arc<MessageQueue<StateReady>>,

    stats: Arc<OperationRecord>,
}

impl JobThreadContext {
    fn handle_request(&self, request: EngineRequest) {
        match request {
            EngineRequest::Move(ticket) => {
                self.stats.record_attempt();

                let outcome = match self.process_move(&ticket) {
                    Ok(final_visual_index) => {
                        self.stats.record_confirmed();
                        MoveOutcome::confirmed(final_visual_index)
                    }
                    Err(error) => {
                        self.stats.record_failure(error.kind());
                        log::info!("move failed: {error}");
                        MoveOutcome::failed(&error)
                    }
                };

                // The caller may have hung up; that's fine.
                let _ = ticket.outcome_sender.send(outcome);
            }
            EngineRequest::Resync => {
                let mut state = self.state.lock().unwrap();
                self.invalidate_and_resync(&mut state);
            }
            EngineRequest::PublishRendered { container, entries } => {
                let mut state = self.state.lock().unwrap();
                state.rendered.insert(container.clone(), entries);

                // The published order supersedes whatever correlation the
                // current map was built from; rebuild that one container
                // against the already-fetched snapshot.
                if let Some(snapshot) = &state.snapshot {
                    if let Some(children) = snapshot.children_of(&container) {
                        let map = build_identity_map(
                            children,
                            state.rendered.get(&container).map(Vec::as_slice),
                        );
                        state.identity.insert(container, map);
                    }
                }
            }
        }
    }

    fn handle_store_event(&self, event: StoreEvent) {
        // Externally caused changes take the identical path as our own
        // mutation completions.
        match &event {
            StoreEvent::NodeMoved { id, container } => {
                log::debug!("store event: node {id} moved within/into {container}");
            }
            StoreEvent::ChildrenReordered { container } => {
                log::debug!("store event: children of {container} reordered externally");
            }
            _ => log::debug!("store event: {event:?}"),
        }

        let mut state = self.state.lock().unwrap();
        self.invalidate_and_resync(&mut state);
    }

    /// Runs a single move through the
    /// Requested -> Validating -> Adjusting -> Calling state machine.
    /// Returns the final visual index.
    fn process_move(&self, ticket: &MoveTicket) -> Result<usize, MoveError> {
        let request = &ticket.request;
        log::debug!(
            "move requested: {}[{}] -> {:?}[{}]",
            request.source_container,
            request.source_visual_index,
            request.destination_container,
            request.destination_visual_index,
        );

        if ticket.cancelled.load(Ordering::SeqCst) {
            return Err(MoveError::Cancelled);
        }

        let mut state = self.state.lock().unwrap();

        // Stale position data must never be reused: anything that
        // invalidated the snapshot forces a fresh read before index math.
        if state.snapshot.is_none() {
            self.resync(&mut state)
                .map_err(|error| MoveError::from_store(error, request.source_visual_index))?;
        }

        let result = self.validate_and_call(ticket, &mut state);

        match &result {
            Ok(Applied::Mutated(_)) => {
                // Confirmed: ground truth changed, converge.
                self.invalidate_and_resync(&mut state);
            }
            Ok(Applied::NoOp(_)) => {
                // No backend call was issued; caches are still trustworthy.
            }
            Err(MoveError::BackendUnavailable) | Err(MoveError::Timeout) => {
                // Inconclusive: the mutation may or may not have applied.
                self.invalidate_and_resync(&mut state);
            }
            Err(MoveError::BackendRejected { .. }) => {
                // Authoritative refusal, but the call still left our view of
                // the backend unverified.
                self.invalidate_and_resync(&mut state);
            }
            Err(MoveError::UnresolvedNode { .. }) => {
                // Stale or corrupted mapping: force a resync before any
                // retry is allowed.
                self.invalidate_and_resync(&mut state);
            }
            Err(MoveError::ProtectedNode { .. })
            | Err(MoveError::OutOfRange { .. })
            | Err(MoveError::Cancelled) => {
                // Short-circuited before any backend call; caches are still
                // trustworthy.
            }
        }

        result.map(|applied| match applied {
            Applied::Mutated(index) | Applied::NoOp(index) => index,
        })
    }

    /// Validating + Adjusting + Calling. Does not invalidate; the caller
    /// applies the recovery policy based on the returned outcome.
    fn validate_and_call(
        &self,
        ticket: &MoveTicket,
        state: &mut MutexGuard<'_, EngineState>,
    ) -> Result<Applied, MoveError> {
        let request = &ticket.request;
        let source_container = request.source_container.clone();
        let destination_container = request
            .destination_container
            .clone()
            .unwrap_or_else(|| source_container.clone());

        // Validating: resolve identities and gate on protection.
        log::debug!("move validating");
        let source_id = {
            let identity = state.identity.get(&source_container).ok_or(
                MoveError::UnresolvedNode {
                    visual_index: request.source_visual_index,
                },
            )?;
            identity.resolve(request.source_visual_index)?.clone()
        };

        if state.protected.contains(&source_id) {
            let title = state
                .protected
                .title_of(&source_id)
                .unwrap_or(source_id.as_str())
                .to_owned();
            return Err(MoveError::ProtectedNode { title });
        }

        // A drop onto a placeholder row has no well-defined target. Slots
        // past the mapping's end are the append gap and carry no identity.
        let destination_slot = state
            .identity
            .get(&destination_container)
            .and_then(|identity| identity.get(request.destination_visual_index));
        if let Some(Resolution::Unresolved) = destination_slot {
            return Err(MoveError::UnresolvedNode {
                visual_index: request.destination_visual_index,
            });
        }

        // Defensive re-check: a cross-container request may still resolve to
        // the source container, in which case the same-container rule applies.
        let same_container = destination_container == source_container;

        if same_container
            && request.destination_visual_index == request.source_visual_index
        {
            // Dropping a node on its own slot expresses no intent. Resolve
            // successfully without issuing a backend call.
            log::debug!("move is a no-op; skipping backend call");
            return Ok(Applied::NoOp(request.source_visual_index));
        }

        // Adjusting: translate the visual insertion point into the index the
        // backend's remove-then-insert primitive expects.
        log::debug!("move adjusting");
        let (destination, source_title) = {
            let snapshot = state
                .snapshot
                .as_ref()
                .expect("snapshot was just ensured fresh");

            let source_index = snapshot
                .index_of(&source_container, &source_id)
                .ok_or(MoveError::UnresolvedNode {
                    visual_index: request.source_visual_index,
                })?;

            let destination = if same_container {
                let sibling_count = snapshot
                    .children_of(&source_container)
                    .map(<[_]>::len)
                    .unwrap_or(0);
                let index = adjusted_destination(
                    source_index,
                    request.destination_visual_index,
                    sibling_count,
                )?;
                MoveDestination::at_index(index)
            } else {
                let siblings = snapshot.children_of(&destination_container).ok_or(
                    MoveError::UnresolvedNode {
                        visual_index: request.destination_visual_index,
                    },
                )?;
                // Drops strictly past the end of a foreign container are
                // appends; the backend treats an absent index as "append".
                // The end gap itself (slot == child count) is a valid
                // explicit insertion index.
                let index = if request.destination_visual_index > siblings.len() {
                    None
                } else {
                    Some(request.destination_visual_index)
                };
                MoveDestination::in_container(destination_container.clone(), index)
            };

            let source_title = snapshot
                .title_of(&source_id)
                .unwrap_or(source_id.as_str())
                .to_owned();

            (destination, source_title)
        };

        // Last chance to withdraw; once the mutation is issued it cannot be
        // cancelled.
        if ticket.cancelled.load(Ordering::SeqCst) {
            return Err(MoveError::Cancelled);
        }

        log::debug!(
            "move calling: {} -> {:?} index {:?}",
            source_id,
            destination.container,
            destination.index,
        );
        match self.store.move_node(&source_id, destination) {
            Ok(node) => {
                log::debug!("move confirmed at backend index {}", node.index);
                Ok(Applied::Mutated(node.index))
            }
            Err(StoreError::Rejected { id, reason }) => {
                // The backend is authoritative about immutability; remember
                // the refusal so we short-circuit next time.
                state.protected.flag(source_id.clone(), source_title);
                Err(MoveError::BackendRejected { id, reason })
            }
            Err(other) => Err(MoveError::from_store(
                other,
                request.source_visual_index,
            )),
        }
    }

    /// The single "the world changed" transition: full drop of cached
    /// position data, fresh read, rebuild, notify.
    fn invalidate_and_resync(&self, state: &mut MutexGuard<'_, EngineState>) {
        state.invalidate();
        if let Err(error) = self.resync(state) {
            // The snapshot stays dropped; the next operation re-attempts the
            // read, so stale data is still never reused.
            log::error!("resync failed: {error}");
        }
    }

    fn resync(&self, state: &mut MutexGuard<'_, EngineState>) -> Result<(), StoreError> {
        let notification = rebuild_state(self.store.as_ref(), state)?;
        self.message_queue.push(notification);
        Ok(())
    }
}

/// Fetches ground truth and rebuilds the snapshot, every identity map, and
/// the protected set. Returns the notification describing the fresh view.
pub(crate) fn rebuild_state(
    store: &dyn NodeStore,
    state: &mut EngineState,
) -> Result<StateReady, StoreError> {
    let snapshot = TreeSnapshot::from_flattened(store.get_tree()?);

    state.protected.observe_snapshot(&snapshot);

    let mut containers = Vec::new();
    let mut identity = std::collections::HashMap::new();
    for container in snapshot.containers() {
        let children = snapshot
            .children_of(container)
            .expect("every discovered container has a child list");

        let rendered = state.rendered.get(container).map(Vec::as_slice);
        identity.insert(container.clone(), build_identity_map(children, rendered));

        containers.push(ContainerView {
            container_id: container.clone(),
            entries: children
                .iter()
                .enumerate()
                .map(|(position, node)| StateEntry {
                    position,
                    node_id: node.id.clone(),
                    title: node.title.clone(),
                })
                .collect(),
        });
    }

    log::debug!(
        "rebuilt state: {} containers, {} protected nodes",
        containers.len(),
        state.protected.len(),
    );

    state.identity = identity;
    state.snapshot = Some(snapshot);

    Ok(StateReady { containers })
}

/// Index adjustment for remove-then-insert semantics within one container.
///
/// The visual insertion point counts slots in the pre-removal list, but by
/// the time the backend inserts, the source has already been removed,
/// shifting everything after it left by one. The result is clamped to the
/// last valid insertion index so a drop at the very end never goes out of
/// range.
fn adjusted_destination(
    source_index: usize,
    destination: usize,
    sibling_count: usize,
) -> Result<usize, MoveError> {
    if sibling_count == 0 || source_index >= sibling_count {
        return Err(MoveError::OutOfRange {
            index: destination,
            len: sibling_count,
        });
    }

    let adjusted = if destination > source_index {
        destination - 1
    } else {
        destination
    };

    Ok(adjusted.min(sibling_count - 1))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn destination_after_source_shifts_left_by_one() {
        // Moving the head of [a, b, c, d, e] to visual slot 3 must call the
        // backend with index 2.
        assert_eq!(adjusted_destination(0, 3, 5).unwrap(), 2);
    }

    #[test]
    fn destination_before_source_is_unadjusted() {
        // Moving index 3 of [a, b, c, d, e] to visual slot 1 calls index 1.
        assert_eq!(adjusted_destination(3, 1, 5).unwrap(), 1);
    }

    #[test]
    fn adjustment_property_for_all_small_lists() {
        // For every sibling count in [2, 50] and every (source, destination)
        // pair: destination > source uses destination - 1, destination <=
        // source uses destination exactly.
        for n in 2..=50usize {
            for source in 0..n {
                for destination in 0..n {
                    let got = adjusted_destination(source, destination, n).unwrap();
                    let expected = if destination > source {
                        destination - 1
                    } else {
                        destination
                    };
                    assert_eq!(
                        got, expected,
                        "n={n} source={source} destination={destination}"
                    );
                }
            }
        }
    }

    #[test]
    fn end_of_list_drop_clamps_to_last_insertion_index() {
        // Visual slot 5 in a 5-element list is the gap after the last
        // element; post-removal that is insertion index 4.
        assert_eq!(adjusted_destination(0, 5, 5).unwrap(), 4);
        // Anything further out clamps the same way instead of erroring.
        assert_eq!(adjusted_destination(2, 17, 5).unwrap(), 4);
    }

    #[test]
    fn empty_or_inconsistent_lists_are_out_of_range() {
        assert!(matches!(
            adjusted_destination(0, 0, 0),
            Err(MoveError::OutOfRange { len: 0, .. })
        ));
        // Source index beyond the sibling count means the snapshot and the
        // mapping disagree; surfaced rather than silently clamped.
        assert!(matches!(
            adjusted_destination(9, 1, 5),
            Err(MoveError::OutOfRange { .. })
        ));
    }
}
