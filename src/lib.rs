/*!
reshelf is a client-side reorder coordination engine for externally-owned
hierarchical node stores. It translates "drop at visual slot K" into a
correct mutation against a backend whose move primitive removes the node
before inserting it, keeps the visual-order-to-identifier mapping valid
under concurrent mutations, refuses to touch protected system nodes, and
converges back to ground truth after every change, self-caused or not.
*/

mod coordinator;
mod error;
mod identity;
mod message_queue;
mod protect;
mod session;
mod stats;

pub use error::{MoveError, SessionError};
pub use identity::{build_identity_map, IdentityMap, RenderedEntry, Resolution, TreeSnapshot};
pub use protect::{ProtectedSet, RESERVED_ROOT_IDS, RESERVED_TITLES};
pub use session::{
    ContainerView, MoveOutcome, MoveRequest, PendingMove, ReorderSession, StateEntry, StateReady,
};
pub use stats::OperationReport;
