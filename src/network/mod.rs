//! Network Layer
//!
//! Host-authoritative lockstep between two peers. Only the authority computes
//! diffs; participants apply its batches verbatim and check themselves
//! against its periodic checksums.
//! This layer is **non-deterministic** - all game logic runs through `game/`.

pub mod authority;
pub mod coordinator;
pub mod events;
pub mod participant;
pub mod protocol;
pub mod session;
pub mod transport;

pub use authority::AuthorityCore;
pub use coordinator::{CoordinatorError, NetworkCoordinator, Role};
pub use events::CoordinatorEvent;
pub use participant::ParticipantCore;
pub use protocol::{PeerMessage, Welcome, PROTOCOL_VERSION};
pub use session::{ConnectionState, PeerId, PeerSession, SessionError, SessionTable};
pub use transport::{LoopbackLink, TransportError, TransportEvent};
