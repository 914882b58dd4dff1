//! mesh-net — the forwarding engine, handshake, session, and orchestrator
//! built on top of `mesh-core`'s primitives and wire format.

pub mod dedup;
pub mod events;
pub mod fragment;
pub mod handshake;
pub mod orchestrator;
pub mod peer;
pub mod routing;
pub mod session;
pub mod storage;
pub mod storeforward;
pub mod transport;

pub use events::{Event, EventBus};
pub use orchestrator::{LifecycleState, MeshNode, OrchestratorError};
