//! Data plane of the mesh benchmark: deterministic rendezvous ports,
//! topology masks, peer directories and the per-worker transfer engine.
pub mod engine;
pub mod error;
pub mod logging;
pub mod order;
pub mod port;
pub mod rendezvous;
pub mod sock;
pub mod topology;

pub use engine::{DataPlaneEngine, EngineConfig, ProgressRecord, RunSummary};
pub use error::{ConnectionError, NetError, RendezvousError, Stage, TopologyError};
pub use logging::NetLogger;
pub use order::{arrange_items, IdentityOrder, OrderStrategy, RandomOrder};
pub use port::{PortScheme, BASE_RECV, BASE_SEND};
pub use rendezvous::{
    CoordinatorDirectory, LoopbackDirectory, PeerEntry, RendezvousDirectory, RendezvousQuery,
};
pub use sock::{Activity, PeerConnection, Role};
pub use topology::{BlockLayout, Topology, TopologyMask};
