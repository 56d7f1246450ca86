//! Session and transport multiplexing for mcprelay.
//!
//! A stateful MCP session is backed by exactly one [`Transport`], which owns
//! an append-only [`EventLog`] used to replay missed events to reconnecting
//! clients.  The [`SessionRegistry`] is the only shared map of live
//! sessions; the [`LifecycleManager`] closes everything it holds on
//! shutdown.  Stateless exchanges get a log-less transport that never
//! enters the registry.

pub mod event_log;
pub mod lifecycle;
pub mod registry;
pub mod session_id;
pub mod transport;

pub use event_log::{EventEntry, EventLog, Replay};
pub use lifecycle::{LifecycleManager, ShutdownFailure, ShutdownReport};
pub use registry::{RegistryError, Reservation, SessionRegistry};
pub use session_id::SessionId;
pub use transport::{
    AbortOnDrop, OpenTransports, Subscription, Transport, TransportError, TransportFactory,
    TransportState,
};
