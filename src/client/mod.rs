//! Client-side synchronization core.
//!
//! [`SyncClient`] is the entry point: it owns one [`ConnectionManager`] and
//! drives the session controller, the edit propagation channel and the
//! autosave coordinator from a single actor task. The components are public
//! so they can be composed differently or tested in isolation.

pub mod autosave;
pub mod conflict;
pub mod connection;
pub mod dispatcher;
pub mod propagation;
pub mod scheduler;
pub mod session;
pub mod sync_client;
pub mod transport;

#[cfg(test)]
mod testing;

pub use autosave::{AutosaveNotify, AutosaveSignal, SaveCoordinator, SaveReport};
pub use conflict::{SaveState, SaveStateMachine};
pub use connection::{
    Channel, ChannelEvent, ConnectionManager, Connector, Outbound, ReconnectPolicy, TransportError,
};
pub use dispatcher::{EventDispatcher, Handler, Subscription};
pub use propagation::{EditChannel, LocalCursor, PropagationStrategy, WholeBufferReplace};
pub use scheduler::{ScheduledTask, Ticket};
pub use session::{DocumentSession, SessionController};
pub use sync_client::{ClientSnapshot, SyncClient};
pub use transport::WsConnector;
