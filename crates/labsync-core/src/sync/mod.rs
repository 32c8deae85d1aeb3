//! Sync with the experiment server
//!
//! Keeps the local experiment state consistent with the server over a
//! long-lived WebSocket connection.
//!
//! ## Protocol
//!
//! 1. Connect via WebSocket to `ws://<host>:<port>/ws`
//! 2. Send `CONNECT` with the stored session id (empty on a fresh install)
//! 3. The server may answer with `CONNECT` carrying a new session id
//! 4. The server pushes `UPDATE_STATE` whenever the experiment changes
//! 5. The client sends `SUBMIT_DECISION` for the current round
//!
//! Any close schedules a reconnect after a fixed delay.
//!
//! ## Usage
//!
//! ```ignore
//! let mut handle = spawn_sync_task(SyncTaskConfig::from_config(&config), store);
//! while let Some(event) = handle.next_event().await {
//!     // render SyncTaskEvent::Updated { state, script }
//! }
//! ```

mod client;
mod connection;
pub mod message;
mod persistent;
mod transport;

use crate::error::SyncError;

pub use client::{CoreEvent, SyncCore};
pub use connection::{
    ConnectionManager, ConnectionSignal, ConnectionState, Transport, TransportEvent,
    TransportEventKind,
};
pub use message::{route, CommandKind, DecodeError, Envelope, Inbound};
pub use persistent::{spawn_sync_task, SyncCommand, SyncHandle, SyncTaskConfig, SyncTaskEvent};
pub use transport::WsTransport;

/// Anything an envelope can be sent through
pub trait EnvelopeSink {
    fn send_envelope(&mut self, envelope: Envelope) -> Result<(), SyncError>;
}
