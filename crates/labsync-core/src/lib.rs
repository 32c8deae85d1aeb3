//! labsync core library
//!
//! Client-side synchronization core for multi-participant experiments: it
//! keeps a local copy of the experiment state consistent with a server over
//! an unreliable WebSocket connection, and turns every state change into the
//! smallest set of list edits for whatever renders it.
//!
//! # Architecture
//!
//! ```text
//! frames -> codec -> state store -> render list -> diff -> observers
//!                                                   decisions -> codec -> connection
//! ```
//!
//! One owner (`SyncCore`, usually driven by `spawn_sync_task`) holds the
//! connection, the state store and the session identity.
//!
//! # Modules
//!
//! - `sync`: connection lifecycle, wire protocol and the sync task
//! - `store`: latest experiment state and its observers
//! - `render`: state to render list derivation
//! - `diff`: minimal edit scripts between render lists
//! - `identity`: durable session identity
//! - `models`: protocol and content data types
//! - `storage`: atomic file persistence
//! - `config`: application configuration

pub mod config;
pub mod diff;
pub mod error;
pub mod identity;
pub mod models;
pub mod render;
pub mod storage;
pub mod store;
pub mod sync;

pub use config::Config;
pub use diff::{apply, diff, ApplyError, EditOp, EditScript};
pub use error::SyncError;
pub use identity::{FileSessionStore, MemorySessionStore, SessionStore};
pub use models::{
    ChoiceSet, ContentItem, Decision, ExperimentState, Field, ImageRef, ItemKind, Phase, SessionId,
};
pub use render::derive_render_list;
pub use storage::{StorageError, StorageResult};
pub use store::{StateObserver, StateStore, SubscriptionId};
pub use sync::{spawn_sync_task, SyncCore, SyncHandle, SyncTaskConfig, SyncTaskEvent};
