//! Storage layer
//!
//! Local persistence is limited to the session identity; experiment state
//! always comes from the server and is never cached on disk.

pub mod error;
pub mod persistence;

pub use error::{StorageError, StorageResult};
pub use persistence::atomic_write;
