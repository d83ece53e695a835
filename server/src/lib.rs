//! # Workforce Server Library
//!
//! Authoritative server for the worker-collection manager. Clients submit
//! named commands over UDP datagrams; the server validates them against the
//! user directory, executes them on the shared in-memory collection, and
//! answers with a status, accumulated output, and (unless suppressed) a
//! full snapshot of the collection.
//!
//! ## Architecture
//!
//! - **Record store** (`store`): the in-memory worker set with identifier
//!   generation and a version counter; pure data, no I/O.
//! - **Storage interaction** (`interaction`): the command surface over the
//!   store behind an exclusive-write / shared-read lock.
//! - **Command dispatch** (`commands`): descriptor-driven routing with a
//!   per-request output buffer.
//! - **Auth gateway** (`auth`): register/login against the persistence
//!   backend; opaque session tokens gate every other command.
//! - **Persistence** (`persist`): backend trait plus the JSON file
//!   implementation and its optional CSV mirror.
//! - **Transport** (`network`): the UDP socket, a receive loop feeding a
//!   bounded job queue, a fixed pool of request workers, and a response
//!   sender task. Requests in flight are independent; the only ordering
//!   guarantee is the store lock.

pub mod auth;
pub mod commands;
pub mod error;
pub mod interaction;
pub mod network;
pub mod persist;
pub mod store;

pub use error::{Result, ServerError};
pub use interaction::Interaction;
pub use network::Server;
pub use persist::{Backend, FileBackend, MemoryBackend};
pub use store::Store;
