//! Persistence layer — conversation state, sessions, escalations.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibsqlStore;
pub use memory::MemoryStore;
pub use traits::{DeadLetter, Store};
