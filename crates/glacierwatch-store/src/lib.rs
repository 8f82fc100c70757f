//! GlacierWatch Store - Scene work queue ports and adapters
//!
//! This crate defines the persistence ports for the scene lifecycle queue
//! and project data, with a PostgreSQL adapter built on row-level locking
//! and an in-memory adapter for development and testing.

pub mod memory;
pub mod ports;
pub mod postgres;

pub use memory::MemoryStore;
pub use ports::{ProjectStore, SceneQueue};
pub use postgres::PostgresStore;
