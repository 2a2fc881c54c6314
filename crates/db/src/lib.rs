//! Storage adapters: the SQLite pool and migrations, the SQL-backed memory
//! store, and the seeded in-memory HR directory.

pub mod connection;
pub mod fixtures;
pub mod migrations;
pub mod repositories;

pub use connection::{connect, connect_with_settings, DbPool};
pub use fixtures::HrSeedDataset;
pub use repositories::{InMemoryHrDirectory, InMemoryMemoryStore, RepositoryError, SqlMemoryStore};
