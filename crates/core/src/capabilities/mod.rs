//! Interfaces to the services the pipeline consumes but does not implement.

pub mod directory;
pub mod memory;

pub use directory::HrDirectory;
pub use memory::{ContextEntry, IntentPattern, MemoryStore, PatternUpdate, UserPatterns};
