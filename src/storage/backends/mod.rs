//! Storage backend implementations

pub mod file;
pub mod memory;

pub use file::{FileDocumentStore, FileKeyValueStore};
pub use memory::{MemoryDocumentStore, MemoryKeyValueStore};
