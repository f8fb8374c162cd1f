//! Storage collaborator abstraction

mod memory;
mod traits;

pub use memory::MemoryStorage;
pub use traits::{ListQuery, ObjectStorage, PutOptions, StorageError};
