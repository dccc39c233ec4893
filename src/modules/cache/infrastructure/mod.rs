pub mod memory_storage;
pub mod sled_storage;

pub use memory_storage::MemoryStorage;
pub use sled_storage::SledStorage;
