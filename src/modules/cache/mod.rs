pub mod domain;
pub mod infrastructure;
pub mod single_flight;

// Re-export commonly used types
pub use domain::CacheStorage;
pub use infrastructure::{MemoryStorage, SledStorage};
pub use single_flight::SingleFlightCache;
