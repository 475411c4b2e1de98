mod local;
mod repository;
mod schema;

pub use local::{KeyValueStore, LocalStore, MemoryStore, StoreKey};
pub use repository::Repository;
