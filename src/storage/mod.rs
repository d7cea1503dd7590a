pub mod failover;
pub mod memory;
pub mod postgres;
pub mod traits;

pub use failover::{FailoverStorage, StorageMode};
pub use memory::InMemoryStore;
pub use postgres::PostgresStore;
pub use traits::StorageBackend;
