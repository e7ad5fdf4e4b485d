pub use self::error::DatabaseError;
pub use self::manager::DatabaseManager;
pub use self::models::{IdMapping, MappingType};
pub use self::retry::RetryPolicy;
pub use self::stores::{MappingStore, MembershipStore};

pub mod error;
pub mod manager;
pub mod models;
pub mod retry;
pub mod stores;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "sqlite")]
pub mod schema_sqlite;
