//! Favorite cities for WeatherDeck
//!
//! Persists the user's favorite cities in a local key-value store and serves
//! them through a read-through query cache.

pub mod error;
pub mod favorites;
pub mod query;
pub mod sqlite_store;
pub mod store;
pub mod types;

pub use error::{FavoritesError, QueryError, StoreError};
pub use favorites::{FavoritesRepository, FAVORITES_STORAGE_KEY};
pub use query::{QueryClient, QueryEvent, QueryKey};
pub use sqlite_store::SqliteStore;
pub use store::{KeyValueStore, MemoryStore, PersistentStore};
pub use types::*;
