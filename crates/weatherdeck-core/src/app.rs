use anyhow::{Context, Result};
use std::sync::Arc;

use weatherdeck_weather::{
    FavoritesRepository, KeyValueStore, MemoryStore, PersistentStore, QueryClient, SqliteStore,
};

use crate::config::{Config, StorageBackend};

/// Main application state and lifecycle manager
pub struct App {
    config: Arc<Config>,
    query_client: Arc<QueryClient>,
    favorites: FavoritesRepository,
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("config", &self.config)
            .field("query_client", &self.query_client)
            .finish_non_exhaustive()
    }
}

impl App {
    /// Create a new application instance from the on-disk configuration
    pub fn new() -> Result<Self> {
        let (config, _) = Config::load_validated()?;
        Self::with_config(config)
    }

    /// Create an application instance from an explicit configuration
    pub fn with_config(config: Config) -> Result<Self> {
        let backend = open_backend(&config)?;
        let query_client = Arc::new(QueryClient::new());
        let favorites = FavoritesRepository::with_storage_key(
            PersistentStore::new(backend),
            query_client.clone(),
            config.favorites.storage_key.clone(),
        );

        tracing::info!(
            "Application initialized ({:?} storage, key '{}')",
            config.storage.backend,
            config.favorites.storage_key
        );

        Ok(Self {
            config: Arc::new(config),
            query_client,
            favorites,
        })
    }

    /// Shutdown the application
    pub fn shutdown(&mut self) -> Result<()> {
        tracing::info!("Shutting down application");
        self.query_client.clear();
        Ok(())
    }

    /// Get reference to application config
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Favorite cities repository
    pub fn favorites(&self) -> &FavoritesRepository {
        &self.favorites
    }

    /// Query cache shared by the application's views
    pub fn query_client(&self) -> &Arc<QueryClient> {
        &self.query_client
    }
}

fn open_backend(config: &Config) -> Result<Arc<dyn KeyValueStore>> {
    match config.storage.backend {
        StorageBackend::Sqlite => {
            std::fs::create_dir_all(&config.data_dir)
                .context("Failed to create data directory")?;
            let store: Arc<dyn KeyValueStore> = Arc::new(
                SqliteStore::open(config.storage_path()).context("Failed to open local storage")?,
            );
            Ok(store)
        }
        StorageBackend::Memory => {
            tracing::warn!("Using in-memory storage, favorites will not be saved");
            let store: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::new());
            Ok(store)
        }
    }
}
