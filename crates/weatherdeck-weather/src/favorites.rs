//! Favorite cities.
//!
//! The persisted store slot is the source of truth. The query cache holds a
//! read-through copy under `["favorites"]` that is never written directly:
//! every successful mutation writes the store and then invalidates the cache
//! entry, so the next `list()` re-reads the slot.

use std::sync::Arc;

use crate::error::FavoritesError;
use crate::query::{QueryClient, QueryKey};
use crate::store::PersistentStore;
use crate::types::{FavoriteCity, NewFavorite};

/// Default store slot for the favorites sequence.
pub const FAVORITES_STORAGE_KEY: &str = "favorites";

/// Query cache key for the favorites sequence.
pub const FAVORITES_QUERY_KEY: &str = "favorites";

pub type FavoritesResult<T> = Result<T, FavoritesError>;

/// Ordered, coordinate-deduplicated list of favorite cities.
#[derive(Debug, Clone)]
pub struct FavoritesRepository {
    store: PersistentStore,
    client: Arc<QueryClient>,
    storage_key: String,
    query_key: QueryKey,
}

impl FavoritesRepository {
    /// Create a repository persisting under `FAVORITES_STORAGE_KEY`.
    pub fn new(store: PersistentStore, client: Arc<QueryClient>) -> Self {
        Self::with_storage_key(store, client, FAVORITES_STORAGE_KEY)
    }

    pub fn with_storage_key(
        store: PersistentStore,
        client: Arc<QueryClient>,
        storage_key: impl Into<String>,
    ) -> Self {
        Self {
            store,
            client,
            storage_key: storage_key.into(),
            query_key: QueryKey::from(FAVORITES_QUERY_KEY),
        }
    }

    pub fn query_key(&self) -> &QueryKey {
        &self.query_key
    }

    pub fn client(&self) -> &Arc<QueryClient> {
        &self.client
    }

    /// Current favorites in insertion order.
    ///
    /// Served from the cache entry, which never goes stale on its own and is
    /// seeded from the store on first use and after each invalidation.
    pub fn list(&self) -> Vec<FavoriteCity> {
        match self.client.query(&self.query_key, || self.load()) {
            Ok(favorites) => favorites,
            Err(e) => {
                tracing::warn!("Favorites cache unusable, reading store directly: {}", e);
                self.load()
            }
        }
    }

    /// Favorite with the given id, if any.
    pub fn get(&self, id: &str) -> Option<FavoriteCity> {
        self.list().into_iter().find(|f| f.id == id)
    }

    /// True if a favorite has exactly these coordinates.
    pub fn is_favorite(&self, lat: f64, lon: f64) -> bool {
        self.list().iter().any(|f| f.coordinates().matches(lat, lon))
    }

    /// Add a city to the favorites.
    ///
    /// Idempotent by coordinate: if a favorite with the same derived id
    /// already exists, nothing is written and the existing sequence is
    /// returned unchanged (the original entry keeps its name and `added_at`).
    ///
    /// # Errors
    /// Returns `FavoritesError::InvalidCoordinates` if either coordinate is
    /// NaN or infinite, and `FavoritesError::Persist` if the store write
    /// fails. In both cases the store and the cache keep the previous sequence.
    pub async fn add(&self, candidate: NewFavorite) -> FavoritesResult<Vec<FavoriteCity>> {
        self.client
            .mutate(
                &self.query_key,
                async move { self.apply_add(candidate) },
                |client, _| {
                    client.invalidate_queries(&self.query_key);
                },
            )
            .await
    }

    /// Remove the favorite with the given id.
    ///
    /// Removing an unknown id leaves the sequence unchanged but still
    /// rewrites the slot and invalidates the cache.
    ///
    /// # Errors
    /// Returns `FavoritesError::Persist` if the store write fails.
    pub async fn remove(&self, id: &str) -> FavoritesResult<Vec<FavoriteCity>> {
        self.client
            .mutate(
                &self.query_key,
                async move { self.apply_remove(id) },
                |client, _| {
                    client.invalidate_queries(&self.query_key);
                },
            )
            .await
    }

    /// Remove the city if it is a favorite, add it otherwise.
    ///
    /// # Errors
    /// Same as `add` and `remove`.
    pub async fn toggle(&self, candidate: NewFavorite) -> FavoritesResult<Vec<FavoriteCity>> {
        if self.is_favorite(candidate.lat, candidate.lon) {
            let id = candidate.favorite_id();
            self.remove(&id).await
        } else {
            self.add(candidate).await
        }
    }

    /// Remove every favorite.
    ///
    /// # Errors
    /// Returns `FavoritesError::Persist` if the store slot cannot be cleared.
    pub async fn clear(&self) -> FavoritesResult<()> {
        self.client
            .mutate(
                &self.query_key,
                async move {
                    self.store.clear(&self.storage_key)?;
                    tracing::info!("Cleared all favorites");
                    Ok::<_, FavoritesError>(())
                },
                |client, _| {
                    client.invalidate_queries(&self.query_key);
                },
            )
            .await
    }

    fn load(&self) -> Vec<FavoriteCity> {
        self.store.read(&self.storage_key, Vec::new())
    }

    fn apply_add(&self, candidate: NewFavorite) -> FavoritesResult<Vec<FavoriteCity>> {
        // JSON has no NaN or infinity, so such an entry would not read back
        if !candidate.coordinates().is_finite() {
            return Err(FavoritesError::InvalidCoordinates {
                lat: candidate.lat,
                lon: candidate.lon,
            });
        }

        let mut favorites = self.load();
        let id = candidate.favorite_id();

        if favorites.iter().any(|f| f.id == id) {
            tracing::debug!("City {} is already a favorite", id);
            return Ok(favorites);
        }

        let favorite = candidate.into_favorite();
        tracing::info!("Adding favorite {} ({})", favorite.name, favorite.id);
        favorites.push(favorite);
        self.store.write(&self.storage_key, &favorites)?;
        Ok(favorites)
    }

    fn apply_remove(&self, id: &str) -> FavoritesResult<Vec<FavoriteCity>> {
        let mut favorites = self.load();
        let before = favorites.len();
        favorites.retain(|f| f.id != id);

        if favorites.len() == before {
            tracing::debug!("No favorite with id {} to remove", id);
        } else {
            tracing::info!("Removed favorite {}", id);
        }

        self.store.write(&self.storage_key, &favorites)?;
        Ok(favorites)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{KeyValueStore, MemoryStore};

    fn paris() -> NewFavorite {
        NewFavorite::new("Paris", 48.8566, 2.3522, "FR")
    }

    fn oslo() -> NewFavorite {
        NewFavorite::new("Oslo", 59.9139, 10.7522, "NO")
    }

    fn create_test_repo() -> (Arc<MemoryStore>, FavoritesRepository) {
        let backend = Arc::new(MemoryStore::new());
        let repo = FavoritesRepository::new(
            PersistentStore::new(backend.clone()),
            Arc::new(QueryClient::new()),
        );
        (backend, repo)
    }

    fn persisted(backend: &Arc<MemoryStore>) -> Vec<FavoriteCity> {
        PersistentStore::new(backend.clone()).read(FAVORITES_STORAGE_KEY, Vec::new())
    }

    #[test]
    fn test_list_starts_empty() {
        let (backend, repo) = create_test_repo();
        assert!(repo.list().is_empty());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_add_appends_and_persists() {
        let (backend, repo) = create_test_repo();

        let favorites = repo.add(paris()).await.unwrap();
        assert_eq!(favorites.len(), 1);
        assert_eq!(favorites[0].id, "48.8566-2.3522");
        assert_eq!(repo.list(), favorites);
        assert_eq!(persisted(&backend), favorites);
    }

    #[tokio::test]
    async fn test_add_preserves_insertion_order() {
        let (_, repo) = create_test_repo();
        repo.add(oslo()).await.unwrap();
        repo.add(paris()).await.unwrap();

        let names: Vec<String> = repo.list().into_iter().map(|f| f.name).collect();
        assert_eq!(names, vec!["Oslo", "Paris"]);
    }

    #[tokio::test]
    async fn test_add_is_idempotent_by_coordinates() {
        let (_, repo) = create_test_repo();
        let first = repo.add(paris()).await.unwrap();

        let renamed = NewFavorite::new("Paris, Île-de-France", 48.8566, 2.3522, "FR");
        let second = repo.add(renamed).await.unwrap();

        assert_eq!(second, first);
        assert_eq!(second[0].name, "Paris");
        assert_eq!(
            repo.list()
                .iter()
                .filter(|f| f.coordinates().matches(48.8566, 2.3522))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_list_observes_mutations_after_cache_seeded() {
        let (_, repo) = create_test_repo();
        assert!(repo.list().is_empty());

        repo.add(paris()).await.unwrap();
        assert_eq!(repo.list().len(), 1);

        repo.remove("48.8566-2.3522").await.unwrap();
        assert!(repo.list().is_empty());
    }

    #[tokio::test]
    async fn test_is_favorite_follows_add_and_remove() {
        let (_, repo) = create_test_repo();
        assert!(!repo.is_favorite(48.8566, 2.3522));

        let favorites = repo.add(paris()).await.unwrap();
        assert!(repo.is_favorite(48.8566, 2.3522));
        assert!(!repo.is_favorite(48.8566, 2.35));

        repo.remove(&favorites[0].id).await.unwrap();
        assert!(!repo.is_favorite(48.8566, 2.3522));
    }

    #[tokio::test]
    async fn test_remove_unknown_id_leaves_sequence_unchanged() {
        let (backend, repo) = create_test_repo();
        repo.add(paris()).await.unwrap();
        repo.add(oslo()).await.unwrap();
        let before = repo.list();

        let after = repo.remove("0-0").await.unwrap();
        assert_eq!(after, before);
        assert_eq!(repo.list(), before);
        assert_eq!(persisted(&backend), before);
    }

    #[tokio::test]
    async fn test_remove_unknown_id_on_empty_store_writes_empty_sequence() {
        let (backend, repo) = create_test_repo();
        let after = repo.remove("1-2").await.unwrap();
        assert!(after.is_empty());
        assert_eq!(backend.len(), 1);
    }

    #[tokio::test]
    async fn test_get_by_id() {
        let (_, repo) = create_test_repo();
        repo.add(paris().with_state("Île-de-France")).await.unwrap();

        let fav = repo.get("48.8566-2.3522").unwrap();
        assert_eq!(fav.state.as_deref(), Some("Île-de-France"));
        assert!(repo.get("1-1").is_none());
    }

    #[tokio::test]
    async fn test_toggle_adds_then_removes() {
        let (_, repo) = create_test_repo();

        let favorites = repo.toggle(paris()).await.unwrap();
        assert_eq!(favorites.len(), 1);

        let favorites = repo.toggle(paris()).await.unwrap();
        assert!(favorites.is_empty());
        assert!(!repo.is_favorite(48.8566, 2.3522));
    }

    #[tokio::test]
    async fn test_clear_empties_store_and_cache() {
        let (backend, repo) = create_test_repo();
        repo.add(paris()).await.unwrap();
        repo.add(oslo()).await.unwrap();
        assert_eq!(repo.list().len(), 2);

        repo.clear().await.unwrap();
        assert!(repo.list().is_empty());
        assert!(backend.is_empty());
    }

    #[tokio::test]
    async fn test_write_failure_is_surfaced_and_state_kept() {
        let (backend, repo) = create_test_repo();
        repo.add(paris()).await.unwrap();
        let before = repo.list();

        backend.set_fail_writes(true);
        let result = repo.add(oslo()).await;
        assert!(matches!(result, Err(FavoritesError::Persist(_))));

        assert_eq!(repo.list(), before);
        assert_eq!(persisted(&backend), before);
    }

    #[tokio::test]
    async fn test_non_finite_coordinates_are_rejected() {
        let (backend, repo) = create_test_repo();
        repo.add(paris()).await.unwrap();
        repo.add(oslo()).await.unwrap();
        let before = repo.list();

        for (lat, lon) in [(f64::NAN, 1.0), (1.0, f64::INFINITY), (f64::NEG_INFINITY, 0.0)] {
            let result = repo.add(NewFavorite::new("Nowhere", lat, lon, "XX")).await;
            assert!(matches!(result, Err(FavoritesError::InvalidCoordinates { .. })));
            assert_eq!(repo.list(), before);
            assert_eq!(persisted(&backend), before);
        }

        let favorites = repo
            .add(NewFavorite::new("Rome", 41.9028, 12.4964, "IT"))
            .await
            .unwrap();
        let names: Vec<&str> = favorites.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, vec!["Paris", "Oslo", "Rome"]);
        assert_eq!(persisted(&backend), favorites);
    }

    #[tokio::test]
    async fn test_toggle_rejects_non_finite_coordinates() {
        let (_, repo) = create_test_repo();
        let result = repo.toggle(NewFavorite::new("Nowhere", f64::NAN, f64::NAN, "XX")).await;
        assert!(matches!(result, Err(FavoritesError::InvalidCoordinates { .. })));
        assert!(repo.list().is_empty());
    }

    #[test]
    fn test_corrupt_store_lists_empty() {
        let (backend, repo) = create_test_repo();
        backend.set(FAVORITES_STORAGE_KEY, "[{\"id\": 12").unwrap();
        assert!(repo.list().is_empty());
    }

    #[tokio::test]
    async fn test_add_over_corrupt_store_replaces_payload() {
        let (backend, repo) = create_test_repo();
        backend.set(FAVORITES_STORAGE_KEY, "garbage").unwrap();

        let favorites = repo.add(paris()).await.unwrap();
        assert_eq!(favorites.len(), 1);
        assert_eq!(persisted(&backend), favorites);
    }

    #[tokio::test]
    async fn test_custom_storage_key() {
        let backend = Arc::new(MemoryStore::new());
        let repo = FavoritesRepository::with_storage_key(
            PersistentStore::new(backend.clone()),
            Arc::new(QueryClient::new()),
            "profile-1/favorites",
        );
        repo.add(paris()).await.unwrap();

        let store = PersistentStore::new(backend.clone());
        assert!(store
            .read::<Vec<FavoriteCity>>(FAVORITES_STORAGE_KEY, Vec::new())
            .is_empty());
        assert_eq!(
            store
                .read::<Vec<FavoriteCity>>("profile-1/favorites", Vec::new())
                .len(),
            1
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_adds_keep_every_city() {
        let (_, repo) = create_test_repo();

        let handles: Vec<_> = (0..20_i32)
            .map(|i| {
                let repo = repo.clone();
                let city = NewFavorite::new(format!("City {i}"), f64::from(i), f64::from(i) * 2.0, "XX");
                tokio::spawn(async move { repo.add(city).await })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(repo.list().len(), 20);
    }
}
