//! Storage, cache and favorites error types.

use thiserror::Error;

/// Errors raised by a key-value store backend or the JSON adapter on top of it.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

impl StoreError {
    pub fn backend(message: impl Into<String>) -> Self {
        Self::Backend(message.into())
    }

    /// User-friendly error message for UI display.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Backend(_) | Self::Sqlite(_) => "Unable to save local data. Please try again.",
            Self::Serialize(_) => "Local data could not be encoded.",
        }
    }
}

/// Errors raised by `QueryClient`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    #[error("Cached value for query {key} has a different type")]
    TypeMismatch { key: String },
}

/// Errors surfaced by `FavoritesRepository` mutations.
#[derive(Error, Debug)]
pub enum FavoritesError {
    #[error("Failed to persist favorites: {0}")]
    Persist(#[from] StoreError),

    #[error("Invalid coordinates: lat={lat}, lon={lon}")]
    InvalidCoordinates { lat: f64, lon: f64 },
}

impl FavoritesError {
    /// User-friendly error message for UI display.
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Persist(_) => "Your favorites could not be saved. Please try again.",
            Self::InvalidCoordinates { .. } => "This location has no valid coordinates.",
        }
    }
}
