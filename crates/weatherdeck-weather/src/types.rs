use chrono::Utc;
use serde::{Deserialize, Serialize};

/// Geographic coordinate pair. Identity of a favorite city.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lon: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lon: f64) -> Self {
        Self { lat, lon }
    }

    /// Derive the favorite id, `"<lat>-<lon>"`.
    ///
    /// Numbers use the shortest form that round-trips, written the way
    /// JavaScript prints numbers: `2.0` -> `"2"`, `48.8566` -> `"48.8566"`,
    /// `1e-7` -> `"1e-7"`, `1e21` -> `"1e+21"`. Negative zero is written as `0`.
    pub fn favorite_id(&self) -> String {
        format!("{}-{}", format_coordinate(self.lat), format_coordinate(self.lon))
    }

    /// True if neither axis is NaN or infinite.
    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lon.is_finite()
    }

    /// Exact match on both axes, no tolerance.
    pub fn matches(&self, lat: f64, lon: f64) -> bool {
        self.lat == lat && self.lon == lon
    }
}

fn format_coordinate(value: f64) -> String {
    // -0.0 == 0.0, so this folds negative zero into "0"
    if value == 0.0 {
        return "0".to_string();
    }
    let magnitude = value.abs();
    if magnitude < 1e-6 || magnitude >= 1e21 {
        let exp = format!("{value:e}");
        return match exp.split_once('e') {
            Some((mantissa, power)) if !power.starts_with('-') => format!("{mantissa}e+{power}"),
            _ => exp,
        };
    }
    value.to_string()
}

/// A user-saved city.
///
/// Entries are never edited after insertion; `id` always equals
/// `Coordinates::favorite_id()` of the entry's own `lat`/`lon`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FavoriteCity {
    pub id: String,
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub country: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Milliseconds since the Unix epoch
    pub added_at: i64,
}

impl FavoriteCity {
    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.lat, self.lon)
    }
}

/// Candidate for `FavoritesRepository::add`: a city without `id`/`added_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewFavorite {
    pub name: String,
    pub lat: f64,
    pub lon: f64,
    pub country: String,
    #[serde(default)]
    pub state: Option<String>,
}

impl NewFavorite {
    pub fn new(name: impl Into<String>, lat: f64, lon: f64, country: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            lat,
            lon,
            country: country.into(),
            state: None,
        }
    }

    /// Set the subdivision label (state, province, region).
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    pub fn coordinates(&self) -> Coordinates {
        Coordinates::new(self.lat, self.lon)
    }

    pub fn favorite_id(&self) -> String {
        self.coordinates().favorite_id()
    }

    /// Stamp the candidate with its derived id and the current time.
    pub fn into_favorite(self) -> FavoriteCity {
        self.into_favorite_at(Utc::now().timestamp_millis())
    }

    pub(crate) fn into_favorite_at(self, added_at: i64) -> FavoriteCity {
        FavoriteCity {
            id: self.favorite_id(),
            name: self.name,
            lat: self.lat,
            lon: self.lon,
            country: self.country,
            state: self.state,
            added_at,
        }
    }
}
