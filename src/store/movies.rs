//! In-memory movie catalog.

use std::collections::BTreeMap;
use std::sync::RwLock;

use chrono::{Datelike, Utc};
use serde::{Deserialize, Serialize};

use crate::store::StoreError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Movie {
    pub id: i64,
    pub title: String,
    pub year: i32,
    /// Runtime in minutes.
    pub runtime: i32,
    pub genres: Vec<String>,
    pub version: i32,
}

/// Request body for creating a movie.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct NewMovie {
    pub title: String,
    pub year: i32,
    pub runtime: i32,
    pub genres: Vec<String>,
}

impl NewMovie {
    /// Field-level problems, keyed by field name. Empty when valid.
    pub fn validate(&self) -> BTreeMap<&'static str, &'static str> {
        validate_fields(&self.title, self.year, self.runtime, &self.genres)
    }
}

/// Request body for a partial update. Absent fields keep their current value.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MoviePatch {
    pub title: Option<String>,
    pub year: Option<i32>,
    pub runtime: Option<i32>,
    pub genres: Option<Vec<String>>,
}

impl MoviePatch {
    pub fn apply_to(self, movie: &mut Movie) {
        if let Some(title) = self.title {
            movie.title = title;
        }
        if let Some(year) = self.year {
            movie.year = year;
        }
        if let Some(runtime) = self.runtime {
            movie.runtime = runtime;
        }
        if let Some(genres) = self.genres {
            movie.genres = genres;
        }
    }
}

impl Movie {
    pub fn validate(&self) -> BTreeMap<&'static str, &'static str> {
        validate_fields(&self.title, self.year, self.runtime, &self.genres)
    }
}

fn validate_fields(title: &str, year: i32, runtime: i32, genres: &[String]) -> BTreeMap<&'static str, &'static str> {
    let mut errors = BTreeMap::new();
    if title.trim().is_empty() {
        errors.insert("title", "must be provided");
    } else if title.len() > 500 {
        errors.insert("title", "must not be more than 500 bytes long");
    }
    if year < 1888 {
        errors.insert("year", "must be greater than 1888");
    } else if year > Utc::now().year() {
        errors.insert("year", "must not be in the future");
    }
    if runtime <= 0 {
        errors.insert("runtime", "must be a positive integer");
    }
    if genres.is_empty() || genres.len() > 5 {
        errors.insert("genres", "must contain between 1 and 5 genres");
    } else {
        let mut seen = genres.to_vec();
        seen.sort_unstable();
        seen.dedup();
        if seen.len() != genres.len() {
            errors.insert("genres", "must not contain duplicate values");
        }
    }
    errors
}

#[derive(Default)]
struct CatalogInner {
    movies: BTreeMap<i64, Movie>,
    next_id: i64,
}

/// Movies keyed by id, listed in id order.
#[derive(Default)]
pub struct MovieCatalog {
    inner: RwLock<CatalogInner>,
}

impl MovieCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, new: NewMovie) -> Result<Movie, StoreError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        inner.next_id += 1;
        let movie = Movie {
            id: inner.next_id,
            title: new.title,
            year: new.year,
            runtime: new.runtime,
            genres: new.genres,
            version: 1,
        };
        inner.movies.insert(movie.id, movie.clone());
        Ok(movie)
    }

    pub fn get(&self, id: i64) -> Result<Movie, StoreError> {
        let inner = self.inner.read().map_err(poisoned)?;
        inner.movies.get(&id).cloned().ok_or(StoreError::RecordNotFound)
    }

    pub fn list(&self) -> Result<Vec<Movie>, StoreError> {
        let inner = self.inner.read().map_err(poisoned)?;
        Ok(inner.movies.values().cloned().collect())
    }

    /// Store `movie` over the current record and bump its version.
    ///
    /// `movie.version` must match the stored version; otherwise, or if the
    /// record is gone, the result is [`StoreError::EditConflict`].
    pub fn update(&self, movie: &Movie) -> Result<Movie, StoreError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        let stored = inner
            .movies
            .get_mut(&movie.id)
            .filter(|stored| stored.version == movie.version)
            .ok_or(StoreError::EditConflict)?;

        *stored = Movie {
            version: movie.version + 1,
            ..movie.clone()
        };
        Ok(stored.clone())
    }

    pub fn delete(&self, id: i64) -> Result<(), StoreError> {
        let mut inner = self.inner.write().map_err(poisoned)?;
        inner
            .movies
            .remove(&id)
            .map(|_| ())
            .ok_or(StoreError::RecordNotFound)
    }
}

fn poisoned<T>(_: std::sync::PoisonError<T>) -> StoreError {
    StoreError::Backend("movie catalog lock poisoned".to_string())
}
