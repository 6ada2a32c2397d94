//! # Data Model
//!
//! Rust mirrors of the rows owned by the hosted backend. Field names match the
//! backend columns so rows round-trip through `serde_json` unchanged.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::StoryTrackError;

/// A catalog entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Book {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub authors: Vec<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub isbn: Option<String>,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub average_rating: Option<f64>,
    #[serde(default)]
    pub ratings_count: i64,
}

/// Reading progress of one user on one book.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ReadStatus {
    #[default]
    None,
    Reading,
    Finished,
}

impl ReadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReadStatus::None => "none",
            ReadStatus::Reading => "reading",
            ReadStatus::Finished => "finished",
        }
    }
}

impl fmt::Display for ReadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ReadStatus {
    type Err = StoryTrackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(ReadStatus::None),
            "reading" => Ok(ReadStatus::Reading),
            "finished" | "read" => Ok(ReadStatus::Finished),
            other => Err(StoryTrackError::Validation(format!(
                "unknown read status '{other}' (expected none, reading or finished)"
            ))),
        }
    }
}

/// The `(user_id, book_id)` join row carrying per-user state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UserBook {
    pub user_id: String,
    pub book_id: String,
    #[serde(default)]
    pub read_status: ReadStatus,
    #[serde(default)]
    pub rating: Option<u8>,
    #[serde(default)]
    pub favorite: bool,
    #[serde(default)]
    pub order: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl UserBook {
    /// A blank row for a pair that has never been written.
    pub fn new(user_id: &str, book_id: &str) -> Self {
        Self {
            user_id: user_id.to_string(),
            book_id: book_id.to_string(),
            read_status: ReadStatus::None,
            rating: None,
            favorite: false,
            order: 0,
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Comment {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub user_id: String,
    pub book_id: String,
    pub content: String,
    #[serde(default)]
    pub mentions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Profile {
    pub id: String,
    pub username: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
    #[serde(default)]
    pub favorite_genres: Vec<String>,
}

/// Thumbs up / down on a recommendation.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Feedback {
    Like,
    Dislike,
}

impl FromStr for Feedback {
    type Err = StoryTrackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "like" | "up" => Ok(Feedback::Like),
            "dislike" | "down" => Ok(Feedback::Dislike),
            other => Err(StoryTrackError::Validation(format!(
                "unknown feedback '{other}' (expected like or dislike)"
            ))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Recommendation {
    pub user_id: String,
    pub book_id: String,
    pub score: f64,
    pub reason: String,
    #[serde(default)]
    pub feedback: Option<Feedback>,
    #[serde(default)]
    pub is_dismissed: bool,
    pub created_at: DateTime<Utc>,
}

/// A recommendation joined with its catalog entry.
#[derive(Debug, Clone, PartialEq)]
pub struct RecommendedBook {
    pub recommendation: Recommendation,
    pub book: Book,
}

/// One page of rows plus the backend's exact total, when it was requested.
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub rows: Vec<T>,
    pub total: Option<usize>,
}

impl<T> Page<T> {
    pub fn new(rows: Vec<T>, total: Option<usize>) -> Self {
        Self { rows, total }
    }
}

/// Sort orders offered by the catalog view.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CatalogSort {
    #[default]
    Title,
    Rating,
    Popular,
}

impl FromStr for CatalogSort {
    type Err = StoryTrackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "title" => Ok(CatalogSort::Title),
            "rating" => Ok(CatalogSort::Rating),
            "popular" => Ok(CatalogSort::Popular),
            other => Err(StoryTrackError::Validation(format!(
                "unknown sort '{other}' (expected title, rating or popular)"
            ))),
        }
    }
}

/// Server-side catalog filters.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct CatalogFilter {
    #[serde(default)]
    pub genre: Option<String>,
    #[serde(default)]
    pub title_contains: Option<String>,
    #[serde(default)]
    pub sort: CatalogSort,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_read_status_serializes_as_lowercase() {
        let row = UserBook {
            read_status: ReadStatus::Reading,
            ..UserBook::new("u1", "b1")
        };
        let value = serde_json::to_value(&row).unwrap();
        assert_eq!(value["read_status"], json!("reading"));
        assert!(value.get("updated_at").is_none());
    }

    #[test]
    fn test_book_defaults_missing_columns() {
        let book: Book = serde_json::from_value(json!({"id": "1", "title": "Dune"})).unwrap();
        assert!(book.authors.is_empty());
        assert_eq!(book.average_rating, None);
        assert_eq!(book.ratings_count, 0);
    }

    #[test]
    fn test_read_status_parsing() {
        assert_eq!("Finished".parse::<ReadStatus>().unwrap(), ReadStatus::Finished);
        assert!("skimmed".parse::<ReadStatus>().is_err());
    }
}
