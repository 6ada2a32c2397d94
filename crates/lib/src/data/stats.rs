//! Personal reading statistics.

use crate::{
    constants::COMMENTS_TABLE,
    data::{books::fetch_books_by_ids, library::list_user_books},
    errors::StoryTrackError,
    providers::backend::{Query, TableProvider},
    types::{Book, ReadStatus, UserBook},
};
use serde::Serialize;
use std::collections::HashMap;

const TOP_N: usize = 5;

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct ReadingStats {
    pub total_tracked: usize,
    pub reading: usize,
    pub finished: usize,
    pub favorites: usize,
    pub rated: usize,
    /// Mean of the ratings the user gave; `None` when there are none.
    pub average_rating: Option<f64>,
    /// `rating_histogram[i]` counts ratings of `i + 1` stars.
    pub rating_histogram: [usize; 5],
    pub top_genres: Vec<(String, usize)>,
    pub top_authors: Vec<(String, usize)>,
    pub comments_posted: usize,
    /// `finished / total_tracked`, 0 when nothing is tracked.
    pub completion_rate: f64,
}

fn top_counts<'a>(values: impl Iterator<Item = &'a String>) -> Vec<(String, usize)> {
    let mut counts: HashMap<&str, usize> = HashMap::new();
    for value in values {
        *counts.entry(value.as_str()).or_default() += 1;
    }
    let mut ranked: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(name, count)| (name.to_string(), count))
        .collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.truncate(TOP_N);
    ranked
}

pub fn compute_stats(user_books: &[UserBook], books: &[Book], comments_count: usize) -> ReadingStats {
    let by_id: HashMap<&str, &Book> = books.iter().map(|b| (b.id.as_str(), b)).collect();

    let total_tracked = user_books.len();
    let reading = user_books
        .iter()
        .filter(|e| e.read_status == ReadStatus::Reading)
        .count();
    let finished = user_books
        .iter()
        .filter(|e| e.read_status == ReadStatus::Finished)
        .count();
    let favorites = user_books.iter().filter(|e| e.favorite).count();

    let ratings: Vec<u8> = user_books
        .iter()
        .filter_map(|e| e.rating)
        .filter(|r| (1..=5).contains(r))
        .collect();
    let mut rating_histogram = [0usize; 5];
    for rating in &ratings {
        rating_histogram[usize::from(*rating) - 1] += 1;
    }
    let average_rating = (!ratings.is_empty())
        .then(|| ratings.iter().map(|r| f64::from(*r)).sum::<f64>() / ratings.len() as f64);

    // Finished or favourited books describe taste better than the whole list.
    let liked: Vec<&Book> = user_books
        .iter()
        .filter(|e| e.favorite || e.read_status == ReadStatus::Finished)
        .filter_map(|e| by_id.get(e.book_id.as_str()).copied())
        .collect();

    ReadingStats {
        total_tracked,
        reading,
        finished,
        favorites,
        rated: ratings.len(),
        average_rating,
        rating_histogram,
        top_genres: top_counts(liked.iter().flat_map(|b| b.genres.iter())),
        top_authors: top_counts(liked.iter().flat_map(|b| b.authors.iter())),
        comments_posted: comments_count,
        completion_rate: if total_tracked == 0 {
            0.0
        } else {
            finished as f64 / total_tracked as f64
        },
    }
}

/// Loads the user's rows and computes their statistics.
pub async fn load_stats(
    provider: &dyn TableProvider,
    user_id: &str,
) -> Result<ReadingStats, StoryTrackError> {
    let user_books = list_user_books(provider, user_id, None).await?;
    let ids: Vec<String> = user_books.iter().map(|e| e.book_id.clone()).collect();
    let books = fetch_books_by_ids(provider, &ids).await?;

    let comments = provider
        .select(
            COMMENTS_TABLE,
            &Query::new().eq("user_id", user_id).limit(1).with_count(),
        )
        .await?;
    let comments_count = comments.total.unwrap_or(comments.rows.len());

    Ok(compute_stats(&user_books, &books, comments_count))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(id: &str, author: &str, genres: &[&str]) -> Book {
        Book {
            id: id.to_string(),
            title: id.to_uppercase(),
            authors: vec![author.to_string()],
            description: None,
            thumbnail: None,
            isbn: None,
            genres: genres.iter().map(|s| s.to_string()).collect(),
            average_rating: None,
            ratings_count: 0,
        }
    }

    #[test]
    fn test_empty_library() {
        let stats = compute_stats(&[], &[], 0);
        assert_eq!(stats.total_tracked, 0);
        assert_eq!(stats.average_rating, None);
        assert_eq!(stats.completion_rate, 0.0);
    }

    #[test]
    fn test_counts_and_histogram() {
        let books = [
            book("a", "Le Guin", &["Fantasy", "Classic"]),
            book("b", "Le Guin", &["Sci-Fi"]),
            book("c", "Herbert", &["Sci-Fi"]),
            book("d", "Austen", &["Romance"]),
        ];
        let entries = [
            UserBook {
                read_status: ReadStatus::Finished,
                rating: Some(5),
                ..UserBook::new("u", "a")
            },
            UserBook {
                read_status: ReadStatus::Finished,
                rating: Some(4),
                ..UserBook::new("u", "b")
            },
            UserBook {
                favorite: true,
                read_status: ReadStatus::Reading,
                ..UserBook::new("u", "c")
            },
            UserBook {
                rating: Some(4),
                ..UserBook::new("u", "d")
            },
        ];

        let stats = compute_stats(&entries, &books, 7);
        assert_eq!(stats.total_tracked, 4);
        assert_eq!(stats.reading, 1);
        assert_eq!(stats.finished, 2);
        assert_eq!(stats.favorites, 1);
        assert_eq!(stats.rated, 3);
        assert_eq!(stats.rating_histogram, [0, 0, 0, 2, 1]);
        assert!((stats.average_rating.unwrap() - 13.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.top_genres[0], ("Sci-Fi".to_string(), 2));
        assert_eq!(stats.top_authors[0], ("Le Guin".to_string(), 2));
        assert!(!stats.top_genres.iter().any(|(g, _)| g == "Romance"));
        assert_eq!(stats.comments_posted, 7);
        assert_eq!(stats.completion_rate, 0.5);
    }
}
