//! # Recommendation Scoring
//!
//! The scoring heuristic behind the "recommended for you" list:
//! `50 + genreOverlap * 30 + ratingBonus`, capped at 100.

use crate::{
    constants::RECOMMENDATION_TTL_SECS,
    types::{Book, Profile, UserBook},
};
use chrono::{DateTime, Duration, Utc};
use std::collections::{HashMap, HashSet};

pub const BASE_SCORE: f64 = 50.0;
pub const GENRE_WEIGHT: f64 = 30.0;
pub const MAX_SCORE: f64 = 100.0;

/// Step bonus for the catalog's average rating.
pub fn rating_bonus(average_rating: Option<f64>) -> f64 {
    match average_rating {
        Some(r) if r >= 4.5 => 20.0,
        Some(r) if r >= 4.0 => 15.0,
        Some(r) if r >= 3.5 => 10.0,
        _ => 0.0,
    }
}

/// Fraction of the book's genres that the reader prefers.
pub fn genre_overlap(book: &Book, preferred: &[String]) -> f64 {
    if book.genres.is_empty() {
        return 0.0;
    }
    let preferred: HashSet<String> = preferred.iter().map(|g| g.to_lowercase()).collect();
    let matched = book
        .genres
        .iter()
        .filter(|g| preferred.contains(&g.to_lowercase()))
        .count();
    matched as f64 / book.genres.len() as f64
}

pub fn score_book(book: &Book, preferred: &[String]) -> f64 {
    let score =
        BASE_SCORE + genre_overlap(book, preferred) * GENRE_WEIGHT + rating_bonus(book.average_rating);
    score.min(MAX_SCORE)
}

/// A one-line explanation shown next to the recommendation.
pub fn build_reason(book: &Book, preferred: &[String]) -> String {
    let preferred: HashSet<String> = preferred.iter().map(|g| g.to_lowercase()).collect();
    let matching: Vec<&str> = book
        .genres
        .iter()
        .filter(|g| preferred.contains(&g.to_lowercase()))
        .map(String::as_str)
        .take(2)
        .collect();

    let rating_note = match book.average_rating {
        Some(r) if r >= 4.0 => Some(format!("highly rated ({r:.1}★)")),
        _ => None,
    };

    match (matching.as_slice(), rating_note) {
        ([], Some(note)) => format!("Popular pick: {note}"),
        ([], None) => "Popular with StoryTrack readers".to_string(),
        (genres, Some(note)) => format!("Because you enjoy {} and it's {note}", genres.join(" and ")),
        (genres, None) => format!("Because you enjoy {}", genres.join(" and ")),
    }
}

/// The reader's preferred genres, most frequent first.
///
/// Profile favourites count double; genres of favourited books and books
/// rated 4 or higher count once each.
pub fn preferred_genres(
    profile: Option<&Profile>,
    user_books: &[UserBook],
    books: &[Book],
) -> Vec<String> {
    let by_id: HashMap<&str, &Book> = books.iter().map(|b| (b.id.as_str(), b)).collect();
    let mut weights: HashMap<String, (usize, usize)> = HashMap::new();
    let mut next_seen = 0;
    let mut bump = |genre: &str, amount: usize| {
        let entry = weights.entry(genre.to_string()).or_insert_with(|| {
            next_seen += 1;
            (0, next_seen)
        });
        entry.0 += amount;
    };

    if let Some(profile) = profile {
        for genre in &profile.favorite_genres {
            bump(genre, 2);
        }
    }
    for entry in user_books {
        let liked = entry.favorite || entry.rating.is_some_and(|r| r >= 4);
        if !liked {
            continue;
        }
        if let Some(book) = by_id.get(entry.book_id.as_str()) {
            for genre in &book.genres {
                bump(genre, 1);
            }
        }
    }

    let mut ranked: Vec<(String, (usize, usize))> = weights.into_iter().collect();
    // Heavier first; first-seen breaks ties so the order is stable.
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0).then(a.1 .1.cmp(&b.1 .1)));
    ranked.into_iter().map(|(genre, _)| genre).collect()
}

/// Whether a recommendation set created at `newest` must be recomputed.
pub fn is_stale(newest: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match newest {
        Some(created_at) => now - created_at > Duration::seconds(RECOMMENDATION_TTL_SECS),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn book(genres: &[&str], rating: Option<f64>) -> Book {
        Book {
            id: "b".to_string(),
            title: "T".to_string(),
            authors: vec![],
            description: None,
            thumbnail: None,
            isbn: None,
            genres: genres.iter().map(|s| s.to_string()).collect(),
            average_rating: rating,
            ratings_count: 0,
        }
    }

    fn prefs(genres: &[&str]) -> Vec<String> {
        genres.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_score_table() {
        let cases = [
            (book(&["Horror"], Some(3.4)), prefs(&["Fantasy"]), 50.0),
            (book(&["Fantasy"], Some(4.8)), prefs(&["Fantasy"]), 100.0),
            (book(&["Fantasy", "Horror"], Some(4.1)), prefs(&["fantasy"]), 80.0),
            (book(&[], Some(3.6)), prefs(&["Fantasy"]), 60.0),
            (book(&["Fantasy"], None), prefs(&[]), 50.0),
        ];
        for (book, preferred, expected) in cases {
            assert_eq!(score_book(&book, &preferred), expected, "{book:?}");
        }
    }

    #[test]
    fn test_reason_mentions_matching_genres() {
        let reason = build_reason(&book(&["Fantasy", "Adventure"], Some(4.5)), &prefs(&["Adventure"]));
        assert_eq!(reason, "Because you enjoy Adventure and it's highly rated (4.5★)");
        assert_eq!(
            build_reason(&book(&["Horror"], None), &prefs(&["Fantasy"])),
            "Popular with StoryTrack readers"
        );
    }

    #[test]
    fn test_staleness_window() {
        let now = Utc::now();
        assert!(is_stale(None, now));
        assert!(!is_stale(Some(now - Duration::minutes(59)), now));
        assert!(is_stale(Some(now - Duration::minutes(61)), now));
    }

    #[test]
    fn test_preferred_genres_ranking() {
        let mut fantasy = book(&["Fantasy", "Adventure"], None);
        fantasy.id = "1".to_string();
        let mut horror = book(&["Horror"], None);
        horror.id = "2".to_string();

        let mut liked = UserBook::new("u", "1");
        liked.favorite = true;
        let mut meh = UserBook::new("u", "2");
        meh.rating = Some(2);

        let profile = Profile {
            id: "u".to_string(),
            username: "reader".to_string(),
            display_name: None,
            avatar_url: None,
            favorite_genres: vec!["Adventure".to_string()],
        };

        let genres = preferred_genres(Some(&profile), &[liked, meh], &[fantasy, horror]);
        assert_eq!(genres, vec!["Adventure".to_string(), "Fantasy".to_string()]);
    }
}
