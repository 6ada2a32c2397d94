//! Stored recommendations, recomputed client-side once they go stale.

use crate::{
    constants::{RECOMMENDATIONS_TABLE, USER_BOOK_CONFLICT},
    data::{
        books::{fetch_all_books, fetch_books_by_ids},
        library::list_user_books,
        profiles::get_profile,
    },
    errors::StoryTrackError,
    providers::backend::{decode_rows, encode_row, Query, TableProvider},
    recommend::{build_reason, is_stale, preferred_genres, score_book},
    types::{Book, Feedback, Recommendation, RecommendedBook},
};
use chrono::{DateTime, Utc};
use serde_json::json;
use std::collections::{HashMap, HashSet};
use tracing::{debug, info};

async fn load_rows(
    provider: &dyn TableProvider,
    user_id: &str,
) -> Result<Vec<Recommendation>, StoryTrackError> {
    let query = Query::new().eq("user_id", user_id);
    let result = provider.select(RECOMMENDATIONS_TABLE, &query).await?;
    decode_rows(result.rows)
}

fn by_rank(a: &(Recommendation, Book), b: &(Recommendation, Book)) -> std::cmp::Ordering {
    b.0.score
        .total_cmp(&a.0.score)
        .then(b.1.ratings_count.cmp(&a.1.ratings_count))
        .then_with(|| a.1.title.cmp(&b.1.title))
}

/// Returns up to `limit` recommendations for the user, recomputing them first
/// when the newest stored row is older than an hour.
pub async fn get_recommendations(
    provider: &dyn TableProvider,
    user_id: &str,
    now: DateTime<Utc>,
    limit: usize,
) -> Result<Vec<RecommendedBook>, StoryTrackError> {
    let existing = load_rows(provider, user_id).await?;
    let newest = existing
        .iter()
        .filter(|r| !r.is_dismissed)
        .map(|r| r.created_at)
        .max();

    if !is_stale(newest, now) {
        debug!(user_id, "Recommendations are fresh");
        let fresh: Vec<Recommendation> = existing
            .into_iter()
            .filter(|r| !r.is_dismissed && !is_stale(Some(r.created_at), now))
            .collect();
        let ids: Vec<String> = fresh.iter().map(|r| r.book_id.clone()).collect();
        let books = fetch_books_by_ids(provider, &ids).await?;
        let by_id: HashMap<&str, &Book> = books.iter().map(|b| (b.id.as_str(), b)).collect();
        let mut joined: Vec<(Recommendation, Book)> = fresh
            .into_iter()
            .filter_map(|r| {
                let book = (*by_id.get(r.book_id.as_str())?).clone();
                Some((r, book))
            })
            .collect();
        joined.sort_by(by_rank);
        joined.truncate(limit);
        return Ok(joined
            .into_iter()
            .map(|(recommendation, book)| RecommendedBook {
                recommendation,
                book,
            })
            .collect());
    }

    info!(user_id, "Recomputing stale recommendations");
    let books = fetch_all_books(provider).await?;
    let user_books = list_user_books(provider, user_id, None).await?;
    let profile = get_profile(provider, user_id).await?;
    let preferred = preferred_genres(profile.as_ref(), &user_books, &books);

    let tracked: HashSet<&str> = user_books.iter().map(|e| e.book_id.as_str()).collect();
    let excluded: HashSet<&str> = existing
        .iter()
        .filter(|r| r.is_dismissed || r.feedback == Some(Feedback::Dislike))
        .map(|r| r.book_id.as_str())
        .collect();
    let previous_feedback: HashMap<&str, Feedback> = existing
        .iter()
        .filter_map(|r| Some((r.book_id.as_str(), r.feedback?)))
        .collect();

    let mut ranked: Vec<(Recommendation, Book)> = books
        .iter()
        .filter(|b| !tracked.contains(b.id.as_str()) && !excluded.contains(b.id.as_str()))
        .map(|book| {
            let recommendation = Recommendation {
                user_id: user_id.to_string(),
                book_id: book.id.clone(),
                score: score_book(book, &preferred),
                reason: build_reason(book, &preferred),
                feedback: previous_feedback.get(book.id.as_str()).copied(),
                is_dismissed: false,
                created_at: now,
            };
            (recommendation, book.clone())
        })
        .collect();
    ranked.sort_by(by_rank);
    ranked.truncate(limit);

    if !ranked.is_empty() {
        let rows = ranked
            .iter()
            .map(|(r, _)| encode_row(r))
            .collect::<Result<Vec<_>, _>>()?;
        provider
            .upsert(RECOMMENDATIONS_TABLE, rows, USER_BOOK_CONFLICT)
            .await?;
    }
    info!(user_id, count = ranked.len(), "Stored recommendations");

    Ok(ranked
        .into_iter()
        .map(|(recommendation, book)| RecommendedBook {
            recommendation,
            book,
        })
        .collect())
}

async fn patch_recommendation(
    provider: &dyn TableProvider,
    user_id: &str,
    book_id: &str,
    patch: serde_json::Value,
) -> Result<(), StoryTrackError> {
    let query = Query::new().eq("user_id", user_id).eq("book_id", book_id);
    let updated = provider.update(RECOMMENDATIONS_TABLE, &query, patch).await?;
    if updated.is_empty() {
        return Err(StoryTrackError::NotFound(format!(
            "no recommendation for book '{book_id}'"
        )));
    }
    Ok(())
}

/// Hides a recommendation; dismissed books are never recommended again.
pub async fn dismiss_recommendation(
    provider: &dyn TableProvider,
    user_id: &str,
    book_id: &str,
) -> Result<(), StoryTrackError> {
    patch_recommendation(provider, user_id, book_id, json!({ "is_dismissed": true })).await
}

pub async fn set_feedback(
    provider: &dyn TableProvider,
    user_id: &str,
    book_id: &str,
    feedback: Feedback,
) -> Result<(), StoryTrackError> {
    patch_recommendation(provider, user_id, book_id, json!({ "feedback": feedback })).await
}
