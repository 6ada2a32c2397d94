//! Per-user reading list rows (`user_books`).
//!
//! Every write reads the current row (or starts from a blank one) and upserts
//! the whole row on `(user_id, book_id)`, so a pair never has two rows.

use crate::{
    constants::{USER_BOOKS_TABLE, USER_BOOK_CONFLICT},
    errors::StoryTrackError,
    providers::backend::{decode_rows, encode_row, first_row, Query, TableProvider},
    types::{ReadStatus, UserBook},
};
use chrono::Utc;
use tracing::{debug, info};

pub async fn get_user_book(
    provider: &dyn TableProvider,
    user_id: &str,
    book_id: &str,
) -> Result<Option<UserBook>, StoryTrackError> {
    let query = Query::new()
        .eq("user_id", user_id)
        .eq("book_id", book_id)
        .limit(1);
    let result = provider.select(USER_BOOKS_TABLE, &query).await?;
    Ok(decode_rows(result.rows)?.into_iter().next())
}

/// The user's reading list in list order, optionally narrowed to one status.
pub async fn list_user_books(
    provider: &dyn TableProvider,
    user_id: &str,
    status: Option<ReadStatus>,
) -> Result<Vec<UserBook>, StoryTrackError> {
    let mut query = Query::new().eq("user_id", user_id);
    if let Some(status) = status {
        query = query.eq("read_status", status.as_str());
    }
    let result = provider
        .select(USER_BOOKS_TABLE, &query.order("order", true))
        .await?;
    decode_rows(result.rows)
}

/// The position a newly tracked book takes at the end of the list.
pub fn next_order(entries: &[UserBook]) -> i64 {
    entries.iter().map(|e| e.order + 1).max().unwrap_or(0)
}

async fn upsert_entry(
    provider: &dyn TableProvider,
    mut entry: UserBook,
) -> Result<UserBook, StoryTrackError> {
    entry.updated_at = Some(Utc::now());
    let rows = provider
        .upsert(USER_BOOKS_TABLE, vec![encode_row(&entry)?], USER_BOOK_CONFLICT)
        .await?;
    first_row(rows, USER_BOOKS_TABLE)
}

/// Reads the row for the pair, or a blank one appended to the end of the list.
async fn load_or_new(
    provider: &dyn TableProvider,
    user_id: &str,
    book_id: &str,
) -> Result<UserBook, StoryTrackError> {
    if let Some(existing) = get_user_book(provider, user_id, book_id).await? {
        return Ok(existing);
    }
    let entries = list_user_books(provider, user_id, None).await?;
    Ok(UserBook {
        order: next_order(&entries),
        ..UserBook::new(user_id, book_id)
    })
}

pub async fn set_read_status(
    provider: &dyn TableProvider,
    user_id: &str,
    book_id: &str,
    status: ReadStatus,
) -> Result<UserBook, StoryTrackError> {
    let mut entry = load_or_new(provider, user_id, book_id).await?;
    entry.read_status = status;
    debug!(user_id, book_id, %status, "Setting read status");
    upsert_entry(provider, entry).await
}

/// Rates a book from 1 to 5 stars.
pub async fn set_rating(
    provider: &dyn TableProvider,
    user_id: &str,
    book_id: &str,
    rating: u8,
) -> Result<UserBook, StoryTrackError> {
    if !(1..=5).contains(&rating) {
        return Err(StoryTrackError::Validation(format!(
            "rating must be between 1 and 5, got {rating}"
        )));
    }
    let mut entry = load_or_new(provider, user_id, book_id).await?;
    entry.rating = Some(rating);
    upsert_entry(provider, entry).await
}

pub async fn set_favorite(
    provider: &dyn TableProvider,
    user_id: &str,
    book_id: &str,
    favorite: bool,
) -> Result<UserBook, StoryTrackError> {
    let mut entry = load_or_new(provider, user_id, book_id).await?;
    entry.favorite = favorite;
    upsert_entry(provider, entry).await
}

/// Rewrites list positions so `ordered_book_ids[i]` gets `order = i`.
///
/// Books not yet tracked are added with default state.
pub async fn reorder_reading_list(
    provider: &dyn TableProvider,
    user_id: &str,
    ordered_book_ids: &[String],
) -> Result<Vec<UserBook>, StoryTrackError> {
    if ordered_book_ids.is_empty() {
        return Ok(Vec::new());
    }
    let existing = list_user_books(provider, user_id, None).await?;
    let now = Utc::now();

    let rows = ordered_book_ids
        .iter()
        .enumerate()
        .map(|(index, book_id)| {
            let mut entry = existing
                .iter()
                .find(|e| &e.book_id == book_id)
                .cloned()
                .unwrap_or_else(|| UserBook::new(user_id, book_id));
            entry.order = index as i64;
            entry.updated_at = Some(now);
            encode_row(&entry)
        })
        .collect::<Result<Vec<_>, _>>()?;

    let stored = provider
        .upsert(USER_BOOKS_TABLE, rows, USER_BOOK_CONFLICT)
        .await?;
    info!(user_id, count = ordered_book_ids.len(), "Reordered reading list");
    let mut entries: Vec<UserBook> = decode_rows(stored)?;
    entries.sort_by_key(|e| e.order);
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_next_order_appends() {
        assert_eq!(next_order(&[]), 0);
        let entries = [
            UserBook {
                order: 3,
                ..UserBook::new("u", "a")
            },
            UserBook {
                order: 1,
                ..UserBook::new("u", "b")
            },
        ];
        assert_eq!(next_order(&entries), 4);
    }
}
