//! # Data Access Tests
//!
//! Runs the catalog, reading-list, comment and stats functions against the
//! in-memory backend.

mod common;

use common::setup_tracing;
use serde_json::json;
use storytrack::constants::{COMMENTS_TABLE, PROFILES_TABLE, USER_BOOKS_TABLE};
use storytrack::data::{self, load_stats};
use storytrack::errors::StoryTrackError;
use storytrack::types::{CatalogFilter, CatalogSort, ReadStatus};
use storytrack_test_utils::MockBackend;

#[tokio::test]
async fn test_fetch_books_pages_and_counts() {
    setup_tracing();
    let backend = MockBackend::with_catalog();

    let page = data::fetch_books(&backend, &CatalogFilter::default(), 3, 5)
        .await
        .unwrap();
    assert_eq!(page.pagination.total_items, 13);
    assert_eq!(page.pagination.total_pages(), 3);
    assert_eq!(page.items.len(), 3);
    assert!(!page.pagination.has_next());
    // Title order: the last page holds the tail of the alphabet.
    assert_eq!(page.items.last().unwrap().title, "Twilight");
}

#[tokio::test]
async fn test_fetch_books_filters_by_genre_and_title() {
    setup_tracing();
    let backend = MockBackend::with_catalog();
    let filter = CatalogFilter {
        genre: Some("Fantasy".to_string()),
        title_contains: None,
        sort: CatalogSort::Rating,
    };

    let page = data::fetch_books(&backend, &filter, 1, 12).await.unwrap();
    let titles: Vec<&str> = page.items.iter().map(|b| b.title.as_str()).collect();
    assert_eq!(titles[0], "The Hobbit");
    assert_eq!(page.pagination.total_items, 5);
    assert!(page.items.iter().all(|b| b.genres.contains(&"Fantasy".to_string())));

    let filter = CatalogFilter {
        title_contains: Some("the".to_string()),
        ..CatalogFilter::default()
    };
    let page = data::fetch_books(&backend, &filter, 1, 12).await.unwrap();
    assert_eq!(page.pagination.total_items, 4);
}

#[tokio::test]
async fn test_get_book_and_fetch_by_ids() {
    setup_tracing();
    let backend = MockBackend::with_catalog();

    let dune = data::get_book(&backend, "2").await.unwrap().unwrap();
    assert_eq!(dune.title, "Dune");
    assert!(data::get_book(&backend, "404").await.unwrap().is_none());

    let books = data::fetch_books_by_ids(&backend, &["1".to_string(), "404".to_string()])
        .await
        .unwrap();
    assert_eq!(books.len(), 1);
    assert!(data::fetch_books_by_ids(&backend, &[]).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_repeated_writes_keep_one_row_per_pair() {
    setup_tracing();
    let backend = MockBackend::with_catalog();

    data::set_favorite(&backend, "u1", "1", true).await.unwrap();
    data::set_read_status(&backend, "u1", "1", ReadStatus::Reading)
        .await
        .unwrap();
    let entry = data::set_rating(&backend, "u1", "1", 5).await.unwrap();

    assert_eq!(backend.rows(USER_BOOKS_TABLE).len(), 1);
    assert!(entry.favorite);
    assert_eq!(entry.read_status, ReadStatus::Reading);
    assert_eq!(entry.rating, Some(5));
}

#[tokio::test]
async fn test_new_entries_append_to_the_list() {
    setup_tracing();
    let backend = MockBackend::with_catalog();

    data::set_favorite(&backend, "u1", "3", true).await.unwrap();
    data::set_read_status(&backend, "u1", "1", ReadStatus::Finished)
        .await
        .unwrap();
    data::set_rating(&backend, "u2", "1", 2).await.unwrap();

    let list = data::list_user_books(&backend, "u1", None).await.unwrap();
    let ids: Vec<&str> = list.iter().map(|e| e.book_id.as_str()).collect();
    assert_eq!(ids, vec!["3", "1"]);
    assert_eq!(list[1].order, 1);

    let finished = data::list_user_books(&backend, "u1", Some(ReadStatus::Finished))
        .await
        .unwrap();
    assert_eq!(finished.len(), 1);
}

#[tokio::test]
async fn test_rating_out_of_range_is_rejected() {
    setup_tracing();
    let backend = MockBackend::with_catalog();

    for rating in [0, 6] {
        let result = data::set_rating(&backend, "u1", "1", rating).await;
        assert!(matches!(result, Err(StoryTrackError::Validation(_))));
    }
    assert!(backend.rows(USER_BOOKS_TABLE).is_empty());
}

#[tokio::test]
async fn test_reorder_reading_list() {
    setup_tracing();
    let backend = MockBackend::with_catalog();
    for id in ["1", "2", "3"] {
        data::set_favorite(&backend, "u1", id, true).await.unwrap();
    }

    let order = vec!["3".to_string(), "1".to_string(), "2".to_string()];
    data::reorder_reading_list(&backend, "u1", &order).await.unwrap();

    let list = data::list_user_books(&backend, "u1", None).await.unwrap();
    let ids: Vec<&str> = list.iter().map(|e| e.book_id.as_str()).collect();
    assert_eq!(ids, vec!["3", "1", "2"]);
    assert!(list.iter().all(|e| e.favorite));
    assert_eq!(backend.rows(USER_BOOKS_TABLE).len(), 3);
}

#[tokio::test]
async fn test_post_comment_resolves_mentions() {
    setup_tracing();
    let backend = MockBackend::with_catalog();
    backend.seed(
        PROFILES_TABLE,
        vec![
            json!({"id": "u2", "username": "bilbo"}),
            json!({"id": "u3", "username": "frodo"}),
        ],
    );

    let comment = data::post_comment(
        &backend,
        "u1",
        "1",
        "  @frodo you must read this, @nobody_here and @bilbo agree. @frodo!  ",
    )
    .await
    .unwrap();

    assert!(comment.id.is_some());
    assert!(comment.created_at.is_some());
    assert_eq!(comment.mentions, vec!["u3", "u2"]);
    assert!(comment.content.starts_with("@frodo"));
    assert!(comment.content.ends_with('!'));
}

#[tokio::test]
async fn test_post_comment_validation() {
    setup_tracing();
    let backend = MockBackend::with_catalog();

    let empty = data::post_comment(&backend, "u1", "1", "   ").await;
    assert!(matches!(empty, Err(StoryTrackError::Validation(_))));
    let long = data::post_comment(&backend, "u1", "1", &"x".repeat(2001)).await;
    assert!(matches!(long, Err(StoryTrackError::Validation(_))));
    assert_eq!(backend.count_calls("insert", COMMENTS_TABLE), 0);
}

#[tokio::test]
async fn test_list_comments_newest_first() {
    setup_tracing();
    let backend = MockBackend::with_catalog();
    for text in ["first", "second", "third"] {
        data::post_comment(&backend, "u1", "1", text).await.unwrap();
    }
    data::post_comment(&backend, "u1", "2", "elsewhere").await.unwrap();

    let comments = data::list_comments(&backend, "1").await.unwrap();
    let texts: Vec<&str> = comments.iter().map(|c| c.content.as_str()).collect();
    assert_eq!(texts, vec!["third", "second", "first"]);
}

#[tokio::test]
async fn test_load_stats_gathers_rows() {
    setup_tracing();
    let backend = MockBackend::with_catalog();
    data::set_read_status(&backend, "u1", "1", ReadStatus::Finished)
        .await
        .unwrap();
    data::set_rating(&backend, "u1", "1", 5).await.unwrap();
    data::set_read_status(&backend, "u1", "4", ReadStatus::Reading)
        .await
        .unwrap();
    data::post_comment(&backend, "u1", "1", "loved it").await.unwrap();
    data::post_comment(&backend, "u2", "1", "meh").await.unwrap();

    let stats = load_stats(&backend, "u1").await.unwrap();
    assert_eq!(stats.total_tracked, 2);
    assert_eq!(stats.finished, 1);
    assert_eq!(stats.reading, 1);
    assert_eq!(stats.average_rating, Some(5.0));
    assert_eq!(stats.comments_posted, 1);
    assert_eq!(stats.completion_rate, 0.5);
    assert_eq!(stats.top_authors[0].0, "J.R.R. Tolkien");
}
