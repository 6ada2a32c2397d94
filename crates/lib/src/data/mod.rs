//! # Data Access
//!
//! Thin functions over a [`TableProvider`](crate::providers::backend::TableProvider),
//! one module per backend table. Each function builds a [`Query`](crate::providers::backend::Query),
//! issues it, and decodes the rows into typed models.

pub mod books;
pub mod comments;
pub mod library;
pub mod profiles;
pub mod recommendations;
pub mod stats;

pub use books::{fetch_books, fetch_books_by_ids, get_book, list_genres, Paged};
pub use comments::{extract_mentions, list_comments, post_comment, subscribe_comments};
pub use library::{
    get_user_book, list_user_books, next_order, reorder_reading_list, set_favorite,
    set_rating, set_read_status,
};
pub use profiles::{find_profiles_by_usernames, get_profile, upsert_profile};
pub use recommendations::{dismiss_recommendation, get_recommendations, set_feedback};
pub use stats::{compute_stats, load_stats, ReadingStats};
