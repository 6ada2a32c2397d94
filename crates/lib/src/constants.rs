//! # Shared Constants
//!
//! Table names, channel defaults and tuning values shared across the
//! `storytrack` workspace.

/// Catalog table.
pub const BOOKS_TABLE: &str = "books";
/// Per-user reading list rows.
pub const USER_BOOKS_TABLE: &str = "user_books";
pub const COMMENTS_TABLE: &str = "comments";
pub const PROFILES_TABLE: &str = "profiles";
pub const RECOMMENDATIONS_TABLE: &str = "recommendations";

/// Conflict target for `user_books` and `recommendations` upserts.
pub const USER_BOOK_CONFLICT: &[&str] = &["user_id", "book_id"];

/// The default number of books shown per catalog page.
pub const DEFAULT_PAGE_SIZE: usize = 12;

/// Recommendations older than this are recomputed.
pub const RECOMMENDATION_TTL_SECS: i64 = 60 * 60;

/// The default number of recommendations kept per user.
pub const DEFAULT_RECOMMENDATION_LIMIT: usize = 10;

/// Maximum comment length in characters.
pub const MAX_COMMENT_LEN: usize = 2000;

/// Phoenix heartbeat interval for realtime sockets.
pub const REALTIME_HEARTBEAT_SECS: u64 = 30;

/// Minimum fuzzy score for a catalog search hit.
pub const DEFAULT_SEARCH_THRESHOLD: f64 = 0.35;

/// Seconds of clock skew tolerated when checking session expiry.
pub const SESSION_EXPIRY_SKEW_SECS: i64 = 60;
