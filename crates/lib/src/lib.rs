//! # StoryTrack
//!
//! Client library for the StoryTrack book tracker: catalog browsing, reading
//! lists, ratings, comments, recommendations and reading statistics, backed by
//! a hosted backend-as-a-service.
//!
//! Front ends build a [`StoryTrackClient`] from a table provider and an auth
//! provider, then read state from its [`Store`] and render [`Toast`]s from its
//! [`Notifier`].

pub mod client;
pub mod constants;
pub mod data;
pub mod errors;
pub mod geo;
pub mod optimistic;
pub mod pagination;
pub mod providers;
pub mod recommend;
pub mod search;
pub mod store;
pub mod types;

pub use client::{StoryTrackClient, StoryTrackClientBuilder};
pub use errors::StoryTrackError;
pub use optimistic::{Notifier, Toast, ToastLevel};
pub use store::{Store, Theme};
pub use types::{
    Book, CatalogFilter, CatalogSort, Comment, Feedback, Profile, ReadStatus, Recommendation,
    RecommendedBook, UserBook,
};
