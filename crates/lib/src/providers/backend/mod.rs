pub mod auth;
pub mod query;
pub mod realtime;
pub mod rest;

use crate::{errors::StoryTrackError, types::Page};
use async_trait::async_trait;
use dyn_clone::DynClone;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use std::fmt::Debug;

pub use auth::{AuthProvider, AuthUser, RestAuthProvider, Session, SignUp};
pub use query::{Filter, FilterOp, Query};
pub use realtime::{ChangeEvent, ChangeKind, ChannelSpec, RealtimeChannel, RealtimeConfig, Subscription};
pub use rest::RestTableProvider;

/// A trait for reading and writing rows in the hosted backend's tables.
///
/// Rows cross this seam as JSON so providers stay schema-agnostic; the data
/// layer converts them with [`decode_rows`] and [`encode_row`].
#[async_trait]
pub trait TableProvider: Send + Sync + Debug + DynClone {
    /// Returns the rows matching `query`, plus the exact count if requested.
    async fn select(&self, table: &str, query: &Query) -> Result<Page<Value>, StoryTrackError>;

    /// Inserts rows and returns them as stored.
    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<Vec<Value>, StoryTrackError>;

    /// Inserts rows, merging into existing rows that collide on `on_conflict`.
    async fn upsert(
        &self,
        table: &str,
        rows: Vec<Value>,
        on_conflict: &[&str],
    ) -> Result<Vec<Value>, StoryTrackError>;

    /// Patches every row matching `query` and returns the updated rows.
    async fn update(
        &self,
        table: &str,
        query: &Query,
        patch: Value,
    ) -> Result<Vec<Value>, StoryTrackError>;

    /// Deletes every row matching `query`, returning how many were removed.
    async fn delete(&self, table: &str, query: &Query) -> Result<usize, StoryTrackError>;

    /// Sets or clears the signed-in user's access token for later requests.
    fn set_access_token(&self, token: Option<String>);
}

dyn_clone::clone_trait_object!(TableProvider);

/// Converts backend rows into typed models.
pub fn decode_rows<T: DeserializeOwned>(rows: Vec<Value>) -> Result<Vec<T>, StoryTrackError> {
    rows.into_iter()
        .map(|row| serde_json::from_value(row).map_err(StoryTrackError::from))
        .collect()
}

/// Converts one typed model into a backend row.
pub fn encode_row<T: Serialize>(row: &T) -> Result<Value, StoryTrackError> {
    Ok(serde_json::to_value(row)?)
}

/// Takes the first row of a write response, which the backend echoes back.
pub fn first_row<T: DeserializeOwned>(rows: Vec<Value>, table: &str) -> Result<T, StoryTrackError> {
    let row = rows.into_iter().next().ok_or_else(|| {
        StoryTrackError::NotFound(format!("backend returned no row for '{table}'"))
    })?;
    Ok(serde_json::from_value(row)?)
}
