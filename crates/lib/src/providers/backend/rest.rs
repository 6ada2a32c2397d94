use crate::{
    errors::StoryTrackError,
    providers::backend::{query::Query, TableProvider},
    types::Page,
};
use async_trait::async_trait;
use reqwest::{Client as ReqwestClient, RequestBuilder, Response};
use serde::Deserialize;
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, RwLock};
use tracing::{debug, warn};

/// The error body returned by the table API on failure.
#[derive(Deserialize, Debug)]
struct ApiErrorBody {
    message: Option<String>,
    error_description: Option<String>,
    msg: Option<String>,
    error: Option<String>,
}

/// A [`TableProvider`] backed by the hosted PostgREST endpoint.
#[derive(Clone)]
pub struct RestTableProvider {
    client: ReqwestClient,
    base_url: String,
    anon_key: String,
    access_token: Arc<RwLock<Option<String>>>,
}

impl fmt::Debug for RestTableProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestTableProvider")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl RestTableProvider {
    /// Creates a new `RestTableProvider` for the project at `base_url`.
    pub fn new(base_url: String, anon_key: String) -> Result<Self, StoryTrackError> {
        if anon_key.is_empty() {
            return Err(StoryTrackError::MissingConfig("anon key".to_string()));
        }
        let client = ReqwestClient::builder()
            .build()
            .map_err(StoryTrackError::ReqwestClientBuild)?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key,
            access_token: Arc::new(RwLock::new(None)),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }

    /// Adds the project key and the caller's bearer token (or the anon key).
    fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        let token = self
            .access_token
            .read()
            .ok()
            .and_then(|guard| guard.clone())
            .unwrap_or_else(|| self.anon_key.clone());
        builder.header("apikey", &self.anon_key).bearer_auth(token)
    }

    async fn read_rows(response: Response) -> Result<Vec<Value>, StoryTrackError> {
        let response = check_status(response).await?;
        let text = response
            .text()
            .await
            .map_err(StoryTrackError::BackendDeserialization)?;
        if text.trim().is_empty() {
            return Ok(Vec::new());
        }
        let body: Value = serde_json::from_str(&text)?;
        Ok(match body {
            Value::Array(rows) => rows,
            Value::Null => Vec::new(),
            single => vec![single],
        })
    }
}

/// Turns a non-2xx response into `StoryTrackError::BackendApi`.
pub(crate) async fn check_status(response: Response) -> Result<Response, StoryTrackError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ApiErrorBody>(&text)
        .ok()
        .and_then(|body| {
            body.message
                .or(body.error_description)
                .or(body.msg)
                .or(body.error)
        })
        .unwrap_or(text);
    warn!(status, %message, "Backend request failed");
    Err(StoryTrackError::BackendApi { status, message })
}

/// Reads the total from a `Content-Range: 0-9/42` header.
pub fn parse_content_range(header: &str) -> Option<usize> {
    header.rsplit('/').next()?.trim().parse().ok()
}

fn filter_params(query: &Query) -> Vec<(String, String)> {
    query
        .filters
        .iter()
        .map(|f| (f.column.clone(), f.to_param_value()))
        .collect()
}

#[async_trait]
impl TableProvider for RestTableProvider {
    async fn select(&self, table: &str, query: &Query) -> Result<Page<Value>, StoryTrackError> {
        let params = query.to_params();
        debug!(table, ?params, "--> select");

        let mut request = self.authorized(self.client.get(self.table_url(table)).query(&params));
        if query.count {
            request = request.header("Prefer", "count=exact");
        }
        let response = request.send().await.map_err(StoryTrackError::BackendRequest)?;

        let total = if query.count {
            response
                .headers()
                .get("content-range")
                .and_then(|h| h.to_str().ok())
                .and_then(parse_content_range)
        } else {
            None
        };
        let rows = Self::read_rows(response).await?;
        debug!(table, rows = rows.len(), ?total, "<-- select");
        Ok(Page::new(rows, total))
    }

    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<Vec<Value>, StoryTrackError> {
        debug!(table, rows = rows.len(), "--> insert");
        let response = self
            .authorized(self.client.post(self.table_url(table)))
            .header("Prefer", "return=representation")
            .json(&rows)
            .send()
            .await
            .map_err(StoryTrackError::BackendRequest)?;
        Self::read_rows(response).await
    }

    async fn upsert(
        &self,
        table: &str,
        rows: Vec<Value>,
        on_conflict: &[&str],
    ) -> Result<Vec<Value>, StoryTrackError> {
        debug!(table, rows = rows.len(), ?on_conflict, "--> upsert");
        let mut request = self.client.post(self.table_url(table));
        if !on_conflict.is_empty() {
            request = request.query(&[("on_conflict", on_conflict.join(","))]);
        }
        let response = self
            .authorized(request)
            .header("Prefer", "resolution=merge-duplicates,return=representation")
            .json(&rows)
            .send()
            .await
            .map_err(StoryTrackError::BackendRequest)?;
        Self::read_rows(response).await
    }

    async fn update(
        &self,
        table: &str,
        query: &Query,
        patch: Value,
    ) -> Result<Vec<Value>, StoryTrackError> {
        if query.filters.is_empty() {
            return Err(StoryTrackError::Validation(format!(
                "refusing to update every row of '{table}'"
            )));
        }
        debug!(table, "--> update");
        let response = self
            .authorized(
                self.client
                    .patch(self.table_url(table))
                    .query(&filter_params(query)),
            )
            .header("Prefer", "return=representation")
            .json(&patch)
            .send()
            .await
            .map_err(StoryTrackError::BackendRequest)?;
        Self::read_rows(response).await
    }

    async fn delete(&self, table: &str, query: &Query) -> Result<usize, StoryTrackError> {
        if query.filters.is_empty() {
            return Err(StoryTrackError::Validation(format!(
                "refusing to delete every row of '{table}'"
            )));
        }
        debug!(table, "--> delete");
        let response = self
            .authorized(
                self.client
                    .delete(self.table_url(table))
                    .query(&filter_params(query)),
            )
            .header("Prefer", "return=representation")
            .send()
            .await
            .map_err(StoryTrackError::BackendRequest)?;
        Ok(Self::read_rows(response).await?.len())
    }

    fn set_access_token(&self, token: Option<String>) {
        if let Ok(mut guard) = self.access_token.write() {
            *guard = token;
        }
    }
}
