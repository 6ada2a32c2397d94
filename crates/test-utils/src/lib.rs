use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use storytrack::errors::StoryTrackError;
use storytrack::providers::backend::auth::{validate_email, validate_password};
use storytrack::providers::backend::{
    AuthProvider, AuthUser, Query, Session, SignUp, TableProvider,
};
use storytrack::types::Page;
use storytrack::{Notifier, Store, StoryTrackClient};

// --- Mock Table Backend ---

#[derive(Debug, Default)]
struct BackendState {
    tables: HashMap<String, Vec<Value>>,
    calls: Vec<(String, String)>,
    failing_reads: HashSet<String>,
    failing_writes: HashSet<String>,
    access_token: Option<String>,
    last_timestamp: Option<DateTime<Utc>>,
}

/// An in-memory stand-in for the hosted table API.
///
/// Queries are evaluated with [`Query::apply`], upserts merge on the conflict
/// columns, and inserted rows get an `id` and `created_at` when missing.
#[derive(Clone, Debug, Default)]
pub struct MockBackend {
    state: Arc<Mutex<BackendState>>,
}

fn failure(table: &str) -> StoryTrackError {
    StoryTrackError::BackendApi {
        status: 503,
        message: format!("table '{table}' is unavailable"),
    }
}

fn merge(target: &mut Value, patch: &Value) {
    if let (Value::Object(target), Value::Object(patch)) = (target, patch) {
        for (key, value) in patch {
            target.insert(key.clone(), value.clone());
        }
    }
}

impl MockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// A backend with the sample catalog loaded into `books`.
    pub fn with_catalog() -> Self {
        let backend = Self::new();
        backend.seed("books", sample_books());
        backend
    }

    /// Appends rows to a table as-is.
    pub fn seed(&self, table: &str, rows: Vec<Value>) {
        let mut state = self.state.lock().unwrap();
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .extend(rows);
    }

    pub fn rows(&self, table: &str) -> Vec<Value> {
        let state = self.state.lock().unwrap();
        state.tables.get(table).cloned().unwrap_or_default()
    }

    /// Every call made so far as `(operation, table)`.
    pub fn calls(&self) -> Vec<(String, String)> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn count_calls(&self, operation: &str, table: &str) -> usize {
        self.calls()
            .iter()
            .filter(|(op, t)| op == operation && t == table)
            .count()
    }

    /// Makes every insert, upsert, update and delete on `table` fail.
    pub fn fail_writes_to(&self, table: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_writes
            .insert(table.to_string());
    }

    pub fn fail_reads_from(&self, table: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_reads
            .insert(table.to_string());
    }

    pub fn heal(&self) {
        let mut state = self.state.lock().unwrap();
        state.failing_reads.clear();
        state.failing_writes.clear();
    }

    pub fn access_token(&self) -> Option<String> {
        self.state.lock().unwrap().access_token.clone()
    }
}

impl BackendState {
    fn record(&mut self, operation: &str, table: &str) {
        self.calls.push((operation.to_string(), table.to_string()));
    }

    fn check_write(&mut self, operation: &str, table: &str) -> Result<(), StoryTrackError> {
        self.record(operation, table);
        if self.failing_writes.contains(table) {
            return Err(failure(table));
        }
        Ok(())
    }

    /// Strictly increasing timestamps so "newest first" is deterministic.
    fn next_timestamp(&mut self) -> String {
        let mut now = Utc::now();
        if let Some(last) = self.last_timestamp {
            if now <= last {
                now = last + Duration::microseconds(1);
            }
        }
        self.last_timestamp = Some(now);
        now.to_rfc3339_opts(SecondsFormat::Micros, true)
    }

    fn fill_defaults(&mut self, mut row: Value) -> Value {
        let created_at = self.next_timestamp();
        if let Value::Object(fields) = &mut row {
            if fields.get("id").map_or(true, Value::is_null) {
                fields.insert("id".to_string(), json!(uuid::Uuid::new_v4().to_string()));
            }
            if fields.get("created_at").map_or(true, Value::is_null) {
                fields.insert("created_at".to_string(), json!(created_at));
            }
        }
        row
    }
}

#[async_trait]
impl TableProvider for MockBackend {
    async fn select(&self, table: &str, query: &Query) -> Result<Page<Value>, StoryTrackError> {
        let mut state = self.state.lock().unwrap();
        state.record("select", table);
        if state.failing_reads.contains(table) {
            return Err(failure(table));
        }
        let rows = state.tables.get(table).cloned().unwrap_or_default();
        Ok(query.apply(&rows))
    }

    async fn insert(&self, table: &str, rows: Vec<Value>) -> Result<Vec<Value>, StoryTrackError> {
        let mut state = self.state.lock().unwrap();
        state.check_write("insert", table)?;
        let stored: Vec<Value> = rows.into_iter().map(|r| state.fill_defaults(r)).collect();
        state
            .tables
            .entry(table.to_string())
            .or_default()
            .extend(stored.clone());
        Ok(stored)
    }

    async fn upsert(
        &self,
        table: &str,
        rows: Vec<Value>,
        on_conflict: &[&str],
    ) -> Result<Vec<Value>, StoryTrackError> {
        let mut state = self.state.lock().unwrap();
        state.check_write("upsert", table)?;

        let mut stored = Vec::with_capacity(rows.len());
        for row in rows {
            let key = on_conflict.iter().fold(Query::new(), |q, column| {
                q.eq(column, row.get(*column).cloned().unwrap_or(Value::Null))
            });
            let position = state
                .tables
                .get(table)
                .and_then(|rows| rows.iter().position(|r| key.matches(r)));
            match position {
                Some(i) => {
                    let rows = state.tables.entry(table.to_string()).or_default();
                    merge(&mut rows[i], &row);
                    stored.push(rows[i].clone());
                }
                None => {
                    let row = state.fill_defaults(row);
                    state
                        .tables
                        .entry(table.to_string())
                        .or_default()
                        .push(row.clone());
                    stored.push(row);
                }
            }
        }
        Ok(stored)
    }

    async fn update(
        &self,
        table: &str,
        query: &Query,
        patch: Value,
    ) -> Result<Vec<Value>, StoryTrackError> {
        let mut state = self.state.lock().unwrap();
        state.check_write("update", table)?;
        let mut updated = Vec::new();
        if let Some(rows) = state.tables.get_mut(table) {
            for row in rows.iter_mut().filter(|r| query.matches(r)) {
                merge(row, &patch);
                updated.push(row.clone());
            }
        }
        Ok(updated)
    }

    async fn delete(&self, table: &str, query: &Query) -> Result<usize, StoryTrackError> {
        let mut state = self.state.lock().unwrap();
        state.check_write("delete", table)?;
        let Some(rows) = state.tables.get_mut(table) else {
            return Ok(0);
        };
        let before = rows.len();
        rows.retain(|r| !query.matches(r));
        Ok(before - rows.len())
    }

    fn set_access_token(&self, token: Option<String>) {
        self.state.lock().unwrap().access_token = token;
    }
}

// --- Mock Auth Provider ---

#[derive(Debug, Default)]
struct AuthState {
    /// email -> (password, user)
    users: HashMap<String, (String, AuthUser)>,
    /// access token -> user id
    access_tokens: HashMap<String, String>,
    /// refresh token -> user id
    refresh_tokens: HashMap<String, String>,
    recovery_tokens: HashMap<String, String>,
    require_confirmation: bool,
    fail_sign_out: bool,
}

/// An in-memory auth service that auto-confirms sign-ups unless told otherwise.
#[derive(Clone, Debug, Default)]
pub struct MockAuthProvider {
    state: Arc<Mutex<AuthState>>,
}

impl MockAuthProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sign-ups return no session until the email is confirmed.
    pub fn require_confirmation(&self) {
        self.state.lock().unwrap().require_confirmation = true;
    }

    pub fn fail_sign_out(&self) {
        self.state.lock().unwrap().fail_sign_out = true;
    }

    /// The recovery code "emailed" to `email`, if one was requested.
    pub fn recovery_token(&self, email: &str) -> Option<String> {
        self.state.lock().unwrap().recovery_tokens.get(email).cloned()
    }

    /// Revokes every issued access token, as a server-side logout would.
    pub fn revoke_all(&self) {
        self.state.lock().unwrap().access_tokens.clear();
    }

    /// A session whose access token is already expired but can be refreshed.
    pub fn expired_session(&self, email: &str) -> Option<Session> {
        let mut state = self.state.lock().unwrap();
        let user = state.users.get(email)?.1.clone();
        let mut session = state.issue(&user);
        session.expires_at = Utc::now() - Duration::hours(2);
        Some(session)
    }
}

impl AuthState {
    fn issue(&mut self, user: &AuthUser) -> Session {
        let access_token = format!("access-{}", uuid::Uuid::new_v4());
        let refresh_token = format!("refresh-{}", uuid::Uuid::new_v4());
        self.access_tokens
            .insert(access_token.clone(), user.id.clone());
        self.refresh_tokens
            .insert(refresh_token.clone(), user.id.clone());
        Session {
            access_token,
            refresh_token,
            expires_at: Utc::now() + Duration::hours(1),
            user: user.clone(),
        }
    }

    fn user_by_id(&self, id: &str) -> Option<AuthUser> {
        self.users
            .values()
            .find(|(_, u)| u.id == id)
            .map(|(_, u)| u.clone())
    }

    fn user_for_token(&self, token: &str) -> Result<AuthUser, StoryTrackError> {
        self.access_tokens
            .get(token)
            .and_then(|id| self.user_by_id(id))
            .ok_or_else(|| StoryTrackError::Auth("invalid JWT: token is expired".to_string()))
    }
}

#[async_trait]
impl AuthProvider for MockAuthProvider {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        username: &str,
    ) -> Result<SignUp, StoryTrackError> {
        validate_email(email)?;
        validate_password(password)?;
        let mut state = self.state.lock().unwrap();
        if state.users.contains_key(email) {
            return Err(StoryTrackError::Auth("User already registered".to_string()));
        }
        let user = AuthUser {
            id: uuid::Uuid::new_v4().to_string(),
            email: Some(email.to_string()),
            user_metadata: json!({ "username": username }),
            created_at: Some(Utc::now()),
        };
        state
            .users
            .insert(email.to_string(), (password.to_string(), user.clone()));
        let session = (!state.require_confirmation).then(|| state.issue(&user));
        Ok(SignUp { user, session })
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, StoryTrackError> {
        validate_email(email)?;
        let mut state = self.state.lock().unwrap();
        let user = match state.users.get(email) {
            Some((stored, user)) if stored == password => user.clone(),
            _ => return Err(StoryTrackError::Auth("Invalid login credentials".to_string())),
        };
        Ok(state.issue(&user))
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), StoryTrackError> {
        let mut state = self.state.lock().unwrap();
        if state.fail_sign_out {
            return Err(StoryTrackError::BackendApi {
                status: 502,
                message: "bad gateway".to_string(),
            });
        }
        state.access_tokens.remove(access_token);
        Ok(())
    }

    async fn reset_password_for_email(
        &self,
        email: &str,
        _redirect_to: Option<&str>,
    ) -> Result<(), StoryTrackError> {
        validate_email(email)?;
        let mut state = self.state.lock().unwrap();
        if state.users.contains_key(email) {
            state
                .recovery_tokens
                .insert(email.to_string(), "123456".to_string());
        }
        Ok(())
    }

    async fn verify_recovery(&self, email: &str, token: &str) -> Result<Session, StoryTrackError> {
        let mut state = self.state.lock().unwrap();
        if state.recovery_tokens.get(email).map(String::as_str) != Some(token) {
            return Err(StoryTrackError::Auth(
                "Token has expired or is invalid".to_string(),
            ));
        }
        state.recovery_tokens.remove(email);
        let user = state
            .users
            .get(email)
            .map(|(_, u)| u.clone())
            .ok_or_else(|| StoryTrackError::Auth("User not found".to_string()))?;
        Ok(state.issue(&user))
    }

    async fn update_password(
        &self,
        access_token: &str,
        new_password: &str,
    ) -> Result<AuthUser, StoryTrackError> {
        validate_password(new_password)?;
        let mut state = self.state.lock().unwrap();
        let user = state.user_for_token(access_token)?;
        if let Some(entry) = state
            .users
            .values_mut()
            .find(|(_, u)| u.id == user.id)
        {
            entry.0 = new_password.to_string();
        }
        Ok(user)
    }

    async fn get_user(&self, access_token: &str) -> Result<AuthUser, StoryTrackError> {
        self.state.lock().unwrap().user_for_token(access_token)
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, StoryTrackError> {
        let mut state = self.state.lock().unwrap();
        let user = state
            .refresh_tokens
            .remove(refresh_token)
            .and_then(|id| state.user_by_id(&id))
            .ok_or_else(|| StoryTrackError::Auth("Invalid Refresh Token".to_string()))?;
        Ok(state.issue(&user))
    }
}

// --- Fixtures ---

fn book(
    id: &str,
    title: &str,
    authors: &[&str],
    genres: &[&str],
    average_rating: f64,
    ratings_count: i64,
) -> Value {
    let mut fields = Map::new();
    fields.insert("id".to_string(), json!(id));
    fields.insert("title".to_string(), json!(title));
    fields.insert("authors".to_string(), json!(authors));
    fields.insert("genres".to_string(), json!(genres));
    fields.insert("average_rating".to_string(), json!(average_rating));
    fields.insert("ratings_count".to_string(), json!(ratings_count));
    Value::Object(fields)
}

/// A small catalog covering several genres and rating bands.
pub fn sample_books() -> Vec<Value> {
    vec![
        book("1", "The Hobbit", &["J.R.R. Tolkien"], &["Fantasy", "Adventure"], 4.7, 3_500_000),
        book("2", "Dune", &["Frank Herbert"], &["Science Fiction", "Classic"], 4.6, 1_200_000),
        book("3", "Pride and Prejudice", &["Jane Austen"], &["Romance", "Classic"], 4.3, 4_000_000),
        book("4", "Mistborn", &["Brandon Sanderson"], &["Fantasy"], 4.5, 900_000),
        book("5", "Dracula", &["Bram Stoker"], &["Horror", "Classic"], 4.0, 1_100_000),
        book("6", "The Left Hand of Darkness", &["Ursula K. Le Guin"], &["Science Fiction"], 4.1, 120_000),
        book("7", "A Wizard of Earthsea", &["Ursula K. Le Guin"], &["Fantasy", "Classic"], 4.0, 300_000),
        book("8", "Twilight", &["Stephenie Meyer"], &["Romance", "Fantasy"], 3.6, 6_000_000),
        book("9", "The Da Vinci Code", &["Dan Brown"], &["Thriller"], 3.9, 2_300_000),
        book("10", "Gone Girl", &["Gillian Flynn"], &["Thriller"], 4.1, 2_900_000),
        book("11", "The Road", &["Cormac McCarthy"], &["Fiction"], 3.4, 800_000),
        book("12", "Good Omens", &["Terry Pratchett", "Neil Gaiman"], &["Fantasy", "Humor"], 4.2, 700_000),
        book("13", "Emma", &["Jane Austen"], &["Romance", "Classic"], 4.0, 800_000),
    ]
}

/// A client over fresh mock providers, not signed in.
pub fn client_with(backend: &MockBackend, auth: &MockAuthProvider) -> Result<StoryTrackClient> {
    Ok(StoryTrackClient::builder()
        .table_provider(Box::new(backend.clone()))
        .auth_provider(Box::new(auth.clone()))
        .realtime_url("http://127.0.0.1:9".to_string())
        .anon_key("anon-test-key".to_string())
        .notifier(Notifier::default())
        .store(Store::new())
        .page_size(5)
        .build()?)
}

/// A client over the sample catalog, signed in as `reader@example.com`.
pub async fn signed_in_client() -> Result<(StoryTrackClient, MockBackend, MockAuthProvider)> {
    let backend = MockBackend::with_catalog();
    let auth = MockAuthProvider::new();
    let client = client_with(&backend, &auth)?;
    client
        .sign_up("reader@example.com", "correct horse", "reader")
        .await?;
    Ok((client, backend, auth))
}
