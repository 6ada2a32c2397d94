//! # StoryTrack Client
//!
//! The facade a front end talks to. It binds the store slices to the data
//! access layer: every operation updates local state, calls the backend, and
//! reports failures as toasts.

use crate::{
    constants::{
        DEFAULT_PAGE_SIZE, DEFAULT_RECOMMENDATION_LIMIT, DEFAULT_SEARCH_THRESHOLD,
        USER_BOOKS_TABLE,
    },
    data::{
        self,
        books::Paged,
        comments::validate_content,
        stats::ReadingStats,
    },
    errors::StoryTrackError,
    optimistic::{apply_optimistic, Notifier},
    providers::backend::{
        auth::validate_password, AuthProvider, AuthUser, ChannelSpec, Filter, FilterOp,
        RealtimeChannel, RealtimeConfig, Session, SignUp, Subscription, TableProvider,
    },
    search::{filter_books, SearchHit},
    store::Store,
    types::{
        Book, CatalogFilter, Comment, Feedback, Profile, ReadStatus, RecommendedBook, UserBook,
    },
};
use chrono::Utc;
use tracing::{info, warn};

/// A client for the StoryTrack backend.
#[derive(Debug, Clone)]
pub struct StoryTrackClient {
    pub tables: Box<dyn TableProvider>,
    pub auth: Box<dyn AuthProvider>,
    pub realtime_url: String,
    pub anon_key: String,
    pub notifier: Notifier,
    pub store: Store,
    pub page_size: usize,
}

/// A builder for creating `StoryTrackClient` instances.
#[derive(Debug, Default)]
pub struct StoryTrackClientBuilder {
    table_provider: Option<Box<dyn TableProvider>>,
    auth_provider: Option<Box<dyn AuthProvider>>,
    realtime_url: Option<String>,
    anon_key: Option<String>,
    notifier: Option<Notifier>,
    store: Option<Store>,
    page_size: Option<usize>,
}

impl StoryTrackClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn table_provider(mut self, provider: Box<dyn TableProvider>) -> Self {
        self.table_provider = Some(provider);
        self
    }

    pub fn auth_provider(mut self, provider: Box<dyn AuthProvider>) -> Self {
        self.auth_provider = Some(provider);
        self
    }

    /// Project URL used for realtime subscriptions.
    pub fn realtime_url(mut self, url: String) -> Self {
        self.realtime_url = Some(url);
        self
    }

    pub fn anon_key(mut self, key: String) -> Self {
        self.anon_key = Some(key);
        self
    }

    pub fn notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn store(mut self, store: Store) -> Self {
        self.store = Some(store);
        self
    }

    pub fn page_size(mut self, page_size: usize) -> Self {
        self.page_size = Some(page_size);
        self
    }

    /// Builds the client. Both providers are required.
    pub fn build(self) -> Result<StoryTrackClient, StoryTrackError> {
        let tables = self
            .table_provider
            .ok_or_else(|| StoryTrackError::MissingConfig("table provider".to_string()))?;
        let auth = self
            .auth_provider
            .ok_or_else(|| StoryTrackError::MissingConfig("auth provider".to_string()))?;
        let page_size = self.page_size.unwrap_or(DEFAULT_PAGE_SIZE);
        if page_size == 0 {
            return Err(StoryTrackError::Validation(
                "page size must be greater than zero".to_string(),
            ));
        }

        Ok(StoryTrackClient {
            tables,
            auth,
            realtime_url: self.realtime_url.unwrap_or_default(),
            anon_key: self.anon_key.unwrap_or_default(),
            notifier: self.notifier.unwrap_or_default(),
            store: self.store.unwrap_or_default(),
            page_size,
        })
    }
}

impl StoryTrackClient {
    pub fn builder() -> StoryTrackClientBuilder {
        StoryTrackClientBuilder::new()
    }

    /// Shows an error toast for a failed call and passes the result through.
    fn report<T>(&self, action: &str, result: Result<T, StoryTrackError>) -> Result<T, StoryTrackError> {
        if let Err(e) = &result {
            self.notifier
                .error(format!("Could not {action}: {}", e.user_message()));
        }
        result
    }

    async fn require_user(&self) -> Result<String, StoryTrackError> {
        self.store.user_id().await.ok_or(StoryTrackError::NotSignedIn)
    }

    async fn adopt_session(&self, session: Session) {
        self.tables
            .set_access_token(Some(session.access_token.clone()));
        self.store.auth.write().await.set_session(session);
    }

    // --- Auth ---

    pub async fn sign_up(
        &self,
        email: &str,
        password: &str,
        username: &str,
    ) -> Result<SignUp, StoryTrackError> {
        let result = self.auth.sign_up(email, password, username).await;
        let signup = self.report("sign up", result)?;

        if let Some(session) = signup.session.clone() {
            self.adopt_session(session).await;
            let profile = Profile {
                id: signup.user.id.clone(),
                username: username.to_string(),
                display_name: None,
                avatar_url: None,
                favorite_genres: Vec::new(),
            };
            if let Err(e) = data::upsert_profile(self.tables.as_ref(), &profile).await {
                warn!("Could not create profile for {}: {}", signup.user.id, e);
            }
            self.notifier.success(format!("Welcome, {username}!"));
        } else {
            self.notifier
                .info("Check your inbox to confirm your email address.");
        }
        Ok(signup)
    }

    pub async fn sign_in(&self, email: &str, password: &str) -> Result<Session, StoryTrackError> {
        self.store.auth.write().await.loading = true;
        match self.auth.sign_in_with_password(email, password).await {
            Ok(session) => {
                info!(user_id = %session.user.id, "Signed in");
                self.adopt_session(session.clone()).await;
                Ok(session)
            }
            Err(e) => {
                {
                    let mut auth = self.store.auth.write().await;
                    auth.loading = false;
                    auth.error = Some(e.user_message());
                }
                self.report("sign in", Err(e))
            }
        }
    }

    /// Signs out. Local state is cleared even when the backend call fails.
    pub async fn sign_out(&self) -> Result<(), StoryTrackError> {
        let token = self
            .store
            .auth
            .read()
            .await
            .access_token()
            .map(str::to_string);
        if let Some(token) = token {
            if let Err(e) = self.auth.sign_out(&token).await {
                warn!("Backend sign-out failed, clearing local session anyway: {}", e);
            }
        }
        self.tables.set_access_token(None);
        self.store.auth.write().await.clear();
        {
            let mut books = self.store.books.write().await;
            books.favorites.clear();
            books.statuses.clear();
        }
        info!("Signed out");
        Ok(())
    }

    pub async fn request_password_reset(
        &self,
        email: &str,
        redirect_to: Option<&str>,
    ) -> Result<(), StoryTrackError> {
        let result = self.auth.reset_password_for_email(email, redirect_to).await;
        self.report("send the reset email", result)?;
        self.notifier
            .info("If that address has an account, a reset code is on its way.");
        Ok(())
    }

    /// Exchanges the emailed recovery token for a session and sets a new password.
    pub async fn complete_password_reset(
        &self,
        email: &str,
        token: &str,
        new_password: &str,
    ) -> Result<AuthUser, StoryTrackError> {
        self.report("reset the password", validate_password(new_password))?;
        let result = self.auth.verify_recovery(email, token.trim()).await;
        let session = self.report("verify the reset code", result)?;
        self.adopt_session(session.clone()).await;

        let result = self
            .auth
            .update_password(&session.access_token, new_password)
            .await;
        let user = self.report("update the password", result)?;
        self.notifier.success("Password updated.");
        Ok(user)
    }

    /// Re-validates a saved session, refreshing it when it has expired.
    pub async fn restore_session(&self, session: Session) -> Result<Session, StoryTrackError> {
        let result = if session.is_expired(Utc::now()) {
            info!("Saved session expired, refreshing");
            self.auth.refresh_session(&session.refresh_token).await
        } else {
            self.auth
                .get_user(&session.access_token)
                .await
                .map(|user| Session { user, ..session })
        };
        let restored = self.report("restore the session", result)?;
        self.adopt_session(restored.clone()).await;
        Ok(restored)
    }

    pub async fn session(&self) -> Option<Session> {
        self.store.auth.read().await.session.clone()
    }

    // --- Catalog ---

    /// Loads a catalog page into the books slice, along with the user's
    /// favourites and statuses when signed in.
    pub async fn load_catalog(
        &self,
        filter: &CatalogFilter,
        page: usize,
    ) -> Result<Paged<Book>, StoryTrackError> {
        {
            let mut books = self.store.books.write().await;
            books.loading = true;
            books.genre = filter.genre.clone();
        }

        let result = data::fetch_books(self.tables.as_ref(), filter, page, self.page_size).await;
        let paged = match result {
            Ok(paged) => paged,
            Err(e) => {
                {
                    let mut books = self.store.books.write().await;
                    books.loading = false;
                    books.error = Some(e.user_message());
                }
                return self.report("load books", Err(e));
            }
        };

        let library = match self.store.user_id().await {
            Some(user_id) => Some(data::list_user_books(self.tables.as_ref(), &user_id, None).await),
            None => None,
        };

        let mut books = self.store.books.write().await;
        books.set_page_result(paged.clone());
        match library {
            Some(Ok(entries)) => books.set_library(&entries),
            Some(Err(e)) => warn!("Could not load reading list: {}", e),
            None => {}
        }
        Ok(paged)
    }

    /// Narrows the loaded page by a fuzzy query.
    pub async fn search(&self, query: &str) -> Vec<Book> {
        let mut books = self.store.books.write().await;
        books.query = query.to_string();
        books.visible()
    }

    /// Fuzzy-searches the whole catalog. Every page is fetched first so hits
    /// are ranked against each other, not page by page.
    pub async fn search_catalog(&self, query: &str) -> Result<Vec<SearchHit>, StoryTrackError> {
        let filter = CatalogFilter::default();
        let mut books = Vec::new();
        let mut page = 1;
        loop {
            let result =
                data::fetch_books(self.tables.as_ref(), &filter, page, self.page_size).await;
            let paged = self.report("search the catalog", result)?;
            let has_next = paged.pagination.has_next();
            books.extend(paged.items);
            if !has_next {
                break;
            }
            page += 1;
        }
        Ok(filter_books(&books, query, DEFAULT_SEARCH_THRESHOLD))
    }

    pub async fn book(&self, book_id: &str) -> Result<Option<Book>, StoryTrackError> {
        let result = data::get_book(self.tables.as_ref(), book_id).await;
        self.report("load the book", result)
    }

    // --- Library ---

    /// Flips the favourite flag locally, then persists it. Returns the new flag.
    pub async fn toggle_favorite(&self, book_id: &str) -> Result<bool, StoryTrackError> {
        let user_id = self.require_user().await?;
        let favorite = !self.store.books.read().await.is_favorite(book_id);

        apply_optimistic(
            &self.store.books,
            &self.notifier,
            "update favorites",
            |books| {
                books.set_favorite(book_id, favorite);
            },
            |books| {
                books.set_favorite(book_id, !favorite);
            },
            data::set_favorite(self.tables.as_ref(), &user_id, book_id, favorite),
        )
        .await?;
        Ok(favorite)
    }

    pub async fn set_status(
        &self,
        book_id: &str,
        status: ReadStatus,
    ) -> Result<UserBook, StoryTrackError> {
        let user_id = self.require_user().await?;
        let previous = self.store.books.read().await.status(book_id);

        apply_optimistic(
            &self.store.books,
            &self.notifier,
            "update the reading status",
            |books| {
                books.set_status(book_id, status);
            },
            |books| {
                books.set_status(book_id, previous);
            },
            data::set_read_status(self.tables.as_ref(), &user_id, book_id, status),
        )
        .await
    }

    pub async fn rate(&self, book_id: &str, rating: u8) -> Result<UserBook, StoryTrackError> {
        let user_id = self.require_user().await?;
        let result = data::set_rating(self.tables.as_ref(), &user_id, book_id, rating).await;
        self.report("save the rating", result)
    }

    pub async fn reading_list(
        &self,
        status: Option<ReadStatus>,
    ) -> Result<Vec<UserBook>, StoryTrackError> {
        let user_id = self.require_user().await?;
        let result = data::list_user_books(self.tables.as_ref(), &user_id, status).await;
        self.report("load the reading list", result)
    }

    pub async fn reorder(&self, ordered_book_ids: &[String]) -> Result<Vec<UserBook>, StoryTrackError> {
        let user_id = self.require_user().await?;
        let result =
            data::reorder_reading_list(self.tables.as_ref(), &user_id, ordered_book_ids).await;
        self.report("reorder the reading list", result)
    }

    // --- Comments ---

    /// Shows the comment immediately as pending, then swaps in the stored row.
    /// The pending comment is removed if the insert fails.
    pub async fn post_comment(&self, book_id: &str, content: &str) -> Result<Comment, StoryTrackError> {
        let user_id = self.require_user().await?;
        let content = self.report("post the comment", validate_content(content))?;

        let pending = Comment {
            id: None,
            user_id: user_id.clone(),
            book_id: book_id.to_string(),
            content: content.clone(),
            mentions: Vec::new(),
            created_at: None,
        };
        let is_pending = |c: &Comment| c.id.is_none() && c.content == content && c.user_id == user_id;

        let stored = apply_optimistic(
            &self.store.books,
            &self.notifier,
            "post the comment",
            |books| {
                books
                    .comments
                    .entry(book_id.to_string())
                    .or_default()
                    .insert(0, pending);
            },
            |books| {
                if let Some(thread) = books.comments.get_mut(book_id) {
                    thread.retain(|c| !is_pending(c));
                }
            },
            data::post_comment(self.tables.as_ref(), &user_id, book_id, &content),
        )
        .await?;

        let mut books = self.store.books.write().await;
        if let Some(thread) = books.comments.get_mut(book_id) {
            match thread.iter_mut().find(|c| is_pending(c)) {
                Some(slot) => *slot = stored.clone(),
                None => thread.insert(0, stored.clone()),
            }
        }
        Ok(stored)
    }

    /// Loads a book's comments into the store, newest first.
    pub async fn comments(&self, book_id: &str) -> Result<Vec<Comment>, StoryTrackError> {
        let result = data::list_comments(self.tables.as_ref(), book_id).await;
        let comments = self.report("load comments", result)?;
        self.store
            .books
            .write()
            .await
            .comments
            .insert(book_id.to_string(), comments.clone());
        Ok(comments)
    }

    async fn realtime_config(&self) -> RealtimeConfig {
        let token = self
            .store
            .auth
            .read()
            .await
            .access_token()
            .map(str::to_string);
        RealtimeConfig::new(&self.realtime_url, &self.anon_key).with_access_token(token)
    }

    pub async fn subscribe_comments(&self, book_id: &str) -> Result<Subscription, StoryTrackError> {
        let config = self.realtime_config().await;
        let result = data::subscribe_comments(config, book_id);
        self.report("follow comments", result)
    }

    /// Changes to the signed-in user's reading list.
    pub async fn subscribe_reading_list(&self) -> Result<Subscription, StoryTrackError> {
        let user_id = self.require_user().await?;
        let filter = Filter::new("user_id", FilterOp::Eq, user_id.as_str()).to_realtime()?;
        let spec = ChannelSpec::new(&format!("user_books:{user_id}"), USER_BOOKS_TABLE).filter(filter);
        let config = self.realtime_config().await;
        self.report("follow the reading list", RealtimeChannel::subscribe(config, spec))
    }

    // --- Recommendations & stats ---

    pub async fn recommendations(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<RecommendedBook>, StoryTrackError> {
        let user_id = self.require_user().await?;
        let limit = limit.unwrap_or(DEFAULT_RECOMMENDATION_LIMIT);
        let result =
            data::get_recommendations(self.tables.as_ref(), &user_id, Utc::now(), limit).await;
        self.report("load recommendations", result)
    }

    pub async fn dismiss(&self, book_id: &str) -> Result<(), StoryTrackError> {
        let user_id = self.require_user().await?;
        let result = data::dismiss_recommendation(self.tables.as_ref(), &user_id, book_id).await;
        self.report("dismiss the recommendation", result)
    }

    pub async fn feedback(&self, book_id: &str, feedback: Feedback) -> Result<(), StoryTrackError> {
        let user_id = self.require_user().await?;
        let result = data::set_feedback(self.tables.as_ref(), &user_id, book_id, feedback).await;
        self.report("save feedback", result)
    }

    pub async fn stats(&self) -> Result<ReadingStats, StoryTrackError> {
        let user_id = self.require_user().await?;
        let result = data::load_stats(self.tables.as_ref(), &user_id).await;
        self.report("load statistics", result)
    }
}
