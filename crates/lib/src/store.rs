//! # State Containers
//!
//! The auth, theme and books slices a front end binds to. Each slice sits
//! behind its own `Arc<RwLock<_>>` so the client facade and a renderer can
//! share them across tasks.

use crate::{
    constants::{DEFAULT_PAGE_SIZE, DEFAULT_SEARCH_THRESHOLD},
    data::books::Paged,
    errors::StoryTrackError,
    pagination::Pagination,
    providers::backend::Session,
    search::filter_books,
    types::{Book, Comment, ReadStatus, UserBook},
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::sync::RwLock;
use tracing::{debug, warn};

const THEME_FILE: &str = "theme.json";

// --- Auth ---

#[derive(Debug, Clone, Default)]
pub struct AuthSlice {
    pub session: Option<Session>,
    pub loading: bool,
    pub error: Option<String>,
}

impl AuthSlice {
    pub fn set_session(&mut self, session: Session) {
        self.session = Some(session);
        self.loading = false;
        self.error = None;
    }

    pub fn clear(&mut self) {
        self.session = None;
        self.loading = false;
    }

    pub fn user_id(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.user.id.as_str())
    }

    pub fn access_token(&self) -> Option<&str> {
        self.session.as_ref().map(|s| s.access_token.as_str())
    }
}

// --- Theme ---

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Theme {
    Light,
    Dark,
    #[default]
    System,
}

impl std::str::FromStr for Theme {
    type Err = StoryTrackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "light" => Ok(Theme::Light),
            "dark" => Ok(Theme::Dark),
            "system" => Ok(Theme::System),
            other => Err(StoryTrackError::Validation(format!(
                "unknown theme '{other}' (expected light, dark or system)"
            ))),
        }
    }
}

#[derive(Serialize, Deserialize)]
struct ThemeFile {
    theme: Theme,
}

/// The colour theme, persisted as `theme.json` under the data directory.
#[derive(Debug, Clone, Default)]
pub struct ThemeSlice {
    pub theme: Theme,
    path: Option<PathBuf>,
}

impl ThemeSlice {
    /// Loads the saved theme. A missing or unreadable file yields the default.
    pub async fn load(data_dir: &Path) -> Self {
        let path = data_dir.join(THEME_FILE);
        let theme = match tokio::fs::read_to_string(&path).await {
            Ok(text) => match serde_json::from_str::<ThemeFile>(&text) {
                Ok(file) => file.theme,
                Err(e) => {
                    warn!("Ignoring malformed theme file {}: {}", path.display(), e);
                    Theme::default()
                }
            },
            Err(_) => Theme::default(),
        };
        Self {
            theme,
            path: Some(path),
        }
    }

    pub async fn save(&self) -> Result<(), StoryTrackError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let text = serde_json::to_string_pretty(&ThemeFile { theme: self.theme })?;
        tokio::fs::write(path, text).await?;
        debug!(theme = ?self.theme, "Saved theme");
        Ok(())
    }

    pub async fn set(&mut self, theme: Theme) -> Result<Theme, StoryTrackError> {
        self.theme = theme;
        self.save().await?;
        Ok(self.theme)
    }

    /// Light ↔ Dark. `System` counts as Light.
    pub async fn toggle(&mut self) -> Result<Theme, StoryTrackError> {
        let next = match self.theme {
            Theme::Dark => Theme::Light,
            Theme::Light | Theme::System => Theme::Dark,
        };
        self.set(next).await
    }
}

// --- Books ---

#[derive(Debug, Clone)]
pub struct BooksSlice {
    /// The currently loaded catalog page.
    pub books: Vec<Book>,
    pub favorites: HashSet<String>,
    pub statuses: HashMap<String, ReadStatus>,
    /// Loaded comment threads by book id, newest first.
    pub comments: HashMap<String, Vec<Comment>>,
    pub query: String,
    pub genre: Option<String>,
    pub pagination: Pagination,
    pub loading: bool,
    pub error: Option<String>,
}

impl Default for BooksSlice {
    fn default() -> Self {
        Self {
            books: Vec::new(),
            favorites: HashSet::new(),
            statuses: HashMap::new(),
            comments: HashMap::new(),
            query: String::new(),
            genre: None,
            pagination: Pagination {
                page: 1,
                page_size: DEFAULT_PAGE_SIZE,
                total_items: 0,
            },
            loading: false,
            error: None,
        }
    }
}

impl BooksSlice {
    pub fn set_page_result(&mut self, page: Paged<Book>) {
        self.books = page.items;
        self.pagination = page.pagination;
        self.loading = false;
        self.error = None;
    }

    /// Replaces favourites and statuses with the user's reading list.
    pub fn set_library(&mut self, entries: &[UserBook]) {
        self.favorites = entries
            .iter()
            .filter(|e| e.favorite)
            .map(|e| e.book_id.clone())
            .collect();
        self.statuses = entries
            .iter()
            .filter(|e| e.read_status != ReadStatus::None)
            .map(|e| (e.book_id.clone(), e.read_status))
            .collect();
    }

    pub fn is_favorite(&self, book_id: &str) -> bool {
        self.favorites.contains(book_id)
    }

    /// Sets the flag and returns the previous value.
    pub fn set_favorite(&mut self, book_id: &str, favorite: bool) -> bool {
        if favorite {
            !self.favorites.insert(book_id.to_string())
        } else {
            self.favorites.remove(book_id)
        }
    }

    pub fn status(&self, book_id: &str) -> ReadStatus {
        self.statuses.get(book_id).copied().unwrap_or_default()
    }

    /// Sets the status and returns the previous one.
    pub fn set_status(&mut self, book_id: &str, status: ReadStatus) -> ReadStatus {
        let previous = if status == ReadStatus::None {
            self.statuses.remove(book_id)
        } else {
            self.statuses.insert(book_id.to_string(), status)
        };
        previous.unwrap_or_default()
    }

    /// The loaded page narrowed by the current search query.
    pub fn visible(&self) -> Vec<Book> {
        filter_books(&self.books, &self.query, DEFAULT_SEARCH_THRESHOLD)
            .into_iter()
            .map(|hit| hit.book)
            .collect()
    }
}

// --- Store ---

#[derive(Debug, Clone, Default)]
pub struct Store {
    pub auth: Arc<RwLock<AuthSlice>>,
    pub theme: Arc<RwLock<ThemeSlice>>,
    pub books: Arc<RwLock<BooksSlice>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose theme is loaded from, and saved to, `data_dir`.
    pub async fn with_data_dir(data_dir: &Path) -> Self {
        Self {
            theme: Arc::new(RwLock::new(ThemeSlice::load(data_dir).await)),
            ..Self::default()
        }
    }

    pub async fn user_id(&self) -> Option<String> {
        self.auth.read().await.user_id().map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_favorite_returns_previous_flag() {
        let mut slice = BooksSlice::default();
        assert!(!slice.set_favorite("1", true));
        assert!(slice.set_favorite("1", true));
        assert!(slice.set_favorite("1", false));
        assert!(!slice.is_favorite("1"));
    }

    #[test]
    fn test_status_none_clears_entry() {
        let mut slice = BooksSlice::default();
        assert_eq!(slice.set_status("1", ReadStatus::Reading), ReadStatus::None);
        assert_eq!(slice.set_status("1", ReadStatus::None), ReadStatus::Reading);
        assert!(slice.statuses.is_empty());
    }

    #[tokio::test]
    async fn test_theme_persists_across_loads() {
        let dir = tempfile::tempdir().unwrap();
        let mut theme = ThemeSlice::load(dir.path()).await;
        assert_eq!(theme.theme, Theme::System);
        assert_eq!(theme.toggle().await.unwrap(), Theme::Dark);

        let reloaded = ThemeSlice::load(dir.path()).await;
        assert_eq!(reloaded.theme, Theme::Dark);
        let mut reloaded = reloaded;
        assert_eq!(reloaded.toggle().await.unwrap(), Theme::Light);
    }
}
