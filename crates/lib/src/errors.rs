use thiserror::Error;

/// Custom error types for the StoryTrack client.
#[derive(Error, Debug)]
pub enum StoryTrackError {
    #[error("Failed to build Reqwest client: {0}")]
    ReqwestClientBuild(reqwest::Error),
    #[error("Failed to send request to backend: {0}")]
    BackendRequest(reqwest::Error),
    #[error("Failed to deserialize backend response: {0}")]
    BackendDeserialization(reqwest::Error),
    #[error("Backend returned {status}: {message}")]
    BackendApi { status: u16, message: String },
    #[error("Authentication failed: {0}")]
    Auth(String),
    #[error("You are not signed in")]
    NotSignedIn,
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("Realtime channel error: {0}")]
    Realtime(String),
    #[error("Unsupported filter for this operation: {0}")]
    UnsupportedFilter(String),
    #[error("Missing configuration: {0}")]
    MissingConfig(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    JsonSerialization(#[from] serde_json::Error),
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),
    #[error("Invalid URL: {0}")]
    Url(#[from] url::ParseError),
}

impl StoryTrackError {
    /// A short, user-facing description suitable for a toast.
    pub fn user_message(&self) -> String {
        match self {
            StoryTrackError::BackendRequest(_) => {
                "Could not reach the server. Check your connection.".to_string()
            }
            StoryTrackError::BackendApi { message, .. } => message.clone(),
            StoryTrackError::Auth(msg) | StoryTrackError::Validation(msg) => msg.clone(),
            StoryTrackError::NotSignedIn => "Please sign in first.".to_string(),
            other => other.to_string(),
        }
    }
}
