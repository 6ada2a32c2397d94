//! Book comments and `@username` mentions.

use crate::{
    constants::{COMMENTS_TABLE, MAX_COMMENT_LEN},
    data::profiles::find_profiles_by_usernames,
    errors::StoryTrackError,
    providers::backend::{
        decode_rows, encode_row, first_row, ChannelSpec, Filter, FilterOp, Query,
        RealtimeChannel, RealtimeConfig, Subscription, TableProvider,
    },
    types::Comment,
};
use regex::Regex;
use tracing::{debug, info};

const MENTION_PATTERN: &str = r"@([A-Za-z0-9_]{2,30})";

/// Usernames mentioned in `content`, deduplicated, in order of appearance.
pub fn extract_mentions(content: &str) -> Result<Vec<String>, StoryTrackError> {
    let re = Regex::new(MENTION_PATTERN)?;
    let mut mentions: Vec<String> = Vec::new();
    for caps in re.captures_iter(content) {
        let name = caps[1].to_string();
        if !mentions.contains(&name) {
            mentions.push(name);
        }
    }
    Ok(mentions)
}

/// Trims a draft comment and checks it is postable.
pub fn validate_content(content: &str) -> Result<String, StoryTrackError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(StoryTrackError::Validation(
            "comment must not be empty".to_string(),
        ));
    }
    let len = trimmed.chars().count();
    if len > MAX_COMMENT_LEN {
        return Err(StoryTrackError::Validation(format!(
            "comment is {len} characters, the limit is {MAX_COMMENT_LEN}"
        )));
    }
    Ok(trimmed.to_string())
}

/// Comments on a book, newest first.
pub async fn list_comments(
    provider: &dyn TableProvider,
    book_id: &str,
) -> Result<Vec<Comment>, StoryTrackError> {
    let query = Query::new()
        .eq("book_id", book_id)
        .order("created_at", false);
    let result = provider.select(COMMENTS_TABLE, &query).await?;
    decode_rows(result.rows)
}

/// Posts a comment. Mentions are stored as the ids of the profiles they name;
/// names with no matching profile are dropped.
pub async fn post_comment(
    provider: &dyn TableProvider,
    user_id: &str,
    book_id: &str,
    content: &str,
) -> Result<Comment, StoryTrackError> {
    let content = validate_content(content)?;

    let usernames = extract_mentions(&content)?;
    let mentions = if usernames.is_empty() {
        Vec::new()
    } else {
        let profiles = find_profiles_by_usernames(provider, &usernames).await?;
        let resolved: Vec<String> = usernames
            .iter()
            .filter_map(|name| profiles.iter().find(|p| &p.username == name))
            .map(|p| p.id.clone())
            .collect();
        debug!(
            requested = usernames.len(),
            resolved = resolved.len(),
            "Resolved comment mentions"
        );
        resolved
    };

    let comment = Comment {
        id: None,
        user_id: user_id.to_string(),
        book_id: book_id.to_string(),
        content,
        mentions,
        created_at: None,
    };
    let rows = provider
        .insert(COMMENTS_TABLE, vec![encode_row(&comment)?])
        .await?;
    info!(book_id, user_id, "Posted comment");
    first_row(rows, COMMENTS_TABLE)
}

/// Subscribes to comment changes on one book.
pub fn subscribe_comments(
    config: RealtimeConfig,
    book_id: &str,
) -> Result<Subscription, StoryTrackError> {
    let filter = Filter::new("book_id", FilterOp::Eq, book_id).to_realtime()?;
    let spec = ChannelSpec::new(&format!("comments:{book_id}"), COMMENTS_TABLE).filter(filter);
    RealtimeChannel::subscribe(config, spec)
}
