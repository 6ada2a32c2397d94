use crate::{
    constants::PROFILES_TABLE,
    errors::StoryTrackError,
    providers::backend::{decode_rows, encode_row, first_row, Query, TableProvider},
    types::Profile,
};

pub async fn get_profile(
    provider: &dyn TableProvider,
    user_id: &str,
) -> Result<Option<Profile>, StoryTrackError> {
    let query = Query::new().eq("id", user_id).limit(1);
    let result = provider.select(PROFILES_TABLE, &query).await?;
    Ok(decode_rows(result.rows)?.into_iter().next())
}

pub async fn upsert_profile(
    provider: &dyn TableProvider,
    profile: &Profile,
) -> Result<Profile, StoryTrackError> {
    if profile.username.trim().is_empty() {
        return Err(StoryTrackError::Validation(
            "username must not be empty".to_string(),
        ));
    }
    let rows = provider
        .upsert(PROFILES_TABLE, vec![encode_row(profile)?], &["id"])
        .await?;
    first_row(rows, PROFILES_TABLE)
}

/// Looks up profiles by exact username. Unknown names are absent from the result.
pub async fn find_profiles_by_usernames(
    provider: &dyn TableProvider,
    usernames: &[String],
) -> Result<Vec<Profile>, StoryTrackError> {
    if usernames.is_empty() {
        return Ok(Vec::new());
    }
    let query = Query::new().in_list("username", usernames.iter().cloned());
    let result = provider.select(PROFILES_TABLE, &query).await?;
    decode_rows(result.rows)
}
