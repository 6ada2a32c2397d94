//! # Authentication Provider
//!
//! Sign-up, sign-in, sign-out, password recovery and session retrieval
//! against the hosted auth service (GoTrue-compatible endpoints).

use crate::{
    constants::SESSION_EXPIRY_SKEW_SECS, errors::StoryTrackError,
    providers::backend::rest::check_status,
};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use dyn_clone::DynClone;
use reqwest::{Client as ReqwestClient, RequestBuilder};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::fmt::{self, Debug};
use tracing::{debug, info};

/// The user record returned by the auth service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuthUser {
    pub id: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub user_metadata: Value,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl AuthUser {
    /// The username chosen at sign-up, if one was stored in the metadata.
    pub fn username(&self) -> Option<&str> {
        self.user_metadata.get("username").and_then(Value::as_str)
    }
}

/// An authenticated session.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_at: DateTime<Utc>,
    pub user: AuthUser,
}

impl Session {
    /// Whether the access token is expired (or about to be) at `now`.
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at - Duration::seconds(SESSION_EXPIRY_SKEW_SECS) <= now
    }
}

/// The result of a sign-up: a session only when the project auto-confirms.
#[derive(Debug, Clone, PartialEq)]
pub struct SignUp {
    pub user: AuthUser,
    pub session: Option<Session>,
}

#[derive(Deserialize, Debug)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: AuthUser,
}

impl TokenResponse {
    fn into_session(self, now: DateTime<Utc>) -> Session {
        let expires_at = self
            .expires_at
            .and_then(|ts| Utc.timestamp_opt(ts, 0).single())
            .unwrap_or_else(|| now + Duration::seconds(self.expires_in.unwrap_or(3600)));
        Session {
            access_token: self.access_token,
            refresh_token: self.refresh_token,
            expires_at,
            user: self.user,
        }
    }
}

/// A trait for the hosted authentication service.
#[async_trait]
pub trait AuthProvider: Send + Sync + Debug + DynClone {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        username: &str,
    ) -> Result<SignUp, StoryTrackError>;

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, StoryTrackError>;

    async fn sign_out(&self, access_token: &str) -> Result<(), StoryTrackError>;

    /// Emails a recovery token to `email`.
    async fn reset_password_for_email(
        &self,
        email: &str,
        redirect_to: Option<&str>,
    ) -> Result<(), StoryTrackError>;

    /// Exchanges an emailed recovery token for a session.
    async fn verify_recovery(&self, email: &str, token: &str) -> Result<Session, StoryTrackError>;

    async fn update_password(
        &self,
        access_token: &str,
        new_password: &str,
    ) -> Result<AuthUser, StoryTrackError>;

    /// Resolves the user behind an access token, validating it in the process.
    async fn get_user(&self, access_token: &str) -> Result<AuthUser, StoryTrackError>;

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, StoryTrackError>;
}

dyn_clone::clone_trait_object!(AuthProvider);

/// Rejects obviously malformed addresses before they reach the backend.
pub fn validate_email(email: &str) -> Result<(), StoryTrackError> {
    let email = email.trim();
    let valid = match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    };
    if valid {
        Ok(())
    } else {
        Err(StoryTrackError::Validation(format!(
            "'{email}' is not a valid email address"
        )))
    }
}

pub fn validate_password(password: &str) -> Result<(), StoryTrackError> {
    if password.chars().count() < 6 {
        return Err(StoryTrackError::Validation(
            "password must be at least 6 characters".to_string(),
        ));
    }
    Ok(())
}

/// An [`AuthProvider`] speaking to the hosted `/auth/v1` endpoints.
#[derive(Clone)]
pub struct RestAuthProvider {
    client: ReqwestClient,
    base_url: String,
    anon_key: String,
}

impl fmt::Debug for RestAuthProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RestAuthProvider")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl RestAuthProvider {
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
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/auth/v1/{}", self.base_url, path)
    }

    fn with_key(&self, builder: RequestBuilder) -> RequestBuilder {
        builder.header("apikey", &self.anon_key)
    }

    async fn token_request(&self, grant_type: &str, body: Value) -> Result<Session, StoryTrackError> {
        let response = self
            .with_key(self.client.post(self.url("token")))
            .query(&[("grant_type", grant_type)])
            .json(&body)
            .send()
            .await
            .map_err(StoryTrackError::BackendRequest)?;
        let response = check_status(response).await.map_err(into_auth_error)?;
        let token: TokenResponse = response
            .json()
            .await
            .map_err(StoryTrackError::BackendDeserialization)?;
        Ok(token.into_session(Utc::now()))
    }
}

/// Auth failures surface as `Auth` so callers can tell them apart.
fn into_auth_error(err: StoryTrackError) -> StoryTrackError {
    match err {
        StoryTrackError::BackendApi { message, .. } => StoryTrackError::Auth(message),
        other => other,
    }
}

#[async_trait]
impl AuthProvider for RestAuthProvider {
    async fn sign_up(
        &self,
        email: &str,
        password: &str,
        username: &str,
    ) -> Result<SignUp, StoryTrackError> {
        validate_email(email)?;
        validate_password(password)?;
        if username.trim().is_empty() {
            return Err(StoryTrackError::Validation(
                "username must not be empty".to_string(),
            ));
        }
        info!(email, "Signing up new user");

        let response = self
            .with_key(self.client.post(self.url("signup")))
            .json(&json!({
                "email": email.trim(),
                "password": password,
                "data": { "username": username.trim() },
            }))
            .send()
            .await
            .map_err(StoryTrackError::BackendRequest)?;
        let response = check_status(response).await.map_err(into_auth_error)?;
        let body: Value = response
            .json()
            .await
            .map_err(StoryTrackError::BackendDeserialization)?;

        // Auto-confirmed projects answer with a full session, others with the bare user.
        if body.get("access_token").is_some() {
            let token: TokenResponse = serde_json::from_value(body)?;
            let session = token.into_session(Utc::now());
            Ok(SignUp {
                user: session.user.clone(),
                session: Some(session),
            })
        } else {
            let user_value = body.get("user").cloned().unwrap_or(body);
            Ok(SignUp {
                user: serde_json::from_value(user_value)?,
                session: None,
            })
        }
    }

    async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Session, StoryTrackError> {
        validate_email(email)?;
        validate_password(password)?;
        info!(email, "Signing in with password");
        self.token_request(
            "password",
            json!({ "email": email.trim(), "password": password }),
        )
        .await
    }

    async fn sign_out(&self, access_token: &str) -> Result<(), StoryTrackError> {
        debug!("Signing out");
        let response = self
            .with_key(self.client.post(self.url("logout")))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(StoryTrackError::BackendRequest)?;
        check_status(response).await.map_err(into_auth_error)?;
        Ok(())
    }

    async fn reset_password_for_email(
        &self,
        email: &str,
        redirect_to: Option<&str>,
    ) -> Result<(), StoryTrackError> {
        validate_email(email)?;
        info!(email, "Requesting password recovery email");
        let mut request = self.with_key(self.client.post(self.url("recover")));
        if let Some(redirect) = redirect_to {
            request = request.query(&[("redirect_to", redirect)]);
        }
        let response = request
            .json(&json!({ "email": email.trim() }))
            .send()
            .await
            .map_err(StoryTrackError::BackendRequest)?;
        check_status(response).await.map_err(into_auth_error)?;
        Ok(())
    }

    async fn verify_recovery(&self, email: &str, token: &str) -> Result<Session, StoryTrackError> {
        validate_email(email)?;
        if token.trim().is_empty() {
            return Err(StoryTrackError::Validation(
                "recovery token must not be empty".to_string(),
            ));
        }
        let response = self
            .with_key(self.client.post(self.url("verify")))
            .json(&json!({ "type": "recovery", "email": email.trim(), "token": token.trim() }))
            .send()
            .await
            .map_err(StoryTrackError::BackendRequest)?;
        let response = check_status(response).await.map_err(into_auth_error)?;
        let token: TokenResponse = response
            .json()
            .await
            .map_err(StoryTrackError::BackendDeserialization)?;
        Ok(token.into_session(Utc::now()))
    }

    async fn update_password(
        &self,
        access_token: &str,
        new_password: &str,
    ) -> Result<AuthUser, StoryTrackError> {
        validate_password(new_password)?;
        let response = self
            .with_key(self.client.put(self.url("user")))
            .bearer_auth(access_token)
            .json(&json!({ "password": new_password }))
            .send()
            .await
            .map_err(StoryTrackError::BackendRequest)?;
        let response = check_status(response).await.map_err(into_auth_error)?;
        response
            .json()
            .await
            .map_err(StoryTrackError::BackendDeserialization)
    }

    async fn get_user(&self, access_token: &str) -> Result<AuthUser, StoryTrackError> {
        let response = self
            .with_key(self.client.get(self.url("user")))
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(StoryTrackError::BackendRequest)?;
        let response = check_status(response).await.map_err(into_auth_error)?;
        response
            .json()
            .await
            .map_err(StoryTrackError::BackendDeserialization)
    }

    async fn refresh_session(&self, refresh_token: &str) -> Result<Session, StoryTrackError> {
        debug!("Refreshing session");
        self.token_request("refresh_token", json!({ "refresh_token": refresh_token }))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_email() {
        assert!(validate_email("reader@example.com").is_ok());
        assert!(validate_email("reader@localhost").is_err());
        assert!(validate_email("@example.com").is_err());
        assert!(validate_email("no-at-sign.com").is_err());
    }

    #[test]
    fn test_session_expiry_has_skew() {
        let now = Utc::now();
        let session = Session {
            access_token: "a".to_string(),
            refresh_token: "r".to_string(),
            expires_at: now + Duration::seconds(30),
            user: AuthUser {
                id: "u1".to_string(),
                email: None,
                user_metadata: Value::Null,
                created_at: None,
            },
        };
        assert!(session.is_expired(now));
        let later = Session {
            expires_at: now + Duration::seconds(600),
            ..session
        };
        assert!(!later.is_expired(now));
    }
}
