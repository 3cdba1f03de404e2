//! Password sign-in against the platform's auth endpoint.

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{broadcast, RwLock};

use super::{AuthEvent, AuthService, Session, User};
use crate::error::ServiceError;

/// Refresh the access token when it expires within this many seconds.
const REFRESH_MARGIN_SECS: i64 = 60;

/// Capacity of the auth event channel.
const EVENT_CAPACITY: usize = 16;

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    user: User,
}

/// Claims read from an access token. Only what the client needs.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub exp: i64,
    #[serde(default)]
    pub email: Option<String>,
}

/// Decode the payload of a JWT without verifying its signature.
pub fn decode_claims(token: &str) -> Option<Claims> {
    let payload = token.split('.').nth(1)?;
    let bytes = URL_SAFE_NO_PAD.decode(payload.trim_end_matches('=')).ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Warning text when a token's expiry is implausible relative to the local
/// clock, which usually means the machine's clock is wrong.
fn skew_warning(expires_at: DateTime<Utc>, now: DateTime<Utc>) -> Option<&'static str> {
    if expires_at < now {
        Some("Session expiration time is in the past; check the system clock")
    } else if expires_at - now > Duration::days(1) {
        Some("Session expiration time is more than 1 day in the future; check the system clock")
    } else {
        None
    }
}

/// Auth client that holds one session in memory and refreshes it on demand.
pub struct SessionAuth {
    base_url: String,
    anon_key: String,
    http: reqwest::Client,
    session: RwLock<Option<Session>>,
    events: broadcast::Sender<AuthEvent>,
}

impl SessionAuth {
    pub fn new(base_url: &str, anon_key: &str) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            anon_key: anon_key.to_string(),
            http: reqwest::Client::new(),
            session: RwLock::new(None),
            events,
        }
    }

    fn token_url(&self, grant_type: &str) -> String {
        format!("{}/auth/v1/token?grant_type={}", self.base_url, grant_type)
    }

    pub async fn sign_in_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<User, ServiceError> {
        let body = json!({ "email": email, "password": password });
        let session = self.request_token("password", body).await?;
        let user = session.user.clone();
        *self.session.write().await = Some(session);

        tracing::info!(user = %user.id, "Signed in");
        let _ = self.events.send(AuthEvent::SignedIn(user.clone()));
        Ok(user)
    }

    /// Exchange the refresh token for a new session.
    pub async fn refresh(&self) -> Result<(), ServiceError> {
        let refresh_token = match self.session.read().await.as_ref() {
            Some(session) => session.refresh_token.clone(),
            None => return Err(ServiceError::new("No session to refresh")),
        };
        let body = json!({ "refresh_token": refresh_token });
        let session = self.request_token("refresh_token", body).await?;
        *self.session.write().await = Some(session);

        tracing::debug!("Access token refreshed");
        let _ = self.events.send(AuthEvent::TokenRefreshed);
        Ok(())
    }

    /// Revoke the session server-side and forget it locally. The local session
    /// is cleared even if the server call fails.
    pub async fn sign_out(&self) -> Result<(), ServiceError> {
        let session = self.session.write().await.take();
        let _ = self.events.send(AuthEvent::SignedOut);

        let Some(session) = session else {
            return Ok(());
        };
        let response = self
            .http
            .post(format!("{}/auth/v1/logout", self.base_url))
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", session.access_token))
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(ServiceError::with_status(
                "Sign-out was not acknowledged",
                response.status().as_u16(),
            ));
        }
        tracing::info!("Signed out");
        Ok(())
    }

    async fn request_token(
        &self,
        grant_type: &str,
        body: serde_json::Value,
    ) -> Result<Session, ServiceError> {
        let response = self
            .http
            .post(self.token_url(grant_type))
            .header("apikey", &self.anon_key)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = error_message(&text, "Authentication failed");
            return Err(ServiceError::with_status(message, status.as_u16()));
        }

        let token: TokenResponse = response.json().await?;
        Ok(session_from_token(token, Utc::now()))
    }
}

/// Human-readable message from an auth error body.
fn error_message(body: &str, fallback: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            v.get("error_description")
                .or_else(|| v.get("msg"))
                .or_else(|| v.get("message"))
                .and_then(|m| m.as_str())
                .map(String::from)
        })
        .unwrap_or_else(|| fallback.to_string())
}

fn session_from_token(token: TokenResponse, now: DateTime<Utc>) -> Session {
    let expires_at = token
        .expires_at
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        .or_else(|| token.expires_in.map(|secs| now + Duration::seconds(secs)))
        .or_else(|| {
            decode_claims(&token.access_token)
                .and_then(|claims| Utc.timestamp_opt(claims.exp, 0).single())
        })
        .unwrap_or(now);

    if let Some(warning) = skew_warning(expires_at, now) {
        tracing::warn!(expires_at = %expires_at, "{}", warning);
    }

    Session {
        access_token: token.access_token,
        refresh_token: token.refresh_token,
        expires_at,
        user: token.user,
    }
}

#[async_trait]
impl AuthService for SessionAuth {
    async fn current_user(&self) -> Option<User> {
        self.session().await.map(|s| s.user)
    }

    async fn session(&self) -> Option<Session> {
        let needs_refresh = match self.session.read().await.as_ref() {
            Some(session) => session.expires_within(Utc::now(), REFRESH_MARGIN_SECS),
            None => return None,
        };
        if needs_refresh {
            if let Err(e) = self.refresh().await {
                tracing::warn!("Token refresh failed: {}", e.display_message());
            }
        }
        self.session.read().await.clone()
    }

    fn subscribe(&self) -> broadcast::Receiver<AuthEvent> {
        self.events.subscribe()
    }

    async fn update_password(&self, password: &str) -> Result<(), ServiceError> {
        let session = self
            .session()
            .await
            .ok_or_else(|| ServiceError::new("Not signed in"))?;
        let response = self
            .http
            .put(format!("{}/auth/v1/user", self.base_url))
            .header("apikey", &self.anon_key)
            .header("Authorization", format!("Bearer {}", session.access_token))
            .json(&json!({ "password": password }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            let message = error_message(&text, "Password change failed");
            return Err(ServiceError::with_status(message, status.as_u16()));
        }
        Ok(())
    }
}
