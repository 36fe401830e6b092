//! OAuth2 client-credentials authentication against Azure AD.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::{debug, info, instrument};

use crate::client::ActivityClient;
use crate::config::Credentials;
use crate::error::{CollectorError, Result};

/// Scope requested for the Management Activity API.
pub const MANAGEMENT_SCOPE: &str = "https://manage.office.com/.default";

/// Lifetime assumed when the token response has no `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: i64 = 3600;

/// Refresh tokens this long before they expire.
const REFRESH_GRACE_MINUTES: i64 = 5;

/// Bearer token issued by the token endpoint.
#[derive(Clone)]
pub struct AccessToken {
    secret: String,
    expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn new(secret: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            secret: secret.into(),
            expires_at,
        }
    }

    /// The raw bearer string.
    pub fn secret(&self) -> &str {
        &self.secret
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    /// Returns true if the token is expired or will expire within `grace`.
    pub fn is_expired(&self, grace: Duration) -> bool {
        Utc::now() + grace >= self.expires_at
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Something that can hand out a bearer token for the next request.
#[allow(async_fn_in_trait)]
pub trait TokenSource {
    async fn bearer(&mut self) -> Result<String>;
}

/// A fixed token is used as-is for the whole run, even past its expiry.
impl TokenSource for AccessToken {
    async fn bearer(&mut self) -> Result<String> {
        Ok(self.secret.clone())
    }
}

/// Exchange client credentials for an access token.
///
/// Sends one client-credentials grant to
/// `{login_url}/{tenant_id}/oauth2/v2.0/token`, subject to the client's
/// retry policy.
///
/// # Errors
///
/// - `CollectorError::Authentication` if the endpoint answers with a non-2xx status
/// - `CollectorError::MalformedResponse` if the body has no `access_token`
#[instrument(skip(client, credentials), fields(tenant_id = %credentials.tenant_id))]
pub async fn acquire_token(
    client: &ActivityClient,
    login_url: &str,
    credentials: &Credentials,
) -> Result<AccessToken> {
    let token_url = format!(
        "{}/{}/oauth2/v2.0/token",
        login_url.trim_end_matches('/'),
        credentials.tenant_id
    );

    let params = [
        ("grant_type", "client_credentials"),
        ("client_id", credentials.client_id.as_str()),
        ("client_secret", credentials.client_secret()),
        ("scope", MANAGEMENT_SCOPE),
    ];

    let response = client
        .execute(|http| http.post(&token_url).form(&params))
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(CollectorError::Authentication { status, body });
    }

    let body: Value = response
        .json()
        .await
        .map_err(|e| CollectorError::body_error("token endpoint", e))?;

    let secret = body
        .get("access_token")
        .and_then(Value::as_str)
        .ok_or_else(|| CollectorError::malformed("token endpoint", "missing access_token field"))?;

    // Azure reports expires_in as a number, older endpoints as a string
    let lifetime_secs = match body.get("expires_in") {
        Some(Value::Number(n)) => n.as_i64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    }
    .unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);

    let expires_at = Utc::now() + Duration::seconds(lifetime_secs);

    debug!(
        "Acquired new token, expires at {}",
        expires_at.format("%Y-%m-%d %H:%M:%S UTC")
    );

    Ok(AccessToken::new(secret, expires_at))
}

/// Token source that caches the last token and reacquires it shortly
/// before it expires.
pub struct TokenProvider<'a> {
    client: &'a ActivityClient,
    login_url: String,
    credentials: Credentials,
    cached: Option<AccessToken>,
    grace: Duration,
}

impl<'a> TokenProvider<'a> {
    pub fn new(
        client: &'a ActivityClient,
        login_url: impl Into<String>,
        credentials: Credentials,
    ) -> Self {
        Self {
            client,
            login_url: login_url.into(),
            credentials,
            cached: None,
            grace: Duration::minutes(REFRESH_GRACE_MINUTES),
        }
    }

    /// Get a valid token, acquiring a new one if none is cached or the cached
    /// one is about to expire.
    pub async fn token(&mut self) -> Result<&AccessToken> {
        let token = match self.cached.take() {
            Some(token) if !token.is_expired(self.grace) => token,
            previous => {
                if previous.is_some() {
                    info!(tenant_id = %self.credentials.tenant_id, "Access token near expiry, refreshing");
                }
                acquire_token(self.client, &self.login_url, &self.credentials).await?
            }
        };

        let token: &AccessToken = self.cached.insert(token);
        Ok(token)
    }

    /// Drop the cached token, forcing a new one on next use.
    pub fn invalidate(&mut self) {
        self.cached = None;
    }
}

impl TokenSource for TokenProvider<'_> {
    async fn bearer(&mut self) -> Result<String> {
        Ok(self.token().await?.secret().to_string())
    }
}
