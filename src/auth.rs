//! Credentials for the storage API.
//!
//! The pipeline never reads secrets itself. It asks an injected
//! [`CredentialProvider`] for a bearer token once per request and wraps it in
//! a [`Transport`] that stamps the token on every call. Providers are free to
//! refresh as part of that first call; [`RefreshTokenProvider`] does exactly
//! that against Google's OAuth2 token endpoint and caches the result until
//! shortly before expiry.

use crate::config::ServiceConfig;
use crate::error::SpinsheetError;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Refresh a cached token this long before Google says it expires.
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Google's default lifetime when the token response omits `expires_in`.
const DEFAULT_TOKEN_LIFETIME_SECS: u64 = 3600;

/// Source of bearer tokens for the storage API.
#[async_trait]
pub trait CredentialProvider: Send + Sync {
    /// Return a currently valid access token, refreshing if needed.
    async fn access_token(&self) -> Result<String, SpinsheetError>;
}

/// An HTTP client bound to one access token.
///
/// Every request built through it carries `Authorization: Bearer <token>`.
#[derive(Clone)]
pub struct Transport {
    http: Client,
    token: String,
}

impl Transport {
    pub fn new(http: Client, token: impl Into<String>) -> Self {
        Self {
            http,
            token: token.into(),
        }
    }

    /// Acquire a token from `provider` and bind it to `http`.
    pub async fn acquire(
        http: &Client,
        provider: &dyn CredentialProvider,
    ) -> Result<Self, SpinsheetError> {
        let token = provider.access_token().await?;
        Ok(Self::new(http.clone(), token))
    }

    pub fn get(&self, url: &str) -> RequestBuilder {
        self.http.get(url).bearer_auth(&self.token)
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        self.http.post(url).bearer_auth(&self.token)
    }
}

impl fmt::Debug for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("token", &"<redacted>")
            .finish()
    }
}

// ── Static token ─────────────────────────────────────────────────────────

/// A fixed access token, e.g. from `gcloud auth print-access-token`.
pub struct StaticToken {
    token: String,
}

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl CredentialProvider for StaticToken {
    async fn access_token(&self) -> Result<String, SpinsheetError> {
        if self.token.is_empty() {
            return Err(SpinsheetError::Credentials("access token is empty".into()));
        }
        Ok(self.token.clone())
    }
}

// ── OAuth2 refresh-token grant ───────────────────────────────────────────

/// Exchanges a long-lived refresh token for short-lived access tokens.
pub struct RefreshTokenProvider {
    http: Client,
    token_url: String,
    client_id: String,
    client_secret: String,
    refresh_token: String,
    cached: Mutex<Option<CachedToken>>,
}

struct CachedToken {
    value: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

impl RefreshTokenProvider {
    pub fn new(
        http: Client,
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
        refresh_token: impl Into<String>,
    ) -> Self {
        Self {
            http,
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
            refresh_token: refresh_token.into(),
            cached: Mutex::new(None),
        }
    }

    async fn refresh(&self) -> Result<CachedToken, SpinsheetError> {
        debug!("Refreshing access token at {}", self.token_url);
        let response = self
            .http
            .post(&self.token_url)
            .form(&[
                ("grant_type", "refresh_token"),
                ("client_id", self.client_id.as_str()),
                ("client_secret", self.client_secret.as_str()),
                ("refresh_token", self.refresh_token.as_str()),
            ])
            .send()
            .await
            .map_err(|e| SpinsheetError::Credentials(format!("token request failed: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SpinsheetError::Credentials(format!(
                "token endpoint returned {status}: {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| SpinsheetError::Credentials(format!("bad token response: {e}")))?;

        let lifetime = token.expires_in.unwrap_or(DEFAULT_TOKEN_LIFETIME_SECS);
        info!("Obtained access token valid for {}s", lifetime);
        Ok(CachedToken {
            value: token.access_token,
            expires_at: Instant::now() + Duration::from_secs(lifetime),
        })
    }
}

#[async_trait]
impl CredentialProvider for RefreshTokenProvider {
    async fn access_token(&self) -> Result<String, SpinsheetError> {
        // Held across the refresh so concurrent requests share one exchange.
        let mut cached = self.cached.lock().await;
        if let Some(ref token) = *cached {
            if token.expires_at > Instant::now() + EXPIRY_MARGIN {
                return Ok(token.value.clone());
            }
        }
        let fresh = self.refresh().await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }
}

// ── Resolution ───────────────────────────────────────────────────────────

/// Resolve the credential provider, from most-specific to least-specific.
///
/// 1. **Pre-built provider** (`config.credentials`): used as-is.
/// 2. **`SPINSHEET_ACCESS_TOKEN`**: a fixed bearer token.
/// 3. **`SPINSHEET_CLIENT_ID` + `SPINSHEET_CLIENT_SECRET` +
///    `SPINSHEET_REFRESH_TOKEN`**: OAuth2 refresh against `config.token_url`.
pub fn resolve_credentials(
    config: &ServiceConfig,
    http: &Client,
) -> Result<Arc<dyn CredentialProvider>, SpinsheetError> {
    if let Some(ref provider) = config.credentials {
        return Ok(Arc::clone(provider));
    }

    if let Some(token) = non_empty_env("SPINSHEET_ACCESS_TOKEN") {
        return Ok(Arc::new(StaticToken::new(token)));
    }

    if let (Some(id), Some(secret), Some(refresh)) = (
        non_empty_env("SPINSHEET_CLIENT_ID"),
        non_empty_env("SPINSHEET_CLIENT_SECRET"),
        non_empty_env("SPINSHEET_REFRESH_TOKEN"),
    ) {
        return Ok(Arc::new(RefreshTokenProvider::new(
            http.clone(),
            config.token_url.clone(),
            id,
            secret,
            refresh,
        )));
    }

    Err(SpinsheetError::Credentials(
        "no credentials configured.\n\
         Set SPINSHEET_ACCESS_TOKEN, or SPINSHEET_CLIENT_ID, SPINSHEET_CLIENT_SECRET \
         and SPINSHEET_REFRESH_TOKEN."
            .into(),
    ))
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}
