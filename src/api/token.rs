//! Access token cache.
//!
//! One cell per process, shared by handle. A token is reused until it is
//! within five minutes of its server-declared expiry; after that the next
//! caller fetches a new one. Refreshes are serialized so concurrent callers
//! that all see a stale token trigger a single `gettoken` call.

use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::GatewayConfig;
use crate::error::ApiError;

/// Tokens are refreshed this long before they expire.
pub const REFRESH_MARGIN_MS: i64 = 5 * 60 * 1000;

/// Lifetime assumed when the platform omits `expires_in`.
const DEFAULT_EXPIRES_IN_SECS: i64 = 7200;

#[derive(Debug)]
struct CachedToken {
    token: SecretString,
    expires_at_ms: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    errcode: i64,
    #[serde(default)]
    errmsg: String,
    access_token: Option<String>,
    expires_in: Option<i64>,
}

/// Caches the bearer token for outbound API calls.
#[derive(Debug)]
pub struct TokenCache {
    http: reqwest::Client,
    api_base: String,
    corp_id: String,
    secret: SecretString,
    entry: RwLock<Option<CachedToken>>,
    refresh_lock: Mutex<()>,
}

impl TokenCache {
    pub fn new(config: &GatewayConfig, http: reqwest::Client) -> Self {
        Self {
            http,
            api_base: config.api_base.clone(),
            corp_id: config.corp_id.clone(),
            secret: SecretString::from(config.secret.expose_secret().to_string()),
            entry: RwLock::new(None),
            refresh_lock: Mutex::new(()),
        }
    }

    /// Return a usable access token, fetching a new one if needed.
    pub async fn get_token(&self) -> Result<String, ApiError> {
        if self.corp_id.is_empty() || self.secret.expose_secret().is_empty() {
            return Err(ApiError::ConfigurationMissing("WECOM_CORP_ID and WECOM_SECRET"));
        }

        if let Some(token) = self.cached(now_ms()).await {
            return Ok(token);
        }

        let _guard = self.refresh_lock.lock().await;

        // Another caller may have refreshed while we waited.
        if let Some(token) = self.cached(now_ms()).await {
            debug!("Access token refreshed by concurrent caller");
            return Ok(token);
        }

        self.refresh().await
    }

    /// Server-declared expiry of the cached token, in epoch milliseconds.
    pub async fn expires_at_ms(&self) -> Option<i64> {
        self.entry.read().await.as_ref().map(|e| e.expires_at_ms)
    }

    async fn cached(&self, now_ms: i64) -> Option<String> {
        let entry = self.entry.read().await;
        entry
            .as_ref()
            .filter(|e| is_fresh(e.expires_at_ms, now_ms))
            .map(|e| e.token.expose_secret().to_string())
    }

    async fn refresh(&self) -> Result<String, ApiError> {
        let response: TokenResponse = self
            .http
            .get(format!("{}/cgi-bin/gettoken", self.api_base))
            .query(&[
                ("corpid", self.corp_id.as_str()),
                ("corpsecret", self.secret.expose_secret()),
            ])
            .send()
            .await?
            .json()
            .await?;

        if response.errcode != 0 {
            warn!(
                errcode = response.errcode,
                errmsg = %response.errmsg,
                "Platform rejected access token request"
            );
            return Err(ApiError::Credential {
                errcode: response.errcode,
                errmsg: response.errmsg,
            });
        }

        let token = response
            .access_token
            .filter(|t| !t.is_empty())
            .ok_or_else(|| ApiError::InvalidResponse("gettoken returned no access_token".into()))?;
        let expires_in = response.expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS);
        let expires_at_ms = now_ms() + expires_in * 1000;

        *self.entry.write().await = Some(CachedToken {
            token: SecretString::from(token.clone()),
            expires_at_ms,
        });

        info!(expires_in, "Access token refreshed");
        Ok(token)
    }

    #[cfg(test)]
    async fn prime(&self, token: &str, expires_at_ms: i64) {
        *self.entry.write().await = Some(CachedToken {
            token: SecretString::from(token.to_string()),
            expires_at_ms,
        });
    }
}

/// A token is usable until it is within [`REFRESH_MARGIN_MS`] of expiry.
fn is_fresh(expires_at_ms: i64, now_ms: i64) -> bool {
    now_ms < expires_at_ms - REFRESH_MARGIN_MS
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
