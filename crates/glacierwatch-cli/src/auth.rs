//! Catalog credential cache.
//!
//! Authenticated asset downloads carry a bearer token obtained from the
//! catalog's token exchange endpoint. The cache holds the current token for
//! the whole process; a 401 forces one refresh and a retry, handled by the
//! fetch path in [`crate::stac`].

use serde::Deserialize;
use tokio::sync::RwLock;

use glacierwatch_core::config::AppConfig;
use glacierwatch_core::error::{GlacierError, Result};

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
}

/// Process-wide bearer token cache.
pub struct TokenCache {
    http: reqwest::Client,
    token_url: String,
    username: String,
    password: String,
    token: RwLock<Option<String>>,
}

impl TokenCache {
    pub fn new(http: reqwest::Client, config: &AppConfig) -> Self {
        Self {
            http,
            token_url: config.stac_token_url.clone(),
            username: config.cdse_username.clone(),
            password: config.cdse_password.clone(),
            token: RwLock::new(None),
        }
    }

    /// Whether credentials are configured at all. Anonymous catalogs skip
    /// the Authorization header entirely.
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }

    /// Current token, fetching one if none is cached.
    pub async fn bearer(&self) -> Result<String> {
        if let Some(token) = self.token.read().await.clone() {
            return Ok(token);
        }
        self.refresh().await
    }

    /// Drop the cached token and fetch a fresh one. Called after a 401.
    pub async fn refresh(&self) -> Result<String> {
        if !self.has_credentials() {
            return Err(GlacierError::ConfigMissing {
                key: "CDSE_USERNAME/CDSE_PASSWORD".to_string(),
            });
        }

        let params = [
            ("grant_type", "password"),
            ("client_id", "cdse-public"),
            ("username", self.username.as_str()),
            ("password", self.password.as_str()),
        ];
        let response: TokenResponse = self
            .http
            .post(&self.token_url)
            .form(&params)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| GlacierError::Http(format!("Token exchange failed: {e}")))?
            .json()
            .await
            .map_err(|e| GlacierError::Http(format!("Bad token response: {e}")))?;

        let token = response
            .access_token
            .ok_or_else(|| GlacierError::Http("Token response had no access_token".to_string()))?;

        *self.token.write().await = Some(token.clone());
        Ok(token)
    }
}
