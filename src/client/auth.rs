//! Bearer-token auth with Application Default Credentials.

use std::sync::Arc;
use std::time::{Duration, Instant};

use gcp_auth::TokenProvider;
use tokio::sync::RwLock;

use crate::{Error, Result};

const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";
const TOKEN_TTL: Duration = Duration::from_secs(3600);
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(300);

pub(crate) struct CachedToken {
    token: String,
    expires_at: Instant,
}

impl std::fmt::Debug for CachedToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CachedToken")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

impl CachedToken {
    pub(crate) fn new(token: String, ttl: Duration) -> Self {
        Self {
            token,
            expires_at: Instant::now() + ttl - TOKEN_REFRESH_MARGIN,
        }
    }

    pub(crate) fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }

    pub(crate) fn token(&self) -> &str {
        &self.token
    }
}

/// Where bearer tokens come from.
pub(crate) enum TokenSource {
    /// Application Default Credentials via `gcp_auth`.
    Adc(Arc<dyn TokenProvider>),
    /// Fixed token, for tests and pre-authenticated gateways.
    Static(String),
}

impl std::fmt::Debug for TokenSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TokenSource::Adc(_) => f.write_str("TokenSource::Adc"),
            TokenSource::Static(_) => f.write_str("TokenSource::Static"),
        }
    }
}

#[derive(Debug)]
pub(crate) struct GcpAuth {
    source: TokenSource,
    cache: RwLock<Option<CachedToken>>,
}

impl GcpAuth {
    pub(crate) fn new(source: TokenSource) -> Self {
        Self {
            source,
            cache: RwLock::new(None),
        }
    }

    pub(crate) async fn bearer_token(&self) -> Result<String> {
        let provider = match &self.source {
            TokenSource::Static(token) => return Ok(token.clone()),
            TokenSource::Adc(provider) => provider,
        };

        {
            let cache = self.cache.read().await;
            if let Some(ref cached) = *cache
                && !cached.is_expired()
            {
                return Ok(cached.token().to_string());
            }
        }

        let token = provider
            .token(&[BIGQUERY_SCOPE])
            .await
            .map_err(|e| Error::auth(e.to_string()))?;

        let token_str = token.as_str().to_string();
        *self.cache.write().await = Some(CachedToken::new(token_str.clone(), TOKEN_TTL));

        Ok(token_str)
    }
}
