use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::Mutex;

use super::PlatformError;

#[derive(Clone, Debug, PartialEq)]
pub struct AccessToken {
    pub value: String,
    pub expires_at: DateTime<Utc>,
}

impl AccessToken {
    pub fn is_valid_at(&self, now: DateTime<Utc>, margin: Duration) -> bool {
        now + margin < self.expires_at
    }
}

/// Hands out a token that is valid for at least the next request.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    async fn valid_token(&self) -> Result<AccessToken, PlatformError>;
}

/// Where fresh tokens come from (an OAuth refresh, a service account, ...).
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn fetch_token(&self) -> Result<AccessToken, PlatformError>;
}

/// Caches the last token and refreshes it once it gets within `margin` of
/// its expiry.
pub struct RefreshingTokenProvider<S> {
    source: S,
    margin: Duration,
    cached: Mutex<Option<AccessToken>>,
}

impl<S: TokenSource> RefreshingTokenProvider<S> {
    pub fn new(source: S, margin: Duration) -> RefreshingTokenProvider<S> {
        RefreshingTokenProvider {
            source,
            margin,
            cached: Mutex::new(None),
        }
    }
}

#[async_trait]
impl<S: TokenSource> TokenProvider for RefreshingTokenProvider<S> {
    async fn valid_token(&self) -> Result<AccessToken, PlatformError> {
        // held across the refresh so concurrent callers share one fetch
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if token.is_valid_at(Utc::now(), self.margin) {
                return Ok(token.clone());
            }
        }

        tracing::debug!("refreshing platform access token");
        let token = self.source.fetch_token().await?;
        *cached = Some(token.clone());

        Ok(token)
    }
}

/// Issues opaque tokens with a fixed lifetime; backs the sandbox client.
pub struct IssuingTokenSource {
    prefix: String,
    ttl: Duration,
}

impl IssuingTokenSource {
    pub fn new(prefix: impl Into<String>, ttl: Duration) -> IssuingTokenSource {
        IssuingTokenSource {
            prefix: prefix.into(),
            ttl,
        }
    }
}

#[async_trait]
impl TokenSource for IssuingTokenSource {
    async fn fetch_token(&self) -> Result<AccessToken, PlatformError> {
        let now = Utc::now();
        Ok(AccessToken {
            value: format!("{}-{}", self.prefix, now.timestamp_millis()),
            expires_at: now + self.ttl,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingSource {
        fetches: Arc<AtomicUsize>,
        ttl: Duration,
    }

    #[async_trait]
    impl TokenSource for CountingSource {
        async fn fetch_token(&self) -> Result<AccessToken, PlatformError> {
            let n = self.fetches.fetch_add(1, Ordering::SeqCst);
            Ok(AccessToken {
                value: format!("token-{}", n),
                expires_at: Utc::now() + self.ttl,
            })
        }
    }

    #[tokio::test]
    async fn reuses_token_until_it_nears_expiry() {
        let fetches = Arc::new(AtomicUsize::new(0));
        let provider = RefreshingTokenProvider::new(
            CountingSource {
                fetches: Arc::clone(&fetches),
                ttl: Duration::hours(1),
            },
            Duration::minutes(5),
        );

        let first = provider.valid_token().await.unwrap();
        let second = provider.valid_token().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(fetches.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn refreshes_tokens_inside_the_margin() {
        let fetches = Arc::new(AtomicUsize::new(0));
        // every issued token already sits inside the refresh margin
        let provider = RefreshingTokenProvider::new(
            CountingSource {
                fetches: Arc::clone(&fetches),
                ttl: Duration::minutes(1),
            },
            Duration::minutes(5),
        );

        let first = provider.valid_token().await.unwrap();
        let second = provider.valid_token().await.unwrap();

        assert_ne!(first.value, second.value);
        assert_eq!(fetches.load(Ordering::SeqCst), 2);
    }
}
