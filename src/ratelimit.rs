//! Sliding-window admission control.
//!
//! The limiter counts admitted calls per key over a trailing window. The
//! count and the insert of the new event happen in one statement, so two
//! callers racing for the last slot cannot both be admitted.

use std::time::Duration;

use chrono::Utc;
use futures_util::future::BoxFuture;
use sqlx::SqlitePool;

use crate::{
    error::Error,
    provider::{Payload, Provider, ProviderError},
};

pub trait Limiter: Send + Sync + 'static {
    /// Returns `true` when `key` has used up its budget for the current
    /// window. Otherwise records the call and returns `false`.
    ///
    /// An `Err` means the limiter itself is broken, which is not the same as
    /// being limited. Callers decide whether to fail open or closed.
    fn limit<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool, Error>>;
}

impl<L: Limiter + ?Sized> Limiter for std::sync::Arc<L> {
    fn limit<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool, Error>> {
        (**self).limit(key)
    }
}

/// Sliding-window limiter backed by the `rate_limit_events` table.
#[derive(Clone)]
pub struct SqliteSlidingWindowLimiter {
    db: SqlitePool,
    threshold: u64,
    interval: Duration,
}

impl SqliteSlidingWindowLimiter {
    /// Allows at most `threshold` calls per `interval` for each key. A
    /// threshold of zero limits every call.
    pub fn new(db: SqlitePool, threshold: u64, interval: Duration) -> Result<Self, Error> {
        if interval.is_zero() {
            return Err(Error::invalid_parameter("rate limit interval must be non-zero"));
        }

        Ok(Self {
            db,
            threshold,
            interval,
        })
    }

    pub fn threshold(&self) -> u64 {
        self.threshold
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Limiter for SqliteSlidingWindowLimiter {
    fn limit<'a>(&'a self, key: &'a str) -> BoxFuture<'a, Result<bool, Error>> {
        Box::pin(async move {
            let now = Utc::now().timestamp_millis();
            let window = i64::try_from(self.interval.as_millis()).unwrap_or(i64::MAX);
            let threshold = i64::try_from(self.threshold).unwrap_or(i64::MAX);

            let admitted = sqlx::query(
                "
                INSERT INTO rate_limit_events (key, at, expires_at)
                SELECT $1, $2, $3
                WHERE (
                    SELECT COUNT(*) FROM rate_limit_events
                    WHERE key = $1 AND at > $4
                ) < $5
                ",
            )
            .bind(key)
            .bind(now)
            .bind(now.saturating_add(window))
            .bind(now.saturating_sub(window))
            .bind(threshold)
            .execute(&self.db)
            .await?
            .rows_affected();

            let limited = admitted == 0;

            if limited {
                tracing::debug!(key, threshold = self.threshold, "Rate limit reached");
            }

            Ok(limited)
        })
    }
}

/// Provider wrapper that refuses to send while its channel is limited.
///
/// A broken limiter is treated like a limited one. There is no retry path
/// here; see [`crate::dispatch::Dispatcher`] for the variant that defers
/// refused messages to the retry queue.
pub struct RateLimited<P, L> {
    inner: P,
    limiter: L,
    key: String,
}

impl<P: Provider, L: Limiter> RateLimited<P, L> {
    pub fn new(inner: P, limiter: L, key: impl Into<String>) -> Self {
        Self {
            inner,
            limiter,
            key: key.into(),
        }
    }
}

impl<P: Provider, L: Limiter> Provider for RateLimited<P, L> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn send<'a>(&'a self, payload: &'a Payload) -> BoxFuture<'a, Result<(), ProviderError>> {
        Box::pin(async move {
            match self.limiter.limit(&self.key).await {
                Ok(false) => self.inner.send(payload).await,
                Ok(true) => Err(ProviderError::Limited {
                    key: self.key.clone(),
                }),
                Err(e) => {
                    tracing::warn!(key = %self.key, "Rate limiter unavailable, refusing send: {e}");
                    Err(ProviderError::Limited {
                        key: self.key.clone(),
                    })
                }
            }
        })
    }
}
