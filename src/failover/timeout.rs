use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use futures_util::future::BoxFuture;

use crate::{
    error::Error,
    provider::{Payload, Provider, ProviderError},
};

/// Moves to the next provider once the current one has timed out more than
/// `threshold` times in a row.
///
/// A success resets the streak. Errors other than timeouts leave it alone:
/// they say nothing about the provider's health.
pub struct TimeoutFailover<P> {
    providers: Vec<P>,
    idx: AtomicUsize,
    timeouts: AtomicU64,
    threshold: u64,
}

impl<P: Provider> TimeoutFailover<P> {
    pub fn new(providers: Vec<P>, threshold: u64) -> Result<Self, Error> {
        super::ensure_providers(&providers)?;
        Ok(Self {
            providers,
            idx: AtomicUsize::new(0),
            timeouts: AtomicU64::new(0),
            threshold,
        })
    }

    pub fn current_index(&self) -> usize {
        self.idx.load(Ordering::Acquire)
    }

    /// Current run of consecutive timeouts.
    pub fn consecutive_timeouts(&self) -> u64 {
        self.timeouts.load(Ordering::Acquire)
    }

    async fn select(&self) -> usize {
        let idx = self.idx.load(Ordering::Acquire);

        if self.timeouts.load(Ordering::Acquire) <= self.threshold {
            return idx;
        }

        let next = (idx + 1) % self.providers.len();
        match self
            .idx
            .compare_exchange(idx, next, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                self.timeouts.store(0, Ordering::Release);
                tracing::warn!(
                    from = self.providers[idx].name(),
                    to = self.providers[next].name(),
                    threshold = self.threshold,
                    "Too many consecutive timeouts, switching provider"
                );
            }
            Err(_) => tokio::time::sleep(super::SWITCH_BACKOFF).await,
        }

        self.idx.load(Ordering::Acquire)
    }
}

impl<P: Provider> Provider for TimeoutFailover<P> {
    fn name(&self) -> &str {
        "timeout-failover"
    }

    fn send<'a>(&'a self, payload: &'a Payload) -> BoxFuture<'a, Result<(), ProviderError>> {
        Box::pin(async move {
            let idx = self.select().await;

            match self.providers[idx].send(payload).await {
                Ok(()) => {
                    self.timeouts.store(0, Ordering::Release);
                    Ok(())
                }
                Err(e) if e.is_timeout() => {
                    self.timeouts.fetch_add(1, Ordering::AcqRel);
                    Err(e)
                }
                Err(e) => Err(e),
            }
        })
    }
}
