//! Per-call deadline for a provider.
//!
//! Transports that do not enforce their own timeout can be wrapped in
//! [`Deadline`] so a hung call surfaces as [`ProviderError::Timeout`], which is
//! the signal the failover selectors react to.

use std::time::Duration;

use futures_util::future::BoxFuture;

use super::{Payload, Provider, ProviderError};

pub struct Deadline<P> {
    inner: P,
    timeout: Duration,
}

impl<P: Provider> Deadline<P> {
    pub fn new(inner: P, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn into_inner(self) -> P {
        self.inner
    }
}

impl<P: Provider> Provider for Deadline<P> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn send<'a>(&'a self, payload: &'a Payload) -> BoxFuture<'a, Result<(), ProviderError>> {
        Box::pin(async move {
            match tokio::time::timeout(self.timeout, self.inner.send(payload)).await {
                Ok(res) => res,
                Err(_) => {
                    tracing::debug!(
                        provider = self.inner.name(),
                        timeout_ms = self.timeout.as_millis() as u64,
                        "Provider call exceeded its deadline"
                    );
                    Err(ProviderError::timeout(self.inner.name()))
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::ScriptedProvider;

    #[tokio::test(start_paused = true)]
    async fn test_slow_provider_times_out() {
        let slow = ScriptedProvider::new("slow").with_latency(Duration::from_secs(10));
        let provider = Deadline::new(slow, Duration::from_secs(1));

        let err = provider
            .send(&Payload::new("tpl", ["a"], ["1"]))
            .await
            .unwrap_err();

        assert_eq!(err, ProviderError::timeout("slow"));
        assert!(err.is_timeout());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fast_provider_passes_through() {
        let fast = ScriptedProvider::new("fast")
            .with_latency(Duration::from_millis(10))
            .then_err(ProviderError::rejected("fast", "bad number"));
        let provider = Deadline::new(fast, Duration::from_secs(1));
        let payload = Payload::new("tpl", ["a"], ["1"]);

        assert_eq!(
            provider.send(&payload).await,
            Err(ProviderError::rejected("fast", "bad number"))
        );
        assert_eq!(provider.send(&payload).await, Ok(()));
        assert_eq!(provider.into_inner().calls(), 2);
    }
}
