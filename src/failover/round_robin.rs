use std::sync::atomic::{AtomicUsize, Ordering};

use futures_util::future::BoxFuture;

use crate::{
    error::Error,
    provider::{Payload, Provider, ProviderError},
};

/// Spreads calls across providers.
///
/// Every call advances a shared cursor by one and starts from the provider it
/// lands on, so the first call goes to the second provider and consecutive
/// calls start at consecutive providers whatever the outcome.
/// Within one call, an error falls through to the following providers
/// without moving the cursor again.
pub struct RoundRobinFailover<P> {
    providers: Vec<P>,
    idx: AtomicUsize,
}

impl<P: Provider> RoundRobinFailover<P> {
    pub fn new(providers: Vec<P>) -> Result<Self, Error> {
        super::ensure_providers(&providers)?;
        Ok(Self {
            providers,
            idx: AtomicUsize::new(0),
        })
    }

    /// Index the last call started from.
    pub fn current_index(&self) -> usize {
        self.idx.load(Ordering::Acquire) % self.providers.len()
    }
}

impl<P: Provider> Provider for RoundRobinFailover<P> {
    fn name(&self) -> &str {
        "round-robin"
    }

    fn send<'a>(&'a self, payload: &'a Payload) -> BoxFuture<'a, Result<(), ProviderError>> {
        Box::pin(async move {
            let len = self.providers.len();
            let start = self.idx.fetch_add(1, Ordering::AcqRel).wrapping_add(1);

            for offset in 0..len {
                let provider = &self.providers[start.wrapping_add(offset) % len];
                match provider.send(payload).await {
                    Ok(()) => return Ok(()),
                    Err(e) => {
                        tracing::warn!(provider = provider.name(), "Send failed: {e}");
                    }
                }
            }

            Err(ProviderError::AllFailed { attempted: len })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::ScriptedProvider;

    fn payload() -> Payload {
        Payload::new("tmp", ["a"], ["1"])
    }

    #[tokio::test]
    async fn test_advances_every_call() {
        let selector = RoundRobinFailover::new(vec![
            ScriptedProvider::new("a"),
            ScriptedProvider::new("b"),
            ScriptedProvider::new("c"),
        ])
        .unwrap();

        let mut starts = Vec::new();
        for _ in 0..4 {
            selector.send(&payload()).await.unwrap();
            starts.push(selector.current_index());
        }

        assert_eq!(starts, vec![1, 2, 0, 1]);
        let calls: Vec<_> = selector.providers.iter().map(|p| p.calls()).collect();
        assert_eq!(calls, vec![1, 2, 1]);
    }

    #[tokio::test]
    async fn test_falls_through_within_call() {
        let selector = RoundRobinFailover::new(vec![
            ScriptedProvider::new("a"),
            ScriptedProvider::new("b").then_err(ProviderError::rejected("b", "down")),
        ])
        .unwrap();

        // Starts at b, which fails once, so a takes the message.
        selector.send(&payload()).await.unwrap();
        assert_eq!(selector.providers[0].calls(), 1);
        assert_eq!(selector.providers[1].calls(), 1);

        // The cursor only moved once, so this call starts at a.
        selector.send(&payload()).await.unwrap();
        assert_eq!(selector.providers[0].calls(), 2);
        assert_eq!(selector.providers[1].calls(), 1);
    }

    #[tokio::test]
    async fn test_all_failed() {
        let selector = RoundRobinFailover::new(vec![
            ScriptedProvider::failing("a", ProviderError::timeout("a")),
            ScriptedProvider::failing("b", ProviderError::timeout("b")),
        ])
        .unwrap();

        assert_eq!(
            selector.send(&payload()).await,
            Err(ProviderError::AllFailed { attempted: 2 })
        );
    }

    #[tokio::test]
    async fn test_single_provider() {
        let selector = RoundRobinFailover::new(vec![ScriptedProvider::new("only")]).unwrap();

        for _ in 0..3 {
            selector.send(&payload()).await.unwrap();
            assert_eq!(selector.current_index(), 0);
        }
        assert_eq!(selector.providers[0].calls(), 3);
    }
}
