use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use futures_util::future::BoxFuture;

use crate::{
    error::Error,
    provider::{Payload, Provider, ProviderError},
};

/// Moves to the next provider once the share of timed-out calls on the
/// current one reaches `rate`.
///
/// Only timeouts count as failures. Other errors are returned to the caller
/// without touching the counters, since they are not evidence that a
/// different provider would do better.
pub struct FailureRateFailover<P> {
    providers: Vec<P>,
    idx: AtomicUsize,
    failures: AtomicU64,
    successes: AtomicU64,
    rate: f64,
}

impl<P: Provider> FailureRateFailover<P> {
    /// `rate` must be within `[0, 1]`.
    pub fn new(providers: Vec<P>, rate: f64) -> Result<Self, Error> {
        super::ensure_providers(&providers)?;

        if !(0.0..=1.0).contains(&rate) {
            return Err(Error::invalid_parameter(format!(
                "failure rate must be within [0, 1], got {rate}"
            )));
        }

        Ok(Self {
            providers,
            idx: AtomicUsize::new(0),
            failures: AtomicU64::new(0),
            successes: AtomicU64::new(0),
            rate,
        })
    }

    pub fn current_index(&self) -> usize {
        self.idx.load(Ordering::Acquire)
    }

    /// `(successes, failures)` recorded against the current provider.
    pub fn counters(&self) -> (u64, u64) {
        (
            self.successes.load(Ordering::Acquire),
            self.failures.load(Ordering::Acquire),
        )
    }

    fn should_switch(&self) -> bool {
        let (successes, failures) = self.counters();
        let total = successes + failures;

        // Nothing observed yet on this provider.
        if total == 0 {
            return false;
        }

        failures as f64 / total as f64 >= self.rate
    }

    async fn select(&self) -> usize {
        let idx = self.idx.load(Ordering::Acquire);

        if !self.should_switch() {
            return idx;
        }

        let next = (idx + 1) % self.providers.len();
        match self
            .idx
            .compare_exchange(idx, next, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => {
                self.failures.store(0, Ordering::Release);
                self.successes.store(0, Ordering::Release);
                tracing::warn!(
                    from = self.providers[idx].name(),
                    to = self.providers[next].name(),
                    rate = self.rate,
                    "Failure rate reached, switching provider"
                );
            }
            Err(_) => tokio::time::sleep(super::SWITCH_BACKOFF).await,
        }

        self.idx.load(Ordering::Acquire)
    }
}

impl<P: Provider> Provider for FailureRateFailover<P> {
    fn name(&self) -> &str {
        "failure-rate-failover"
    }

    fn send<'a>(&'a self, payload: &'a Payload) -> BoxFuture<'a, Result<(), ProviderError>> {
        Box::pin(async move {
            let idx = self.select().await;

            match self.providers[idx].send(payload).await {
                Ok(()) => {
                    self.successes.fetch_add(1, Ordering::AcqRel);
                    Ok(())
                }
                Err(e) if e.is_timeout() => {
                    self.failures.fetch_add(1, Ordering::AcqRel);
                    Err(e)
                }
                Err(e) => Err(e),
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::mocks::ScriptedProvider;

    fn payload() -> Payload {
        Payload::new("tmp", ["a", "b", "c"], ["1", "2", "3"])
    }

    fn preset<P: Provider>(providers: Vec<P>, successes: u64, failures: u64) -> FailureRateFailover<P> {
        let selector = FailureRateFailover::new(providers, 0.5).unwrap();
        selector.successes.store(successes, Ordering::SeqCst);
        selector.failures.store(failures, Ordering::SeqCst);
        selector
    }

    #[test]
    fn test_rejects_bad_parameters() {
        assert!(matches!(
            FailureRateFailover::<ScriptedProvider>::new(vec![], 0.5),
            Err(Error::InvalidParameter { .. })
        ));

        for rate in [-0.1, 1.1, f64::NAN] {
            assert!(matches!(
                FailureRateFailover::new(vec![ScriptedProvider::new("a")], rate),
                Err(Error::InvalidParameter { .. })
            ));
        }

        assert!(FailureRateFailover::new(vec![ScriptedProvider::new("a")], 0.0).is_ok());
        assert!(FailureRateFailover::new(vec![ScriptedProvider::new("a")], 1.0).is_ok());
    }

    #[tokio::test]
    async fn test_outcome_accounting() {
        struct Case {
            name: &'static str,
            outcome: Result<(), ProviderError>,
            start: (u64, u64),
            want: (u64, u64),
        }

        let cases = [
            Case {
                name: "success, no history",
                outcome: Ok(()),
                start: (5, 0),
                want: (6, 0),
            },
            Case {
                name: "success below rate",
                outcome: Ok(()),
                start: (5, 1),
                want: (6, 1),
            },
            Case {
                name: "timeout below rate",
                outcome: Err(ProviderError::timeout("p")),
                start: (5, 1),
                want: (5, 2),
            },
            Case {
                name: "other error below rate",
                outcome: Err(ProviderError::rejected("p", "unknown")),
                start: (5, 1),
                want: (5, 1),
            },
        ];

        for case in cases {
            let provider = ScriptedProvider::new("p");
            provider.push(case.outcome.clone());
            let selector = preset(vec![provider], case.start.0, case.start.1);

            assert_eq!(selector.send(&payload()).await, case.outcome, "{}", case.name);
            assert_eq!(selector.counters(), case.want, "{}", case.name);
            assert_eq!(selector.current_index(), 0, "{}", case.name);
        }
    }

    #[tokio::test]
    async fn test_switch_resets_counters() {
        // 5/10 failed: the next call goes to the second provider.
        let selector = preset(
            vec![ScriptedProvider::new("a"), ScriptedProvider::new("b")],
            5,
            5,
        );
        selector.send(&payload()).await.unwrap();
        assert_eq!(selector.current_index(), 1);
        assert_eq!(selector.counters(), (1, 0));
        assert_eq!(selector.providers[0].calls(), 0);
        assert_eq!(selector.providers[1].calls(), 1);

        let selector = preset(
            vec![
                ScriptedProvider::new("a"),
                ScriptedProvider::failing("b", ProviderError::timeout("b")),
            ],
            5,
            5,
        );
        assert!(selector.send(&payload()).await.unwrap_err().is_timeout());
        assert_eq!(selector.current_index(), 1);
        assert_eq!(selector.counters(), (0, 1));
    }

    #[tokio::test]
    async fn test_switches_after_half_timeouts() {
        let selector = FailureRateFailover::new(
            vec![
                ScriptedProvider::new("a")
                    .then_ok()
                    .then_ok()
                    .then_ok()
                    .then_ok()
                    .then_ok()
                    .then_timeouts(5),
                ScriptedProvider::new("b")
                    .then_err(ProviderError::rejected("b", "bad recipient")),
            ],
            0.5,
        )
        .unwrap();

        for _ in 0..10 {
            let _ = selector.send(&payload()).await;
            assert_eq!(selector.current_index(), 0);
        }
        assert_eq!(selector.counters(), (5, 5));

        // The 11th call switches first. b's error is not a timeout, so the
        // freshly reset counters stay at zero.
        assert!(!selector.send(&payload()).await.unwrap_err().is_timeout());
        assert_eq!(selector.current_index(), 1);
        assert_eq!(selector.counters(), (0, 0));
        assert_eq!(selector.providers[0].calls(), 10);
        assert_eq!(selector.providers[1].calls(), 1);
    }

    #[tokio::test]
    async fn test_single_provider_stays_at_zero() {
        let selector = preset(vec![ScriptedProvider::new("only")], 1, 9);

        selector.send(&payload()).await.unwrap();
        assert_eq!(selector.current_index(), 0);
        assert_eq!(selector.counters(), (1, 0));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_switch() {
        let selector = Arc::new(preset(
            vec![
                ScriptedProvider::new("a"),
                ScriptedProvider::new("b"),
                ScriptedProvider::new("c"),
            ],
            0,
            10,
        ));

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let selector = selector.clone();
                tokio::spawn(async move { selector.send(&payload()).await })
            })
            .collect();

        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // Whoever wins the swap resets the counters; later callers see a clean,
        // successful history and stay on the new provider.
        assert_ne!(selector.current_index(), 0);
        assert_eq!(selector.counters().1, 0);
        let calls: usize = selector.providers.iter().map(|p| p.calls()).sum();
        assert_eq!(calls, 16);
    }
}
