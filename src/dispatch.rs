//! Synchronous entry point for outbound messages.
//!
//! A send is admitted by the rate limiter, then handed to the failover
//! selector. Anything that cannot go out right away is written to the retry
//! queue by a detached task and the caller is told to expect a retry.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    error::Error,
    message::Payload,
    provider::Provider,
    queue::RetryQueue,
    ratelimit::Limiter,
    workshop::{Workshop, WorkshopOptions},
};

pub const DEFAULT_CHANNEL_KEY: &str = "sms:primary";

pub struct Dispatcher {
    limiter: Arc<dyn Limiter>,
    provider: Arc<dyn Provider>,
    queue: Arc<dyn RetryQueue>,
    channel_key: String,
    workshop: Arc<Workshop>,
    started: AtomicBool,
    tracker: TaskTracker,
    token: CancellationToken,
}

#[bon::bon]
impl Dispatcher {
    /// The workshop resends through the same `provider`, without going back
    /// through the limiter.
    #[builder]
    pub fn new(
        limiter: Arc<dyn Limiter>,
        provider: Arc<dyn Provider>,
        queue: Arc<dyn RetryQueue>,
        #[builder(default)] options: WorkshopOptions,
        #[builder(into, default = DEFAULT_CHANNEL_KEY.to_owned())] channel_key: String,
    ) -> Result<Self, Error> {
        let workshop = Workshop::new(queue.clone(), provider.clone(), options)?;

        Ok(Self {
            limiter,
            provider,
            queue,
            channel_key,
            workshop: Arc::new(workshop),
            started: AtomicBool::new(false),
            tracker: TaskTracker::new(),
            token: CancellationToken::new(),
        })
    }

    pub fn channel_key(&self) -> &str {
        &self.channel_key
    }

    pub fn is_started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    /// Sends a message now if possible.
    ///
    /// [`Error::Throttled`] and [`Error::SendFailed`] mean the message was
    /// handed to the retry queue and will be delivered in the background.
    pub async fn send<A, R>(
        &self,
        template: impl Into<String>,
        args: impl IntoIterator<Item = A>,
        recipients: impl IntoIterator<Item = R>,
    ) -> Result<(), Error>
    where
        A: Into<String>,
        R: Into<String>,
    {
        self.send_payload(Payload::new(template, args, recipients))
            .await
    }

    pub async fn send_payload(&self, payload: Payload) -> Result<(), Error> {
        match self.limiter.limit(&self.channel_key).await {
            Ok(false) => {}
            Ok(true) => {
                tracing::debug!(key = %self.channel_key, "Rate limited, deferring message");
                self.defer(payload);
                return Err(Error::Throttled);
            }
            Err(e) => {
                tracing::warn!(key = %self.channel_key, "Rate limiter unavailable, deferring message: {e}");
                self.defer(payload);
                return Err(Error::Throttled);
            }
        }

        if let Err(source) = self.provider.send(&payload).await {
            tracing::warn!(provider = self.provider.name(), "Send failed, deferring message: {source}");
            self.defer(payload);
            return Err(Error::SendFailed { source });
        }

        Ok(())
    }

    /// Starts the workshop unless it is already running. Returns whether this
    /// call started it.
    pub fn start_workshop(&self) -> bool {
        if self
            .started
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return false;
        }

        self.workshop.spawn(&self.tracker, &self.token);
        true
    }

    fn defer(&self, payload: Payload) {
        self.start_workshop();

        let queue = self.queue.clone();
        self.tracker.spawn(async move {
            match queue.enqueue(payload).await {
                Ok(message) => tracing::debug!(message_id = message.id, "Message queued for retry"),
                Err(e) => tracing::error!("Failed to queue message for retry: {e}"),
            }
        });
    }

    /// Stops the workshop and waits for pending enqueues and in-flight
    /// retries, up to `timeout`.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), Error> {
        tracing::info!(?timeout, "Shutting down dispatcher");

        self.token.cancel();
        self.tracker.close();

        match tokio::time::timeout(timeout, self.tracker.wait()).await {
            Ok(()) => Ok(()),
            Err(_) => {
                tracing::warn!(?timeout, "Workers still running after shutdown timeout");
                Err(Error::ShutdownTimeout { timeout })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        message::MessageStatus,
        mocks::{LimiterMode, MemoryRetryQueue, ScriptedProvider, StaticLimiter},
        provider::ProviderError,
    };

    struct Harness {
        dispatcher: Dispatcher,
        limiter: Arc<StaticLimiter>,
        provider: Arc<ScriptedProvider>,
        queue: Arc<MemoryRetryQueue>,
    }

    fn harness(mode: LimiterMode, provider: ScriptedProvider) -> Harness {
        let limiter = Arc::new(StaticLimiter::new(mode));
        let provider = Arc::new(provider);
        let queue = Arc::new(MemoryRetryQueue::new());

        // Long enough that no agent claims anything during a test.
        let options = WorkshopOptions::builder()
            .tick(Duration::from_secs(3600))
            .build();

        let dispatcher = Dispatcher::builder()
            .limiter(limiter.clone())
            .provider(provider.clone())
            .queue(queue.clone())
            .options(options)
            .build()
            .unwrap();

        Harness {
            dispatcher,
            limiter,
            provider,
            queue,
        }
    }

    #[tokio::test]
    async fn test_sends_directly() {
        let h = harness(LimiterMode::Allow, ScriptedProvider::new("p"));

        h.dispatcher
            .send("tmp", ["a", "b"], ["1", "2"])
            .await
            .unwrap();

        assert_eq!(h.limiter.calls(), 1);
        assert_eq!(
            h.provider.payloads(),
            vec![Payload::new("tmp", ["a", "b"], ["1", "2"])]
        );
        assert!(!h.dispatcher.is_started());

        h.dispatcher.shutdown(Duration::from_secs(1)).await.unwrap();
        assert!(h.queue.messages().is_empty());
    }

    #[tokio::test]
    async fn test_throttled_message_is_queued() {
        let h = harness(LimiterMode::Limit, ScriptedProvider::new("p"));

        let err = h
            .dispatcher
            .send("tmp", ["a"], ["1"])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Throttled));
        assert!(err.is_retry_later());
        assert_eq!(h.provider.calls(), 0);
        assert!(h.dispatcher.is_started());

        h.dispatcher.shutdown(Duration::from_secs(1)).await.unwrap();

        let messages = h.queue.messages();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].status, MessageStatus::Unprocessed);
        assert_eq!(messages[0].payload, Payload::new("tmp", ["a"], ["1"]));
    }

    #[tokio::test]
    async fn test_broken_limiter_fails_closed() {
        let h = harness(LimiterMode::Broken, ScriptedProvider::new("p"));

        assert!(matches!(
            h.dispatcher.send("tmp", ["a"], ["1"]).await,
            Err(Error::Throttled)
        ));
        assert_eq!(h.provider.calls(), 0);

        h.dispatcher.shutdown(Duration::from_secs(1)).await.unwrap();
        assert_eq!(h.queue.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_provider_failure_is_queued() {
        let h = harness(
            LimiterMode::Allow,
            ScriptedProvider::failing("p", ProviderError::timeout("p")),
        );

        let err = h
            .dispatcher
            .send("tmp", ["a"], ["1"])
            .await
            .unwrap_err();
        match err {
            Error::SendFailed { source } => assert!(source.is_timeout()),
            other => panic!("unexpected error: {other}"),
        }

        h.dispatcher.shutdown(Duration::from_secs(1)).await.unwrap();
        assert_eq!(h.queue.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_workshop_starts_once() {
        let h = harness(LimiterMode::Limit, ScriptedProvider::new("p"));

        for _ in 0..3 {
            let _ = h.dispatcher.send("tmp", ["a"], ["1"]).await;
        }
        assert!(!h.dispatcher.start_workshop());

        h.dispatcher.shutdown(Duration::from_secs(1)).await.unwrap();
        assert_eq!(h.queue.messages().len(), 3);
    }

    #[tokio::test]
    async fn test_custom_channel_key() {
        let dispatcher = Dispatcher::builder()
            .limiter(Arc::new(StaticLimiter::new(LimiterMode::Allow)))
            .provider(Arc::new(ScriptedProvider::new("p")))
            .queue(Arc::new(MemoryRetryQueue::new()))
            .channel_key("sms:backup")
            .build()
            .unwrap();

        assert_eq!(dispatcher.channel_key(), "sms:backup");
    }
}
