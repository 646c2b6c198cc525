//! Background workers that drain the retry queue.
//!
//! Each agent wakes up on its own ticker, claims at most one message, waits
//! out the minimum dwell time and then resends it through the failover
//! selector under a fixed-interval retry budget. A message ends either
//! `Processed` or `ProcessFailed`; nothing is retried after exhaustion.

use std::{sync::Arc, time::Duration};

use chrono::Utc;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

use crate::{
    error::Error, message::Message, provider::Provider, queue::RetryQueue,
    retry::FixedIntervalRetry,
};

#[derive(Debug, Clone, bon::Builder)]
pub struct WorkshopOptions {
    /// Number of concurrent worker loops.
    #[builder(default = 1)]
    pub agents: usize,

    /// Period between two claims of the same agent.
    #[builder(default = Duration::from_secs(1))]
    pub tick: Duration,

    /// Minimum time a message stays in the queue before it is resent.
    #[builder(default = Duration::from_secs(300))]
    pub min_dwell: Duration,

    #[builder(default)]
    pub retry: FixedIntervalRetry,
}

impl Default for WorkshopOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}

/// Outcome of a tick that did not end in an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tick {
    /// Nothing was waiting.
    Idle,
    /// Another agent claimed the message first.
    Contended,
    Processed { id: i64 },
    /// Cancelled during a dwell or retry pause. The message stays
    /// `Processing`.
    Interrupted { id: i64 },
}

pub struct Workshop {
    queue: Arc<dyn RetryQueue>,
    provider: Arc<dyn Provider>,
    options: WorkshopOptions,
}

impl Workshop {
    pub fn new(
        queue: Arc<dyn RetryQueue>,
        provider: Arc<dyn Provider>,
        options: WorkshopOptions,
    ) -> Result<Self, Error> {
        if options.agents == 0 {
            return Err(Error::invalid_parameter("workshop needs at least one agent"));
        }
        if options.tick.is_zero() {
            return Err(Error::invalid_parameter("workshop tick must be non-zero"));
        }

        Ok(Self {
            queue,
            provider,
            options,
        })
    }

    pub fn options(&self) -> &WorkshopOptions {
        &self.options
    }

    /// Starts `agents` worker loops on `tracker`. Once `token` is cancelled
    /// they stop at the next tick or pause, without aborting a running send.
    pub fn spawn(self: &Arc<Self>, tracker: &TaskTracker, token: &CancellationToken) {
        tracing::info!(agents = self.options.agents, "Starting retry workshop");

        for worker in 0..self.options.agents {
            let workshop = self.clone();
            let token = token.clone();
            tracker.spawn(async move { workshop.run(worker, token).await });
        }
    }

    async fn run(&self, worker: usize, token: CancellationToken) {
        let period = self.options.tick;
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            match self.consume(&token).await {
                Ok(Tick::Processed { id }) => {
                    tracing::info!(worker, message_id = id, "Message delivered");
                }
                Ok(Tick::Interrupted { id }) => {
                    tracing::warn!(worker, message_id = id, "Shutdown while message was in flight, leaving it in processing");
                }
                Ok(Tick::Idle | Tick::Contended) => {}
                Err(e @ Error::Exhausted { .. }) => {
                    tracing::error!(worker, "Giving up on message: {e}");
                }
                Err(e) => {
                    tracing::error!(worker, "Workshop tick failed: {e}");
                }
            }
        }

        tracing::debug!(worker, "Workshop agent stopped");
    }

    /// Runs one tick: claim a message and take it to a terminal status.
    ///
    /// Cancelling `token` cuts short the dwell and retry pauses. A send that
    /// has already started is allowed to finish.
    pub async fn consume(&self, token: &CancellationToken) -> Result<Tick, Error> {
        let message = match self.queue.claim_next().await {
            Ok(Some(message)) => message,
            Ok(None) => return Ok(Tick::Idle),
            Err(e) if e.is_claim_lost() => {
                tracing::debug!("{e}");
                return Ok(Tick::Contended);
            }
            Err(e) => return Err(e),
        };

        let remaining = self
            .options
            .min_dwell
            .saturating_sub(message.since_update(Utc::now()));
        if !remaining.is_zero() {
            tracing::debug!(message_id = message.id, ?remaining, "Waiting out dwell time");
            if !pause(token, remaining).await {
                return Ok(Tick::Interrupted { id: message.id });
            }
        }

        self.deliver(&message, token).await
    }

    async fn deliver(&self, message: &Message, token: &CancellationToken) -> Result<Tick, Error> {
        let id = message.id;
        let mut strategy = self.options.retry;
        let mut attempts = 0u32;

        loop {
            attempts += 1;

            let e = match self.provider.send(&message.payload).await {
                Ok(()) => {
                    log_finalized(id, "processed", self.queue.mark_processed(id).await);
                    return Ok(Tick::Processed { id });
                }
                Err(e) => e,
            };

            let Some(delay) = strategy.next() else {
                tracing::warn!(message_id = id, attempt = attempts, "Send failed: {e}");
                break;
            };

            tracing::warn!(message_id = id, attempt = attempts, ?delay, "Send failed, retrying: {e}");
            if let Err(e) = self.queue.record_retry(id).await {
                tracing::warn!(message_id = id, "Could not record retry: {e}");
            }
            if !pause(token, delay).await {
                return Ok(Tick::Interrupted { id });
            }
        }

        log_finalized(id, "process_failed", self.queue.mark_process_failed(id).await);

        Err(Error::Exhausted { id, attempts })
    }
}

/// Sleeps for `duration`. Returns `false` if `token` was cancelled first.
async fn pause(token: &CancellationToken, duration: Duration) -> bool {
    tokio::select! {
        _ = token.cancelled() => false,
        _ = tokio::time::sleep(duration) => true,
    }
}

/// Finalization never changes the outcome of a tick: the message was already
/// delivered or given up on.
fn log_finalized(id: i64, status: &str, res: Result<u64, Error>) {
    match res {
        Ok(1) => {}
        Ok(affected) => {
            tracing::warn!(message_id = id, affected, status, "Message was not in processing state");
        }
        Err(e) => {
            tracing::error!(message_id = id, status, "Could not finalize message: {e}");
        }
    }
}
