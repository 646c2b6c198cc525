//! Test doubles for the provider, queue and limiter seams.
//!
//! These let the selectors, the workshop and the dispatcher be exercised
//! without a gateway or a database. Outside this crate's own tests they are
//! only built with the `mocks` feature.

use std::{
    collections::{BTreeMap, VecDeque},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Mutex,
    },
    time::Duration,
};

use chrono::Utc;
use futures_util::future::BoxFuture;

use crate::{
    error::Error,
    message::{Message, MessageStatus, Payload},
    provider::{Provider, ProviderError},
    queue::RetryQueue,
    ratelimit::Limiter,
};

/// Provider that replays a script of outcomes, then falls back to a default.
#[derive(Debug)]
pub struct ScriptedProvider {
    name: String,
    script: Mutex<VecDeque<Result<(), ProviderError>>>,
    fallback: Result<(), ProviderError>,
    latency: Duration,
    calls: AtomicUsize,
    payloads: Mutex<Vec<Payload>>,
}

impl ScriptedProvider {
    /// A provider that succeeds unless told otherwise.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            script: Mutex::new(VecDeque::new()),
            fallback: Ok(()),
            latency: Duration::ZERO,
            calls: AtomicUsize::new(0),
            payloads: Mutex::new(Vec::new()),
        }
    }

    /// A provider whose every call fails with `err`.
    pub fn failing(name: impl Into<String>, err: ProviderError) -> Self {
        Self {
            fallback: Err(err),
            ..Self::new(name)
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn then_ok(self) -> Self {
        self.push(Ok(()));
        self
    }

    pub fn then_err(self, err: ProviderError) -> Self {
        self.push(Err(err));
        self
    }

    /// Queues `n` timeouts.
    pub fn then_timeouts(self, n: usize) -> Self {
        for _ in 0..n {
            self.push(Err(ProviderError::timeout(self.name.clone())));
        }
        self
    }

    pub fn push(&self, outcome: Result<(), ProviderError>) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn payloads(&self) -> Vec<Payload> {
        self.payloads.lock().unwrap().clone()
    }
}

impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn send<'a>(&'a self, payload: &'a Payload) -> BoxFuture<'a, Result<(), ProviderError>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.payloads.lock().unwrap().push(payload.clone());

            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }

            let next = self.script.lock().unwrap().pop_front();
            next.unwrap_or_else(|| self.fallback.clone())
        })
    }
}

/// Limiter with a fixed answer.
#[derive(Debug)]
pub struct StaticLimiter {
    mode: LimiterMode,
    calls: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimiterMode {
    Allow,
    Limit,
    /// Simulates an unreachable counter store.
    Broken,
}

impl StaticLimiter {
    pub fn new(mode: LimiterMode) -> Self {
        Self {
            mode,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Limiter for StaticLimiter {
    fn limit<'a>(&'a self, _key: &'a str) -> BoxFuture<'a, Result<bool, Error>> {
        Box::pin(async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.mode {
                LimiterMode::Allow => Ok(false),
                LimiterMode::Limit => Ok(true),
                LimiterMode::Broken => Err(Error::internal(eyre::eyre!("counter store unreachable"))),
            }
        })
    }
}

#[derive(Default)]
struct QueueState {
    next_id: i64,
    messages: BTreeMap<i64, Message>,
    claim_script: VecDeque<Result<Option<Message>, Error>>,
}

/// In-memory [`RetryQueue`] with the same conditional-update semantics as the
/// SQLite queue, plus call counters for the finalization operations.
#[derive(Default)]
pub struct MemoryRetryQueue {
    state: Mutex<QueueState>,
    processed_calls: AtomicUsize,
    process_failed_calls: AtomicUsize,
    retry_calls: AtomicUsize,
    broken_finalize: AtomicBool,
}

impl MemoryRetryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a message as-is, keeping its id and timestamps.
    pub fn insert(&self, message: Message) {
        let mut state = self.state.lock().unwrap();
        state.next_id = state.next_id.max(message.id);
        state.messages.insert(message.id, message);
    }

    /// Makes the next `claim_next` return `outcome` instead of touching the store.
    pub fn script_claim(&self, outcome: Result<Option<Message>, Error>) {
        self.state.lock().unwrap().claim_script.push_back(outcome);
    }

    pub fn get(&self, id: i64) -> Option<Message> {
        self.state.lock().unwrap().messages.get(&id).cloned()
    }

    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().unwrap().messages.values().cloned().collect()
    }

    /// Makes every later `mark_processed`/`mark_process_failed` fail as if
    /// the store were unreachable.
    pub fn break_finalization(&self) {
        self.broken_finalize.store(true, Ordering::SeqCst);
    }

    pub fn processed_calls(&self) -> usize {
        self.processed_calls.load(Ordering::SeqCst)
    }

    pub fn process_failed_calls(&self) -> usize {
        self.process_failed_calls.load(Ordering::SeqCst)
    }

    pub fn retry_calls(&self) -> usize {
        self.retry_calls.load(Ordering::SeqCst)
    }

    fn transition(&self, id: i64, from: MessageStatus, to: MessageStatus) -> Result<u64, Error> {
        if self.broken_finalize.load(Ordering::SeqCst) {
            return Err(Error::internal(eyre::eyre!("database is locked")));
        }

        let mut state = self.state.lock().unwrap();
        match state.messages.get_mut(&id) {
            Some(message) if message.status == from => {
                message.status = to;
                message.updated_at = Utc::now();
                Ok(1)
            }
            _ => Ok(0),
        }
    }
}

impl RetryQueue for MemoryRetryQueue {
    fn enqueue(&self, payload: Payload) -> BoxFuture<'_, Result<Message, Error>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.next_id += 1;
            let now = Utc::now();
            let message = Message {
                id: state.next_id,
                payload,
                status: MessageStatus::Unprocessed,
                retries: 0,
                created_at: now,
                updated_at: now,
            };
            state.messages.insert(message.id, message.clone());
            Ok(message)
        })
    }

    fn claim_next(&self) -> BoxFuture<'_, Result<Option<Message>, Error>> {
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            if let Some(outcome) = state.claim_script.pop_front() {
                return outcome;
            }

            let Some(message) = state
                .messages
                .values_mut()
                .find(|m| m.status == MessageStatus::Unprocessed)
            else {
                return Ok(None);
            };

            let mut claimed = message.clone();
            message.status = MessageStatus::Processing;
            message.updated_at = Utc::now();
            claimed.status = MessageStatus::Processing;

            Ok(Some(claimed))
        })
    }

    fn mark_processed(&self, id: i64) -> BoxFuture<'_, Result<u64, Error>> {
        Box::pin(async move {
            self.processed_calls.fetch_add(1, Ordering::SeqCst);
            self.transition(id, MessageStatus::Processing, MessageStatus::Processed)
        })
    }

    fn mark_process_failed(&self, id: i64) -> BoxFuture<'_, Result<u64, Error>> {
        Box::pin(async move {
            self.process_failed_calls.fetch_add(1, Ordering::SeqCst);
            self.transition(id, MessageStatus::Processing, MessageStatus::ProcessFailed)
        })
    }

    fn record_retry(&self, id: i64) -> BoxFuture<'_, Result<u64, Error>> {
        Box::pin(async move {
            self.retry_calls.fetch_add(1, Ordering::SeqCst);
            let mut state = self.state.lock().unwrap();
            match state.messages.get_mut(&id) {
                Some(message) if message.status == MessageStatus::Processing => {
                    message.retries += 1;
                    Ok(1)
                }
                _ => Ok(0),
            }
        })
    }
}
