//! Log-only provider for local development.
//!
//! Nothing leaves the process: every payload is logged, counted, and the most
//! recent ones are kept in memory so they can be inspected afterwards.

use std::{
    collections::VecDeque,
    sync::atomic::{AtomicU64, Ordering},
};

use futures_util::future::BoxFuture;
use tokio::sync::Mutex;

use super::{Payload, Provider, ProviderError};

/// Payloads retained by [`MemoryProvider::new`].
pub const DEFAULT_HISTORY: usize = 256;

#[derive(Debug)]
pub struct MemoryProvider {
    name: String,
    history: usize,
    delivered: AtomicU64,
    sent: Mutex<VecDeque<Payload>>,
}

impl MemoryProvider {
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_history(name, DEFAULT_HISTORY)
    }

    /// Keeps at most `history` payloads; older ones are dropped.
    pub fn with_history(name: impl Into<String>, history: usize) -> Self {
        Self {
            name: name.into(),
            history,
            delivered: AtomicU64::new(0),
            sent: Mutex::new(VecDeque::with_capacity(history)),
        }
    }

    /// Total payloads accepted, including ones no longer retained.
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Acquire)
    }

    /// The retained payloads, oldest first.
    pub async fn sent(&self) -> Vec<Payload> {
        self.sent.lock().await.iter().cloned().collect()
    }
}

impl Provider for MemoryProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn send<'a>(&'a self, payload: &'a Payload) -> BoxFuture<'a, Result<(), ProviderError>> {
        Box::pin(async move {
            tracing::info!(
                provider = %self.name,
                template = %payload.template,
                recipients = payload.recipients.len(),
                "Sending message"
            );

            self.delivered.fetch_add(1, Ordering::AcqRel);

            if self.history > 0 {
                let mut sent = self.sent.lock().await;
                if sent.len() == self.history {
                    sent.pop_front();
                }
                sent.push_back(payload.clone());
            }

            Ok(())
        })
    }
}
