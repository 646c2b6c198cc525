//! Persisted retry queue.
//!
//! Messages that could not be delivered synchronously wait here until a
//! workshop worker claims them. Exclusivity comes entirely from conditional
//! updates in the store, so workers in separate processes can share one
//! database without any in-process coordination.

use std::sync::Arc;

use chrono::Utc;
use futures_util::future::BoxFuture;
use sqlx::SqlitePool;

use crate::{
    db::message::MessageRow,
    error::Error,
    message::{Message, MessageStatus, Payload},
};

/// Storage operations used by the dispatcher and the workshop.
pub trait RetryQueue: Send + Sync + 'static {
    /// Stores the payload as a new `Unprocessed` message.
    fn enqueue(&self, payload: Payload) -> BoxFuture<'_, Result<Message, Error>>;

    /// Claims one `Unprocessed` message for the caller.
    ///
    /// Returns `Ok(None)` when nothing is waiting and [`Error::ClaimLost`] when
    /// another worker claimed the same message first.
    fn claim_next(&self) -> BoxFuture<'_, Result<Option<Message>, Error>>;

    /// `Processing -> Processed`. Returns the number of rows changed; anything
    /// other than 1 means the message was lost or already finalized.
    fn mark_processed(&self, id: i64) -> BoxFuture<'_, Result<u64, Error>>;

    /// `Processing -> ProcessFailed`, with the same return convention as
    /// [`RetryQueue::mark_processed`].
    fn mark_process_failed(&self, id: i64) -> BoxFuture<'_, Result<u64, Error>>;

    /// Bumps the retry counter of a message that is still `Processing`.
    fn record_retry(&self, id: i64) -> BoxFuture<'_, Result<u64, Error>>;
}

impl<Q: RetryQueue + ?Sized> RetryQueue for Arc<Q> {
    fn enqueue(&self, payload: Payload) -> BoxFuture<'_, Result<Message, Error>> {
        (**self).enqueue(payload)
    }

    fn claim_next(&self) -> BoxFuture<'_, Result<Option<Message>, Error>> {
        (**self).claim_next()
    }

    fn mark_processed(&self, id: i64) -> BoxFuture<'_, Result<u64, Error>> {
        (**self).mark_processed(id)
    }

    fn mark_process_failed(&self, id: i64) -> BoxFuture<'_, Result<u64, Error>> {
        (**self).mark_process_failed(id)
    }

    fn record_retry(&self, id: i64) -> BoxFuture<'_, Result<u64, Error>> {
        (**self).record_retry(id)
    }
}

/// [`RetryQueue`] backed by the `messages` table.
#[derive(Clone)]
pub struct SqliteRetryQueue {
    db: SqlitePool,
}

impl SqliteRetryQueue {
    pub fn new(db: SqlitePool) -> Self {
        Self { db }
    }

    pub async fn get(&self, id: i64) -> Result<Option<Message>, Error> {
        let mut conn = self.db.acquire().await?;
        Ok(MessageRow::get(&mut conn, id).await?.map(Message::from))
    }

    /// Messages in the given status, oldest first.
    pub async fn list_by_status(
        &self,
        status: MessageStatus,
        limit: u32,
    ) -> Result<Vec<Message>, Error> {
        let mut conn = self.db.acquire().await?;
        Ok(MessageRow::list_by_status(&mut conn, status, limit)
            .await?
            .into_iter()
            .map(Message::from)
            .collect())
    }

    /// Claims a specific message, for callers that already know the id.
    /// Fails with [`Error::ClaimLost`] unless the message is `Unprocessed`.
    pub async fn claim(&self, id: i64) -> Result<(), Error> {
        let mut conn = self.db.acquire().await?;
        MessageRow::claim(&mut conn, id, Utc::now()).await
    }

    async fn finalize(&self, id: i64, to: MessageStatus) -> Result<u64, Error> {
        let mut conn = self.db.acquire().await?;
        MessageRow::transition(&mut conn, id, MessageStatus::Processing, to, Utc::now()).await
    }
}

impl RetryQueue for SqliteRetryQueue {
    fn enqueue(&self, payload: Payload) -> BoxFuture<'_, Result<Message, Error>> {
        Box::pin(async move {
            let mut conn = self.db.acquire().await?;
            let row = MessageRow::insert(&mut conn, &payload, Utc::now()).await?;
            Ok(row.into())
        })
    }

    fn claim_next(&self) -> BoxFuture<'_, Result<Option<Message>, Error>> {
        Box::pin(async move {
            let mut conn = self.db.acquire().await?;
            Ok(MessageRow::claim_next(&mut conn, Utc::now())
                .await?
                .map(Message::from))
        })
    }

    fn mark_processed(&self, id: i64) -> BoxFuture<'_, Result<u64, Error>> {
        Box::pin(self.finalize(id, MessageStatus::Processed))
    }

    fn mark_process_failed(&self, id: i64) -> BoxFuture<'_, Result<u64, Error>> {
        Box::pin(self.finalize(id, MessageStatus::ProcessFailed))
    }

    fn record_retry(&self, id: i64) -> BoxFuture<'_, Result<u64, Error>> {
        Box::pin(async move {
            let mut conn = self.db.acquire().await?;
            MessageRow::record_retry(&mut conn, id).await
        })
    }
}
