use chrono::{DateTime, Utc};
use snafu::ensure;
use sqlx::{prelude::FromRow, types::Json, SqliteConnection};
use tokio_stream::StreamExt;

use crate::{
    error::{ClaimLostSnafu, Error},
    message::{Message, MessageStatus, Payload},
};

const COLUMNS: &str = "id, template, args, recipients, status, retries, created_at, updated_at";

#[derive(FromRow)]
pub struct MessageRow {
    id: i64,
    template: String,
    args: Json<Vec<String>>,
    recipients: Json<Vec<String>>,
    status: MessageStatus,
    retries: i64,
    created_at: i64,
    updated_at: i64,
}

fn from_millis(ms: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(ms).unwrap_or_default()
}

impl From<MessageRow> for Message {
    fn from(row: MessageRow) -> Self {
        Self {
            id: row.id,
            payload: Payload {
                template: row.template,
                args: row.args.0,
                recipients: row.recipients.0,
            },
            status: row.status,
            retries: u32::try_from(row.retries).unwrap_or(u32::MAX),
            created_at: from_millis(row.created_at),
            updated_at: from_millis(row.updated_at),
        }
    }
}

impl MessageRow {
    pub async fn insert(
        db: &mut SqliteConnection,
        payload: &Payload,
        now: DateTime<Utc>,
    ) -> Result<MessageRow, Error> {
        let stamp = now.timestamp_millis();

        let row = sqlx::query_as(&format!(
            "
            INSERT INTO messages (template, args, recipients, status, retries, created_at, updated_at)
            VALUES ($1, $2, $3, $4, 0, $5, $5)
            RETURNING {COLUMNS}
            "
        ))
        .bind(&payload.template)
        .bind(Json(&payload.args))
        .bind(Json(&payload.recipients))
        .bind(MessageStatus::Unprocessed)
        .bind(stamp)
        .fetch_one(db)
        .await?;

        Ok(row)
    }

    pub async fn get(db: &mut SqliteConnection, id: i64) -> Result<Option<MessageRow>, Error> {
        Ok(
            sqlx::query_as(&format!("SELECT {COLUMNS} FROM messages WHERE id = $1"))
                .bind(id)
                .fetch_optional(db)
                .await?,
        )
    }

    /// Picks any unprocessed message and claims it. Ties are broken by the
    /// store, so this is not FIFO.
    pub async fn claim_next(
        db: &mut SqliteConnection,
        now: DateTime<Utc>,
    ) -> Result<Option<MessageRow>, Error> {
        let candidate: Option<MessageRow> = sqlx::query_as(&format!(
            "SELECT {COLUMNS} FROM messages WHERE status = $1 LIMIT 1"
        ))
        .bind(MessageStatus::Unprocessed)
        .fetch_optional(&mut *db)
        .await?;

        let Some(mut row) = candidate else {
            return Ok(None);
        };

        Self::claim(db, row.id, now).await?;
        row.status = MessageStatus::Processing;

        Ok(Some(row))
    }

    /// The exclusive `unprocessed -> processing` transition. Exactly one
    /// concurrent caller sees `Ok`; the rest get [`Error::ClaimLost`].
    pub async fn claim(db: &mut SqliteConnection, id: i64, now: DateTime<Utc>) -> Result<(), Error> {
        let affected = Self::transition(
            db,
            id,
            MessageStatus::Unprocessed,
            MessageStatus::Processing,
            now,
        )
        .await?;

        ensure!(affected == 1, ClaimLostSnafu { id });

        Ok(())
    }

    /// Conditional status update guarded on the expected prior status.
    /// Returns the number of rows that changed.
    pub async fn transition(
        db: &mut SqliteConnection,
        id: i64,
        from: MessageStatus,
        to: MessageStatus,
        now: DateTime<Utc>,
    ) -> Result<u64, Error> {
        let res = sqlx::query(
            "
            UPDATE messages
            SET status = $1, updated_at = $2
            WHERE id = $3 AND status = $4
            ",
        )
        .bind(to)
        .bind(now.timestamp_millis())
        .bind(id)
        .bind(from)
        .execute(db)
        .await?;

        Ok(res.rows_affected())
    }

    pub async fn record_retry(db: &mut SqliteConnection, id: i64) -> Result<u64, Error> {
        let res = sqlx::query(
            "UPDATE messages SET retries = retries + 1 WHERE id = $1 AND status = $2",
        )
        .bind(id)
        .bind(MessageStatus::Processing)
        .execute(db)
        .await?;

        Ok(res.rows_affected())
    }

    pub async fn list_by_status(
        db: &mut SqliteConnection,
        status: MessageStatus,
        limit: u32,
    ) -> Result<Vec<MessageRow>, Error> {
        let query = format!("SELECT {COLUMNS} FROM messages WHERE status = $1 ORDER BY id LIMIT $2");
        let mut stream = sqlx::query_as(&query)
            .bind(status)
            .bind(limit as i64)
            .fetch(db);

        let mut rows = Vec::new();

        while let Some(row) = stream.next().await.transpose()? {
            rows.push(row);
        }

        Ok(rows)
    }
}
