//! Message types and status management for the retry queue.
//!
//! A [`Message`] is a [`Payload`] that could not be delivered synchronously,
//! either because the channel was throttled or because every attempt failed.
//! It is persisted and later picked up by exactly one workshop worker.
//!
//! # Message Lifecycle
//!
//! 1. Messages are created in `Unprocessed` status by the dispatcher
//! 2. A worker claims one, moving it to `Processing`
//! 3. The worker finalizes it as `Processed` or, once its retry budget is
//!    spent, `ProcessFailed`
//!
//! `Processed` and `ProcessFailed` are terminal. A `ProcessFailed` message is
//! dead-lettered and needs operator attention.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The content handed to a provider: a template, its ordered arguments and
/// the ordered recipient addresses.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub template: String,
    pub args: Vec<String>,
    pub recipients: Vec<String>,
}

impl Payload {
    pub fn new<A, R>(
        template: impl Into<String>,
        args: impl IntoIterator<Item = A>,
        recipients: impl IntoIterator<Item = R>,
    ) -> Self
    where
        A: Into<String>,
        R: Into<String>,
    {
        Self {
            template: template.into(),
            args: args.into_iter().map(Into::into).collect(),
            recipients: recipients.into_iter().map(Into::into).collect(),
        }
    }
}

/// Represents the current status of a message in the retry queue.
///
/// The status column doubles as an optimistic version guard: every
/// transition is a conditional update on the expected prior status.
#[derive(
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    sqlx::Type,
    strum::Display,
    strum::AsRefStr,
    strum::EnumString,
)]
#[sqlx(type_name = "text")]
#[strum(serialize_all = "snake_case")]
pub enum MessageStatus {
    /// Waiting for a worker; never successfully claimed
    #[serde(rename = "unprocessed")]
    #[sqlx(rename = "unprocessed")]
    Unprocessed,
    /// Owned by exactly one worker
    #[serde(rename = "processing")]
    #[sqlx(rename = "processing")]
    Processing,
    /// Delivered by a provider
    #[serde(rename = "processed")]
    #[sqlx(rename = "processed")]
    Processed,
    /// Retry budget exhausted
    #[serde(rename = "process_failed")]
    #[sqlx(rename = "process_failed")]
    ProcessFailed,
}

impl MessageStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Processed | Self::ProcessFailed)
    }
}

/// A queued message.
///
/// `updated_at` is refreshed by every status transition except that a
/// freshly claimed message still carries the stamp observed before the claim,
/// so a worker can tell how long the message has been waiting.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Message {
    /// Assigned by the queue on insertion
    pub id: i64,
    #[serde(flatten)]
    pub payload: Payload,
    pub status: MessageStatus,
    /// Failed delivery attempts recorded by workers
    pub retries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Time elapsed since the last recorded transition, clamped at zero when
    /// the stamp is ahead of the local clock.
    pub fn since_update(&self, now: DateTime<Utc>) -> std::time::Duration {
        (now - self.updated_at).to_std().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use std::str::FromStr;

    use super::*;

    #[test]
    fn test_status_names() {
        assert_eq!(MessageStatus::ProcessFailed.as_ref(), "process_failed");
        assert_eq!(
            MessageStatus::from_str("processing").unwrap(),
            MessageStatus::Processing
        );
        assert!(MessageStatus::Processed.is_terminal());
        assert!(!MessageStatus::Unprocessed.is_terminal());
    }

    #[test]
    fn test_since_update_clamps_future_stamp() {
        let now = Utc::now();
        let message = Message {
            id: 1,
            payload: Payload::new("tpl", ["a"], ["123"]),
            status: MessageStatus::Processing,
            retries: 0,
            created_at: now,
            updated_at: now + chrono::Duration::seconds(30),
        };

        assert_eq!(message.since_update(now), std::time::Duration::ZERO);
        assert_eq!(
            message.since_update(now + chrono::Duration::seconds(90)),
            std::time::Duration::from_secs(60)
        );
    }
}
