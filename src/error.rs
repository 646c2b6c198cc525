use std::time::Duration;

use snafu::Snafu;

use crate::provider::ProviderError;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum Error {
    #[snafu(display("Throttled, retry later"))]
    Throttled,

    #[snafu(display("Send failed, retry later"))]
    SendFailed {
        #[snafu(source)]
        source: ProviderError,
    },

    /// Another worker won the conditional update for this message.
    #[snafu(display("Claim lost for message {id}"))]
    ClaimLost { id: i64 },

    #[snafu(display("Could not process message {id} after {attempts} attempts"))]
    Exhausted { id: i64, attempts: u32 },

    #[snafu(display("Workers still running after {timeout:?}"))]
    ShutdownTimeout { timeout: Duration },

    #[snafu(display("Internal error"))]
    InternalServerError {
        #[snafu(source(false))]
        source: Option<eyre::Report>,
    },

    #[snafu(display("Error returned from database"))]
    Sqlx {
        #[snafu(source)]
        source: sqlx::Error,
    },

    #[snafu(display("Error running migrations"))]
    MigrationError {
        #[snafu(source)]
        source: sqlx::migrate::MigrateError,
    },

    #[snafu(display("Invalid parameter: {message}"))]
    InvalidParameter { message: String },
}

impl From<sqlx::Error> for Error {
    fn from(source: sqlx::Error) -> Self {
        Self::Sqlx { source }
    }
}

impl From<eyre::Report> for Error {
    fn from(e: eyre::Report) -> Self {
        Self::InternalServerError { source: Some(e) }
    }
}

impl From<sqlx::migrate::MigrateError> for Error {
    fn from(source: sqlx::migrate::MigrateError) -> Self {
        Self::MigrationError { source }
    }
}

impl Error {
    pub fn internal(e: impl Into<eyre::Report>) -> Self {
        Self::InternalServerError {
            source: Some(e.into()),
        }
    }

    pub fn invalid_parameter(message: impl Into<String>) -> Self {
        Self::InvalidParameter {
            message: message.into(),
        }
    }

    /// Contention on a claim is expected under concurrent workers and is not
    /// a failure of the message itself.
    pub fn is_claim_lost(&self) -> bool {
        matches!(self, Self::ClaimLost { .. })
    }

    /// Whether a synchronous caller should expect the message to be retried
    /// in the background.
    pub fn is_retry_later(&self) -> bool {
        matches!(self, Self::Throttled | Self::SendFailed { .. })
    }
}
