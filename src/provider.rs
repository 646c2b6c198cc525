//! Outbound provider abstraction.
//!
//! A [`Provider`] is anything that can hand a [`Payload`] to the outside world:
//! an SMS gateway client, an email relay, or one of the failover selectors in
//! [`crate::failover`], which are providers themselves and can be nested.
//!
//! The transport behind a provider is opaque. The only thing the rest of the
//! crate relies on is the classification in [`ProviderError`]: a timeout
//! drives failover decisions, every other failure does not.

use std::sync::Arc;

use futures_util::future::BoxFuture;
use snafu::Snafu;

pub use crate::message::Payload;

pub mod deadline;
pub mod memory;

/// Failure reported by a provider.
#[derive(Debug, Clone, PartialEq, Eq, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ProviderError {
    /// The provider did not answer before its deadline.
    #[snafu(display("Provider {provider} timed out"))]
    Timeout { provider: String },

    #[snafu(display("Provider {provider} rejected the message: {reason}"))]
    Rejected { provider: String, reason: String },

    #[snafu(display("Provider {provider} is unavailable: {reason}"))]
    Unavailable { provider: String, reason: String },

    #[snafu(display("Channel {key} is rate limited"))]
    Limited { key: String },

    #[snafu(display("All {attempted} providers failed"))]
    AllFailed { attempted: usize },
}

impl ProviderError {
    pub fn timeout(provider: impl Into<String>) -> Self {
        Self::Timeout {
            provider: provider.into(),
        }
    }

    pub fn rejected(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Rejected {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    pub fn unavailable(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Unavailable {
            provider: provider.into(),
            reason: reason.into(),
        }
    }

    /// Whether this is a deadline failure. Only these count against a
    /// provider when deciding whether to fail over.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}

/// Core trait for sending a payload through an external channel.
///
/// Implementations must be safe to share between the synchronous dispatch
/// path and every workshop worker.
pub trait Provider: Send + Sync + 'static {
    /// Short name used in logs and errors.
    fn name(&self) -> &str;

    /// Sends the payload, resolving once the provider has accepted or refused it.
    fn send<'a>(&'a self, payload: &'a Payload) -> BoxFuture<'a, Result<(), ProviderError>>;
}

impl<P: Provider + ?Sized> Provider for Arc<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn send<'a>(&'a self, payload: &'a Payload) -> BoxFuture<'a, Result<(), ProviderError>> {
        (**self).send(payload)
    }
}

impl<P: Provider + ?Sized> Provider for Box<P> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn send<'a>(&'a self, payload: &'a Payload) -> BoxFuture<'a, Result<(), ProviderError>> {
        (**self).send(payload)
    }
}
