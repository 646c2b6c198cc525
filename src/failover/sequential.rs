use futures_util::future::BoxFuture;

use crate::{
    error::Error,
    provider::{Payload, Provider, ProviderError},
};

/// Tries every provider in list order until one accepts the payload.
pub struct SequentialFailover<P> {
    providers: Vec<P>,
}

impl<P: Provider> SequentialFailover<P> {
    pub fn new(providers: Vec<P>) -> Result<Self, Error> {
        super::ensure_providers(&providers)?;
        Ok(Self { providers })
    }
}

impl<P: Provider> Provider for SequentialFailover<P> {
    fn name(&self) -> &str {
        "sequential"
    }

    fn send<'a>(&'a self, payload: &'a Payload) -> BoxFuture<'a, Result<(), ProviderError>> {
        Box::pin(async move {
            for provider in &self.providers {
                match provider.send(payload).await {
                    Ok(()) => return Ok(()),
                    Err(e) => {
                        tracing::warn!(provider = provider.name(), "Send failed: {e}");
                    }
                }
            }

            Err(ProviderError::AllFailed {
                attempted: self.providers.len(),
            })
        })
    }
}
