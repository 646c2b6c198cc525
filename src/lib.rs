use std::{sync::Arc, time::Duration};

use config::Config;
use dispatch::Dispatcher;
use failover::FailureRateFailover;
use provider::Provider;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::{util::SubscriberInitExt, EnvFilter, FmtSubscriber};

pub mod config;
pub mod db;
pub mod dispatch;
pub mod error;
pub mod failover;
pub mod message;
#[cfg(any(test, feature = "mocks"))]
pub mod mocks;
pub mod provider;
pub mod queue;
pub mod ratelimit;
pub mod retry;
pub mod service;
pub mod workshop;

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// Returns a builder for the retry worker process.
///
/// The process drains the shared retry queue through a failure-rate
/// selector over `providers` until Ctrl-C.
#[bon::builder(finish_fn = start)]
pub async fn run(providers: Vec<Arc<dyn Provider>>, config: Option<Config>) -> eyre::Result<()> {
    #[cfg(debug_assertions)]
    FmtSubscriber::builder()
        .pretty()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("COURIER_LOG")
                .with_default_directive(LevelFilter::INFO.into())
                .from_env()?,
        )
        .finish()
        .try_init()?;

    #[cfg(not(debug_assertions))]
    FmtSubscriber::builder()
        .json()
        .with_env_filter(
            EnvFilter::builder()
                .with_env_var("COURIER_LOG")
                .with_default_directive(LevelFilter::INFO.into())
                .from_env()?,
        )
        .finish()
        .try_init()?;

    let config = match config {
        Some(config) => config,
        None => Config::load()?,
    };

    let service = service::Service::connect_with()
        .config(config.clone())
        .call()
        .await?;

    let selector = FailureRateFailover::new(providers, config.failure_rate)?;

    let dispatcher = Dispatcher::builder()
        .limiter(Arc::new(service.limiter()?))
        .provider(Arc::new(selector))
        .queue(Arc::new(service.queue()))
        .options(config.workshop_options()?)
        .channel_key(config.channel_key.clone())
        .build()?;

    dispatcher.start_workshop();

    tokio::signal::ctrl_c().await?;

    dispatcher.shutdown(SHUTDOWN_TIMEOUT).await?;

    Ok(())
}
