use std::time::Duration;

use serde::Deserialize;

use crate::{
    dispatch::DEFAULT_CHANNEL_KEY, error::Error, retry::FixedIntervalRetry,
    workshop::WorkshopOptions,
};

/// Settings read from `COURIER_`-prefixed environment variables, e.g.
/// `COURIER_DB_PATH` or `COURIER_MAX_RETRIES`.
#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub db_path: Option<String>,

    #[serde(default = "default_channel_key")]
    pub channel_key: String,

    /// Sends admitted per key and window.
    #[serde(default = "default_rate_limit_threshold")]
    pub rate_limit_threshold: u64,
    #[serde(default = "default_rate_limit_interval_ms")]
    pub rate_limit_interval_ms: u64,

    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
    #[serde(default = "default_min_dwell_secs")]
    pub min_dwell_secs: u64,
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Timeout ratio at which the failure-rate selector moves on.
    #[serde(default = "default_failure_rate")]
    pub failure_rate: f64,
}

fn default_channel_key() -> String {
    DEFAULT_CHANNEL_KEY.to_owned()
}

fn default_rate_limit_threshold() -> u64 {
    100
}

fn default_rate_limit_interval_ms() -> u64 {
    1000
}

fn default_workers() -> usize {
    1
}

fn default_tick_ms() -> u64 {
    1000
}

fn default_min_dwell_secs() -> u64 {
    300
}

fn default_retry_interval_ms() -> u64 {
    30_000
}

fn default_max_retries() -> u32 {
    5
}

fn default_failure_rate() -> f64 {
    0.5
}

impl Config {
    pub fn load() -> eyre::Result<Self> {
        Ok(envy::prefixed("COURIER_").from_env::<Self>()?)
    }

    pub fn db_path(&self) -> &str {
        self.db_path
            .as_ref()
            .map(|s| s.as_str())
            .unwrap_or("courier.db")
    }

    pub fn rate_limit_interval(&self) -> Duration {
        Duration::from_millis(self.rate_limit_interval_ms)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms)
    }

    pub fn min_dwell(&self) -> Duration {
        Duration::from_secs(self.min_dwell_secs)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }

    pub fn workshop_options(&self) -> Result<WorkshopOptions, Error> {
        Ok(WorkshopOptions::builder()
            .agents(self.workers)
            .tick(self.tick())
            .min_dwell(self.min_dwell())
            .retry(FixedIntervalRetry::new(
                self.retry_interval(),
                self.max_retries,
            )?)
            .build())
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: None,
            channel_key: default_channel_key(),
            rate_limit_threshold: default_rate_limit_threshold(),
            rate_limit_interval_ms: default_rate_limit_interval_ms(),
            workers: default_workers(),
            tick_ms: default_tick_ms(),
            min_dwell_secs: default_min_dwell_secs(),
            retry_interval_ms: default_retry_interval_ms(),
            max_retries: default_max_retries(),
            failure_rate: default_failure_rate(),
        }
    }
}
