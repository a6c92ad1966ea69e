use serde::Deserialize;
use std::time::Duration;
use std::{fs, path::Path};

use crate::core::consumer::ConsumerSettings;
use crate::core::entry::StartId;
use crate::core::error::QueueError;
use crate::core::group::GroupOptions;
use crate::core::scheduler::SchedulerSettings;
use crate::core::store::StoreOptions;
use crate::util::backoff::BackoffPolicy;

/// Top-level runtime configuration, deserializable from TOML.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub scheduler: SchedulerConfig,
    pub consumer: ConsumerConfig,
    pub queues: Vec<QueueConfig>,
    pub groups: Vec<GroupConfig>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub dead_letter_capacity: usize,
    pub lease_ttl_ms: u64,
    pub max_deliveries: u32,
}

/// Delay scheduler defaults, overridable per queue.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    pub poll_interval_ms: u64,
    pub batch_size: usize,
    pub retry_base_ms: u64,
    pub retry_max_ms: u64,
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ConsumerConfig {
    pub read_count: usize,
    pub block_ms: u64,
    pub reclaim_interval_ms: u64,
    pub poll_interval_ms: u64,
}

/// A queue that gets a delay scheduler loop.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueConfig {
    pub name: String,
    pub poll_interval_ms: Option<u64>,
    pub max_attempts: Option<u32>,
}

/// A consumer group created at startup, served by `consumers` loops.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupConfig {
    pub queue: String,
    pub name: String,
    #[serde(default = "default_start")]
    pub start: String,
    #[serde(default = "default_consumers")]
    pub consumers: usize,
    pub lease_ttl_ms: Option<u64>,
    pub max_deliveries: Option<u32>,
    #[serde(default)]
    pub delete_on_ack: bool,
}

fn default_start() -> String {
    "0".to_string()
}

fn default_consumers() -> usize {
    1
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dead_letter_capacity: 10_000,
            lease_ttl_ms: 30_000,
            max_deliveries: 5,
        }
    }
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1_000,
            batch_size: 100,
            retry_base_ms: 1_000,
            retry_max_ms: 60_000,
            max_attempts: 5,
        }
    }
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            read_count: 10,
            block_ms: 1_000,
            reclaim_interval_ms: 5_000,
            poll_interval_ms: 100,
        }
    }
}

impl StoreConfig {
    pub fn group_defaults(&self) -> GroupOptions {
        GroupOptions {
            lease_ttl: Duration::from_millis(self.lease_ttl_ms),
            max_deliveries: self.max_deliveries,
            delete_on_ack: false,
        }
    }

    pub fn options(&self) -> StoreOptions {
        StoreOptions {
            dead_letter_capacity: self.dead_letter_capacity,
            group_defaults: self.group_defaults(),
        }
    }
}

impl SchedulerConfig {
    pub fn settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            batch_size: self.batch_size.max(1),
            retry: BackoffPolicy::new(
                Duration::from_millis(self.retry_base_ms),
                Duration::from_millis(self.retry_max_ms),
            ),
            max_attempts: self.max_attempts.max(1),
            ..SchedulerSettings::default()
        }
    }
}

impl ConsumerConfig {
    pub fn settings(&self) -> ConsumerSettings {
        ConsumerSettings {
            read_count: self.read_count.max(1),
            block: Duration::from_millis(self.block_ms),
            reclaim_interval: Duration::from_millis(self.reclaim_interval_ms),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            ..ConsumerSettings::default()
        }
    }
}

impl QueueConfig {
    /// Scheduler settings for this queue: the global ones with its overrides applied.
    pub fn settings(&self, defaults: &SchedulerConfig) -> SchedulerSettings {
        let mut settings = defaults.settings();
        if let Some(ms) = self.poll_interval_ms {
            settings.poll_interval = Duration::from_millis(ms);
        }
        if let Some(attempts) = self.max_attempts {
            settings.max_attempts = attempts.max(1);
        }
        settings
    }
}

impl GroupConfig {
    pub fn start_id(&self) -> Result<StartId, QueueError> {
        self.start.parse()
    }

    pub fn options(&self, store: &StoreConfig) -> GroupOptions {
        GroupOptions {
            lease_ttl: Duration::from_millis(self.lease_ttl_ms.unwrap_or(store.lease_ttl_ms)),
            max_deliveries: self.max_deliveries.unwrap_or(store.max_deliveries).max(1),
            delete_on_ack: self.delete_on_ack,
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config, anyhow::Error> {
    let raw: String = fs::read_to_string(path)?;
    let config: Config = toml::from_str(&raw)?;
    Ok(config)
}
