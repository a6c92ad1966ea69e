//! Group consumer loop: read, handle, ack; periodically reclaim expired leases.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::core::entry::Delivery;
use crate::core::error::Result;
use crate::core::group::ConsumerId;
use crate::core::handler::Handler;
use crate::core::shutdown::Shutdown;
use crate::core::store::Store;
use crate::util::backoff::{Backoff, BackoffPolicy};
use crate::util::millis;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerSettings {
    /// Most entries claimed per read.
    pub read_count: usize,
    /// How long one read waits for new appends.
    pub block: Duration,
    /// Spacing of `reclaim_expired` sweeps.
    pub reclaim_interval: Duration,
    /// Sleep between empty reads when `block` is zero.
    pub poll_interval: Duration,
    pub error_backoff: BackoffPolicy,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            read_count: 10,
            block: Duration::from_secs(1),
            reclaim_interval: Duration::from_secs(5),
            poll_interval: Duration::from_millis(100),
            error_backoff: BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(30)),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StepReport {
    /// Read or reclaimed entries that were handled and acked.
    pub handled: usize,
    /// Entries whose handler failed; they stay pending until their lease expires.
    pub failed: usize,
    pub reclaimed: usize,
}

impl StepReport {
    pub fn delivered(&self) -> usize {
        self.handled + self.failed
    }
}

pub struct GroupConsumer {
    store: Arc<Store>,
    queue: String,
    group: String,
    consumer: ConsumerId,
    handler: Arc<dyn Handler>,
    settings: ConsumerSettings,
}

impl GroupConsumer {
    pub fn new(
        store: Arc<Store>,
        queue: impl Into<String>,
        group: impl Into<String>,
        consumer: ConsumerId,
        handler: impl Handler,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            store,
            queue: queue.into(),
            group: group.into(),
            consumer,
            handler: Arc::new(handler),
            settings,
        }
    }

    pub fn consumer(&self) -> &ConsumerId {
        &self.consumer
    }

    /// One read (blocking up to `block`) followed by handling the batch.
    ///
    /// A triggered `shutdown` interrupts the blocking read. Claims already made
    /// are never dropped: unhandled entries stay pending for a later reclaim.
    pub async fn step(&self, shutdown: &Shutdown) -> Result<StepReport> {
        let read = self.store.read_group(
            &self.queue,
            &self.group,
            &self.consumer,
            self.settings.read_count,
            self.settings.block,
        );
        let batch = tokio::select! {
            biased;
            _ = shutdown.cancelled() => return Ok(StepReport::default()),
            batch = read => batch?,
        };
        Ok(self.process(batch, shutdown).await)
    }

    /// Takes over entries whose lease expired and handles them.
    pub async fn reclaim(&self, shutdown: &Shutdown) -> Result<StepReport> {
        let now = self.store.now_ms();
        let batch = self.store.reclaim_expired(
            &self.queue,
            &self.group,
            &self.consumer,
            now,
            self.settings.read_count,
        )?;
        let reclaimed = batch.len();
        if reclaimed > 0 {
            info!(
                queue = %self.queue,
                group = %self.group,
                consumer = %self.consumer,
                reclaimed,
                "reclaimed entries with expired leases"
            );
        }
        let mut report = self.process(batch, shutdown).await;
        report.reclaimed = reclaimed;
        Ok(report)
    }

    async fn process(&self, batch: Vec<Delivery>, shutdown: &Shutdown) -> StepReport {
        let mut report = StepReport::default();
        for delivery in batch {
            if shutdown.is_triggered() {
                break;
            }
            let id = delivery.entry.id;
            let delivery_count = delivery.delivery_count;
            match self.handler.handle(delivery).await {
                Ok(()) => match self.store.ack(&self.queue, &self.group, id) {
                    Ok(true) => report.handled += 1,
                    Ok(false) => {
                        debug!(queue = %self.queue, group = %self.group, id = %id, "entry no longer pending at ack");
                        report.handled += 1;
                    }
                    Err(err) => {
                        warn!(queue = %self.queue, group = %self.group, id = %id, error = %err, "ack failed; entry stays pending");
                        report.failed += 1;
                    }
                },
                Err(err) => {
                    warn!(
                        queue = %self.queue,
                        group = %self.group,
                        consumer = %self.consumer,
                        id = %id,
                        delivery_count,
                        error = %format!("{err:#}"),
                        "handler failed; entry stays pending"
                    );
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Reads and handles until `shutdown` is triggered, sweeping expired leases
    /// every `reclaim_interval`.
    pub async fn run(self, shutdown: Shutdown) {
        info!(
            queue = %self.queue,
            group = %self.group,
            consumer = %self.consumer,
            "group consumer started"
        );
        let mut backoff = Backoff::new(self.settings.error_backoff);
        let mut next_reclaim = Instant::now() + self.settings.reclaim_interval;

        while !shutdown.is_triggered() {
            let mut result = self.step(&shutdown).await;
            if result.is_ok() && Instant::now() >= next_reclaim {
                next_reclaim = Instant::now() + self.settings.reclaim_interval;
                result = self.reclaim(&shutdown).await;
            }

            let wait = match result {
                Ok(report) => {
                    backoff.reset();
                    if report.delivered() == 0 && self.settings.block.is_zero() {
                        self.settings.poll_interval
                    } else {
                        Duration::ZERO
                    }
                }
                Err(err) => {
                    let delay = backoff.next_delay();
                    warn!(
                        queue = %self.queue,
                        group = %self.group,
                        error = %err,
                        transient = err.is_transient(),
                        retry_in_ms = millis(delay),
                        "group read failed"
                    );
                    delay
                }
            };

            if wait.is_zero() {
                tokio::task::yield_now().await;
                continue;
            }
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = tokio::time::sleep(wait) => {}
            }
        }
        info!(
            queue = %self.queue,
            group = %self.group,
            consumer = %self.consumer,
            "group consumer stopped"
        );
    }
}
