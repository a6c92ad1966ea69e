//! Delay scheduler: fires each delay-scheduled entry once, shortly after it is due.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::core::dlq::DeadLetterReason;
use crate::core::entry::Delivery;
use crate::core::error::Result;
use crate::core::handler::Handler;
use crate::core::shutdown::Shutdown;
use crate::core::store::Store;
use crate::util::backoff::{Backoff, BackoffPolicy};
use crate::util::millis;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerSettings {
    /// Wait between polls when nothing (more) is due.
    pub poll_interval: Duration,
    /// Most entries popped per poll.
    pub batch_size: usize,
    /// Spacing of re-executions after a handler failure.
    pub retry: BackoffPolicy,
    /// Executions allowed before the entry is dead-lettered.
    pub max_attempts: u32,
    /// Loop backoff after a store error.
    pub error_backoff: BackoffPolicy,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            batch_size: 100,
            retry: BackoffPolicy::default(),
            max_attempts: 5,
            error_backoff: BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(30)),
        }
    }
}

/// What one poll did.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub executed: usize,
    pub retried: usize,
    pub dead_lettered: usize,
    /// Popped but handed back untouched because of shutdown.
    pub returned: usize,
}

impl TickReport {
    pub fn popped(&self) -> usize {
        self.executed + self.retried + self.dead_lettered + self.returned
    }
}

pub struct DelayScheduler {
    store: Arc<Store>,
    queue: String,
    handler: Arc<dyn Handler>,
    settings: SchedulerSettings,
}

impl DelayScheduler {
    pub fn new(
        store: Arc<Store>,
        queue: impl Into<String>,
        handler: impl Handler,
        settings: SchedulerSettings,
    ) -> Self {
        Self {
            store,
            queue: queue.into(),
            handler: Arc::new(handler),
            settings,
        }
    }

    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Pops everything due now (up to the batch size) and executes it in due order.
    ///
    /// Success deletes the entry; failure reschedules it with backoff until
    /// `max_attempts`, then dead-letters it. Once `shutdown` is triggered the
    /// rest of the batch goes back to the index unexecuted. A store error ends
    /// the tick early, after handing back whatever was popped but not reached.
    pub async fn tick(&self, shutdown: &Shutdown) -> Result<TickReport> {
        let now = self.store.now_ms();
        let due = self
            .store
            .poll_due(&self.queue, now, self.settings.batch_size)?;
        let mut report = TickReport::default();

        let mut due = due.into_iter();
        while let Some(delivery) = due.next() {
            let step = if shutdown.is_triggered() {
                self.hand_back(&delivery, now).map(|_| report.returned += 1)
            } else {
                self.execute(delivery, &mut report).await
            };
            if let Err(err) = step {
                self.hand_back_rest(due, now);
                return Err(err);
            }
        }
        Ok(report)
    }

    async fn execute(&self, delivery: Delivery, report: &mut TickReport) -> Result<()> {
        let id = delivery.entry.id;
        let attempt = delivery.delivery_count;
        debug!(queue = %self.queue, id = %id, attempt, "executing due entry");

        match self.handler.handle(delivery).await {
            Ok(()) => {
                if !self.store.complete(&self.queue, id)? {
                    debug!(queue = %self.queue, id = %id, "executed entry already deleted");
                }
                report.executed += 1;
            }
            Err(err) if attempt >= self.settings.max_attempts => {
                let reason = DeadLetterReason::ExecutionFailed {
                    attempts: attempt,
                    error: format!("{err:#}"),
                };
                self.store.bury(&self.queue, id, reason)?;
                report.dead_lettered += 1;
            }
            Err(err) => {
                let delay = self.settings.retry.delay_for(attempt.saturating_sub(1));
                let due_at = self.store.now_ms().saturating_add(millis(delay));
                warn!(
                    queue = %self.queue,
                    id = %id,
                    attempt,
                    retry_in_ms = millis(delay),
                    error = %format!("{err:#}"),
                    "execution failed; rescheduled"
                );
                self.store.retry(&self.queue, id, due_at, attempt)?;
                report.retried += 1;
            }
        }
        Ok(())
    }

    fn hand_back(&self, delivery: &Delivery, now: u64) -> Result<bool> {
        let due_at = delivery.entry.due_at.unwrap_or(now);
        self.store.reschedule(
            &self.queue,
            delivery.entry.id,
            due_at,
            delivery.delivery_count.saturating_sub(1),
        )
    }

    /// Best-effort hand back of entries a failed tick never reached.
    fn hand_back_rest(&self, rest: impl Iterator<Item = Delivery>, now: u64) {
        let mut lost = 0usize;
        for delivery in rest {
            if let Err(err) = self.hand_back(&delivery, now) {
                lost += 1;
                debug!(queue = %self.queue, id = %delivery.entry.id, error = %err, "hand back failed");
            }
        }
        if lost > 0 {
            warn!(queue = %self.queue, lost, "popped entries could not be handed back");
        }
    }

    /// Polls until `shutdown` is triggered.
    ///
    /// Sleeps `poll_interval` whenever the last poll drained everything due,
    /// and backs off exponentially on store errors without exiting.
    pub async fn run(self, shutdown: Shutdown) {
        info!(
            queue = %self.queue,
            poll_interval_ms = millis(self.settings.poll_interval),
            "delay scheduler started"
        );
        let mut backoff = Backoff::new(self.settings.error_backoff);

        while !shutdown.is_triggered() {
            let wait = match self.tick(&shutdown).await {
                Ok(report) => {
                    backoff.reset();
                    if report.popped() >= self.settings.batch_size {
                        Duration::ZERO
                    } else {
                        self.settings.poll_interval
                    }
                }
                Err(err) => {
                    let delay = backoff.next_delay();
                    warn!(
                        queue = %self.queue,
                        error = %err,
                        transient = err.is_transient(),
                        retry_in_ms = millis(delay),
                        "delay poll failed"
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
        info!(queue = %self.queue, "delay scheduler stopped");
    }
}
