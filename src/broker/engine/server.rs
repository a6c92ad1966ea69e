//! Runtime engine: one store, one delay scheduler per configured queue and
//! the configured number of consumer loops per group.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::config::Config;
use crate::core::clock::SystemClock;
use crate::core::dispatcher::Dispatcher;
use crate::core::entry::Delivery;
use crate::core::group::ConsumerId;
use crate::core::shutdown::Shutdown;
use crate::core::store::{Store, StoreGuard};
use crate::util::millis;

/// How long `stop` waits for loops before aborting them.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// A running store plus its poll loops.
pub struct Broker {
    guard: StoreGuard,
    dispatcher: Dispatcher,
}

impl Broker {
    /// Opens the store, creates configured groups and spawns every loop.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(config: &Config, shutdown: Shutdown) -> anyhow::Result<Self> {
        let guard = Store::open(config.store.options(), Arc::new(SystemClock));
        let store = guard.store();
        // All groups exist before the first loop starts.
        for group in &config.groups {
            let created = store.create_group_with(
                &group.queue,
                &group.name,
                group.start_id()?,
                group.options(&config.store),
            )?;
            info!(
                queue = %group.queue,
                group = %group.name,
                created,
                consumers = group.consumers,
                "👥 consumer group ready"
            );
        }

        let mut dispatcher = Dispatcher::new(Arc::clone(&store), shutdown);
        for queue in &config.queues {
            let settings = queue.settings(&config.scheduler);
            info!(
                queue = %queue.name,
                poll_interval_ms = millis(settings.poll_interval),
                max_attempts = settings.max_attempts,
                "⏰ delay scheduler configured"
            );
            dispatcher.spawn_scheduler(&queue.name, log_scheduled, settings);
        }
        for group in &config.groups {
            for _ in 0..group.consumers {
                dispatcher.spawn_consumer(
                    &group.queue,
                    &group.name,
                    ConsumerId::generate(),
                    log_delivered,
                    config.consumer.settings(),
                );
            }
        }

        Ok(Self { guard, dispatcher })
    }

    pub fn store(&self) -> Arc<Store> {
        self.guard.store()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Stops every loop, then closes the store.
    pub async fn stop(self) {
        let Self { guard, dispatcher } = self;
        dispatcher.shutdown(SHUTDOWN_TIMEOUT).await;
        drop(guard);
    }
}

async fn log_scheduled(delivery: Delivery) -> anyhow::Result<()> {
    info!(
        id = %delivery.entry.id,
        attempt = delivery.delivery_count,
        fields = %delivery.entry.fields,
        "⏰ due entry executed"
    );
    Ok(())
}

async fn log_delivered(delivery: Delivery) -> anyhow::Result<()> {
    info!(
        id = %delivery.entry.id,
        delivery_count = delivery.delivery_count,
        fields = %delivery.entry.fields,
        "📨 entry consumed"
    );
    Ok(())
}

/// Runs the configured loops until `shutdown` is triggered.
pub async fn serve(config: Config, shutdown: Shutdown) -> anyhow::Result<()> {
    let broker = Broker::start(&config, shutdown.clone())?;
    info!(
        queues = config.queues.len(),
        groups = config.groups.len(),
        loops = broker.dispatcher().loops().len(),
        "📡 delaymq running"
    );
    shutdown.cancelled().await;
    broker.stop().await;
    Ok(())
}
