//! Owns the background poll loops: one delay scheduler per queue and one
//! consumer loop per group consumer, all sharing a single [`Shutdown`].

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::core::consumer::{ConsumerSettings, GroupConsumer};
use crate::core::group::ConsumerId;
use crate::core::handler::Handler;
use crate::core::scheduler::{DelayScheduler, SchedulerSettings};
use crate::core::shutdown::Shutdown;
use crate::core::store::Store;
use crate::util::millis;

pub struct Dispatcher {
    store: Arc<Store>,
    shutdown: Shutdown,
    tasks: Vec<(String, JoinHandle<()>)>,
}

impl Dispatcher {
    pub fn new(store: Arc<Store>, shutdown: Shutdown) -> Self {
        Self {
            store,
            shutdown,
            tasks: Vec::new(),
        }
    }

    /// Names of the loops spawned so far, in spawn order.
    pub fn loops(&self) -> Vec<&str> {
        self.tasks.iter().map(|(name, _)| name.as_str()).collect()
    }

    pub fn spawn_scheduler(
        &mut self,
        queue: &str,
        handler: impl Handler,
        settings: SchedulerSettings,
    ) {
        let scheduler = DelayScheduler::new(Arc::clone(&self.store), queue, handler, settings);
        let handle = tokio::spawn(scheduler.run(self.shutdown.clone()));
        self.tasks.push((format!("scheduler:{queue}"), handle));
    }

    pub fn spawn_consumer(
        &mut self,
        queue: &str,
        group: &str,
        consumer: ConsumerId,
        handler: impl Handler,
        settings: ConsumerSettings,
    ) {
        let name = format!("consumer:{queue}/{group}/{consumer}");
        let consumer = GroupConsumer::new(
            Arc::clone(&self.store),
            queue,
            group,
            consumer,
            handler,
            settings,
        );
        let handle = tokio::spawn(consumer.run(self.shutdown.clone()));
        self.tasks.push((name, handle));
    }

    /// Triggers shutdown and waits up to `timeout` for every loop to stop.
    ///
    /// Loops still running after the timeout are aborted; anything they had
    /// claimed stays pending and is reclaimed after its lease expires.
    pub async fn shutdown(mut self, timeout: Duration) {
        info!(loops = self.tasks.len(), "🛑 stopping poll loops");
        self.shutdown.trigger();

        let (names, handles): (Vec<String>, Vec<JoinHandle<()>>) =
            std::mem::take(&mut self.tasks).into_iter().unzip();
        let aborts: Vec<_> = handles.iter().map(|h| h.abort_handle()).collect();

        match tokio::time::timeout(timeout, join_all(handles)).await {
            Ok(results) => {
                for (name, result) in names.iter().zip(results) {
                    if let Err(e) = result {
                        error!(task = %name, error = %e, "❌ poll loop ended abnormally");
                    }
                }
                info!("🏁 all poll loops stopped");
            }
            Err(_) => {
                warn!(timeout_ms = millis(timeout), "⚠️ poll loops did not stop in time; aborting");
                for abort in aborts {
                    abort.abort();
                }
            }
        }
    }
}

/// A dispatcher dropped without `shutdown` (for example on a failed startup)
/// aborts its loops instead of leaving them detached.
impl Drop for Dispatcher {
    fn drop(&mut self) {
        if self.tasks.is_empty() {
            return;
        }
        warn!(loops = self.tasks.len(), "dispatcher dropped without shutdown; aborting poll loops");
        for (_, handle) in self.tasks.drain(..) {
            handle.abort();
        }
    }
}
