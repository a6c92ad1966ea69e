use std::future::Future;

use futures::future::BoxFuture;

use crate::core::entry::Delivery;

/// Processes one delivered entry.
///
/// Returning an error leaves the entry to be retried: the delay scheduler
/// reschedules it with backoff, a group consumer leaves it pending until its
/// lease expires. Handlers must tolerate redelivery (`delivery_count > 1`).
pub trait Handler: Send + Sync + 'static {
    fn handle(&self, delivery: Delivery) -> BoxFuture<'static, anyhow::Result<()>>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Delivery) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    fn handle(&self, delivery: Delivery) -> BoxFuture<'static, anyhow::Result<()>> {
        Box::pin(self(delivery))
    }
}
