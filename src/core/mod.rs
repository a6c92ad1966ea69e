pub mod clock;
pub mod consumer;
pub mod dispatcher;
pub mod dlq;
pub mod due_index;
pub mod entry;
pub mod error;
pub mod group;
pub mod handler;
pub mod log;
pub mod scheduler;
pub mod shutdown;
pub mod store;
