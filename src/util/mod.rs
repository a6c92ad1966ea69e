pub mod backoff;
pub mod time;

pub use backoff::{Backoff, BackoffPolicy};
pub use time::millis;
