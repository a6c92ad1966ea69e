//! # Broker Module
//!
//! Top-level entry point for embedding delaymq.
//!
//! - `engine`: opens the store, creates configured groups and runs one poll
//!   loop per queue-role pair until shutdown.
//!
//! **Entry Point:**
//! `serve(config, shutdown)` for a blocking run, or `Broker::start` when the
//! caller needs the store handle while the loops run (the interactive shell).

pub mod engine;

/// Re-export of the `serve` function to run the broker.
///
/// # Example
///
/// ```bash
/// delaymq start --config delaymq.toml
/// ```
pub use self::engine::{serve, Broker};
