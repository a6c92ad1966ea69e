//! delaymq – a delayed, lease-based task queue with consumer-group delivery.
//!
//! This crate exports
//!  * `core`   – log, due-time index, consumer groups, scheduler and poll loops
//!  * `broker` – embedding entry point wiring configured loops to a store
//!  * `config` – TOML-driven runtime configuration
//!
//! Downstream applications can embed the whole runtime (`serve`) or drive
//! the [`core::store::Store`] directly from their own loops.

// ───────────────────────────────────────────────────────────
// Public modules
// ───────────────────────────────────────────────────────────
pub mod broker;
pub mod config;
pub mod core;
pub mod logging;
pub mod util;

// ───────────────────────────────────────────────────────────
// Re-exports
// ───────────────────────────────────────────────────────────
pub use broker::serve;
pub use config::{load_config, Config};
pub use core::error::{QueueError, Result};
pub use core::store::{Store, StoreGuard};
