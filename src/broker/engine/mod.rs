//! Runtime engine for delaymq.
//!
//! Exposes [`serve`], which runs the configured delay schedulers and group
//! consumers against one in-process store until shutdown.

pub mod server;

pub use server::{serve, Broker};
