#![allow(dead_code)]

use std::sync::{Arc, Once};

use delaymq::core::clock::{Clock, ManualClock, TokioClock};
use delaymq::core::entry::Fields;
use delaymq::core::store::{Store, StoreGuard, StoreOptions};

pub fn init_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let _ = delaymq::logging::init_logging();
    });
}

/// Store driven by an explicit clock, starting at t = 0.
pub fn manual_store() -> (StoreGuard, Arc<ManualClock>) {
    manual_store_with(StoreOptions::default())
}

pub fn manual_store_with(options: StoreOptions) -> (StoreGuard, Arc<ManualClock>) {
    init_logging();
    let clock = Arc::new(ManualClock::new(0));
    let store = Store::open(options, clock.clone() as Arc<dyn Clock>);
    (store, clock)
}

/// Store whose clock follows tokio time, for `start_paused` tests.
pub fn paused_store(options: StoreOptions) -> StoreGuard {
    init_logging();
    Store::open(options, Arc::new(TokioClock::anchored_at(1_000_000)))
}

pub fn job(name: &str) -> Fields {
    Fields::new().with("job", name)
}

pub fn message(text: &str) -> Fields {
    Fields::new().with("message", text)
}
