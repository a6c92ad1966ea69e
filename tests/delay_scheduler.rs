mod common;

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;

use delaymq::core::clock::Clock;
use delaymq::core::dlq::DeadLetterReason;
use delaymq::core::entry::Delivery;
use delaymq::core::scheduler::{DelayScheduler, SchedulerSettings};
use delaymq::core::shutdown::Shutdown;
use delaymq::core::store::StoreOptions;
use delaymq::util::BackoffPolicy;
use delaymq::QueueError;

use common::{job, manual_store, paused_store};

fn jobs(due: &[Delivery]) -> Vec<String> {
    due.iter()
        .map(|d| d.entry.get("job").unwrap_or_default().to_string())
        .collect()
}

#[test]
fn jobs_fire_in_due_order_at_five_ten_fifteen() {
    let (store, clock) = manual_store();
    store.enqueue("q", job("job1"), Some(Duration::from_secs(5))).unwrap();
    store.enqueue("q", job("job2"), Some(Duration::from_secs(10))).unwrap();
    store.enqueue("q", job("job3"), Some(Duration::from_secs(15))).unwrap();

    clock.set(6_000);
    assert_eq!(jobs(&store.poll_due("q", clock.now_ms(), 10).unwrap()), ["job1"]);
    clock.set(11_000);
    assert_eq!(jobs(&store.poll_due("q", clock.now_ms(), 10).unwrap()), ["job2"]);
    clock.set(16_000);
    assert_eq!(jobs(&store.poll_due("q", clock.now_ms(), 10).unwrap()), ["job3"]);
    assert!(store.poll_due("q", u64::MAX, 10).unwrap().is_empty());
}

#[test]
fn shorter_delay_enqueued_later_fires_first() {
    let (store, clock) = manual_store();
    store.enqueue("q", job("A"), Some(Duration::from_secs(15))).unwrap();
    store.enqueue("q", job("B"), Some(Duration::from_secs(5))).unwrap();

    clock.set(6_000);
    assert_eq!(jobs(&store.poll_due("q", clock.now_ms(), 10).unwrap()), ["B"]);

    let (store, clock) = manual_store();
    store.enqueue("q", job("A"), Some(Duration::from_secs(15))).unwrap();
    store.enqueue("q", job("B"), Some(Duration::from_secs(5))).unwrap();
    clock.set(20_000);
    assert_eq!(jobs(&store.poll_due("q", clock.now_ms(), 10).unwrap()), ["B", "A"]);
}

#[test]
fn never_fires_before_due() {
    let (store, clock) = manual_store();
    clock.set(1_000);
    store.enqueue("q", job("x"), Some(Duration::from_millis(5_000))).unwrap();

    assert!(store.poll_due("q", 5_999, 10).unwrap().is_empty());
    let due = store.poll_due("q", 6_000, 10).unwrap();
    assert_eq!(jobs(&due), ["x"]);
    assert_eq!(due[0].entry.due_at, Some(6_000));
    assert_eq!(due[0].delivery_count, 1);
}

#[test]
fn equal_due_times_pop_in_id_order() {
    let (store, _) = manual_store();
    for name in ["a", "b", "c"] {
        store.append("q", job(name), Some(500)).unwrap();
    }
    assert_eq!(jobs(&store.poll_due("q", 500, 2).unwrap()), ["a", "b"]);
    assert_eq!(jobs(&store.poll_due("q", 500, 2).unwrap()), ["c"]);
}

#[test]
fn concurrent_pollers_never_pop_the_same_entry() {
    let (guard, _) = manual_store();
    let store = guard.store();
    for i in 0..1_000u64 {
        store.append("q", job(&i.to_string()), Some(i % 37)).unwrap();
    }

    let popped: Vec<Vec<String>> = (0..8)
        .map(|_| {
            let store = Arc::clone(&store);
            thread::spawn(move || {
                let mut mine = Vec::new();
                loop {
                    let due = store.poll_due("q", 1_000, 3).unwrap();
                    if due.is_empty() {
                        break;
                    }
                    mine.extend(jobs(&due));
                }
                mine
            })
        })
        .collect::<Vec<_>>()
        .into_iter()
        .map(|h| h.join().unwrap())
        .collect();

    let all: Vec<String> = popped.into_iter().flatten().collect();
    let unique: HashSet<&String> = all.iter().collect();
    assert_eq!(all.len(), 1_000);
    assert_eq!(unique.len(), 1_000);
}

#[test]
fn unbounded_delay_saturates_instead_of_wrapping() {
    let (store, clock) = manual_store();
    clock.set(1_000);
    store.enqueue("q", job("never"), Some(Duration::MAX)).unwrap();

    let info = store.queue_info("q").unwrap().unwrap();
    assert_eq!(info.next_due, Some(u64::MAX));
    assert!(store.poll_due("q", u64::MAX - 1, 10).unwrap().is_empty());
}

#[tokio::test]
async fn successful_execution_deletes_the_entry() {
    let (guard, clock) = manual_store();
    let store = guard.store();
    let id = store.enqueue("q", job("x"), Some(Duration::from_secs(1))).unwrap();

    let scheduler = DelayScheduler::new(
        Arc::clone(&store),
        "q",
        |_d: Delivery| async { anyhow::Ok(()) },
        SchedulerSettings::default(),
    );
    let shutdown = Shutdown::new();

    assert_eq!(scheduler.tick(&shutdown).await.unwrap().popped(), 0);
    clock.set(1_000);
    let report = scheduler.tick(&shutdown).await.unwrap();
    assert_eq!(report.executed, 1);
    assert!(store.get("q", id).unwrap().is_none());
    assert_eq!(store.stats().executed, 1);
}

#[tokio::test]
async fn failed_execution_backs_off_then_dead_letters() {
    let (guard, clock) = manual_store();
    let store = guard.store();
    let id = store.enqueue("q", job("flaky"), Some(Duration::from_secs(5))).unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let settings = SchedulerSettings {
        retry: BackoffPolicy::new(Duration::from_secs(1), Duration::from_secs(60)),
        max_attempts: 3,
        ..SchedulerSettings::default()
    };
    let scheduler = DelayScheduler::new(
        Arc::clone(&store),
        "q",
        move |_d: Delivery| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(anyhow::anyhow!("boom")) }
        },
        settings,
    );
    let shutdown = Shutdown::new();

    clock.set(5_000);
    assert_eq!(scheduler.tick(&shutdown).await.unwrap().retried, 1);
    let info = store.queue_info("q").unwrap().unwrap();
    assert_eq!(info.next_due, Some(6_000));

    clock.set(5_500);
    assert_eq!(scheduler.tick(&shutdown).await.unwrap().popped(), 0);

    clock.set(6_000);
    assert_eq!(scheduler.tick(&shutdown).await.unwrap().retried, 1);
    assert_eq!(store.queue_info("q").unwrap().unwrap().next_due, Some(8_000));

    clock.set(8_000);
    assert_eq!(scheduler.tick(&shutdown).await.unwrap().dead_lettered, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 3);

    assert!(store.get("q", id).unwrap().is_none());
    let letters = store.dead_letters().list("q");
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].id, id);
    assert!(matches!(
        letters[0].reason,
        DeadLetterReason::ExecutionFailed { attempts: 3, .. }
    ));

    let stats = store.stats();
    assert_eq!(stats.retried, 2);
    assert_eq!(stats.dead_lettered, 1);
}

#[tokio::test]
async fn entries_popped_during_shutdown_are_handed_back() {
    let (guard, clock) = manual_store();
    let store = guard.store();
    for name in ["a", "b"] {
        store.enqueue("q", job(name), Some(Duration::from_secs(1))).unwrap();
    }
    let scheduler = DelayScheduler::new(
        Arc::clone(&store),
        "q",
        |_d: Delivery| async { anyhow::Ok(()) },
        SchedulerSettings::default(),
    );
    let shutdown = Shutdown::new();
    shutdown.trigger();

    clock.set(2_000);
    let report = scheduler.tick(&shutdown).await.unwrap();
    assert_eq!(report.returned, 2);
    assert_eq!(report.executed, 0);

    let info = store.queue_info("q").unwrap().unwrap();
    assert_eq!(info.scheduled, 2);
    assert_eq!(info.next_due, Some(1_000));
    assert_eq!(store.stats().retried, 0);
}

#[tokio::test]
async fn store_failure_mid_batch_stops_the_tick() {
    let (guard, clock) = manual_store();
    let store = guard.store();
    for name in ["a", "b", "c"] {
        store.enqueue("q", job(name), Some(Duration::from_secs(1))).unwrap();
    }

    let executed = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&executed);
    let closer = Arc::clone(&store);
    let scheduler = DelayScheduler::new(
        Arc::clone(&store),
        "q",
        move |d: Delivery| {
            record.lock().push(d.entry.get("job").unwrap_or_default().to_string());
            closer.close();
            async { anyhow::Ok(()) }
        },
        SchedulerSettings::default(),
    );

    clock.set(1_000);
    let result = scheduler.tick(&Shutdown::new()).await;
    assert_eq!(result, Err(QueueError::StoreUnavailable));
    assert_eq!(*executed.lock(), ["a"]);
}

#[tokio::test(start_paused = true)]
async fn run_loop_fires_each_job_once_and_not_early() {
    let guard = paused_store(StoreOptions::default());
    let store = guard.store();
    let clock = store.clock();

    let fired = Arc::new(Mutex::new(Vec::new()));
    let record = Arc::clone(&fired);
    let handler = move |d: Delivery| {
        record.lock().push((
            d.entry.get("job").unwrap_or_default().to_string(),
            d.entry.due_at.unwrap_or_default(),
            clock.now_ms(),
        ));
        async { anyhow::Ok(()) }
    };

    store.enqueue("q", job("job3"), Some(Duration::from_secs(15))).unwrap();
    store.enqueue("q", job("job1"), Some(Duration::from_secs(5))).unwrap();
    store.enqueue("q", job("job2"), Some(Duration::from_secs(10))).unwrap();

    let shutdown = Shutdown::new();
    let scheduler = DelayScheduler::new(Arc::clone(&store), "q", handler, SchedulerSettings::default());
    let task = tokio::spawn(scheduler.run(shutdown.clone()));

    tokio::time::sleep(Duration::from_secs(17)).await;
    shutdown.trigger();
    task.await.unwrap();

    let fired = fired.lock().clone();
    let names: Vec<&str> = fired.iter().map(|(name, _, _)| name.as_str()).collect();
    assert_eq!(names, ["job1", "job2", "job3"]);
    for (name, due_at, fired_at) in &fired {
        assert!(fired_at >= due_at, "{name} fired early");
        assert!(fired_at - due_at <= 1_000, "{name} fired late");
    }
    assert_eq!(store.queue_info("q").unwrap().unwrap().len, 0);
}

#[tokio::test(start_paused = true)]
async fn run_loop_stops_promptly_while_idle() {
    let guard = paused_store(StoreOptions::default());
    let settings = SchedulerSettings {
        poll_interval: Duration::from_secs(3_600),
        ..SchedulerSettings::default()
    };
    let scheduler = DelayScheduler::new(
        guard.store(),
        "idle",
        |_d: Delivery| async { anyhow::Ok(()) },
        settings,
    );
    let shutdown = Shutdown::new();
    let task = tokio::spawn(scheduler.run(shutdown.clone()));

    tokio::time::sleep(Duration::from_millis(10)).await;
    let started = tokio::time::Instant::now();
    shutdown.trigger();
    task.await.unwrap();
    assert!(started.elapsed() < Duration::from_secs(1));
}

#[tokio::test(start_paused = true)]
async fn run_loop_survives_a_closed_store() {
    let guard = paused_store(StoreOptions::default());
    let store = guard.store();
    let scheduler = DelayScheduler::new(
        Arc::clone(&store),
        "q",
        |_d: Delivery| async { anyhow::Ok(()) },
        SchedulerSettings::default(),
    );
    let shutdown = Shutdown::new();
    let task = tokio::spawn(scheduler.run(shutdown.clone()));

    drop(guard);
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(!task.is_finished());

    shutdown.trigger();
    task.await.unwrap();
}
