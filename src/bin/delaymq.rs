//! delaymq – one binary that can run the queue loops, drive them from an
//! interactive shell, or play the bundled demo.
//
//  $ delaymq start --config delaymq.toml
//  $ delaymq shell --config delaymq.toml
//  > enqueue jobs +5000 job=job1
//  > group jobs workers 0
//  > read jobs workers c1 1
//  $ delaymq demo
use delaymq::broker::Broker;
use delaymq::core::clock::SystemClock;
use delaymq::core::consumer::ConsumerSettings;
use delaymq::core::dispatcher::Dispatcher;
use delaymq::core::entry::{Delivery, EntryId, Fields, StartId};
use delaymq::core::group::ConsumerId;
use delaymq::core::scheduler::SchedulerSettings;
use delaymq::core::shutdown::Shutdown;
use delaymq::core::store::{Store, StoreOptions};
use delaymq::{load_config, serve, Config};

use anyhow::Context;
use clap::{Parser, Subcommand};
use rustyline::history::DefaultHistory;
use rustyline::{DefaultEditor, Editor};

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Parser)]
#[command(name = "delaymq", version, about = "Delayed, lease-based task queue")]
struct Cli {
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Run the configured schedulers and consumers until Ctrl+C / SIGTERM.
    Start {
        /// Path to config TOML (env DELAYMQ_CONFIG overrides)
        #[arg(short, long, default_value = "delaymq.toml")]
        config: String,
    },
    /// Run the configured loops in the background with an interactive shell.
    Shell {
        /// Path to config TOML (env DELAYMQ_CONFIG overrides)
        #[arg(short, long, default_value = "delaymq.toml")]
        config: String,
    },
    /// Three delayed jobs plus a three-message producer/consumer exchange.
    Demo,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    delaymq::logging::init_logging()?;
    let cli = Cli::parse();

    match cli.cmd {
        Command::Start { config } => {
            let cfg = read_config(config)?;
            let shutdown = Shutdown::new();
            let signals = shutdown.listen_for_signals();
            serve(cfg, shutdown).await?;
            signals.abort();
        }
        Command::Shell { config } => {
            let cfg = read_config(config)?;
            let shutdown = Shutdown::new();
            let broker = Broker::start(&cfg, shutdown.clone())?;
            let result = repl(broker.store()).await;
            broker.stop().await;
            result?;
        }
        Command::Demo => demo().await?,
    }
    Ok(())
}

/// Loads the config file, or falls back to defaults when the file is absent.
fn read_config(cli_path: String) -> anyhow::Result<Config> {
    let path: String = std::env::var("DELAYMQ_CONFIG").unwrap_or(cli_path);
    if !Path::new(&path).exists() {
        println!("⚠️  {path} not found; using defaults");
        return Ok(Config::default());
    }
    load_config(&path).with_context(|| format!("loading {path}"))
}

// ───────────────────────────────────────────────────────────
// Interactive REPL shell
// ───────────────────────────────────────────────────────────
const HELP: &str = "\
enqueue <queue> [+<delay_ms>] <k=v>... | group <queue> <group> [0|$|<id>]
read <queue> <group> <consumer> [count] [block_ms] | ack <queue> <group> <id>
del <queue> <id> | pending <queue> <group> | info [queue] | stats
dlq <queue> | redrive <queue> <index> | exit";

async fn repl(store: Arc<Store>) -> anyhow::Result<()> {
    let mut rl: Editor<(), DefaultHistory> = DefaultEditor::new()?;
    println!("delaymq shell. Type `help` for commands.");

    loop {
        let Ok(line) = rl.readline("> ") else { break };
        let _ = rl.add_history_entry(line.as_str());
        let words: Vec<&str> = line.split_whitespace().collect();

        match run_command(&store, &words).await {
            Ok(Flow::Continue) => {}
            Ok(Flow::Exit) => break,
            Err(e) => println!("❌ {e:#}"),
        }
    }
    Ok(())
}

enum Flow {
    Continue,
    Exit,
}

async fn run_command(store: &Store, words: &[&str]) -> anyhow::Result<Flow> {
    match words {
        [] => {}
        ["help"] => println!("{HELP}"),
        ["exit" | "quit"] => return Ok(Flow::Exit),

        ["enqueue", queue, rest @ ..] => {
            let (delay, pairs) = match rest.split_first() {
                Some((first, pairs)) if first.starts_with('+') => {
                    let ms: u64 = first[1..].parse().context("delay must be +<ms>")?;
                    (Some(Duration::from_millis(ms)), pairs)
                }
                _ => (None, rest),
            };
            let fields = parse_fields(pairs)?;
            let id = store.enqueue(queue, fields, delay)?;
            println!("{id}");
        }

        ["group", queue, group, start @ ..] => {
            let start: StartId = start.first().copied().unwrap_or("0").parse()?;
            if store.create_group(queue, group, start)? {
                println!("OK");
            } else {
                println!("OK (already exists)");
            }
        }

        ["read", queue, group, consumer, opts @ ..] => {
            let count: usize = opts.first().map(|s| s.parse::<usize>()).transpose()?.unwrap_or(1);
            let block_ms: u64 = opts.get(1).map(|s| s.parse::<u64>()).transpose()?.unwrap_or(0);
            let consumer = ConsumerId::from(*consumer);
            let batch = store
                .read_group(queue, group, &consumer, count, Duration::from_millis(block_ms))
                .await?;
            if batch.is_empty() {
                println!("(empty)");
            }
            for delivery in batch {
                print_delivery(&delivery);
            }
        }

        ["ack", queue, group, id] => {
            let id: EntryId = id.parse()?;
            println!("{}", if store.ack(queue, group, id)? { "OK" } else { "NOT FOUND" });
        }

        ["del", queue, id] => {
            let id: EntryId = id.parse()?;
            println!("{}", if store.delete(queue, id)? { "OK" } else { "NOT FOUND" });
        }

        ["pending", queue, group] => {
            for pending in store.pending(queue, group)? {
                println!(
                    "{} consumer={} deliveries={} lease_expires_at={}",
                    pending.id,
                    pending.record.consumer,
                    pending.record.delivery_count,
                    pending.record.lease_expires_at
                );
            }
        }

        ["info"] => {
            for name in store.queues() {
                println!("{name}");
            }
        }

        ["info", queue] => match store.queue_info(queue)? {
            Some(info) => {
                println!(
                    "len={} scheduled={} next_due={:?} last_id={}",
                    info.len, info.scheduled, info.next_due, info.last_id
                );
                for group in info.groups {
                    let g = store.group_info(queue, &group)?;
                    println!(
                        "  group {} last_delivered={} pending={}",
                        g.name, g.last_delivered_id, g.pending
                    );
                }
            }
            None => println!("NOT FOUND"),
        },

        ["stats"] => println!("{:?}", store.stats()),

        ["dlq", queue] => {
            for (index, letter) in store.dead_letters().list(queue).iter().enumerate() {
                println!("[{index}] {} {} ({})", letter.id, letter.fields, letter.reason);
            }
        }

        ["redrive", queue, index] => match store.redrive(queue, index.parse()?)? {
            Some(id) => println!("{id}"),
            None => println!("NOT FOUND"),
        },

        _ => println!("Unknown cmd. Type `help`."),
    }
    Ok(Flow::Continue)
}

fn parse_fields(pairs: &[&str]) -> anyhow::Result<Fields> {
    pairs
        .iter()
        .map(|pair| {
            pair.split_once('=')
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .with_context(|| format!("expected key=value, got `{pair}`"))
        })
        .collect()
}

fn print_delivery(delivery: &Delivery) {
    println!(
        "{} {} (delivery {})",
        delivery.entry.id, delivery.entry.fields, delivery.delivery_count
    );
}

// ───────────────────────────────────────────────────────────
// Demo
// ───────────────────────────────────────────────────────────
async fn demo() -> anyhow::Result<()> {
    const DELAYED: &str = "delayed_queue";
    const QUEUE: &str = "my_queue";
    const GROUP: &str = "my_group";

    let guard = Store::open(StoreOptions::default(), Arc::new(SystemClock));
    let store = guard.store();
    let shutdown = Shutdown::new();
    let mut dispatcher = Dispatcher::new(Arc::clone(&store), shutdown.clone());

    dispatcher.spawn_scheduler(
        DELAYED,
        |delivery: Delivery| async move {
            println!("⏰ executing {}", delivery.entry.get("job_id").unwrap_or("?"));
            anyhow::Ok(())
        },
        SchedulerSettings::default(),
    );

    store.create_group(QUEUE, GROUP, StartId::After(EntryId::MIN))?;
    dispatcher.spawn_consumer(
        QUEUE,
        GROUP,
        ConsumerId::from("consumer1"),
        |delivery: Delivery| async move {
            println!("📨 received {}", delivery.entry.get("message").unwrap_or("?"));
            anyhow::Ok(())
        },
        ConsumerSettings {
            read_count: 1,
            ..ConsumerSettings::default()
        },
    );

    for (job, secs) in [("job1", 5), ("job2", 10), ("job3", 15)] {
        store.enqueue(
            DELAYED,
            Fields::new().with("job_id", job),
            Some(Duration::from_secs(secs)),
        )?;
        println!("➕ scheduled {job} in {secs}s");
    }

    store.enqueue(QUEUE, Fields::new().with("message", "first message"), None)?;
    store.enqueue(QUEUE, Fields::new().with("message", "second message"), None)?;
    tokio::time::sleep(Duration::from_secs(2)).await;
    store.enqueue(QUEUE, Fields::new().with("message", "third message"), None)?;

    tokio::time::sleep(Duration::from_secs(15)).await;
    dispatcher.shutdown(Duration::from_secs(5)).await;
    println!("{:?}", store.stats());
    Ok(())
}
