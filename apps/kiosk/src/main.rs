mod config;

use std::{path::PathBuf, sync::Arc};

use anyhow::{bail, Result};
use clap::{Parser, Subcommand};
use futures::StreamExt;
use queue_core::{
    announce_detached, Announcement, Announcer, CallEvent, CallTracker, QueueStats, QueueStore,
    TracingAnnouncer,
};
use serde_json::json;
use shared::domain::{CounterId, QueueDocument, ServiceType, Ticket};
use storage::Storage;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::{load_settings, prepare_database_url};

#[derive(Parser, Debug)]
#[command(name = "kiosk", about = "Walk-in visitor queue")]
struct Cli {
    /// Config file; defaults to ./kiosk.toml when present.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[arg(long, global = true)]
    database_url: Option<String>,
    /// Print results as JSON.
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Take a ticket for a service type.
    Issue { service: ServiceType },
    /// Call the next waiting ticket to a counter.
    Call { counter: CounterId },
    /// Repeat the call of the ticket a counter holds.
    Recall { counter: CounterId },
    /// Mark the held ticket as a no-show.
    Skip { counter: CounterId },
    /// Mark the held ticket as served.
    Serve { counter: CounterId },
    /// Discard every ticket of the day.
    Reset {
        #[arg(long)]
        yes: bool,
    },
    Status,
    Waiting { service: ServiceType },
    /// Follow the queue as a display would, announcing each call.
    Watch,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let mut settings = load_settings(cli.config.as_deref())?;
    if let Some(database_url) = cli.database_url.clone() {
        settings.database_url = database_url;
    }

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&settings.log_filter))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let layout = settings.layout()?;
    let database_url = prepare_database_url(&settings.database_url)?;
    let storage = Storage::new(&database_url).await?;
    let store = QueueStore::new(Arc::new(storage.clone()), layout)
        .with_key(settings.storage_key.clone());
    info!(%database_url, key = %store.key(), "queue store ready");

    let json = cli.json;
    match cli.command {
        Command::Issue { service } => {
            let ticket = store.issue_ticket(service).await?;
            if json {
                println!("{}", serde_json::to_string(&ticket)?);
            } else {
                println!("issued {} ({})", ticket.display_code, ticket.id);
            }
        }
        Command::Call { counter } => {
            ensure_counter(&store, counter)?;
            let ticket = store.call_next(counter).await?;
            print_call(json, counter, ticket.as_ref(), "calls")?;
        }
        Command::Recall { counter } => {
            ensure_counter(&store, counter)?;
            let ticket = store.recall_current(counter).await?;
            print_call(json, counter, ticket.as_ref(), "recalls")?;
        }
        Command::Skip { counter } => {
            ensure_counter(&store, counter)?;
            let done = store.skip_current(counter).await?;
            print_completion(json, counter, done, "skipped")?;
        }
        Command::Serve { counter } => {
            ensure_counter(&store, counter)?;
            let done = store.mark_served(counter).await?;
            print_completion(json, counter, done, "served")?;
        }
        Command::Reset { yes } => {
            if !yes {
                bail!("reset discards every ticket of the day; pass --yes to confirm");
            }
            store.reset_queue().await?;
            println!("queue reset");
        }
        Command::Status => {
            let document = store.snapshot().await?;
            print_status(json, &store, &document)?;
        }
        Command::Waiting { service } => {
            if !store.layout().contains_service(service) {
                bail!("service {service} is not served by any counter");
            }
            let tickets = store.waiting_tickets(service).await?;
            if json {
                println!("{}", serde_json::to_string(&tickets)?);
            } else if tickets.is_empty() {
                println!("no tickets waiting for {service}");
            } else {
                for ticket in tickets {
                    println!("{} issued {}", ticket.display_code, ticket.issued_at);
                }
            }
        }
        Command::Watch => watch(&store, &storage, settings.poll_interval(), json).await?,
    }

    Ok(())
}

fn ensure_counter(store: &QueueStore, counter: CounterId) -> Result<()> {
    if store.layout().contains_counter(counter) {
        return Ok(());
    }
    let known: Vec<String> = store.layout().counters().map(|c| c.to_string()).collect();
    bail!(
        "counter {counter} is not configured (known counters: {})",
        known.join(", ")
    )
}

fn print_call(json: bool, counter: CounterId, ticket: Option<&Ticket>, verb: &str) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string(&json!({ "counter": counter, "ticket": ticket }))?
        );
        return Ok(());
    }
    match ticket {
        Some(ticket) => println!("counter {counter} {verb} {}", ticket.display_code),
        None => println!("counter {counter}: nothing to call"),
    }
    Ok(())
}

fn print_completion(json: bool, counter: CounterId, done: bool, outcome: &str) -> Result<()> {
    if json {
        println!(
            "{}",
            serde_json::to_string(&json!({ "counter": counter, "completed": done }))?
        );
    } else if done {
        println!("counter {counter}: ticket {outcome}");
    } else {
        println!("counter {counter} holds no ticket");
    }
    Ok(())
}

fn print_status(json: bool, store: &QueueStore, document: &QueueDocument) -> Result<()> {
    let totals = QueueStats::from_document(document, None);
    let services: Vec<(ServiceType, QueueStats)> = store
        .layout()
        .services()
        .map(|service| (service, QueueStats::from_document(document, Some(service))))
        .collect();

    if json {
        let per_service: serde_json::Map<String, serde_json::Value> = services
            .iter()
            .map(|(service, stats)| {
                Ok::<_, serde_json::Error>((service.to_string(), serde_json::to_value(stats)?))
            })
            .collect::<serde_json::Result<_>>()?;
        let counters: serde_json::Map<String, serde_json::Value> = document
            .counters_state
            .keys()
            .map(|counter| {
                let held = document.held_by(*counter).map(|t| t.display_code.clone());
                (counter.to_string(), json!(held))
            })
            .collect();
        let body = json!({
            "epoch_date": document.epoch_date,
            "totals": totals,
            "services": per_service,
            "counters": counters,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
        return Ok(());
    }

    println!(
        "{}: {} issued, {} waiting, {} called, {} served, {} skipped",
        document.epoch_date,
        totals.issued,
        totals.waiting,
        totals.called,
        totals.served,
        totals.skipped
    );
    for (service, stats) in &services {
        println!("  service {service}: {} waiting", stats.waiting);
    }
    for counter in document.counters_state.keys() {
        match document.held_by(*counter) {
            Some(ticket) => println!("  counter {counter}: {}", ticket.display_code),
            None => println!("  counter {counter}: idle"),
        }
    }
    Ok(())
}

async fn watch(
    store: &QueueStore,
    storage: &Storage,
    poll_interval: std::time::Duration,
    json: bool,
) -> Result<()> {
    let mut updates = store.watch();
    let poller = storage.spawn_change_poller(poll_interval);
    let announcer: Arc<dyn Announcer> = Arc::new(TracingAnnouncer);

    let mut tracker = CallTracker::new();
    let document = store.snapshot().await?;
    tracker.prime(&document);
    print_status(json, store, &document)?;
    info!("watching for queue changes; ctrl-c to stop");

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            update = updates.next() => {
                let Some(document) = update else {
                    break;
                };
                for event in tracker.observe(&document) {
                    let verb = match &event {
                        CallEvent::Called { .. } => "called",
                        CallEvent::Recalled { .. } => "recalled",
                    };
                    let announcement = Announcement::for_ticket(event.ticket(), event.counter());
                    if json {
                        let line = json!({ "event": verb, "announcement": announcement });
                        println!("{}", serde_json::to_string(&line)?);
                    } else {
                        println!(
                            "{verb}: {} -> counter {}",
                            announcement.display_code, announcement.counter
                        );
                    }
                    announce_detached(announcer.clone(), announcement);
                }
            }
            _ = &mut shutdown => break,
        }
    }

    poller.abort();
    Ok(())
}
