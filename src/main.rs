use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncBufReadExt;

use hearth::config::{RuntimeConfig, StoreBackend};
use hearth::event::{EventTypeRegistry, Payload};
use hearth::event_store::{migrate_file_to_sqlite, EventStore, FileEventStore, SqliteEventStore};
use hearth::orchestration::{orchestrator::RECEIVE_REQUEST, DirectReply, OrchestrationEvent};
use hearth::Runtime;

#[derive(Parser)]
#[command(name = "hearth")]
#[command(about = "Local event-sourced personal assistant runtime")]
#[command(version)]
struct Cli {
    /// Config file (defaults to the platform config dir)
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Interactive session: every input line becomes a request
    Run,
    /// Print the persisted event log
    Log {
        /// Only show events for this aggregate
        #[arg(long)]
        aggregate: Option<String>,
    },
    /// Dispatch one command with a JSON object payload
    Send {
        name: String,
        #[arg(default_value = "{}")]
        payload: String,
    },
    /// Copy the JSONL event log into the SQLite backend
    Migrate,
}

fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("hearth")
        .join("config.yaml")
}

fn load_config(cli: &Cli) -> Result<RuntimeConfig> {
    let path = cli.config.clone().unwrap_or_else(default_config_path);
    RuntimeConfig::load(&path)
}

fn open_store(config: &RuntimeConfig) -> Result<Arc<dyn EventStore>> {
    let types = Arc::new(EventTypeRegistry::new());
    OrchestrationEvent::register_types(&types);
    let store: Arc<dyn EventStore> = match config.store {
        StoreBackend::File => Arc::new(FileEventStore::new(config.event_log_path())),
        StoreBackend::Sqlite => Arc::new(SqliteEventStore::open(&config.sqlite_path(), types)?),
    };
    Ok(store)
}

async fn run_interactive(config: RuntimeConfig) -> Result<()> {
    let runtime = Runtime::bootstrap(config, Arc::new(DirectReply))?;

    runtime
        .processor()
        .bus()
        .subscribe_all(Arc::new(|event| match event.event_type.as_str() {
            "RequestCompleted" => {
                if let Some(text) = event.field_str("response_text") {
                    println!("{}", text);
                }
            }
            "AgentExecutionFailed" => {
                if let Some(error) = event.field_str("error") {
                    println!("request failed: {}", error);
                }
            }
            _ => {}
        }));

    println!(
        "hearth ready ({} events replayed). Type a request, or 'quit' to exit.",
        runtime.processor().store().events().len()
    );

    let stdin = tokio::io::BufReader::new(tokio::io::stdin());
    let mut lines = stdin.lines();
    while let Some(line) = lines.next_line().await? {
        let text = line.trim();
        if text.is_empty() {
            continue;
        }
        if text == "quit" || text == "exit" {
            break;
        }
        let mut payload = Payload::new();
        payload.insert(
            "text".to_string(),
            serde_json::Value::String(text.to_string()),
        );
        if let Err(err) = runtime.execute(RECEIVE_REQUEST, payload) {
            eprintln!("error: {}", err);
        }
    }

    runtime.shutdown();
    Ok(())
}

fn print_log(config: &RuntimeConfig, aggregate: Option<&str>) -> Result<()> {
    let store = open_store(config)?;
    store.load().context("Failed to load event log")?;
    let events = match aggregate {
        Some(id) => store.events_for(id),
        None => store.events(),
    };
    for event in &events {
        println!(
            "{}  {:<16} {:<24} {}",
            event.occurred_at,
            event.aggregate_id,
            event.event_type,
            serde_json::to_string(&event.data)?
        );
    }
    println!("{} events", events.len());
    Ok(())
}

async fn send_command(config: RuntimeConfig, name: &str, payload: &str) -> Result<()> {
    let payload: Payload =
        serde_json::from_str(payload).context("Payload must be a JSON object")?;
    let runtime = Runtime::bootstrap(config, Arc::new(DirectReply))?;
    runtime
        .execute(name, payload)
        .with_context(|| format!("Command '{}' failed", name))?;
    runtime.shutdown();
    println!("ok");
    Ok(())
}

fn migrate(config: &RuntimeConfig) -> Result<()> {
    let types = Arc::new(EventTypeRegistry::new());
    OrchestrationEvent::register_types(&types);
    let source = FileEventStore::new(config.event_log_path());
    let target = SqliteEventStore::open(&config.sqlite_path(), types)
        .context("Failed to open event database")?;
    let copied = migrate_file_to_sqlite(&source, &target)?;
    println!(
        "migrated {} events to {}",
        copied,
        config.sqlite_path().display()
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli)?;

    match cli.command {
        Command::Run => run_interactive(config).await,
        Command::Log { aggregate } => print_log(&config, aggregate.as_deref()),
        Command::Send { name, payload } => send_command(config, &name, &payload).await,
        Command::Migrate => migrate(&config),
    }
}
