mod run;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use relaybot_store::TaskStore;
use relaybot_types::TaskStatus;

#[derive(Parser)]
#[command(name = "relaybot", about = "Scheduled webhook submission bot")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler daemon until ctrl-c
    Run,
    /// Schedule a webhook submission
    Schedule {
        /// When to submit, RFC 3339 (e.g. "2026-08-24T09:30:00+05:30")
        #[arg(long)]
        at: String,

        /// Webhook URL to submit (falls back to the configured default)
        #[arg(long)]
        webhook: Option<String>,

        /// Free-form notes attached to the submission
        #[arg(long, default_value = "")]
        notes: String,

        /// Owner chat id notified about the outcome
        #[arg(long)]
        owner: String,
    },
    /// List an owner's tasks
    Tasks {
        /// Owner chat id
        #[arg(long)]
        owner: String,
    },
    /// Cancel a pending task
    Cancel {
        /// Task id
        #[arg(long)]
        id: String,

        /// Owner chat id (must match the task's owner)
        #[arg(long)]
        owner: String,

        /// Delete the row instead of marking it cancelled
        #[arg(long)]
        purge: bool,
    },
    /// Check configuration and database health
    Health,
}

fn open_store(config: &relaybot_config::RelayBotConfig) -> anyhow::Result<TaskStore> {
    relaybot_config::ensure_config_dir()?;
    let db_path = config.db_path()?;
    TaskStore::open(&db_path).context("failed to open task database")
}

fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = relaybot_config::load_config()?;

    match cli.command {
        Commands::Run => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(run::run_daemon(config))?;
        }
        Commands::Schedule {
            at,
            webhook,
            notes,
            owner,
        } => {
            let scheduled_at = DateTime::parse_from_rfc3339(&at)
                .with_context(|| format!("invalid --at value {at:?}, expected RFC 3339"))?;
            let webhook = webhook
                .or_else(|| config.platform.default_webhook_url.clone())
                .context("no --webhook given and no default_webhook_url configured")?;

            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(async {
                let store = open_store(&config)?;
                let task =
                    relaybot_engine::schedule_task(&store, &owner, scheduled_at, &webhook, &notes)
                        .await?;
                println!("Scheduled task {}", task.id);
                println!("  at:      {}", task.scheduled_at.to_rfc3339());
                println!("  webhook: {}", task.webhook_url);
                anyhow::Ok(())
            })?;
        }
        Commands::Tasks { owner } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(async {
                let store = open_store(&config)?;
                let tasks = store.list_by_owner(&owner).await?;
                if tasks.is_empty() {
                    println!("No tasks for owner {owner}");
                    return anyhow::Ok(());
                }
                let now = Utc::now();
                for task in tasks {
                    let when = if task.status == TaskStatus::Pending {
                        let remaining = task.scheduled_at.signed_duration_since(now);
                        if remaining.num_seconds() > 0 {
                            format!("due in {}m{}s", remaining.num_minutes(), remaining.num_seconds() % 60)
                        } else {
                            "due now".to_string()
                        }
                    } else {
                        task.scheduled_at.to_rfc3339()
                    };
                    println!(
                        "{}  {:<10} attempts={} {}",
                        task.id,
                        task.status.as_str(),
                        task.attempts,
                        when
                    );
                }
                anyhow::Ok(())
            })?;
        }
        Commands::Cancel { id, owner, purge } => {
            let rt = tokio::runtime::Runtime::new()?;
            rt.block_on(async {
                let store = open_store(&config)?;
                relaybot_engine::cancel_task(&store, &owner, &id, purge).await?;
                if purge {
                    println!("Task {id} cancelled and deleted");
                } else {
                    println!("Task {id} cancelled");
                }
                anyhow::Ok(())
            })?;
        }
        Commands::Health => {
            println!("relaybot is healthy");
            println!("  platform: {}", config.platform.base_url);
            println!(
                "  credentials: {}",
                if config.platform.username.is_empty() {
                    "missing"
                } else {
                    "configured"
                }
            );
            println!(
                "  telegram token: {}",
                if config.telegram.bot_token.is_empty() {
                    "missing"
                } else {
                    "configured"
                }
            );
            println!("  scan interval: {}s", config.scheduler.interval_secs);
            println!("  db: {}", config.db_path()?.display());
        }
    }

    Ok(())
}
