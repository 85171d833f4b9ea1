//! The `run` subcommand: recover, start the scheduler, wait for ctrl-c.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use tokio_util::sync::CancellationToken;
use tracing::info;

use relaybot_agent::arena::ArenaClient;
use relaybot_channel_telegram::TelegramNotifier;
use relaybot_config::RelayBotConfig;
use relaybot_engine::notify::NotificationDispatcher;
use relaybot_engine::scheduler::Scheduler;
use relaybot_engine::state::MonitoringPolicy;
use relaybot_store::TaskStore;

pub async fn run_daemon(config: RelayBotConfig) -> anyhow::Result<()> {
    if config.platform.username.is_empty() || config.platform.password.is_empty() {
        bail!("platform credentials missing; set PLATFORM_USERNAME and PLATFORM_PASSWORD");
    }
    if config.telegram.bot_token.is_empty() {
        bail!("Telegram bot token missing; set TELEGRAM_BOT_TOKEN");
    }

    let db_path = config.db_path()?;
    relaybot_config::ensure_config_dir()?;
    let store = Arc::new(TaskStore::open(&db_path).context("failed to open task database")?);
    info!(db = %db_path.display(), "Task store opened");

    // Re-queue whatever a previous process left in flight before the
    // first scan can run.
    let recovered = relaybot_engine::recover_on_startup(&store).await?;
    if recovered > 0 {
        info!(recovered, "Re-queued interrupted tasks");
    }

    let notifier = Arc::new(TelegramNotifier::new(&config.telegram.bot_token));
    let bot = notifier
        .verify()
        .await
        .context("Telegram bot token rejected")?;
    info!(bot, "Telegram notifier ready");

    let dispatcher = Arc::new(NotificationDispatcher::new(
        notifier,
        config.scheduler.notify_retries,
    ));
    let agent = Arc::new(ArenaClient::new(
        &config.platform.base_url,
        &config.platform.username,
        &config.platform.password,
    ));

    let policy = MonitoringPolicy {
        max_retries: config.scheduler.max_retries,
        max_monitoring_time: Duration::from_secs(config.scheduler.max_monitoring_secs),
        poll_interval: Duration::from_secs(config.scheduler.poll_interval_secs),
        ..MonitoringPolicy::default()
    };

    let cancel = CancellationToken::new();
    let scheduler = Arc::new(Scheduler::new(
        store,
        agent,
        dispatcher,
        policy,
        Duration::from_secs(config.scheduler.interval_secs),
        config.scheduler.max_concurrent_tasks,
        cancel.clone(),
    ));
    let handle = tokio::spawn(scheduler.run());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for ctrl-c")?;
    info!("Shutdown requested");
    cancel.cancel();
    handle.await?;

    Ok(())
}
