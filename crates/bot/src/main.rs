//! chanpost — Telegram channel scheduler bot.
//!
//! Operators send media to the bot in a private chat; the bot keeps it as a
//! record and posts one record per scheduled time to the channel.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use tokio::sync::{mpsc, Notify};
use tracing::{info, warn};

use chanpost_bot::{commands, App, Route};
use chanpost_core::config::load_dotenv;
use chanpost_core::{BotConfig, InboundMessage, Transport};
use chanpost_correlator::Correlator;
use chanpost_scheduler::PostingLoop;
use chanpost_store::{KvBackend, RecordStore};
use chanpost_telegram::{TelegramClient, UpdatePoller};

const INBOUND_QUEUE: usize = 256;

// ── CLI ─────────────────────────────────────────────────────────────

/// Telegram channel scheduler bot.
#[derive(Parser, Debug)]
#[command(name = "chanpost", version, about)]
struct Cli {
    /// Path to the JSON config file.
    #[arg(short, long, env = "CHANPOST_CONFIG", default_value = "./cfg.json")]
    config: String,

    /// Keep records in process memory instead of Redis.
    #[arg(long)]
    memory: bool,

    /// Long-poll timeout in seconds.
    #[arg(long, env = "CHANPOST_POLL_TIMEOUT", default_value_t = 60)]
    poll_timeout: u64,
}

// ── main ────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_dotenv();
    let cli = Cli::parse();

    let config = BotConfig::load(&cli.config)
        .with_context(|| format!("failed to load config from {}", cli.config))?;

    let default_level = if config.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    info!(path = %cli.config, "loaded bot config");
    config.log_summary();

    let client = Arc::new(TelegramClient::new(
        config.api_url.clone(),
        config.resolved_token()?,
        config.temporary_files_directory.clone(),
        config.admin_list.clone(),
    )?);
    let me = client.get_me().await.context("getMe failed, is the token valid?")?;
    info!(bot_id = me.id, username = ?me.username, "authorized");

    let backend = open_backend(&config, cli.memory).await?;
    let store = Arc::new(RecordStore::new(backend, config.store_prefix(me.id)));
    let transport: Arc<dyn Transport> = client.clone();

    let shutdown = Arc::new(Notify::new());
    let posting = Arc::new(PostingLoop::new(
        store.clone(),
        transport.clone(),
        config.channel_id,
        config.default_labels(),
    ));
    let debounce = Duration::from_millis(config.debounce_millis);
    let app = Arc::new(App::new(
        config,
        store,
        posting.clone(),
        transport.clone(),
        shutdown.clone(),
    ));

    let correlator = build_correlator(app.clone(), transport.clone(), debounce)?;

    if let Err(e) = client.set_my_commands(&commands::menu()).await {
        warn!(error = %e, "failed to register command menu");
    }

    let (tx, mut rx) = mpsc::channel::<InboundMessage>(INBOUND_QUEUE);
    let poller = UpdatePoller::new(client.clone()).timeout(cli.poll_timeout);
    let poller_task = tokio::spawn(poller.run(tx, shutdown.clone()));
    let ticker_task = tokio::spawn(posting.clone().run(shutdown.clone()));

    let stopped = shutdown.notified();
    tokio::pin!(stopped);
    info!("chanpost running");

    loop {
        tokio::select! {
            msg = rx.recv() => {
                let Some(msg) = msg else { break };
                dispatch(&app, &correlator, msg);
            }
            _ = tokio::signal::ctrl_c() => {
                info!("interrupt received");
                shutdown.notify_waiters();
                break;
            }
            _ = &mut stopped => break,
        }
    }

    let dropped = correlator.shutdown();
    if dropped > 0 {
        warn!(dropped, "pending groups discarded on shutdown");
    }
    shutdown.notify_waiters();
    let _ = tokio::join!(poller_task, ticker_task);
    info!("chanpost exited cleanly");
    Ok(())
}

fn dispatch(app: &Arc<App>, correlator: &Correlator<InboundMessage>, msg: InboundMessage) {
    match app.classify(&msg) {
        Route::Correlate => correlator.register(msg),
        Route::Echo => {
            let app = app.clone();
            tokio::spawn(async move {
                if let Err(e) = app.handle_echo(&msg).await {
                    app.report(&msg, &format!("{e:#}")).await;
                }
            });
        }
        Route::Command => {
            let app = app.clone();
            tokio::spawn(async move {
                if let Err(e) = app.handle_text(&msg).await {
                    app.report(&msg, &format!("{e:#}")).await;
                }
            });
        }
        Route::Ignore => {}
    }
}

fn build_correlator(
    app: Arc<App>,
    transport: Arc<dyn Transport>,
    debounce: Duration,
) -> anyhow::Result<Correlator<InboundMessage>> {
    let correlator = Correlator::<InboundMessage>::builder()
        .debounce(debounce)
        .on_group(move |events| {
            let app = app.clone();
            async move { app.handle_group(events).await }
        })
        .on_fault(move |fault| {
            let transport = transport.clone();
            tokio::spawn(async move {
                transport.notify_operators(&format!("Error: {fault}")).await;
            });
        })
        .build()?;
    Ok(correlator)
}

#[cfg(feature = "redis")]
async fn open_backend(config: &BotConfig, memory: bool) -> anyhow::Result<Arc<dyn KvBackend>> {
    if memory {
        warn!("using in-memory store, records are lost on exit");
        return Ok(Arc::new(chanpost_store::MemoryBackend::new()));
    }
    let url = config.redis_url();
    let backend = chanpost_store::RedisBackend::connect(&url)
        .await
        .with_context(|| format!("failed to connect to redis at {}", config.redis_address))?;
    info!(address = %config.redis_address, db = config.redis_database_number, "redis connected");
    Ok(Arc::new(backend))
}

#[cfg(not(feature = "redis"))]
async fn open_backend(_config: &BotConfig, _memory: bool) -> anyhow::Result<Arc<dyn KvBackend>> {
    warn!("built without redis, records are kept in memory");
    Ok(Arc::new(chanpost_store::MemoryBackend::new()))
}
