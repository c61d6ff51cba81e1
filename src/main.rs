use std::sync::Arc;

use anyhow::Context;
use channel_relay::channels::{PlatformClient, TelegramClient};
use channel_relay::clock::{Clock, TokioClock};
use channel_relay::config::RelayConfig;
use channel_relay::error::RelayError;
use channel_relay::pipeline::{Forwarder, TextNormalizer};
use channel_relay::relay::Relay;
use channel_relay::scheduler::CandidateScanner;
use channel_relay::store::{DedupStore, JsonFileMirror};
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Optional .env, real environment wins
    let _ = dotenvy::dotenv();

    let config = RelayConfig::from_env().unwrap_or_else(|e| {
        eprintln!("Error: {e}");
        eprintln!("  Required: TELEGRAM_BOT_TOKEN, TARGET_CHANNEL_ID, SOURCE_CHANNELS");
        std::process::exit(1);
    });

    // Keep the guard alive so buffered file logs are flushed on exit
    let _log_guard = init_logging(&config);

    eprintln!("📡 Channel Relay v{}", env!("CARGO_PKG_VERSION"));
    eprintln!("   Target: {}", config.target);
    eprintln!("   Sources: {}", config.sources.len());
    eprintln!("   Post delay: {}s", config.post_delay.as_secs());
    eprintln!("   State: {}\n", config.state_path.display());

    let relay = match start(&config).await {
        Ok(relay) => relay,
        Err(e) => {
            error!(error = %e, "Startup failed");
            std::process::exit(1);
        }
    };

    tokio::select! {
        () = relay.run() => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("listening for ctrl-c")?;
            info!("Shutting down");
        }
    }

    Ok(())
}

/// Connect to the platform, load dedup state and assemble the relay.
async fn start(config: &RelayConfig) -> channel_relay::error::Result<Relay> {
    // ── Platform client ─────────────────────────────────────────────────
    let watched = config.sources.iter().chain([&config.target]).cloned();
    let telegram = Arc::new(TelegramClient::new(config.bot_token.clone()).watching(watched));
    let _poller = telegram.spawn_update_poller();
    let client: Arc<dyn PlatformClient> = telegram;

    let target = client
        .resolve_entity(&config.target)
        .await
        .map_err(|source| RelayError::TargetUnavailable {
            channel: config.target.to_string(),
            source,
        })?;
    info!(target = %target.display_name(), id = target.id, "Target channel resolved");

    for source in &config.sources {
        match client.resolve_entity(source).await {
            Ok(entity) => info!(source = %source, name = %entity.display_name(), "Source resolved"),
            Err(e) => warn!(source = %source, error = %e, "Source not reachable yet, will retry each pass"),
        }
    }

    // ── Dedup state ─────────────────────────────────────────────────────
    let normalizer = TextNormalizer::new(&config.footer);
    let mirror = JsonFileMirror::new(&config.state_path);
    let mut store = DedupStore::load(Box::new(mirror), config.dedup_cap).await;

    match client
        .fetch_recent_messages(&config.target, config.bootstrap_limit)
        .await
    {
        Ok(mut existing) => {
            for message in &mut existing {
                message.text = normalizer.without_footer(&message.text).to_string();
            }
            store.bootstrap(&existing).await;
        }
        Err(e) => warn!(error = %e, "Could not read target history, starting from saved state"),
    }

    // ── Relay ───────────────────────────────────────────────────────────
    let clock: Arc<dyn Clock> = Arc::new(TokioClock);
    let forwarder = Forwarder::new(
        Arc::clone(&client),
        config.target.clone(),
        normalizer,
        config.filter.engine(),
        Arc::clone(&clock),
        config.post_delay,
    );

    let mut relay = Relay::new(
        Arc::clone(&client),
        forwarder,
        store,
        CandidateScanner::new(config.window_size, config.scan_budget),
        config.sources.clone(),
        clock,
    )?
    .with_idle_wait(config.idle_wait);

    match client.subscribe(&config.sources).await {
        Ok(stream) => relay = relay.with_live(stream),
        Err(e) => warn!(error = %e, "Live updates unavailable, relying on history scans"),
    }

    Ok(relay)
}

fn init_logging(config: &RelayConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let (file_layer, guard) = match &config.log_dir {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "channel-relay.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .with_writer(writer)
                .with_ansi(false)
                .with_target(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .with(file_layer)
        .init();

    guard
}
