use std::sync::Arc;

use clap::Parser;
use color_eyre::eyre::{Result, eyre};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use shardline::application::{EventKey, ListenerEvent, ListenerRegistry};
use shardline::domain::AuthToken;
use shardline::infrastructure::{
    AppConfig, CliArgs, GatewayInfoClient, ShardCoordinator, StorageManager, WebSocketConnector,
};

fn init_logging(config: &AppConfig) -> Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.to_string()));
    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    if let Some(log_path) = config.log_path.as_ref() {
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path)?;

        let file_layer = fmt::layer()
            .with_writer(file)
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false);

        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();

        info!(path = %log_path.display(), "Logging initialized");
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(stderr_layer)
            .init();
    }

    Ok(())
}

fn load_config(args: CliArgs) -> Result<AppConfig> {
    let mut config = match args.config.as_deref() {
        Some(path) => StorageManager::read_config(path)?,
        None => match StorageManager::new() {
            Ok(storage) => storage.load_config(None)?,
            Err(_) => AppConfig::default(),
        },
    };
    config.merge_with_args(args);
    Ok(config)
}

fn build_listeners() -> Arc<ListenerRegistry> {
    let listeners = Arc::new(ListenerRegistry::new());

    listeners.register(EventKey::AnyDispatch, |event| {
        if let ListenerEvent::Dispatch {
            shard,
            name,
            sequence,
            ..
        } = event
        {
            info!(shard, sequence, event = name, "Dispatch");
        }
    });
    listeners.register(EventKey::ShardReady, |event| {
        if let Some(shard) = event.shard() {
            info!(shard, "Shard ready");
        }
    });
    listeners.register(EventKey::ShardDisconnect, |event| {
        if let ListenerEvent::ShardDisconnect { shard, reason } = event {
            info!(shard, reason, "Shard disconnected");
        }
    });
    listeners.register(EventKey::AllShardsReady, |_| info!("All shards ready"));

    listeners
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let _ = dotenvy::dotenv();

    let config = load_config(CliArgs::parse())?;
    init_logging(&config)?;

    info!(version = shardline::VERSION, "Starting {}", shardline::NAME);

    let token = config
        .token
        .as_deref()
        .and_then(AuthToken::new)
        .ok_or_else(|| eyre!("a valid bot token is required (--token or SHARDLINE_TOKEN)"))?;
    info!(token = %token, shards = %config.shards, "Loaded configuration");

    let gateway_info = Arc::new(GatewayInfoClient::with_base_url(
        token.clone(),
        config.api_base.as_str(),
    )?);
    let connector = Arc::new(WebSocketConnector::new(config.connect_timeout()));

    let mut coordinator = ShardCoordinator::new(
        config.to_coordinator_config(token),
        connector,
        build_listeners(),
    )
    .with_gateway_info(gateway_info);

    let shutdown = coordinator.shutdown_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received, closing sessions");
            shutdown.cancel();
        }
    });

    coordinator.start().await?;

    if let Err(e) = coordinator.join().await {
        error!(error = %e, "Gateway stopped");
        return Err(e.into());
    }

    info!("Shut down cleanly");
    Ok(())
}
