use clap::{Parser, Subcommand};
use omnirelay_accounts::sync::{spawn_sync_loop, sync_accounts};
use omnirelay_accounts::{AccountCache, AccountStore, JsonFileStore, PostgrestStore};
use omnirelay_broker::BrokerClient;
use omnirelay_core::config::AppConfig;
use omnirelay_core::metrics::MetricsStore;
use omnirelay_core::platform::PlatformAdapter;
use omnirelay_facebook::FacebookAdapter;
use omnirelay_instagram::InstagramAdapter;
use omnirelay_server::{Dispatcher, Gateway};
use omnirelay_slack::SlackAdapter;
use omnirelay_telegram::TelegramPoller;
use omnirelay_upstream::{ChatBackend, HttpChatBackend};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

const VERSION: &str = "0.1.0";

#[derive(Parser)]
#[command(name = "omnirelay")]
#[command(version = VERSION)]
#[command(about = "Messaging bridge between chat platforms and one upstream backend")]
struct Cli {
    /// Path to the config file (default: ~/.omnirelay/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the webhook gateway and background loops
    Serve,
    /// One-shot sync of broker connected accounts into the account store
    Sync,
    /// Copy a JSON mapping file into the configured PostgREST table
    Migrate {
        /// Source JSON file (default: the configured accounts path)
        #[arg(short, long)]
        file: Option<PathBuf>,
    },
    /// Show which sections and credentials are configured
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();

    let config = AppConfig::load(cli.config.clone()).map_err(|e| {
        anyhow::anyhow!(
            "Failed to load config: {}. Create ~/.omnirelay/config.json or pass --config.",
            e
        )
    })?;

    match &cli.command {
        Some(Commands::Serve) => run_serve(config).await,
        Some(Commands::Sync) => run_sync(&config).await,
        Some(Commands::Migrate { file }) => run_migrate(&config, file.clone()).await,
        Some(Commands::Status) => {
            run_status(&config);
            Ok(())
        }
        None => {
            println!("omnirelay v{}", VERSION);
            println!("Use --help for usage.");
            Ok(())
        }
    }
}

fn build_broker(config: &AppConfig) -> anyhow::Result<BrokerClient> {
    let broker_cfg = config
        .broker
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("broker section is required"))?;
    Ok(BrokerClient::new(
        broker_cfg.api_key.clone(),
        broker_cfg.base_url.clone(),
    ))
}

fn build_store(config: &AppConfig) -> anyhow::Result<Arc<dyn AccountStore>> {
    match config.accounts.backend.as_str() {
        "postgrest" => {
            let (Some(url), Some(service_key)) = (
                config.accounts.url.clone(),
                config.accounts.service_key.clone(),
            ) else {
                anyhow::bail!("accounts.url and accounts.service_key are required for the postgrest backend");
            };
            Ok(Arc::new(PostgrestStore::new(
                url,
                service_key,
                config.accounts.table.clone(),
            )))
        }
        "json" => Ok(Arc::new(JsonFileStore::new(config.accounts.path.clone()))),
        other => anyhow::bail!("unknown accounts backend '{}'", other),
    }
}

async fn run_serve(config: AppConfig) -> anyhow::Result<()> {
    let upstream_cfg = config
        .upstream
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("upstream section is required for serve"))?;
    let backend: Arc<dyn ChatBackend> = Arc::new(HttpChatBackend::new(
        upstream_cfg.url.clone(),
        upstream_cfg.timeout_secs,
    ));

    let broker = build_broker(&config)?;
    let metrics = MetricsStore::new();
    let mut gateway = Gateway::new(
        config.server.bind.clone(),
        config.server.port,
        metrics.clone(),
    );

    let dispatcher = |default_response: Option<String>| {
        Arc::new(Dispatcher::new(
            backend.clone(),
            metrics.clone(),
            default_response.unwrap_or_else(|| config.dispatch.default_response.clone()),
            config.dispatch.chunk_delay_ms,
        ))
    };

    if let Some(slack_cfg) = &config.slack {
        if slack_cfg.signing_secret.is_none() {
            warn!("Slack signing secret not configured; request verification is DISABLED");
        }

        let store = build_store(&config)?;
        let cache = Arc::new(AccountCache::new(store.clone()));
        match cache.refresh().await {
            Ok(count) => info!(entries = count, "loaded Slack account mapping on startup"),
            Err(e) => warn!(error = %e, "failed to load Slack accounts on startup; will retry"),
        }
        cache.clone().spawn_refresh_loop(config.accounts.cache_ttl_secs);
        spawn_sync_loop(
            broker.clone(),
            store,
            cache.clone(),
            slack_cfg.toolkit.clone(),
            slack_cfg.sync_interval_secs,
        );

        let adapter: Arc<dyn PlatformAdapter> = Arc::new(SlackAdapter::new(
            broker.clone(),
            cache,
            slack_cfg.signing_secret.clone(),
            slack_cfg.bot_user_id.clone(),
        ));
        gateway.register(adapter, dispatcher(slack_cfg.default_response.clone()));
    }

    if let Some(facebook_cfg) = &config.facebook {
        let pages = Arc::new(AccountCache::new(Arc::new(JsonFileStore::new(
            facebook_cfg.accounts_path.clone(),
        ))));
        if let Err(e) = pages.refresh().await {
            warn!(error = %e, "failed to load Facebook page mapping");
        }

        let adapter: Arc<dyn PlatformAdapter> = Arc::new(FacebookAdapter::new(
            broker.clone(),
            pages,
            facebook_cfg.verify_token.clone(),
            facebook_cfg.app_secret.clone(),
            facebook_cfg.org_id.clone(),
            facebook_cfg.connected_account_id.clone(),
        ));
        gateway.register(adapter, dispatcher(facebook_cfg.default_response.clone()));
    }

    if let Some(instagram_cfg) = &config.instagram {
        let adapter: Arc<dyn PlatformAdapter> = Arc::new(InstagramAdapter::new(
            broker.clone(),
            instagram_cfg.verify_token.clone(),
            instagram_cfg.org_id.clone(),
            instagram_cfg.connected_account_id.clone(),
        ));
        gateway.register(adapter, dispatcher(instagram_cfg.default_response.clone()));
    }

    if let Some(telegram_cfg) = &config.telegram {
        let org_id = telegram_cfg
            .org_id
            .clone()
            .or_else(|| config.broker.as_ref().map(|b| b.user_id.clone()))
            .ok_or_else(|| anyhow::anyhow!("telegram.org_id or broker.user_id is required"))?;
        let poller = Arc::new(TelegramPoller::new(
            broker.clone(),
            backend.clone(),
            org_id,
            telegram_cfg.connected_account_id.clone(),
            telegram_cfg.poll_interval_secs,
            config.dispatch.chunk_delay_ms,
            config.dispatch.default_response.clone(),
        ));
        poller.spawn();
    }

    for platform in config.configured_platforms() {
        info!(platform, "platform configured");
    }

    gateway.start().await
}

async fn run_sync(config: &AppConfig) -> anyhow::Result<()> {
    let broker = build_broker(config)?;
    let store = build_store(config)?;
    let toolkit = config
        .slack
        .as_ref()
        .map(|s| s.toolkit.clone())
        .unwrap_or_else(|| "SLACKBOT".to_string());

    let count = sync_accounts(&broker, store.as_ref(), &toolkit).await?;
    println!("✓ Synced {} accounts to the {} store", count, config.accounts.backend);
    Ok(())
}

async fn run_migrate(config: &AppConfig, file: Option<PathBuf>) -> anyhow::Result<()> {
    let source_path = file.unwrap_or_else(|| config.accounts.path.clone());
    let source = JsonFileStore::new(source_path.clone());
    let mapping = source.load_all().await?;
    if mapping.is_empty() {
        println!("Nothing to migrate: {} is empty or missing", source_path.display());
        return Ok(());
    }

    let (Some(url), Some(service_key)) = (
        config.accounts.url.clone(),
        config.accounts.service_key.clone(),
    ) else {
        anyhow::bail!("accounts.url and accounts.service_key are required for migrate");
    };
    let target = PostgrestStore::new(url, service_key, config.accounts.table.clone());

    let records: Vec<_> = mapping.into_values().collect();
    let count = target.upsert_many(&records).await?;
    println!(
        "✓ Migrated {} accounts from {} to table '{}'",
        count,
        source_path.display(),
        config.accounts.table
    );
    Ok(())
}

fn run_status(config: &AppConfig) {
    println!("omnirelay v{}\n", VERSION);

    let check = |name: &str, has: bool| {
        if has {
            println!("{}: ✓", name);
        } else {
            println!("{}: not set", name);
        }
    };

    check("Upstream backend", config.upstream.is_some());
    check("Broker", config.broker.is_some());
    check("Slack", config.slack.is_some());
    check(
        "Slack signing secret",
        config
            .slack
            .as_ref()
            .and_then(|s| s.signing_secret.as_ref())
            .is_some(),
    );
    check("Facebook", config.facebook.is_some());
    check(
        "Facebook verify token",
        config
            .facebook
            .as_ref()
            .and_then(|f| f.verify_token.as_ref())
            .is_some(),
    );
    check("Instagram", config.instagram.is_some());
    check("Telegram", config.telegram.is_some());

    println!(
        "\nAccount store: {} ({})",
        config.accounts.backend,
        match config.accounts.backend.as_str() {
            "postgrest" => config.accounts.table.clone(),
            _ => config.accounts.path.display().to_string(),
        }
    );
    println!("Gateway: {}:{}", config.server.bind, config.server.port);
}
