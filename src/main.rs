// src/main.rs
// valet daemon entrypoint: load config, open the memory store, wire the
// agent and its services, start transports and the periodic loops.

use anyhow::{Context, Result};
use clap::Parser;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use valet::agent::{Agent, ApprovalBroker, BudgetTracker};
use valet::config::Config;
use valet::daemon::Daemon;
use valet::db::DatabasePool;
use valet::embeddings::Embedder;
use valet::llm::ProviderFactory;
use valet::memory::{spawn_decay_loop, DecayConfig, MemoryStore};
use valet::scheduler::CronRunner;
use valet::session::ConversationBuffer;
use valet::tools::{register_builtin_tools, Services, ToolRegistry};
use valet::transport::{telegram::TelegramTransport, Notifier, Transport};

#[derive(Parser)]
#[command(name = "valet", about = "Personal assistant daemon", version)]
struct Cli {
    /// Log level (error, warn, info, debug, trace)
    #[arg(long, env = "VALET_LOG", default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env from ~/.valet/.env only (never from CWD).
    if let Some(home) = dirs::home_dir() {
        let _ = dotenvy::from_path(home.join(".valet/.env"));
    }

    let cli = Cli::parse();
    let level = match cli.log.to_lowercase().as_str() {
        "error" => Level::ERROR,
        "warn" => Level::WARN,
        "debug" => Level::DEBUG,
        "trace" => Level::TRACE,
        _ => Level::INFO,
    };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let config = Config::from_env();
    config.validate().context("startup configuration invalid")?;
    let essence = config.load_essence().context("failed to read essence file")?;

    // Storage
    let pool = Arc::new(
        DatabasePool::open(&config.memory_path)
            .await
            .context("failed to open memory database")?,
    );
    let embedder = Embedder::from_config(&config.api_keys, &config.embedder).map(Arc::new);
    if embedder.is_none() {
        info!("No embedder configured; memory runs keyword-only");
    }
    let memory = Arc::new(MemoryStore::new(pool.clone(), embedder));

    // LLM providers
    let factory = Arc::new(ProviderFactory::from_config(&config));
    let extractor = factory.extractor_client().await;
    if extractor.is_none() {
        info!("No extractor client available; background extraction disabled");
    }

    // Notify channel and shared services
    let (notifier, outbound_rx) = Notifier::channel();
    let services = Arc::new(Services {
        memory: memory.clone(),
        notifier: notifier.clone(),
        configured_providers: factory.configured_providers(),
        active_model: Arc::new(std::sync::RwLock::new(None)),
        deployer: None,
        web_search_key: config.api_keys.brave.clone(),
    });

    let mut registry = ToolRegistry::new();
    register_builtin_tools(&mut registry);

    let agent = Arc::new(Agent::new(
        factory.clone(),
        Arc::new(registry),
        services.clone(),
        Arc::new(ApprovalBroker::new()),
        BudgetTracker::new(pool.clone(), config.daily_token_budget),
        ConversationBuffer::new(pool.clone(), config.buffer_max_messages),
        essence,
        config.max_tool_iterations,
    ));
    agent.note_llm_config(config.llm_config_hash()).await;

    // Transport (validated present above)
    let token = config.telegram_token.clone().expect("validated");
    let transport = Arc::new(TelegramTransport::new(token));
    let transport_name = transport.name().to_string();

    let daemon = Arc::new(Daemon::new(
        agent.clone(),
        memory.clone(),
        extractor,
        transport_name.clone(),
        config.owner_chat_id,
    ));

    // Periodic loops
    let decay_config = DecayConfig::new(config.decay.max_age_days);
    let _decay = spawn_decay_loop(pool.clone(), decay_config, config.decay.interval);

    let cron_runner = Arc::new(CronRunner::new(
        pool.clone(),
        memory.clone(),
        agent.clone(),
        services.clone(),
        transport_name,
    ));
    tokio::spawn(cron_runner.run());

    if let Some(owner) = config.owner_chat_id {
        notifier.send(owner, "valet is up.");
    }

    // Transport long-poll + dispatch; these run until shutdown.
    let (inbound_tx, inbound_rx) = tokio::sync::mpsc::unbounded_channel();
    let transport_task = tokio::spawn(transport.start(inbound_tx, outbound_rx));
    let dispatch_task = tokio::spawn(daemon.run(inbound_rx));

    info!("valet started");
    tokio::select! {
        result = transport_task => {
            result??;
        }
        _ = dispatch_task => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutting down");
        }
    }

    Ok(())
}
