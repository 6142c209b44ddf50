use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tool_relay::backend::build_client;
use tool_relay::config::config_search_paths;
use tool_relay::{build_router, AppState, CapabilityCache, GatewayConfig, HttpBackend, Normalizer, SharedJournal};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(
    name = "tool-relay",
    about = "LLM gateway that normalizes backend responses and repairs embedded tool calls",
    version
)]
struct Cli {
    /// Path to config file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(short, long)]
    port: Option<u16>,

    /// Backend base URL (overrides config)
    #[arg(long)]
    backend_url: Option<String>,

    /// JSONL journal file (overrides config)
    #[arg(long)]
    journal: Option<PathBuf>,

    /// Print config search paths and exit
    #[arg(long)]
    show_config_paths: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "tool_relay=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if cli.show_config_paths {
        println!("Config search paths:");
        for (i, path) in config_search_paths().iter().enumerate() {
            println!("  {}. {}", i + 1, path.display());
        }
        return Ok(());
    }

    let mut config = GatewayConfig::find_and_load(cli.config.as_deref())?;

    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(url) = cli.backend_url {
        config.backend.base_url = url;
    }
    if let Some(path) = cli.journal {
        config.journal_path = Some(path);
    }

    let journal = match config.journal_path {
        Some(ref path) => SharedJournal::open(path)?,
        None => SharedJournal::in_memory(),
    };

    let client = build_client(config.timeout())?;
    let backend = HttpBackend::from_config(&config, client.clone())?;
    let capabilities = CapabilityCache::from_config(&config, client)?;

    info!("╔═══════════════════════════════════════════════════════╗");
    info!("║           tool-relay v{}                           ║", env!("CARGO_PKG_VERSION"));
    info!("╚═══════════════════════════════════════════════════════╝");
    info!("  Backend:     {}", config.backend.base_url);
    info!("  Timeout:     {}s", config.backend.timeout_secs);
    info!("  Models:      {} configured", config.models.len());
    info!("  Discovery:   {}", if config.capabilities.discover { "on" } else { "off" });
    info!("  Heartbeat:   {}s", config.streaming.heartbeat_secs);
    info!("  Port:        {}", config.port);
    match config.journal_path {
        Some(ref path) => info!("  Journal:     {}", path.display()),
        None => info!("  Journal:     in memory"),
    }

    journal.info(
        "startup",
        format!(
            "Starting tool-relay backend={} port={}",
            config.backend.base_url, config.port
        ),
    );

    let port = config.port;
    let state = Arc::new(AppState {
        config,
        backend: Arc::new(backend),
        capabilities,
        normalizer: Normalizer::default(),
        journal,
    });

    let app = build_router(state);
    let bind_addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    info!("Listening on http://{}", bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
