use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use parley_gateway::api::ApiServerBuilder;
use parley_gateway::context::Turn;
use parley_gateway::models::{self, ModelCatalog, SystemClock};
use parley_gateway::providers::{OpenAiProvider, tokens};
use parley_gateway::{Config, db};

/// Parley - chat conversation gateway with history compaction
#[derive(Parser)]
#[command(name = "parley", version, about)]
struct Cli {
    /// Config file (defaults to ~/.config/omni/parley/config.toml)
    #[arg(short, long, env = "PARLEY_CONFIG")]
    config: Option<PathBuf>,

    /// Port to listen on (overrides config)
    #[arg(long)]
    port: Option<u16>,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP API server (default)
    Serve,
    /// Print the model catalog
    Models {
        /// Fetch the list from the provider even if the cache is fresh
        #[arg(long)]
        refresh: bool,
    },
    /// Count prompt tokens for a single user message
    CountTokens {
        /// Model whose tokenizer to use
        #[arg(short, long, default_value = "gpt-3.5-turbo")]
        model: String,
        /// Message text
        #[arg(required = true)]
        text: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let rust_log = std::env::var(EnvFilter::DEFAULT_ENV).ok();
    tracing_subscriber::fmt()
        .with_env_filter(log_filter(cli.verbose, rust_log.as_deref()))
        .init();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("fatal: {e:#}");
            ExitCode::FAILURE
        }
    }
}

/// Logging filter from `RUST_LOG`, falling back to the verbosity flag
fn log_filter(verbose: u8, rust_log: Option<&str>) -> EnvFilter {
    if let Some(directives) = rust_log.filter(|d| !d.trim().is_empty()) {
        match EnvFilter::try_new(directives) {
            Ok(filter) => return filter,
            Err(e) => eprintln!("ignoring invalid RUST_LOG: {e}"),
        }
    }

    let directives = match verbose {
        0 => "info,parley_gateway=info",
        1 => "info,parley_gateway=debug",
        2 => "debug",
        _ => "trace",
    };
    EnvFilter::new(directives)
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    if let Some(Command::CountTokens { model, text }) = &cli.command {
        return count_tokens(model, &text.join(" "));
    }

    let mut config = Config::load(cli.config.as_deref()).context("failed to load config")?;
    if let Some(port) = cli.port {
        config.api_server.port = port;
    }

    match cli.command {
        Some(Command::Models { refresh }) => list_models(&config, refresh).await,
        Some(Command::Serve) | None => serve(config).await,
        Some(Command::CountTokens { .. }) => Ok(()),
    }
}

fn provider(config: &Config) -> anyhow::Result<Arc<OpenAiProvider>> {
    let api_key = config
        .openai
        .api_key
        .clone()
        .context("OPENAI_API_KEY is not set")?;

    let provider = OpenAiProvider::new(
        api_key,
        config.openai.base_url.clone(),
        config.openai.timeout,
    )?;
    Ok(Arc::new(provider))
}

fn catalog(config: &Config, provider: Arc<OpenAiProvider>) -> Arc<ModelCatalog> {
    Arc::new(ModelCatalog::new(
        provider,
        Arc::new(SystemClock),
        config.models.cache_path.clone(),
        config.models.refresh_after,
    ))
}

async fn serve(config: Config) -> anyhow::Result<()> {
    tracing::info!(
        port = config.api_server.port,
        database = %config.database_path.display(),
        threshold = config.compaction.threshold_tokens,
        default_model = %config.models.default_model,
        "starting parley gateway"
    );

    let provider = provider(&config)?;

    // Build the default model's encoding before the first request needs it
    tokens::encoding_for_model(&config.models.default_model)
        .context("default model has no tokenizer")?;

    let pool = db::init(&config.database_path).context("failed to open database")?;

    let catalog = catalog(&config, provider.clone());
    catalog.initialize().await;
    let refresher = models::spawn_refresher(catalog.clone(), config.models.check_interval);

    let server = ApiServerBuilder::new(pool, provider, catalog, config.api_server.port)
        .default_model(config.models.default_model)
        .allowed_models(config.models.allowed)
        .compaction(config.compaction)
        .reply(config.reply)
        .static_dir(config.api_server.static_dir)
        .build();

    let handle = server.spawn();

    tokio::select! {
        result = handle => {
            refresher.abort();
            result.context("API server task panicked")??;
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutting down");
            refresher.abort();
        }
    }

    Ok(())
}

async fn list_models(config: &Config, refresh: bool) -> anyhow::Result<()> {
    let snapshot = match provider(config) {
        Ok(provider) => {
            let catalog = catalog(config, provider);
            if refresh {
                catalog.refresh().await?
            } else {
                catalog.initialize().await;
                catalog.snapshot()
            }
        }
        Err(e) if !refresh => {
            tracing::warn!("{e}; showing cached models only");
            Arc::new(models::read_snapshot(&config.models.cache_path).unwrap_or_default())
        }
        Err(e) => return Err(e),
    };

    match snapshot.last_update {
        Some(at) => println!("# {} models, fetched {}", snapshot.models.len(), at.to_rfc3339()),
        None => println!("# {} models", snapshot.models.len()),
    }
    for model in &snapshot.models {
        let marker = if config.models.is_allowed(&model.id) { "*" } else { " " };
        println!("{marker} {}", model.id);
    }

    Ok(())
}

fn count_tokens(model: &str, text: &str) -> anyhow::Result<()> {
    let count = tokens::count_tokens(&[Turn::user(text)], model)?;
    println!("{count}");
    Ok(())
}
