//! Sable API server entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Load config
//!   3. Resolve effective log level (CLI `-v` flags > env > config)
//!   4. Init logger once
//!   5. Validate secrets and pick the LLM provider
//!   6. Open the store, build provider and search clients
//!   7. Spawn Ctrl-C → shutdown signal watcher
//!   8. Serve until shutdown

use tokio_util::sync::CancellationToken;
use tracing::info;

use sable::api::{self, AppState};
use sable::error::AppError;
use sable::llm::providers;
use sable::search::SearchClient;
use sable::store::Store;
use sable::{config, logger};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Load .env if present; the file is optional.
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();
    let config = config::load(args.config_path.as_deref())?;

    let effective_log_level = args.log_level.unwrap_or(config.log_level.as_str());
    logger::init(effective_log_level, args.log_level.is_some())?;

    info!(
        environment = %config.environment,
        work_dir = %config.work_dir.display(),
        configured_log_level = %config.log_level,
        effective_log_level = %effective_log_level,
        "config loaded"
    );

    let provider_name = config.validate_secrets()?;
    let llm = providers::build(provider_name, &config.llm.groq, config.groq_api_key.clone())
        .map_err(|e| AppError::Config(e.to_string()))?;
    let search = SearchClient::new(&config.search, config.tavily_api_key.clone())
        .map_err(|e| AppError::Config(e.to_string()))?;
    let store = Store::open(&config.database_path)?;

    info!(
        llm = llm.name(),
        model = %config.llm.groq.model,
        search = search.is_configured(),
        database = %config.database_path.display(),
        "services ready"
    );

    let state = AppState::new(&config, store, llm, search);

    let shutdown = CancellationToken::new();
    let ctrlc_token = shutdown.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, shutting down");
            ctrlc_token.cancel();
        }
    });

    api::serve(&config.bind, state, shutdown).await?;

    info!("server stopped");
    Ok(())
}

struct CliArgs {
    log_level: Option<&'static str>,
    config_path: Option<String>,
}

fn parse_cli_args() -> CliArgs {
    let mut verbosity = 0u8;
    let mut config_path = None;

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        if arg == "--" {
            break;
        }

        match arg.as_str() {
            "-h" | "--help" => {
                println!("Usage: sable [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -h, --help                 Print help");
                println!("  -f, --config <PATH>        Path to configuration file (default: config/default.toml)");
                println!("  -v, -vv, -vvv, -vvvv       Increase logging verbosity");
                println!();
                println!("Environment: SABLE_WORK_DIR, SABLE_LOG_LEVEL, SABLE_ENV, PORT, GROQ_API_KEY, TAVILY_API_KEY");
                std::process::exit(0);
            }
            "-f" | "--config" => {
                if let Some(path) = iter.next() {
                    config_path = Some(path);
                } else {
                    eprintln!("error: -f/--config requires a path argument");
                    std::process::exit(1);
                }
            }
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            _ => {}
        }
    }

    CliArgs { log_level: logger::level_for_verbosity(verbosity), config_path }
}
