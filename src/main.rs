use docaiche::cli::{self, Args};
use docaiche::config::ConfigurationLoader;
use docaiche::env::LOG_TARGET;
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mode = match args.mode() {
        Ok(mode) => mode,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
    };

    init_logging(args.config_override()).await;
    info!("Starting DocAIche v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = cli::execute(mode).await {
        error!("{:#}", e);
        eprintln!("❌ {:#}", e);
        std::process::exit(1);
    }
    Ok(())
}

/// `RUST_LOG` wins; otherwise the configured `app.log_level` for this crate
async fn init_logging(config: Option<PathBuf>) {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => {
            let level = configured_log_level(config).await;
            EnvFilter::new(format!("{}={}", LOG_TARGET, level))
        }
    };

    tracing_subscriber::fmt().with_env_filter(filter).init();
}

async fn configured_log_level(config: Option<PathBuf>) -> String {
    let loader = match config {
        Some(path) => ConfigurationLoader::new(path),
        None => ConfigurationLoader::from_environment(),
    };

    match loader.load(None).await {
        Ok(config) => config.app.log_level.to_ascii_lowercase(),
        Err(_) => "info".to_string(),
    }
}
