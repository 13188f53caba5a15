use clap::Parser;
use nasqos::server::config::ServerConfig;
use nasqos::server::context::AppContext;
use sea_orm::{ConnectOptions, Database};
use std::sync::Arc;
use tracing::{error, info};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,
}

fn init_logging(log_dir: &str) {
    // JSON to a daily-rotated file, human-readable to stdout
    let file_appender = rolling::daily(log_dir, "server.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sea_orm=warn,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    // Logging is not up yet, so config errors go to stderr.
    let config = match ServerConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load server configuration: {e}");
            return Err(e.into());
        }
    };

    init_logging(&config.log_dir);
    info!("Starting nasqos server, version: {}", env!("CARGO_PKG_VERSION"));

    let mut opt = ConnectOptions::new(config.database_url.to_owned());
    opt.max_connections(config.database_max_connections);
    let db = match Database::connect(opt).await {
        Ok(db) => Arc::new(db),
        Err(e) => {
            error!("Failed to connect to the database: {}", e);
            return Err(e.into());
        }
    };
    info!("Database connection established.");

    let ctx = AppContext::production(&config, db);
    ctx.start(&config);

    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received.");
    ctx.stop().await;

    Ok(())
}
