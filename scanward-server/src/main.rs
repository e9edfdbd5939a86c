use std::{
    env,
    net::SocketAddr,
    path::{Path, PathBuf},
    sync::Arc,
};

use anyhow::Context;
use clap::{Args as ClapArgs, Parser, Subcommand};
use scanward_config::{AppConfig, CONFIG_PATH_VAR, ConfigLoad, load_env_file};
use scanward_core::{MIGRATOR, ScanBackends, ScanEngine, checks::CheckRegistry};
use scanward_server::{AppState, router};
use sqlx::{PgPool, postgres::PgPoolOptions};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "scanward-server")]
#[command(about = "Security scan orchestration server")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    serve: ServeArgs,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Apply database migrations and exit
    Migrate,
}

#[derive(ClapArgs, Debug, Clone)]
struct ServeArgs {
    /// Server port (overrides config)
    #[arg(short, long, env = "SERVER_PORT")]
    port: Option<u16>,

    /// Server host (overrides config)
    #[arg(long, env = "SERVER_HOST")]
    host: Option<String>,

    /// Configuration file, TOML or JSON
    #[arg(short, long, env = "SCANWARD_CONFIG_PATH")]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env_file = load_env_file()?;
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,scan::worker=warn,tower_http=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    if let Some(path) = env_file {
        info!(path = %path.display(), "loaded .env file");
    }

    let config = load_config(&cli.serve)?;

    match cli.command {
        Some(Command::Migrate) => run_migrations(&config).await,
        None => serve(config).await,
    }
}

fn load_config(args: &ServeArgs) -> anyhow::Result<AppConfig> {
    let config_path = args.config.as_ref().map(|path| path.display().to_string());
    let ConfigLoad { mut config, source } = AppConfig::load_with(Path::new("."), |key| {
        if key == CONFIG_PATH_VAR && config_path.is_some() {
            return config_path.clone();
        }
        env::var(key).ok()
    })
    .context("failed to load configuration")?;

    if let Some(port) = args.port {
        config.server.port = port;
    }
    if let Some(host) = args.host.clone() {
        config.server.host = host;
    }

    info!(source = ?source, "configuration ready");
    Ok(config)
}

async fn connect(config: &AppConfig, url: &str) -> anyhow::Result<PgPool> {
    PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(url)
        .await
        .context("failed to connect to PostgreSQL")
}

async fn run_migrations(config: &AppConfig) -> anyhow::Result<()> {
    let url = config
        .database
        .url
        .as_deref()
        .context("DATABASE_URL is required to run migrations")?;
    let pool = connect(config, url).await?;
    MIGRATOR.run(&pool).await.context("failed to apply migrations")?;
    info!("migrations applied");
    Ok(())
}

async fn backends(config: &AppConfig) -> anyhow::Result<ScanBackends> {
    match config.database.url.as_deref() {
        Some(url) => {
            let pool = connect(config, url).await?;
            MIGRATOR.run(&pool).await.context("failed to apply migrations")?;
            let backends = ScanBackends::postgres(pool)
                .await
                .context("failed to initialise Postgres backends")?;
            info!("using Postgres backends");
            Ok(backends)
        }
        None => {
            warn!("DATABASE_URL not set; scans are kept in memory and lost on restart");
            Ok(ScanBackends::in_memory())
        }
    }
}

async fn serve(config: AppConfig) -> anyhow::Result<()> {
    let registry =
        CheckRegistry::with_builtins(&config.checks).context("invalid check configuration")?;
    info!(checks = registry.len(), "check registry built");

    let backends = backends(&config).await?;
    let engine = Arc::new(ScanEngine::new(config.orchestrator.clone(), registry, backends));
    engine.start().await.context("failed to start scan runtime")?;

    let app = router(AppState::new(Arc::clone(&engine)));
    let bind = config.server.bind_address();
    let listener = tokio::net::TcpListener::bind(&bind)
        .await
        .with_context(|| format!("failed to bind {bind}"))?;
    let addr: SocketAddr = listener.local_addr()?;
    info!(%addr, "scanward listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    info!("draining scan workers");
    engine.shutdown().await.context("scan runtime shutdown failed")?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("failed to listen for shutdown signal: {err}");
        std::future::pending::<()>().await;
    }
    info!("shutdown signal received");
}
