use clap::Parser;
use dustbox::clock::SystemClock;
use dustbox::registry::Registry;
use dustbox::settings::Settings;
use dustbox::store::JsonFileStore;
use dustbox::{jobs, web};
use miette::{IntoDiagnostic, Result};
use std::sync::Arc;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser, Debug)]
#[command(
    name = "dustbox",
    version,
    about = "Mock vendor cloud for robot-vacuum devices"
)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    // logging
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(env_filter).init();

    let cli = Cli::parse();

    // load settings
    let settings = Settings::load(&cli.config)?;
    tracing::info!(?settings, "Loaded configuration");

    // init storage and the registry
    let db = JsonFileStore::open(&settings.database.path)
        .await
        .into_diagnostic()?;
    let registry = Arc::new(Registry::new(
        Arc::new(SystemClock),
        Arc::new(db),
        settings.auth.token_validity_days,
    ));
    registry.hydrate().await.into_diagnostic()?;

    // background cleanup of expired credentials
    let _sched = jobs::init_scheduler(registry.clone())
        .await
        .into_diagnostic()?;

    // start web server
    web::serve(settings, registry).await?;
    Ok(())
}
