use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use songbridge::{build_state, config::Cli, create_router, AppConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("songbridge=info,tower_http=info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let config = AppConfig::load(cli).context("loading configuration")?;

    info!(
        providers = ?config.enabled_providers(),
        node = config.node_number,
        cache = config.bluesky.is_some(),
        "starting songbridge"
    );
    if config.discord_token.is_some() {
        info!("chat gateway token present; the gateway process consumes this API upstream");
    }

    let bind_address = config.bind_address.clone();
    let state = build_state(&config).await.context("building lookup pipeline")?;
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("binding {bind_address}"))?;
    info!(address = %bind_address, "listening");
    axum::serve(listener, router).await.context("serving")?;
    Ok(())
}
