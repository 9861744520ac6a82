use anyhow::Result;
use tracing_subscriber::EnvFilter;

use fifa_rating::config::ServiceConfig;
use fifa_rating::server;

const DEFAULT_LOG_FILTER: &str = "fifa_rating=info,tower_http=info";

#[tokio::main]
async fn main() -> Result<()> {
    let config = ServiceConfig::from_env()?;

    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    server::serve(&config).await
}
