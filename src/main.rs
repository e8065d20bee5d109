use anyhow::{Context, Result};
use bran_gateway::config;
use bran_gateway::http;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
  // Load config
  let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_owned());
  let cfg = config::parse(&config_path)?;

  // Initialize tracing
  tracing_subscriber::registry()
    .with(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "bran_gateway=debug,tower_http=debug".into()),
    )
    .with(
      tracing_subscriber::fmt::layer()
        .with_target(false)
        .compact(),
    )
    .init();

  // Storage must be reachable before we take traffic
  let state = http::build_state(&cfg)?;
  state
    .store()
    .ensure_bucket()
    .await
    .context("failed to prepare bucket")?;

  // Serve
  let router = http::router(state, &cfg);

  let (main_server, metrics_server) = tokio::join!(
    http::serve(router, &cfg.app.listen),
    http::serve_metrics(&cfg.app.metrics_listen),
  );
  main_server?;
  metrics_server?;

  Ok(())
}
