//! Subreddit insights service: binary entrypoint.
//! Boots the Axum HTTP server with the analysis pipeline, the watchlist and
//! the Prometheus exporter.

use shuttle_axum::ShuttleAxum;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use subreddit_insights::api::{self, AppState};
use subreddit_insights::metrics::Metrics;

/// Enable compact tracing logs in development only.
/// Activation requires BOTH:
///   - dev environment (debug build OR SHUTTLE_ENV in {local, development, dev})
///   - INSIGHTS_DEV_LOG=1
fn enable_dev_tracing() {
    let dev_flag = std::env::var("INSIGHTS_DEV_LOG")
        .ok()
        .is_some_and(|v| v == "1");

    let is_dev_env = cfg!(debug_assertions)
        || matches!(
            std::env::var("SHUTTLE_ENV")
                .unwrap_or_default()
                .to_ascii_lowercase()
                .as_str(),
            "local" | "development" | "dev"
        );

    if !(dev_flag && is_dev_env) {
        return;
    }

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("subreddit_insights=debug,info"));

    // The runtime may already have installed a subscriber.
    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .try_init();
}

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();

    enable_dev_tracing();

    let (pipeline, watchlist) = subreddit_insights::bootstrap()?;
    let state = AppState::new(pipeline, watchlist);
    let metrics = Metrics::init()?;

    let router = api::router(state).merge(metrics.router());
    Ok(router.into())
}
