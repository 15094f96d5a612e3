// src/lib.rs
// Public library surface for the server, the sweep binary and integration tests.

pub mod analyze;
pub mod api;
pub mod config;
pub mod error;
pub mod ideas;
pub mod ingest;
pub mod metrics;
pub mod pipeline;
pub mod themes;
pub mod watchlist;

pub use analyze::ai_adapter;
pub use crate::api::router;

use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use crate::config::{AiConfig, PipelineConfig};
use crate::ingest::providers::reddit::RedditHttpApi;
use crate::pipeline::Pipeline;
use crate::watchlist::{FileKvStore, Watchlist, WatchlistRepository};

/// Build the pipeline and open the watchlist from config files and env:
/// `config/pipeline.toml`, `config/ai.json`, Reddit credentials, and the
/// file-backed watchlist under `[watchlist].storage_dir`.
pub fn bootstrap() -> anyhow::Result<(Pipeline, Watchlist)> {
    let cfg = PipelineConfig::load_default().context("loading pipeline config")?;
    let ai = AiConfig::load_default();

    let reddit = RedditHttpApi::from_env(&cfg.feed)?;
    let oracle = ai_adapter::build_oracle(&ai);
    info!(oracle = oracle.provider_name(), categories = cfg.categories.len(), "pipeline configured");
    let pipeline = Pipeline::from_config(Arc::new(reddit), oracle, &cfg, &ai);

    let repo = WatchlistRepository::new(Arc::new(FileKvStore::new(&cfg.watchlist.storage_dir)));
    let watchlist = Watchlist::open(repo, Arc::new(pipeline.feed().clone()))
        .context("opening watchlist")?;
    Ok((pipeline, watchlist))
}
