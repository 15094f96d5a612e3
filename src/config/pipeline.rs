// src/config/pipeline.rs
//! Pipeline tuning loaded from TOML. Every section and field is optional.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::analyze::CategorySet;
use crate::ingest::types::ListingSort;

pub const DEFAULT_PIPELINE_CONFIG_PATH: &str = "config/pipeline.toml";
pub const ENV_PIPELINE_CONFIG_PATH: &str = "PIPELINE_CONFIG_PATH";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub feed: FeedCfg,
    pub retry: RetryCfg,
    pub batch: BatchCfg,
    pub ideas: IdeasCfg,
    pub watchlist: WatchlistCfg,
    /// `[[categories]]` tables; the built-in four when absent.
    pub categories: CategorySet,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FeedCfg {
    pub window_hours: u64,
    pub listing_limit: u32,
    pub sorts: Vec<ListingSort>,
    pub require_body: bool,
    pub user_agent: String,
}

impl Default for FeedCfg {
    fn default() -> Self {
        Self {
            window_hours: 24,
            listing_limit: 100,
            sorts: vec![ListingSort::New, ListingSort::Hot],
            require_body: false,
            user_agent: "subreddit-insights/0.1".to_string(),
        }
    }
}

impl FeedCfg {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_hours * 3600)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryCfg {
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
}

impl Default for RetryCfg {
    fn default() -> Self {
        Self {
            base_delay_ms: 500,
            max_delay_ms: 8_000,
            max_attempts: 4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchCfg {
    pub chunk_size: usize,
    pub max_in_flight: usize,
    pub pacing_ms: u64,
    pub call_timeout_ms: u64,
}

impl Default for BatchCfg {
    fn default() -> Self {
        Self {
            chunk_size: 10,
            max_in_flight: 5,
            pacing_ms: 500,
            call_timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct IdeasCfg {
    pub max_body_chars: usize,
}

impl Default for IdeasCfg {
    fn default() -> Self {
        Self {
            max_body_chars: 1500,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatchlistCfg {
    pub storage_dir: PathBuf,
}

impl Default for WatchlistCfg {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("state"),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let mut cfg: PipelineConfig = toml::from_str(s)?;
        cfg.sanitize();
        Ok(cfg)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading pipeline config from {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("parsing pipeline config {}", path.display()))
    }

    /// Load using env var + fallback:
    /// 1) $PIPELINE_CONFIG_PATH (must exist)
    /// 2) config/pipeline.toml
    /// 3) built-in defaults
    pub fn load_default() -> Result<Self> {
        if let Ok(p) = std::env::var(ENV_PIPELINE_CONFIG_PATH) {
            return Self::load_from_file(Path::new(&p));
        }
        let p = PathBuf::from(DEFAULT_PIPELINE_CONFIG_PATH);
        if p.exists() {
            return Self::load_from_file(&p);
        }
        Ok(Self::default())
    }

    fn sanitize(&mut self) {
        if self.feed.sorts.is_empty() {
            self.feed.sorts = vec![ListingSort::New];
        }
        let mut seen = std::collections::HashSet::new();
        self.feed.sorts.retain(|s| seen.insert(*s));
        self.feed.listing_limit = self.feed.listing_limit.clamp(1, 100);
        self.retry.max_attempts = self.retry.max_attempts.max(1);
        if self.retry.base_delay_ms > self.retry.max_delay_ms {
            std::mem::swap(&mut self.retry.base_delay_ms, &mut self.retry.max_delay_ms);
        }
        self.batch.chunk_size = self.batch.chunk_size.max(1);
        self.batch.max_in_flight = self.batch.max_in_flight.max(1);
        self.categories.sanitize();
    }
}
