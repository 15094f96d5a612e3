// src/ingest/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FetchError;

/// Listing ranking strategy on the content source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ListingSort {
    New,
    Hot,
}

impl ListingSort {
    pub fn as_str(&self) -> &'static str {
        match self {
            ListingSort::New => "new",
            ListingSort::Hot => "hot",
        }
    }
}

/// A post as the content source returns it, before windowing and dedup.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RawPost {
    /// Stable per-post id (e.g. "1abcde").
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub num_comments: u64,
    /// Creation time, epoch seconds.
    pub created_utc: f64,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub permalink: Option<String>,
    #[serde(default)]
    pub over_18: bool,
}

/// Subreddit metadata used for validation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct SubredditAbout {
    pub display_name: String,
    #[serde(default)]
    pub over18: bool,
}

/// Normalized post surfaced to the rest of the pipeline. Identity is `url`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentItem {
    pub title: String,
    pub content: String,
    pub score: i64,
    pub num_comments: u64,
    pub created_at: DateTime<Utc>,
    pub url: String,
}

/// Content source collaborator (Reddit or a fixture).
#[async_trait::async_trait]
pub trait RedditApi: Send + Sync {
    /// One page of a subreddit listing under the given ranking.
    async fn listing(
        &self,
        subreddit: &str,
        sort: ListingSort,
        limit: u32,
    ) -> Result<Vec<RawPost>, FetchError>;

    /// Subreddit about record. Unknown subreddits are `FetchError::NotFound`.
    async fn about(&self, subreddit: &str) -> Result<SubredditAbout, FetchError>;

    fn name(&self) -> &'static str;
}
