// src/ingest/mod.rs
//! Source feed adapter: windowed, deduplicated subreddit posts with retries.

pub mod providers;
pub mod retry;
pub mod types;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use metrics::{counter, describe_counter};
use once_cell::sync::OnceCell;
use serde::Deserialize;
use tracing::{debug, info};

use crate::config::pipeline::{FeedCfg, PipelineConfig};
use crate::error::FetchError;
use crate::ingest::retry::{with_retry, RetryPolicy};
use crate::ingest::types::{ContentItem, RawPost, RedditApi};

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("feed_fetch_total", "Listing fetches that returned posts.");
        describe_counter!(
            "feed_fetch_errors_total",
            "Content source calls that failed after retries."
        );
        describe_counter!("feed_retries_total", "Retried content source calls.");
        describe_counter!(
            "feed_items_kept_total",
            "Posts kept after windowing and deduplication."
        );
        describe_counter!(
            "feed_items_dropped_total",
            "Posts dropped, labelled by reason."
        );
    });
}

/// Decode HTML entities, unify line endings, trim.
pub fn normalize_text(s: &str) -> String {
    let decoded = html_escape::decode_html_entities(s);
    decoded.replace("\r\n", "\n").trim().to_string()
}

/// Counters for what `window_and_dedup` threw away.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DropStats {
    pub duplicates: usize,
    pub out_of_window: usize,
    pub empty_body: usize,
}

fn canonical_url(raw: &RawPost) -> String {
    match raw.permalink.as_deref() {
        Some(p) if p.starts_with('/') => format!("https://www.reddit.com{p}"),
        Some(p) if !p.is_empty() => p.to_string(),
        _ => raw.url.clone(),
    }
}

fn to_content_item(raw: RawPost, created_at: DateTime<Utc>) -> ContentItem {
    let url = canonical_url(&raw);
    ContentItem {
        title: normalize_text(&raw.title),
        content: normalize_text(&raw.selftext),
        score: raw.score,
        num_comments: raw.num_comments,
        created_at,
        url,
    }
}

/// Deduplicate by post id (first occurrence wins), keep posts created at or
/// after `now - window`, optionally drop posts without body text, then map to
/// `ContentItem`. Input order is preserved.
pub fn window_and_dedup(
    now: DateTime<Utc>,
    raw: Vec<RawPost>,
    window: Duration,
    require_body: bool,
) -> (Vec<ContentItem>, DropStats) {
    let cutoff = now.timestamp() - window.as_secs() as i64;
    let mut stats = DropStats::default();
    let mut seen: HashSet<String> = HashSet::with_capacity(raw.len());
    let mut out = Vec::with_capacity(raw.len());

    for post in raw {
        if !seen.insert(post.id.clone()) {
            stats.duplicates += 1;
            continue;
        }
        let created = post.created_utc.floor() as i64;
        let created_at = match DateTime::<Utc>::from_timestamp(created, 0) {
            Some(t) if created >= cutoff => t,
            _ => {
                stats.out_of_window += 1;
                continue;
            }
        };
        if require_body && post.selftext.trim().is_empty() {
            stats.empty_body += 1;
            continue;
        }
        out.push(to_content_item(post, created_at));
    }

    (out, stats)
}

/// Column the top-posts view sorts by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum PostSortKey {
    Score,
    #[default]
    NumComments,
    CreatedAt,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

/// Stable sort of posts for the top-posts table.
pub fn sort_posts(posts: &mut [ContentItem], key: PostSortKey, order: SortOrder) {
    posts.sort_by(|a, b| {
        let ord = match key {
            PostSortKey::Score => a.score.cmp(&b.score),
            PostSortKey::NumComments => a.num_comments.cmp(&b.num_comments),
            PostSortKey::CreatedAt => a.created_at.cmp(&b.created_at),
        };
        match order {
            SortOrder::Asc => ord,
            SortOrder::Desc => ord.reverse(),
        }
    });
}

/// Fetches recent posts and validates subreddits against a `RedditApi`.
#[derive(Clone)]
pub struct FeedAdapter {
    api: Arc<dyn RedditApi>,
    cfg: FeedCfg,
    retry: RetryPolicy,
}

impl FeedAdapter {
    pub fn new(api: Arc<dyn RedditApi>, cfg: &PipelineConfig) -> Self {
        ensure_metrics_described();
        Self {
            api,
            cfg: cfg.feed.clone(),
            retry: RetryPolicy::from_cfg(&cfg.retry),
        }
    }

    pub fn window(&self) -> Duration {
        self.cfg.window()
    }

    /// Posts from the configured window ending now.
    pub async fn fetch_recent_posts(&self, subreddit: &str) -> Result<Vec<ContentItem>, FetchError> {
        self.fetch_recent_posts_at(subreddit, Utc::now()).await
    }

    /// Query every configured ranking, merge, then window + dedup against `now`.
    /// Any ranking that still fails after retries fails the whole fetch.
    pub async fn fetch_recent_posts_at(
        &self,
        subreddit: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<ContentItem>, FetchError> {
        let mut raw = Vec::new();
        for sort in &self.cfg.sorts {
            let op = format!("listing r/{subreddit} {}", sort.as_str());
            let mut batch = with_retry(&op, &self.retry, || {
                self.api.listing(subreddit, *sort, self.cfg.listing_limit)
            })
            .await?;
            counter!("feed_fetch_total").increment(1);
            debug!(subreddit, sort = sort.as_str(), count = batch.len(), "listing fetched");
            raw.append(&mut batch);
        }

        let raw_count = raw.len();
        let (kept, stats) = window_and_dedup(now, raw, self.cfg.window(), self.cfg.require_body);

        counter!("feed_items_kept_total").increment(kept.len() as u64);
        counter!("feed_items_dropped_total", "reason" => "duplicate")
            .increment(stats.duplicates as u64);
        counter!("feed_items_dropped_total", "reason" => "window")
            .increment(stats.out_of_window as u64);
        counter!("feed_items_dropped_total", "reason" => "empty")
            .increment(stats.empty_body as u64);

        info!(
            subreddit,
            provider = self.api.name(),
            raw = raw_count,
            kept = kept.len(),
            duplicates = stats.duplicates,
            out_of_window = stats.out_of_window,
            empty = stats.empty_body,
            "recent posts fetched"
        );
        Ok(kept)
    }

    /// `Ok(true)` when the subreddit exists and is not adult-only.
    /// Not-found/forbidden resolve to `Ok(false)`; network failure after
    /// retries is an error.
    pub async fn validate_subreddit(&self, name: &str) -> Result<bool, FetchError> {
        let op = format!("about r/{name}");
        match with_retry(&op, &self.retry, || self.api.about(name)).await {
            Ok(about) => {
                debug!(subreddit = name, over18 = about.over18, "subreddit about fetched");
                Ok(!about.over18)
            }
            Err(e) if e.is_permanent_rejection() => {
                debug!(subreddit = name, error = %e, "subreddit rejected");
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }
}
