//! Fetch → classify → aggregate, plus idea synthesis over a classified set.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::analyze::ai_adapter::DynOracle;
use crate::analyze::{BatchScheduler, CategorySet, ClassifiedItem, LlmClassifier};
use crate::config::{AiConfig, PipelineConfig};
use crate::error::{FetchError, SynthesisError};
use crate::ideas::{Idea, IdeaSynthesizer};
use crate::ingest::types::{ContentItem, RedditApi};
use crate::ingest::FeedAdapter;
use crate::themes::{aggregate_themes, Theme};

/// Result of one analysis run over a subreddit.
#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub posts: Vec<ClassifiedItem>,
    pub themes: Vec<Theme>,
}

#[derive(Clone)]
pub struct Pipeline {
    feed: FeedAdapter,
    scheduler: BatchScheduler,
    synthesizer: Arc<IdeaSynthesizer>,
}

impl Pipeline {
    pub fn new(feed: FeedAdapter, scheduler: BatchScheduler, synthesizer: IdeaSynthesizer) -> Self {
        Self {
            feed,
            scheduler,
            synthesizer: Arc::new(synthesizer),
        }
    }

    /// Wire the oracle-backed classifier and synthesizer.
    pub fn from_config(
        api: Arc<dyn RedditApi>,
        oracle: DynOracle,
        cfg: &PipelineConfig,
        ai: &AiConfig,
    ) -> Self {
        let feed = FeedAdapter::new(api, cfg);
        let classifier = LlmClassifier::new(
            oracle.clone(),
            cfg.categories.clone(),
            ai.classify_temperature,
        );
        let scheduler = BatchScheduler::new(Arc::new(classifier), &cfg.batch, cfg.categories.clone());
        let synthesizer = IdeaSynthesizer::new(oracle, ai.synthesis_temperature, &cfg.ideas)
            .with_categories(cfg.categories.clone());
        Self::new(feed, scheduler, synthesizer)
    }

    pub fn feed(&self) -> &FeedAdapter {
        &self.feed
    }

    pub fn categories(&self) -> &CategorySet {
        self.scheduler.categories()
    }

    /// Classify already-fetched posts and bucket them into themes.
    pub async fn analyze_posts(&self, posts: Vec<ContentItem>) -> Analysis {
        let posts = self.scheduler.classify_all(posts).await;
        let themes = aggregate_themes(&posts, self.scheduler.categories());
        Analysis { posts, themes }
    }

    /// Fetch the recent window of `subreddit` and analyze it. Only the fetch
    /// can fail; classification failures are absorbed per post.
    pub async fn analyze(&self, subreddit: &str) -> Result<Analysis, FetchError> {
        let posts = self.feed.fetch_recent_posts(subreddit).await?;
        let analysis = self.analyze_posts(posts).await;
        info!(
            subreddit,
            posts = analysis.posts.len(),
            themed = analysis.themes.iter().map(|t| t.count).sum::<usize>(),
            "subreddit analyzed"
        );
        Ok(analysis)
    }

    pub async fn ideas(&self, posts: &[ClassifiedItem]) -> Result<Vec<Idea>, SynthesisError> {
        self.synthesizer.generate(posts).await
    }
}
