//! In-memory content source serving canned listings and about records.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;

use crate::error::FetchError;
use crate::ingest::providers::reddit::{parse_about, posts_from_listing, ListingData, Thing};
use crate::ingest::types::{ListingSort, RawPost, RedditApi, SubredditAbout};

#[derive(Debug, Default, Clone)]
pub struct FixtureRedditApi {
    listings: HashMap<(String, ListingSort), Vec<RawPost>>,
    abouts: HashMap<String, SubredditAbout>,
}

fn key(subreddit: &str) -> String {
    subreddit.trim().to_ascii_lowercase()
}

impl FixtureRedditApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_posts(mut self, subreddit: &str, sort: ListingSort, posts: Vec<RawPost>) -> Self {
        self.listings.insert((key(subreddit), sort), posts);
        self
    }

    /// Register a listing from Reddit's JSON listing format.
    pub fn with_listing_json(self, subreddit: &str, sort: ListingSort, json: &str) -> Result<Self> {
        let listing: Thing<ListingData> =
            serde_json::from_str(json).context("parsing fixture listing json")?;
        Ok(self.with_posts(subreddit, sort, posts_from_listing(listing)))
    }

    pub fn with_about(mut self, subreddit: &str, over18: bool) -> Self {
        self.abouts.insert(
            key(subreddit),
            SubredditAbout {
                display_name: subreddit.to_string(),
                over18,
            },
        );
        self
    }

    /// Register an about record from Reddit's JSON format.
    pub fn with_about_json(mut self, subreddit: &str, json: &str) -> Result<Self> {
        let value: serde_json::Value =
            serde_json::from_str(json).context("parsing fixture about json")?;
        let about = parse_about(subreddit, value).context("fixture about is not a subreddit")?;
        self.abouts.insert(key(subreddit), about);
        Ok(self)
    }
}

#[async_trait]
impl RedditApi for FixtureRedditApi {
    async fn listing(
        &self,
        subreddit: &str,
        sort: ListingSort,
        limit: u32,
    ) -> Result<Vec<RawPost>, FetchError> {
        let k = key(subreddit);
        match self.listings.get(&(k.clone(), sort)) {
            Some(posts) => Ok(posts.iter().take(limit as usize).cloned().collect()),
            // A known subreddit without this ranking registered is just empty.
            None if self.abouts.contains_key(&k)
                || self.listings.keys().any(|(s, _)| *s == k) =>
            {
                Ok(Vec::new())
            }
            None => Err(FetchError::NotFound(format!("r/{subreddit}"))),
        }
    }

    async fn about(&self, subreddit: &str) -> Result<SubredditAbout, FetchError> {
        self.abouts
            .get(&key(subreddit))
            .cloned()
            .ok_or_else(|| FetchError::NotFound(format!("r/{subreddit}")))
    }

    fn name(&self) -> &'static str {
        "fixture"
    }
}
