// src/watchlist.rs
//! Persisted list of watched subreddits.
//!
//! State lives in a key-value record under [`STORAGE_KEY`], loaded once when
//! the watchlist is opened and written through on every mutation.

use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{FetchError, WatchlistError};
use crate::ingest::FeedAdapter;

pub const STORAGE_KEY: &str = "subreddit-storage";

/// Watched on first start, before anything has been stored.
pub const DEFAULT_SUBREDDITS: [&str; 2] = ["ollama", "openai"];

static PREFIX_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?:https?://)?(?:(?:www|old)\.)?(?:reddit\.com)?/*(?:r/)?([^/?#]*)")
        .expect("subreddit prefix regex")
});

static NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z0-9_]{2,21}$").expect("subreddit name regex")
});

/// Strip scheme, reddit host, leading `/` and `r/`, and anything after the
/// name. `"r/foo"` and `"https://reddit.com/r/foo/"` both become `"foo"`.
pub fn normalize_name(input: &str) -> String {
    let s = input.trim();
    PREFIX_RE
        .captures(s)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default()
}

/// Subreddit names are 2-21 letters, digits or underscores.
pub fn is_plausible_name(name: &str) -> bool {
    NAME_RE.is_match(name)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchedSubreddit {
    pub name: String,
    pub url: String,
    pub added_at: DateTime<Utc>,
}

impl WatchedSubreddit {
    pub fn new(name: &str, added_at: DateTime<Utc>) -> Self {
        Self {
            name: name.to_string(),
            url: format!("https://reddit.com/r/{name}"),
            added_at,
        }
    }
}

// ------------------------------------------------------------
// Storage
// ------------------------------------------------------------

/// Named string records.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, WatchlistError>;
    fn set(&self, key: &str, value: &str) -> Result<(), WatchlistError>;
}

/// One `<key>.json` file per record under `dir`, replaced atomically.
pub struct FileKvStore {
    dir: PathBuf,
}

impl FileKvStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

impl KeyValueStore for FileKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, WatchlistError> {
        match fs::read_to_string(self.path(key)) {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&self, key: &str, value: &str) -> Result<(), WatchlistError> {
        fs::create_dir_all(&self.dir)?;
        let path = self.path(key);
        let tmp = path.with_extension("json.tmp");
        let mut f = fs::File::create(&tmp)?;
        f.write_all(value.as_bytes())?;
        f.sync_all()?;
        fs::rename(tmp, path)?;
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryKvStore {
    records: Mutex<HashMap<String, String>>,
}

impl KeyValueStore for MemoryKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, WatchlistError> {
        let g = self.records.lock().unwrap_or_else(|p| p.into_inner());
        Ok(g.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), WatchlistError> {
        let mut g = self.records.lock().unwrap_or_else(|p| p.into_inner());
        g.insert(key.to_string(), value.to_string());
        Ok(())
    }
}

#[derive(Serialize, Deserialize)]
struct StoredWatchlist {
    subreddits: Vec<WatchedSubreddit>,
}

/// Serializes the watchlist into the key-value record.
#[derive(Clone)]
pub struct WatchlistRepository {
    store: Arc<dyn KeyValueStore>,
}

impl WatchlistRepository {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// `None` when nothing has been stored yet.
    pub fn load(&self) -> Result<Option<Vec<WatchedSubreddit>>, WatchlistError> {
        match self.store.get(STORAGE_KEY)? {
            Some(raw) => {
                let stored: StoredWatchlist = serde_json::from_str(&raw)?;
                Ok(Some(stored.subreddits))
            }
            None => Ok(None),
        }
    }

    pub fn save(&self, subreddits: &[WatchedSubreddit]) -> Result<(), WatchlistError> {
        let raw = serde_json::to_string_pretty(&StoredWatchlist {
            subreddits: subreddits.to_vec(),
        })?;
        self.store.set(STORAGE_KEY, &raw)
    }
}

// ------------------------------------------------------------
// Watchlist
// ------------------------------------------------------------

/// Existence check used before a subreddit is added.
#[async_trait]
pub trait SubredditValidator: Send + Sync {
    async fn validate(&self, name: &str) -> Result<bool, FetchError>;
}

#[async_trait]
impl SubredditValidator for FeedAdapter {
    async fn validate(&self, name: &str) -> Result<bool, FetchError> {
        self.validate_subreddit(name).await
    }
}

pub struct Watchlist {
    repo: WatchlistRepository,
    validator: Arc<dyn SubredditValidator>,
    items: Vec<WatchedSubreddit>,
}

impl Watchlist {
    /// Load stored state, seeding [`DEFAULT_SUBREDDITS`] when there is none.
    pub fn open(
        repo: WatchlistRepository,
        validator: Arc<dyn SubredditValidator>,
    ) -> Result<Self, WatchlistError> {
        let items = match repo.load()? {
            Some(items) => {
                info!(count = items.len(), "watchlist loaded");
                items
            }
            None => {
                let now = Utc::now();
                let seeded: Vec<_> = DEFAULT_SUBREDDITS
                    .iter()
                    .map(|n| WatchedSubreddit::new(n, now))
                    .collect();
                repo.save(&seeded)?;
                info!(count = seeded.len(), "watchlist seeded with defaults");
                seeded
            }
        };
        Ok(Self {
            repo,
            validator,
            items,
        })
    }

    pub fn list(&self) -> &[WatchedSubreddit] {
        &self.items
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.items
            .iter()
            .position(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// Normalize, validate, append. `Ok(false)` when the name is malformed,
    /// already watched, or rejected by validation; the list is then untouched.
    pub async fn add(&mut self, input: &str) -> Result<bool, WatchlistError> {
        let name = normalize_name(input);
        if !is_plausible_name(&name) {
            debug!(input, "watchlist add rejected: malformed name");
            return Ok(false);
        }
        if self.position(&name).is_some() {
            debug!(subreddit = %name, "watchlist add rejected: already watched");
            return Ok(false);
        }
        if !self.validator.validate(&name).await? {
            warn!(subreddit = %name, "subreddit validation failed");
            return Ok(false);
        }

        let mut next = self.items.clone();
        next.push(WatchedSubreddit::new(&name, Utc::now()));
        self.repo.save(&next)?;
        self.items = next;
        info!(subreddit = %name, "subreddit added to watchlist");
        Ok(true)
    }

    /// `Ok(true)` when something was removed.
    pub fn remove(&mut self, input: &str) -> Result<bool, WatchlistError> {
        let name = normalize_name(input);
        let Some(idx) = self.position(&name) else {
            return Ok(false);
        };
        let mut next = self.items.clone();
        next.remove(idx);
        self.repo.save(&next)?;
        self.items = next;
        info!(subreddit = %name, "subreddit removed from watchlist");
        Ok(true)
    }
}
