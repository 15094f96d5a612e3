//! Reddit JSON API client. Anonymous public endpoints by default; app-only
//! OAuth (client credentials) when `REDDIT_CLIENT_ID`/`REDDIT_CLIENT_SECRET`
//! are set.

use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tokio::sync::RwLock;
use tracing::{debug, warn};
use url::Url;

use crate::config::pipeline::FeedCfg;
use crate::error::FetchError;
use crate::ingest::types::{ListingSort, RawPost, RedditApi, SubredditAbout};

const PUBLIC_BASE: &str = "https://www.reddit.com";
const OAUTH_BASE: &str = "https://oauth.reddit.com";
const TOKEN_URL: &str = "https://www.reddit.com/api/v1/access_token";

/// `{ "kind": "...", "data": {...} }` envelope used by every Reddit object.
#[derive(Debug, Deserialize)]
pub(crate) struct Thing<T> {
    pub kind: String,
    pub data: T,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ListingData {
    #[serde(default)]
    pub children: Vec<Thing<serde_json::Value>>,
}

/// Keep only link posts (`t3`) from a listing; unparseable children are skipped.
pub(crate) fn posts_from_listing(listing: Thing<ListingData>) -> Vec<RawPost> {
    listing
        .data
        .children
        .into_iter()
        .filter(|c| c.kind == "t3")
        .filter_map(|c| match serde_json::from_value::<RawPost>(c.data) {
            Ok(p) => Some(p),
            Err(e) => {
                debug!(error = %e, "skipping malformed listing child");
                None
            }
        })
        .collect()
}

/// An about record is only a subreddit when its kind is `t5`; Reddit answers
/// unknown names with a search listing instead of a 404.
pub(crate) fn parse_about(subreddit: &str, body: serde_json::Value) -> Result<SubredditAbout, FetchError> {
    let kind = body.get("kind").and_then(|k| k.as_str()).unwrap_or_default();
    if kind != "t5" {
        return Err(FetchError::NotFound(format!("r/{subreddit}")));
    }
    let thing: Thing<SubredditAbout> =
        serde_json::from_value(body).map_err(|e| FetchError::Malformed(e.to_string()))?;
    Ok(thing.data)
}

/// Map a non-success HTTP status to the fetch taxonomy.
pub fn map_status(status: StatusCode, what: &str) -> FetchError {
    match status {
        StatusCode::NOT_FOUND => FetchError::NotFound(what.to_string()),
        StatusCode::FORBIDDEN => FetchError::Forbidden(what.to_string()),
        StatusCode::TOO_MANY_REQUESTS => FetchError::RateLimited,
        StatusCode::UNAUTHORIZED | StatusCode::REQUEST_TIMEOUT => {
            FetchError::Transient(format!("HTTP {status} for {what}"))
        }
        s if s.is_server_error() => FetchError::Transient(format!("HTTP {s} for {what}")),
        s => FetchError::Malformed(format!("unexpected HTTP {s} for {what}")),
    }
}

#[derive(Debug, Clone)]
pub struct Credentials {
    pub client_id: String,
    pub client_secret: String,
}

impl Credentials {
    pub fn from_env() -> Option<Self> {
        let client_id = std::env::var("REDDIT_CLIENT_ID").ok()?;
        let client_secret = std::env::var("REDDIT_CLIENT_SECRET").ok()?;
        if client_id.trim().is_empty() || client_secret.trim().is_empty() {
            return None;
        }
        Some(Self {
            client_id,
            client_secret,
        })
    }
}

struct AccessToken {
    value: String,
    expires_at: Instant,
}

#[derive(Deserialize)]
struct TokenResp {
    access_token: String,
    #[serde(default = "default_expires_in")]
    expires_in: u64,
}

fn default_expires_in() -> u64 {
    3600
}

pub struct RedditHttpApi {
    client: Client,
    credentials: Option<Credentials>,
    token: RwLock<Option<AccessToken>>,
}

impl RedditHttpApi {
    pub fn new(user_agent: &str, credentials: Option<Credentials>) -> anyhow::Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(15))
            .build()
            .context("building reddit http client")?;
        Ok(Self {
            client,
            credentials,
            token: RwLock::new(None),
        })
    }

    /// User agent from `REDDIT_USER_AGENT` (falls back to config), credentials from env.
    pub fn from_env(cfg: &FeedCfg) -> anyhow::Result<Self> {
        let ua = std::env::var("REDDIT_USER_AGENT")
            .ok()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| cfg.user_agent.clone());
        Self::new(&ua, Credentials::from_env())
    }

    /// Cached bearer token, refreshed a minute before expiry. `None` when anonymous.
    async fn bearer(&self) -> Result<Option<String>, FetchError> {
        let Some(creds) = &self.credentials else {
            return Ok(None);
        };
        {
            let guard = self.token.read().await;
            if let Some(t) = guard.as_ref() {
                if t.expires_at > Instant::now() {
                    return Ok(Some(t.value.clone()));
                }
            }
        }

        let resp = self
            .client
            .post(TOKEN_URL)
            .basic_auth(&creds.client_id, Some(&creds.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(FetchError::from_reqwest)?;
        if !resp.status().is_success() {
            return Err(map_status(resp.status(), "access token"));
        }
        let body: TokenResp = resp.json().await.map_err(FetchError::from_reqwest)?;
        let ttl = Duration::from_secs(body.expires_in.saturating_sub(60).max(1));
        let value = body.access_token;
        *self.token.write().await = Some(AccessToken {
            value: value.clone(),
            expires_at: Instant::now() + ttl,
        });
        debug!("reddit access token refreshed");
        Ok(Some(value))
    }

    fn build_url(&self, authed: bool, segments: &[&str], query: &[(&str, String)]) -> Result<Url, FetchError> {
        let base = if authed { OAUTH_BASE } else { PUBLIC_BASE };
        let mut url = Url::parse(base).map_err(|e| FetchError::Malformed(e.to_string()))?;
        {
            let mut path = url
                .path_segments_mut()
                .map_err(|_| FetchError::Malformed("base url cannot be a base".into()))?;
            let last = segments.len().saturating_sub(1);
            for (i, seg) in segments.iter().enumerate() {
                if i == last && !authed {
                    path.push(&format!("{seg}.json"));
                } else {
                    path.push(seg);
                }
            }
        }
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("raw_json", "1");
            for (k, v) in query {
                q.append_pair(k, v);
            }
        }
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        segments: &[&str],
        query: &[(&str, String)],
        what: &str,
    ) -> Result<T, FetchError> {
        let bearer = self.bearer().await?;
        let url = self.build_url(bearer.is_some(), segments, query)?;
        let mut req = self.client.get(url);
        if let Some(token) = &bearer {
            req = req.bearer_auth(token);
        }
        let resp = req.send().await.map_err(FetchError::from_reqwest)?;
        let status = resp.status();
        if !status.is_success() {
            if status == StatusCode::UNAUTHORIZED {
                warn!("reddit token rejected, dropping cached token");
                *self.token.write().await = None;
            }
            return Err(map_status(status, what));
        }
        resp.json::<T>().await.map_err(FetchError::from_reqwest)
    }
}

#[async_trait]
impl RedditApi for RedditHttpApi {
    async fn listing(
        &self,
        subreddit: &str,
        sort: ListingSort,
        limit: u32,
    ) -> Result<Vec<RawPost>, FetchError> {
        let what = format!("r/{subreddit}/{}", sort.as_str());
        let listing: Thing<ListingData> = self
            .get_json(
                &["r", subreddit, sort.as_str()],
                &[("limit", limit.to_string())],
                &what,
            )
            .await?;
        Ok(posts_from_listing(listing))
    }

    async fn about(&self, subreddit: &str) -> Result<SubredditAbout, FetchError> {
        let what = format!("r/{subreddit}");
        let body: serde_json::Value = self.get_json(&["r", subreddit, "about"], &[], &what).await?;
        parse_about(subreddit, body)
    }

    fn name(&self) -> &'static str {
        "reddit"
    }
}
