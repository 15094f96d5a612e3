//! Language-model oracle: provider abstraction + file cache + daily limit.
//!
//! Both the per-post classifier and the idea synthesizer talk to the model
//! through [`Oracle`], which takes a system/user prompt pair and returns the raw
//! JSON text of the completion. Callers validate the shape.

use std::fs;
use std::future::Future;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{debug, info};

use crate::config::ai::AiConfig;
use crate::error::OracleError;

// ------------------------------------------------------------
// Public surface
// ------------------------------------------------------------

/// One chat completion request in JSON mode.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct CompletionRequest {
    pub system: String,
    pub user: String,
    pub temperature: f32,
}

pub type OracleFuture<'a> = Pin<Box<dyn Future<Output = Result<String, OracleError>> + Send + 'a>>;

/// Trait object used by the classifier, the synthesizer and tests.
pub trait Oracle: Send + Sync {
    /// Return the raw completion text (expected to be a JSON object).
    fn complete<'a>(&'a self, req: &'a CompletionRequest) -> OracleFuture<'a>;
    /// Provider name for diagnostics.
    fn provider_name(&self) -> &'static str;
}

pub type DynOracle = Arc<dyn Oracle>;

/// Factory: build an oracle according to config and environment variables.
///
/// * If `AI_TEST_MODE=mock`, returns a deterministic mock.
/// * Else if `config.enabled == false`, returns a disabled oracle.
/// * Else builds the real provider (OpenAI) wrapped with caching + daily limit.
pub fn build_oracle(config: &AiConfig) -> DynOracle {
    if std::env::var("AI_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false)
    {
        return Arc::new(ProviderOracle(MockProvider::neutral()));
    }

    if !config.enabled {
        return Arc::new(DisabledOracle);
    }

    match config.provider.as_str() {
        "openai" => match OpenAiProvider::new(&config.api_key, &config.model) {
            Ok(provider) => {
                info!(
                    provider = "openai",
                    model = %config.model,
                    key_len = config.api_key.len(),
                    daily_limit = config.daily_limit,
                    "oracle ready"
                );
                Arc::new(CachingOracle::new(
                    provider,
                    PathBuf::from(&config.cache_dir),
                    config.daily_limit,
                ))
            }
            Err(e) => {
                tracing::warn!(error = %e, "openai client unavailable, oracle disabled");
                Arc::new(DisabledOracle)
            }
        },
        other => {
            tracing::warn!(provider = other, "unsupported oracle provider, oracle disabled");
            Arc::new(DisabledOracle)
        }
    }
}

// ------------------------------------------------------------
// Provider abstraction + concrete providers
// ------------------------------------------------------------

/// Low-level provider: does a *real* remote call. Separated so we can reuse the same
/// caching wrapper for production and tests.
pub trait Provider: Send + Sync + 'static {
    fn fetch<'a>(&'a self, req: &'a CompletionRequest) -> OracleFuture<'a>;
    fn name(&self) -> &'static str;
    /// Model identifier; part of the cache key.
    fn model(&self) -> &str {
        ""
    }
}

/// Exposes a bare provider as an oracle (no cache, no limit).
pub struct ProviderOracle<P: Provider>(pub P);

impl<P: Provider> Oracle for ProviderOracle<P> {
    fn complete<'a>(&'a self, req: &'a CompletionRequest) -> OracleFuture<'a> {
        self.0.fetch(req)
    }
    fn provider_name(&self) -> &'static str {
        self.0.name()
    }
}

/// OpenAI provider (Chat Completions API, JSON response format).
pub struct OpenAiProvider {
    http: reqwest::Client,
    api_key: String,
    model: String,
}

impl OpenAiProvider {
    pub fn new(api_key: &str, model: &str) -> Result<Self, OracleError> {
        let http = reqwest::Client::builder()
            .user_agent("subreddit-insights/0.1")
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(90))
            .build()
            .map_err(|e| OracleError::Transport(e.to_string()))?;
        Ok(Self {
            http,
            api_key: api_key.to_string(),
            model: model.to_string(),
        })
    }
}

impl Provider for OpenAiProvider {
    fn fetch<'a>(&'a self, req: &'a CompletionRequest) -> OracleFuture<'a> {
        Box::pin(async move {
            if self.api_key.is_empty() {
                return Err(OracleError::MissingApiKey);
            }

            #[derive(Serialize)]
            struct Msg<'a> {
                role: &'a str,
                content: &'a str,
            }
            #[derive(Serialize)]
            struct ResponseFormat {
                #[serde(rename = "type")]
                kind: &'static str,
            }
            #[derive(Serialize)]
            struct Req<'a> {
                model: &'a str,
                messages: Vec<Msg<'a>>,
                temperature: f32,
                response_format: ResponseFormat,
            }
            #[derive(Deserialize)]
            struct Resp {
                choices: Vec<Choice>,
            }
            #[derive(Deserialize)]
            struct Choice {
                message: ChoiceMsg,
            }
            #[derive(Deserialize)]
            struct ChoiceMsg {
                content: Option<String>,
            }

            let body = Req {
                model: &self.model,
                messages: vec![
                    Msg {
                        role: "system",
                        content: &req.system,
                    },
                    Msg {
                        role: "user",
                        content: &req.user,
                    },
                ],
                temperature: req.temperature,
                response_format: ResponseFormat {
                    kind: "json_object",
                },
            };

            let resp = self
                .http
                .post("https://api.openai.com/v1/chat/completions")
                .bearer_auth(&self.api_key)
                .json(&body)
                .send()
                .await
                .map_err(|e| OracleError::Transport(e.to_string()))?;

            if !resp.status().is_success() {
                return Err(OracleError::Status(resp.status().as_u16()));
            }
            let parsed: Resp = resp
                .json()
                .await
                .map_err(|e| OracleError::Transport(e.to_string()))?;
            let content = parsed
                .choices
                .into_iter()
                .next()
                .and_then(|c| c.message.content)
                .unwrap_or_default();
            if content.trim().is_empty() {
                Err(OracleError::EmptyResponse)
            } else {
                Ok(content)
            }
        })
    }
    fn name(&self) -> &'static str {
        "openai"
    }
    fn model(&self) -> &str {
        &self.model
    }
}

/// Always fails with `OracleError::Disabled`; used when AI is disabled.
pub struct DisabledOracle;

impl Oracle for DisabledOracle {
    fn complete<'a>(&'a self, _req: &'a CompletionRequest) -> OracleFuture<'a> {
        Box::pin(async { Err(OracleError::Disabled) })
    }
    fn provider_name(&self) -> &'static str {
        "disabled"
    }
}

/// Fixed-response provider for tests/local runs.
#[derive(Clone)]
pub struct MockProvider {
    pub fixed: String,
}

impl MockProvider {
    /// A reply both the classifier and the synthesizer accept: every category
    /// false and no ideas.
    pub fn neutral() -> Self {
        Self {
            fixed: serde_json::json!({
                "solutionRequest": false,
                "painAndAnger": false,
                "adviceRequest": false,
                "moneyTalk": false,
                "explanation": "Neutral (mock)",
                "ideas": []
            })
            .to_string(),
        }
    }
}

impl Provider for MockProvider {
    fn fetch<'a>(&'a self, _req: &'a CompletionRequest) -> OracleFuture<'a> {
        let out = self.fixed.clone();
        Box::pin(async move { Ok(out) })
    }
    fn name(&self) -> &'static str {
        "mock"
    }
}

// ------------------------------------------------------------
// Caching oracle wrapper (file cache + daily limit)
// ------------------------------------------------------------

/// Counter state is guarded by a `Mutex`; cache files are written atomically.
pub struct CachingOracle<P: Provider> {
    inner: P,
    cache_dir: PathBuf,
    daily_limit_max: u32,
    counter: Arc<Mutex<DailyCounter>>,
}

impl<P: Provider> CachingOracle<P> {
    pub fn new(inner: P, cache_dir: PathBuf, daily_limit_max: u32) -> Self {
        let _ = fs::create_dir_all(&cache_dir); // best-effort
        let counter = Arc::new(Mutex::new(
            load_daily_counter(&cache_dir).unwrap_or_default(),
        ));
        Self {
            inner,
            cache_dir,
            daily_limit_max,
            counter,
        }
    }

    /// Real calls made today (cache hits excluded).
    pub fn calls_today(&self) -> u32 {
        let g = self.counter.lock().unwrap_or_else(|p| p.into_inner());
        if g.is_expired() {
            0
        } else {
            g.count
        }
    }

    async fn complete_impl(&self, req: &CompletionRequest) -> Result<String, OracleError> {
        // 1) Cache lookup. Hits are free.
        let key = cache_key(self.inner.name(), self.inner.model(), req);
        if let Some(hit) = read_cache_file(&self.cache_dir, &key) {
            debug!(key = %key, "oracle cache hit");
            return Ok(hit);
        }

        // 2) Daily limit (real API calls only). The slot is reserved before
        // the call so concurrent callers cannot overshoot the limit.
        {
            let mut g = self.counter.lock().unwrap_or_else(|p| p.into_inner());
            if g.is_expired() {
                g.reset_to_today();
            }
            if g.count >= self.daily_limit_max {
                return Err(OracleError::DailyLimit(self.daily_limit_max));
            }
            g.count = g.count.saturating_add(1);
            let _ = save_daily_counter(&self.cache_dir, &g);
        }

        // 3) Real call. A failed call gives its slot back.
        match self.inner.fetch(req).await {
            Ok(fresh) => {
                let _ = write_cache_file(&self.cache_dir, &key, &fresh);
                Ok(fresh)
            }
            Err(e) => {
                self.release_slot();
                Err(e)
            }
        }
    }

    fn release_slot(&self) {
        let mut g = self.counter.lock().unwrap_or_else(|p| p.into_inner());
        if !g.is_expired() {
            g.count = g.count.saturating_sub(1);
            let _ = save_daily_counter(&self.cache_dir, &g);
        }
    }
}

impl<P: Provider> Oracle for CachingOracle<P> {
    fn complete<'a>(&'a self, req: &'a CompletionRequest) -> OracleFuture<'a> {
        Box::pin(self.complete_impl(req))
    }
    fn provider_name(&self) -> &'static str {
        self.inner.name()
    }
}

// ------------------------------------------------------------
// File cache helpers
// ------------------------------------------------------------

fn cache_key(provider: &str, model: &str, req: &CompletionRequest) -> String {
    let mut hasher = Sha256::new();
    hasher.update(provider.as_bytes());
    hasher.update([0u8]);
    hasher.update(model.as_bytes());
    hasher.update([0u8]);
    hasher.update(req.system.as_bytes());
    hasher.update([0u8]);
    hasher.update(req.user.as_bytes());
    hasher.update([0u8]);
    hasher.update(req.temperature.to_bits().to_le_bytes());
    let digest = hasher.finalize();
    let mut out = String::with_capacity(32);
    for b in digest.iter().take(16) {
        use std::fmt::Write as _;
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

fn cache_path(dir: &Path, key: &str) -> PathBuf {
    dir.join(format!("{key}.json"))
}

#[derive(Serialize, Deserialize)]
struct CachedCompletion {
    content: String,
}

fn read_cache_file(dir: &Path, key: &str) -> Option<String> {
    let s = fs::read_to_string(cache_path(dir, key)).ok()?;
    let cached: CachedCompletion = serde_json::from_str(&s).ok()?;
    Some(cached.content)
}

fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let tmp = path.with_extension("json.tmp");
    let mut f = fs::File::create(&tmp)?;
    f.write_all(bytes)?;
    fs::rename(tmp, path)?;
    Ok(())
}

fn write_cache_file(dir: &Path, key: &str, content: &str) -> io::Result<()> {
    let json = serde_json::to_vec(&CachedCompletion {
        content: content.to_string(),
    })
    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    write_atomic(&cache_path(dir, key), &json)
}

// ------------------------------------------------------------
// Daily counter helpers
// ------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DailyCounter {
    date: String,
    count: u32,
}
impl Default for DailyCounter {
    fn default() -> Self {
        Self {
            date: today(),
            count: 0,
        }
    }
}
impl DailyCounter {
    fn is_expired(&self) -> bool {
        self.date != today()
    }
    fn reset_to_today(&mut self) {
        self.date = today();
        self.count = 0;
    }
}

fn today() -> String {
    chrono::Utc::now().date_naive().to_string()
}

fn counter_path(dir: &Path) -> PathBuf {
    dir.join("daily_count.json")
}

fn load_daily_counter(dir: &Path) -> io::Result<DailyCounter> {
    let s = fs::read_to_string(counter_path(dir))?;
    serde_json::from_str(&s).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

fn save_daily_counter(dir: &Path, dc: &DailyCounter) -> io::Result<()> {
    let s = serde_json::to_vec(dc).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    write_atomic(&counter_path(dir), &s)
}
