// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// The router is driven via tower::ServiceExt::oneshot with an in-memory
// content source, a keyword classifier and a fixed-reply oracle.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value as Json};
use shuttle_axum::axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use tower::ServiceExt as _; // for `oneshot`

use subreddit_insights::ai_adapter::{MockProvider, ProviderOracle};
use subreddit_insights::analyze::{
    BatchScheduler, CategorySet, ClassificationResult, PostClassifier,
};
use subreddit_insights::api::{self, AppState};
use subreddit_insights::config::PipelineConfig;
use subreddit_insights::error::{ClassifyError, FetchError};
use subreddit_insights::ideas::IdeaSynthesizer;
use subreddit_insights::ingest::providers::fixture::FixtureRedditApi;
use subreddit_insights::ingest::types::{
    ContentItem, ListingSort, RawPost, RedditApi, SubredditAbout,
};
use subreddit_insights::ingest::FeedAdapter;
use subreddit_insights::pipeline::Pipeline;
use subreddit_insights::watchlist::{MemoryKvStore, Watchlist, WatchlistRepository};

const BODY_LIMIT: usize = 1024 * 1024;

/// Flags "painAndAnger" whenever the title mentions "broken".
struct KeywordClassifier;

#[async_trait]
impl PostClassifier for KeywordClassifier {
    async fn classify(&self, post: &ContentItem) -> Result<ClassificationResult, ClassifyError> {
        let mut r = ClassificationResult::all_false(&CategorySet::default(), "keyword");
        if post.title.contains("broken") {
            r.flags.insert("painAndAnger".into(), true);
        }
        if post.title.contains("price") {
            r.flags.insert("moneyTalk".into(), true);
        }
        Ok(r)
    }
}

fn raw(id: &str, title: &str, score: i64, comments: u64, age_secs: i64) -> RawPost {
    RawPost {
        id: id.into(),
        title: title.into(),
        selftext: format!("body of {id}"),
        score,
        num_comments: comments,
        created_utc: (Utc::now().timestamp() - age_secs) as f64,
        url: format!("https://example.com/{id}"),
        permalink: Some(format!("/r/rust/comments/{id}/x/")),
        over_18: false,
    }
}

fn fixture() -> FixtureRedditApi {
    FixtureRedditApi::new()
        .with_posts(
            "rust",
            ListingSort::New,
            vec![
                raw("a", "cargo is broken", 5, 10, 60),
                raw("b", "what price for a license", 50, 2, 120),
                raw("c", "hello", 1, 30, 3 * 86_400),
            ],
        )
        .with_posts(
            "rust",
            ListingSort::Hot,
            vec![raw("a", "cargo is broken", 5, 10, 60), raw("d", "show and tell", 20, 25, 300)],
        )
        .with_about("rust", false)
        .with_about("nsfwsub", true)
}

fn test_config() -> PipelineConfig {
    let mut cfg = PipelineConfig::default();
    cfg.batch.pacing_ms = 0;
    cfg.retry.base_delay_ms = 1;
    cfg.retry.max_delay_ms = 2;
    cfg.retry.max_attempts = 2;
    cfg
}

fn router_with(api: Arc<dyn RedditApi>) -> Router {
    let cfg = test_config();
    let feed = FeedAdapter::new(api, &cfg);
    let scheduler = BatchScheduler::new(Arc::new(KeywordClassifier), &cfg.batch, CategorySet::default());
    let oracle = Arc::new(ProviderOracle(MockProvider {
        fixed: json!({"ideas": [{"idea": "Build-fix bot", "postIndices": [0, 5]}]}).to_string(),
    }));
    let synthesizer = IdeaSynthesizer::new(oracle, 0.7, &cfg.ideas);
    let pipeline = Pipeline::new(feed.clone(), scheduler, synthesizer);

    let repo = WatchlistRepository::new(Arc::new(MemoryKvStore::default()));
    let watchlist = Watchlist::open(repo, Arc::new(feed)).expect("open watchlist");
    api::router(AppState::new(pipeline, watchlist))
}

fn test_router() -> Router {
    router_with(Arc::new(fixture()))
}

async fn call(app: Router, req: Request<Body>) -> (StatusCode, Json) {
    let resp = app.oneshot(req).await.expect("oneshot");
    let status = resp.status();
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    let json = serde_json::from_slice(&bytes).unwrap_or(Json::Null);
    (status, json)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .expect("build GET")
}

fn post_json(uri: &str, payload: &Json) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(payload.to_string()))
        .expect("build POST")
}

fn titles(posts: &Json) -> Vec<String> {
    posts
        .as_array()
        .expect("array")
        .iter()
        .map(|p| p["title"].as_str().unwrap_or_default().to_string())
        .collect()
}

#[tokio::test]
async fn health_returns_ok() {
    let resp = test_router().oneshot(get("/health")).await.expect("oneshot");
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT).await.unwrap();
    assert_eq!(String::from_utf8(bytes.to_vec()).unwrap(), "OK");
}

#[tokio::test]
async fn posts_requires_subreddit() {
    let (status, body) = call(test_router(), get("/posts")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Subreddit parameter is required");

    let (status, _) = call(test_router(), get("/posts?subreddit=%20")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn posts_are_windowed_deduped_and_sorted_by_comments() {
    let (status, body) = call(test_router(), get("/posts?subreddit=rust")).await;
    assert_eq!(status, StatusCode::OK);
    // "hello" is three days old; "a" appears in both rankings.
    assert_eq!(
        titles(&body["posts"]),
        vec!["show and tell", "cargo is broken", "what price for a license"]
    );
    assert_eq!(body["posts"][0]["numComments"], 25);
    assert_eq!(body["posts"][1]["url"], "https://www.reddit.com/r/rust/comments/a/x/");
    assert!(body["posts"][0]["createdAt"].is_string());
}

#[tokio::test]
async fn posts_honor_sort_and_order() {
    let (status, body) = call(test_router(), get("/posts?subreddit=rust&sort=score&order=asc")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        titles(&body["posts"]),
        vec!["cargo is broken", "show and tell", "what price for a license"]
    );
    let scores: Vec<i64> = body["posts"]
        .as_array()
        .unwrap()
        .iter()
        .map(|p| p["score"].as_i64().unwrap())
        .collect();
    assert_eq!(scores, vec![5, 20, 50]);

    let (status, body) = call(test_router(), get("/posts?subreddit=rust&sort=bogus")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());
}

#[tokio::test]
async fn posts_fetch_failure_is_500() {
    let (status, body) = call(test_router(), get("/posts?subreddit=ghost")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"], "Failed to fetch posts");
}

#[tokio::test]
async fn validate_subreddit_outcomes() {
    let (status, body) = call(test_router(), get("/validate-subreddit?name=r/rust")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"isValid": true}));

    let (_, body) = call(test_router(), get("/validate-subreddit?name=nsfwsub")).await;
    assert_eq!(body, json!({"isValid": false}));

    let (_, body) = call(test_router(), get("/validate-subreddit?name=ghost")).await;
    assert_eq!(body, json!({"isValid": false}));

    let (status, body) = call(test_router(), get("/validate-subreddit")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "Subreddit name is required");
}

#[tokio::test]
async fn malformed_query_strings_get_json_errors() {
    for uri in [
        "/validate-subreddit?name=rust&name=golang",
        "/analysis?subreddit=rust&subreddit=golang",
    ] {
        let (status, body) = call(test_router(), get(uri)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST, "{uri}");
        assert!(body["error"].is_string(), "{uri}");
    }
}

/// Every call fails with a network error.
struct Unreachable;

#[async_trait]
impl RedditApi for Unreachable {
    async fn listing(&self, _: &str, _: ListingSort, _: u32) -> Result<Vec<RawPost>, FetchError> {
        Err(FetchError::Transient("connection reset".into()))
    }
    async fn about(&self, _: &str) -> Result<SubredditAbout, FetchError> {
        Err(FetchError::Transient("connection reset".into()))
    }
    fn name(&self) -> &'static str {
        "unreachable"
    }
}

#[tokio::test]
async fn validate_network_failure_is_500_not_invalid() {
    let (status, body) = call(router_with(Arc::new(Unreachable)), get("/validate-subreddit?name=rust")).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert!(body["error"].as_str().unwrap().contains("gave up after 2 attempts"));
}

#[tokio::test]
async fn analysis_returns_posts_and_themes() {
    let (status, body) = call(test_router(), get("/analysis?subreddit=rust")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["posts"].as_array().unwrap().len(), 3);
    assert_eq!(body["posts"][0]["categories"]["painAndAnger"], true);
    assert_eq!(body["posts"][0]["categories"]["explanation"], "keyword");

    let themes = body["themes"].as_array().unwrap();
    let summary: Vec<(String, u64)> = themes
        .iter()
        .map(|t| (t["name"].as_str().unwrap().to_string(), t["count"].as_u64().unwrap()))
        .collect();
    assert_eq!(
        summary,
        vec![
            ("Solution Requests".to_string(), 0),
            ("Pain & Anger".to_string(), 1),
            ("Advice Requests".to_string(), 0),
            ("Money Talk".to_string(), 1),
        ]
    );
    assert_eq!(themes[1]["posts"][0]["title"], "cargo is broken");
}

#[tokio::test]
async fn ideas_resolve_indices_and_drop_unknown() {
    let (_, analysis) = call(test_router(), get("/analysis?subreddit=rust")).await;
    let (status, body) = call(
        test_router(),
        post_json("/ideas", &json!({"posts": analysis["posts"]})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let ideas = body["ideas"].as_array().unwrap();
    assert_eq!(ideas.len(), 1);
    assert_eq!(ideas[0]["idea"], "Build-fix bot");
    // Index 5 is outside the three-post corpus.
    let related = ideas[0]["relatedPosts"].as_array().unwrap();
    assert_eq!(related.len(), 1);
    assert_eq!(related[0]["title"], "cargo is broken");
}

#[tokio::test]
async fn ideas_on_empty_corpus_is_empty() {
    let (status, body) = call(test_router(), post_json("/ideas", &json!({"posts": []}))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"ideas": []}));

    let (status, _) = call(test_router(), post_json("/ideas", &json!({"nope": 1}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn watchlist_add_list_remove() {
    let app = test_router();

    let (status, body) = call(app.clone(), get("/watchlist")).await;
    assert_eq!(status, StatusCode::OK);
    let names: Vec<_> = body["subreddits"]
        .as_array()
        .unwrap()
        .iter()
        .map(|s| s["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["ollama", "openai"]);

    let (_, body) = call(app.clone(), post_json("/watchlist", &json!({"name": "https://reddit.com/r/rust/"}))).await;
    assert_eq!(body, json!({"added": true}));
    let (_, body) = call(app.clone(), post_json("/watchlist", &json!({"name": "r/rust"}))).await;
    assert_eq!(body, json!({"added": false}));
    let (_, body) = call(app.clone(), post_json("/watchlist", &json!({"name": "nsfwsub"}))).await;
    assert_eq!(body, json!({"added": false}));

    let (_, body) = call(app.clone(), get("/watchlist")).await;
    assert_eq!(body["subreddits"].as_array().unwrap().len(), 3);
    assert_eq!(body["subreddits"][2]["url"], "https://reddit.com/r/rust");
    assert!(body["subreddits"][2]["addedAt"].is_string());

    let req = Request::builder()
        .method("DELETE")
        .uri("/watchlist/rust")
        .body(Body::empty())
        .unwrap();
    let (status, body) = call(app.clone(), req).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({"removed": true}));

    let (_, body) = call(app, get("/watchlist")).await;
    assert_eq!(body["subreddits"].as_array().unwrap().len(), 2);
}
