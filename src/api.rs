use std::sync::Arc;

use serde::{Deserialize, Serialize};
use shuttle_axum::axum::{
    extract::{rejection::JsonRejection, rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use tokio::sync::Mutex;
use tower_http::cors::CorsLayer;
use tracing::error;

use crate::analyze::ClassifiedItem;
use crate::ideas::Idea;
use crate::ingest::types::ContentItem;
use crate::ingest::{sort_posts, PostSortKey, SortOrder};
use crate::pipeline::{Analysis, Pipeline};
use crate::watchlist::{is_plausible_name, normalize_name, WatchedSubreddit, Watchlist};

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Pipeline,
    pub watchlist: Arc<Mutex<Watchlist>>,
}

impl AppState {
    pub fn new(pipeline: Pipeline, watchlist: Watchlist) -> Self {
        Self {
            pipeline,
            watchlist: Arc::new(Mutex::new(watchlist)),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/posts", get(get_posts))
        .route("/validate-subreddit", get(validate_subreddit))
        .route("/analysis", get(get_analysis))
        .route("/ideas", post(post_ideas))
        .route("/watchlist", get(list_watchlist).post(add_to_watchlist))
        .route("/watchlist/{name}", delete(remove_from_watchlist))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

/// `{ "error": "..." }` with a status code.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }

    fn internal(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            message: message.into(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(ErrorBody { error: self.message })).into_response()
    }
}

/// Non-empty, trimmed query value.
fn required(value: Option<String>) -> Option<String> {
    value
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

// ---------------- /posts ----------------

#[derive(Deserialize)]
struct PostsQuery {
    subreddit: Option<String>,
    #[serde(default)]
    sort: PostSortKey,
    #[serde(default)]
    order: SortOrder,
}

#[derive(Serialize)]
struct PostsResp {
    posts: Vec<ContentItem>,
}

async fn get_posts(
    State(state): State<AppState>,
    query: Result<Query<PostsQuery>, QueryRejection>,
) -> Result<Json<PostsResp>, ApiError> {
    let Query(q) = query.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let subreddit =
        required(q.subreddit).ok_or_else(|| ApiError::bad_request("Subreddit parameter is required"))?;

    let mut posts = state
        .pipeline
        .feed()
        .fetch_recent_posts(&subreddit)
        .await
        .map_err(|e| {
            error!(subreddit = %subreddit, error = %e, "fetching posts failed");
            ApiError::internal("Failed to fetch posts")
        })?;
    sort_posts(&mut posts, q.sort, q.order);
    Ok(Json(PostsResp { posts }))
}

// ---------------- /validate-subreddit ----------------

#[derive(Deserialize)]
struct ValidateQuery {
    name: Option<String>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ValidateResp {
    is_valid: bool,
}

async fn validate_subreddit(
    State(state): State<AppState>,
    query: Result<Query<ValidateQuery>, QueryRejection>,
) -> Result<Json<ValidateResp>, ApiError> {
    let Query(q) = query.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let raw = required(q.name).ok_or_else(|| ApiError::bad_request("Subreddit name is required"))?;
    let name = normalize_name(&raw);
    if !is_plausible_name(&name) {
        return Ok(Json(ValidateResp { is_valid: false }));
    }
    let is_valid = state
        .pipeline
        .feed()
        .validate_subreddit(&name)
        .await
        .map_err(|e| {
            error!(subreddit = %name, error = %e, "validating subreddit failed");
            ApiError::internal(e.to_string())
        })?;
    Ok(Json(ValidateResp { is_valid }))
}

// ---------------- /analysis ----------------

#[derive(Deserialize)]
struct AnalysisQuery {
    subreddit: Option<String>,
}

async fn get_analysis(
    State(state): State<AppState>,
    query: Result<Query<AnalysisQuery>, QueryRejection>,
) -> Result<Json<Analysis>, ApiError> {
    let Query(q) = query.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let subreddit =
        required(q.subreddit).ok_or_else(|| ApiError::bad_request("Subreddit parameter is required"))?;
    let analysis = state.pipeline.analyze(&subreddit).await.map_err(|e| {
        error!(subreddit = %subreddit, error = %e, "analysis failed");
        ApiError::internal("Failed to fetch posts")
    })?;
    Ok(Json(analysis))
}

// ---------------- /ideas ----------------

#[derive(Deserialize)]
struct IdeasReq {
    posts: Vec<ClassifiedItem>,
}

#[derive(Serialize)]
struct IdeasResp {
    ideas: Vec<Idea>,
}

async fn post_ideas(
    State(state): State<AppState>,
    body: Result<Json<IdeasReq>, JsonRejection>,
) -> Result<Json<IdeasResp>, ApiError> {
    let Json(req) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let ideas = state.pipeline.ideas(&req.posts).await.map_err(|e| {
        error!(posts = req.posts.len(), error = %e, "idea synthesis failed");
        ApiError::internal("Failed to generate startup ideas")
    })?;
    Ok(Json(IdeasResp { ideas }))
}

// ---------------- /watchlist ----------------

#[derive(Serialize)]
struct WatchlistResp {
    subreddits: Vec<WatchedSubreddit>,
}

async fn list_watchlist(State(state): State<AppState>) -> Json<WatchlistResp> {
    let subreddits = state.watchlist.lock().await.list().to_vec();
    Json(WatchlistResp { subreddits })
}

#[derive(Deserialize)]
struct AddReq {
    name: String,
}

#[derive(Serialize)]
struct AddResp {
    added: bool,
}

async fn add_to_watchlist(
    State(state): State<AppState>,
    body: Result<Json<AddReq>, JsonRejection>,
) -> Result<Json<AddResp>, ApiError> {
    let Json(req) = body.map_err(|e| ApiError::bad_request(e.body_text()))?;
    if req.name.trim().is_empty() {
        return Err(ApiError::bad_request("Subreddit name is required"));
    }
    let added = state.watchlist.lock().await.add(&req.name).await.map_err(|e| {
        error!(input = %req.name, error = %e, "watchlist add failed");
        ApiError::internal(e.to_string())
    })?;
    Ok(Json(AddResp { added }))
}

#[derive(Serialize)]
struct RemoveResp {
    removed: bool,
}

async fn remove_from_watchlist(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> Result<Json<RemoveResp>, ApiError> {
    let removed = state.watchlist.lock().await.remove(&name).map_err(|e| {
        error!(input = %name, error = %e, "watchlist remove failed");
        ApiError::internal(e.to_string())
    })?;
    Ok(Json(RemoveResp { removed }))
}
