use std::path::{Component, Path, PathBuf};

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use reelcache_core::error::ApiError;
use reelcache_core::types::{JobState, PlayType, TranscodeProfile};
use reelcache_db::repo::libraries::{self, LibraryRow};
use reelcache_jobs::dispatch::output_path;
use reelcache_jobs::{JobKey, PlaybackRequest, QueueStats, TranscodeJob, TranscodeTicket};
use reelcache_transcoder::decision::PlayReason;
use reelcache_transcoder::{MediaDescriptor, classify, hls};
use serde::{Deserialize, Serialize};
use tower_http::trace::TraceLayer;

use crate::auth::AuthUser;
use crate::error::AppError;
use crate::state::AppState;

const BYTES_PER_GB: f64 = 1024.0 * 1024.0 * 1024.0;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .nest("/api", api_router())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn api_router() -> Router<AppState> {
    Router::new()
        .route("/scan", post(scan_library))
        .route("/scan/capacity", get(cache_capacity))
        .route("/movie/movieInfo", get(movie_info))
        .route("/movie/remux", get(request_remux))
        .route("/movie/remuxProgress", get(remux_progress))
        .route("/movie/hls", get(request_hls))
        .route("/movie/hlsProgress", get(hls_progress))
        .route("/movie/hlsPlay", get(hls_play))
        .route("/movie/updateCacheItem", post(update_cache_item))
        .route("/movie/jobs", get(list_jobs))
        .route("/events", get(sse_events))
}

// ---------------------------------------------------------------------------
// Health
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct HealthResponse {
    status: String,
}

async fn health(State(state): State<AppState>) -> Result<Json<HealthResponse>, AppError> {
    sqlx::query("SELECT 1")
        .execute(&state.db)
        .await
        .map_err(|e| ApiError::Internal(format!("database check failed: {e}")))?;

    Ok(Json(HealthResponse {
        status: "ok".to_string(),
    }))
}

// ---------------------------------------------------------------------------
// Access control
// ---------------------------------------------------------------------------

/// Absolute, with no `..` components.
fn media_path(raw: &str) -> Result<PathBuf, AppError> {
    let path = PathBuf::from(raw);
    if !path.is_absolute() {
        return Err(ApiError::BadRequest("path must be absolute".into()).into());
    }
    if path.components().any(|c| matches!(c, Component::ParentDir)) {
        return Err(ApiError::Forbidden("path escapes the library".into()).into());
    }
    Ok(path)
}

/// The caller's library containing `path`, preferring the deepest root.
async fn library_for_path(
    state: &AppState,
    auth: &AuthUser,
    path: &Path,
) -> Result<LibraryRow, AppError> {
    let libs = libraries::list_user_libraries(&state.db, &auth.user_id)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?;

    libs.into_iter()
        .filter(|lib| path.starts_with(&lib.path))
        .max_by_key(|lib| lib.path.len())
        .ok_or_else(|| ApiError::Forbidden("path is not in any of your libraries".into()).into())
}

/// A library the caller owns. Unknown ids are reported the same way as
/// foreign ones.
async fn owned_library(
    state: &AppState,
    auth: &AuthUser,
    library_id: &str,
) -> Result<LibraryRow, AppError> {
    libraries::get_library(&state.db, library_id)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
        .filter(|lib| lib.user_id == auth.user_id)
        .ok_or_else(|| ApiError::Forbidden("library is not accessible for this account".into()).into())
}

async fn ensure_file_exists(path: &Path) -> Result<(), AppError> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Ok(()),
        Ok(_) => Err(ApiError::BadRequest("not a file".into()).into()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            Err(ApiError::NotFound(format!("media file not found: {}", path.display())).into())
        }
        Err(e) => Err(ApiError::Internal(format!("stat failed: {e}")).into()),
    }
}

// ---------------------------------------------------------------------------
// Libraries
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScanRequest {
    library_path: String,
}

async fn scan_library(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(req): Json<ScanRequest>,
) -> Result<Json<reelcache_scanner::ScanResult>, AppError> {
    let root = media_path(&req.library_path)?;
    let result = reelcache_scanner::scan_library(&state.db, &auth.user_id, &root).await?;
    Ok(Json(result))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CapacityQuery {
    library_path: String,
}

#[derive(Serialize, Debug)]
#[serde(rename_all = "camelCase")]
struct CapacityResponse {
    /// Percent of the budget in use.
    capacity: f64,
    /// GB currently cached.
    check_cache_capacity: f64,
    /// GB the library may cache.
    user_library_capacity: f64,
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn capacity_report(used: u64, budget: u64) -> CapacityResponse {
    let percent = if budget == 0 {
        0.0
    } else {
        used as f64 / budget as f64 * 100.0
    };
    CapacityResponse {
        capacity: round2(percent),
        check_cache_capacity: round2(used as f64 / BYTES_PER_GB),
        user_library_capacity: round2(budget as f64 / BYTES_PER_GB),
    }
}

async fn cache_capacity(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(q): Query<CapacityQuery>,
) -> Result<Json<CapacityResponse>, AppError> {
    let lib = libraries::find_library(&state.db, &auth.user_id, &q.library_path)
        .await
        .map_err(|e| ApiError::Internal(format!("db error: {e}")))?
        .ok_or_else(|| ApiError::NotFound("library not found".into()))?;

    let used = state.ledger.total_bytes(&lib.id, &auth.user_id).await?;
    let budget = u64::try_from(lib.max_cache_bytes).unwrap_or(0);
    Ok(Json(capacity_report(used, budget)))
}

// ---------------------------------------------------------------------------
// Playback classification
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MoviePathQuery {
    movie_path: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct MovieInfoResponse {
    #[serde(rename = "type")]
    play_type: PlayType,
    reasons: Vec<PlayReason>,
    movie_info: MediaDescriptor,
}

async fn movie_info(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(q): Query<MoviePathQuery>,
) -> Result<Json<MovieInfoResponse>, AppError> {
    let path = media_path(&q.movie_path)?;
    library_for_path(&state, &auth, &path).await?;
    ensure_file_exists(&path).await?;

    let media = state.prober.probe(&path).await?;
    let decision = classify(&media, &state.caps);
    tracing::debug!(path = %path.display(), play_type = ?decision.play_type, "classified media");

    Ok(Json(MovieInfoResponse {
        play_type: decision.play_type,
        reasons: decision.reasons,
        movie_info: media,
    }))
}

// ---------------------------------------------------------------------------
// Transcode requests
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct TranscodeQuery {
    movie_path: String,
    library_id: String,
    movie_id: String,
}

async fn request_remux(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(q): Query<TranscodeQuery>,
) -> Result<Json<TranscodeTicket>, AppError> {
    request_transcode(&state, &auth, TranscodeProfile::Remux, q).await
}

async fn request_hls(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(q): Query<TranscodeQuery>,
) -> Result<Json<TranscodeTicket>, AppError> {
    request_transcode(&state, &auth, TranscodeProfile::Hls, q).await
}

async fn request_transcode(
    state: &AppState,
    auth: &AuthUser,
    profile: TranscodeProfile,
    q: TranscodeQuery,
) -> Result<Json<TranscodeTicket>, AppError> {
    let path = media_path(&q.movie_path)?;
    let lib = owned_library(state, auth, &q.library_id).await?;
    if !path.starts_with(&lib.path) {
        return Err(ApiError::Forbidden("path is not in this library".into()).into());
    }

    let ticket = state
        .dispatcher
        .request_profile(
            profile,
            &PlaybackRequest {
                user_id: auth.user_id.clone(),
                library_id: lib.id,
                movie_id: q.movie_id,
                input_path: path,
            },
        )
        .await?;
    Ok(Json(ticket))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProgressQuery {
    job_id: String,
    movie_path: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProgressResponse {
    progress: u8,
    state: JobState,
    failed_reason: Option<String>,
}

async fn remux_progress(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(q): Query<ProgressQuery>,
) -> Result<Json<ProgressResponse>, AppError> {
    job_progress(&state, &auth, TranscodeProfile::Remux, q).await
}

async fn hls_progress(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(q): Query<ProgressQuery>,
) -> Result<Json<ProgressResponse>, AppError> {
    job_progress(&state, &auth, TranscodeProfile::Hls, q).await
}

async fn job_progress(
    state: &AppState,
    auth: &AuthUser,
    profile: TranscodeProfile,
    q: ProgressQuery,
) -> Result<Json<ProgressResponse>, AppError> {
    let path = media_path(&q.movie_path)?;
    library_for_path(state, auth, &path).await?;

    let key = JobKey::parse(&q.job_id)
        .ok_or_else(|| ApiError::BadRequest("malformed job id".into()))?;
    if key != JobKey::from_path(&path) {
        return Err(ApiError::BadRequest("job id does not belong to this movie".into()).into());
    }

    let job = state
        .queues
        .for_profile(profile)
        .get(key.as_str())
        .await?
        .ok_or_else(|| ApiError::NotFound("job not found".into()))?;

    Ok(Json(ProgressResponse {
        progress: job.progress,
        state: job.state,
        failed_reason: job.failed_reason,
    }))
}

// ---------------------------------------------------------------------------
// HLS serving
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct HlsPlayQuery {
    movie_path: String,
    filename: String,
}

fn hls_play_uri(movie_path: &str, filename: &str) -> String {
    let query = url::form_urlencoded::Serializer::new(String::new())
        .append_pair("moviePath", movie_path)
        .append_pair("filename", filename)
        .finish();
    format!("/api/movie/hlsPlay?{query}")
}

async fn hls_play(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(q): Query<HlsPlayQuery>,
) -> Result<Response, AppError> {
    let path = media_path(&q.movie_path)?;
    library_for_path(&state, &auth, &path).await?;

    if !hls::is_safe_filename(&q.filename) {
        return Err(ApiError::BadRequest("invalid filename".into()).into());
    }
    let playlist = output_path(TranscodeProfile::Hls, &path)
        .ok_or_else(|| ApiError::BadRequest("invalid media path".into()))?;
    let stem = playlist
        .file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| ApiError::BadRequest("invalid media path".into()))?;
    if !hls::belongs_to(stem, &q.filename) {
        return Err(ApiError::NotFound("no such file for this movie".into()).into());
    }
    let file = playlist.with_file_name(&q.filename);
    let content_type = hls::content_type(&q.filename);

    if q.filename.ends_with(".m3u8") {
        let content = match tokio::fs::read_to_string(&file).await {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ApiError::NotFound("playlist not ready".into()).into());
            }
            Err(e) => return Err(ApiError::Internal(format!("read playlist: {e}")).into()),
        };
        let rewritten = hls::rewrite_playlist(&content, |segment| {
            hls_play_uri(&q.movie_path, segment)
        });
        return Ok(([(header::CONTENT_TYPE, content_type)], Body::from(rewritten)).into_response());
    }

    let segment = match tokio::fs::File::open(&file).await {
        Ok(f) => f,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(ApiError::NotFound("segment not found".into()).into());
        }
        Err(e) => return Err(ApiError::Internal(format!("open segment: {e}")).into()),
    };
    let len = segment
        .metadata()
        .await
        .map_err(|e| ApiError::Internal(format!("stat segment: {e}")))?
        .len();
    let body = Body::from_stream(tokio_util::io::ReaderStream::new(segment));

    Ok((
        [
            (header::CONTENT_TYPE, content_type.to_string()),
            (header::CONTENT_LENGTH, len.to_string()),
        ],
        body,
    )
        .into_response())
}

// ---------------------------------------------------------------------------
// Cache items
// ---------------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UpdateCacheItemRequest {
    movie_id: String,
    library_id: String,
}

#[derive(Serialize)]
struct UpdateCacheItemResponse {
    success: bool,
}

async fn update_cache_item(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(req): Json<UpdateCacheItemRequest>,
) -> Result<Json<UpdateCacheItemResponse>, AppError> {
    let lib = owned_library(&state, &auth, &req.library_id).await?;
    let touched = state
        .ledger
        .touch(&auth.user_id, &lib.id, &req.movie_id)
        .await?;
    if !touched {
        tracing::debug!(movie_id = %req.movie_id, library_id = %lib.id, "no cache item to touch");
    }
    Ok(Json(UpdateCacheItemResponse { success: touched }))
}

// ---------------------------------------------------------------------------
// Jobs
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct JobsResponse {
    jobs: Vec<TranscodeJob>,
    #[serde(flatten)]
    stats: QueueStats,
}

async fn list_jobs(
    auth: AuthUser,
    State(state): State<AppState>,
) -> Result<Json<JobsResponse>, AppError> {
    let mut jobs = Vec::new();
    for queue in state.queues.all() {
        jobs.extend(queue.list(&auth.user_id).await?);
    }
    jobs.sort_by(|a, b| b.enqueued_ms.cmp(&a.enqueued_ms));
    let stats = QueueStats::tally(&jobs);
    Ok(Json(JobsResponse { jobs, stats }))
}

// ---------------------------------------------------------------------------
// SSE events
// ---------------------------------------------------------------------------

async fn sse_events(
    auth: AuthUser,
    State(state): State<AppState>,
) -> axum::response::Sse<
    impl futures::Stream<Item = Result<axum::response::sse::Event, std::convert::Infallible>>,
> {
    use axum::response::sse::Event;
    use std::time::Duration;

    let mut rx = state.events.subscribe();
    let shutdown = state.shutdown.clone();
    let user_id = auth.user_id;

    let stream = async_stream::stream! {
        loop {
            // Pending events go out before the stream ends on shutdown.
            let received = tokio::select! {
                biased;
                received = rx.recv() => received,
                _ = shutdown.cancelled() => break,
            };
            match received {
                Ok(evt) => {
                    if evt.user_id() != user_id {
                        continue;
                    }
                    if let Ok(data) = serde_json::to_string(&evt) {
                        yield Ok(Event::default().event(evt.name()).data(data));
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                    yield Ok(Event::default()
                        .event("error")
                        .data(format!(r#"{{"lagged":{n}}}"#)));
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    axum::response::Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
