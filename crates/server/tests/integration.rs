use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use axum::http::{HeaderValue, StatusCode, header};
use axum_test::{TestRequest, TestServer};
use reelcache_core::types::TranscodeProfile;
use reelcache_jobs::{EvictionConfig, JobEvent, JobKey, NewCacheItem, WorkerConfig};
use reelcache_server::auth::issue_token;
use reelcache_server::routes::build_router;
use reelcache_server::state::AppState;
use reelcache_transcoder::ffprobe::{FormatInfo, StreamInfo, StreamKind};
use reelcache_transcoder::{
    ExecutionError, MediaDescriptor, MediaProber, ProbeError, ProgressSink, TranscodeExecutor,
};
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;

const SECRET: &str = "test-secret-key";

/// Describes files by extension: mkv is h264/aac in matroska, mp4 is fully
/// native, anything else carries codecs a browser cannot play.
struct FakeProber;

fn stream(index: u32, kind: StreamKind, codec: &str) -> StreamInfo {
    StreamInfo {
        index,
        kind,
        codec: codec.into(),
        width: None,
        height: None,
        channels: None,
        language: None,
        title: None,
    }
}

#[async_trait::async_trait]
impl MediaProber for FakeProber {
    async fn probe(&self, file: &Path) -> Result<MediaDescriptor, ProbeError> {
        let ext = file.extension().and_then(|e| e.to_str()).unwrap_or("");
        let (format_name, video, audio) = match ext {
            "mkv" => ("matroska,webm", "h264", "aac"),
            "mp4" => ("mov,mp4,m4a,3gp,3g2,mj2", "h264", "aac"),
            _ => ("avi", "mpeg4", "ac3"),
        };
        Ok(MediaDescriptor {
            format: FormatInfo {
                format_name: format_name.into(),
                duration_secs: 60.0,
                bit_rate: None,
                size_bytes: None,
            },
            streams: vec![
                stream(0, StreamKind::Video, video),
                stream(1, StreamKind::Audio, audio),
            ],
        })
    }
}

/// Writes a small artifact instead of running ffmpeg.
struct FakeExecutor;

#[async_trait::async_trait]
impl TranscodeExecutor for FakeExecutor {
    async fn execute(
        &self,
        profile: TranscodeProfile,
        _input: &Path,
        output: &Path,
        progress: &dyn ProgressSink,
        _cancel: &CancellationToken,
    ) -> Result<(), ExecutionError> {
        progress.report(40);
        tokio::fs::create_dir_all(output.parent().unwrap()).await?;
        tokio::fs::write(output, b"artifact").await?;
        if profile == TranscodeProfile::Hls {
            let stem = output.file_stem().unwrap().to_string_lossy();
            tokio::fs::write(output.with_file_name(format!("{stem}_00000.ts")), b"ts").await?;
        }
        progress.report(100);
        Ok(())
    }
}

struct Harness {
    server: TestServer,
    state: AppState,
    dir: tempfile::TempDir,
    library: PathBuf,
    token: String,
}

async fn harness() -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("reelcache.db");
    let pool = reelcache_db::connect(db_path.to_str().unwrap())
        .await
        .unwrap();
    reelcache_db::migrate::run(&pool).await.unwrap();

    let library = dir.path().join("lib");
    for (folder, file) in [
        ("Movie(2001)", "film.mkv"),
        ("Native(2010)", "native.mp4"),
        ("Old(1990)", "old.avi"),
    ] {
        let folder = library.join(folder);
        std::fs::create_dir_all(&folder).unwrap();
        std::fs::write(folder.join(file), vec![0u8; 400]).unwrap();
    }

    let state = AppState::new(
        pool,
        SECRET.to_string(),
        Arc::new(FakeProber),
        EvictionConfig::default(),
    );
    let server = TestServer::new(build_router(state.clone())).unwrap();
    let token = issue_token("u1", SECRET).unwrap();

    Harness {
        server,
        state,
        dir,
        library,
        token,
    }
}

fn bearer(token: &str) -> HeaderValue {
    format!("Bearer {token}").parse().unwrap()
}

impl Harness {
    fn get(&self, path: &str) -> TestRequest {
        self.server
            .get(path)
            .add_header(header::AUTHORIZATION, bearer(&self.token))
    }

    fn post(&self, path: &str) -> TestRequest {
        self.server
            .post(path)
            .add_header(header::AUTHORIZATION, bearer(&self.token))
    }

    fn movie(&self, rel: &str) -> String {
        self.library.join(rel).display().to_string()
    }

    async fn scan(&self) -> Value {
        let resp = self
            .post("/api/scan")
            .json(&json!({ "libraryPath": self.library.display().to_string() }))
            .await;
        resp.assert_status_ok();
        resp.json()
    }

    fn request(&self, route: &str, movie: &str, library_id: &str) -> TestRequest {
        self.get(route)
            .add_query_param("moviePath", movie)
            .add_query_param("libraryId", library_id)
            .add_query_param("movieId", "m1")
    }

    fn start_workers(&self) -> CancellationToken {
        let shutdown = CancellationToken::new();
        reelcache_server::background::spawn_workers(
            &self.state,
            Arc::new(FakeExecutor),
            &WorkerConfig {
                concurrency: 1,
                poll_interval: Duration::from_millis(20),
            },
            &shutdown,
        );
        shutdown
    }
}

#[tokio::test]
async fn health_endpoint_returns_ok() {
    let h = harness().await;
    let resp = h.server.get("/health").await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn api_requires_a_bearer_token() {
    let h = harness().await;
    let resp = h
        .server
        .get("/api/movie/movieInfo")
        .add_query_param("moviePath", h.movie("Movie(2001)/film.mkv"))
        .await;
    resp.assert_status(StatusCode::UNAUTHORIZED);
    let body: Value = resp.json();
    assert_eq!(body["error"]["code"], "unauthorized");
}

#[tokio::test]
async fn scan_registers_movies() {
    let h = harness().await;
    let body = h.scan().await;
    assert_eq!(body["added"], 3);
    assert_eq!(body["skipped"], 0);
    assert_eq!(body["movies"].as_array().unwrap().len(), 3);

    let again = h.scan().await;
    assert_eq!(again["libraryId"], body["libraryId"]);
    assert_eq!(again["added"], 0);
    assert_eq!(again["skipped"], 3);
}

#[tokio::test]
async fn movie_info_classifies_files() {
    let h = harness().await;
    h.scan().await;

    for (rel, expected) in [
        ("Movie(2001)/film.mkv", "remux"),
        ("Native(2010)/native.mp4", "direct"),
        ("Old(1990)/old.avi", "hls"),
    ] {
        let resp = h
            .get("/api/movie/movieInfo")
            .add_query_param("moviePath", h.movie(rel))
            .await;
        resp.assert_status_ok();
        let body: Value = resp.json();
        assert_eq!(body["type"], expected, "{rel}");
        assert_eq!(body["movieInfo"]["streams"].as_array().unwrap().len(), 2);
    }
}

#[tokio::test]
async fn missing_file_is_not_found() {
    let h = harness().await;
    h.scan().await;
    let resp = h
        .get("/api/movie/movieInfo")
        .add_query_param("moviePath", h.movie("Movie(2001)/gone.mkv"))
        .await;
    resp.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn fresh_remux_runs_to_completion() {
    let h = harness().await;
    let scan = h.scan().await;
    let library_id = scan["libraryId"].as_str().unwrap().to_string();
    let movie = h.movie("Movie(2001)/film.mkv");

    let info: Value = h
        .get("/api/movie/movieInfo")
        .add_query_param("moviePath", &movie)
        .await
        .json();
    assert_eq!(info["type"], "remux");

    let resp = h.request("/api/movie/remux", &movie, &library_id).await;
    resp.assert_status_ok();
    let ticket: Value = resp.json();
    assert_eq!(ticket["status"], "QUEUED");
    let job_id = ticket["jobId"].as_str().unwrap().to_string();
    assert_eq!(job_id, JobKey::from_path(Path::new(&movie)).as_str());
    assert!(
        ticket["outputPath"]
            .as_str()
            .unwrap()
            .ends_with(".cache/remux/film.mp4")
    );

    let shutdown = h.start_workers();
    let mut progress = Value::Null;
    for _ in 0..200 {
        progress = h
            .get("/api/movie/remuxProgress")
            .add_query_param("jobId", &job_id)
            .add_query_param("moviePath", &movie)
            .await
            .json();
        if progress["state"] == "completed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    shutdown.cancel();
    assert_eq!(progress["progress"], 100);
    assert_eq!(progress["state"], "completed");

    let item = h.state.ledger.find_by_input(&movie).await.unwrap().unwrap();
    assert!(item.output_path.contains(".cache/remux/"));
    assert_eq!(item.bytes, 8);

    let done: Value = h
        .request("/api/movie/remux", &movie, &library_id)
        .await
        .json();
    assert_eq!(done["status"], "COMPLETED");
    assert_eq!(done["jobId"], job_id.as_str());
}

#[tokio::test]
async fn concurrent_remux_requests_share_a_job() {
    let h = harness().await;
    let scan = h.scan().await;
    let library_id = scan["libraryId"].as_str().unwrap();
    let movie = h.movie("Movie(2001)/film.mkv");

    let (a, b) = tokio::join!(
        h.request("/api/movie/remux", &movie, library_id),
        h.request("/api/movie/remux", &movie, library_id),
    );
    let a: Value = a.json();
    let b: Value = b.json();
    assert_eq!(a["jobId"], b["jobId"]);
    for t in [&a, &b] {
        assert!(t["status"] == "QUEUED" || t["status"] == "PROCESSING", "{t}");
    }

    let jobs: Value = h.get("/api/movie/jobs").await.json();
    assert_eq!(jobs["jobs"].as_array().unwrap().len(), 1);
    assert_eq!(jobs["waiting"], 1);
    assert_eq!(jobs["active"], 0);
}

#[tokio::test]
async fn hls_playlist_is_rewritten_and_segments_served() {
    let h = harness().await;
    let scan = h.scan().await;
    let library_id = scan["libraryId"].as_str().unwrap().to_string();
    let movie = h.movie("Old(1990)/old.avi");

    let ticket: Value = h.request("/api/movie/hls", &movie, &library_id).await.json();
    assert!(
        ticket["outputPath"]
            .as_str()
            .unwrap()
            .ends_with(".cache/hls/old.m3u8")
    );

    let shutdown = h.start_workers();
    let job_id = ticket["jobId"].as_str().unwrap().to_string();
    for _ in 0..200 {
        let p: Value = h
            .get("/api/movie/hlsProgress")
            .add_query_param("jobId", &job_id)
            .add_query_param("moviePath", &movie)
            .await
            .json();
        if p["state"] == "completed" {
            break;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    shutdown.cancel();

    let hls_dir = h.library.join("Old(1990)/.cache/hls");
    std::fs::write(
        hls_dir.join("old.m3u8"),
        "#EXTM3U\n#EXT-X-TARGETDURATION:4\n#EXTINF:4.0,\nold_00000.ts\n#EXT-X-ENDLIST\n",
    )
    .unwrap();
    // Another movie's output in the same folder.
    std::fs::write(hls_dir.join("other.m3u8"), "#EXTM3U\n").unwrap();

    let resp = h
        .get("/api/movie/hlsPlay")
        .add_query_param("moviePath", &movie)
        .add_query_param("filename", "old.m3u8")
        .await;
    resp.assert_status_ok();
    assert_eq!(
        resp.header(header::CONTENT_TYPE),
        "application/vnd.apple.mpegurl"
    );
    let playlist = resp.text();
    assert!(playlist.starts_with("#EXTM3U\n"));
    assert!(playlist.contains("/api/movie/hlsPlay?moviePath="));
    assert!(playlist.contains("&filename=old_00000.ts"));

    let seg = h
        .get("/api/movie/hlsPlay")
        .add_query_param("moviePath", &movie)
        .add_query_param("filename", "old_00000.ts")
        .await;
    seg.assert_status_ok();
    assert_eq!(seg.as_bytes().as_ref(), b"ts");

    let item = h.state.ledger.find_by_input(&movie).await.unwrap().unwrap();
    assert_eq!(item.bytes, b"artifact".len() as u64 + 2);

    h.get("/api/movie/hlsPlay")
        .add_query_param("moviePath", &movie)
        .add_query_param("filename", "other.m3u8")
        .await
        .assert_status(StatusCode::NOT_FOUND);

    let bad = h
        .get("/api/movie/hlsPlay")
        .add_query_param("moviePath", &movie)
        .add_query_param("filename", "../film.mkv")
        .await;
    bad.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn paths_outside_the_callers_libraries_are_forbidden() {
    let h = harness().await;
    let scan = h.scan().await;
    let library_id = scan["libraryId"].as_str().unwrap().to_string();

    let outside = h.dir.path().join("elsewhere/film.mkv");
    std::fs::create_dir_all(outside.parent().unwrap()).unwrap();
    std::fs::write(&outside, b"x").unwrap();
    let outside = outside.display().to_string();

    let resp = h
        .get("/api/movie/movieInfo")
        .add_query_param("moviePath", &outside)
        .await;
    resp.assert_status(StatusCode::FORBIDDEN);
    let body: Value = resp.json();
    assert_eq!(body["error"]["code"], "forbidden");

    h.request("/api/movie/remux", &outside, &library_id)
        .await
        .assert_status(StatusCode::FORBIDDEN);

    // Another user cannot use u1's library id, even for a path inside it.
    let other = issue_token("u2", SECRET).unwrap();
    h.server
        .get("/api/movie/remux")
        .add_header(header::AUTHORIZATION, bearer(&other))
        .add_query_param("moviePath", h.movie("Movie(2001)/film.mkv"))
        .add_query_param("libraryId", &library_id)
        .add_query_param("movieId", "m1")
        .await
        .assert_status(StatusCode::FORBIDDEN);

    let jobs: Value = h.get("/api/movie/jobs").await.json();
    assert!(jobs["jobs"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn oversized_movie_is_refused() {
    let h = harness().await;
    let scan = h.scan().await;
    let library_id = scan["libraryId"].as_str().unwrap().to_string();
    reelcache_db::repo::libraries::set_cache_budget(&h.state.db, &library_id, 100)
        .await
        .unwrap();

    let resp = h
        .request("/api/movie/remux", &h.movie("Movie(2001)/film.mkv"), &library_id)
        .await;
    resp.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = resp.json();
    assert_eq!(body["error"]["code"], "capacity_exceeded");
}

#[tokio::test]
async fn capacity_reports_usage() {
    let h = harness().await;
    let scan = h.scan().await;
    let library_id = scan["libraryId"].as_str().unwrap().to_string();
    reelcache_db::repo::libraries::set_cache_budget(&h.state.db, &library_id, 1000)
        .await
        .unwrap();
    h.state
        .ledger
        .record_completion(NewCacheItem {
            input_path: h.movie("Movie(2001)/film.mkv"),
            output_path: h.movie("Movie(2001)/.cache/remux/film.mp4"),
            bytes: 250,
            profile: TranscodeProfile::Remux,
            user_id: "u1".into(),
            library_id: library_id.clone(),
            movie_id: "m1".into(),
        })
        .await
        .unwrap();

    let resp = h
        .get("/api/scan/capacity")
        .add_query_param("libraryPath", h.library.display().to_string())
        .await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    assert_eq!(body["capacity"], 25.0);
    assert_eq!(body["checkCacheCapacity"], 0.0);
    assert_eq!(body["userLibraryCapacity"], 0.0);

    h.get("/api/scan/capacity")
        .add_query_param("libraryPath", "/not/a/library")
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn update_cache_item_touches_the_ledger() {
    let h = harness().await;
    let scan = h.scan().await;
    let library_id = scan["libraryId"].as_str().unwrap().to_string();

    let body: Value = h
        .post("/api/movie/updateCacheItem")
        .json(&json!({ "movieId": "m1", "libraryId": library_id }))
        .await
        .json();
    assert_eq!(body["success"], false);

    let item = h
        .state
        .ledger
        .record_completion(NewCacheItem {
            input_path: h.movie("Movie(2001)/film.mkv"),
            output_path: h.movie("Movie(2001)/.cache/remux/film.mp4"),
            bytes: 10,
            profile: TranscodeProfile::Remux,
            user_id: "u1".into(),
            library_id: library_id.clone(),
            movie_id: "m1".into(),
        })
        .await
        .unwrap();

    let resp = h
        .post("/api/movie/updateCacheItem")
        .json(&json!({ "movieId": "m1", "libraryId": library_id }))
        .await;
    resp.assert_status_ok();
    let body: Value = resp.json();
    assert_eq!(body["success"], true);

    let touched = h
        .state
        .ledger
        .find_by_input(&item.input_path)
        .await
        .unwrap()
        .unwrap();
    assert!(touched.access_seq > item.access_seq);

    h.post("/api/movie/updateCacheItem")
        .json(&json!({ "movieId": "m1", "libraryId": "someone-elses" }))
        .await
        .assert_status(StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn progress_rejects_foreign_job_ids() {
    let h = harness().await;
    h.scan().await;
    let other = JobKey::from_path(Path::new("/elsewhere/film.mkv"));

    h.get("/api/movie/remuxProgress")
        .add_query_param("jobId", other.as_str())
        .add_query_param("moviePath", h.movie("Movie(2001)/film.mkv"))
        .await
        .assert_status(StatusCode::BAD_REQUEST);

    let own = JobKey::from_path(Path::new(&h.movie("Movie(2001)/film.mkv")));
    h.get("/api/movie/remuxProgress")
        .add_query_param("jobId", own.as_str())
        .add_query_param("moviePath", h.movie("Movie(2001)/film.mkv"))
        .await
        .assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn events_reach_only_their_user_and_end_on_shutdown() {
    let h = harness().await;
    let state = h.state.clone();
    let publisher = tokio::spawn(async move {
        while state.events.receiver_count() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let _ = state.events.send(JobEvent::JobCompleted {
            job_id: "a".into(),
            user_id: "u1".into(),
            profile: TranscodeProfile::Remux,
            output_path: "/home/u1/private/.cache/remux/a.mp4".into(),
        });
        let _ = state.events.send(JobEvent::JobProgress {
            job_id: "b".into(),
            user_id: "u2".into(),
            profile: TranscodeProfile::Hls,
            progress: 40,
        });
        state.shutdown.cancel();
    });

    let other = issue_token("u2", SECRET).unwrap();
    let resp = h
        .server
        .get("/api/events")
        .add_header(header::AUTHORIZATION, bearer(&other))
        .await;
    publisher.await.unwrap();

    resp.assert_status_ok();
    let body = resp.text();
    assert!(body.contains("event: job_progress"), "{body}");
    assert!(!body.contains("job_completed"), "{body}");
    assert!(!body.contains("/home/u1"), "{body}");
}
