use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use reelcache_core::types::{JobState, TranscodeProfile};
use reelcache_db::repo::libraries;
use reelcache_jobs::sqlite::{SqliteJobQueue, SqliteLedger};
use reelcache_jobs::{
    CacheLedger, EvictionConfig, Evictor, JobKey, JobPayload, JobQueue, NewCacheItem,
    TranscodeQueues,
};

async fn file_pool(dir: &Path) -> sqlx::SqlitePool {
    let path = dir.join("reelcache.db");
    let pool = reelcache_db::connect(path.to_str().unwrap()).await.unwrap();
    reelcache_db::migrate::run(&pool).await.unwrap();
    pool
}

fn payload(input: &str) -> JobPayload {
    JobPayload {
        input_path: input.into(),
        output_path: format!("{input}.mp4"),
        library_id: "lib".into(),
        user_id: "u1".into(),
        movie_id: "m1".into(),
    }
}

#[tokio::test]
async fn concurrent_enqueues_create_a_single_job() {
    let dir = tempfile::tempdir().unwrap();
    let queue = Arc::new(SqliteJobQueue::new(
        file_pool(dir.path()).await,
        TranscodeProfile::Remux,
    ));
    let key = JobKey::from_path(Path::new("/lib/Movie(2001)/film.mkv"));

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let queue = queue.clone();
        let key = key.clone();
        tasks.push(tokio::spawn(async move {
            queue
                .enqueue(&key, payload("/lib/Movie(2001)/film.mkv"))
                .await
                .unwrap()
        }));
    }

    let mut created = 0;
    for t in tasks {
        let handle = t.await.unwrap();
        assert_eq!(handle.job.id, key.as_str());
        if handle.created {
            created += 1;
        }
    }
    assert_eq!(created, 1);
    assert_eq!(queue.list("u1").await.unwrap().len(), 1);
}

#[tokio::test]
async fn concurrent_dequeues_never_share_a_job() {
    let dir = tempfile::tempdir().unwrap();
    let queue = Arc::new(SqliteJobQueue::new(
        file_pool(dir.path()).await,
        TranscodeProfile::Hls,
    ));
    for i in 0..10 {
        let input = format!("/lib/{i}/film.avi");
        queue
            .enqueue(&JobKey::from_path(Path::new(&input)), payload(&input))
            .await
            .unwrap();
    }

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let queue = queue.clone();
        tasks.push(tokio::spawn(async move {
            let mut claimed = Vec::new();
            while let Some(job) = queue.dequeue().await.unwrap() {
                assert_eq!(job.state, JobState::Active);
                claimed.push(job.id);
            }
            claimed
        }));
    }

    let mut seen = HashSet::new();
    for t in tasks {
        for id in t.await.unwrap() {
            assert!(seen.insert(id), "job claimed twice");
        }
    }
    assert_eq!(seen.len(), 10);
}

#[tokio::test]
async fn eviction_against_the_library_budget() {
    let dir = tempfile::tempdir().unwrap();
    let pool = file_pool(dir.path()).await;
    let lib = libraries::get_or_create_library(&pool, "u1", "/lib").await.unwrap();
    libraries::set_cache_budget(&pool, &lib.id, 1000).await.unwrap();

    let ledger = Arc::new(SqliteLedger::new(pool.clone()));
    let queues = TranscodeQueues {
        remux: Arc::new(SqliteJobQueue::new(pool.clone(), TranscodeProfile::Remux)),
        hls: Arc::new(SqliteJobQueue::new(pool.clone(), TranscodeProfile::Hls)),
    };
    let evictor = Evictor::new(ledger.clone(), queues.clone(), EvictionConfig::default());

    for name in ["A", "B", "C"] {
        let input = dir.path().join(name).join("film.mkv");
        let output = dir.path().join(name).join(".cache/remux/film.mp4");
        std::fs::create_dir_all(output.parent().unwrap()).unwrap();
        std::fs::write(&output, b"x").unwrap();
        ledger
            .record_completion(NewCacheItem {
                input_path: input.display().to_string(),
                output_path: output.display().to_string(),
                bytes: 400,
                profile: TranscodeProfile::Remux,
                user_id: "u1".into(),
                library_id: lib.id.clone(),
                movie_id: name.into(),
            })
            .await
            .unwrap();
    }

    assert_eq!(evictor.ensure_space("u1", &lib.id, 400).await.unwrap(), 2);
    assert_eq!(ledger.total_bytes(&lib.id, "u1").await.unwrap(), 400);
    let survivor = ledger.oldest_entry(&lib.id, "u1").await.unwrap().unwrap();
    assert_eq!(survivor.movie_id, "C");
    assert!(!dir.path().join("A/.cache").exists());
    assert!(dir.path().join("C/.cache").exists());
}

struct Cache {
    _dir: tempfile::TempDir,
    root: std::path::PathBuf,
    library_id: String,
    ledger: Arc<SqliteLedger>,
    queues: TranscodeQueues,
    evictor: Evictor,
}

async fn cache(budget: i64) -> Cache {
    let dir = tempfile::tempdir().unwrap();
    let pool = file_pool(dir.path()).await;
    let root = dir.path().join("lib");
    let lib = libraries::get_or_create_library(&pool, "u1", &root.display().to_string())
        .await
        .unwrap();
    libraries::set_cache_budget(&pool, &lib.id, budget).await.unwrap();

    let ledger = Arc::new(SqliteLedger::new(pool.clone()));
    let queues = TranscodeQueues {
        remux: Arc::new(SqliteJobQueue::new(pool.clone(), TranscodeProfile::Remux)),
        hls: Arc::new(SqliteJobQueue::new(pool, TranscodeProfile::Hls)),
    };
    let evictor = Evictor::new(ledger.clone(), queues.clone(), EvictionConfig::default());
    Cache {
        _dir: dir,
        root,
        library_id: lib.id,
        ledger,
        queues,
        evictor,
    }
}

impl Cache {
    /// A finished remux of `<root>/<folder>/<stem>.mkv`, job included.
    async fn remuxed(&self, folder: &str, stem: &str, movie: &str) -> JobKey {
        let input = self.root.join(folder).join(format!("{stem}.mkv"));
        let output = self.root.join(folder).join(format!(".cache/remux/{stem}.mp4"));
        std::fs::create_dir_all(output.parent().unwrap()).unwrap();
        std::fs::write(&output, b"x").unwrap();

        let key = JobKey::from_path(&input);
        let mut job = payload(&input.display().to_string());
        job.output_path = output.display().to_string();
        job.library_id = self.library_id.clone();
        job.movie_id = movie.into();
        self.queues.remux.enqueue(&key, job).await.unwrap();
        self.queues.remux.dequeue().await.unwrap();
        self.queues.remux.complete(key.as_str()).await.unwrap();

        self.ledger
            .record_completion(NewCacheItem {
                input_path: input.display().to_string(),
                output_path: output.display().to_string(),
                bytes: 400,
                profile: TranscodeProfile::Remux,
                user_id: "u1".into(),
                library_id: self.library_id.clone(),
                movie_id: movie.into(),
            })
            .await
            .unwrap();
        key
    }
}

#[tokio::test]
async fn touched_item_outlives_newer_ones() {
    let c = cache(1000).await;
    c.remuxed("A", "film", "A").await;
    c.remuxed("B", "film", "B").await;
    c.remuxed("C", "film", "C").await;

    assert!(c.ledger.touch("u1", &c.library_id, "A").await.unwrap());
    assert_eq!(c.evictor.ensure_space("u1", &c.library_id, 400).await.unwrap(), 2);

    let survivor = c
        .ledger
        .oldest_entry(&c.library_id, "u1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(survivor.movie_id, "A");
    assert!(c.root.join("A/.cache").exists());
    assert!(!c.root.join("B/.cache").exists());
    assert!(!c.root.join("C/.cache").exists());
}

#[tokio::test]
async fn evicting_a_shared_folder_drops_every_item_in_it() {
    let c = cache(1000).await;
    let a = c.remuxed("Movies", "a", "A").await;
    let b = c.remuxed("Movies", "b", "B").await;

    assert_eq!(c.evictor.ensure_space("u1", &c.library_id, 400).await.unwrap(), 1);
    assert!(!c.root.join("Movies/.cache").exists());
    assert_eq!(c.ledger.total_bytes(&c.library_id, "u1").await.unwrap(), 0);
    let b_input = c.root.join("Movies/b.mkv").display().to_string();
    assert!(c.ledger.find_by_input(&b_input).await.unwrap().is_none());
    assert!(c.queues.remux.get(a.as_str()).await.unwrap().is_none());
    assert!(c.queues.remux.get(b.as_str()).await.unwrap().is_none());
}
