use std::sync::Arc;

use reelcache_core::types::TranscodeProfile;
use reelcache_jobs::sqlite::{SqliteJobQueue, SqliteLedger};
use reelcache_jobs::{
    CacheLedger, Dispatcher, EventSender, EvictionConfig, Evictor, JobEvent, TranscodeQueues,
};
use reelcache_transcoder::{BrowserCaps, MediaProber};
use sqlx::SqlitePool;
use tokio_util::sync::CancellationToken;

/// Shared application state passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub jwt_secret: String,
    pub prober: Arc<dyn MediaProber>,
    pub caps: Arc<BrowserCaps>,
    pub queues: TranscodeQueues,
    pub ledger: Arc<dyn CacheLedger>,
    pub evictor: Arc<Evictor>,
    pub dispatcher: Arc<Dispatcher>,
    pub events: EventSender,
    /// Fired once on shutdown; long-lived responses end when it does.
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Wire the SQLite-backed queues and ledger around `db`.
    pub fn new(
        db: SqlitePool,
        jwt_secret: String,
        prober: Arc<dyn MediaProber>,
        eviction: EvictionConfig,
    ) -> Self {
        let (events, _) = tokio::sync::broadcast::channel::<JobEvent>(256);
        let queues = TranscodeQueues {
            remux: Arc::new(SqliteJobQueue::new(db.clone(), TranscodeProfile::Remux)),
            hls: Arc::new(SqliteJobQueue::new(db.clone(), TranscodeProfile::Hls)),
        };
        let ledger: Arc<dyn CacheLedger> = Arc::new(SqliteLedger::new(db.clone()));
        let evictor = Arc::new(
            Evictor::new(ledger.clone(), queues.clone(), eviction).with_events(events.clone()),
        );
        let dispatcher = Arc::new(Dispatcher::new(
            queues.clone(),
            ledger.clone(),
            evictor.clone(),
        ));

        Self {
            db,
            jwt_secret,
            prober,
            caps: Arc::new(BrowserCaps::default()),
            queues,
            ledger,
            evictor,
            dispatcher,
            events,
            shutdown: CancellationToken::new(),
        }
    }
}
