//! Transcode job queue, cache ledger and LRU eviction.
//!
//! Playback requests enter through [`dispatch::Dispatcher`], which reuses
//! finished output, frees cache space and enqueues work. A
//! [`worker::WorkerPool`] per profile drains the queue and records each
//! finished artifact in the [`ledger::CacheLedger`].

pub mod dispatch;
pub mod events;
pub mod eviction;
pub mod key;
pub mod ledger;
pub mod memory;
pub mod queue;
pub mod sqlite;
pub mod worker;

pub use dispatch::{DispatchError, Dispatcher, PlaybackRequest, TicketStatus, TranscodeTicket};
pub use events::{EventSender, JobEvent};
pub use eviction::{EvictionConfig, EvictionError, Evictor};
pub use key::JobKey;
pub use ledger::{CacheItem, CacheLedger, LedgerError, NewCacheItem};
pub use queue::{JobHandle, JobPayload, JobQueue, QueueError, QueueStats, TranscodeJob, TranscodeQueues};
pub use worker::{WorkerConfig, WorkerPool};
