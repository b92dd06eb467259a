//! Offline cache manager.
//!
//! A cache-first request interceptor with a service-worker lifecycle. On
//! install it precaches the application shell into a versioned cache, on
//! activation it drops caches left by older versions, and while active it
//! answers requests from the caches before going to the network. Successful
//! network responses are copied into a separate runtime cache. When both the
//! caches and the network fail, an offline document (or a synthesized 503) is
//! returned instead.
//!
//! Caches live in SQLite so they survive restarts.

pub mod channel;
pub mod network;
pub mod storage;
pub mod types;
pub mod worker;

pub use channel::WorkerHandle;
pub use network::{Disconnected, HttpNetwork, Network};
pub use storage::{CacheStore, SqliteCacheStore};
pub use types::{Destination, Request, Response, ResponseKind};
pub use worker::{
  FetchOutcome, InstallReport, MessageReply, OfflineWorker, ResponseSource, WorkerMessage,
  WorkerSettings, WorkerState,
};
